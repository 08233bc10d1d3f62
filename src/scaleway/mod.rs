//! Scaleway implementation of [`CloudProvider`].
//!
//! Every resource except the compute instance is managed through the `scw`
//! CLI with JSON output; see [`resources`] for the role to subcommand table.
//! Resources that Scaleway cannot tag are found by their deterministic name.

mod cli;
mod instance;
mod resources;

use std::fmt;

use scaleway_rs::{ScalewayApi, ScalewayError};
use tracing::{debug, warn};

use crate::config::ScalewayConfig;
use crate::exec::CommandRunner;
use crate::provision::{
    CloudProvider, InstanceStatus, ProviderError, ProviderFuture, ResourceHandle, ResourceRole,
    ResourceSpec,
};
use cli::ScwCli;
use resources::RoleCommand;

fn api_error(err: ScalewayError) -> ProviderError {
    ProviderError::Provider {
        message: err.to_string(),
    }
}

/// Provider backed by the Scaleway API and the `scw` CLI.
pub struct ScalewayProvider<R: CommandRunner> {
    api: ScalewayApi,
    config: ScalewayConfig,
    cli: ScwCli<R>,
}

impl<R: CommandRunner> fmt::Debug for ScalewayProvider<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ScalewayProvider")
            .field("project", &self.config.default_project_id)
            .field("zone", &self.config.default_zone)
            .field("region", &self.config.default_region)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> ScalewayProvider<R> {
    /// Creates a provider. `config` should already be validated.
    #[must_use]
    pub fn new(config: ScalewayConfig, runner: R) -> Self {
        Self {
            api: ScalewayApi::new(&config.secret_key),
            cli: ScwCli::new(config.scw_bin.clone(), runner),
            config,
        }
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &ScalewayConfig {
        &self.config
    }

    async fn lookup(&self, spec: &ResourceSpec) -> Result<Option<ResourceHandle>, ProviderError> {
        let command = RoleCommand::for_role(spec.role);
        let args = resources::list_args(&command, spec, &self.config)?;
        let listed = self.cli.list(args, spec.role.as_str()).await?;
        debug!(role = %spec.role, candidates = listed.len(), "listed resources");
        Ok(listed
            .iter()
            .find(|resource| resources::matches(&command, spec, resource))
            .map(|resource| {
                let handle =
                    ResourceHandle::discovered(spec.role, command.kind(), resource.identifier());
                match resource.public_address() {
                    Some(address) => handle.with_address(address),
                    None => handle,
                }
            }))
    }

    async fn make(&self, spec: &ResourceSpec) -> Result<ResourceHandle, ProviderError> {
        if spec.role == ResourceRole::Instance {
            return self.create_instance(spec).await;
        }
        let command = RoleCommand::for_role(spec.role);
        let args = resources::create_args(&command, spec, &self.config)?;
        let created = self.cli.create(args, spec.role.as_str()).await?;
        let id = if spec.role == ResourceRole::ObjectStorage {
            spec.name.clone()
        } else {
            created.identifier().to_owned()
        };
        if id.is_empty() {
            return Err(ProviderError::Parse {
                resource: spec.role.as_str().to_owned(),
                message: String::from("create output carried no id"),
            });
        }
        let handle = ResourceHandle::created(spec.role, command.kind(), id);
        let finished = match created.public_address() {
            Some(address) => handle.with_address(address),
            None => handle,
        };

        if let Err(err) = self.finish(spec, &finished).await {
            if let Err(cleanup) = self.remove(&finished).await {
                warn!(
                    role = %spec.role,
                    id = %finished.id,
                    error = %cleanup,
                    "failed to delete half-created resource"
                );
            }
            return Err(err);
        }
        Ok(finished)
    }

    /// Follow-up commands a resource needs before it is usable.
    async fn finish(
        &self,
        spec: &ResourceSpec,
        handle: &ResourceHandle,
    ) -> Result<(), ProviderError> {
        match spec.role {
            ResourceRole::SecurityGroup => {
                let rules =
                    resources::ingress_rule_args(&handle.id, &spec.ingress_ports, &self.config);
                for args in rules {
                    self.cli.run(args.json(), "security-group rule").await?;
                }
                Ok(())
            }
            ResourceRole::ElasticIp => {
                let instance = spec.require(ResourceRole::Instance)?;
                self.cli
                    .run(
                        resources::attach_ip_args(&handle.id, &instance.id, &self.config).json(),
                        "ip attach",
                    )
                    .await
                    .map(|_| ())
            }
            _ => Ok(()),
        }
    }

    async fn remove(&self, handle: &ResourceHandle) -> Result<(), ProviderError> {
        let command = RoleCommand::for_role(handle.role);
        let args = resources::delete_args(&command, handle, &self.config);
        self.cli.run(args, handle.role.as_str()).await.map(|_| ())
    }
}

impl<R: CommandRunner> CloudProvider for ScalewayProvider<R> {
    fn find<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, Option<ResourceHandle>> {
        Box::pin(self.lookup(spec))
    }

    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ResourceHandle> {
        Box::pin(self.make(spec))
    }

    fn delete<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ()> {
        Box::pin(self.remove(handle))
    }

    fn instance_status<'a>(
        &'a self,
        handle: &'a ResourceHandle,
    ) -> ProviderFuture<'a, InstanceStatus> {
        Box::pin(self.fetch_status(handle))
    }
}

#[cfg(test)]
mod tests;
