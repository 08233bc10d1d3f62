//! Plugins compiled into driftfix.
//!
//! Declaration order matters: fixes run in registration order, so the
//! package manager comes before anything installed through it and cloud
//! topology comes before host bootstrap.

use std::borrow::Cow;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use tracing::debug;

use super::{
    Constructor, InstanceError, InstanceResult, LoadContext, PluginCategory, PluginDescriptor,
    PluginInstance,
};
use crate::config::ScalewayConfig;
use crate::exec::{ProcessCommandRunner, RemoteExecutor};
use crate::fix::{
    CheckError, CheckFuture, Fix, FixContext, FixError, FnProbe, OsConstraint, PlatformProbe,
    PlatformRemedy, Probe, Remedy, Severity, Stage, VersionProbe,
};
use crate::platform::{Dependency, OsFamily, Runtime, ToolVersion};
use crate::provision::{ProvisionRequest, ProvisionService, Provisioner, TcpProbe};
use crate::scaleway::ScalewayProvider;

/// Instance for plugins whose fixes carry all their behaviour.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuiltinInstance {
    id: String,
    category: PluginCategory,
}

impl BuiltinInstance {
    /// Creates an instance for plugin `id`.
    #[must_use]
    pub fn new(id: impl Into<String>, category: PluginCategory) -> Self {
        Self {
            id: id.into(),
            category,
        }
    }
}

impl PluginInstance for BuiltinInstance {
    fn id(&self) -> &str {
        &self.id
    }

    fn category(&self) -> PluginCategory {
        self.category
    }
}

struct ScalewayPlugin {
    config: ScalewayConfig,
}

impl PluginInstance for ScalewayPlugin {
    fn id(&self) -> &str {
        "scaleway"
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Server
    }

    fn provision_service(
        &self,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Option<Arc<dyn ProvisionService>> {
        let runner = ProcessCommandRunner::new(Duration::from_secs(
            self.config.command_timeout_secs,
        ));
        let provider = ScalewayProvider::new(self.config.clone(), runner);
        let provisioner = Provisioner::new(
            provider,
            TcpProbe,
            executor,
            self.config.readiness_policy(),
        );
        Some(Arc::new(provisioner))
    }
}

fn simple(id: &'static str, category: PluginCategory) -> InstanceResult {
    let instance: Arc<dyn PluginInstance> = Arc::new(BuiltinInstance::new(id, category));
    Ok(instance)
}

fn platform_fix(
    id: &str,
    stage: Stage,
    dependency: Dependency,
    severity: Severity,
    description: &str,
) -> Result<Fix, FixError> {
    let manual = format!("Install or start the {dependency} by hand, then re-run the scan");
    Fix::builder(id, stage)
        .os(OsConstraint::only(OsFamily::ALL))
        .severity(severity)
        .description(description)
        .probe(PlatformProbe::new(dependency))
        .remedy(PlatformRemedy::new(dependency))
        .manual_fix(manual)
        .build()
}

fn local_plugin() -> Result<PluginDescriptor, FixError> {
    Ok(PluginDescriptor::builder(
        PluginCategory::Server,
        "local",
        Constructor::config_and_secrets(|_, _| simple("local", PluginCategory::Server)),
    )
    .load_when(|context| context.stage == Stage::Dev)
    .fix(platform_fix(
        "local.package-manager",
        Stage::Dev,
        Dependency::PackageManager,
        Severity::Critical,
        "System package manager is available",
    )?)
    .fix(platform_fix(
        "local.version-control",
        Stage::Dev,
        Dependency::VersionControl,
        Severity::Warning,
        "git is installed",
    )?)
    .fix(platform_fix(
        "local.container-runtime",
        Stage::Dev,
        Dependency::ContainerRuntime,
        Severity::Warning,
        "Docker is installed",
    )?)
    .fix(platform_fix(
        "local.container-daemon",
        Stage::Dev,
        Dependency::ContainerDaemon,
        Severity::Warning,
        "Docker daemon is running",
    )?)
    .build())
}

fn ssh_host_plugin() -> Result<PluginDescriptor, FixError> {
    let reachable = Fix::builder("staging.ssh-reachable", Stage::Staging)
        .severity(Severity::Critical)
        .description("Staging host accepts SSH logins")
        .probe(ReachableProbe)
        .manual_fix(
            "Check host, user and port of the staging environment and export its SSH key secret",
        )
        .build()?;

    Ok(PluginDescriptor::builder(
        PluginCategory::Server,
        "ssh-host",
        Constructor::config_and_secrets(|_, _| simple("ssh-host", PluginCategory::Server)),
    )
    .requires_config("host")
    .load_when(|context| {
        context.stage == Stage::Staging
            && context
                .environment
                .is_some_and(|environment| environment.provider.is_none())
    })
    .fix(reachable)
    .fix(platform_fix(
        "staging.container-runtime",
        Stage::Staging,
        Dependency::ContainerRuntime,
        Severity::Critical,
        "Docker is installed on the staging host",
    )?)
    .fix(platform_fix(
        "staging.container-daemon",
        Stage::Staging,
        Dependency::ContainerDaemon,
        Severity::Critical,
        "Docker daemon is running on the staging host",
    )?)
    .build())
}

fn scaleway_plugin() -> Result<PluginDescriptor, FixError> {
    let topology = Fix::builder("prod.cloud-topology", Stage::Prod)
        .severity(Severity::Critical)
        .description("Cloud network, instance and services are provisioned")
        .probe(TopologyProbe)
        .remedy(TopologyRemedy)
        .manual_fix("Run `driftfix provision production` and inspect the reported failure")
        .build()?;

    Ok(PluginDescriptor::builder(
        PluginCategory::Server,
        "scaleway",
        Constructor::config_and_secrets(|config, secrets| {
            let loaded = ScalewayConfig::load_without_cli_args()
                .map_err(|err| InstanceError::new(err.to_string()))?;
            let merged = loaded.with_environment(config, secrets);
            merged
                .validate()
                .map_err(|err| InstanceError::new(err.to_string()))?;
            let instance: Arc<dyn PluginInstance> = Arc::new(ScalewayPlugin { config: merged });
            Ok(instance)
        }),
    )
    .requires_config("scaleway.project_id")
    .requires_secret("scaleway.secret_key")
    .load_when(|context| {
        context.environment.is_some_and(|environment| {
            environment.provider.as_deref() == Some("scaleway")
        })
    })
    .fix(topology)
    .fix(platform_fix(
        "prod.container-runtime",
        Stage::Prod,
        Dependency::ContainerRuntime,
        Severity::Critical,
        "Docker is installed on the production host",
    )?)
    .build())
}

fn env_plugin() -> Result<PluginDescriptor, FixError> {
    let key_fix = |id: &str, stage: Stage| {
        Fix::builder(id, stage)
            .severity(Severity::Critical)
            .description("SSH private key referenced by the environment is available")
            .probe(FnProbe::new(|context: &FixContext<'_>| {
                Ok(context
                    .environment
                    .and_then(|environment| environment.ssh_key_secret.as_deref())
                    .is_some_and(|name| !context.secrets.contains(name)))
            }))
            .manual_fix(
                "Export the private key named by ssh_key_secret as DRIFTFIX_SECRET_<NAME>",
            )
            .build()
    };

    Ok(PluginDescriptor::builder(
        PluginCategory::Secrets,
        "env",
        Constructor::config_only(|_| simple("env", PluginCategory::Secrets)),
    )
    .fix(key_fix("env.staging-ssh-key", Stage::Staging)?)
    .fix(key_fix("env.prod-ssh-key", Stage::Prod)?)
    .build())
}

fn node_plugin() -> Result<PluginDescriptor, FixError> {
    let runtime = Fix::builder("node.runtime", Stage::Dev)
        .os(OsConstraint::only(OsFamily::ALL))
        .description("Node.js 18 or newer is installed")
        .probe(VersionProbe::new("node --version", ToolVersion::new(18, 0, 0)))
        .remedy(PlatformRemedy::new(Dependency::LanguageRuntime(Runtime::Node)))
        .confirm_with_scan()
        .manual_fix("Install Node.js LTS from https://nodejs.org")
        .build()?;
    let dependencies = Fix::builder("node.dependencies", Stage::Dev)
        .severity(Severity::Info)
        .description("Project dependencies are installed")
        .probe(InProject::new("test -d node_modules"))
        .remedy(InProject::new("npm install"))
        .confirm_with_scan()
        .manual_fix("Run `npm install` in the project root")
        .build()?;

    Ok(PluginDescriptor::builder(
        PluginCategory::Framework,
        "node",
        Constructor::path_and_config(|_, _| simple("node", PluginCategory::Framework)),
    )
    .load_when(|context| has_project_file(context, "package.json"))
    .fix(runtime)
    .fix(dependencies)
    .build())
}

/// Built-in descriptors in registration order.
///
/// # Errors
///
/// Returns [`FixError`] if a built-in fix is malformed.
pub fn builtin_descriptors() -> Result<Vec<PluginDescriptor>, FixError> {
    Ok(vec![
        local_plugin()?,
        ssh_host_plugin()?,
        scaleway_plugin()?,
        env_plugin()?,
        node_plugin()?,
    ])
}

fn has_project_file(context: &LoadContext<'_>, name: &str) -> bool {
    let root = &context.project.root;
    match Dir::open_ambient_dir(root, ambient_authority()) {
        Ok(dir) => dir.try_exists(name).unwrap_or(false),
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                debug!(root = %root, error = %err, "project root is unreadable");
            }
            false
        }
    }
}

struct ReachableProbe;

impl Probe for ReachableProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            match context.executor.execute(context.target, "true").await {
                Ok(output) => Ok(!output.is_success()),
                Err(err) => {
                    debug!(target = %context.target, error = %err, "ssh probe failed");
                    Ok(true)
                }
            }
        })
    }
}

fn provision_inputs<'a>(
    context: &'a FixContext<'_>,
) -> Result<(&'a dyn ProvisionService, ProvisionRequest), CheckError> {
    let Some(service) = context.provisioner else {
        return Err(CheckError::Unavailable(format!(
            "no provisioner is configured for {}",
            context.stage
        )));
    };
    let Some(environment) = context.environment else {
        return Err(CheckError::Unavailable(format!(
            "no {} environment is configured",
            context.stage.environment_name()
        )));
    };
    Ok((
        service,
        ProvisionRequest::from_environment(context.project, environment),
    ))
}

struct TopologyProbe;

impl Probe for TopologyProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let (service, request) = provision_inputs(context)?;
            let survey = service
                .survey(&request)
                .await
                .map_err(|err| CheckError::Provision(err.to_string()))?;
            Ok(!survey.is_complete())
        })
    }
}

struct TopologyRemedy;

impl Remedy for TopologyRemedy {
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let (service, request) = provision_inputs(context)?;
            let outcome = service
                .provision(&request)
                .await
                .map_err(|err| CheckError::Provision(err.to_string()))?;
            if let Some(err) = &outcome.readiness_error {
                debug!(error = %err, "instance provisioned but not ready");
            }
            Ok(outcome.ready)
        })
    }
}

/// Runs a command from the project root.
struct InProject {
    command: &'static str,
}

impl InProject {
    const fn new(command: &'static str) -> Self {
        Self { command }
    }

    fn render(&self, root: &Utf8Path) -> String {
        let escaped = shell_escape::unix::escape(Cow::Borrowed(root.as_str()));
        format!("cd {escaped} && {}", self.command)
    }
}

impl Probe for InProject {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let command = self.render(&context.project.root);
            let output = context.executor.execute(context.target, &command).await?;
            Ok(!output.is_success())
        })
    }
}

impl Remedy for InProject {
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let command = self.render(&context.project.root);
            let output = context.executor.execute(context.target, &command).await?;
            if output.is_success() {
                Ok(true)
            } else {
                Err(CheckError::CommandFailed {
                    command,
                    status_text: output.status_text(),
                    stderr: output.stderr.trim().to_owned(),
                })
            }
        })
    }
}
