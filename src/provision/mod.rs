//! Idempotent provisioning of a cloud environment.
//!
//! [`Provisioner`] walks a [`ProvisioningPlan`] in order. Each node is first
//! looked up by its identity tags and reused when found; otherwise it is
//! created with those tags. A failure part-way through deletes the resources
//! created by this run, newest first, and returns the original error with a
//! summary of the cleanup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::environment::{EnvironmentConfig, ProjectContext};
use crate::exec::RemoteExecutor;

mod plan;
mod provider;
mod readiness;
mod state;
mod tags;

pub use plan::{PlanError, PlanStep, ProvisioningPlan, ResourceRole, Topology};
pub use provider::{
    CloudProvider, InstanceState, InstanceStatus, ProviderError, ProviderFuture, ResourceHandle,
    ResourceOrigin, ResourceSpec,
};
pub use readiness::{
    ReachFuture, ReachabilityProbe, ReadinessCheck, ReadinessError, ReadinessPolicy, SshLogin,
    TcpProbe,
};
pub use state::{ResourceState, ResourceTracker, TransitionError};
pub use tags::{MANAGED_BY_TAG, ProjectIdentity, TagSet};

/// What to provision and how to reach the resulting host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionRequest {
    /// Project and environment identity used for tags.
    pub identity: ProjectIdentity,
    /// Optional topology parts.
    pub topology: Topology,
    /// SSH login for the readiness probe.
    pub login: SshLogin,
    /// Public key registered as the key pair.
    pub ssh_public_key: Option<String>,
}

impl ProvisionRequest {
    /// Creates a request with the default topology.
    #[must_use]
    pub fn new(identity: ProjectIdentity) -> Self {
        Self {
            identity,
            topology: Topology::default(),
            login: SshLogin {
                user: String::from("root"),
                port: 22,
                key_secret: None,
            },
            ssh_public_key: None,
        }
    }

    /// Derives a request from an environment's `provision.*` settings.
    ///
    /// Recognised keys: `provision.database`, `provision.object_storage`,
    /// `provision.container_registry` (booleans), `provision.mail_domain`,
    /// `provision.ssh_public_key` (strings) and `provision.ingress_ports`
    /// (array of ports).
    #[must_use]
    pub fn from_environment(project: &ProjectContext, environment: &EnvironmentConfig) -> Self {
        let flag = |key: &str| {
            environment
                .setting(key)
                .and_then(|value| value.as_bool())
                .unwrap_or(false)
        };
        let mut topology = Topology {
            database: flag("provision.database"),
            object_storage: flag("provision.object_storage"),
            container_registry: flag("provision.container_registry"),
            mail_domain: environment.setting_str("provision.mail_domain"),
            ..Topology::default()
        };
        let ingress = environment.setting("provision.ingress_ports");
        if let Some(serde_json::Value::Array(ports)) = ingress {
            topology.ingress_ports = ports
                .iter()
                .filter_map(serde_json::Value::as_u64)
                .filter_map(|port| u16::try_from(port).ok())
                .collect();
        }
        Self {
            identity: ProjectIdentity::new(&project.name, &environment.name),
            topology,
            login: SshLogin {
                user: environment.user.clone(),
                port: environment.port,
                key_secret: environment.ssh_key_secret.clone(),
            },
            ssh_public_key: environment.setting_str("provision.ssh_public_key"),
        }
    }

    fn spec_for(
        &self,
        step: &PlanStep,
        handles: &BTreeMap<ResourceRole, ResourceHandle>,
    ) -> ResourceSpec {
        ResourceSpec {
            role: step.role,
            name: self.identity.resource_name(step.role),
            tags: self.identity.tags_for(step.role),
            dependencies: step
                .requires
                .iter()
                .filter_map(|role| handles.get(role).cloned())
                .collect(),
            ingress_ports: self.topology.ingress_ports.clone(),
            public_key: self.ssh_public_key.clone(),
            domain: self.topology.mail_domain.clone(),
        }
    }
}

/// Result of a provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Handles in plan order, reused and created alike.
    pub handles: Vec<ResourceHandle>,
    /// Whether the instance passed every readiness phase.
    pub ready: bool,
    /// Public address of the instance, preferring the elastic IP.
    pub public_ip: Option<IpAddr>,
    /// Roles not attempted because a prerequisite never became ready.
    pub skipped: Vec<ResourceRole>,
    /// Why the instance is not ready, when it is not.
    pub readiness_error: Option<ReadinessError>,
}

impl ProvisionOutcome {
    /// Number of resources created by this run.
    #[must_use]
    pub fn created(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| handle.origin == ResourceOrigin::Created)
            .count()
    }

    /// Number of resources reused from an earlier run.
    #[must_use]
    pub fn reused(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| handle.origin == ResourceOrigin::Discovered)
            .count()
    }
}

/// What compensating cleanup achieved after a failure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Resources deleted, newest first.
    pub deleted: Vec<ResourceHandle>,
    /// Resources that could not be deleted, with the reason.
    pub failed: Vec<(ResourceHandle, String)>,
}

impl fmt::Display for CleanupSummary {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} deleted", self.deleted.len())?;
        if !self.failed.is_empty() {
            let residual: Vec<String> = self
                .failed
                .iter()
                .map(|(handle, _)| format!("{} {}", handle.role, handle.id))
                .collect();
            write!(formatter, ", left behind: {}", residual.join(", "))?;
        }
        Ok(())
    }
}

/// Errors raised by provisioning.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// The plan could not be built.
    #[error(transparent)]
    InvalidPlan(#[from] PlanError),
    /// A step failed; resources created earlier in the run were cleaned up.
    #[error("provisioning {role} failed: {source} (cleanup: {cleanup})")]
    Step {
        /// Role whose step failed.
        role: ResourceRole,
        /// Provider failure.
        source: ProviderError,
        /// Outcome of compensating deletion.
        cleanup: CleanupSummary,
    },
    /// A lookup failed while surveying.
    #[error("looking up {role} failed: {source}")]
    Discovery {
        /// Role being looked up.
        role: ResourceRole,
        /// Provider failure.
        source: ProviderError,
    },
    /// Internal state machine misuse.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Which resources of a plan already exist.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Survey {
    /// Handles found by lookup.
    pub present: Vec<ResourceHandle>,
    /// Roles with no matching resource.
    pub missing: Vec<ResourceRole>,
    /// Public address of the instance, when known.
    pub public_ip: Option<IpAddr>,
}

impl Survey {
    /// Returns `true` when every planned resource exists.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Future returned by [`ProvisionService`] operations.
pub type ProvisionFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProvisionError>> + Send + 'a>>;

/// Object-safe provisioning entry point handed to fixes.
pub trait ProvisionService: Send + Sync {
    /// Brings the environment described by `request` to its topology.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a step fails.
    fn provision<'a>(&'a self, request: &'a ProvisionRequest)
    -> ProvisionFuture<'a, ProvisionOutcome>;

    /// Reports which planned resources already exist, without changing
    /// anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when a lookup fails.
    fn survey<'a>(&'a self, request: &'a ProvisionRequest) -> ProvisionFuture<'a, Survey>;
}

/// Find-or-create provisioner over a [`CloudProvider`].
pub struct Provisioner<P: CloudProvider, R: ReachabilityProbe = TcpProbe> {
    provider: P,
    reachability: R,
    executor: Arc<dyn RemoteExecutor>,
    policy: ReadinessPolicy,
}

impl<P: CloudProvider, R: ReachabilityProbe> fmt::Debug for Provisioner<P, R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Provisioner")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<P: CloudProvider, R: ReachabilityProbe> Provisioner<P, R> {
    /// Creates a provisioner.
    #[must_use]
    pub fn new(
        provider: P,
        reachability: R,
        executor: Arc<dyn RemoteExecutor>,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            provider,
            reachability,
            executor,
            policy,
        }
    }

    /// Underlying provider.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Runs the plan for `request`.
    ///
    /// Re-running against an environment that is already complete creates
    /// nothing. When the instance fails its readiness wait the run still
    /// returns `Ok` with `ready = false`; dependents of the instance are
    /// skipped and nothing is deleted.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Step`] when a lookup or creation fails, after
    /// deleting what this run created.
    pub async fn provision(
        &self,
        request: &ProvisionRequest,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let plan = ProvisioningPlan::for_topology(&request.topology)?;
        let mut run = PlanRun::default();

        for step in plan.steps() {
            if step.requires.iter().any(|role| run.blocked.contains(role)) {
                run.blocked.insert(step.role);
                run.skipped.push(step.role);
                continue;
            }

            let spec = request.spec_for(step, &run.handles);
            let handle = match self.find_or_create(&spec, &mut run.created).await {
                Ok(handle) => handle,
                Err(source) => {
                    let cleanup = self.compensate(&run.created).await;
                    return Err(ProvisionError::Step {
                        role: step.role,
                        source,
                        cleanup,
                    });
                }
            };

            if step.role == ResourceRole::Instance {
                self.check_readiness(&handle, request, &mut run).await;
            }
            if step.role == ResourceRole::ElasticIp
                && let Some(address) = handle.address.as_deref().and_then(|ip| ip.parse().ok())
            {
                run.public_ip = Some(address);
            }
            run.order.push(step.role);
            run.handles.insert(step.role, handle);
        }

        Ok(run.into_outcome())
    }

    async fn find_or_create(
        &self,
        spec: &ResourceSpec,
        created: &mut Vec<ResourceHandle>,
    ) -> Result<ResourceHandle, ProviderError> {
        let mut tracker = ResourceTracker::new(spec.role);
        if let Some(handle) = self.provider.find(spec).await? {
            info!(role = %spec.role, id = %handle.id, "reusing existing resource");
            tracker
                .discovered(handle.clone())
                .map_err(|err| ProviderError::Provider {
                    message: err.to_string(),
                })?;
            return Ok(handle);
        }

        tracker.begin_create().map_err(|err| ProviderError::Provider {
            message: err.to_string(),
        })?;
        match self.provider.create(spec).await {
            Ok(handle) => {
                info!(role = %spec.role, id = %handle.id, "created resource");
                created.push(handle.clone());
                tracker
                    .created(handle.clone())
                    .map_err(|err| ProviderError::Provider {
                        message: err.to_string(),
                    })?;
                Ok(handle)
            }
            Err(err) => {
                tracker
                    .failed(err.to_string())
                    .map_err(|transition| ProviderError::Provider {
                        message: transition.to_string(),
                    })?;
                Err(err)
            }
        }
    }

    async fn check_readiness(
        &self,
        instance: &ResourceHandle,
        request: &ProvisionRequest,
        run: &mut PlanRun,
    ) {
        let check = ReadinessCheck {
            provider: &self.provider,
            reachability: &self.reachability,
            executor: self.executor.as_ref(),
            policy: &self.policy,
        };
        match check.wait(instance, &request.login).await {
            Ok(address) => {
                run.ready = true;
                run.public_ip = Some(address);
            }
            Err(err) => {
                warn!(instance = %instance.id, error = %err, "instance is not ready");
                run.ready = false;
                run.blocked.insert(ResourceRole::Instance);
                run.readiness_error = Some(err);
            }
        }
    }

    async fn compensate(&self, created: &[ResourceHandle]) -> CleanupSummary {
        let mut summary = CleanupSummary::default();
        for handle in created.iter().rev() {
            match self.provider.delete(handle).await {
                Ok(()) => summary.deleted.push(handle.clone()),
                Err(err) => {
                    warn!(
                        role = %handle.role,
                        id = %handle.id,
                        error = %err,
                        "cleanup failed; resource left behind"
                    );
                    summary.failed.push((handle.clone(), err.to_string()));
                }
            }
        }
        summary
    }

    /// Looks up every planned resource without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Discovery`] when a lookup fails.
    pub async fn survey(&self, request: &ProvisionRequest) -> Result<Survey, ProvisionError> {
        let plan = ProvisioningPlan::for_topology(&request.topology)?;
        let mut handles = BTreeMap::new();
        let mut survey = Survey::default();
        for step in plan.steps() {
            let spec = request.spec_for(step, &handles);
            match self.provider.find(&spec).await {
                Ok(Some(handle)) => {
                    handles.insert(step.role, handle.clone());
                    survey.present.push(handle);
                }
                Ok(None) => survey.missing.push(step.role),
                Err(source) => {
                    return Err(ProvisionError::Discovery {
                        role: step.role,
                        source,
                    });
                }
            }
        }

        survey.public_ip = match handles.get(&ResourceRole::ElasticIp) {
            Some(handle) => handle.address.as_deref().and_then(|ip| ip.parse().ok()),
            None => None,
        };
        if survey.public_ip.is_none()
            && let Some(instance) = handles.get(&ResourceRole::Instance)
        {
            survey.public_ip = self
                .provider
                .instance_status(instance)
                .await
                .ok()
                .and_then(|status| status.public_ip);
        }
        Ok(survey)
    }
}

impl<P: CloudProvider, R: ReachabilityProbe> ProvisionService for Provisioner<P, R> {
    fn provision<'a>(
        &'a self,
        request: &'a ProvisionRequest,
    ) -> ProvisionFuture<'a, ProvisionOutcome> {
        Box::pin(Self::provision(self, request))
    }

    fn survey<'a>(&'a self, request: &'a ProvisionRequest) -> ProvisionFuture<'a, Survey> {
        Box::pin(Self::survey(self, request))
    }
}

#[derive(Default)]
struct PlanRun {
    handles: BTreeMap<ResourceRole, ResourceHandle>,
    order: Vec<ResourceRole>,
    created: Vec<ResourceHandle>,
    blocked: BTreeSet<ResourceRole>,
    skipped: Vec<ResourceRole>,
    ready: bool,
    public_ip: Option<IpAddr>,
    readiness_error: Option<ReadinessError>,
}

impl PlanRun {
    fn into_outcome(mut self) -> ProvisionOutcome {
        let handles = self
            .order
            .iter()
            .filter_map(|role| self.handles.remove(role))
            .collect();
        ProvisionOutcome {
            handles,
            ready: self.ready,
            public_ip: self.public_ip,
            skipped: self.skipped,
            readiness_error: self.readiness_error,
        }
    }
}
