//! Scan and fix runs over the fix catalog.
//!
//! A run resolves the stage's environment, where commands execute and which
//! operating system they target, then asks the registry for the fixes of the
//! plugins that load. Scans run concurrently and never fail the run; a probe
//! error counts as "no problem". Fix runs apply remedies one at a time in
//! catalog order and record an outcome for each problem. Plugins missing
//! required settings or secrets contribute a manual-only critical finding
//! instead of their fixes.

mod state;
mod types;

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::environment::{EnvironmentConfig, EnvironmentSource, ProjectContext};
use crate::exec::{RemoteExecutor, RemoteHost, Target};
use crate::fix::{Fix, FixContext, FnProbe, Severity, Stage, applicable};
use crate::platform::{OsFamily, detect_os};
use crate::plugin::{InstanceArgs, LoadContext, PluginCategory, PluginDescriptor, PluginRegistry};
use crate::provision::{ProvisionError, ProvisionOutcome, ProvisionRequest, ProvisionService};
use crate::secrets::SecretStore;

pub use state::{Phase, PhaseError, RunState};
pub use types::{Finding, FixOutcome, FixReport, ScanReport};

/// Scans run at most this many probes at once unless told otherwise.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

/// Errors that end a run. Individual fixes never produce one.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OrchestratorError {
    /// Raised when the run's phases are driven out of order.
    #[error("invalid run transition: {0}")]
    Phase(#[from] PhaseError),
    /// Raised when no environment has the requested name.
    #[error("no environment named '{0}'; add [environments.{0}] to the environments file")]
    UnknownEnvironment(String),
    /// Raised when the environment names no provider plugin that can
    /// provision it.
    #[error("environment '{0}' has no cloud provider; set provider = \"scaleway\"")]
    NoProvisioner(String),
    /// Raised when the provider plugin lacks settings or secrets.
    #[error("provider is not configured: {0}")]
    NotConfigured(String),
    /// Raised when the provider plugin fails to build its provisioner.
    #[error("failed to build the {provider} provisioner: {message}")]
    Provisioner {
        /// Provider plugin identifier.
        provider: String,
        /// Constructor error text.
        message: String,
    },
    /// Raised when a provisioning step fails.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Everything a run needs once the stage has been resolved.
struct Session<'e> {
    stage: Stage,
    os: Option<OsFamily>,
    target: Target,
    environment: Option<&'e EnvironmentConfig>,
    provisioner: Option<Arc<dyn ProvisionService>>,
    fixes: Vec<Fix>,
    configuration: Vec<Finding>,
}

/// Drives scan and fix runs for one project.
pub struct ScanFixOrchestrator<'a> {
    registry: &'a PluginRegistry,
    environments: &'a dyn EnvironmentSource,
    executor: Arc<dyn RemoteExecutor>,
    secrets: &'a dyn SecretStore,
    project: ProjectContext,
    concurrency: usize,
    provisioner: Option<Arc<dyn ProvisionService>>,
}

impl<'a> ScanFixOrchestrator<'a> {
    /// Creates an orchestrator with [`DEFAULT_SCAN_CONCURRENCY`].
    #[must_use]
    pub fn new(
        registry: &'a PluginRegistry,
        environments: &'a dyn EnvironmentSource,
        executor: Arc<dyn RemoteExecutor>,
        secrets: &'a dyn SecretStore,
        project: ProjectContext,
    ) -> Self {
        Self {
            registry,
            environments,
            executor,
            secrets,
            project,
            concurrency: DEFAULT_SCAN_CONCURRENCY,
            provisioner: None,
        }
    }

    /// Bounds concurrent probes. Zero is treated as one.
    #[must_use]
    pub const fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency = if limit == 0 { 1 } else { limit };
        self
    }

    /// Uses `service` for cloud fixes instead of building one from the
    /// environment's provider plugin.
    #[must_use]
    pub fn with_provisioner(mut self, service: Arc<dyn ProvisionService>) -> Self {
        self.provisioner = Some(service);
        self
    }

    /// Scans every applicable fix for `stage`.
    ///
    /// `os` overrides the environment's configured or detected OS.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] only if the run's phases are misordered.
    pub async fn scan(
        &self,
        stage: Stage,
        os: Option<OsFamily>,
    ) -> Result<ScanReport, OrchestratorError> {
        let mut state = RunState::new();
        state.advance(Phase::Scanning)?;
        let session = self.prepare(stage, os).await;
        let report = self.run_scan(&session).await;
        state.advance(Phase::Reported)?;
        state.advance(Phase::Done)?;
        Ok(report)
    }

    /// Scans `stage`, then applies the remedy of every problem found.
    ///
    /// Remedies run sequentially in catalog order. A remedy error counts as
    /// an unresolved outcome and the batch continues. Nothing is re-scanned.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] only if the run's phases are misordered.
    pub async fn fix(
        &self,
        stage: Stage,
        os: Option<OsFamily>,
    ) -> Result<FixReport, OrchestratorError> {
        let mut state = RunState::new();
        state.advance(Phase::Scanning)?;
        let session = self.prepare(stage, os).await;
        let scan = self.run_scan(&session).await;
        state.advance(Phase::Fixing)?;

        let context = self.context(&session);
        let mut outcomes = Vec::new();
        for finding in scan.problems() {
            outcomes.push(apply(finding, &context).await);
        }
        state.advance(Phase::Done)?;

        let report = FixReport { scan, outcomes };
        info!(
            stage = %stage,
            resolved = report.resolved(),
            failed = report.failed(),
            manual = report.manual(),
            "fix run finished"
        );
        Ok(report)
    }

    /// Brings the environment called `name` to its cloud topology through
    /// its provider plugin.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the environment is unknown, has no
    /// configured provider, or a provisioning step fails.
    pub async fn provision(&self, name: &str) -> Result<ProvisionOutcome, OrchestratorError> {
        let environment = self
            .environments
            .environment(name)
            .ok_or_else(|| OrchestratorError::UnknownEnvironment(name.to_owned()))?;
        let load = LoadContext {
            stage: name.parse().unwrap_or(Stage::Prod),
            environment: Some(environment),
            project: &self.project,
        };

        let mut ready = Vec::new();
        for plugin in self.registry.loaded(&load) {
            match missing_requirements(plugin, Some(environment), self.secrets) {
                Some(missing)
                    if self.provisioner.is_none()
                        && environment.provider.as_deref() == Some(plugin.id()) =>
                {
                    return Err(OrchestratorError::NotConfigured(missing));
                }
                Some(_) => {}
                None => ready.push(plugin),
            }
        }

        let service = match self.cloud_provisioner(Some(environment), &ready) {
            Ok(Some(service)) => service,
            Ok(None) => return Err(OrchestratorError::NoProvisioner(name.to_owned())),
            Err((provider, message)) => {
                return Err(OrchestratorError::Provisioner { provider, message });
            }
        };
        let request = ProvisionRequest::from_environment(&self.project, environment);
        let outcome = service.provision(&request).await?;
        info!(
            environment = name,
            created = outcome.created(),
            reused = outcome.reused(),
            ready = outcome.ready,
            "provisioning finished"
        );
        Ok(outcome)
    }

    fn context<'s>(&'s self, session: &'s Session<'_>) -> FixContext<'s> {
        FixContext {
            stage: session.stage,
            os: session.os,
            target: &session.target,
            environment: session.environment,
            executor: self.executor.as_ref(),
            secrets: self.secrets,
            provisioner: session.provisioner.as_deref(),
            project: &self.project,
        }
    }

    async fn run_scan(&self, session: &Session<'_>) -> ScanReport {
        let context = self.context(session);
        let scanned: Vec<Finding> = stream::iter(session.fixes.iter())
            .map(|fix| async move {
                let result = fix.scan(&context).await;
                if let Err(err) = &result {
                    debug!(fix = fix.id(), error = %err, "probe failed; treating as no problem");
                }
                Finding::from_scan(fix.clone(), result)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut findings = session.configuration.clone();
        findings.extend(scanned);
        let report = ScanReport {
            stage: session.stage,
            os: session.os,
            target: session.target.clone(),
            findings,
        };
        info!(
            stage = %session.stage,
            target = %report.target,
            scanned = session.fixes.len(),
            problems = report.problems().count(),
            "scan finished"
        );
        report
    }

    async fn prepare(&self, stage: Stage, os: Option<OsFamily>) -> Session<'a> {
        let environment = self.environments.environment(stage.environment_name());
        let load = LoadContext {
            stage,
            environment,
            project: &self.project,
        };

        let mut configuration = Vec::new();
        let mut ready = Vec::new();
        for plugin in self.registry.loaded(&load) {
            match missing_requirements(plugin, environment, self.secrets) {
                Some(missing) => {
                    debug!(plugin = plugin.id(), %missing, "plugin is not configured");
                    push_manual(
                        &mut configuration,
                        &format!("{}.configuration", plugin.id()),
                        stage,
                        &format!("{} plugin is configured", plugin.id()),
                        &missing,
                    );
                }
                None => ready.push(plugin),
            }
        }

        let provisioner = match self.cloud_provisioner(environment, &ready) {
            Ok(service) => service,
            Err((provider, message)) => {
                push_manual(
                    &mut configuration,
                    &format!("{provider}.provisioner"),
                    stage,
                    &format!("{provider} provisioner can be built"),
                    &message,
                );
                None
            }
        };

        let target = self
            .resolve_target(stage, environment, provisioner.as_deref())
            .await;
        let os = match os.or_else(|| environment.and_then(|config| config.os)) {
            Some(family) => Some(family),
            None => self.detect(&target).await,
        };

        let catalog: Vec<Fix> = ready
            .iter()
            .flat_map(|plugin| plugin.fixes().iter().cloned())
            .collect();
        let fixes = applicable(&catalog, stage, os);
        debug!(
            stage = %stage,
            os = ?os,
            catalog = catalog.len(),
            applicable = fixes.len(),
            "fixes selected"
        );

        Session {
            stage,
            os,
            target,
            environment,
            provisioner,
            fixes,
            configuration,
        }
    }

    fn cloud_provisioner(
        &self,
        environment: Option<&EnvironmentConfig>,
        ready: &[&PluginDescriptor],
    ) -> Result<Option<Arc<dyn ProvisionService>>, (String, String)> {
        if let Some(service) = &self.provisioner {
            return Ok(Some(Arc::clone(service)));
        }
        let Some((environment, provider)) = environment
            .and_then(|config| config.provider.as_deref().map(|provider| (config, provider)))
        else {
            return Ok(None);
        };
        if !ready
            .iter()
            .any(|plugin| plugin.category() == PluginCategory::Server && plugin.id() == provider)
        {
            return Ok(None);
        }

        let failure = |message: String| (provider.to_owned(), message);
        let settings = serde_json::to_value(&environment.settings)
            .map_err(|err| failure(err.to_string()))?;
        let instance = self
            .registry
            .create_instance(
                PluginCategory::Server,
                provider,
                &InstanceArgs {
                    config: &settings,
                    secrets: self.secrets,
                    project_root: &self.project.root,
                },
            )
            .map_err(|err| failure(err.to_string()))?;
        Ok(instance.provision_service(Arc::clone(&self.executor)))
    }

    /// Where commands for `stage` run. Development falls back to the local
    /// machine; a cloud environment without a host is looked up through its
    /// provisioner.
    async fn resolve_target(
        &self,
        stage: Stage,
        environment: Option<&EnvironmentConfig>,
        provisioner: Option<&dyn ProvisionService>,
    ) -> Target {
        let configured = environment.map_or(Target::Unassigned, EnvironmentConfig::target);
        if configured != Target::Unassigned {
            return configured;
        }
        if stage == Stage::Dev {
            return Target::Local;
        }
        let (Some(environment), Some(service)) = (environment, provisioner) else {
            return Target::Unassigned;
        };
        let request = ProvisionRequest::from_environment(&self.project, environment);
        match service.survey(&request).await {
            Ok(survey) => survey.public_ip.map_or(Target::Unassigned, |address| {
                Target::Remote(RemoteHost {
                    host: address.to_string(),
                    port: environment.port,
                    user: environment.user.clone(),
                    key_secret: environment.ssh_key_secret.clone(),
                })
            }),
            Err(err) => {
                debug!(environment = %environment.name, error = %err, "cloud host lookup failed");
                Target::Unassigned
            }
        }
    }

    async fn detect(&self, target: &Target) -> Option<OsFamily> {
        if *target == Target::Unassigned {
            return None;
        }
        match detect_os(self.executor.as_ref(), target).await {
            Ok(family) => family,
            Err(err) => {
                debug!(%target, error = %err, "os detection failed");
                None
            }
        }
    }
}

/// Describes what `plugin` lacks, or `None` when it is fully configured.
fn missing_requirements(
    plugin: &PluginDescriptor,
    environment: Option<&EnvironmentConfig>,
    secrets: &dyn SecretStore,
) -> Option<String> {
    let requirements = plugin.requirements();
    let keys: Vec<&str> = requirements
        .config_keys
        .iter()
        .filter(|key| !environment.is_some_and(|config| config.has_setting(key)))
        .map(String::as_str)
        .collect();
    let names: Vec<&str> = requirements
        .secrets
        .iter()
        .filter(|name| !secrets.contains(name))
        .map(String::as_str)
        .collect();

    let mut parts = Vec::new();
    if !keys.is_empty() {
        parts.push(format!("set {} in the environment settings", keys.join(", ")));
    }
    if !names.is_empty() {
        parts.push(format!("provide the secrets {}", names.join(", ")));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("{}: {}", plugin.id(), parts.join(" and ")))
    }
}

/// Records a manual-only critical problem.
fn push_manual(
    findings: &mut Vec<Finding>,
    id: &str,
    stage: Stage,
    description: &str,
    manual: &str,
) {
    let built = Fix::builder(id, stage)
        .severity(Severity::Critical)
        .description(description)
        .probe(FnProbe::new(|_| Ok(true)))
        .manual_fix(manual)
        .build();
    match built {
        Ok(fix) => findings.push(Finding {
            fix,
            problem: true,
            error: None,
        }),
        Err(err) => warn!(id, error = %err, "could not record configuration finding"),
    }
}

async fn apply(finding: &Finding, context: &FixContext<'_>) -> FixOutcome {
    let fix = &finding.fix;
    let mut outcome = FixOutcome {
        id: fix.id().to_owned(),
        severity: fix.severity(),
        resolved: false,
        manual: None,
        error: None,
        fallback: None,
    };
    if finding.is_manual() {
        outcome.manual = fix.manual_fix().map(str::to_owned);
        return outcome;
    }
    match fix.apply(context).await {
        Ok(resolved) => outcome.resolved = resolved,
        Err(err) => {
            debug!(fix = fix.id(), error = %err, "remedy failed");
            outcome.error = Some(err.to_string());
        }
    }
    if !outcome.resolved {
        info!(fix = fix.id(), "remedy did not resolve the problem");
        outcome.fallback = fix.manual_fix().map(str::to_owned);
    }
    outcome
}
