//! Capability descriptors: a scan that detects a problem and an optional
//! remedy that repairs it.
//!
//! A [`Fix`] is static data owned by the plugin that declares it. Scans must
//! be free of side effects and both operations must be safe to repeat: running
//! a remedy on an already healthy target converges to "no problem".

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::environment::{EnvironmentConfig, ProjectContext};
use crate::exec::{ExecError, RemoteExecutor, Target};
use crate::platform::OsFamily;
use crate::provision::ProvisionService;
use crate::secrets::SecretStore;

pub mod applicability;
mod command;

pub use applicability::applicable;
pub use command::{
    CommandProbe, CommandRemedy, ConfirmedRemedy, FnProbe, PlatformProbe, PlatformRemedy,
    VersionProbe,
};

/// Deployment stage a fix belongs to.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Stage {
    /// The developer's machine.
    Dev,
    /// A long-lived staging host.
    Staging,
    /// Production cloud infrastructure.
    Prod,
}

impl Stage {
    /// Canonical short name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }

    /// Name of the environment table describing this stage.
    #[must_use]
    pub const fn environment_name(self) -> &'static str {
        match self {
            Self::Dev => "development",
            Self::Staging => "staging",
            Self::Prod => "production",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when a stage name is not recognised.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown stage '{name}': expected dev, staging or prod")]
pub struct UnknownStageError {
    /// Name that failed to parse.
    pub name: String,
}

impl FromStr for Stage {
    type Err = UnknownStageError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Self::Dev),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Prod),
            _ => Err(UnknownStageError {
                name: value.to_owned(),
            }),
        }
    }
}

/// How serious an unresolved problem is.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    /// Blocks deployment; reported with a non-zero outcome.
    Critical,
    /// Should be addressed.
    Warning,
    /// Informational.
    Info,
}

impl Severity {
    /// Every severity from most to least serious.
    pub const ALL: [Self; 3] = [Self::Critical, Self::Warning, Self::Info];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Operating systems a fix applies to.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum OsConstraint {
    /// Applies regardless of OS, including when the OS is unknown.
    #[default]
    Any,
    /// Applies only to the listed families.
    Only(BTreeSet<OsFamily>),
}

impl OsConstraint {
    /// Builds a constraint from a list of families. An empty list means
    /// [`OsConstraint::Any`].
    #[must_use]
    pub fn only(families: impl IntoIterator<Item = OsFamily>) -> Self {
        let set: BTreeSet<OsFamily> = families.into_iter().collect();
        if set.is_empty() {
            Self::Any
        } else {
            Self::Only(set)
        }
    }

    /// Returns `true` when a target with OS `os` satisfies the constraint.
    /// Constrained fixes never apply to targets whose OS is unknown.
    #[must_use]
    pub fn admits(&self, os: Option<OsFamily>) -> bool {
        match (self, os) {
            (Self::Any, _) => true,
            (Self::Only(_), None) => false,
            (Self::Only(families), Some(family)) => families.contains(&family),
        }
    }
}

/// Failure raised by a scan or remedy. The orchestrator absorbs these; they
/// never abort a batch.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The command could not be executed at all.
    #[error(transparent)]
    Exec(#[from] ExecError),
    /// A remediation command ran but exited unsuccessfully.
    #[error("`{command}` exited with status {status_text}: {stderr}")]
    CommandFailed {
        /// Command that failed.
        command: String,
        /// Exit status text.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Something the check needs is not available in this context.
    #[error("{0}")]
    Unavailable(String),
    /// The provisioner reported a failure.
    #[error("provisioning failed: {0}")]
    Provision(String),
}

/// Future returned by scans and remedies.
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, CheckError>> + Send + 'a>>;

/// Everything a scan or remedy may consult.
#[derive(Clone, Copy)]
pub struct FixContext<'a> {
    /// Stage being reconciled.
    pub stage: Stage,
    /// Detected or configured target OS.
    pub os: Option<OsFamily>,
    /// Where commands run.
    pub target: &'a Target,
    /// Environment configuration for the stage, when one exists.
    pub environment: Option<&'a EnvironmentConfig>,
    /// Command executor.
    pub executor: &'a dyn RemoteExecutor,
    /// Secret lookup.
    pub secrets: &'a dyn SecretStore,
    /// Cloud provisioner, for stages backed by one.
    pub provisioner: Option<&'a dyn ProvisionService>,
    /// Project under management.
    pub project: &'a ProjectContext,
}

impl fmt::Debug for FixContext<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FixContext")
            .field("stage", &self.stage)
            .field("os", &self.os)
            .field("target", &self.target)
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

/// Side-effect free detection of a problem.
pub trait Probe: Send + Sync {
    /// Returns `Ok(true)` when the problem is present.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError`] when the probe cannot reach a verdict.
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a>;
}

/// Idempotent repair of a problem.
pub trait Remedy: Send + Sync {
    /// Returns `Ok(true)` when the problem was repaired.
    ///
    /// # Errors
    ///
    /// Returns [`CheckError`] when the remedy fails.
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a>;
}

/// Errors raised while constructing a [`Fix`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FixError {
    /// Raised when the id is blank.
    #[error("fix id must not be empty")]
    MissingId,
    /// Raised when no scan was supplied.
    #[error("fix {id} has no scan")]
    MissingProbe {
        /// Fix identifier.
        id: String,
    },
    /// Raised when a fix has neither a remedy nor manual instructions.
    #[error("fix {id} has no remedy and no manual fix text")]
    MissingManualFix {
        /// Fix identifier.
        id: String,
    },
}

/// A declared capability: scan, optional remedy, manual fallback.
#[derive(Clone)]
pub struct Fix {
    id: String,
    stage: Stage,
    os: OsConstraint,
    severity: Severity,
    description: String,
    probe: Arc<dyn Probe>,
    remedy: Option<Arc<dyn Remedy>>,
    manual_fix: Option<String>,
}

impl fmt::Debug for Fix {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Fix")
            .field("id", &self.id)
            .field("stage", &self.stage)
            .field("os", &self.os)
            .field("severity", &self.severity)
            .field("has_remedy", &self.remedy.is_some())
            .finish_non_exhaustive()
    }
}

impl Fix {
    /// Starts a builder for a fix with the given id and stage.
    #[must_use]
    pub fn builder(id: impl Into<String>, stage: Stage) -> FixBuilder {
        FixBuilder {
            id: id.into(),
            stage,
            os: OsConstraint::Any,
            severity: Severity::Warning,
            description: String::new(),
            probe: None,
            remedy: None,
            manual_fix: None,
            confirm: false,
        }
    }

    /// Globally unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stage the fix belongs to.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// OS constraint.
    #[must_use]
    pub const fn os(&self) -> &OsConstraint {
        &self.os
    }

    /// Severity of an unresolved problem.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.severity
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Manual instructions, if any.
    #[must_use]
    pub fn manual_fix(&self) -> Option<&str> {
        self.manual_fix.as_deref()
    }

    /// Returns `true` when an automated remedy exists.
    #[must_use]
    pub const fn has_remedy(&self) -> bool {
        self.remedy.is_some()
    }

    /// Returns `true` when the fix applies to `stage` on a target with `os`.
    #[must_use]
    pub fn applies_to(&self, stage: Stage, os: Option<OsFamily>) -> bool {
        self.stage == stage && self.os.admits(os)
    }

    /// Runs the scan.
    ///
    /// # Errors
    ///
    /// Propagates the probe's [`CheckError`].
    pub async fn scan(&self, context: &FixContext<'_>) -> Result<bool, CheckError> {
        self.probe.scan(context).await
    }

    /// Runs the remedy. Fixes without one report
    /// [`CheckError::Unavailable`].
    ///
    /// # Errors
    ///
    /// Propagates the remedy's [`CheckError`].
    pub async fn apply(&self, context: &FixContext<'_>) -> Result<bool, CheckError> {
        match &self.remedy {
            Some(remedy) => remedy.apply(context).await,
            None => Err(CheckError::Unavailable(format!(
                "{} has no automated remedy",
                self.id
            ))),
        }
    }
}

/// Builder for [`Fix`] that enforces the remedy/manual-text invariant.
pub struct FixBuilder {
    id: String,
    stage: Stage,
    os: OsConstraint,
    severity: Severity,
    description: String,
    probe: Option<Arc<dyn Probe>>,
    remedy: Option<Arc<dyn Remedy>>,
    manual_fix: Option<String>,
    confirm: bool,
}

impl FixBuilder {
    /// Restricts the fix to OS families.
    #[must_use]
    pub fn os(mut self, constraint: OsConstraint) -> Self {
        self.os = constraint;
        self
    }

    /// Sets the severity (defaults to warning).
    #[must_use]
    pub const fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, value: impl Into<String>) -> Self {
        self.description = value.into();
        self
    }

    /// Sets the scan.
    #[must_use]
    pub fn probe(mut self, probe: impl Probe + 'static) -> Self {
        self.probe = Some(Arc::new(probe));
        self
    }

    /// Sets the remedy.
    #[must_use]
    pub fn remedy(mut self, remedy: impl Remedy + 'static) -> Self {
        self.remedy = Some(Arc::new(remedy));
        self
    }

    /// Re-runs the scan after a successful remedy and reports the repair
    /// only when the scan no longer finds the problem.
    #[must_use]
    pub const fn confirm_with_scan(mut self) -> Self {
        self.confirm = true;
        self
    }

    /// Sets manual instructions.
    #[must_use]
    pub fn manual_fix(mut self, value: impl Into<String>) -> Self {
        let text: String = value.into();
        self.manual_fix = (!text.trim().is_empty()).then_some(text);
        self
    }

    /// Validates and builds the fix.
    ///
    /// # Errors
    ///
    /// Returns [`FixError`] when the id is blank, the scan is missing, or
    /// neither a remedy nor manual text is present.
    pub fn build(self) -> Result<Fix, FixError> {
        let id = self.id.trim().to_owned();
        if id.is_empty() {
            return Err(FixError::MissingId);
        }
        let Some(probe) = self.probe else {
            return Err(FixError::MissingProbe { id });
        };
        if self.remedy.is_none() && self.manual_fix.is_none() {
            return Err(FixError::MissingManualFix { id });
        }
        let remedy = match self.remedy {
            Some(inner) if self.confirm => {
                let confirmed: Arc<dyn Remedy> =
                    Arc::new(ConfirmedRemedy::new(inner, Arc::clone(&probe)));
                Some(confirmed)
            }
            other => other,
        };
        Ok(Fix {
            id,
            stage: self.stage,
            os: self.os,
            severity: self.severity,
            description: self.description,
            probe,
            remedy,
            manual_fix: self.manual_fix,
        })
    }
}

#[cfg(test)]
mod tests;
