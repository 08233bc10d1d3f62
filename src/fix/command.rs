//! Reusable scans and remedies built on shell commands.

use std::fmt;
use std::sync::Arc;

use super::{CheckError, CheckFuture, FixContext, Probe, Remedy};
use crate::exec::CommandOutput;
use crate::platform::{
    Dependency, OsFamily, PlatformCommand, ToolVersion, parse_service_state, parse_version, resolve,
};

async fn run(context: &FixContext<'_>, command: &str) -> Result<CommandOutput, CheckError> {
    Ok(context.executor.execute(context.target, command).await?)
}

fn require_success(command: &str, output: &CommandOutput) -> Result<(), CheckError> {
    if output.is_success() {
        Ok(())
    } else {
        Err(CheckError::CommandFailed {
            command: command.to_owned(),
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }
}

fn require_os(context: &FixContext<'_>) -> Result<OsFamily, CheckError> {
    context.os.ok_or_else(|| {
        CheckError::Unavailable(format!(
            "operating system of {} is unknown",
            context.target
        ))
    })
}

/// Reports a problem when a command exits unsuccessfully.
#[derive(Clone, Debug)]
pub struct CommandProbe {
    command: String,
}

impl CommandProbe {
    /// Creates a probe that runs `command` on the target.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl Probe for CommandProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let output = run(context, &self.command).await?;
            Ok(!output.is_success())
        })
    }
}

/// Runs an install command, then an optional verification command.
#[derive(Clone, Debug)]
pub struct CommandRemedy {
    install: String,
    verify: Option<String>,
}

impl CommandRemedy {
    /// Creates a remedy that runs `install` and, when given, `verify`.
    #[must_use]
    pub fn new(install: impl Into<String>, verify: Option<String>) -> Self {
        Self {
            install: install.into(),
            verify,
        }
    }
}

impl Remedy for CommandRemedy {
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let output = run(context, &self.install).await?;
            require_success(&self.install, &output)?;
            match &self.verify {
                Some(verify) => Ok(run(context, verify).await?.is_success()),
                None => Ok(true),
            }
        })
    }
}

/// Checks a logical dependency using the target OS's native command.
#[derive(Clone, Copy, Debug)]
pub struct PlatformProbe {
    dependency: Dependency,
}

impl PlatformProbe {
    /// Creates a probe for `dependency`.
    #[must_use]
    pub const fn new(dependency: Dependency) -> Self {
        Self { dependency }
    }
}

async fn dependency_satisfied(
    context: &FixContext<'_>,
    dependency: Dependency,
    command: &PlatformCommand,
    os: OsFamily,
) -> Result<bool, CheckError> {
    let output = run(context, &command.check).await?;
    if dependency == Dependency::ContainerDaemon && os.is_linux() {
        return Ok(parse_service_state(&output.stdout).is_running());
    }
    Ok(output.is_success())
}

impl Probe for PlatformProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let os = require_os(context)?;
            let command = resolve(self.dependency, os);
            let satisfied = dependency_satisfied(context, self.dependency, &command, os).await?;
            Ok(!satisfied)
        })
    }
}

/// Installs and starts a logical dependency, then re-runs its check.
#[derive(Clone, Copy, Debug)]
pub struct PlatformRemedy {
    dependency: Dependency,
}

impl PlatformRemedy {
    /// Creates a remedy for `dependency`.
    #[must_use]
    pub const fn new(dependency: Dependency) -> Self {
        Self { dependency }
    }
}

impl Remedy for PlatformRemedy {
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let os = require_os(context)?;
            let command = resolve(self.dependency, os);
            let Some(install) = command.install.as_deref() else {
                return Err(CheckError::Unavailable(command.manual_fix.clone()));
            };
            let output = run(context, install).await?;
            require_success(install, &output)?;
            if let Some(start) = command.start.as_deref() {
                let started = run(context, start).await?;
                require_success(start, &started)?;
            }
            dependency_satisfied(context, self.dependency, &command, os).await
        })
    }
}

/// Runs a remedy, then trusts only the fix's own scan to say whether the
/// problem is gone.
#[derive(Clone)]
pub struct ConfirmedRemedy {
    remedy: Arc<dyn Remedy>,
    probe: Arc<dyn Probe>,
}

impl ConfirmedRemedy {
    /// Wraps `remedy`, confirming its success with `probe`.
    #[must_use]
    pub fn new(remedy: Arc<dyn Remedy>, probe: Arc<dyn Probe>) -> Self {
        Self { remedy, probe }
    }
}

impl fmt::Debug for ConfirmedRemedy {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("ConfirmedRemedy")
    }
}

impl Remedy for ConfirmedRemedy {
    fn apply<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            if !self.remedy.apply(context).await? {
                return Ok(false);
            }
            let problem = self.probe.scan(context).await?;
            Ok(!problem)
        })
    }
}

/// Reports a problem when a tool is missing or older than a minimum version.
#[derive(Clone, Debug)]
pub struct VersionProbe {
    command: String,
    minimum: ToolVersion,
}

impl VersionProbe {
    /// Creates a probe that runs `command` (typically `<tool> --version`) and
    /// compares the reported version against `minimum`.
    #[must_use]
    pub fn new(command: impl Into<String>, minimum: ToolVersion) -> Self {
        Self {
            command: command.into(),
            minimum,
        }
    }
}

impl Probe for VersionProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        Box::pin(async move {
            let output = run(context, &self.command).await?;
            if !output.is_success() {
                return Ok(true);
            }
            let reported = parse_version(&output.stdout).or_else(|| parse_version(&output.stderr));
            Ok(reported.is_none_or(|version| version < self.minimum))
        })
    }
}

type ProbeFn = dyn Fn(&FixContext<'_>) -> Result<bool, CheckError> + Send + Sync;

/// Synchronous probe evaluated against configuration only.
pub struct FnProbe {
    check: Box<ProbeFn>,
}

impl FnProbe {
    /// Wraps a closure returning `Ok(true)` when the problem is present.
    #[must_use]
    pub fn new(
        check: impl Fn(&FixContext<'_>) -> Result<bool, CheckError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            check: Box::new(check),
        }
    }
}

impl fmt::Debug for FnProbe {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("FnProbe")
    }
}

impl Probe for FnProbe {
    fn scan<'a>(&'a self, context: &'a FixContext<'_>) -> CheckFuture<'a> {
        let verdict = (self.check)(context);
        Box::pin(async move { verdict })
    }
}
