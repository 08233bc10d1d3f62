//! Command execution against local and remote targets.
//!
//! The engine only depends on [`RemoteExecutor`]. [`ShellExecutor`] is the
//! production implementation: local commands run through the platform shell
//! and remote commands through the system `ssh` client. Key material is pulled
//! from the secret store and written to a restricted temporary file for the
//! duration of a single call.

use std::ffi::OsString;
use std::fmt;
use std::sync::Arc;

use crate::secrets::{KeyFile, SecretStore};

mod config;
mod types;

pub use config::SshConfig;
pub use types::{
    CommandOutput, CommandRunner, DEFAULT_COMMAND_TIMEOUT, ExecError, ExecFuture,
    ProcessCommandRunner,
};

/// Connection details for a remote host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteHost {
    /// Hostname or IP address.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Name of the secret holding the private key, when not using the SSH
    /// agent or default identities.
    pub key_secret: Option<String>,
}

/// Where a command runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Target {
    /// The machine running the engine.
    Local,
    /// A host reached over SSH.
    Remote(RemoteHost),
    /// A stage whose host is not known yet (for example, a cloud environment
    /// that has not been provisioned).
    Unassigned,
}

impl fmt::Display for Target {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => formatter.write_str("local"),
            Self::Remote(host) => write!(formatter, "{}@{}:{}", host.user, host.host, host.port),
            Self::Unassigned => formatter.write_str("unassigned"),
        }
    }
}

/// Runs a command string against a target.
pub trait RemoteExecutor: Send + Sync {
    /// Executes `command` on `target` and returns the captured output. A
    /// non-zero exit status is not an error; callers inspect the output.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError`] when the command cannot be started, times out,
    /// or the target has no host.
    fn execute<'a>(&'a self, target: &'a Target, command: &'a str)
    -> ExecFuture<'a, CommandOutput>;
}

/// Executor backed by the platform shell and the system `ssh` client.
#[derive(Clone)]
pub struct ShellExecutor<R: CommandRunner> {
    runner: R,
    ssh: SshConfig,
    secrets: Arc<dyn SecretStore>,
}

impl<R: CommandRunner> fmt::Debug for ShellExecutor<R> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ShellExecutor")
            .field("ssh", &self.ssh)
            .finish_non_exhaustive()
    }
}

impl<R: CommandRunner> ShellExecutor<R> {
    /// Creates an executor from a runner, SSH settings and a secret store.
    #[must_use]
    pub fn new(runner: R, ssh: SshConfig, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            runner,
            ssh,
            secrets,
        }
    }

    fn local_invocation(command: &str) -> (&'static str, Vec<OsString>) {
        if cfg!(windows) {
            ("cmd", vec![OsString::from("/C"), OsString::from(command)])
        } else {
            ("sh", vec![OsString::from("-c"), OsString::from(command)])
        }
    }

    fn ssh_args(&self, host: &RemoteHost, key: Option<&KeyFile>, command: &str) -> Vec<OsString> {
        let mut args = self.ssh.common_options(host.port);
        if let Some(key_file) = key {
            args.push(OsString::from("-i"));
            args.push(key_file.path().as_os_str().to_owned());
        }
        args.push(OsString::from(format!("{}@{}", host.user, host.host)));
        args.push(OsString::from(command));
        args
    }

    fn materialise_key(&self, host: &RemoteHost) -> Result<Option<KeyFile>, ExecError> {
        let Some(name) = host.key_secret.as_deref() else {
            return Ok(None);
        };
        let secret = self
            .secrets
            .get(name)
            .ok_or_else(|| ExecError::MissingSecret {
                name: name.to_owned(),
            })?;
        KeyFile::materialise(&secret).map(Some)
    }
}

impl<R: CommandRunner> RemoteExecutor for ShellExecutor<R> {
    fn execute<'a>(
        &'a self,
        target: &'a Target,
        command: &'a str,
    ) -> ExecFuture<'a, CommandOutput> {
        Box::pin(async move {
            match target {
                Target::Local => {
                    let (program, args) = Self::local_invocation(command);
                    self.runner.run(program, &args).await
                }
                Target::Remote(host) => {
                    // The key file is removed when `key` drops after the call.
                    let key = self.materialise_key(host)?;
                    let args = self.ssh_args(host, key.as_ref(), command);
                    self.runner.run(&self.ssh.ssh_bin, &args).await
                }
                Target::Unassigned => Err(ExecError::UnassignedTarget),
            }
        })
    }
}

#[cfg(test)]
mod tests;
