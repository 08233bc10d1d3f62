//! SSH client settings loaded via `ortho-config`.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::ConfigError;

/// SSH client settings used for every remote command.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DRIFTFIX_SSH",
    discovery(
        app_name = "driftfix",
        env_var = "DRIFTFIX_CONFIG_PATH",
        config_file_name = "driftfix.toml",
        dotfile_name = ".driftfix.toml",
        project_file_name = "driftfix.toml"
    )
)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Whether to force batch mode so SSH never prompts for passwords.
    #[ortho_config(default = true)]
    pub batch_mode: bool,
    /// Whether to enforce host key checking. Freshly provisioned hosts have
    /// unknown keys, so this defaults to off.
    #[ortho_config(default = false)]
    pub strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub known_hosts_file: String,
    /// Seconds SSH waits for the TCP handshake before giving up.
    #[ortho_config(default = 10)]
    pub connect_timeout_secs: u64,
}

impl SshConfig {
    /// Loads SSH settings from defaults, configuration files and environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("driftfix")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures the SSH binary is named.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when `ssh_bin` is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh_bin.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing ssh binary: set DRIFTFIX_SSH_SSH_BIN or add ssh_bin to driftfix.toml",
            )));
        }
        Ok(())
    }

    /// Options shared by every SSH invocation, excluding the identity file.
    pub(crate) fn common_options(&self, port: u16) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(port.to_string())];

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args.push(OsString::from("-o"));
        args.push(OsString::from(format!(
            "ConnectTimeout={}",
            self.connect_timeout_secs
        )));

        args
    }
}
