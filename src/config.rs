//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provision::ReadinessPolicy;
use crate::secrets::SecretStore;

/// Engine-wide settings: scan concurrency, timeouts and where to find
/// environments and external plugins.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DRIFTFIX",
    discovery(
        app_name = "driftfix",
        env_var = "DRIFTFIX_CONFIG_PATH",
        config_file_name = "driftfix.toml",
        dotfile_name = ".driftfix.toml",
        project_file_name = "driftfix.toml"
    )
)]
pub struct EngineConfig {
    /// Maximum number of scans in flight at once.
    #[ortho_config(default = 4)]
    pub scan_concurrency: usize,
    /// Seconds a single local or remote command may run.
    #[ortho_config(default = 60)]
    pub command_timeout_secs: u64,
    /// TOML file holding `[environments.<name>]` tables.
    #[ortho_config(default = "driftfix.environments.toml".to_owned())]
    pub environments_file: String,
    /// Directory searched for external plugin packages.
    #[ortho_config(default = ".driftfix/plugins".to_owned())]
    pub plugin_dir: String,
    /// Comma-separated external plugin packages to load.
    #[ortho_config(default = String::new())]
    pub external_plugins: String,
    /// Comma-separated packages allowed to load without a trust warning.
    #[ortho_config(default = String::new())]
    pub trusted_plugins: String,
    /// Project name used in cloud tags; defaults to the root directory name.
    pub project_name: Option<String>,
    /// Project root; defaults to the working directory.
    pub project_root: Option<String>,
    /// Prefix prepended to secret names when reading them from the
    /// environment.
    #[ortho_config(default = "DRIFTFIX_SECRET_".to_owned())]
    pub secret_prefix: String,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

impl EngineConfig {
    /// Loads engine settings from defaults, configuration files and
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("driftfix")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// External plugin packages, in the order given.
    #[must_use]
    pub fn external_plugin_names(&self) -> Vec<String> {
        split_list(&self.external_plugins)
    }

    /// Packages the operator trusts.
    #[must_use]
    pub fn trusted_plugin_names(&self) -> Vec<String> {
        split_list(&self.trusted_plugins)
    }

    /// Per-command timeout.
    #[must_use]
    pub const fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Resolves the project root, falling back to `current`.
    #[must_use]
    pub fn project_root_or(&self, current: Utf8PathBuf) -> Utf8PathBuf {
        self.project_root
            .as_deref()
            .map_or(current, Utf8PathBuf::from)
    }

    /// Ensures the numeric limits are usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a limit is zero or a path
    /// is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_concurrency == 0 {
            return Err(ConfigError::MissingField(String::from(
                "scan concurrency must be at least 1: set DRIFTFIX_SCAN_CONCURRENCY \
                 or scan_concurrency in driftfix.toml",
            )));
        }
        if self.command_timeout_secs == 0 {
            return Err(ConfigError::MissingField(String::from(
                "command timeout must be at least 1 second: set DRIFTFIX_COMMAND_TIMEOUT_SECS \
                 or command_timeout_secs in driftfix.toml",
            )));
        }
        if self.environments_file.trim().is_empty() {
            return Err(ConfigError::MissingField(String::from(
                "missing environments file: set DRIFTFIX_ENVIRONMENTS_FILE \
                 or environments_file in driftfix.toml",
            )));
        }
        Ok(())
    }
}

/// Scaleway specific configuration derived from environment variables,
/// configuration files and the environment's `scaleway` settings table.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "SCW")]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application.
    pub access_key: Option<String>,
    /// Secret key used for authentication. Required before provisioning.
    #[ortho_config(default = String::new())]
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    #[ortho_config(default = String::new())]
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Region for regional products (VPC, databases, registry). Defaults to
    /// `fr-par`.
    #[ortho_config(default = "fr-par".to_owned())]
    pub default_region: String,
    /// Commercial type for new instances.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Human-friendly image label (for example `Ubuntu 24.04 Noble Numbat`).
    #[ortho_config(default = "Ubuntu 24.04 Noble Numbat".to_owned())]
    pub default_image: String,
    /// CPU architecture used to select the correct image variant.
    #[ortho_config(default = "x86_64".to_owned())]
    pub default_architecture: String,
    /// Path to the `scw` executable.
    #[ortho_config(default = "scw".to_owned())]
    pub scw_bin: String,
    /// Seconds a single `scw` invocation may run.
    #[ortho_config(default = 120)]
    pub command_timeout_secs: u64,
    /// Total seconds allowed for a new instance to become reachable.
    #[ortho_config(default = 600)]
    pub readiness_timeout_secs: u64,
    /// Seconds between readiness attempts.
    #[ortho_config(default = 5)]
    pub readiness_poll_secs: u64,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn setting(config: &serde_json::Value, key: &str) -> Option<String> {
    config
        .get("scaleway")
        .and_then(|table| table.get(key))
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add scaleway.{} to the environment settings",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("driftfix")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Overlays an environment's `scaleway` settings table and the
    /// `scaleway.secret_key` secret on top of the loaded values.
    #[must_use]
    pub fn with_environment(
        mut self,
        config: &serde_json::Value,
        secrets: &dyn SecretStore,
    ) -> Self {
        if let Some(value) = setting(config, "project_id") {
            self.default_project_id = value;
        }
        if let Some(value) = setting(config, "organization_id") {
            self.default_organization_id = Some(value);
        }
        if let Some(value) = setting(config, "zone") {
            self.default_zone = value;
        }
        if let Some(value) = setting(config, "region") {
            self.default_region = value;
        }
        if let Some(value) = setting(config, "instance_type") {
            self.default_instance_type = value;
        }
        if let Some(value) = setting(config, "image") {
            self.default_image = value;
        }
        if let Some(value) = setting(config, "architecture") {
            self.default_architecture = value;
        }
        if let Some(secret) = secrets.get("scaleway.secret_key") {
            let exposed = secret.expose().trim();
            if !exposed.is_empty() {
                self.secret_key = exposed.to_owned();
            }
        }
        self
    }

    /// Readiness budget for freshly created instances.
    #[must_use]
    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            timeout: Duration::from_secs(self.readiness_timeout_secs),
            poll_interval: Duration::from_secs(self.readiness_poll_secs.max(1)),
            ..ReadinessPolicy::default()
        }
    }

    /// Performs semantic validation on required fields. Error messages
    /// name the environment variable or setting that supplies the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            (
                &self.secret_key,
                FieldMetadata::new("Scaleway API secret key", "SCW_SECRET_KEY", "secret_key"),
            ),
            (
                &self.default_project_id,
                FieldMetadata::new("Scaleway project ID", "SCW_DEFAULT_PROJECT_ID", "project_id"),
            ),
            (
                &self.default_image,
                FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "image"),
            ),
            (
                &self.default_instance_type,
                FieldMetadata::new(
                    "instance type",
                    "SCW_DEFAULT_INSTANCE_TYPE",
                    "instance_type",
                ),
            ),
            (
                &self.default_zone,
                FieldMetadata::new("availability zone", "SCW_DEFAULT_ZONE", "zone"),
            ),
            (
                &self.default_region,
                FieldMetadata::new("region", "SCW_DEFAULT_REGION", "region"),
            ),
            (
                &self.default_architecture,
                FieldMetadata::new(
                    "CPU architecture",
                    "SCW_DEFAULT_ARCHITECTURE",
                    "architecture",
                ),
            ),
            (
                &self.scw_bin,
                FieldMetadata::new("scw binary", "SCW_SCW_BIN", "scw_bin"),
            ),
        ];
        for (value, metadata) in &fields {
            Self::require_field(value, metadata)?;
        }
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for configuration overlays and validation.

    use rstest::{fixture, rstest};
    use serde_json::json;

    use super::*;
    use crate::secrets::MemorySecretStore;

    #[fixture]
    fn base() -> ScalewayConfig {
        ScalewayConfig {
            access_key: None,
            secret_key: String::new(),
            default_organization_id: None,
            default_project_id: String::new(),
            default_zone: String::from("fr-par-1"),
            default_region: String::from("fr-par"),
            default_instance_type: String::from("DEV1-S"),
            default_image: String::from("Ubuntu 24.04 Noble Numbat"),
            default_architecture: String::from("x86_64"),
            scw_bin: String::from("scw"),
            command_timeout_secs: 120,
            readiness_timeout_secs: 600,
            readiness_poll_secs: 5,
        }
    }

    #[rstest]
    fn environment_settings_and_secret_overlay_defaults(base: ScalewayConfig) {
        let settings = json!({
            "scaleway": {
                "project_id": "proj-1",
                "zone": "nl-ams-1",
                "region": "nl-ams",
                "instance_type": " ",
            }
        });
        let secrets = MemorySecretStore::new().with("scaleway.secret_key", "scw-secret");

        let merged = base.with_environment(&settings, &secrets);

        assert_eq!(merged.default_project_id, "proj-1");
        assert_eq!(merged.default_zone, "nl-ams-1");
        assert_eq!(merged.default_region, "nl-ams");
        assert_eq!(merged.default_instance_type, "DEV1-S");
        assert_eq!(merged.secret_key, "scw-secret");
        assert!(merged.validate().is_ok());
    }

    #[rstest]
    fn missing_secret_names_the_variable(base: ScalewayConfig) {
        let mut config = base;
        config.default_project_id = String::from("proj-1");

        let err = config.validate().expect_err("secret key is blank");

        let ConfigError::MissingField(message) = err else {
            panic!("unexpected error variant");
        };
        assert!(message.contains("SCW_SECRET_KEY"));
    }

    #[rstest]
    fn readiness_policy_uses_configured_budget(base: ScalewayConfig) {
        let mut config = base;
        config.readiness_timeout_secs = 30;
        config.readiness_poll_secs = 0;

        let policy = config.readiness_policy();

        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert_eq!(policy.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn plugin_lists_split_on_commas() {
        assert_eq!(
            split_list(" redis, ,homegrown ,"),
            vec![String::from("redis"), String::from("homegrown")]
        );
        assert!(split_list("").is_empty());
    }
}
