//! Per-environment configuration consumed read-only by the engine.
//!
//! Environments are described in a TOML document of `[environments.<name>]`
//! tables:
//!
//! ```toml
//! [environments.staging]
//! host = "203.0.113.10"
//! user = "deploy"
//! os = "ubuntu"
//! ssh_key_secret = "staging.ssh_key"
//!
//! [environments.production]
//! provider = "scaleway"
//! os = "ubuntu"
//!
//! [environments.production.settings.scaleway]
//! zone = "fr-par-1"
//! ```

use std::collections::BTreeMap;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::Deserialize;
use thiserror::Error;

use crate::exec::{RemoteHost, Target};
use crate::platform::OsFamily;

const fn default_port() -> u16 {
    22
}

fn default_user() -> String {
    String::from("root")
}

/// Connection and provider details for one environment.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EnvironmentConfig {
    /// Environment name, filled in from the table key.
    #[serde(skip)]
    pub name: String,
    /// Hostname or IP address; absent until the host exists.
    pub host: Option<String>,
    /// SSH login user.
    #[serde(default = "default_user")]
    pub user: String,
    /// SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Operating system family of the host.
    pub os: Option<OsFamily>,
    /// Cloud provider identifier, for example `scaleway`.
    pub provider: Option<String>,
    /// Name of the secret holding the SSH private key.
    pub ssh_key_secret: Option<String>,
    /// Free-form provider and plugin settings.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl EnvironmentConfig {
    /// Creates an environment with only a name and default connection values.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
            user: default_user(),
            port: default_port(),
            os: None,
            provider: None,
            ssh_key_secret: None,
            settings: BTreeMap::new(),
        }
    }

    /// Where commands for this environment run: the configured host, or
    /// [`Target::Unassigned`] when none is known yet.
    #[must_use]
    pub fn target(&self) -> Target {
        self.host
            .as_deref()
            .filter(|host| !host.trim().is_empty())
            .map_or(Target::Unassigned, |host| {
                Target::Remote(RemoteHost {
                    host: host.to_owned(),
                    port: self.port,
                    user: self.user.clone(),
                    key_secret: self.ssh_key_secret.clone(),
                })
            })
    }

    /// Looks up a dotted key such as `scaleway.zone` in [`Self::settings`].
    ///
    /// Top-level connection fields (`host`, `user`, `port`, `os`, `provider`)
    /// resolve too so plugins can declare them as required keys.
    #[must_use]
    pub fn setting(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "host" => return self.host.clone().map(serde_json::Value::String),
            "user" => return Some(serde_json::Value::String(self.user.clone())),
            "port" => return Some(serde_json::Value::from(self.port)),
            "os" => return self.os.map(|os| serde_json::Value::String(os.to_string())),
            "provider" => return self.provider.clone().map(serde_json::Value::String),
            _ => {}
        }
        let mut parts = key.split('.');
        let first = parts.next()?;
        let mut current = self.settings.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current.clone())
    }

    /// Returns a setting as a string when it is a non-empty scalar.
    #[must_use]
    pub fn setting_str(&self, key: &str) -> Option<String> {
        match self.setting(key)? {
            serde_json::Value::String(value) if !value.trim().is_empty() => Some(value),
            serde_json::Value::Number(value) => Some(value.to_string()),
            serde_json::Value::Bool(value) => Some(value.to_string()),
            _ => None,
        }
    }

    /// Returns `true` when `key` resolves to a present, non-empty value.
    #[must_use]
    pub fn has_setting(&self, key: &str) -> bool {
        match self.setting(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(value)) => !value.trim().is_empty(),
            Some(_) => true,
        }
    }
}

/// Read-only lookup of environments by name.
pub trait EnvironmentSource: Send + Sync {
    /// Returns the environment called `name`.
    fn environment(&self, name: &str) -> Option<&EnvironmentConfig>;

    /// Names of all known environments.
    fn names(&self) -> Vec<String>;
}

/// Errors raised while reading an environment file.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    /// Raised when the file cannot be read.
    #[error("failed to read {path}: {message}")]
    Read {
        /// File that failed to load.
        path: Utf8PathBuf,
        /// Underlying I/O error text.
        message: String,
    },
    /// Raised when the document is not valid TOML or has the wrong shape.
    #[error("failed to parse environments: {0}")]
    Parse(String),
}

#[derive(Debug, Default, Deserialize)]
struct EnvironmentDocument {
    #[serde(default)]
    environments: BTreeMap<String, EnvironmentConfig>,
}

/// Environments parsed from a TOML document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvironmentFile {
    environments: BTreeMap<String, EnvironmentConfig>,
}

impl EnvironmentFile {
    /// Parses `[environments.<name>]` tables from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError::Parse`] when the document is malformed.
    pub fn parse(content: &str) -> Result<Self, EnvironmentError> {
        let document: EnvironmentDocument = ortho_config::toml::from_str(content)
            .map_err(|err| EnvironmentError::Parse(err.to_string()))?;
        let environments = document
            .environments
            .into_iter()
            .map(|(name, mut config)| {
                config.name.clone_from(&name);
                (name, config)
            })
            .collect();
        Ok(Self { environments })
    }

    /// Reads and parses the environment file at `path`. A missing file yields
    /// an empty set of environments.
    ///
    /// # Errors
    ///
    /// Returns [`EnvironmentError`] when the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &Utf8Path) -> Result<Self, EnvironmentError> {
        let read_error = |message: String| EnvironmentError::Read {
            path: path.to_owned(),
            message,
        };
        let parent = match path.parent() {
            Some(dir) if !dir.as_str().is_empty() => dir,
            _ => Utf8Path::new("."),
        };
        let Some(file_name) = path.file_name() else {
            return Err(read_error(String::from("path has no file name")));
        };
        let dir = match Dir::open_ambient_dir(parent, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(read_error(err.to_string())),
        };
        if !dir
            .try_exists(file_name)
            .map_err(|err| read_error(err.to_string()))?
        {
            return Ok(Self::default());
        }
        let content = dir
            .read_to_string(file_name)
            .map_err(|err| read_error(err.to_string()))?;
        Self::parse(&content)
    }

    /// Adds or replaces an environment.
    pub fn insert(&mut self, config: EnvironmentConfig) {
        self.environments.insert(config.name.clone(), config);
    }
}

impl EnvironmentSource for EnvironmentFile {
    fn environment(&self, name: &str) -> Option<&EnvironmentConfig> {
        self.environments.get(name)
    }

    fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }
}

/// Identity and location of the project under management.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProjectContext {
    /// Project name used for cloud tags and resource names.
    pub name: String,
    /// Project root directory on the local machine.
    pub root: Utf8PathBuf,
}

impl ProjectContext {
    /// Creates a project context.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }
}
