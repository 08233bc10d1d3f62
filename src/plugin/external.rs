//! External plugin packages described by `plugin.toml` manifests.
//!
//! A manifest declares the plugin's identity and a list of command-based
//! fixes:
//!
//! ```toml
//! api_version = 1
//! id = "redis"
//! category = "addon"
//! version = "0.3.0"
//! requires_config = ["redis.url"]
//!
//! [load]
//! stages = ["dev"]
//!
//! [[fixes]]
//! id = "redis.cli"
//! stage = "dev"
//! os = ["ubuntu", "debian"]
//! check = "redis-cli --version"
//! install = "sudo apt-get install -y redis-tools"
//! manual_fix = "Install redis-tools"
//! ```

use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs_utf8::Dir;
use serde::Deserialize;
use thiserror::Error;

use super::builtin::BuiltinInstance;
use super::registry::RegistryError;
use super::{
    Constructor, ConstructorKind, InstanceResult, LoadContext, PluginCategory, PluginDescriptor,
    PluginInstance, PluginSource,
};
use crate::fix::{CommandProbe, CommandRemedy, Fix, OsConstraint, Severity, Stage};
use crate::platform::OsFamily;

/// Packages published alongside driftfix that load without a trust warning.
pub const APPROVED_PLUGINS: &[&str] = &["postgres", "redis", "sentry"];

/// Name of the manifest file inside a package directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Errors raised while loading one external package.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ManifestError {
    /// Raised when the package name could escape the plugin directory.
    #[error("invalid package name '{package}'")]
    InvalidName {
        /// Offending name.
        package: String,
    },
    /// Raised when no manifest exists for the package.
    #[error("no {MANIFEST_FILE} for package '{package}' under {root}")]
    NotFound {
        /// Package name.
        package: String,
        /// Directory searched.
        root: Utf8PathBuf,
    },
    /// Raised when the manifest cannot be read.
    #[error("failed to read manifest for '{package}': {message}")]
    Read {
        /// Package name.
        package: String,
        /// I/O error text.
        message: String,
    },
    /// Raised when the manifest is not valid TOML or has the wrong shape.
    #[error("failed to parse manifest for '{package}': {message}")]
    Parse {
        /// Package name.
        package: String,
        /// Parser error text.
        message: String,
    },
    /// Raised when a declared fix is malformed.
    #[error("invalid fix in '{package}': {message}")]
    InvalidFix {
        /// Package name.
        package: String,
        /// Validation error text.
        message: String,
    },
    /// Raised when registration rejects the descriptor.
    #[error(transparent)]
    Rejected(#[from] RegistryError),
}

/// Resolves a package name to manifest text.
pub trait ManifestSource: Send + Sync {
    /// Returns the manifest for `package`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError`] when the manifest cannot be found or read.
    fn read(&self, package: &str) -> Result<String, ManifestError>;
}

/// Reads `<root>/<package>/plugin.toml`.
#[derive(Clone, Debug)]
pub struct DirManifestSource {
    root: Utf8PathBuf,
}

impl DirManifestSource {
    /// Creates a source rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory searched for packages.
    #[must_use]
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

fn valid_package_name(package: &str) -> bool {
    !package.is_empty()
        && !package.starts_with('.')
        && package
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')
}

impl ManifestSource for DirManifestSource {
    fn read(&self, package: &str) -> Result<String, ManifestError> {
        if !valid_package_name(package) {
            return Err(ManifestError::InvalidName {
                package: package.to_owned(),
            });
        }
        let not_found = || ManifestError::NotFound {
            package: package.to_owned(),
            root: self.root.clone(),
        };
        let read_error = |err: io::Error| ManifestError::Read {
            package: package.to_owned(),
            message: err.to_string(),
        };

        let dir = match Dir::open_ambient_dir(&self.root, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(read_error(err)),
        };
        let path = Utf8PathBuf::from(package).join(MANIFEST_FILE);
        if !dir.try_exists(&path).map_err(read_error)? {
            return Err(not_found());
        }
        dir.read_to_string(&path).map_err(read_error)
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
struct LoadRule {
    #[serde(default)]
    stages: Vec<String>,
    setting: Option<String>,
}

/// Command-based fix declared in a manifest.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ManifestFix {
    /// Fix identifier.
    pub id: String,
    /// Stage name.
    pub stage: String,
    /// OS families the fix is limited to; empty means any.
    #[serde(default)]
    pub os: Vec<OsFamily>,
    /// Severity name; defaults to warning.
    pub severity: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Command that exits zero when healthy.
    pub check: String,
    /// Command that repairs the problem.
    pub install: Option<String>,
    /// Command run after `install` to confirm the repair.
    pub verify: Option<String>,
    /// Manual instructions.
    pub manual_fix: Option<String>,
}

/// Parsed `plugin.toml`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PluginManifest {
    /// Interface version the plugin targets.
    pub api_version: u32,
    /// Plugin identifier.
    pub id: String,
    /// Category name.
    pub category: String,
    /// Plugin version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Required configuration keys.
    #[serde(default)]
    pub requires_config: Vec<String>,
    /// Required secrets.
    #[serde(default)]
    pub requires_secrets: Vec<String>,
    #[serde(default)]
    load: LoadRule,
    /// Declared fixes, in order.
    #[serde(default)]
    pub fixes: Vec<ManifestFix>,
}

fn default_version() -> String {
    String::from("0.0.0")
}

impl PluginManifest {
    /// Parses manifest text for `package`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] when the TOML is malformed.
    pub fn parse(package: &str, content: &str) -> Result<Self, ManifestError> {
        ortho_config::toml::from_str(content).map_err(|err| ManifestError::Parse {
            package: package.to_owned(),
            message: err.to_string(),
        })
    }

    /// Converts the manifest into a descriptor whose fixes run commands.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Rejected`] with
    /// [`RegistryError::UnknownCategory`] for an unknown category, and
    /// [`ManifestError::InvalidFix`] when a fix is malformed.
    pub fn into_descriptor(self, package: &str) -> Result<PluginDescriptor, ManifestError> {
        let category: PluginCategory = self.category.parse().map_err(|_| {
            RegistryError::UnknownCategory {
                name: self.category.clone(),
            }
        })?;
        let invalid = |message: String| ManifestError::InvalidFix {
            package: package.to_owned(),
            message,
        };

        let mut fixes = Vec::with_capacity(self.fixes.len());
        for declared in self.fixes {
            fixes.push(build_fix(declared).map_err(&invalid)?);
        }
        let load_stages = self
            .load
            .stages
            .iter()
            .map(|name| name.parse::<Stage>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| invalid(err.to_string()))?;
        let load_setting = self.load.setting;

        let constructor = external_constructor(category, &self.id);
        let mut builder = PluginDescriptor::builder(category, self.id.clone(), constructor)
            .version(self.version)
            .api_version(self.api_version)
            .fixes(fixes)
            .source(PluginSource::External {
                package: package.to_owned(),
            });
        for key in self.requires_config {
            builder = builder.requires_config(key);
        }
        for name in self.requires_secrets {
            builder = builder.requires_secret(name);
        }
        if !load_stages.is_empty() || load_setting.is_some() {
            builder = builder.load_when(move |context: &LoadContext<'_>| {
                let stage_ok = load_stages.is_empty() || load_stages.contains(&context.stage);
                let setting_ok = load_setting.as_deref().is_none_or(|key| {
                    context
                        .environment
                        .is_some_and(|environment| environment.has_setting(key))
                });
                stage_ok && setting_ok
            });
        }
        Ok(builder.build())
    }
}

fn build_fix(declared: ManifestFix) -> Result<Fix, String> {
    let stage = declared
        .stage
        .parse::<Stage>()
        .map_err(|err| format!("{}: {err}", declared.id))?;
    let severity = match declared.severity.as_deref() {
        Some(name) => name
            .parse::<Severity>()
            .map_err(|err| format!("{}: {err}", declared.id))?,
        None => Severity::Warning,
    };
    let verify = declared.verify.unwrap_or_else(|| declared.check.clone());
    let mut builder = Fix::builder(declared.id, stage)
        .os(OsConstraint::only(declared.os))
        .severity(severity)
        .description(declared.description)
        .probe(CommandProbe::new(declared.check));
    if let Some(install) = declared.install {
        builder = builder.remedy(CommandRemedy::new(install, Some(verify)));
    }
    if let Some(manual) = declared.manual_fix {
        builder = builder.manual_fix(manual);
    }
    builder.build().map_err(|err| err.to_string())
}

fn external_constructor(category: PluginCategory, id: &str) -> Constructor {
    let instance = move |plugin_id: &str| -> InstanceResult {
        let built: Arc<dyn PluginInstance> = Arc::new(BuiltinInstance::new(plugin_id, category));
        Ok(built)
    };
    let plugin_id = id.to_owned();
    match category.constructor_kind() {
        ConstructorKind::ConfigOnly => Constructor::config_only(move |_| instance(&plugin_id)),
        ConstructorKind::PathAndConfig => {
            Constructor::path_and_config(move |_, _| instance(&plugin_id))
        }
        ConstructorKind::ConfigAndSecrets => {
            Constructor::config_and_secrets(move |_, _| instance(&plugin_id))
        }
    }
}
