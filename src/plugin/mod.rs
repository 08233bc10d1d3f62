//! Plugin descriptors and the registry that catalogs them.
//!
//! A plugin contributes [`Fix`] values for one category of concern (the
//! server a project deploys to, where its secrets live, the framework it is
//! written in, ...). Descriptors are immutable once registered. The
//! interface is closed and versioned: external manifests declare the
//! [`PLUGIN_API_VERSION`] they were written against and are rejected when it
//! differs.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use camino::Utf8Path;
use thiserror::Error;

use crate::environment::{EnvironmentConfig, ProjectContext};
use crate::exec::RemoteExecutor;
use crate::fix::{Fix, Stage};
use crate::provision::ProvisionService;
use crate::secrets::SecretStore;

mod builtin;
mod external;
mod registry;

pub use builtin::{BuiltinInstance, builtin_descriptors};
pub use external::{
    APPROVED_PLUGINS, DirManifestSource, ManifestError, ManifestSource, PluginManifest,
};
pub use registry::{LoadReport, PackageFailure, PluginRegistry, PluginSummary, RegistryError};

/// Version of the plugin interface understood by this build.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Fixed set of plugin categories.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum PluginCategory {
    /// Deployment target: a machine or cloud account.
    Server,
    /// Secret storage backend.
    Secrets,
    /// Container or package registry.
    Registry,
    /// Application framework.
    Framework,
    /// Optional add-on service.
    Addon,
    /// Delivery pipeline.
    Pipeline,
}

impl PluginCategory {
    /// Every category, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Server,
        Self::Secrets,
        Self::Registry,
        Self::Framework,
        Self::Addon,
        Self::Pipeline,
    ];

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Secrets => "secrets",
            Self::Registry => "registry",
            Self::Framework => "framework",
            Self::Addon => "addon",
            Self::Pipeline => "pipeline",
        }
    }

    /// Constructor shape plugins of this category must declare.
    #[must_use]
    pub const fn constructor_kind(self) -> ConstructorKind {
        match self {
            Self::Secrets => ConstructorKind::ConfigOnly,
            Self::Framework => ConstructorKind::PathAndConfig,
            Self::Server | Self::Registry | Self::Addon | Self::Pipeline => {
                ConstructorKind::ConfigAndSecrets
            }
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when a category name is outside the fixed set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unknown plugin category '{name}'")]
pub struct UnknownCategoryError {
    /// Name that failed to parse.
    pub name: String,
}

impl FromStr for PluginCategory {
    type Err = UnknownCategoryError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == wanted)
            .ok_or_else(|| UnknownCategoryError {
                name: value.to_owned(),
            })
    }
}

/// Configuration keys and secrets a plugin needs before it can work.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Requirements {
    /// Dotted environment setting keys.
    pub config_keys: Vec<String>,
    /// Secret names.
    pub secrets: Vec<String>,
}

/// What a load predicate sees when deciding whether a plugin is configured.
#[derive(Clone, Copy)]
pub struct LoadContext<'a> {
    /// Stage being reconciled.
    pub stage: Stage,
    /// Environment configuration for the stage, when one exists.
    pub environment: Option<&'a EnvironmentConfig>,
    /// Project under management.
    pub project: &'a ProjectContext,
}

impl fmt::Debug for LoadContext<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("LoadContext")
            .field("stage", &self.stage)
            .field(
                "environment",
                &self.environment.map(|environment| &environment.name),
            )
            .field("project", &self.project.name)
            .finish()
    }
}

type LoadPredicate = dyn Fn(&LoadContext<'_>) -> bool + Send + Sync;

/// Arguments available to plugin constructors. Each category only receives
/// the subset its constructor shape names.
#[derive(Clone, Copy)]
pub struct InstanceArgs<'a> {
    /// Plugin configuration, usually the environment's settings table.
    pub config: &'a serde_json::Value,
    /// Secret lookup.
    pub secrets: &'a dyn SecretStore,
    /// Project root, for framework plugins.
    pub project_root: &'a Utf8Path,
}

/// Error raised by a plugin constructor.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct InstanceError {
    /// What went wrong.
    pub message: String,
}

impl InstanceError {
    /// Wraps a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of a plugin constructor.
pub type InstanceResult = Result<Arc<dyn PluginInstance>, InstanceError>;

type ConfigOnlyFn = dyn Fn(&serde_json::Value) -> InstanceResult + Send + Sync;
type PathAndConfigFn = dyn Fn(&Utf8Path, &serde_json::Value) -> InstanceResult + Send + Sync;
type ConfigAndSecretsFn =
    dyn Fn(&serde_json::Value, &dyn SecretStore) -> InstanceResult + Send + Sync;

/// Shape of a constructor, used to check a descriptor against its category.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConstructorKind {
    /// Takes configuration only.
    ConfigOnly,
    /// Takes the project path and configuration.
    PathAndConfig,
    /// Takes configuration and secrets.
    ConfigAndSecrets,
}

impl fmt::Display for ConstructorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::ConfigOnly => "config",
            Self::PathAndConfig => "path + config",
            Self::ConfigAndSecrets => "config + secrets",
        })
    }
}

/// Per-category plugin constructor.
#[derive(Clone)]
pub enum Constructor {
    /// Secrets plugins.
    ConfigOnly(Arc<ConfigOnlyFn>),
    /// Framework plugins.
    PathAndConfig(Arc<PathAndConfigFn>),
    /// Every other category.
    ConfigAndSecrets(Arc<ConfigAndSecretsFn>),
}

impl Constructor {
    /// Wraps a config-only constructor.
    #[must_use]
    pub fn config_only(
        build: impl Fn(&serde_json::Value) -> InstanceResult + Send + Sync + 'static,
    ) -> Self {
        Self::ConfigOnly(Arc::new(build))
    }

    /// Wraps a path-and-config constructor.
    #[must_use]
    pub fn path_and_config(
        build: impl Fn(&Utf8Path, &serde_json::Value) -> InstanceResult + Send + Sync + 'static,
    ) -> Self {
        Self::PathAndConfig(Arc::new(build))
    }

    /// Wraps a config-and-secrets constructor.
    #[must_use]
    pub fn config_and_secrets(
        build: impl Fn(&serde_json::Value, &dyn SecretStore) -> InstanceResult
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Self::ConfigAndSecrets(Arc::new(build))
    }

    /// Shape of this constructor.
    #[must_use]
    pub const fn kind(&self) -> ConstructorKind {
        match self {
            Self::ConfigOnly(_) => ConstructorKind::ConfigOnly,
            Self::PathAndConfig(_) => ConstructorKind::PathAndConfig,
            Self::ConfigAndSecrets(_) => ConstructorKind::ConfigAndSecrets,
        }
    }

    /// Calls the constructor with the arguments its shape takes.
    ///
    /// # Errors
    ///
    /// Propagates the constructor's [`InstanceError`].
    pub fn construct(&self, args: &InstanceArgs<'_>) -> InstanceResult {
        match self {
            Self::ConfigOnly(build) => build(args.config),
            Self::PathAndConfig(build) => build(args.project_root, args.config),
            Self::ConfigAndSecrets(build) => build(args.config, args.secrets),
        }
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "Constructor({})", self.kind())
    }
}

/// Live plugin object produced by a constructor.
pub trait PluginInstance: Send + Sync {
    /// Plugin identifier.
    fn id(&self) -> &str;

    /// Plugin category.
    fn category(&self) -> PluginCategory;

    /// Provisioner backing this plugin's cloud fixes, if it has one. Remote
    /// readiness probes run through `executor`.
    fn provision_service(
        &self,
        _executor: Arc<dyn RemoteExecutor>,
    ) -> Option<Arc<dyn ProvisionService>> {
        None
    }
}

/// Where a descriptor came from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PluginSource {
    /// Compiled into this binary.
    Builtin,
    /// Loaded from an external manifest package.
    External {
        /// Package name the manifest was resolved from.
        package: String,
    },
}

/// Immutable description of a plugin.
#[derive(Clone)]
pub struct PluginDescriptor {
    category: PluginCategory,
    id: String,
    version: String,
    api_version: u32,
    fixes: Vec<Fix>,
    requirements: Requirements,
    load_when: Option<Arc<LoadPredicate>>,
    constructor: Constructor,
    source: PluginSource,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("PluginDescriptor")
            .field("category", &self.category)
            .field("id", &self.id)
            .field("version", &self.version)
            .field("fixes", &self.fixes.len())
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl PluginDescriptor {
    /// Starts a descriptor. The constructor must match the category's shape
    /// or registration fails.
    #[must_use]
    pub fn builder(
        category: PluginCategory,
        id: impl Into<String>,
        constructor: Constructor,
    ) -> PluginDescriptorBuilder {
        PluginDescriptorBuilder {
            descriptor: Self {
                category,
                id: id.into(),
                version: String::from(env!("CARGO_PKG_VERSION")),
                api_version: PLUGIN_API_VERSION,
                fixes: Vec::new(),
                requirements: Requirements::default(),
                load_when: None,
                constructor,
                source: PluginSource::Builtin,
            },
        }
    }

    /// Category.
    #[must_use]
    pub const fn category(&self) -> PluginCategory {
        self.category
    }

    /// Identifier, unique within the category.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Plugin version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Interface version the plugin was written against.
    #[must_use]
    pub const fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Declared fixes, in declaration order.
    #[must_use]
    pub fn fixes(&self) -> &[Fix] {
        &self.fixes
    }

    /// Declared configuration keys and secrets.
    #[must_use]
    pub const fn requirements(&self) -> &Requirements {
        &self.requirements
    }

    /// Constructor.
    #[must_use]
    pub const fn constructor(&self) -> &Constructor {
        &self.constructor
    }

    /// Origin of the descriptor.
    #[must_use]
    pub const fn source(&self) -> &PluginSource {
        &self.source
    }

    /// Returns `true` when the plugin considers itself configured for
    /// `context`. Plugins without a predicate always load.
    #[must_use]
    pub fn should_load(&self, context: &LoadContext<'_>) -> bool {
        self.load_when
            .as_ref()
            .is_none_or(|predicate| predicate(context))
    }
}

/// Builder for [`PluginDescriptor`].
pub struct PluginDescriptorBuilder {
    descriptor: PluginDescriptor,
}

impl PluginDescriptorBuilder {
    /// Sets the plugin version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.descriptor.version = version.into();
        self
    }

    /// Declares the interface version.
    #[must_use]
    pub const fn api_version(mut self, version: u32) -> Self {
        self.descriptor.api_version = version;
        self
    }

    /// Appends a fix.
    #[must_use]
    pub fn fix(mut self, fix: Fix) -> Self {
        self.descriptor.fixes.push(fix);
        self
    }

    /// Appends several fixes in order.
    #[must_use]
    pub fn fixes(mut self, fixes: impl IntoIterator<Item = Fix>) -> Self {
        self.descriptor.fixes.extend(fixes);
        self
    }

    /// Declares a required configuration key.
    #[must_use]
    pub fn requires_config(mut self, key: impl Into<String>) -> Self {
        self.descriptor.requirements.config_keys.push(key.into());
        self
    }

    /// Declares a required secret.
    #[must_use]
    pub fn requires_secret(mut self, name: impl Into<String>) -> Self {
        self.descriptor.requirements.secrets.push(name.into());
        self
    }

    /// Sets the load predicate.
    #[must_use]
    pub fn load_when(
        mut self,
        predicate: impl Fn(&LoadContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.descriptor.load_when = Some(Arc::new(predicate));
        self
    }

    /// Records where the descriptor came from.
    #[must_use]
    pub fn source(mut self, source: PluginSource) -> Self {
        self.descriptor.source = source;
        self
    }

    /// Finishes the descriptor. Validation happens at registration.
    #[must_use]
    pub fn build(self) -> PluginDescriptor {
        self.descriptor
    }
}
