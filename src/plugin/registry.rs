//! Write-once catalog of plugin descriptors.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::builtin::builtin_descriptors;
use super::external::{APPROVED_PLUGINS, ManifestError, ManifestSource, PluginManifest};
use super::{
    ConstructorKind, InstanceArgs, LoadContext, PLUGIN_API_VERSION, PluginCategory,
    PluginDescriptor, PluginInstance, PluginSource,
};
use crate::fix::Fix;

/// Errors raised while registering or resolving plugins.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// Raised when (category, id) is already registered.
    #[error("plugin {category}/{id} is already registered")]
    DuplicateId {
        /// Category of the clash.
        category: PluginCategory,
        /// Identifier of the clash.
        id: String,
    },
    /// Raised when a fix id is already declared by another plugin.
    #[error("fix {fix} declared by {id} is already provided by {owner}")]
    DuplicateFix {
        /// Fix identifier.
        fix: String,
        /// Plugin attempting to declare it.
        id: String,
        /// Plugin already declaring it.
        owner: String,
    },
    /// Raised when a category name is outside the fixed set.
    #[error("unknown plugin category '{name}'")]
    UnknownCategory {
        /// Name that failed to parse.
        name: String,
    },
    /// Raised when the constructor shape does not fit the category.
    #[error(
        "plugin {category}/{id} declares a {declared} constructor; \
         {category} plugins take {expected}"
    )]
    ConstructorMismatch {
        /// Category of the plugin.
        category: PluginCategory,
        /// Plugin identifier.
        id: String,
        /// Shape the category requires.
        expected: ConstructorKind,
        /// Shape the descriptor declared.
        declared: ConstructorKind,
    },
    /// Raised when a plugin targets another interface version.
    #[error("plugin {id} targets plugin API v{found}; this build supports v{expected}")]
    IncompatibleApi {
        /// Plugin identifier.
        id: String,
        /// Declared version.
        found: u32,
        /// Supported version.
        expected: u32,
    },
    /// Raised when an identifier is blank or contains unsupported characters.
    #[error("invalid plugin id '{id}': use lowercase letters, digits, '-' or '_'")]
    InvalidId {
        /// Offending identifier.
        id: String,
    },
    /// Raised when a declared fix is malformed.
    #[error("invalid fix: {message}")]
    InvalidFix {
        /// Validation error text.
        message: String,
    },
    /// Raised by lookups for unregistered plugins.
    #[error("plugin {category}/{id} is not registered")]
    NotFound {
        /// Requested category.
        category: PluginCategory,
        /// Requested identifier.
        id: String,
    },
    /// Raised when a plugin constructor fails.
    #[error("failed to construct plugin {category}/{id}: {message}")]
    Construction {
        /// Category of the plugin.
        category: PluginCategory,
        /// Plugin identifier.
        id: String,
        /// Constructor error.
        message: String,
    },
}

/// Category, name and version of a registered plugin.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PluginSummary {
    /// Category.
    pub category: PluginCategory,
    /// Identifier.
    pub id: String,
    /// Version.
    pub version: String,
    /// Number of fixes declared.
    pub fix_count: usize,
    /// Origin.
    pub source: PluginSource,
}

/// Per-package failure recorded by [`PluginRegistry::load_external`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageFailure {
    /// Package name.
    pub package: String,
    /// What went wrong.
    pub error: ManifestError,
}

/// Outcome of an external load batch.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LoadReport {
    /// Packages registered, in request order.
    pub loaded: Vec<String>,
    /// Trust warnings for packages outside the approved and trusted sets.
    pub warnings: Vec<String>,
    /// Packages that failed to load.
    pub errors: Vec<PackageFailure>,
}

impl LoadReport {
    /// Returns `true` when every requested package loaded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Registry of plugin descriptors keyed by (category, id).
///
/// Constructed once at start-up and passed by reference; there is no global
/// instance.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    plugins: Vec<PluginDescriptor>,
    fix_owners: BTreeMap<String, String>,
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
}

impl PluginRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in plugins.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if the built-in set is inconsistent.
    pub fn with_builtins() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        let descriptors = builtin_descriptors().map_err(|err| RegistryError::InvalidFix {
            message: err.to_string(),
        })?;
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Registers a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidId`], [`RegistryError::IncompatibleApi`],
    /// [`RegistryError::ConstructorMismatch`], [`RegistryError::DuplicateId`]
    /// or [`RegistryError::DuplicateFix`]. The registry is unchanged on error.
    pub fn register(&mut self, descriptor: PluginDescriptor) -> Result<(), RegistryError> {
        let id = descriptor.id().to_owned();
        let category = descriptor.category();
        if !valid_id(&id) {
            return Err(RegistryError::InvalidId { id });
        }
        if descriptor.api_version() != PLUGIN_API_VERSION {
            return Err(RegistryError::IncompatibleApi {
                id,
                found: descriptor.api_version(),
                expected: PLUGIN_API_VERSION,
            });
        }
        let expected = category.constructor_kind();
        let declared = descriptor.constructor().kind();
        if expected != declared {
            return Err(RegistryError::ConstructorMismatch {
                category,
                id,
                expected,
                declared,
            });
        }
        if self.find(category, &id).is_some() {
            return Err(RegistryError::DuplicateId { category, id });
        }

        let owner = format!("{category}/{id}");
        let mut declared_here: Vec<&str> = Vec::new();
        for fix in descriptor.fixes() {
            if let Some(existing) = self.fix_owners.get(fix.id()) {
                return Err(RegistryError::DuplicateFix {
                    fix: fix.id().to_owned(),
                    id: owner,
                    owner: existing.clone(),
                });
            }
            if declared_here.contains(&fix.id()) {
                return Err(RegistryError::DuplicateFix {
                    fix: fix.id().to_owned(),
                    id: owner.clone(),
                    owner,
                });
            }
            declared_here.push(fix.id());
        }

        for fix in descriptor.fixes() {
            self.fix_owners.insert(fix.id().to_owned(), owner.clone());
        }
        debug!(plugin = %owner, fixes = descriptor.fixes().len(), "registered plugin");
        self.plugins.push(descriptor);
        Ok(())
    }

    fn find(&self, category: PluginCategory, id: &str) -> Option<&PluginDescriptor> {
        self.plugins
            .iter()
            .find(|plugin| plugin.category() == category && plugin.id() == id)
    }

    /// Looks up a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when nothing is registered under
    /// (category, id).
    pub fn get(
        &self,
        category: PluginCategory,
        id: &str,
    ) -> Result<&PluginDescriptor, RegistryError> {
        self.find(category, id).ok_or_else(|| RegistryError::NotFound {
            category,
            id: id.to_owned(),
        })
    }

    /// Summaries of every plugin, in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<PluginSummary> {
        self.plugins
            .iter()
            .map(|plugin| PluginSummary {
                category: plugin.category(),
                id: plugin.id().to_owned(),
                version: plugin.version().to_owned(),
                fix_count: plugin.fixes().len(),
                source: plugin.source().clone(),
            })
            .collect()
    }

    /// Every fix, in registration order then declaration order.
    #[must_use]
    pub fn fixes(&self) -> Vec<Fix> {
        self.plugins
            .iter()
            .flat_map(|plugin| plugin.fixes().iter().cloned())
            .collect()
    }

    /// Plugins whose load predicate accepts `context`, in registration order.
    #[must_use]
    pub fn loaded(&self, context: &LoadContext<'_>) -> Vec<&PluginDescriptor> {
        self.plugins
            .iter()
            .filter(|plugin| plugin.should_load(context))
            .collect()
    }

    /// Fixes of the plugins loaded for `context`, in catalog order.
    #[must_use]
    pub fn fixes_for(&self, context: &LoadContext<'_>) -> Vec<Fix> {
        self.loaded(context)
            .into_iter()
            .flat_map(|plugin| plugin.fixes().iter().cloned())
            .collect()
    }

    /// Constructs a live instance of a plugin, passing each category only the
    /// arguments its constructor takes.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] or [`RegistryError::Construction`].
    pub fn create_instance(
        &self,
        category: PluginCategory,
        id: &str,
        args: &InstanceArgs<'_>,
    ) -> Result<Arc<dyn PluginInstance>, RegistryError> {
        let descriptor = self.get(category, id)?;
        descriptor
            .constructor()
            .construct(args)
            .map_err(|err| RegistryError::Construction {
                category,
                id: id.to_owned(),
                message: err.message,
            })
    }

    /// Resolves, parses and registers external plugin packages.
    ///
    /// Packages outside [`APPROVED_PLUGINS`] and `trusted` still load but
    /// produce a trust warning. A package that fails is recorded in the
    /// report and the batch continues; this method never fails as a whole.
    pub fn load_external(
        &mut self,
        source: &dyn ManifestSource,
        names: &[String],
        trusted: &[String],
    ) -> LoadReport {
        let mut report = LoadReport::default();
        for package in names {
            match self.load_package(source, package) {
                Ok(()) => {
                    let approved = APPROVED_PLUGINS.contains(&package.as_str());
                    let is_trusted = trusted.iter().any(|name| name == package);
                    if !approved && !is_trusted {
                        warn!(
                            package = %package,
                            "loaded plugin that is neither approved nor trusted"
                        );
                        report.warnings.push(format!(
                            "plugin '{package}' is not in the approved list; \
                             add it to trusted_plugins to silence this warning"
                        ));
                    }
                    report.loaded.push(package.clone());
                }
                Err(error) => {
                    warn!(package = %package, error = %error, "failed to load plugin");
                    report.errors.push(PackageFailure {
                        package: package.clone(),
                        error,
                    });
                }
            }
        }
        report
    }

    fn load_package(
        &mut self,
        source: &dyn ManifestSource,
        package: &str,
    ) -> Result<(), ManifestError> {
        let content = source.read(package)?;
        let manifest = PluginManifest::parse(package, &content)?;
        let descriptor = manifest.into_descriptor(package)?;
        self.register(descriptor)?;
        Ok(())
    }
}
