//! Cloud provider abstraction used by the provisioner.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

use super::plan::ResourceRole;
use super::tags::TagSet;
use crate::exec::ExecError;

/// Future returned by provider operations.
pub type ProviderFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Whether a handle was found or made during this run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceOrigin {
    /// Rediscovered by tag or name.
    Discovered,
    /// Created by this run.
    Created,
}

/// Reference to a provider resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceHandle {
    /// Role the resource plays.
    pub role: ResourceRole,
    /// Provider-specific resource kind, for example `vpc.private-network`.
    pub kind: String,
    /// Provider identifier.
    pub id: String,
    /// Public address, for resources that have one.
    pub address: Option<String>,
    /// Whether the resource was reused or created.
    pub origin: ResourceOrigin,
}

impl ResourceHandle {
    /// Builds a handle for a resource discovered by lookup.
    #[must_use]
    pub fn discovered(role: ResourceRole, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            role,
            kind: kind.into(),
            id: id.into(),
            address: None,
            origin: ResourceOrigin::Discovered,
        }
    }

    /// Builds a handle for a resource created by this run.
    #[must_use]
    pub fn created(role: ResourceRole, kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            origin: ResourceOrigin::Created,
            ..Self::discovered(role, kind, id)
        }
    }

    /// Attaches a public address.
    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}

/// Everything a provider needs to find or create one resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceSpec {
    /// Role being provisioned.
    pub role: ResourceRole,
    /// Deterministic resource name.
    pub name: String,
    /// Identity tags.
    pub tags: TagSet,
    /// Handles of the prerequisites, in declaration order.
    pub dependencies: Vec<ResourceHandle>,
    /// Ports to open, for security groups.
    pub ingress_ports: Vec<u16>,
    /// SSH public key, for key pairs.
    pub public_key: Option<String>,
    /// Domain name, for mail domains.
    pub domain: Option<String>,
}

impl ResourceSpec {
    /// Returns the handle of prerequisite `role`.
    #[must_use]
    pub fn dependency(&self, role: ResourceRole) -> Option<&ResourceHandle> {
        self.dependencies.iter().find(|handle| handle.role == role)
    }

    /// Returns the handle of prerequisite `role` or a provider error.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingDependency`] when the prerequisite was
    /// not supplied.
    pub fn require(&self, role: ResourceRole) -> Result<&ResourceHandle, ProviderError> {
        self.dependency(role)
            .ok_or(ProviderError::MissingDependency {
                role: self.role,
                requires: role,
            })
    }
}

/// Lifecycle state of a compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Being created or booting.
    Starting,
    /// Powered on.
    Running,
    /// Powered off.
    Stopped,
    /// Any other provider state.
    Other(String),
}

impl InstanceState {
    /// Maps a provider state string to an [`InstanceState`].
    #[must_use]
    pub fn from_provider(state: &str) -> Self {
        match state {
            "running" => Self::Running,
            "starting" | "provisioning" | "allocating" => Self::Starting,
            "stopped" | "stopped in place" => Self::Stopped,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// State and address of a compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Lifecycle state.
    pub state: InstanceState,
    /// Public IPv4 address, once assigned.
    pub public_ip: Option<IpAddr>,
}

/// Errors raised by cloud providers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Wrapper for provider API failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider.
        message: String,
    },
    /// Raised when provider output cannot be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource type being parsed.
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when a provider CLI exits unsuccessfully.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Human readable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when the provider cannot manage a role.
    #[error("{role} is not supported by this provider")]
    Unsupported {
        /// Unsupported role.
        role: ResourceRole,
    },
    /// Raised when a prerequisite handle is missing.
    #[error("{role} requires {requires}")]
    MissingDependency {
        /// Dependent role.
        role: ResourceRole,
        /// Missing prerequisite.
        requires: ResourceRole,
    },
    /// Raised when a provider command cannot be run.
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Find-or-create interface implemented by cloud providers.
pub trait CloudProvider: Send + Sync {
    /// Looks up an existing resource matching `spec` by tag (or by name when
    /// the provider cannot tag the resource).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the lookup fails.
    fn find<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, Option<ResourceHandle>>;

    /// Creates a resource carrying `spec.tags`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when creation fails.
    fn create<'a>(&'a self, spec: &'a ResourceSpec) -> ProviderFuture<'a, ResourceHandle>;

    /// Deletes a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when deletion fails.
    fn delete<'a>(&'a self, handle: &'a ResourceHandle) -> ProviderFuture<'a, ()>;

    /// Reports the state of a compute instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the instance cannot be queried.
    fn instance_status<'a>(&'a self, handle: &'a ResourceHandle)
    -> ProviderFuture<'a, InstanceStatus>;
}
