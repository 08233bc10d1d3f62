//! Per-resource state machine: NotFound, then Creating, then Ready or Error.

use thiserror::Error;

use super::plan::ResourceRole;
use super::provider::ResourceHandle;

/// Where a resource stands during a provisioning run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResourceState {
    /// Not yet seen.
    NotFound,
    /// Creation requested.
    Creating,
    /// Discovered or created.
    Ready(ResourceHandle),
    /// Creation failed.
    Error(String),
}

/// Raised on an illegal state change.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{role}: cannot {event} while {state}")]
pub struct TransitionError {
    /// Resource role.
    pub role: ResourceRole,
    /// Event that was rejected.
    pub event: &'static str,
    /// State the resource was in.
    pub state: &'static str,
}

/// Tracks one resource through a run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceTracker {
    role: ResourceRole,
    state: ResourceState,
}

impl ResourceTracker {
    /// Starts tracking `role` in [`ResourceState::NotFound`].
    #[must_use]
    pub const fn new(role: ResourceRole) -> Self {
        Self {
            role,
            state: ResourceState::NotFound,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &ResourceState {
        &self.state
    }

    const fn state_name(&self) -> &'static str {
        match self.state {
            ResourceState::NotFound => "not-found",
            ResourceState::Creating => "creating",
            ResourceState::Ready(_) => "ready",
            ResourceState::Error(_) => "error",
        }
    }

    const fn reject(&self, event: &'static str) -> TransitionError {
        TransitionError {
            role: self.role,
            event,
            state: self.state_name(),
        }
    }

    /// NotFound to Ready, for a resource rediscovered by lookup.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other state.
    pub fn discovered(&mut self, handle: ResourceHandle) -> Result<(), TransitionError> {
        if self.state != ResourceState::NotFound {
            return Err(self.reject("discover"));
        }
        self.state = ResourceState::Ready(handle);
        Ok(())
    }

    /// NotFound to Creating.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other state.
    pub fn begin_create(&mut self) -> Result<(), TransitionError> {
        if self.state != ResourceState::NotFound {
            return Err(self.reject("create"));
        }
        self.state = ResourceState::Creating;
        Ok(())
    }

    /// Creating to Ready.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other state.
    pub fn created(&mut self, handle: ResourceHandle) -> Result<(), TransitionError> {
        if self.state != ResourceState::Creating {
            return Err(self.reject("complete"));
        }
        self.state = ResourceState::Ready(handle);
        Ok(())
    }

    /// Creating to Error.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] from any other state.
    pub fn failed(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        if self.state != ResourceState::Creating {
            return Err(self.reject("fail"));
        }
        self.state = ResourceState::Error(message.into());
        Ok(())
    }
}
