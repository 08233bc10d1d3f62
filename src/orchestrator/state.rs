//! Run phases: Idle, Scanning, then Reported or Fixing, then Done.

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// Where a scan or fix run stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Nothing has happened yet.
    Idle,
    /// Probes are running.
    Scanning,
    /// Findings have been produced for a scan-only run.
    Reported,
    /// Remedies are running.
    Fixing,
    /// The run has finished.
    Done,
}

impl Phase {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Reported => "reported",
            Self::Fixing => "fixing",
            Self::Done => "done",
        }
    }

    const fn may_enter(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Scanning)
                | (Self::Scanning, Self::Reported | Self::Fixing)
                | (Self::Reported | Self::Fixing, Self::Done)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised on an illegal phase change.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("cannot move from {from} to {to}")]
pub struct PhaseError {
    /// Phase the run was in.
    pub from: Phase,
    /// Phase that was requested.
    pub to: Phase,
}

/// Tracks the phase of one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunState {
    phase: Phase,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    /// Starts in [`Phase::Idle`].
    #[must_use]
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError`] when `next` does not follow the current phase.
    pub fn advance(&mut self, next: Phase) -> Result<(), PhaseError> {
        if !self.phase.may_enter(next) {
            return Err(PhaseError {
                from: self.phase,
                to: next,
            });
        }
        debug!(from = %self.phase, to = %next, "run phase");
        self.phase = next;
        Ok(())
    }
}
