//! RAII guards for processing windows.
//!
//! A guard is the only way out of `Initiating` or `Terminating` that the
//! coordinator hands to callers. Dropping it unresolved still closes the
//! window, so the admission gate cannot be left stuck by an early return or
//! a panic in the caller.

use thiserror::Error;

use callgate_types::{CallEvent, CallSession, CallState, CallTransitionError};

use crate::CallStateCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeginCallError {
    #[error("another call action is already in progress")]
    AlreadyProcessing,
    #[error("a call is already active")]
    CallActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BeginHangupError {
    #[error("another call action is already in progress")]
    AlreadyProcessing,
    #[error("there is no active call to hang up")]
    NoActiveCall,
}

/// Held while an outbound call is being set up.
#[must_use = "dropping the guard marks the initiation as failed"]
#[derive(Debug)]
pub struct InitiationGuard {
    coordinator: CallStateCoordinator,
    epoch: u64,
    resolved: bool,
}

impl InitiationGuard {
    pub(crate) fn new(coordinator: CallStateCoordinator, epoch: u64) -> Self {
        Self {
            coordinator,
            epoch,
            resolved: false,
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The call connected: `Initiating -> Active`.
    ///
    /// Returns `Stale` if the window was reset in the meantime (for example by
    /// the watchdog); the state is then left as whoever reset it made it.
    pub fn connected(mut self, call: CallSession) -> Result<CallState, CallTransitionError> {
        self.resolved = true;
        self.coordinator
            .resolve(self.epoch, CallEvent::Connected(call))
    }

    /// The call could not be set up: back to `Idle`, or to `Incoming` if an
    /// offer arrived meanwhile.
    pub fn failed(mut self) -> CallState {
        self.resolved = true;
        self.coordinator
            .resolve(self.epoch, CallEvent::InitiationFailed)
            .unwrap_or_else(|_| self.coordinator.state())
    }
}

impl Drop for InitiationGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::warn!(
            epoch = self.epoch,
            "Initiation guard dropped unresolved, treating as failed"
        );
        let _ = self
            .coordinator
            .resolve(self.epoch, CallEvent::InitiationFailed);
    }
}

/// Held while the active call is being hung up.
#[must_use = "dropping the guard finishes the hangup"]
#[derive(Debug)]
pub struct TeardownGuard {
    coordinator: CallStateCoordinator,
    epoch: u64,
    resolved: bool,
}

impl TeardownGuard {
    pub(crate) fn new(coordinator: CallStateCoordinator, epoch: u64) -> Self {
        Self {
            coordinator,
            epoch,
            resolved: false,
        }
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Hangup done, whether the remote side acknowledged or not.
    pub fn finish(mut self) -> CallState {
        self.resolved = true;
        self.coordinator
            .resolve(self.epoch, CallEvent::HangupFinished)
            .unwrap_or_else(|_| self.coordinator.state())
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::debug!(epoch = self.epoch, "Teardown guard dropped, finishing hangup");
        let _ = self
            .coordinator
            .resolve(self.epoch, CallEvent::HangupFinished);
    }
}
