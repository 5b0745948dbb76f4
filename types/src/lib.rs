//! Core domain types for callgate.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory

mod ids;
mod lifecycle;
mod settings;
mod state;

pub use ids::{CallId, CallIdError, CallSession};
pub use lifecycle::{CallEvent, CallLifecycle, CallPhase, CallTransitionError};
pub use settings::{CoordinatorSettings, IncomingPolicy, ProcessingTimeout, SettingsError};
pub use state::{CallState, CallStatePatch};
