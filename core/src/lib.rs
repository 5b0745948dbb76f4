//! Shared call state coordination for callgate.
//!
//! One [`CallStateCoordinator`] per process holds the call-session status
//! that every call-handling observer reads. It offers:
//!
//! - plain container operations: [`CallStateCoordinator::state`],
//!   [`CallStateCoordinator::set_state`], [`CallStateCoordinator::subscribe`],
//!   [`CallStateCoordinator::can_initiate_call`],
//!   [`CallStateCoordinator::set_processing`];
//! - atomic admission through [`CallStateCoordinator::try_begin_call`] and
//!   [`CallStateCoordinator::try_begin_hangup`], whose guards always lower the
//!   processing flag;
//! - lifecycle-checked updates through [`CallStateCoordinator::apply`];
//! - a watchdog for processing flags left raised.

mod coordinator;
mod guard;
mod watchdog;

pub use coordinator::{CallStateCoordinator, StateChange, Subscription, SubscriptionId};
pub use guard::{BeginCallError, BeginHangupError, InitiationGuard, TeardownGuard};
pub use watchdog::spawn_processing_watchdog;
