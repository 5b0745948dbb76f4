//! Explicit call lifecycle.
//!
//! [`CallLifecycle`] is a second view of [`CallState`]: every combination of
//! the three state fields maps to exactly one variant and back, so converting
//! is lossless. Transitions go through [`CallLifecycle::apply`], which rejects
//! anything outside the call flow instead of silently producing a state the
//! callers never meant to reach.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{CallSession, CallState, IncomingPolicy};

/// Fieldless tag of a [`CallLifecycle`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Incoming,
    Initiating,
    Active,
    Terminating,
}

impl CallPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Incoming => "incoming",
            Self::Initiating => "initiating",
            Self::Active => "active",
            Self::Terminating => "terminating",
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the call, driving one lifecycle step.
#[derive(Debug, Clone, PartialEq)]
pub enum CallEvent {
    /// The backend offered a call to this client.
    Offer(CallSession),
    /// This client starts dialling out.
    BeginOutbound,
    /// The outbound call connected.
    Connected(CallSession),
    /// The outbound call could not be set up.
    InitiationFailed,
    /// This client starts hanging up the active call.
    BeginHangup,
    /// Hangup finished, successfully or not.
    HangupFinished,
    /// The pending offer was accepted.
    Accept,
    /// The pending offer was declined.
    Decline,
}

impl CallEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Offer(_) => "offer",
            Self::BeginOutbound => "begin_outbound",
            Self::Connected(_) => "connected",
            Self::InitiationFailed => "initiation_failed",
            Self::BeginHangup => "begin_hangup",
            Self::HangupFinished => "hangup_finished",
            Self::Accept => "accept",
            Self::Decline => "decline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallTransitionError {
    #[error("cannot apply {event} while {from}")]
    Illegal {
        from: CallPhase,
        event: &'static str,
    },
    #[error("incoming call refused while {phase}")]
    Busy { phase: CallPhase },
    #[error("{event} arrived after its processing window was superseded")]
    Stale { event: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum CallLifecycle {
    #[default]
    Idle,
    Incoming {
        offer: CallSession,
    },
    Initiating {
        waiting: Option<CallSession>,
    },
    Active {
        call: CallSession,
        waiting: Option<CallSession>,
    },
    Terminating {
        call: CallSession,
        waiting: Option<CallSession>,
    },
}

impl CallLifecycle {
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        match self {
            Self::Idle => CallPhase::Idle,
            Self::Incoming { .. } => CallPhase::Incoming,
            Self::Initiating { .. } => CallPhase::Initiating,
            Self::Active { .. } => CallPhase::Active,
            Self::Terminating { .. } => CallPhase::Terminating,
        }
    }

    /// The connected call, if any.
    #[must_use]
    pub fn call(&self) -> Option<&CallSession> {
        match self {
            Self::Active { call, .. } | Self::Terminating { call, .. } => Some(call),
            Self::Idle | Self::Incoming { .. } | Self::Initiating { .. } => None,
        }
    }

    /// An offer held while something else is in progress.
    #[must_use]
    pub fn waiting(&self) -> Option<&CallSession> {
        match self {
            Self::Initiating { waiting }
            | Self::Active { waiting, .. }
            | Self::Terminating { waiting, .. } => waiting.as_ref(),
            Self::Idle | Self::Incoming { .. } => None,
        }
    }

    /// Apply one event. On rejection the original state is handed back
    /// unchanged alongside the error.
    pub fn apply(
        self,
        event: CallEvent,
        policy: IncomingPolicy,
    ) -> Result<Self, (Self, CallTransitionError)> {
        match (self, event) {
            (Self::Idle, CallEvent::BeginOutbound) => Ok(Self::Initiating { waiting: None }),
            (Self::Incoming { offer }, CallEvent::BeginOutbound) => Ok(Self::Initiating {
                waiting: Some(offer),
            }),
            (Self::Initiating { waiting }, CallEvent::Connected(call)) => {
                Ok(Self::Active { call, waiting })
            }
            (Self::Initiating { waiting }, CallEvent::InitiationFailed)
            | (Self::Terminating { waiting, .. }, CallEvent::HangupFinished) => {
                Ok(Self::settle(waiting))
            }
            (Self::Active { call, waiting }, CallEvent::BeginHangup) => {
                Ok(Self::Terminating { call, waiting })
            }
            (Self::Idle, CallEvent::Offer(offer)) => Ok(Self::Incoming { offer }),
            (Self::Incoming { offer }, CallEvent::Accept) => Ok(Self::Active {
                call: offer,
                waiting: None,
            }),
            (Self::Incoming { .. }, CallEvent::Decline) => Ok(Self::Idle),
            (state, CallEvent::Offer(offer)) => state.hold_offer(offer, policy),
            (state, CallEvent::Decline) if state.waiting().is_some() => Ok(state.drop_waiting()),
            (state, event) => {
                let from = state.phase();
                Err((
                    state,
                    CallTransitionError::Illegal {
                        from,
                        event: event.name(),
                    },
                ))
            }
        }
    }

    fn settle(waiting: Option<CallSession>) -> Self {
        match waiting {
            Some(offer) => Self::Incoming { offer },
            None => Self::Idle,
        }
    }

    fn hold_offer(
        self,
        offer: CallSession,
        policy: IncomingPolicy,
    ) -> Result<Self, (Self, CallTransitionError)> {
        let phase = self.phase();
        if policy == IncomingPolicy::Reject {
            return Err((self, CallTransitionError::Busy { phase }));
        }
        match self {
            Self::Initiating { waiting: None } => Ok(Self::Initiating {
                waiting: Some(offer),
            }),
            Self::Active {
                call,
                waiting: None,
            } => Ok(Self::Active {
                call,
                waiting: Some(offer),
            }),
            Self::Terminating {
                call,
                waiting: None,
            } => Ok(Self::Terminating {
                call,
                waiting: Some(offer),
            }),
            other => Err((other, CallTransitionError::Busy { phase })),
        }
    }

    fn drop_waiting(self) -> Self {
        match self {
            Self::Initiating { .. } => Self::Initiating { waiting: None },
            Self::Active { call, .. } => Self::Active {
                call,
                waiting: None,
            },
            Self::Terminating { call, .. } => Self::Terminating {
                call,
                waiting: None,
            },
            other => other,
        }
    }
}

impl From<CallState> for CallLifecycle {
    fn from(state: CallState) -> Self {
        match (state.active_call, state.incoming_call, state.is_processing) {
            (None, None, false) => Self::Idle,
            (None, Some(offer), false) => Self::Incoming { offer },
            (None, waiting, true) => Self::Initiating { waiting },
            (Some(call), waiting, false) => Self::Active { call, waiting },
            (Some(call), waiting, true) => Self::Terminating { call, waiting },
        }
    }
}

impl From<CallLifecycle> for CallState {
    fn from(lifecycle: CallLifecycle) -> Self {
        match lifecycle {
            CallLifecycle::Idle => Self::default(),
            CallLifecycle::Incoming { offer } => Self {
                active_call: None,
                incoming_call: Some(offer),
                is_processing: false,
            },
            CallLifecycle::Initiating { waiting } => Self {
                active_call: None,
                incoming_call: waiting,
                is_processing: true,
            },
            CallLifecycle::Active { call, waiting } => Self {
                active_call: Some(call),
                incoming_call: waiting,
                is_processing: false,
            },
            CallLifecycle::Terminating { call, waiting } => Self {
                active_call: Some(call),
                incoming_call: waiting,
                is_processing: true,
            },
        }
    }
}

impl CallState {
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        match (&self.active_call, &self.incoming_call, self.is_processing) {
            (None, None, false) => CallPhase::Idle,
            (None, Some(_), false) => CallPhase::Incoming,
            (None, _, true) => CallPhase::Initiating,
            (Some(_), _, false) => CallPhase::Active,
            (Some(_), _, true) => CallPhase::Terminating,
        }
    }
}
