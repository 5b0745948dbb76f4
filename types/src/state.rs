//! Call-session status snapshot and partial updates.

use serde::{Deserialize, Serialize};

use crate::CallSession;

/// Snapshot of the shared call status.
///
/// Values of this type are always owned copies. Holding one never aliases the
/// coordinator's live state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallState {
    pub active_call: Option<CallSession>,
    pub incoming_call: Option<CallSession>,
    pub is_processing: bool,
}

impl CallState {
    /// Admission gate: a new outbound call may start only when nothing is in
    /// flight and no call is connected. Incoming offers do not block it.
    #[must_use]
    pub fn can_initiate_call(&self) -> bool {
        !self.is_processing && self.active_call.is_none()
    }

    /// Shallow merge: fields present in `patch` replace the current ones.
    pub fn merge(&mut self, patch: CallStatePatch) {
        if let Some(active) = patch.active_call {
            self.active_call = active;
        }
        if let Some(incoming) = patch.incoming_call {
            self.incoming_call = incoming;
        }
        if let Some(processing) = patch.is_processing {
            self.is_processing = processing;
        }
    }

    #[must_use]
    pub fn merged(mut self, patch: CallStatePatch) -> Self {
        self.merge(patch);
        self
    }
}

/// Partial update for [`CallState`].
///
/// Outer `None` leaves a field unchanged. For the session slots, `Some(None)`
/// clears the slot.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct CallStatePatch {
    active_call: Option<Option<CallSession>>,
    incoming_call: Option<Option<CallSession>>,
    is_processing: Option<bool>,
}

impl CallStatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_call(mut self, call: CallSession) -> Self {
        self.active_call = Some(Some(call));
        self
    }

    pub fn clear_active_call(mut self) -> Self {
        self.active_call = Some(None);
        self
    }

    pub fn incoming_call(mut self, call: CallSession) -> Self {
        self.incoming_call = Some(Some(call));
        self
    }

    pub fn clear_incoming_call(mut self) -> Self {
        self.incoming_call = Some(None);
        self
    }

    pub fn processing(mut self, processing: bool) -> Self {
        self.is_processing = Some(processing);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_call.is_none() && self.incoming_call.is_none() && self.is_processing.is_none()
    }
}

/// Replaces every field, so merging it yields exactly `state`.
impl From<CallState> for CallStatePatch {
    fn from(state: CallState) -> Self {
        Self {
            active_call: Some(state.active_call),
            incoming_call: Some(state.incoming_call),
            is_processing: Some(state.is_processing),
        }
    }
}
