use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("call id must not be empty")]
pub struct CallIdError;

/// Identifier of one call session, as issued by the signalling backend.
///
/// Invariant: never empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CallId(String);

impl CallId {
    pub fn new(value: impl Into<String>) -> Result<Self, CallIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            Err(CallIdError)
        } else {
            Ok(Self(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CallId {
    type Error = CallIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for CallId {
    type Error = CallIdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CallId> for String {
    fn from(value: CallId) -> Self {
        value.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle for one voice/video call.
///
/// The coordinator only ever looks at the id (for logging). Whatever the
/// transport layer needs to keep alongside it rides in `payload` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSession {
    id: CallId,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    payload: serde_json::Value,
}

impl CallSession {
    #[must_use]
    pub fn new(id: CallId) -> Self {
        Self {
            id,
            payload: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_payload(id: CallId, payload: serde_json::Value) -> Self {
        Self { id, payload }
    }

    #[must_use]
    pub fn id(&self) -> &CallId {
        &self.id
    }

    #[must_use]
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }
}
