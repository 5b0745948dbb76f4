//! Resolved coordinator settings.
//!
//! Raw TOML structs stay private in `callgate-config`; the loader resolves
//! them into these types at the parse boundary. Existence of a value is the
//! proof of its validity.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("processing_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

/// What to do with an incoming offer while another call is in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncomingPolicy {
    /// Offers are refused unless the line is idle.
    #[default]
    Reject,
    /// One offer may wait alongside a call in progress (call waiting).
    Allow,
}

impl IncomingPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Allow => "allow",
        }
    }
}

impl fmt::Display for IncomingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-zero upper bound on how long the processing flag may stay raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingTimeout(Duration);

impl ProcessingTimeout {
    pub fn from_millis(ms: u64) -> Result<Self, SettingsError> {
        if ms == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        Ok(Self(Duration::from_millis(ms)))
    }

    #[must_use]
    pub const fn as_duration(self) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorSettings {
    incoming_policy: IncomingPolicy,
    processing_timeout: Option<ProcessingTimeout>,
}

impl CoordinatorSettings {
    #[must_use]
    pub const fn new(
        incoming_policy: IncomingPolicy,
        processing_timeout: Option<ProcessingTimeout>,
    ) -> Self {
        Self {
            incoming_policy,
            processing_timeout,
        }
    }

    #[must_use]
    pub const fn incoming_policy(&self) -> IncomingPolicy {
        self.incoming_policy
    }

    /// `None` disables the processing watchdog.
    #[must_use]
    pub const fn processing_timeout(&self) -> Option<ProcessingTimeout> {
        self.processing_timeout
    }
}
