//! Configuration loading for callgate.
//!
//! ```toml
//! [coordinator]
//! incoming_policy = "reject"     # or "allow" for call waiting
//! processing_timeout_ms = 30000  # omit to disable the watchdog
//! ```
//!
//! The raw TOML structs are private; [`CallgateConfig`] only ever holds
//! resolved [`CoordinatorSettings`].

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use callgate_types::{CoordinatorSettings, IncomingPolicy, ProcessingTimeout, SettingsError};

/// Overrides the config file location when set.
pub const CONFIG_PATH_ENV: &str = "CALLGATE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config at {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: SettingsError,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. }
            | ConfigError::Parse { path, .. }
            | ConfigError::Invalid { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    coordinator: Option<RawCoordinatorConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCoordinatorConfig {
    #[serde(default)]
    incoming_policy: IncomingPolicy,
    processing_timeout_ms: Option<u64>,
}

impl RawCoordinatorConfig {
    fn resolve(self) -> Result<CoordinatorSettings, SettingsError> {
        let timeout = self
            .processing_timeout_ms
            .map(ProcessingTimeout::from_millis)
            .transpose()?;
        Ok(CoordinatorSettings::new(self.incoming_policy, timeout))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallgateConfig {
    coordinator: CoordinatorSettings,
}

impl CallgateConfig {
    #[must_use]
    pub fn new(coordinator: CoordinatorSettings) -> Self {
        Self { coordinator }
    }

    #[must_use]
    pub fn coordinator(&self) -> &CoordinatorSettings {
        &self.coordinator
    }

    /// Load from [`config_path`]. A missing file is not an error.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = match toml::from_str(content) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let coordinator = raw
            .coordinator
            .unwrap_or_default()
            .resolve()
            .map_err(|source| ConfigError::Invalid {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { coordinator })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(raw) = env::var_os(CONFIG_PATH_ENV)
        && !raw.is_empty()
    {
        return Some(PathBuf::from(raw));
    }
    dirs::home_dir().map(|home| home.join(".callgate").join("config.toml"))
}
