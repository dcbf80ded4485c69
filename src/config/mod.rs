//! Services configuration: defaults, validation, and deep merge.
//!
//! Every core service reads its settings from [`ServicesConfig`]. User input
//! arrives as a partial [`ServicesConfigUpdate`] (any subset of fields),
//! is validated against the rules below, then deep-merged over the built-in
//! defaults. Scalars overwrite; the ignore/allow/deny list fields append to
//! the defaults instead of replacing them.

use crate::compression::CompressionStrategy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Directory for persisted session data.
    pub data_dir: PathBuf,
    /// Maximum number of retained sessions.
    pub max_sessions: u32,
    pub auto_save: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompressionConfig {
    pub enabled: bool,
    /// Fraction of the context window that triggers compression.
    pub threshold: f64,
    pub strategy: CompressionStrategy,
    /// Tokens of recent history protected from compression.
    pub preserve_recent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoopDetectionConfig {
    pub enabled: bool,
    pub max_turns: u32,
    pub repeat_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileDiscoveryConfig {
    pub max_depth: u32,
    pub follow_symlinks: bool,
    pub builtin_ignores: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvironmentConfig {
    pub allow_list: Vec<String>,
    pub deny_patterns: Vec<String>,
}

/// Environment-variable sanitization settings, projected for its consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SanitizationConfig {
    pub allow_list: Vec<String>,
    pub deny_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServicesConfig {
    pub session: SessionConfig,
    pub compression: CompressionConfig,
    pub loop_detection: LoopDetectionConfig,
    pub file_discovery: FileDiscoveryConfig,
    pub environment: EnvironmentConfig,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig {
                data_dir: ollm_config_dir().join("session-data"),
                max_sessions: 100,
                auto_save: true,
            },
            compression: CompressionConfig {
                enabled: true,
                threshold: 0.8,
                strategy: CompressionStrategy::Hybrid,
                preserve_recent: 4096,
            },
            loop_detection: LoopDetectionConfig {
                enabled: true,
                max_turns: 50,
                repeat_threshold: 3,
            },
            file_discovery: FileDiscoveryConfig {
                max_depth: 10,
                follow_symlinks: false,
                builtin_ignores: ["node_modules", ".git", "dist", "build", ".next", ".cache"]
                    .map(String::from)
                    .to_vec(),
            },
            environment: EnvironmentConfig {
                allow_list: ["PATH", "HOME", "USER", "SHELL", "TERM", "LANG"]
                    .map(String::from)
                    .to_vec(),
                deny_patterns: [
                    "*_KEY",
                    "*_SECRET",
                    "*_TOKEN",
                    "*_PASSWORD",
                    "*_CREDENTIAL",
                    "AWS_*",
                    "GITHUB_*",
                ]
                .map(String::from)
                .to_vec(),
            },
        }
    }
}

impl ServicesConfig {
    /// Validate a partial update, then deep-merge it over the defaults.
    pub fn merged(update: &ServicesConfigUpdate) -> Result<Self, ConfigError> {
        update.validate()?;
        let mut config = Self::default();
        config.apply(update);
        Ok(config)
    }

    /// Load from the user config file, falling back to defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = ollm_config_dir().join("config.toml");
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let update = ServicesConfigUpdate::from_toml_str(&content)?;
        Self::merged(&update)
    }

    /// Loop-detection settings for the turn loop.
    #[must_use]
    pub fn loop_detection(&self) -> LoopDetectionConfig {
        self.loop_detection.clone()
    }

    /// Environment sanitization settings for the env filter.
    #[must_use]
    pub fn sanitization(&self) -> SanitizationConfig {
        SanitizationConfig {
            allow_list: self.environment.allow_list.clone(),
            deny_patterns: self.environment.deny_patterns.clone(),
        }
    }

    /// Deep-merge `update` into `self`. Assumes the update already validated.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)] // ranges checked in validate
    fn apply(&mut self, update: &ServicesConfigUpdate) {
        if let Some(session) = &update.session {
            if let Some(dir) = &session.data_dir {
                self.session.data_dir = PathBuf::from(dir);
            }
            if let Some(max) = session.max_sessions {
                self.session.max_sessions = max as u32;
            }
            if let Some(auto_save) = session.auto_save {
                self.session.auto_save = auto_save;
            }
        }
        if let Some(compression) = &update.compression {
            if let Some(enabled) = compression.enabled {
                self.compression.enabled = enabled;
            }
            if let Some(threshold) = compression.threshold {
                self.compression.threshold = threshold;
            }
            if let Some(strategy) = compression.strategy {
                self.compression.strategy = strategy;
            }
            if let Some(preserve) = compression.preserve_recent {
                self.compression.preserve_recent = preserve as usize;
            }
        }
        if let Some(loop_detection) = &update.loop_detection {
            if let Some(enabled) = loop_detection.enabled {
                self.loop_detection.enabled = enabled;
            }
            if let Some(max_turns) = loop_detection.max_turns {
                self.loop_detection.max_turns = max_turns as u32;
            }
            if let Some(repeat) = loop_detection.repeat_threshold {
                self.loop_detection.repeat_threshold = repeat as u32;
            }
        }
        if let Some(file_discovery) = &update.file_discovery {
            if let Some(max_depth) = file_discovery.max_depth {
                self.file_discovery.max_depth = max_depth as u32;
            }
            if let Some(follow) = file_discovery.follow_symlinks {
                self.file_discovery.follow_symlinks = follow;
            }
            if let Some(ignores) = &file_discovery.builtin_ignores {
                self.file_discovery
                    .builtin_ignores
                    .extend(ignores.iter().cloned());
            }
        }
        if let Some(environment) = &update.environment {
            if let Some(allow) = &environment.allow_list {
                self.environment.allow_list.extend(allow.iter().cloned());
            }
            if let Some(deny) = &environment.deny_patterns {
                self.environment.deny_patterns.extend(deny.iter().cloned());
            }
        }
    }
}

/// Partial configuration as supplied by the host. Any subset of fields;
/// unknown fields are rejected at parse time.
///
/// Integer fields are deserialized signed so out-of-range values reach
/// [`ServicesConfigUpdate::validate`] instead of failing opaquely in serde.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesConfigUpdate {
    pub session: Option<SessionUpdate>,
    pub compression: Option<CompressionUpdate>,
    pub loop_detection: Option<LoopDetectionUpdate>,
    pub file_discovery: Option<FileDiscoveryUpdate>,
    pub environment: Option<EnvironmentUpdate>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionUpdate {
    pub data_dir: Option<String>,
    pub max_sessions: Option<i64>,
    pub auto_save: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressionUpdate {
    pub enabled: Option<bool>,
    pub threshold: Option<f64>,
    pub strategy: Option<CompressionStrategy>,
    pub preserve_recent: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopDetectionUpdate {
    pub enabled: Option<bool>,
    pub max_turns: Option<i64>,
    pub repeat_threshold: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileDiscoveryUpdate {
    pub max_depth: Option<i64>,
    pub follow_symlinks: Option<bool>,
    pub builtin_ignores: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentUpdate {
    pub allow_list: Option<Vec<String>>,
    pub deny_patterns: Option<Vec<String>>,
}

impl ServicesConfigUpdate {
    /// Parse from TOML. Shape errors (unknown fields, wrong types,
    /// non-enum strategy) are invalid configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Parse from a JSON value, as handed over by the host.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigError> {
        serde_json::from_value(value).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(session) = &self.session {
            if let Some(dir) = &session.data_dir
                && dir.is_empty()
            {
                return Err(ConfigError::Invalid(
                    "session.data_dir must be non-empty".to_string(),
                ));
            }
            if let Some(max) = session.max_sessions {
                check_integer("session.max_sessions", max, 1)?;
            }
        }
        if let Some(compression) = &self.compression {
            if let Some(threshold) = compression.threshold
                && !(0.0..=1.0).contains(&threshold)
            {
                return Err(ConfigError::Invalid(format!(
                    "compression.threshold must be within [0, 1], got {threshold}"
                )));
            }
            if let Some(preserve) = compression.preserve_recent {
                check_integer("compression.preserve_recent", preserve, 0)?;
            }
        }
        if let Some(loop_detection) = &self.loop_detection {
            if let Some(max_turns) = loop_detection.max_turns {
                check_integer("loop_detection.max_turns", max_turns, 1)?;
            }
            if let Some(repeat) = loop_detection.repeat_threshold {
                check_integer("loop_detection.repeat_threshold", repeat, 1)?;
            }
        }
        if let Some(file_discovery) = &self.file_discovery
            && let Some(max_depth) = file_discovery.max_depth
        {
            check_integer("file_discovery.max_depth", max_depth, 0)?;
        }
        Ok(())
    }
}

fn check_integer(field: &str, value: i64, min: i64) -> Result<(), ConfigError> {
    if value < min || value > i64::from(u32::MAX) {
        return Err(ConfigError::Invalid(format!(
            "{field} must be an integer >= {min}, got {value}"
        )));
    }
    Ok(())
}

/// Assistant config directory: ~/.ollm/
#[must_use]
pub fn ollm_config_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".ollm"), |h| h.join(".ollm"))
}
