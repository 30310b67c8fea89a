//! Agent configuration (hotswap.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable overriding [`AgentConfig::dump_directory`]
pub const DUMP_DIR_ENV: &str = "HOTSWAP_DUMP_DIR";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Directory for failure dumps (default: the platform temp directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dump_directory: Option<PathBuf>,

    /// File extension of dumped binaries (default: "class")
    pub dump_extension: String,

    /// Retrofit owning scopes on first touch (default: true)
    pub retrofit_scopes: bool,

    /// Sweep unreachable scopes on every registry add (default: true)
    pub sweep_on_add: bool,
}

fn default_dump_extension() -> String {
    "class".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            dump_directory: None,
            dump_extension: default_dump_extension(),
            retrofit_scopes: true,
            sweep_on_add: true,
        }
    }
}

impl AgentConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HOTSWAP_DUMP_DIR` when set and non-empty
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var_os(DUMP_DIR_ENV).filter(|d| !d.is_empty()) {
            self.dump_directory = Some(PathBuf::from(dir));
        }
        self
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dump_extension.is_empty() {
            return Err(ConfigError::ValidationError(
                "dump_extension cannot be empty".to_string(),
            ));
        }
        if self
            .dump_extension
            .contains(|c: char| c == '.' || std::path::is_separator(c))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid dump_extension: {}. Must not contain dots or path separators",
                self.dump_extension
            )));
        }
        Ok(())
    }

    /// Directory failure dumps are written to
    pub fn effective_dump_directory(&self) -> PathBuf {
        self.dump_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
