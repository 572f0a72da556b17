//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TURNSTILE_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Systematic testing configuration.
    pub testing: TestingConfig,
    /// Mailbox configuration.
    pub mailbox: MailboxConfig,
    /// Coverage configuration.
    pub coverage: CoverageConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TURNSTILE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.testing.apply_env_overrides();
        self.mailbox.apply_env_overrides();
        self.coverage.apply_env_overrides();
    }

    /// Rejects contradictory settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.testing.validate()?;
        self.mailbox.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Systematic testing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Consecutive hot liveness checks that count as a violation (0 = disabled).
    pub liveness_threshold: u64,
    /// Maximum scheduling steps per run (0 = unbounded).
    pub max_steps: u64,
    /// Stop the run at the first recorded bug.
    pub stop_on_first_bug: bool,
}

impl Default for TestingConfig {
    fn default() -> Self {
        Self {
            liveness_threshold: 0,
            max_steps: 10_000,
            stop_on_first_bug: true,
        }
    }
}

impl TestingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(threshold) = std::env::var("TURNSTILE_LIVENESS_THRESHOLD") {
            if let Ok(n) = threshold.parse() {
                self.liveness_threshold = n;
            }
        }

        if let Ok(steps) = std::env::var("TURNSTILE_MAX_STEPS") {
            if let Ok(n) = steps.parse() {
                self.max_steps = n;
            }
        }

        if let Ok(stop) = std::env::var("TURNSTILE_STOP_ON_FIRST_BUG") {
            self.stop_on_first_bug = stop == "1" || stop.to_lowercase() == "true";
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_steps > 0 && self.liveness_threshold > self.max_steps {
            return Err(ConfigError::ValidationError(format!(
                "liveness_threshold ({}) exceeds max_steps ({}), no violation could be reported",
                self.liveness_threshold, self.max_steps
            )));
        }
        Ok(())
    }

    /// Returns whether liveness checking is enabled.
    pub fn checks_liveness(&self) -> bool {
        self.liveness_threshold > 0
    }

    /// Returns the step bound, if any.
    pub fn step_limit(&self) -> Option<u64> {
        (self.max_steps > 0).then_some(self.max_steps)
    }
}

/// Mailbox configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// In-flight bound applied to sent events that declare none.
    pub default_max_in_flight: Option<usize>,
}

impl MailboxConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("TURNSTILE_MAX_IN_FLIGHT") {
            if max.is_empty() || max.to_lowercase() == "none" {
                self.default_max_in_flight = None;
            } else if let Ok(n) = max.parse() {
                self.default_max_in_flight = Some(n);
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_max_in_flight == Some(0) {
            return Err(ConfigError::ValidationError(
                "default_max_in_flight of 0 rejects every send".to_string(),
            ));
        }
        Ok(())
    }
}

/// Coverage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Record visited states and handled events.
    pub enabled: bool,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl CoverageConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("TURNSTILE_COVERAGE") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
