//! Runtime configuration
//!
//! Settings come from an optional TOML file, then command-line flags, then
//! the `PASMHON_NO_JIT` environment variable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of calls before a function is compiled
const DEFAULT_CALL_THRESHOLD: u32 = 1000;
/// Default number of loop back edges before a loop is compiled
const DEFAULT_LOOP_THRESHOLD: u32 = 1000;
/// Default frame stack depth
const DEFAULT_MAX_FRAMES: usize = 1000;

/// Environment variable that turns the JIT off when set to `1`
pub const NO_JIT_ENV: &str = "PASMHON_NO_JIT";

/// Errors from loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// JIT settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    pub enabled: bool,
    /// Calls before a function is compiled
    pub call_threshold: u32,
    /// Back edges before a loop is compiled on stack
    pub loop_threshold: u32,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            call_threshold: DEFAULT_CALL_THRESHOLD,
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
        }
    }
}

/// Interpreter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Frames allowed before `RecursionError`
    pub max_frames: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }
}

/// Module search settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Searched after the importing file's directory
    pub search_paths: Vec<PathBuf>,
}

/// Everything the VM can be configured with
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub jit: JitConfig,
    pub vm: VmConfig,
    pub import: ImportConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply `PASMHON_NO_JIT`
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var(NO_JIT_ENV).is_ok_and(|v| v == "1") {
            self.jit.enabled = false;
        }
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vm.max_frames == 0 {
            return Err(ConfigError::Invalid("vm.max_frames must be at least 1".to_string()));
        }
        if self.jit.call_threshold == 0 || self.jit.loop_threshold == 0 {
            return Err(ConfigError::Invalid("jit thresholds must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert!(config.jit.enabled);
        assert_eq!(config.jit.call_threshold, 1000);
        assert_eq!(config.jit.loop_threshold, 1000);
        assert_eq!(config.vm.max_frames, 1000);
        assert!(config.import.search_paths.is_empty());
    }

    #[test]
    fn partial_tables_keep_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [jit]
            call_threshold = 5

            [import]
            search_paths = ["lib"]
            "#,
        )
        .unwrap();
        assert_eq!(config.jit.call_threshold, 5);
        assert_eq!(config.jit.loop_threshold, 1000);
        assert!(config.jit.enabled);
        assert_eq!(config.import.search_paths, vec![PathBuf::from("lib")]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[jit]\nturbo = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_frame_limit_is_invalid() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[vm]\nmax_frames = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = RuntimeConfig::from_file(Path::new("/nonexistent/pasmhon.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pasmhon.toml"));
    }
}
