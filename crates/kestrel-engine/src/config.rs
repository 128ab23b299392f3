//! Engine configuration loaded from `~/.kestrel/config.toml`.
//!
//! Configuration carries execution knobs, the default resilience policy
//! with per-tool overrides, and the manifest paths to preload. Credential
//! identifiers named in manifests resolve through the credential source at
//! call time; no secret value is ever stored here.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use kestrel_core::{Error, FailurePolicy, ResiliencePolicy, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::DEFAULT_MAX_CONCURRENT_STEPS;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    /// Tool manifest files or directories loaded at startup.
    ///
    /// Listed before the tables so TOML serialization emits it first.
    pub manifest_paths: Vec<PathBuf>,
    /// Executor knobs.
    pub execution: ExecutionConfig,
    /// Default resilience policy and per-tool overrides.
    pub resilience: ResilienceConfig,
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Cap on concurrently executing steps within a wave.
    pub max_concurrent_steps: usize,
    /// Behavior when a step fails mid-wave.
    pub on_step_failure: FailurePolicy,
    /// Replanning rounds allowed after a non-complete run.
    pub max_replans: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: DEFAULT_MAX_CONCURRENT_STEPS,
            on_step_failure: FailurePolicy::default(),
            max_replans: 2,
        }
    }
}

/// Resilience configuration: one default policy plus named overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Policy applied to tools without an override.
    #[serde(flatten)]
    pub default: ResiliencePolicy,
    /// Per-tool policy overrides, keyed by tool name.
    #[serde(default)]
    pub tools: HashMap<String, ResiliencePolicy>,
}

impl KestrelConfig {
    /// The configuration directory, `~/.kestrel`.
    ///
    /// # Errors
    /// Returns [`Error::Config`] when no home directory can be determined
    pub fn config_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|home| home.join(".kestrel"))
            .ok_or_else(|| Error::Config("Cannot determine home directory".to_owned()))
    }

    /// Loads `~/.kestrel/config.toml`, writing the default configuration
    /// there first when the file does not exist yet.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an undeterminable home directory and
    /// I/O or TOML errors for an unreadable or invalid file
    pub fn load_or_create() -> Result<Self> {
        let path = Self::config_dir()?.join("config.toml");
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            let config = Self::default();
            config.save_to_file(&path)?;
            info!("Wrote default configuration to '{}'", path.display());
            Ok(config)
        }
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns the underlying I/O error for an unreadable file and a TOML
    /// error for invalid contents
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Saves configuration to a TOML file, creating parent directories.
    ///
    /// # Errors
    /// Returns the underlying I/O error when the file cannot be written
    /// and a TOML error when serialization fails
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The effective resilience policy for a tool.
    #[must_use]
    pub fn policy_for(&self, tool: &str) -> &ResiliencePolicy {
        self.resilience
            .tools
            .get(tool)
            .unwrap_or(&self.resilience.default)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test code is allowed to use unwrap/expect"
)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = KestrelConfig::default();
        config.save_to_file(&path).unwrap();
        let loaded = KestrelConfig::load_from_file(&path).unwrap();

        assert_eq!(
            loaded.execution.max_concurrent_steps,
            DEFAULT_MAX_CONCURRENT_STEPS
        );
        assert_eq!(loaded.execution.max_replans, 2);
        assert_eq!(
            loaded.execution.on_step_failure,
            FailurePolicy::AbortRemainingWave
        );
        assert_eq!(loaded.resilience.default, ResiliencePolicy::default());
    }

    #[test]
    fn test_per_tool_override_parses() {
        let raw = r#"
            [execution]
            max_concurrent_steps = 8
            on_step_failure = "continue_independent_steps"

            [resilience]
            max_retries = 2

            [resilience.tools.get_weather]
            max_retries = 5
            timeout_ms = 2000
        "#;
        let config: KestrelConfig = toml::from_str(raw).unwrap();

        assert_eq!(config.execution.max_concurrent_steps, 8);
        assert_eq!(
            config.execution.on_step_failure,
            FailurePolicy::ContinueIndependentSteps
        );
        assert_eq!(config.policy_for("get_weather").max_retries, 5);
        assert_eq!(config.policy_for("get_weather").timeout_ms, 2000);
        assert_eq!(config.policy_for("calculator").max_retries, 2);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[execution]\nmax_concurrent_steps = \"many\"").unwrap();
        assert!(KestrelConfig::load_from_file(&path).is_err());
    }
}
