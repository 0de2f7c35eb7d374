//! Configuration management for Siphon
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SIPHON_* prefix, highest precedence)
//! 2. siphon.local.toml (gitignored, local overrides)
//! 3. siphon.toml (git-tracked, connector config)
//! 4. ~/.config/siphon/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Siphon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiphonConfig {
    pub connector: ConnectorSettings,
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub filter: FilterConfig,
    pub pipeline: PipelineSettings,
    pub retry: RetrySettings,
    pub checkpoints: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Subscription id; also names the connector in logs.
    pub connector_id: String,
    pub service_name: String,
    pub diagnostics: DiagnosticsConfig,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connector_id: "default".to_string(),
            service_name: "siphon-connector".to_string(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub enabled: bool,
    /// Default log directive; `RUST_LOG` still wins when set.
    pub log_level: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// JSON-lines file of source events.
    pub path: PathBuf,
    /// Global position to subscribe from; absent means start of the log.
    pub from_position: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("events.jsonl"),
            from_position: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// JSON-lines file operations are appended to.
    pub path: PathBuf,
    pub index_name: String,
    pub mode: TargetMode,
    pub transform: TransformKind,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("operations.jsonl"),
            index_name: "events".to_string(),
            mode: TargetMode::Create,
            transform: TransformKind::Index,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TargetMode {
    Create,
    Upsert,
    Delete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    /// Wrap each event in a document describing the persisted event.
    Index,
    /// Forward payload bytes untouched.
    Passthrough,
}

/// Event type filter applied before the transform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// When non-empty, only these event types are produced.
    pub include_types: Vec<String>,
    pub exclude_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub concurrency_limit: usize,
    /// Wait for each produce to be confirmed before reading the next event.
    pub await_produce: bool,
    /// In-flight bound per partition when `await_produce` is false.
    pub max_in_flight: usize,
    pub queue_capacity: usize,
    pub shutdown_grace_ms: u64,
    pub resubscribe_delay_ms: u64,
    /// How often the subscription watermark is saved during a run.
    pub watermark_interval_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: 1,
            await_produce: true,
            max_in_flight: 64,
            queue_capacity: 256,
            shutdown_grace_ms: 5_000,
            resubscribe_delay_ms: 1_000,
            watermark_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    pub directory: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".siphon/checkpoints"),
        }
    }
}

impl SiphonConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.source.path.is_relative() {
            self.source.path = base.join(&self.source.path);
        }

        if self.target.path.is_relative() {
            self.target.path = base.join(&self.target.path);
        }

        if self.checkpoints.directory.is_relative() {
            self.checkpoints.directory = base.join(&self.checkpoints.directory);
        }
    }

    /// Checks values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connector.connector_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connector.connector_id must not be empty".to_string(),
            ));
        }
        if self.target.index_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "target.index_name must not be empty".to_string(),
            ));
        }
        if self.pipeline.concurrency_limit == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.concurrency_limit must be >= 1".to_string(),
            ));
        }
        if self.pipeline.max_in_flight == 0 || self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_in_flight and pipeline.queue_capacity must be >= 1".to_string(),
            ));
        }
        if self.pipeline.watermark_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.watermark_interval_ms must be >= 1".to_string(),
            ));
        }
        if self.retry.enabled {
            if self.retry.max_attempts == 0 {
                return Err(ConfigError::ValidationError(
                    "retry.max_attempts must be >= 1".to_string(),
                ));
            }
            if self.retry.multiplier < 1.0 {
                return Err(ConfigError::ValidationError(format!(
                    "retry.multiplier must be >= 1.0, got {}",
                    self.retry.multiplier
                )));
            }
            if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
                return Err(ConfigError::ValidationError(
                    "retry.max_backoff_ms must be >= retry.initial_backoff_ms".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SiphonConfig::default();
        assert_eq!(config.connector.connector_id, "default");
        assert_eq!(config.pipeline.concurrency_limit, 1);
        assert!(config.pipeline.await_produce);
        assert!(config.retry.enabled);
        assert_eq!(config.target.mode, TargetMode::Create);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_path_resolution() {
        let mut config = SiphonConfig::default();
        config.resolve_paths("/srv/connector");

        assert_eq!(config.source.path, PathBuf::from("/srv/connector/events.jsonl"));
        assert_eq!(
            config.checkpoints.directory,
            PathBuf::from("/srv/connector/.siphon/checkpoints")
        );
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let mut config = SiphonConfig::default();
        config.pipeline.concurrency_limit = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("concurrency_limit"));
    }

    #[test]
    fn test_validation_rejects_empty_index() {
        let mut config = SiphonConfig::default();
        config.target.index_name = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_ignores_retry_when_disabled() {
        let mut config = SiphonConfig::default();
        config.retry.enabled = false;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_ok());

        config.retry.enabled = true;
        assert!(config.validate().is_err());
    }
}
