//! Service configuration
//!
//! Built once at startup from an optional TOML file layered under environment
//! variables (`ANALYSIS__SCHEDULER__INTERVAL_MS=60000`, ...), then handed to
//! each component's constructor. Every field has a default.

use crate::baseline::BaselineAgentConfig;
use crate::executor::ExecutorConfig;
use crate::sentiment::SentimentAgentConfig;
use anyhow::{Context, Result};
use common::MarketContext;
use config::{Config, Environment, File};
use monitoring::{EvolutionConfig, HealthConfig};
use serde::Deserialize;
use signal_generation::{FusionConfig, StorageConfig};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/analysis.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Time between cycle starts in milliseconds
    pub interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_ms: 300_000 }
    }
}

/// Which reference producers make up the roster
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub baseline: BaselineAgentConfig,
    pub sentiment: SentimentAgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// trace, debug, info, warn or error
    pub log_level: String,
    pub scheduler: SchedulerConfig,
    pub executor: ExecutorConfig,
    pub fusion: FusionConfig,
    pub evolution: EvolutionConfig,
    pub health: HealthConfig,
    pub storage: StorageConfig,
    pub agents: AgentsConfig,
    /// Markets analyzed every cycle
    pub markets: Vec<MarketContext>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            fusion: FusionConfig::default(),
            evolution: EvolutionConfig::default(),
            health: HealthConfig::default(),
            storage: StorageConfig::default(),
            agents: AgentsConfig::default(),
            markets: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Load from `path` (missing file is fine) and `ANALYSIS__*` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let settings = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("ANALYSIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse configuration from a TOML string, without environment overrides
    pub fn from_toml(contents: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::from_str(contents, config::FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.scheduler.interval_ms, 300_000);
        assert_eq!(config.executor.timeout_ms, 120_000);
        assert_eq!(config.fusion.divergence_threshold, 0.7);
        assert_eq!(config.evolution.history_limit, 10);
        assert_eq!(config.health.bind_addr.port(), 8080);
        assert_eq!(config.storage.retention, 1_000);
        assert!(config.agents.baseline.enabled);
        assert!(config.markets.is_empty());
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = ServiceConfig::load("does/not/exist.toml").unwrap();
        assert_eq!(config.executor.timeout_ms, 120_000);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            log_level = "debug"

            [scheduler]
            interval_ms = 60000

            [storage]
            retention = 50

            [fusion.base_weights]
            baseline = 0.5
            sentiment = 1.5

            [[markets]]
            market_id = "m1"
            question = "Will it rain tomorrow?"
            baseline_probability = 0.3
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.interval_ms, 60_000);
        assert_eq!(config.storage.retention, 50);
        assert_eq!(config.executor.timeout_ms, 120_000);
        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.markets.len(), 1);
        assert_eq!(config.markets[0].baseline_probability, 0.3);

        let weights = config.fusion.base_weights.unwrap();
        assert_eq!(weights["sentiment"].as_f64(), Some(1.5));
    }

    #[test]
    fn test_malformed_weight_table_still_loads() {
        let config = ServiceConfig::from_toml(
            r#"
            [fusion]
            base_weights = "not a table"
            "#,
        )
        .unwrap();

        assert!(config.fusion.base_weights.unwrap().is_string());
    }
}
