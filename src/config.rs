//! Configuration management for the fraud command center

use crate::models::explainer::ExplainerParams;
use crate::models::gbdt::BoostingParams;
use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub resampling: ResamplingConfig,
    #[serde(default)]
    pub explainer: ExplainerConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// NATS surface; absent means alerts stay local and `serve` is unavailable
    #[serde(default)]
    pub nats: Option<NatsConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Training corpus location
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// CSV file with a header row
    pub path: String,
    /// Binary label column
    #[serde(default = "default_label_column")]
    pub label_column: String,
}

fn default_label_column() -> String {
    "label".to_string()
}

/// Boosted tree ensemble settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub l2_regularization: f64,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let params = BoostingParams::default();
        Self {
            n_estimators: params.n_estimators,
            max_depth: params.max_depth,
            learning_rate: params.learning_rate,
            min_samples_leaf: params.min_samples_leaf,
            max_bins: params.max_bins,
            l2_regularization: params.l2_regularization,
            seed: params.seed,
        }
    }
}

impl ModelConfig {
    pub fn boosting_params(&self) -> BoostingParams {
        BoostingParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            min_samples_leaf: self.min_samples_leaf,
            max_bins: self.max_bins,
            l2_regularization: self.l2_regularization,
            seed: self.seed,
        }
    }
}

/// Minority oversampling settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResamplingConfig {
    pub k_neighbors: usize,
    pub seed: u64,
}

impl Default for ResamplingConfig {
    fn default() -> Self {
        Self {
            k_neighbors: 5,
            seed: 42,
        }
    }
}

/// Local explanation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// Perturbed samples per explanation
    pub num_samples: usize,
    /// Default number of features returned
    pub top_k: usize,
    /// Kernel width (default `0.75 * sqrt(n_features)`)
    pub kernel_width: Option<f64>,
    /// Fixed seed for reproducible explanations
    pub seed: Option<u64>,
    /// Repetitions used by the stability check
    pub stability_runs: usize,
    /// Max weight spread tolerated across repetitions
    pub stability_tolerance: f64,
    /// Deadline for one explanation in milliseconds
    pub timeout_ms: Option<u64>,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            num_samples: 5000,
            top_k: 10,
            kernel_width: None,
            seed: None,
            stability_runs: 3,
            stability_tolerance: 0.05,
            timeout_ms: None,
        }
    }
}

impl ExplainerConfig {
    pub fn explainer_params(&self) -> ExplainerParams {
        ExplainerParams {
            num_samples: self.num_samples,
            kernel_width: self.kernel_width,
            seed: self.seed,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Replay monitor settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Delay between replayed transactions
    pub interval_ms: u64,
    /// Flagged alerts kept in memory (oldest evicted)
    pub alert_capacity: usize,
    /// Stop after this many transactions (unbounded when absent)
    pub max_transactions: Option<u64>,
    /// Seconds between metrics summaries
    pub report_interval_secs: u64,
    /// Seed for row sampling
    pub seed: Option<u64>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            alert_capacity: 10,
            max_transactions: None,
            report_interval_secs: 30,
            seed: None,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming scoring requests
    #[serde(default = "default_request_subject")]
    pub request_subject: String,
    /// Subject for outgoing fraud alerts
    #[serde(default = "default_alert_subject")]
    pub alert_subject: String,
    /// Concurrent request handlers
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_request_subject() -> String {
    "fraud.score".to_string()
}

fn default_alert_subject() -> String {
    "fraud.alerts".to_string()
}

fn default_workers() -> usize {
    4
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig {
                path: "bank_fraud_dataset.csv".to_string(),
                label_column: default_label_column(),
            },
            model: ModelConfig::default(),
            resampling: ResamplingConfig::default(),
            explainer: ExplainerConfig::default(),
            monitor: MonitorConfig::default(),
            nats: None,
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.dataset.label_column, "label");
        assert_eq!(config.model.n_estimators, 200);
        assert_eq!(config.model.max_depth, 10);
        assert_eq!(config.model.seed, 42);
        assert_eq!(config.resampling.seed, 42);
        assert_eq!(config.explainer.top_k, 10);
        assert_eq!(config.monitor.interval(), Duration::from_secs(2));
        assert!(config.nats.is_none());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[dataset]
path = "data.csv"

[model]
n_estimators = 50

[nats]
url = "nats://localhost:4222"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.dataset.path, "data.csv");
        assert_eq!(config.dataset.label_column, "label");
        assert_eq!(config.model.n_estimators, 50);
        assert_eq!(config.model.max_depth, 10);
        let nats = config.nats.unwrap();
        assert_eq!(nats.alert_subject, "fraud.alerts");
        assert_eq!(nats.workers, 4);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load_from_path("does/not/exist.toml").is_err());
    }
}
