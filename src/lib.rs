//! Fraud Command Center Library
//!
//! Trains a gradient-boosted fraud classifier on a historical corpus,
//! scores transactions against it, explains individual verdicts with a
//! local surrogate model, and replays the corpus as a live alert stream.

pub mod config;
pub mod consumer;
pub mod dataset;
pub mod error;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod producer;
pub mod scoring;
pub mod types;

pub use config::AppConfig;
pub use consumer::{ScoreReply, ScoreRequest, ScoreRequestConsumer, WorkerPool};
pub use dataset::{Corpus, Dataset};
pub use error::{BuildError, DataError, InputShapeError, ScoringError};
pub use models::{BuiltModel, ModelBuilder};
pub use monitor::{AlertLog, MonitorSnapshot, ReplayMonitor};
pub use producer::AlertProducer;
pub use scoring::ScoringService;
pub use types::{alert::FraudAlert, transaction::FeatureVector, verdict::Verdict};
