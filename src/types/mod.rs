//! Type definitions for the fraud command center

pub mod alert;
pub mod transaction;
pub mod verdict;

pub use alert::FraudAlert;
pub use transaction::{FeatureVector, LabeledSample, FEATURE_COUNT, FEATURE_NAMES};
pub use verdict::{ExplanationEntry, Verdict};
