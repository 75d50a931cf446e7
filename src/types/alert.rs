//! Fraud alert data structures

use crate::types::transaction::FeatureVector;
use crate::types::verdict::Verdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Alert raised when a replayed transaction is classified as fraud
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Unique alert identifier
    pub alert_id: String,

    /// Row of the replayed corpus that produced the alert
    pub row_index: usize,

    /// Alert generation timestamp
    pub timestamp: DateTime<Utc>,

    /// Age on network (days)
    pub aon: f64,

    /// Main account recharge amount over 30 days
    pub sumamnt_ma_rech30: f64,

    /// Loan amount over 30 days
    pub amnt_loans30: f64,

    /// Confidence of the fraud verdict
    pub confidence: f64,
}

impl FraudAlert {
    /// Create a new fraud alert
    pub fn new(row_index: usize, transaction: &FeatureVector, verdict: &Verdict) -> Self {
        Self {
            alert_id: uuid::Uuid::new_v4().to_string(),
            row_index,
            timestamp: Utc::now(),
            aon: transaction.get("aon").unwrap_or_default(),
            sumamnt_ma_rech30: transaction.get("sumamnt_ma_rech30").unwrap_or_default(),
            amnt_loans30: transaction.get("amnt_loans30").unwrap_or_default(),
            confidence: verdict.confidence,
        }
    }

    /// Wall-clock time of the alert as `HH:MM:SS`
    pub fn clock_time(&self) -> String {
        self.timestamp.format("%H:%M:%S").to_string()
    }
}
