//! Replay monitor: scores historical rows on a fixed cadence and keeps a
//! short log of flagged transactions.

use crate::config::MonitorConfig;
use crate::dataset::Corpus;
use crate::metrics::MonitorStats;
use crate::producer::AlertProducer;
use crate::scoring::ScoringService;
use crate::types::alert::FraudAlert;
use crate::types::verdict::Verdict;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Bounded log of recent alerts. The oldest entry is evicted when full.
#[derive(Debug, Clone)]
pub struct AlertLog {
    capacity: usize,
    alerts: VecDeque<FraudAlert>,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            alerts: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an alert, returning the evicted one if the log was full.
    pub fn push(&mut self, alert: FraudAlert) -> Option<FraudAlert> {
        let evicted = if self.alerts.len() == self.capacity {
            self.alerts.pop_front()
        } else {
            None
        };
        self.alerts.push_back(alert);
        evicted
    }

    /// Alerts newest first
    pub fn recent(&self) -> Vec<FraudAlert> {
        self.alerts.iter().rev().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Result of replaying one row
#[derive(Debug, Clone)]
pub struct ReplayOutcome {
    pub row_index: usize,
    pub verdict: Verdict,
    pub alert: Option<FraudAlert>,
}

/// State of a monitor when it stops
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub total: u64,
    pub flagged: u64,
    pub fraud_rate_pct: f64,
    /// Newest first
    pub recent_alerts: Vec<FraudAlert>,
}

pub struct ReplayMonitor {
    service: ScoringService,
    corpus: Corpus,
    stats: Arc<MonitorStats>,
    alerts: AlertLog,
    producer: Option<AlertProducer>,
    rng: StdRng,
    interval: Duration,
    max_transactions: Option<u64>,
}

impl ReplayMonitor {
    pub fn new(service: ScoringService, corpus: Corpus, config: &MonitorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            service,
            corpus,
            stats: Arc::new(MonitorStats::new()),
            alerts: AlertLog::new(config.alert_capacity),
            producer: None,
            rng,
            // A zero period is not a valid tokio interval.
            interval: config.interval().max(Duration::from_millis(1)),
            max_transactions: config.max_transactions,
        }
    }

    /// Publish every alert through `producer` as well as logging it locally
    pub fn with_producer(mut self, producer: AlertProducer) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Shared handle for a [`crate::metrics::MetricsReporter`]
    pub fn stats(&self) -> Arc<MonitorStats> {
        self.stats.clone()
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Score one uniformly drawn row. `None` only for an empty corpus.
    pub fn replay_one(&mut self) -> Option<ReplayOutcome> {
        if self.corpus.is_empty() {
            return None;
        }
        let row_index = self.rng.gen_range(0..self.corpus.len());
        let vector = self.corpus.row(row_index)?;

        let started = Instant::now();
        let verdict = self.service.score(&vector);
        let elapsed = started.elapsed();
        self.stats
            .record_transaction(elapsed, verdict.confidence, verdict.is_fraud);

        let alert = if verdict.is_fraud {
            let alert = FraudAlert::new(row_index, &vector, &verdict);
            info!(
                alert_id = %alert.alert_id,
                row_index,
                time = %alert.clock_time(),
                aon = alert.aon,
                sumamnt_ma_rech30 = alert.sumamnt_ma_rech30,
                amnt_loans30 = alert.amnt_loans30,
                confidence = verdict.confidence,
                "Fraud detected"
            );
            self.alerts.push(alert.clone());
            Some(alert)
        } else {
            debug!(
                row_index,
                confidence = verdict.confidence,
                processing_time_us = elapsed.as_micros() as u64,
                "Transaction cleared"
            );
            None
        };

        Some(ReplayOutcome {
            row_index,
            verdict,
            alert,
        })
    }

    /// Replay until `shutdown` becomes true, its sender is dropped, or the
    /// transaction limit is reached.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> MonitorSnapshot {
        info!(
            rows = self.corpus.len(),
            interval_ms = self.interval.as_millis() as u64,
            max_transactions = ?self.max_transactions,
            "Replay monitor started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            if self
                .max_transactions
                .is_some_and(|max| self.stats.total() >= max)
            {
                info!("Transaction limit reached");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    let Some(outcome) = self.replay_one() else {
                        warn!("Corpus is empty, nothing to replay");
                        break;
                    };
                    if let (Some(alert), Some(producer)) = (&outcome.alert, &self.producer) {
                        if let Err(e) = producer.publish(alert).await {
                            error!(alert_id = %alert.alert_id, error = %e, "Failed to publish fraud alert");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        let snapshot = self.snapshot();
        info!(
            total = snapshot.total,
            flagged = snapshot.flagged,
            fraud_rate_pct = snapshot.fraud_rate_pct,
            "Replay monitor stopped"
        );
        snapshot
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            total: self.stats.total(),
            flagged: self.stats.flagged(),
            fraud_rate_pct: self.stats.fraud_rate(),
            recent_alerts: self.alerts.recent(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::builder::fixtures::{quick_builder, skewed_rows, tiny_dataset};
    use crate::types::transaction::FeatureVector;

    fn alert(row_index: usize) -> FraudAlert {
        FraudAlert::new(
            row_index,
            &FeatureVector::zeros(),
            &Verdict::from_fraud_probability(0.9),
        )
    }

    fn monitor(config: &MonitorConfig) -> ReplayMonitor {
        let built = quick_builder().build(&tiny_dataset(&skewed_rows())).unwrap();
        ReplayMonitor::new(ScoringService::from_built(&built), built.corpus, config)
    }

    fn fast_config(max_transactions: Option<u64>) -> MonitorConfig {
        MonitorConfig {
            interval_ms: 1,
            max_transactions,
            seed: Some(3),
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn test_alert_log_evicts_oldest() {
        let mut log = AlertLog::new(3);
        for i in 0..3 {
            assert!(log.push(alert(i)).is_none());
        }
        let evicted = log.push(alert(3)).unwrap();
        assert_eq!(evicted.row_index, 0);
        assert_eq!(log.len(), 3);

        let rows: Vec<usize> = log.recent().iter().map(|a| a.row_index).collect();
        assert_eq!(rows, vec![3, 2, 1]);
    }

    #[test]
    fn test_alert_log_zero_capacity_keeps_one() {
        let mut log = AlertLog::new(0);
        log.push(alert(1));
        log.push(alert(2));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.recent()[0].row_index, 2);
    }

    #[test]
    fn test_replay_one_records_stats() {
        let mut monitor = monitor(&fast_config(None));
        let mut flagged = 0;
        for _ in 0..20 {
            let outcome = monitor.replay_one().unwrap();
            assert!(outcome.row_index < 40);
            assert!(outcome.verdict.confidence >= 0.5);
            assert_eq!(outcome.alert.is_some(), outcome.verdict.is_fraud);
            if outcome.verdict.is_fraud {
                flagged += 1;
            }
        }
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total, 20);
        assert_eq!(snapshot.flagged, flagged);
        assert_eq!(snapshot.recent_alerts.len(), (flagged as usize).min(10));
    }

    #[tokio::test]
    async fn test_run_stops_at_limit() {
        let (_tx, rx) = watch::channel(false);
        let snapshot = monitor(&fast_config(Some(5))).run(rx).await;
        assert_eq!(snapshot.total, 5);
        assert!(snapshot.flagged <= 5);
    }

    #[tokio::test]
    async fn test_run_honours_shutdown() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let snapshot = monitor(&fast_config(None)).run(rx).await;
        assert_eq!(snapshot.total, 0);
    }

    #[tokio::test]
    async fn test_run_stops_when_signalled_mid_flight() {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(monitor(&fast_config(None)).run(rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        let snapshot = handle.await.unwrap();
        assert!(snapshot.total >= 1);
    }
}
