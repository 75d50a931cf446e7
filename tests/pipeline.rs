//! End-to-end build, score and explain on a synthetic imbalanced corpus.

use fraud_command_center::config::AppConfig;
use fraud_command_center::models::{BoostingParams, BuiltModel, ExplainerParams, ModelBuilder};
use fraud_command_center::types::transaction::{feature_index, FEATURE_COUNT, FEATURE_NAMES};
use fraud_command_center::{DataError, Dataset, FeatureVector, ScoringError, ScoringService};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::io::Write;
use std::sync::OnceLock;
use std::time::Duration;

const ROWS: usize = 1000;
const FRAUD_EVERY: usize = 20;

/// Fraud rows have a young account and a large loan amount.
fn synthetic_row(rng: &mut StdRng, fraud: bool) -> [f64; FEATURE_COUNT] {
    let mut values = [0.0; FEATURE_COUNT];
    for v in values.iter_mut() {
        *v = rng.gen_range(0.0..100.0);
    }
    let aon = feature_index("aon").unwrap();
    let loans = feature_index("amnt_loans30").unwrap();
    if fraud {
        values[aon] = rng.gen_range(5.0..60.0);
        values[loans] = rng.gen_range(400.0..600.0);
    } else {
        values[aon] = rng.gen_range(300.0..3000.0);
        values[loans] = rng.gen_range(0.0..120.0);
    }
    values
}

/// Pandas-style export: unnamed index column, label, then features.
fn write_corpus() -> tempfile::NamedTempFile {
    let mut rng = StdRng::seed_from_u64(2024);
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, ",label,{}", FEATURE_NAMES.join(",")).unwrap();
    for i in 0..ROWS {
        let fraud = i % FRAUD_EVERY == 0;
        let values = synthetic_row(&mut rng, fraud);
        let cells: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
        writeln!(file, "{},{},{}", i, u8::from(fraud), cells.join(",")).unwrap();
    }
    file.flush().unwrap();
    file
}

fn builder() -> ModelBuilder {
    ModelBuilder::new(&AppConfig::default())
        .with_boosting(BoostingParams {
            n_estimators: 30,
            max_depth: 4,
            ..BoostingParams::default()
        })
        .with_explainer(ExplainerParams {
            num_samples: 500,
            kernel_width: None,
            seed: Some(11),
        })
}

fn built() -> &'static BuiltModel {
    static BUILT: OnceLock<BuiltModel> = OnceLock::new();
    BUILT.get_or_init(|| {
        let file = write_corpus();
        let dataset = Dataset::from_csv(file.path()).unwrap();
        builder().build(&dataset).unwrap()
    })
}

fn service() -> ScoringService {
    ScoringService::from_built(built())
}

fn fraud_like() -> FeatureVector {
    let mut rng = StdRng::seed_from_u64(99);
    FeatureVector::from_slice(&synthetic_row(&mut rng, true)).unwrap()
}

#[test]
fn test_resampling_balances_classes() {
    let report = &built().report;
    assert_eq!(report.original_rows, ROWS);
    assert_eq!(report.class_counts_before, (950, 50));
    assert_eq!(report.class_counts_after, (950, 950));
    assert_eq!(report.resampled_rows, 1900);
}

#[test]
fn test_scaler_standardizes_training_data() {
    let built = built();
    let scaled = built
        .model
        .scaler()
        .transform(built.resampled.features())
        .unwrap();
    let n = scaled.nrows() as f64;
    for column in scaled.columns() {
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9, "mean {mean}");
        assert!((var - 1.0).abs() < 1e-6, "variance {var}");
    }
}

#[test]
fn test_training_rows_reproduce_labels() {
    let built = built();
    let service = service();
    let correct = (0..built.corpus.len())
        .filter(|&i| {
            let sample = built.corpus.sample(i).unwrap();
            service.score(&sample.features).is_fraud == sample.is_fraud
        })
        .count();
    assert!(correct as f64 / built.corpus.len() as f64 > 0.98);
}

#[test]
fn test_held_out_fraud_is_flagged() {
    let verdict = service().score(&fraud_like());
    assert!(verdict.is_fraud);
    assert!(verdict.confidence > 0.5);
    assert!(verdict.confidence <= 1.0);
}

#[test]
fn test_scoring_is_deterministic() {
    let service = service();
    let vector = fraud_like();
    let first = service.score(&vector);
    assert_eq!(service.score(&vector), first);
    assert_eq!(service.clone().score(&vector), first);
}

#[test]
fn test_all_zero_transaction_is_valid() {
    let verdict = service().score(&FeatureVector::zeros());
    assert!((0.5..=1.0).contains(&verdict.confidence));
}

#[test]
fn test_json_request_round_trip() {
    let service = service();
    let vector = fraud_like();
    let request = serde_json::to_value(&vector).unwrap();
    assert_eq!(service.score_json(&request).unwrap(), service.score(&vector));

    let err = service.score_json(&json!({ "aon": 10.0 })).unwrap_err();
    assert!(matches!(err, ScoringError::Input(_)));
}

#[test]
fn test_explanation_names_model_features() {
    let entries = service().explain(&fraud_like(), 5).unwrap();
    assert!(!entries.is_empty());
    assert!(entries.len() <= 5);
    for entry in &entries {
        assert!(FEATURE_NAMES.contains(&entry.feature_name.as_str()));
        assert!(entry.condition.contains(&entry.feature_name));
    }
}

#[test]
fn test_explanation_highlights_driving_features() {
    let entries = service().explain(&fraud_like(), 3).unwrap();
    assert!(entries
        .iter()
        .any(|e| e.feature_name == "aon" || e.feature_name == "amnt_loans30"));
}

#[test]
fn test_wide_explanation_covers_every_feature() {
    let entries = service().explain(&fraud_like(), FEATURE_COUNT + 5).unwrap();
    assert_eq!(entries.len(), FEATURE_COUNT);
}

#[tokio::test]
async fn test_explain_within_deadline() {
    let entries = service()
        .explain_with_timeout(fraud_like(), 4, Duration::from_secs(60))
        .await
        .unwrap();
    assert!(entries.len() <= 4);
}

#[test]
fn test_missing_values_are_imputed() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "label,{}", FEATURE_NAMES.join(",")).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    for i in 0..60 {
        let fraud = i % 6 == 0;
        let values = synthetic_row(&mut rng, fraud);
        let mut cells: Vec<String> = values.iter().map(|v| format!("{v:.3}")).collect();
        if i % 7 == 3 {
            cells[1] = String::new();
        }
        writeln!(file, "{},{}", u8::from(fraud), cells.join(",")).unwrap();
    }
    file.flush().unwrap();

    let dataset = Dataset::from_csv(file.path()).unwrap();
    let built = builder().build(&dataset).unwrap();
    assert!(built.corpus.features().iter().all(|v| v.is_finite()));
    assert_eq!(built.report.class_counts_after.0, built.report.class_counts_after.1);
}

#[test]
fn test_single_fraud_row_is_rejected() {
    let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
    writeln!(file, "label,{}", FEATURE_NAMES.join(",")).unwrap();
    let mut rng = StdRng::seed_from_u64(8);
    for i in 0..20 {
        let fraud = i == 0;
        let cells: Vec<String> = synthetic_row(&mut rng, fraud)
            .iter()
            .map(|v| v.to_string())
            .collect();
        writeln!(file, "{},{}", u8::from(fraud), cells.join(",")).unwrap();
    }
    file.flush().unwrap();

    let dataset = Dataset::from_csv(file.path()).unwrap();
    let err = builder().build(&dataset).unwrap_err();
    assert!(matches!(
        err,
        fraud_command_center::BuildError::Data(DataError::InsufficientMinority { found: 1 })
    ));
}
