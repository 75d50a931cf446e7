//! Corpus ingestion: CSV reading, numeric coercion and median imputation.

use crate::error::DataError;
use crate::types::transaction::{FeatureVector, LabeledSample, FEATURE_COUNT, FEATURE_NAMES};
use ndarray::Array2;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw tabular data exactly as read, one string per cell.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Read a CSV file with a header row.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| DataError::Read(format!("{}: {}", path.display(), e)))?;
        let dataset = Self::from_reader(file)?;

        info!(
            path = %path.display(),
            rows = dataset.len(),
            columns = dataset.headers.len(),
            "Corpus loaded"
        );
        Ok(dataset)
    }

    /// Read CSV from any reader. Rows with a different field count than the
    /// header are rejected. A cell that is not valid UTF-8 is kept as an
    /// empty string, so it is imputed like any other missing value.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = rdr
            .byte_headers()
            .map_err(|e| DataError::Read(e.to_string()))?
            .iter()
            .map(|h| String::from_utf8_lossy(h).into_owned())
            .collect();

        let mut rows = Vec::new();
        let mut undecodable = 0usize;
        for record in rdr.byte_records() {
            let record = record.map_err(|e| DataError::Read(e.to_string()))?;
            let row: Vec<String> = record
                .iter()
                .map(|cell| match std::str::from_utf8(cell) {
                    Ok(text) => text.to_string(),
                    Err(_) => {
                        undecodable += 1;
                        String::new()
                    }
                })
                .collect();
            rows.push(row);
        }
        if undecodable > 0 {
            warn!(cells = undecodable, "Treating cells that are not valid UTF-8 as missing");
        }

        Ok(Self { headers, rows })
    }

    /// Build from in-memory records.
    pub fn from_records(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_index(&self, name: &str) -> Result<usize, DataError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    }

    /// Coerce a column to numbers; unparseable or non-finite cells become
    /// `None`.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, DataError> {
        let idx = self.column_index(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| {
                row.get(idx)
                    .and_then(|cell| cell.parse::<f64>().ok())
                    .filter(|v| v.is_finite())
            })
            .collect())
    }

    /// Parse a binary label column (`0`/`1`, `0.0`/`1.0`, `true`/`false`).
    pub fn label_column(&self, name: &str) -> Result<Vec<bool>, DataError> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(row_no, row)| {
                let cell = row.get(idx).map(String::as_str).unwrap_or_default();
                parse_label(cell).ok_or_else(|| DataError::InvalidLabel {
                    row: row_no + 1,
                    value: cell.to_string(),
                })
            })
            .collect()
    }
}

fn parse_label(cell: &str) -> Option<bool> {
    match cell.to_ascii_lowercase().as_str() {
        "true" => return Some(true),
        "false" => return Some(false),
        _ => {}
    }
    match cell.parse::<f64>() {
        Ok(v) if v == 1.0 => Some(true),
        Ok(v) if v == 0.0 => Some(false),
        _ => None,
    }
}

/// Median of the present values, or `None` if there are none.
pub fn median(values: &[Option<f64>]) -> Option<f64> {
    let mut present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(f64::total_cmp);

    let mid = present.len() / 2;
    if present.len() % 2 == 0 {
        Some((present[mid - 1] + present[mid]) / 2.0)
    } else {
        Some(present[mid])
    }
}

/// Numeric training corpus: one row per sample, columns in
/// [`FEATURE_NAMES`] order.
#[derive(Debug, Clone)]
pub struct Corpus {
    features: Array2<f64>,
    labels: Vec<bool>,
}

impl Corpus {
    /// Wrap an existing matrix with one row per label and one column per
    /// model feature.
    pub fn new(features: Array2<f64>, labels: Vec<bool>) -> Result<Self, DataError> {
        if features.nrows() != labels.len() || features.ncols() != FEATURE_COUNT {
            return Err(DataError::Shape {
                rows: features.nrows(),
                columns: features.ncols(),
                labels: labels.len(),
                expected: FEATURE_COUNT,
            });
        }
        Ok(Self { features, labels })
    }

    /// Select the model features and label from a raw dataset, coercing
    /// every feature to numeric and filling gaps with the column median.
    pub fn from_dataset(dataset: &Dataset, label_column: &str) -> Result<Self, DataError> {
        let labels = dataset.label_column(label_column)?;
        let mut features = Array2::<f64>::zeros((dataset.len(), FEATURE_COUNT));

        for (col, name) in FEATURE_NAMES.iter().enumerate() {
            let values = dataset.numeric_column(name)?;
            let missing = values.iter().filter(|v| v.is_none()).count();
            if missing == values.len() && !values.is_empty() {
                return Err(DataError::NonNumericColumn(name.to_string()));
            }

            let fill = if missing > 0 {
                let m = median(&values).unwrap_or_default();
                warn!(column = %name, missing, median = m, "Imputing missing values with column median");
                m
            } else {
                0.0
            };

            for (row, value) in values.into_iter().enumerate() {
                features[[row, col]] = value.unwrap_or(fill);
            }
        }

        if labels.is_empty() {
            return Err(DataError::EmptyCorpus);
        }

        let corpus = Self { features, labels };
        let (legit, fraud) = corpus.class_counts();
        debug!(rows = corpus.len(), legit, fraud, "Corpus prepared");
        Ok(corpus)
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// `(not fraud, fraud)` counts
    pub fn class_counts(&self) -> (usize, usize) {
        let fraud = self.labels.iter().filter(|&&l| l).count();
        (self.labels.len() - fraud, fraud)
    }

    /// Feature vector for a row.
    pub fn row(&self, index: usize) -> Option<FeatureVector> {
        if index >= self.len() {
            return None;
        }
        let row = self.features.row(index);
        let values: Vec<f64> = row.iter().copied().collect();
        FeatureVector::from_slice(&values).ok()
    }

    pub fn sample(&self, index: usize) -> Option<LabeledSample> {
        let features = self.row(index)?;
        Some(LabeledSample {
            features,
            is_fraud: self.labels[index],
        })
    }
}
