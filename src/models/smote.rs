//! Synthetic minority oversampling (SMOTE)

use crate::error::DataError;
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

/// Oversampler that interpolates between minority-class neighbours until both
/// classes have the same count. Deterministic for a given seed.
#[derive(Debug, Clone)]
pub struct Smote {
    k_neighbors: usize,
    seed: u64,
}

impl Smote {
    pub fn new(k_neighbors: usize, seed: u64) -> Self {
        Self {
            k_neighbors: k_neighbors.max(1),
            seed,
        }
    }

    /// Return the original rows followed by synthetic minority rows.
    ///
    /// When the minority class has fewer than `k + 1` samples the
    /// neighbourhood shrinks to all other minority samples.
    pub fn fit_resample(
        &self,
        features: &Array2<f64>,
        labels: &[bool],
    ) -> Result<(Array2<f64>, Vec<bool>), DataError> {
        let fraud = labels.iter().filter(|&&l| l).count();
        let legit = labels.len() - fraud;
        if fraud == 0 || legit == 0 {
            return Err(DataError::SingleClass);
        }
        if fraud == legit {
            return Ok((features.clone(), labels.to_vec()));
        }

        let minority_label = fraud < legit;
        let minority: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == minority_label)
            .map(|(i, _)| i)
            .collect();
        if minority.len() < 2 {
            return Err(DataError::InsufficientMinority {
                found: minority.len(),
            });
        }

        let n_synthetic = fraud.abs_diff(legit);
        let k = self.k_neighbors.min(minority.len() - 1);
        let minority_rows = features.select(Axis(0), &minority);
        let neighbours = nearest_neighbours(&minority_rows, k);

        debug!(
            minority = minority.len(),
            synthetic = n_synthetic,
            k,
            "Generating synthetic minority samples"
        );

        let mut rng = StdRng::seed_from_u64(self.seed);
        let ncols = features.ncols();
        let mut synthetic = Array2::<f64>::zeros((n_synthetic, ncols));
        for mut out in synthetic.rows_mut() {
            let i = rng.gen_range(0..minority.len());
            let j = neighbours[i][rng.gen_range(0..k)];
            let step: f64 = rng.gen();

            let base = minority_rows.row(i);
            let other = minority_rows.row(j);
            for c in 0..ncols {
                out[c] = base[c] + step * (other[c] - base[c]);
            }
        }

        let mut resampled = features.clone();
        resampled
            .append(Axis(0), synthetic.view())
            .map_err(|e| DataError::Read(e.to_string()))?;
        let mut resampled_labels = labels.to_vec();
        resampled_labels.extend(std::iter::repeat(minority_label).take(n_synthetic));

        Ok((resampled, resampled_labels))
    }
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Indices of the `k` nearest other rows for every row (brute force).
fn nearest_neighbours(rows: &Array2<f64>, k: usize) -> Vec<Vec<usize>> {
    let n = rows.nrows();
    (0..n)
        .map(|i| {
            let mut candidates: Vec<(f64, usize)> = (0..n)
                .filter(|&j| j != i)
                .map(|j| (squared_distance(rows.row(i), rows.row(j)), j))
                .collect();
            let cmp = |a: &(f64, usize), b: &(f64, usize)| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1));
            if k < candidates.len() {
                candidates.select_nth_unstable_by(k - 1, cmp);
                candidates.truncate(k);
            }
            candidates.sort_by(cmp);
            candidates.into_iter().map(|(_, j)| j).collect()
        })
        .collect()
}
