//! Per-feature standardization frozen at training time

use crate::error::InputShapeError;
use ndarray::{Array1, Array2, Axis};

/// Zero-mean, unit-variance scaler. Parameters never change after `fit`.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on the rows of `data` (population variance).
    ///
    /// Columns with (near) zero variance keep a scale of 1.0 so constant
    /// inputs map to 0 instead of NaN.
    pub fn fit(data: &Array2<f64>) -> Self {
        let ncols = data.ncols();
        let mean = data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(ncols));
        let scale = if data.nrows() == 0 {
            Array1::ones(ncols)
        } else {
            data.var_axis(Axis(0), 0.0).mapv(|var| {
                let std = var.sqrt();
                if std < 10.0 * f64::EPSILON {
                    1.0
                } else {
                    std
                }
            })
        };

        Self { mean, scale }
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>, InputShapeError> {
        self.check_arity(data.ncols())?;
        Ok((data - &self.mean) / &self.scale)
    }

    pub fn transform_row(&self, row: &[f64]) -> Result<Vec<f64>, InputShapeError> {
        self.check_arity(row.len())?;
        Ok(self.transform_row_unchecked(row))
    }

    /// Caller guarantees `row.len() == self.n_features()`.
    pub(crate) fn transform_row_unchecked(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(&x, (&m, &s))| (x - m) / s)
            .collect()
    }

    fn check_arity(&self, found: usize) -> Result<(), InputShapeError> {
        if found == self.n_features() {
            Ok(())
        } else {
            Err(InputShapeError::Arity {
                expected: self.n_features(),
                found,
            })
        }
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn test_fit_transform_standardizes() {
        let data = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let scaler = StandardScaler::fit(&data);
        let scaled = scaler.transform(&data).unwrap();

        for col in scaled.columns() {
            assert!(col.mean().unwrap().abs() < 1e-12);
            assert!((col.var(0.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_constant_column_has_unit_scale() {
        let data = array![[5.0, 1.0], [5.0, 2.0], [5.0, 3.0]];
        let scaler = StandardScaler::fit(&data);

        assert_eq!(scaler.scale()[0], 1.0);
        let row = scaler.transform_row(&[0.0, 0.0]).unwrap();
        assert!(row.iter().all(|v| v.is_finite()));
        assert_eq!(row[0], -5.0);
    }

    #[test]
    fn test_transform_row_matches_matrix() {
        let data = array![[1.0, -3.0], [7.0, 2.0], [4.0, 9.0]];
        let scaler = StandardScaler::fit(&data);
        let scaled = scaler.transform(&data).unwrap();

        let row = scaler.transform_row(&[7.0, 2.0]).unwrap();
        assert!((row[0] - scaled[[1, 0]]).abs() < 1e-12);
        assert!((row[1] - scaled[[1, 1]]).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_arity_is_rejected() {
        let data = array![[1.0, 2.0], [3.0, 4.0]];
        let scaler = StandardScaler::fit(&data);

        assert_eq!(
            scaler.transform_row(&[1.0, 2.0, 3.0]),
            Err(InputShapeError::Arity {
                expected: 2,
                found: 3
            })
        );
        assert!(scaler.transform_row(&[1.0]).is_err());
        assert!(scaler.transform(&array![[1.0], [2.0]]).is_err());
    }

    proptest! {
        #[test]
        fn prop_scaled_columns_are_standard(
            rows in prop::collection::vec(prop::collection::vec(-1e6f64..1e6, 3), 2..40)
        ) {
            let n = rows.len();
            let flat: Vec<f64> = rows.into_iter().flatten().collect();
            let data = Array2::from_shape_vec((n, 3), flat).unwrap();
            let scaler = StandardScaler::fit(&data);
            let scaled = scaler.transform(&data).unwrap();

            for (j, col) in scaled.columns().into_iter().enumerate() {
                prop_assert!(col.mean().unwrap().abs() < 1e-6);
                let var = col.var(0.0);
                if scaler.scale()[j] != 1.0 {
                    prop_assert!((var - 1.0).abs() < 1e-6);
                }
            }
        }
    }
}
