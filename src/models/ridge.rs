//! Sample-weighted ridge regression used as the local surrogate model.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Fitted linear surrogate
#[derive(Debug, Clone)]
pub struct RidgeFit {
    pub coef: Array1<f64>,
    pub intercept: f64,
}

impl RidgeFit {
    pub fn predict(&self, row: ArrayView1<f64>) -> f64 {
        self.intercept + self.coef.dot(&row)
    }

    /// Weighted coefficient of determination.
    pub fn score(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, w: ArrayView1<f64>) -> f64 {
        let total_w = w.sum();
        if total_w <= 0.0 {
            return 0.0;
        }
        let y_mean = (&y * &w).sum() / total_w;

        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for ((row, &yi), &wi) in x.outer_iter().zip(y.iter()).zip(w.iter()) {
            ss_res += wi * (yi - self.predict(row)).powi(2);
            ss_tot += wi * (yi - y_mean).powi(2);
        }
        if ss_tot == 0.0 {
            if ss_res == 0.0 {
                1.0
            } else {
                0.0
            }
        } else {
            1.0 - ss_res / ss_tot
        }
    }
}

/// Fit `y ~ x` with an intercept, minimizing
/// `sum(w * (y - x·b - c)^2) + alpha * |b|^2`.
pub fn fit_weighted(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    w: ArrayView1<f64>,
    alpha: f64,
) -> RidgeFit {
    let d = x.ncols();
    let total_w = w.sum();
    if d == 0 || total_w <= 0.0 {
        let intercept = if total_w > 0.0 {
            (&y * &w).sum() / total_w
        } else {
            0.0
        };
        return RidgeFit {
            coef: Array1::zeros(d),
            intercept,
        };
    }

    // Center with weighted means so the intercept is not penalized.
    let x_mean = x
        .t()
        .dot(&w)
        .mapv(|v| v / total_w);
    let y_mean = (&y * &w).sum() / total_w;
    let xc = &x - &x_mean;
    let yc = &y - y_mean;

    let xw = &xc * &w.insert_axis(Axis(1));
    let mut gram: Array2<f64> = xw.t().dot(&xc);
    for i in 0..d {
        gram[[i, i]] += alpha;
    }
    let rhs = xw.t().dot(&yc);

    let coef = solve_spd(&gram, &rhs).unwrap_or_else(|| Array1::zeros(d));
    let intercept = y_mean - x_mean.dot(&coef);
    RidgeFit { coef, intercept }
}

/// Solve `a · x = b` for symmetric positive semi-definite `a` via Cholesky,
/// adding diagonal jitter when the factorization breaks down.
fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let trace: f64 = a.diag().sum();
    let base = if trace > 0.0 { trace / n as f64 } else { 1.0 };
    let rhs = DVector::from_iterator(n, b.iter().copied());

    for attempt in 0..6 {
        let jitter = if attempt == 0 {
            0.0
        } else {
            base * 1e-12 * 100f64.powi(attempt)
        };
        let m = DMatrix::from_fn(n, n, |i, j| a[[i, j]] + if i == j { jitter } else { 0.0 });
        if let Some(chol) = m.cholesky() {
            let x = chol.solve(&rhs);
            if x.iter().all(|v| v.is_finite()) {
                return Some(x.iter().copied().collect());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_linear_relation() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        let y = x.column(0).mapv(|v| 2.0 * v) + x.column(1).mapv(|v| -1.0 * v) + 0.5;
        let w = Array1::ones(5);

        let fit = fit_weighted(x.view(), y.view(), w.view(), 0.0);
        assert!((fit.coef[0] - 2.0).abs() < 1e-8);
        assert!((fit.coef[1] + 1.0).abs() < 1e-8);
        assert!((fit.intercept - 0.5).abs() < 1e-8);
        assert!((fit.score(x.view(), y.view(), w.view()) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_alpha_shrinks_coefficients() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 1.0, 2.0, 3.0];
        let w = Array1::ones(4);

        let loose = fit_weighted(x.view(), y.view(), w.view(), 0.0);
        let tight = fit_weighted(x.view(), y.view(), w.view(), 100.0);
        assert!(tight.coef[0].abs() < loose.coef[0].abs());
    }

    #[test]
    fn test_zero_weight_rows_are_ignored() {
        let x = array![[0.0], [1.0], [2.0], [10.0]];
        let y = array![0.0, 1.0, 2.0, -50.0];
        let w = array![1.0, 1.0, 1.0, 0.0];

        let fit = fit_weighted(x.view(), y.view(), w.view(), 0.0);
        assert!((fit.coef[0] - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_solve_spd_matches_known_solution() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = solve_spd(&a, &b).unwrap();
        assert!((x[0] - 0.5).abs() < 1e-12);
        assert!(x[1].abs() < 1e-12);
    }

    #[test]
    fn test_collinear_columns_still_solve() {
        let x = array![[1.0, 1.0], [0.0, 0.0], [1.0, 1.0], [0.0, 0.0]];
        let y = array![1.0, 0.0, 1.0, 0.0];
        let w = Array1::ones(4);

        let fit = fit_weighted(x.view(), y.view(), w.view(), 0.0);
        assert!(fit.coef.iter().all(|c| c.is_finite()));
        assert!((fit.predict(x.row(0)) - 1.0).abs() < 1e-3);
    }
}
