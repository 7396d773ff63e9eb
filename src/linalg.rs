//! Small dense linear-algebra helpers for d × d covariance matrices.
//!
//! Data lives in `ndarray` arrays; factorisations go through `faer`.

use faer::prelude::*;
use faer::{Mat, Side};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Responsibility-free mean and (biased, divide-by-n) covariance of the rows.
pub(crate) fn mean_and_covariance(data: ArrayView2<'_, f64>) -> (Array1<f64>, Array2<f64>) {
    let n = data.nrows();
    let d = data.ncols();
    let mean = data
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(d));

    let mut cov = Array2::zeros((d, d));
    for row in data.rows() {
        for i in 0..d {
            let di = row[i] - mean[i];
            for j in i..d {
                cov[[i, j]] += di * (row[j] - mean[j]);
            }
        }
    }
    if n > 0 {
        cov /= n as f64;
    }
    symmetrize_upper(&mut cov);
    (mean, cov)
}

/// Copy the upper triangle onto the lower triangle.
pub(crate) fn symmetrize_upper(m: &mut Array2<f64>) {
    let d = m.nrows();
    for i in 0..d {
        for j in 0..i {
            m[[i, j]] = m[[j, i]];
        }
    }
}

/// Cholesky factorisation of a symmetric positive-definite matrix, kept as
/// its log-determinant and inverse.
#[derive(Debug, Clone)]
pub(crate) struct SpdFactor {
    log_det: f64,
    precision: Array2<f64>,
}

impl SpdFactor {
    /// Factor `a`; `None` when it is not (numerically) positive definite.
    pub(crate) fn new(a: &Array2<f64>) -> Option<Self> {
        let d = a.nrows();
        if d == 0 || a.ncols() != d || a.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let m = Mat::<f64>::from_fn(d, d, |i, j| a[[i, j]]);
        let llt = m.llt(Side::Lower).ok()?;

        let l = llt.L();
        let mut log_det = 0.0;
        for i in 0..d {
            let lii = l[(i, i)];
            if !(lii > 0.0) || !lii.is_finite() {
                return None;
            }
            log_det += 2.0 * lii.ln();
        }

        let inv = llt.solve(&Mat::<f64>::identity(d, d));
        let precision = Array2::from_shape_fn((d, d), |(i, j)| inv[(i, j)]);
        Some(Self { log_det, precision })
    }

    /// `ln |A|`.
    pub(crate) fn log_det(&self) -> f64 {
        self.log_det
    }

    /// `vᵀ A⁻¹ v`.
    pub(crate) fn mahalanobis_sq(&self, v: ArrayView1<'_, f64>) -> f64 {
        v.dot(&self.precision.dot(&v))
    }
}

/// `ln |A|` for a positive-definite `A`, or `None` if it is not.
pub(crate) fn log_det(a: &Array2<f64>) -> Option<f64> {
    SpdFactor::new(a).map(|f| f.log_det)
}

/// Add `eps` to every diagonal entry.
pub(crate) fn add_to_diagonal(m: &mut Array2<f64>, eps: f64) {
    for i in 0..m.nrows().min(m.ncols()) {
        m[[i, i]] += eps;
    }
}

/// Log-sum-exp for numerical stability.
///
/// NaN if any value is NaN.
pub(crate) fn log_sum_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val
        + values
            .iter()
            .map(|&v| (v - max_val).exp())
            .sum::<f64>()
            .ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn factor_rejects_indefinite() {
        assert!(SpdFactor::new(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
        assert!(SpdFactor::new(&array![[1.0, 1.0], [1.0, 1.0]]).is_none());
        assert!(SpdFactor::new(&array![[f64::NAN, 0.0], [0.0, 1.0]]).is_none());
    }

    #[test]
    fn log_det_matches_closed_form() {
        let a = array![[2.0, 0.5], [0.5, 1.0]];
        let expected = (2.0f64 * 1.0 - 0.25).ln();
        assert!((log_det(&a).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn mahalanobis_form_matches_inverse() {
        let a = array![[2.0, 0.0], [0.0, 8.0]];
        let f = SpdFactor::new(&a).unwrap();
        let v = array![2.0, 4.0];
        // 4/2 + 16/8
        assert!((f.mahalanobis_sq(v.view()) - 4.0).abs() < 1e-12);

        let b = array![[4.0, 2.0, 0.4], [2.0, 3.0, 0.5], [0.4, 0.5, 1.0]];
        let f = SpdFactor::new(&b).unwrap();
        let x = array![0.3, -1.0, 2.0];
        let bx = b.dot(&x);
        assert!((f.mahalanobis_sq(bx.view()) - x.dot(&bx)).abs() < 1e-9);
    }

    #[test]
    fn covariance_of_known_rows() {
        let data = array![[0.0, 0.0], [2.0, 0.0], [0.0, 2.0], [2.0, 2.0]];
        let (mean, cov) = mean_and_covariance(data.view());
        assert_eq!(mean, array![1.0, 1.0]);
        assert!((cov[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((cov[[1, 1]] - 1.0).abs() < 1e-12);
        assert!(cov[[0, 1]].abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp_handles_extremes() {
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(log_sum_exp(&[f64::NEG_INFINITY; 3]), f64::NEG_INFINITY);
        let v = log_sum_exp(&[-1000.0, -1000.0]);
        assert!((v - (-1000.0 + 2f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn log_sum_exp_propagates_nan() {
        assert!(log_sum_exp(&[f64::NAN, f64::NAN]).is_nan());
        assert!(log_sum_exp(&[0.0, f64::NAN]).is_nan());
    }
}
