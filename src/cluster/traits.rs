//! Clustering and density traits.

use crate::error::Result;
use crate::point::Point;
use ndarray::ArrayView1;

/// Unsupervised hard clustering of unlabelled points.
pub trait Clustering {
    /// Fit on `data` and return one cluster label per point.
    fn fit_predict(&self, data: &[Point]) -> Result<Vec<usize>>;

    /// Number of clusters requested.
    fn n_clusters(&self) -> usize;
}

/// Clustering that also exposes per-cluster membership probabilities.
pub trait SoftClustering: Clustering {
    /// Fit on `data`; entry \[i\]\[k\] is P(cluster k | point i).
    fn fit_predict_proba(&self, data: &[Point]) -> Result<Vec<Vec<f64>>>;
}

/// A fitted log-density over d-dimensional points.
pub trait LogDensity {
    /// Dimension of accepted points.
    fn dim(&self) -> usize;

    /// `ln p(x)`.
    fn log_density(&self, x: ArrayView1<'_, f64>) -> f64;
}
