//! Seeding of component means before EM.
//!
//! EM only finds a local optimum, so where the means start matters.
//!
//! - [`Init::Spread`]: samples evenly spaced through the class in input
//!   order. Deterministic; works well when the file is grouped by region.
//! - [`Init::Random`]: distinct samples drawn uniformly.
//! - [`Init::KmeansPlusPlus`]: first mean uniform, each next one drawn with
//!   probability proportional to D(x)², the squared distance to the nearest
//!   mean already chosen. Spreads the seeds across separated modes.

use crate::error::{Error, Result};
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Mean seeding strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Init {
    /// Evenly spaced samples.
    Spread,
    /// Uniformly drawn distinct samples.
    Random,
    /// k-means++ D² sampling.
    #[default]
    KmeansPlusPlus,
}

impl fmt::Display for Init {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Init::Spread => "spread",
            Init::Random => "random",
            Init::KmeansPlusPlus => "kmeans++",
        })
    }
}

impl FromStr for Init {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spread" => Ok(Init::Spread),
            "random" => Ok(Init::Random),
            "kmeans++" | "kmeanspp" | "kmeans-plus-plus" => Ok(Init::KmeansPlusPlus),
            other => Err(Error::InvalidParameter {
                name: "init",
                message: format!("unknown initialisation '{other}'"),
            }),
        }
    }
}

/// Pick `k` initial means from the rows of `data` (`k ≤ n`).
pub(crate) fn seed_means(
    data: ArrayView2<'_, f64>,
    k: usize,
    init: Init,
    rng: &mut dyn RngCore,
) -> Array2<f64> {
    let n = data.nrows();
    let d = data.ncols();
    let mut means = Array2::zeros((k, d));
    if n == 0 || k == 0 {
        return means;
    }

    match init {
        Init::Spread => {
            if k == 1 {
                if let Some(m) = data.mean_axis(ndarray::Axis(0)) {
                    means.row_mut(0).assign(&m);
                }
            } else {
                for i in 0..k {
                    let idx = (i * (n - 1) + (k - 1) / 2) / (k - 1);
                    means.row_mut(i).assign(&data.row(idx.min(n - 1)));
                }
            }
        }
        Init::Random => {
            let picks = rand::seq::index::sample(rng, n, k.min(n));
            for (i, idx) in picks.iter().enumerate() {
                means.row_mut(i).assign(&data.row(idx));
            }
        }
        Init::KmeansPlusPlus => {
            let first = rng.random_range(0..n);
            means.row_mut(0).assign(&data.row(first));

            for i in 1..k {
                let distances: Vec<f64> = data
                    .rows()
                    .into_iter()
                    .map(|point| {
                        (0..i)
                            .map(|c| squared_distance(point, means.row(c)))
                            .fold(f64::MAX, f64::min)
                    })
                    .collect();

                // Sample proportional to squared distance
                let total: f64 = distances.iter().sum();
                if total <= 0.0 {
                    let idx = rng.random_range(0..n);
                    means.row_mut(i).assign(&data.row(idx));
                    continue;
                }

                let threshold = rng.random::<f64>() * total;
                let mut cumsum = 0.0;
                let mut selected = n - 1;
                for (j, &dist) in distances.iter().enumerate() {
                    cumsum += dist;
                    if cumsum >= threshold {
                        selected = j;
                        break;
                    }
                }
                means.row_mut(i).assign(&data.row(selected));
            }
        }
    }
    means
}

fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
