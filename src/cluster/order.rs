//! Choosing how many components a class needs.
//!
//! EM needs the component count up front. Instead of guessing, a class can
//! be fitted with a generous count and then reduced: the two components
//! whose merge costs least are replaced by their moment-matched union, EM is
//! re-run, and so on down to one component.
//!
//! The merge cost of components `a` and `b` is the drop in the expected
//! log-likelihood bound when both are replaced by one Gaussian:
//!
//! ```text
//! cost(a, b) = N/2 · (π ln|R| − πₐ ln|Rₐ| − π_b ln|R_b|),   π = πₐ + π_b
//! ```
//!
//! Each order is scored by minimum description length
//!
//! ```text
//! MDL = −L + ½ · P · ln(N · d)
//! ```
//!
//! with `L` the total log-likelihood and `P` the free parameter count.

use super::gmm::{Gmm, GmmFit};
use crate::error::{Error, Result};
use crate::linalg;
use crate::signature::{moment_match, Covariance, CovarianceStructure, GaussianComponent};
use ndarray::ArrayView2;
use std::fmt;
use std::str::FromStr;

/// Component-count policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Order {
    /// Keep the count EM ends with.
    #[default]
    Fixed,
    /// Merge down to exactly this many components.
    Target(usize),
    /// Merge down to one, keep the count with the lowest MDL.
    Mdl,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Order::Fixed => f.write_str("fixed"),
            Order::Target(k) => write!(f, "{k}"),
            Order::Mdl => f.write_str("mdl"),
        }
    }
}

impl FromStr for Order {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Order::Fixed),
            "mdl" | "auto" => Ok(Order::Mdl),
            other => match other.parse::<usize>() {
                Ok(k) if k > 0 => Ok(Order::Target(k)),
                _ => Err(Error::InvalidParameter {
                    name: "order",
                    message: format!("expected 'fixed', 'mdl' or a positive count, got '{other}'"),
                }),
            },
        }
    }
}

/// Score of one visited component count.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OrderCandidate {
    /// Components in the mixture.
    pub n_components: usize,
    /// Total log-likelihood.
    pub log_likelihood: f64,
    /// Description length.
    pub mdl: f64,
}

/// `−L + ½ P ln(N d)`.
pub fn mdl(log_likelihood: f64, n_parameters: usize, n_samples: usize, dimension: usize) -> f64 {
    let nd = (n_samples * dimension).max(1) as f64;
    -log_likelihood + 0.5 * n_parameters as f64 * nd.ln()
}

fn n_parameters(k: usize, structure: CovarianceStructure, d: usize) -> usize {
    (k * structure.component_parameters(d)).saturating_sub(1)
}

/// Moment-matched union of two components, stored in `structure`.
pub(crate) fn merge_components(
    a: &GaussianComponent,
    b: &GaussianComponent,
    structure: CovarianceStructure,
) -> GaussianComponent {
    let d = a.dim();
    let (weight, mean, cov) = moment_match([a, b], d);
    GaussianComponent::new(
        weight,
        a.count + b.count,
        mean,
        Covariance::from_full(&cov, structure),
    )
}

/// Cost of merging `a` and `b` for a class of `n` samples.
///
/// Infinite when a covariance involved is not positive definite.
pub(crate) fn merge_cost(
    a: &GaussianComponent,
    b: &GaussianComponent,
    structure: CovarianceStructure,
    n: usize,
) -> f64 {
    let d = a.dim();
    let merged = merge_components(a, b, structure);
    let ld = |c: &GaussianComponent| linalg::log_det(&c.covariance.to_full(d));
    match (ld(&merged), ld(a), ld(b)) {
        (Some(m), Some(la), Some(lb)) => {
            0.5 * n as f64 * (merged.weight * m - a.weight * la - b.weight * lb)
        }
        _ => f64::INFINITY,
    }
}

/// Indices `(i, j)`, `i < j`, of the cheapest pair to merge.
pub(crate) fn closest_pair(
    components: &[GaussianComponent],
    structure: CovarianceStructure,
    n: usize,
) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..components.len() {
        for j in (i + 1)..components.len() {
            let cost = merge_cost(&components[i], &components[j], structure, n);
            if best.map_or(true, |(_, _, b)| cost < b) {
                best = Some((i, j, cost));
            }
        }
    }
    best.map(|(i, j, _)| (i, j))
}

/// Replace components `i` and `j` by their union.
pub(crate) fn merge_at(
    components: &[GaussianComponent],
    i: usize,
    j: usize,
    structure: CovarianceStructure,
) -> Vec<GaussianComponent> {
    let merged = merge_components(&components[i], &components[j], structure);
    let mut out: Vec<GaussianComponent> = components
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != i && *idx != j)
        .map(|(_, c)| c.clone())
        .collect();
    out.insert(i.min(out.len()), merged);
    out
}

/// Fit `data` with `gmm` and apply the `order` policy.
///
/// Returns the chosen fit and the score of every count visited.
pub fn select_order(
    gmm: &Gmm,
    data: ArrayView2<'_, f64>,
    order: Order,
) -> Result<(GmmFit, Vec<OrderCandidate>)> {
    let n = data.nrows();
    let d = data.ncols();
    let structure = gmm.structure();
    let score = |fit: &GmmFit| OrderCandidate {
        n_components: fit.components.len(),
        log_likelihood: fit.status.log_likelihood,
        mdl: mdl(
            fit.status.log_likelihood,
            n_parameters(fit.components.len(), structure, d),
            n,
            d,
        ),
    };

    let mut fit = gmm.fit(data)?;
    let mut candidates = vec![score(&fit)];
    let target = match order {
        Order::Fixed => return Ok((fit, candidates)),
        Order::Target(k) => k.max(1),
        Order::Mdl => 1,
    };

    let mut best = fit.clone();
    let mut best_mdl = candidates[0].mdl;
    while fit.components.len() > target {
        let Some((i, j)) = closest_pair(&fit.components, structure, n) else {
            break;
        };
        let merged = merge_at(&fit.components, i, j, structure);
        fit = gmm.refine(data, merged)?;
        let cand = score(&fit);
        tracing::debug!(
            k = cand.n_components,
            log_likelihood = cand.log_likelihood,
            mdl = cand.mdl,
            "merged closest components"
        );
        candidates.push(cand);
        if cand.mdl < best_mdl {
            best_mdl = cand.mdl;
            best = fit.clone();
        }
    }

    match order {
        Order::Mdl => Ok((best, candidates)),
        _ => Ok((fit, candidates)),
    }
}
