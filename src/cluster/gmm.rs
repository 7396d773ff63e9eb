//! Gaussian Mixture Model fitting for a single class.
//!
//! # The Probabilistic Model
//!
//! GMM assumes the class is generated from K Gaussian distributions:
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! Where:
//! - πₖ = mixing weight (probability of component k)
//! - μₖ = mean of component k
//! - Σₖ = covariance of component k, shaped by [`CovarianceStructure`]
//!
//! # The EM Algorithm
//!
//! **E-step**: Compute "responsibilities" (soft assignments), in log space:
//! ```text
//! γₙₖ = exp(ln πₖ + ln N(xₙ | μₖ, Σₖ) − logsumexpⱼ(ln πⱼ + ln N(xₙ | μⱼ, Σⱼ)))
//! ```
//!
//! **M-step**: Update parameters using responsibilities:
//! - μₖ = Σₙ γₙₖ xₙ / Σₙ γₙₖ  (weighted mean)
//! - Σₖ = Σₙ γₙₖ (xₙ − μₖ)(xₙ − μₖ)ᵀ / Σₙ γₙₖ, projected onto the structure
//! - πₖ = (1/N) Σₙ γₙₖ  (fraction of responsibility)
//!
//! Iteration stops when the mean per-sample log-likelihood changes by less
//! than `tol`, after `max_iter` iterations, or when the optional wall-clock
//! budget runs out. Running out is not an error: the best parameters seen
//! are returned and [`FitStatus::converged`] is false.
//!
//! # Failure Modes
//!
//! - **Local optima**: EM converges to local maxima; initialization matters
//! - **Singular covariance**: Small components can collapse; every diagonal
//!   gets `reg_covar × (mean class variance)` and densities retry with
//!   diagonal loading before giving up with [`Error::Numerical`]
//! - **Empty components**: a component whose responsibility mass vanishes
//!   is dropped and the remaining weights renormalised

use super::init::{seed_means, Init};
use super::traits::{Clustering, SoftClustering};
use crate::error::{Error, Result};
use crate::linalg;
use crate::point::{points_to_array, Point};
use crate::signature::{
    Covariance, CovarianceStructure, GaussianComponent, GaussianDensity, Signature,
};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::prelude::*;
use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Responsibility mass, relative to the sample count, below which a
/// component is pruned.
const MIN_COMPONENT_MASS: f64 = 1e-8;

/// Gaussian Mixture Model fitted by EM.
#[derive(Debug, Clone)]
pub struct Gmm {
    /// Number of components.
    n_components: usize,
    /// Covariance shape.
    structure: CovarianceStructure,
    /// Maximum EM iterations.
    max_iter: usize,
    /// Convergence tolerance on the mean per-sample log-likelihood.
    tol: f64,
    /// Regularization for covariance, relative to the mean class variance.
    reg_covar: f64,
    /// Random seed.
    seed: Option<u64>,
    /// Mean seeding.
    init: Init,
    /// Wall-clock cap.
    max_duration: Option<Duration>,
}

/// How an EM run ended.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitStatus {
    /// Tolerance reached before any cap.
    pub converged: bool,
    /// EM iterations performed.
    pub iterations: usize,
    /// Total log-likelihood of the returned parameters.
    pub log_likelihood: f64,
    /// Stopped by the wall-clock cap.
    pub timed_out: bool,
}

/// Result of fitting one class.
#[derive(Debug, Clone)]
pub struct GmmFit {
    /// Fitted components, weights summing to one.
    pub components: Vec<GaussianComponent>,
    /// Covariance shape of the components.
    pub structure: CovarianceStructure,
    /// Convergence report.
    pub status: FitStatus,
}

impl GmmFit {
    /// Package the components as a class signature.
    pub fn into_signature(self, title: impl Into<String>, count: usize) -> Signature {
        let mut sig = Signature::new(title, self.structure);
        sig.count = count;
        sig.components = self.components;
        sig
    }

    /// Responsibilities of `data` under the fitted components (`n × K`).
    pub fn responsibilities(&self, data: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let densities = densities(&self.components)?;
        Ok(e_step(data, &densities).0)
    }
}

impl Gmm {
    /// Create a new GMM with default settings.
    pub fn new() -> Self {
        Self {
            n_components: 8,
            structure: CovarianceStructure::Full,
            max_iter: 200,
            tol: 1e-4,
            reg_covar: 1e-6,
            seed: None,
            init: Init::default(),
            max_duration: None,
        }
    }

    /// Set number of components.
    pub fn with_n_components(mut self, n: usize) -> Self {
        self.n_components = n;
        self
    }

    /// Set covariance structure.
    pub fn with_structure(mut self, structure: CovarianceStructure) -> Self {
        self.structure = structure;
        self
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set relative covariance regularization.
    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set optional random seed.
    pub fn with_seed_opt(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Set mean seeding strategy.
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Cap the wall-clock time of one EM run.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Covariance structure.
    pub fn structure(&self) -> CovarianceStructure {
        self.structure
    }

    /// Fit to `points`.
    pub fn fit_points(&self, points: &[Point]) -> Result<GmmFit> {
        let d = points.first().map(Point::dim).ok_or(Error::EmptyInput)?;
        let data = points_to_array(points, d)?;
        self.fit(data.view())
    }

    /// Fit to the rows of `data`.
    pub fn fit(&self, data: ArrayView2<'_, f64>) -> Result<GmmFit> {
        let n = data.nrows();
        let d = data.ncols();
        if n == 0 || d == 0 {
            return Err(Error::EmptyInput);
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(Error::numerical(0, "non-finite sample value"));
        }
        if self.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be > 0".into(),
            });
        }
        let k = self.n_components.min(n);

        let mut rng: Box<dyn RngCore> = match self.seed {
            Some(s) => Box::new(StdRng::seed_from_u64(s)),
            None => Box::new(rand::rng()),
        };

        let means = seed_means(data, k, self.init, &mut *rng);
        let (_, class_cov) = linalg::mean_and_covariance(data);
        let reg = self.regularization(&class_cov);

        let mut initial = Covariance::from_full(&class_cov, self.structure);
        initial.add_to_diagonal(reg);
        let components = means
            .rows()
            .into_iter()
            .map(|m| {
                GaussianComponent::new(
                    1.0 / k as f64,
                    n as f64 / k as f64,
                    m.to_owned(),
                    initial.clone(),
                )
            })
            .collect();

        self.run_em(data, components, reg)
    }

    /// Continue EM from existing components (used after merging).
    pub(crate) fn refine(
        &self,
        data: ArrayView2<'_, f64>,
        components: Vec<GaussianComponent>,
    ) -> Result<GmmFit> {
        if data.nrows() == 0 {
            return Err(Error::EmptyInput);
        }
        let (_, class_cov) = linalg::mean_and_covariance(data);
        let reg = self.regularization(&class_cov);
        self.run_em(data, components, reg)
    }

    /// Absolute diagonal regularisation for a class with covariance `cov`.
    fn regularization(&self, cov: &Array2<f64>) -> f64 {
        let d = cov.nrows().max(1) as f64;
        let scale = cov.diag().sum() / d;
        if scale > 0.0 && scale.is_finite() {
            self.reg_covar * scale
        } else {
            self.reg_covar
        }
    }

    fn run_em(
        &self,
        data: ArrayView2<'_, f64>,
        mut components: Vec<GaussianComponent>,
        reg: f64,
    ) -> Result<GmmFit> {
        let n = data.nrows() as f64;
        let start = Instant::now();
        let mut best: Option<(f64, Vec<GaussianComponent>)> = None;
        let mut prev_mean_ll = f64::NEG_INFINITY;
        let mut converged = false;
        let mut timed_out = false;
        let mut iterations = 0;

        for iter in 0..self.max_iter {
            let dens = densities(&components)?;
            let (resp, ll) = e_step(data, &dens);
            iterations = iter + 1;
            keep_best(&mut best, ll, &components);

            let mean_ll = ll / n;
            tracing::trace!(iter, mean_ll, k = components.len(), "em iteration");
            if (mean_ll - prev_mean_ll).abs() < self.tol {
                converged = true;
                break;
            }
            prev_mean_ll = mean_ll;

            components = m_step(data, &resp, self.structure, reg, &components)?;

            if let Some(cap) = self.max_duration {
                if start.elapsed() >= cap {
                    timed_out = true;
                    break;
                }
            }
        }

        if !converged {
            // parameters from the last M-step have not been scored yet
            let dens = densities(&components)?;
            let (_, ll) = e_step(data, &dens);
            keep_best(&mut best, ll, &components);
            tracing::debug!(
                iterations,
                timed_out,
                "EM stopped before reaching tolerance"
            );
        }

        let (log_likelihood, components) = match best {
            Some(b) => b,
            None => {
                let dens = densities(&components)?;
                (e_step(data, &dens).1, components)
            }
        };

        Ok(GmmFit {
            components,
            structure: self.structure,
            status: FitStatus {
                converged,
                iterations,
                log_likelihood,
                timed_out,
            },
        })
    }
}

impl Default for Gmm {
    fn default() -> Self {
        Self::new()
    }
}

fn keep_best(
    best: &mut Option<(f64, Vec<GaussianComponent>)>,
    ll: f64,
    comps: &[GaussianComponent],
) {
    let better = match best {
        Some((b, _)) => ll > *b,
        None => true,
    };
    if better {
        *best = Some((ll, comps.to_vec()));
    }
}

fn densities(components: &[GaussianComponent]) -> Result<Vec<GaussianDensity>> {
    components.iter().map(GaussianDensity::new).collect()
}

/// Responsibilities (`n × K`) and total log-likelihood.
pub(crate) fn e_step(
    data: ArrayView2<'_, f64>,
    densities: &[GaussianDensity],
) -> (Array2<f64>, f64) {
    let n = data.nrows();
    let k = densities.len();

    let row = |i: usize| -> (Vec<f64>, f64) {
        let x = data.row(i);
        let mut log_probs: Vec<f64> = densities.iter().map(|g| g.weighted_log_pdf(x)).collect();
        let log_sum = linalg::log_sum_exp(&log_probs);
        if log_sum.is_finite() {
            for v in &mut log_probs {
                *v = (*v - log_sum).exp();
            }
        } else {
            log_probs.fill(1.0 / k as f64);
        }
        (log_probs, log_sum)
    };

    #[cfg(feature = "parallel")]
    let rows: Vec<(Vec<f64>, f64)> = (0..n).into_par_iter().map(row).collect();
    #[cfg(not(feature = "parallel"))]
    let rows: Vec<(Vec<f64>, f64)> = (0..n).map(row).collect();

    let mut resp = Array2::zeros((n, k));
    let mut total = 0.0;
    for (i, (r, ll)) in rows.into_iter().enumerate() {
        for (c, v) in r.into_iter().enumerate() {
            resp[[i, c]] = v;
        }
        total += ll;
    }
    (resp, total)
}

fn m_step(
    data: ArrayView2<'_, f64>,
    resp: &Array2<f64>,
    structure: CovarianceStructure,
    reg: f64,
    previous: &[GaussianComponent],
) -> Result<Vec<GaussianComponent>> {
    let n = data.nrows();
    let d = data.ncols();
    let resp_sum = resp.sum_axis(Axis(0));
    let min_mass = MIN_COMPONENT_MASS * n as f64;

    let mut out = Vec::with_capacity(previous.len());
    for (c, &nk) in resp_sum.iter().enumerate() {
        if nk < min_mass {
            tracing::debug!(component = c, mass = nk, "pruning empty component");
            continue;
        }
        let r = resp.column(c);
        let mean: Array1<f64> = data.t().dot(&r) / nk;

        let mut scatter = Array2::<f64>::zeros((d, d));
        for (i, x) in data.rows().into_iter().enumerate() {
            let w = r[i];
            if w == 0.0 {
                continue;
            }
            for a in 0..d {
                let da = x[a] - mean[a];
                for b in a..d {
                    scatter[[a, b]] += w * da * (x[b] - mean[b]);
                }
            }
        }
        scatter /= nk;
        linalg::symmetrize_upper(&mut scatter);

        let mut covariance = Covariance::from_full(&scatter, structure);
        covariance.add_to_diagonal(reg);
        out.push(GaussianComponent::new(nk / n as f64, nk, mean, covariance));
    }

    if out.is_empty() {
        return Err(Error::numerical(0, "every component collapsed"));
    }
    if out.len() < previous.len() {
        let total: f64 = out.iter().map(|c| c.weight).sum();
        for c in &mut out {
            c.weight /= total;
        }
    }
    Ok(out)
}

impl Clustering for Gmm {
    fn fit_predict(&self, data: &[Point]) -> Result<Vec<usize>> {
        let probs = self.fit_predict_proba(data)?;

        // Hard assignment: argmax
        Ok(probs
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    fn n_clusters(&self) -> usize {
        self.n_components
    }
}

impl SoftClustering for Gmm {
    fn fit_predict_proba(&self, data: &[Point]) -> Result<Vec<Vec<f64>>> {
        let d = data.first().map(Point::dim).ok_or(Error::EmptyInput)?;
        let arr = points_to_array(data, d)?;
        let fit = self.fit(arr.view())?;
        let resp = fit.responsibilities(arr.view())?;
        Ok(resp.rows().into_iter().map(|r| r.to_vec()).collect())
    }
}
