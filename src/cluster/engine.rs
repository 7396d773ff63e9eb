//! Multi-class training: one mixture per class, bundled as a signature set.
//!
//! Classes are fitted independently. A class that fails (too few samples,
//! covariance that cannot be factorised) is recorded in the
//! [`TrainingReport`] and the remaining classes still complete.
//!
//! # Too little data
//!
//! A component with structure `s` in dimension `d` has
//! `p(s) = d + cov(s) + 1` free parameters. With the default
//! [`InsufficientData::Fallback`] policy a class of `n` samples is planned as:
//!
//! 1. keep the requested structure and lower the starting component count
//!    to `⌊n / p(s)⌋` if needed;
//! 2. if not even one component fits, step down full → diagonal → spherical;
//! 3. if one spherical component (`d + 2` parameters) does not fit either,
//!    the class fails with [`Error::InsufficientData`].
//!
//! [`InsufficientData::Fail`] skips the reductions and fails at step 1.

use super::gmm::{FitStatus, Gmm};
use super::init::Init;
use super::order::{select_order, Order, OrderCandidate};
use crate::error::{Error, Result};
use crate::io::write_signature_set;
use crate::point::SampleCollection;
use crate::signature::{CovarianceStructure, SignatureSet};
use std::path::Path;
use std::time::Duration;

/// What to do when a class has too few samples for the requested model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum InsufficientData {
    /// Reduce component count, then structure.
    #[default]
    Fallback,
    /// Fail the class.
    Fail,
}

/// Training configuration.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterConfig {
    /// Initial components per class.
    pub n_components: usize,
    /// Requested covariance structure.
    pub structure: CovarianceStructure,
    /// Component-count policy.
    pub order: Order,
    /// Maximum EM iterations per run.
    pub max_iter: usize,
    /// Tolerance on the mean per-sample log-likelihood change.
    pub tol: f64,
    /// Covariance regularisation relative to the mean class variance.
    pub reg_covar: f64,
    /// Seed; class `c` uses `seed + c`.
    pub seed: Option<u64>,
    /// Mean seeding.
    pub init: Init,
    /// Wall-clock cap per EM run.
    pub max_duration: Option<Duration>,
    /// Policy for classes with too few samples.
    pub insufficient_data: InsufficientData,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            n_components: 8,
            structure: CovarianceStructure::Full,
            order: Order::Fixed,
            max_iter: 200,
            tol: 1e-4,
            reg_covar: 1e-6,
            seed: None,
            init: Init::default(),
            max_duration: None,
            insufficient_data: InsufficientData::Fallback,
        }
    }
}

impl ClusterConfig {
    /// Set initial components per class.
    pub fn with_n_components(mut self, n: usize) -> Self {
        self.n_components = n;
        self
    }

    /// Set covariance structure.
    pub fn with_structure(mut self, structure: CovarianceStructure) -> Self {
        self.structure = structure;
        self
    }

    /// Set component-count policy.
    pub fn with_order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Set maximum EM iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set mean seeding.
    pub fn with_init(mut self, init: Init) -> Self {
        self.init = init;
        self
    }

    /// Set the wall-clock cap per EM run.
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    /// Set the insufficient-data policy.
    pub fn with_insufficient_data(mut self, policy: InsufficientData) -> Self {
        self.insufficient_data = policy;
        self
    }
}

/// Model actually fitted for a class after the insufficient-data policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelPlan {
    /// Covariance structure used.
    pub structure: CovarianceStructure,
    /// Starting component count used.
    pub n_components: usize,
}

/// Plan the model for `n` samples in dimension `d`.
pub fn plan_model(
    n: usize,
    d: usize,
    requested: ModelPlan,
    policy: InsufficientData,
) -> Result<ModelPlan> {
    let required = |s: CovarianceStructure, k: usize| k * s.component_parameters(d);
    if n >= required(requested.structure, requested.n_components) {
        return Ok(requested);
    }
    if policy == InsufficientData::Fail {
        return Err(Error::InsufficientData {
            class: 0,
            samples: n,
            required: required(requested.structure, requested.n_components),
        });
    }

    let mut structure = requested.structure;
    loop {
        let k = (n / structure.component_parameters(d)).min(requested.n_components);
        if k >= 1 {
            return Ok(ModelPlan {
                structure,
                n_components: k,
            });
        }
        match structure.reduced() {
            Some(next) => structure = next,
            None => {
                return Err(Error::InsufficientData {
                    class: 0,
                    samples: n,
                    required: required(structure, 1),
                })
            }
        }
    }
}

/// A class that trained successfully.
#[derive(Debug, Clone)]
pub struct ClassFit {
    /// Index of the class's signature in [`TrainingReport::signatures`].
    pub signature_index: usize,
    /// Model fitted after the insufficient-data policy.
    pub plan: ModelPlan,
    /// EM report of the chosen fit.
    pub status: FitStatus,
    /// Scores of every component count visited.
    pub candidates: Vec<OrderCandidate>,
}

/// Training outcome of one input class.
#[derive(Debug)]
pub struct ClassOutcome {
    /// Input class index.
    pub class: usize,
    /// Class title.
    pub title: String,
    /// Training samples.
    pub samples: usize,
    /// Fit or per-class failure.
    pub result: Result<ClassFit>,
}

/// Signatures of every class that trained, plus per-class outcomes.
#[derive(Debug)]
pub struct TrainingReport {
    /// Signatures of successful classes, in input class order.
    pub signatures: SignatureSet,
    /// One entry per input class.
    pub outcomes: Vec<ClassOutcome>,
}

impl TrainingReport {
    /// Failed classes and their errors.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.class, e)))
    }

    /// True when every class trained.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// True when every class reached the EM tolerance.
    pub fn all_converged(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(&o.result, Ok(fit) if fit.status.converged))
    }

    /// The signature set, or the first class failure.
    pub fn into_result(self) -> Result<SignatureSet> {
        for outcome in self.outcomes {
            outcome.result?;
        }
        Ok(self.signatures)
    }
}

/// Fits a Gaussian mixture per class.
#[derive(Debug, Clone, Default)]
pub struct ClusterEngine {
    config: ClusterConfig,
}

impl ClusterEngine {
    /// Engine with `config`.
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Train every class of `samples`.
    pub fn fit(&self, samples: &SampleCollection) -> Result<TrainingReport> {
        self.fit_titled(samples, "")
    }

    /// Train every class; `title` becomes the signature set title.
    pub fn fit_titled(
        &self,
        samples: &SampleCollection,
        title: impl Into<String>,
    ) -> Result<TrainingReport> {
        if self.config.n_components == 0 {
            return Err(Error::InvalidParameter {
                name: "n_components",
                message: "must be > 0".into(),
            });
        }
        if samples.n_classes() == 0 {
            return Err(Error::EmptyInput);
        }

        let mut signatures = SignatureSet::new(title, samples.dimension());
        let mut outcomes = Vec::with_capacity(samples.n_classes());
        for (class, class_samples) in samples.classes().iter().enumerate() {
            let result = self
                .fit_class(samples, class, &mut signatures)
                .map_err(|e| e.for_class(class));
            match &result {
                Ok(fit) => tracing::info!(
                    class,
                    title = %class_samples.title,
                    components = signatures.classes()[fit.signature_index].n_components(),
                    structure = %fit.plan.structure,
                    converged = fit.status.converged,
                    iterations = fit.status.iterations,
                    "class trained"
                ),
                Err(error) => tracing::warn!(class, %error, "class failed to train"),
            }
            outcomes.push(ClassOutcome {
                class,
                title: class_samples.title.clone(),
                samples: class_samples.len(),
                result,
            });
        }
        Ok(TrainingReport {
            signatures,
            outcomes,
        })
    }

    /// Train and write the signature set of the classes that succeeded.
    pub fn fit_to_file(
        &self,
        samples: &SampleCollection,
        title: impl Into<String>,
        path: impl AsRef<Path>,
    ) -> Result<TrainingReport> {
        let report = self.fit_titled(samples, title)?;
        if report.signatures.is_empty() {
            let error = report
                .outcomes
                .into_iter()
                .find_map(|o| o.result.err())
                .unwrap_or(Error::EmptyInput);
            return Err(error);
        }
        write_signature_set(path, &report.signatures)?;
        Ok(report)
    }

    fn fit_class(
        &self,
        samples: &SampleCollection,
        class: usize,
        signatures: &mut SignatureSet,
    ) -> Result<ClassFit> {
        let cfg = &self.config;
        let class_samples = samples.class(class)?;
        let data = samples.to_array(class)?;
        let (n, d) = data.dim();

        let requested = ModelPlan {
            structure: cfg.structure,
            n_components: cfg.n_components,
        };
        let plan = plan_model(n, d, requested, cfg.insufficient_data)?;
        if plan != requested {
            tracing::warn!(
                class,
                samples = n,
                structure = %plan.structure,
                components = plan.n_components,
                "too few samples for requested model, reduced"
            );
        }

        let gmm = Gmm::new()
            .with_n_components(plan.n_components)
            .with_structure(plan.structure)
            .with_max_iter(cfg.max_iter)
            .with_tol(cfg.tol)
            .with_reg_covar(cfg.reg_covar)
            .with_seed_opt(cfg.seed.map(|s| s.wrapping_add(class as u64)))
            .with_init(cfg.init)
            .with_max_duration(cfg.max_duration);
        let order = match cfg.order {
            Order::Target(k) => Order::Target(k.min(plan.n_components)),
            other => other,
        };

        let (fit, candidates) = select_order(&gmm, data.view(), order)?;
        let status = fit.status;
        if !status.converged {
            tracing::warn!(class, iterations = status.iterations, "EM did not converge");
        }
        let signature = fit.into_signature(class_samples.title.clone(), n);
        let signature_index = signatures.push(signature)?;
        Ok(ClassFit {
            signature_index,
            plan,
            status,
            candidates,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point;
    use rand::prelude::*;
    use rand_distr::Normal;

    fn blob(center: [f64; 2], n: usize, sd: f64, rng: &mut StdRng) -> Vec<Point> {
        let noise = Normal::new(0.0, sd).unwrap();
        (0..n)
            .map(|_| {
                Point::from([
                    center[0] + noise.sample(rng),
                    center[1] + noise.sample(rng),
                ])
            })
            .collect()
    }

    #[test]
    fn plan_keeps_requested_model_when_data_suffices() {
        let req = ModelPlan {
            structure: CovarianceStructure::Full,
            n_components: 4,
        };
        assert_eq!(plan_model(100, 2, req, InsufficientData::Fallback).unwrap(), req);
    }

    #[test]
    fn plan_reduces_count_then_structure() {
        let req = ModelPlan {
            structure: CovarianceStructure::Full,
            n_components: 8,
        };
        // full needs 6 per component in 2-D
        let p = plan_model(13, 2, req, InsufficientData::Fallback).unwrap();
        assert_eq!(p.structure, CovarianceStructure::Full);
        assert_eq!(p.n_components, 2);

        let p = plan_model(5, 2, req, InsufficientData::Fallback).unwrap();
        assert_eq!(p.structure, CovarianceStructure::Diagonal);
        assert_eq!(p.n_components, 1);

        let p = plan_model(4, 2, req, InsufficientData::Fallback).unwrap();
        assert_eq!(p.structure, CovarianceStructure::Spherical);

        assert!(matches!(
            plan_model(3, 2, req, InsufficientData::Fallback),
            Err(Error::InsufficientData { samples: 3, required: 4, .. })
        ));
        assert!(matches!(
            plan_model(13, 2, req, InsufficientData::Fail),
            Err(Error::InsufficientData { required: 48, .. })
        ));
    }

    #[test]
    fn trains_every_class_and_weights_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(17);
        let mut samples = SampleCollection::new(2);
        let mut a = blob([0.0, 0.0], 80, 1.0, &mut rng);
        a.extend(blob([6.0, 0.0], 80, 1.0, &mut rng));
        samples.push_class("a", a).unwrap();
        samples
            .push_class("b", blob([0.0, 10.0], 100, 0.5, &mut rng))
            .unwrap();

        let engine = ClusterEngine::new(
            ClusterConfig::default()
                .with_n_components(3)
                .with_order(Order::Mdl)
                .with_seed(1),
        );
        let report = engine.fit_titled(&samples, "demo").unwrap();
        assert!(report.is_complete());
        assert_eq!(report.signatures.len(), 2);
        assert_eq!(report.signatures.title, "demo");
        for sig in report.signatures.classes() {
            assert!((sig.total_weight() - 1.0).abs() < 1e-9);
        }
        assert_eq!(report.signatures.class(0).unwrap().count, 160);
        report.signatures.validate().unwrap();
    }

    #[test]
    fn failed_class_does_not_stop_others() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut samples = SampleCollection::new(2);
        samples
            .push_class("good", blob([0.0, 0.0], 50, 1.0, &mut rng))
            .unwrap();
        samples
            .push_class("tiny", vec![Point::from([1.0, 1.0]), Point::from([2.0, 2.0])])
            .unwrap();
        samples
            .push_class("also good", blob([5.0, 5.0], 50, 1.0, &mut rng))
            .unwrap();

        let report = ClusterEngine::new(ClusterConfig::default().with_n_components(2).with_seed(3))
            .fit(&samples)
            .unwrap();
        assert!(!report.is_complete());
        let failures: Vec<usize> = report.failures().map(|(c, _)| c).collect();
        assert_eq!(failures, vec![1]);
        assert!(matches!(
            report.outcomes[1].result,
            Err(Error::InsufficientData { class: 1, .. })
        ));
        assert_eq!(report.signatures.len(), 2);
        assert_eq!(report.signatures.class(1).unwrap().title, "also good");
        assert!(report.into_result().is_err());
    }

    #[test]
    fn numerical_failure_is_isolated_to_its_class() {
        let mut rng = StdRng::seed_from_u64(6);
        let mut samples = SampleCollection::new(2);
        samples
            .push_class("good", blob([0.0, 0.0], 40, 1.0, &mut rng))
            .unwrap();
        let mut corrupt = blob([3.0, 3.0], 40, 1.0, &mut rng);
        corrupt.push(Point::from([f64::NAN, 3.0]));
        samples.push_class("corrupt", corrupt).unwrap();
        samples
            .push_class("also good", blob([6.0, 0.0], 40, 1.0, &mut rng))
            .unwrap();

        let report = ClusterEngine::new(ClusterConfig::default().with_n_components(2).with_seed(1))
            .fit(&samples)
            .unwrap();
        let failures: Vec<usize> = report.failures().map(|(c, _)| c).collect();
        assert_eq!(failures, vec![1]);
        assert!(matches!(
            report.outcomes[1].result,
            Err(Error::Numerical { class: 1, .. })
        ));
        assert_eq!(report.signatures.len(), 2);
        assert_eq!(report.signatures.class(0).unwrap().title, "good");
        assert_eq!(report.signatures.class(1).unwrap().title, "also good");
        report.signatures.validate().unwrap();
    }

    #[test]
    fn fit_to_file_writes_parameters() {
        let mut rng = StdRng::seed_from_u64(9);
        let samples = {
            let mut s = SampleCollection::new(2);
            s.push_class("only", blob([1.0, 2.0], 60, 1.0, &mut rng))
                .unwrap();
            s
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sig");
        let report = ClusterEngine::new(ClusterConfig::default().with_n_components(2).with_seed(5))
            .fit_to_file(&samples, "file", &path)
            .unwrap();
        let back = crate::io::read_signature_set(&path).unwrap();
        assert_eq!(back, report.signatures);
    }

    #[test]
    fn fit_to_file_with_no_trained_class_writes_nothing() {
        let mut samples = SampleCollection::new(2);
        samples
            .push_class("tiny", vec![Point::from([0.0, 0.0])])
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.sig");
        let err = ClusterEngine::default()
            .fit_to_file(&samples, "x", &path)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientData { class: 0, .. }));
        assert!(!path.exists());
    }
}
