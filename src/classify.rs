//! Maximum-likelihood classification against a signature set.
//!
//! For a sample `x` the class log-likelihood is
//!
//! ```text
//! ln p(x | c) = ln Σₖ πₖ N(x | μₖ, Σₖ)
//! ```
//!
//! summed over the components of class `c`. The sample goes to the class with
//! the highest `ln p(x | c) + ln P(c)`, where `P(c)` is uniform for
//! [`Priors::Equal`] and proportional to training counts for
//! [`Priors::Population`].
//!
//! With a rejection threshold, a sample whose winning class log-likelihood
//! is below the threshold is assigned [`UNCLASSIFIED`] instead.

use crate::cluster::LogDensity;
use crate::error::{Error, Result};
use crate::io::read_signature_set;
use crate::linalg;
use crate::point::{Point, SampleCollection};
use crate::signature::{mixture_log_likelihood, GaussianDensity, SignatureSet};
use ndarray::ArrayView1;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Assignment of a rejected sample.
pub const UNCLASSIFIED: usize = usize::MAX;

/// Class prior used when ranking classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Priors {
    /// Pure maximum likelihood.
    #[default]
    Equal,
    /// Proportional to each class's training sample count.
    Population,
}

impl fmt::Display for Priors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priors::Equal => "equal",
            Priors::Population => "population",
        })
    }
}

impl FromStr for Priors {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" | "uniform" => Ok(Priors::Equal),
            "population" | "counts" => Ok(Priors::Population),
            other => Err(Error::InvalidParameter {
                name: "priors",
                message: format!("unknown prior '{other}'"),
            }),
        }
    }
}

/// One class prepared for evaluation.
#[derive(Debug, Clone)]
pub struct ClassDensity {
    title: String,
    count: usize,
    dimension: usize,
    components: Vec<GaussianDensity>,
}

impl ClassDensity {
    /// Class title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Training sample count.
    pub fn count(&self) -> usize {
        self.count
    }
}

impl LogDensity for ClassDensity {
    fn dim(&self) -> usize {
        self.dimension
    }

    fn log_density(&self, x: ArrayView1<'_, f64>) -> f64 {
        mixture_log_likelihood(&self.components, x)
    }
}

/// Classifier over a fixed signature set.
///
/// Classification involves no randomness: the same set and samples always
/// give the same assignments.
#[derive(Debug, Clone)]
pub struct Classifier {
    classes: Vec<ClassDensity>,
    dimension: usize,
    threshold: Option<f64>,
    priors: Priors,
}

impl Classifier {
    /// Prepare every class of `set`.
    ///
    /// Fails with [`Error::EmptyInput`] for an empty set and with
    /// [`Error::Numerical`] (naming the class) when a covariance cannot be
    /// factorised even after regularisation.
    pub fn new(set: &SignatureSet) -> Result<Self> {
        if set.is_empty() {
            return Err(Error::EmptyInput);
        }
        let classes = set
            .classes()
            .iter()
            .enumerate()
            .map(|(c, sig)| {
                let components = sig.densities().map_err(|e| e.for_class(c))?;
                if components.is_empty() {
                    return Err(Error::numerical(c, "class has no components"));
                }
                Ok(ClassDensity {
                    title: sig.title.clone(),
                    count: sig.count,
                    dimension: set.dimension(),
                    components,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            classes,
            dimension: set.dimension(),
            threshold: None,
            priors: Priors::Equal,
        })
    }

    /// Load a parameter file and prepare it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&read_signature_set(path)?)
    }

    /// Minimum accepted winning log-likelihood; `None` never rejects.
    pub fn with_rejection_threshold(mut self, threshold: Option<f64>) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the class prior.
    pub fn with_priors(mut self, priors: Priors) -> Self {
        self.priors = priors;
        self
    }

    /// Number of classes.
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    /// Point dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Prepared classes, in signature-set order.
    pub fn classes(&self) -> &[ClassDensity] {
        &self.classes
    }

    fn log_priors(&self) -> Vec<f64> {
        let k = self.classes.len();
        let total: usize = self.classes.iter().map(|c| c.count).sum();
        match self.priors {
            Priors::Population if total > 0 => self
                .classes
                .iter()
                .map(|c| (c.count as f64 / total as f64).ln())
                .collect(),
            _ => vec![-(k as f64).ln(); k],
        }
    }

    /// Classify `points`, one assignment per point in input order.
    pub fn classify(&self, points: &[Point]) -> Result<ClassificationResult> {
        if let Some(p) = points.iter().find(|p| p.dim() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: p.dim(),
            });
        }
        let log_priors = self.log_priors();

        let evaluate = |p: &Point| -> (usize, f64, Vec<f64>) {
            let x = ArrayView1::from(p.as_slice());
            let lls: Vec<f64> = self.classes.iter().map(|c| c.log_density(x)).collect();
            if p.as_slice().iter().any(|v| !v.is_finite()) {
                return (UNCLASSIFIED, f64::NEG_INFINITY, lls);
            }
            let mut best: Option<(usize, f64)> = None;
            for (c, ll) in lls.iter().enumerate() {
                let score = ll + log_priors[c];
                if score.is_nan() {
                    continue;
                }
                if best.map_or(true, |(_, b)| score > b) {
                    best = Some((c, score));
                }
            }
            match best {
                Some((c, _)) => {
                    let ll = lls[c];
                    let rejected =
                        !ll.is_finite() || self.threshold.is_some_and(|t| !(ll >= t));
                    (if rejected { UNCLASSIFIED } else { c }, ll, lls)
                }
                None => (UNCLASSIFIED, f64::NEG_INFINITY, lls),
            }
        };

        #[cfg(feature = "parallel")]
        let rows: Vec<(usize, f64, Vec<f64>)> = points.par_iter().map(evaluate).collect();
        #[cfg(not(feature = "parallel"))]
        let rows: Vec<(usize, f64, Vec<f64>)> = points.iter().map(evaluate).collect();

        let mut result = ClassificationResult {
            assignments: Vec::with_capacity(rows.len()),
            scores: Vec::with_capacity(rows.len()),
            log_likelihoods: Vec::with_capacity(rows.len()),
            log_priors,
        };
        for (a, s, lls) in rows {
            result.assignments.push(a);
            result.scores.push(s);
            result.log_likelihoods.push(lls);
        }

        let rejected = result.unclassified().len();
        tracing::debug!(
            samples = points.len(),
            classes = self.classes.len(),
            rejected,
            "classified samples"
        );
        Ok(result)
    }

    /// Classify every point of `samples` in class-major order, matching
    /// [`SampleCollection::iter_labelled`].
    pub fn classify_collection(&self, samples: &SampleCollection) -> Result<ClassificationResult> {
        if samples.dimension() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: samples.dimension(),
            });
        }
        let points: Vec<Point> = samples.iter_labelled().map(|(_, p)| p.clone()).collect();
        self.classify(&points)
    }
}

/// Per-sample outcome of a classification run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClassificationResult {
    /// Assigned class per sample, or [`UNCLASSIFIED`].
    pub assignments: Vec<usize>,
    /// Log-likelihood of the best class per sample (kept for rejected samples).
    pub scores: Vec<f64>,
    /// `log_likelihoods[i][c] = ln p(xᵢ | c)`.
    pub log_likelihoods: Vec<Vec<f64>>,
    #[cfg_attr(feature = "serde", serde(skip))]
    log_priors: Vec<f64>,
}

impl ClassificationResult {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True when no samples were classified.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Sample indices per assigned class; rejected samples are left out.
    pub fn groups(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, &a) in self.assignments.iter().enumerate() {
            if a != UNCLASSIFIED {
                groups.entry(a).or_default().push(i);
            }
        }
        groups
    }

    /// Indices of rejected samples.
    pub fn unclassified(&self) -> Vec<usize> {
        self.assignments
            .iter()
            .enumerate()
            .filter(|(_, &a)| a == UNCLASSIFIED)
            .map(|(i, _)| i)
            .collect()
    }

    /// Samples assigned to each class.
    pub fn class_counts(&self) -> Vec<usize> {
        let k = self.log_likelihoods.first().map_or(0, Vec::len);
        let mut counts = vec![0; k];
        for &a in &self.assignments {
            if a < k {
                counts[a] += 1;
            }
        }
        counts
    }

    /// Posterior class probabilities per sample.
    ///
    /// Rows of a sample with no finite likelihood are uniform.
    pub fn posteriors(&self) -> Vec<Vec<f64>> {
        self.log_likelihoods
            .iter()
            .map(|lls| {
                let k = lls.len();
                let joint: Vec<f64> = lls
                    .iter()
                    .enumerate()
                    .map(|(c, ll)| ll + self.log_priors.get(c).copied().unwrap_or(0.0))
                    .collect();
                let norm = linalg::log_sum_exp(&joint);
                if norm.is_finite() {
                    joint.iter().map(|v| (v - norm).exp()).collect()
                } else {
                    vec![1.0 / k as f64; k]
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{Covariance, CovarianceStructure, GaussianComponent, Signature};
    use ndarray::{Array1, Array2};

    fn class(title: &str, centre: [f64; 2], count: usize) -> Signature {
        let mut sig = Signature::new(title, CovarianceStructure::Full);
        sig.count = count;
        sig.components.push(GaussianComponent::new(
            1.0,
            count as f64,
            Array1::from(centre.to_vec()),
            Covariance::Full(Array2::eye(2)),
        ));
        sig
    }

    fn two_class_set() -> SignatureSet {
        let mut set = SignatureSet::new("t", 2);
        set.push(class("a", [0.0, 0.0], 10)).unwrap();
        set.push(class("b", [10.0, 10.0], 990)).unwrap();
        set
    }

    #[test]
    fn assigns_to_nearest_class() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        let pts = vec![
            Point::from([0.1, -0.2]),
            Point::from([9.7, 10.3]),
            Point::from([1.0, 0.5]),
        ];
        let result = clf.classify(&pts).unwrap();
        assert_eq!(result.assignments, vec![0, 1, 0]);
        assert_eq!(result.class_counts(), vec![2, 1]);
        assert_eq!(result.groups().get(&0), Some(&vec![0, 2]));
        assert!(result.unclassified().is_empty());
    }

    #[test]
    fn classification_is_deterministic() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        let pts: Vec<Point> = (0..200)
            .map(|i| Point::from([(i % 17) as f64 * 0.7, (i % 11) as f64 * 0.9]))
            .collect();
        let a = clf.classify(&pts).unwrap();
        let b = clf.classify(&pts).unwrap();
        assert_eq!(a.assignments, b.assignments);
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn rejection_threshold_has_two_tiers() {
        let far = vec![Point::from([50.0, -40.0])];
        let set = two_class_set();

        let forced = Classifier::new(&set)
            .unwrap()
            .with_rejection_threshold(Some(-1e6))
            .classify(&far)
            .unwrap();
        assert_ne!(forced.assignments[0], UNCLASSIFIED);

        let strict = Classifier::new(&set)
            .unwrap()
            .with_rejection_threshold(Some(-20.0))
            .classify(&far)
            .unwrap();
        assert_eq!(strict.assignments[0], UNCLASSIFIED);
        assert_eq!(strict.unclassified(), vec![0]);
        assert!(strict.groups().is_empty());
        // the best score is still reported
        assert_eq!(strict.scores[0], forced.scores[0]);
    }

    #[test]
    fn population_priors_shift_the_boundary() {
        let midpoint = vec![Point::from([5.0, 5.0])];
        let set = two_class_set();
        let equal = Classifier::new(&set).unwrap().classify(&midpoint).unwrap();
        let weighted = Classifier::new(&set)
            .unwrap()
            .with_priors(Priors::Population)
            .classify(&midpoint)
            .unwrap();
        // exact tie under equal priors goes to the first class
        assert_eq!(equal.assignments, vec![0]);
        assert_eq!(weighted.assignments, vec![1]);
        let post = weighted.posteriors();
        assert!((post[0][1] - 0.99).abs() < 1e-9);
    }

    #[test]
    fn posteriors_sum_to_one() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        let result = clf
            .classify(&[Point::from([3.0, 2.0]), Point::from([8.0, 9.0])])
            .unwrap();
        for row in result.posteriors() {
            assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn dimension_is_checked() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        assert!(matches!(
            clf.classify(&[Point::from([1.0, 2.0, 3.0])]),
            Err(Error::DimensionMismatch { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn empty_set_is_refused() {
        assert!(matches!(
            Classifier::new(&SignatureSet::new("empty", 2)),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn non_finite_sample_is_unclassified() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        let result = clf
            .classify(&[
                Point::from([f64::NAN, 0.0]),
                Point::from([f64::NAN, f64::NAN]),
                Point::from([f64::INFINITY, 0.0]),
                Point::from([0.0, 0.0]),
            ])
            .unwrap();
        assert_eq!(
            result.assignments,
            vec![UNCLASSIFIED, UNCLASSIFIED, UNCLASSIFIED, 0]
        );
        assert_eq!(result.unclassified(), vec![0, 1, 2]);
    }

    #[test]
    fn collection_order_is_class_major() {
        let clf = Classifier::new(&two_class_set()).unwrap();
        let samples =
            SampleCollection::from_rows(2, &[vec![10.0, 10.0], vec![0.0, 0.0]]).unwrap();
        let result = clf.classify_collection(&samples).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.assignments, vec![1, 0]);
    }
}
