//! Gaussian components, class signatures and signature sets.
//!
//! A class is modelled as a weighted sum of Gaussians:
//!
//! ```text
//! p(x | class) = Σₖ πₖ × N(x | μₖ, Σₖ)
//! ```
//!
//! The covariance of each component is stored in the shape selected by
//! [`CovarianceStructure`]: a full d × d matrix, a diagonal, or a single
//! isotropic variance. A [`Signature`] is one class's component list and a
//! [`SignatureSet`] is the ordered list of classes produced by training and
//! persisted in parameter files.
//!
//! [`GaussianDensity`] is the evaluation-side view of a component: it caches
//! the factored precision (or inverse variances) and log normaliser so that the
//! per-sample cost is a quadratic form.

use crate::error::{Error, Result};
use crate::linalg;
use ndarray::{Array1, Array2, ArrayView1};
use std::fmt;
use std::str::FromStr;

/// Tolerance on `Σ πₖ = 1` when validating a signature.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Shape constraint on a component's covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CovarianceStructure {
    /// Full symmetric matrix (off-diagonal terms kept).
    #[default]
    Full,
    /// Diagonal matrix (independent features).
    Diagonal,
    /// Isotropic `σ² I`.
    Spherical,
}

impl CovarianceStructure {
    /// All structures from most to least expressive.
    pub const ALL: [CovarianceStructure; 3] = [
        CovarianceStructure::Full,
        CovarianceStructure::Diagonal,
        CovarianceStructure::Spherical,
    ];

    /// Name used in parameter files and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            CovarianceStructure::Full => "full",
            CovarianceStructure::Diagonal => "diagonal",
            CovarianceStructure::Spherical => "spherical",
        }
    }

    /// Free covariance parameters in dimension `d`.
    pub fn covariance_parameters(&self, d: usize) -> usize {
        match self {
            CovarianceStructure::Full => d * (d + 1) / 2,
            CovarianceStructure::Diagonal => d,
            CovarianceStructure::Spherical => 1,
        }
    }

    /// Free parameters of one component: mean, covariance and weight.
    pub fn component_parameters(&self, d: usize) -> usize {
        d + self.covariance_parameters(d) + 1
    }

    /// Next less expressive structure.
    pub fn reduced(&self) -> Option<Self> {
        match self {
            CovarianceStructure::Full => Some(CovarianceStructure::Diagonal),
            CovarianceStructure::Diagonal => Some(CovarianceStructure::Spherical),
            CovarianceStructure::Spherical => None,
        }
    }
}

impl fmt::Display for CovarianceStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CovarianceStructure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(CovarianceStructure::Full),
            "diagonal" | "diag" => Ok(CovarianceStructure::Diagonal),
            "spherical" | "sphere" => Ok(CovarianceStructure::Spherical),
            other => Err(Error::InvalidParameter {
                name: "structure",
                message: format!("unknown covariance structure '{other}'"),
            }),
        }
    }
}

/// Covariance in the storage shape of its structure.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Covariance {
    /// d × d symmetric matrix.
    Full(Array2<f64>),
    /// Per-feature variances.
    Diagonal(Array1<f64>),
    /// Shared variance.
    Spherical(f64),
}

impl Covariance {
    /// Project a full covariance onto `structure`.
    ///
    /// Diagonal keeps the variances; spherical keeps their mean.
    pub fn from_full(full: &Array2<f64>, structure: CovarianceStructure) -> Self {
        match structure {
            CovarianceStructure::Full => Covariance::Full(full.clone()),
            CovarianceStructure::Diagonal => Covariance::Diagonal(full.diag().to_owned()),
            CovarianceStructure::Spherical => {
                let d = full.nrows().max(1);
                Covariance::Spherical(full.diag().sum() / d as f64)
            }
        }
    }

    /// Structure of this covariance.
    pub fn structure(&self) -> CovarianceStructure {
        match self {
            Covariance::Full(_) => CovarianceStructure::Full,
            Covariance::Diagonal(_) => CovarianceStructure::Diagonal,
            Covariance::Spherical(_) => CovarianceStructure::Spherical,
        }
    }

    /// Variance of feature `i`.
    pub fn variance(&self, i: usize) -> f64 {
        match self {
            Covariance::Full(m) => m[[i, i]],
            Covariance::Diagonal(v) => v[i],
            Covariance::Spherical(s) => *s,
        }
    }

    /// Trace in dimension `d`.
    pub fn trace(&self, d: usize) -> f64 {
        match self {
            Covariance::Full(m) => m.diag().sum(),
            Covariance::Diagonal(v) => v.sum(),
            Covariance::Spherical(s) => s * d as f64,
        }
    }

    /// Dense d × d matrix.
    pub fn to_full(&self, d: usize) -> Array2<f64> {
        match self {
            Covariance::Full(m) => m.clone(),
            Covariance::Diagonal(v) => Array2::from_diag(v),
            Covariance::Spherical(s) => Array2::eye(d) * *s,
        }
    }

    /// Add `eps` to every variance.
    pub fn add_to_diagonal(&mut self, eps: f64) {
        match self {
            Covariance::Full(m) => linalg::add_to_diagonal(m, eps),
            Covariance::Diagonal(v) => v.mapv_inplace(|x| x + eps),
            Covariance::Spherical(s) => *s += eps,
        }
    }

    fn check_shape(&self, d: usize) -> Result<()> {
        let found = match self {
            Covariance::Full(m) if m.nrows() != d || m.ncols() != d => Some(m.nrows()),
            Covariance::Diagonal(v) if v.len() != d => Some(v.len()),
            _ => None,
        };
        match found {
            Some(found) => Err(Error::DimensionMismatch { expected: d, found }),
            None => Ok(()),
        }
    }
}

/// One Gaussian component of a class mixture.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GaussianComponent {
    /// Mixture weight πₖ in [0, 1].
    pub weight: f64,
    /// Expected number of class samples explained by this component.
    pub count: f64,
    /// Mean vector μₖ.
    pub mean: Array1<f64>,
    /// Covariance Σₖ.
    pub covariance: Covariance,
}

impl GaussianComponent {
    /// Create a component.
    pub fn new(weight: f64, count: f64, mean: Array1<f64>, covariance: Covariance) -> Self {
        Self {
            weight,
            count,
            mean,
            covariance,
        }
    }

    /// Dimension of the mean.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }
}

/// Weight-sum, mean and full covariance of a moment-matched single Gaussian.
///
/// Used when merging components and when measuring how far apart two groups
/// of components are.
pub(crate) fn moment_match<'a>(
    components: impl IntoIterator<Item = &'a GaussianComponent>,
    d: usize,
) -> (f64, Array1<f64>, Array2<f64>) {
    let comps: Vec<&GaussianComponent> = components.into_iter().collect();
    let total: f64 = comps.iter().map(|c| c.weight).sum();
    let mut mean = Array1::<f64>::zeros(d);
    let mut cov = Array2::<f64>::zeros((d, d));
    if total <= 0.0 {
        return (0.0, mean, cov);
    }
    for c in &comps {
        mean.scaled_add(c.weight / total, &c.mean);
    }
    for c in &comps {
        let w = c.weight / total;
        let diff = &c.mean - &mean;
        let mut term = c.covariance.to_full(d);
        for i in 0..d {
            for j in 0..d {
                term[[i, j]] += diff[i] * diff[j];
            }
        }
        cov.scaled_add(w, &term);
    }
    (total, mean, cov)
}

/// A class's Gaussian mixture.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Signature {
    /// Free-text class title.
    pub title: String,
    /// Number of training samples of the class.
    pub count: usize,
    /// Covariance structure shared by all components.
    pub structure: CovarianceStructure,
    /// Mixture components.
    pub components: Vec<GaussianComponent>,
}

impl Signature {
    /// Empty signature.
    pub fn new(title: impl Into<String>, structure: CovarianceStructure) -> Self {
        Self {
            title: title.into(),
            count: 0,
            structure,
            components: Vec::new(),
        }
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// Σ πₖ.
    pub fn total_weight(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }

    /// Rescale weights to sum to one.
    pub fn normalize_weights(&mut self) {
        let total = self.total_weight();
        if total > 0.0 {
            for c in &mut self.components {
                c.weight /= total;
            }
        }
    }

    /// Free parameters of the mixture in dimension `d`.
    ///
    /// Weights contribute `K - 1` since they are constrained to sum to one.
    pub fn n_parameters(&self, d: usize) -> usize {
        let k = self.components.len();
        if k == 0 {
            return 0;
        }
        k * self.structure.component_parameters(d) - 1
    }

    /// Moment-matched mean and covariance of the whole mixture.
    pub fn moments(&self, d: usize) -> (Array1<f64>, Array2<f64>) {
        let (_, mean, cov) = moment_match(&self.components, d);
        (mean, cov)
    }

    /// Densities of every component, ready for evaluation.
    pub fn densities(&self) -> Result<Vec<GaussianDensity>> {
        self.components.iter().map(GaussianDensity::new).collect()
    }

    /// `ln p(x | class)`.
    pub fn log_likelihood(&self, x: &[f64]) -> Result<f64> {
        let densities = self.densities()?;
        Ok(mixture_log_likelihood(&densities, ArrayView1::from(x)))
    }
}

/// Ordered list of class signatures sharing one dimension.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SignatureSet {
    /// Free-text title.
    pub title: String,
    dimension: usize,
    classes: Vec<Signature>,
}

impl SignatureSet {
    /// Empty set of `dimension`-dimensional signatures.
    pub fn new(title: impl Into<String>, dimension: usize) -> Self {
        Self {
            title: title.into(),
            dimension,
            classes: Vec::new(),
        }
    }

    /// Append a class signature; returns its index.
    pub fn push(&mut self, signature: Signature) -> Result<usize> {
        for c in &signature.components {
            if c.dim() != self.dimension {
                return Err(Error::DimensionMismatch {
                    expected: self.dimension,
                    found: c.dim(),
                });
            }
            c.covariance.check_shape(self.dimension)?;
        }
        self.classes.push(signature);
        Ok(self.classes.len() - 1)
    }

    /// Vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True when no class is present.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Class signature by index.
    pub fn class(&self, index: usize) -> Result<&Signature> {
        self.classes.get(index).ok_or(Error::UnknownClass {
            index,
            n_classes: self.classes.len(),
        })
    }

    /// All classes in index order.
    pub fn classes(&self) -> &[Signature] {
        &self.classes
    }

    /// Check the invariants a trained set must satisfy.
    ///
    /// Every class has at least one component, weights are non-negative and
    /// sum to one, and every variance is positive and finite.
    pub fn validate(&self) -> Result<()> {
        for (k, sig) in self.classes.iter().enumerate() {
            if sig.components.is_empty() {
                return Err(Error::numerical(k, "class has no components"));
            }
            for c in &sig.components {
                if c.dim() != self.dimension {
                    return Err(Error::DimensionMismatch {
                        expected: self.dimension,
                        found: c.dim(),
                    });
                }
                c.covariance.check_shape(self.dimension)?;
                if !(c.weight >= 0.0) || !c.weight.is_finite() {
                    return Err(Error::numerical(k, format!("invalid weight {}", c.weight)));
                }
                for i in 0..self.dimension {
                    let v = c.covariance.variance(i);
                    if !(v > 0.0) || !v.is_finite() {
                        return Err(Error::numerical(k, format!("invalid variance {v}")));
                    }
                }
            }
            let total = sig.total_weight();
            if (total - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(Error::numerical(
                    k,
                    format!("component weights sum to {total}"),
                ));
            }
        }
        Ok(())
    }
}

/// Diagonal-loading factors tried, relative to the average variance, when a
/// covariance fails to factorise.
const DIAGONAL_LOADING: [f64; 5] = [1e-10, 1e-8, 1e-6, 1e-4, 1e-2];

#[derive(Debug, Clone)]
enum DensityKind {
    Full { factor: linalg::SpdFactor },
    Diagonal { inv_var: Array1<f64> },
    Spherical { inv_var: f64 },
}

/// Precomputed weighted log-density of one component.
#[derive(Debug, Clone)]
pub struct GaussianDensity {
    log_weight: f64,
    log_norm: f64,
    mean: Array1<f64>,
    kind: DensityKind,
}

impl GaussianDensity {
    /// Prepare `component` for evaluation.
    ///
    /// A covariance that is not positive definite is regularised by adding a
    /// growing multiple of its average variance to the diagonal; if that still
    /// fails the result is [`Error::Numerical`] (class 0, relabelled by callers).
    pub fn new(component: &GaussianComponent) -> Result<Self> {
        let d = component.dim();
        if d == 0 {
            return Err(Error::EmptyInput);
        }
        if component.weight < 0.0 || !component.weight.is_finite() {
            return Err(Error::numerical(0, format!("invalid weight {}", component.weight)));
        }
        if component.mean.iter().any(|v| !v.is_finite()) {
            return Err(Error::numerical(0, "non-finite mean"));
        }
        component.covariance.check_shape(d)?;

        let half_log_2pi = 0.5 * d as f64 * (2.0 * std::f64::consts::PI).ln();
        let (kind, log_det) = match &component.covariance {
            Covariance::Full(m) => {
                let factor = factor_with_loading(m)?;
                let log_det = factor.log_det();
                (DensityKind::Full { factor }, log_det)
            }
            Covariance::Diagonal(v) => {
                let v = positive_variances(v)?;
                let log_det = v.iter().map(|x| x.ln()).sum();
                (
                    DensityKind::Diagonal {
                        inv_var: v.mapv(|x| 1.0 / x),
                    },
                    log_det,
                )
            }
            Covariance::Spherical(s) => {
                let s = positive_variances(&Array1::from_elem(1, *s))?[0];
                (
                    DensityKind::Spherical { inv_var: 1.0 / s },
                    d as f64 * s.ln(),
                )
            }
        };

        Ok(Self {
            log_weight: component.weight.ln(),
            log_norm: -half_log_2pi - 0.5 * log_det,
            mean: component.mean.clone(),
            kind,
        })
    }

    /// `ln N(x | μ, Σ)`.
    pub fn log_pdf(&self, x: ArrayView1<'_, f64>) -> f64 {
        let diff = &x - &self.mean;
        let maha = match &self.kind {
            DensityKind::Full { factor } => factor.mahalanobis_sq(diff.view()),
            DensityKind::Diagonal { inv_var } => diff
                .iter()
                .zip(inv_var.iter())
                .map(|(d, iv)| d * d * iv)
                .sum(),
            DensityKind::Spherical { inv_var } => diff.dot(&diff) * inv_var,
        };
        self.log_norm - 0.5 * maha
    }

    /// `ln πₖ + ln N(x | μ, Σ)`.
    pub fn weighted_log_pdf(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.log_weight + self.log_pdf(x)
    }
}

impl crate::cluster::LogDensity for GaussianDensity {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn log_density(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.log_pdf(x)
    }
}

/// `ln Σₖ πₖ N(x | μₖ, Σₖ)`.
pub fn mixture_log_likelihood(densities: &[GaussianDensity], x: ArrayView1<'_, f64>) -> f64 {
    let terms: Vec<f64> = densities.iter().map(|g| g.weighted_log_pdf(x)).collect();
    linalg::log_sum_exp(&terms)
}

fn factor_with_loading(m: &Array2<f64>) -> Result<linalg::SpdFactor> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(Error::numerical(0, "non-finite covariance"));
    }
    if let Some(f) = linalg::SpdFactor::new(m) {
        return Ok(f);
    }
    let d = m.nrows().max(1);
    let scale = (m.diag().iter().map(|v| v.abs()).sum::<f64>() / d as f64).max(f64::MIN_POSITIVE);
    for eps in DIAGONAL_LOADING {
        let mut loaded = m.clone();
        linalg::add_to_diagonal(&mut loaded, eps * scale);
        if let Some(f) = linalg::SpdFactor::new(&loaded) {
            tracing::debug!(eps, "covariance regularised before factorisation");
            return Ok(f);
        }
    }
    Err(Error::numerical(
        0,
        "covariance not positive definite after regularisation",
    ))
}

fn positive_variances(v: &Array1<f64>) -> Result<Array1<f64>> {
    if v.iter().any(|x| !x.is_finite() || *x < 0.0) {
        return Err(Error::numerical(0, "negative or non-finite variance"));
    }
    let positive: Vec<f64> = v.iter().copied().filter(|x| *x > 0.0).collect();
    if positive.len() == v.len() {
        return Ok(v.clone());
    }
    if positive.is_empty() {
        return Err(Error::numerical(0, "all variances are zero"));
    }
    let floor = DIAGONAL_LOADING[2] * positive.iter().sum::<f64>() / positive.len() as f64;
    tracing::debug!(floor, "zero variance regularised");
    Ok(v.mapv(|x| if x > 0.0 { x } else { floor }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn unit_component(mean: [f64; 2], weight: f64) -> GaussianComponent {
        GaussianComponent::new(
            weight,
            10.0,
            Array1::from(mean.to_vec()),
            Covariance::Full(Array2::eye(2)),
        )
    }

    #[test]
    fn structure_parsing_and_parameters() {
        assert_eq!(
            "diag".parse::<CovarianceStructure>().unwrap(),
            CovarianceStructure::Diagonal
        );
        assert!("banana".parse::<CovarianceStructure>().is_err());
        assert_eq!(CovarianceStructure::Full.component_parameters(2), 6);
        assert_eq!(CovarianceStructure::Diagonal.component_parameters(2), 5);
        assert_eq!(CovarianceStructure::Spherical.component_parameters(2), 4);
        assert_eq!(CovarianceStructure::Spherical.reduced(), None);
    }

    #[test]
    fn density_matches_standard_normal() {
        let c = unit_component([0.0, 0.0], 1.0);
        let g = GaussianDensity::new(&c).unwrap();
        let expected = -(2.0 * std::f64::consts::PI).ln();
        assert!((g.log_pdf(array![0.0, 0.0].view()) - expected).abs() < 1e-12);
        assert!((g.log_pdf(array![1.0, 0.0].view()) - (expected - 0.5)).abs() < 1e-12);
    }

    #[test]
    fn structures_agree_on_isotropic_covariance() {
        let x = array![0.3, -1.2];
        let full = GaussianComponent::new(
            1.0,
            1.0,
            array![0.0, 0.5],
            Covariance::Full(Array2::eye(2) * 2.0),
        );
        let mut diag = full.clone();
        diag.covariance = Covariance::Diagonal(array![2.0, 2.0]);
        let mut sph = full.clone();
        sph.covariance = Covariance::Spherical(2.0);

        let a = GaussianDensity::new(&full).unwrap().log_pdf(x.view());
        let b = GaussianDensity::new(&diag).unwrap().log_pdf(x.view());
        let c = GaussianDensity::new(&sph).unwrap().log_pdf(x.view());
        assert!((a - b).abs() < 1e-12);
        assert!((a - c).abs() < 1e-12);
    }

    #[test]
    fn singular_covariance_is_regularised() {
        let c = GaussianComponent::new(
            1.0,
            4.0,
            array![0.0, 0.0],
            Covariance::Full(array![[1.0, 1.0], [1.0, 1.0]]),
        );
        let g = GaussianDensity::new(&c).unwrap();
        assert!(g.log_pdf(array![0.5, 0.5].view()).is_finite());
    }

    #[test]
    fn negative_variance_is_numerical_error() {
        let c = GaussianComponent::new(
            1.0,
            4.0,
            array![0.0, 0.0],
            Covariance::Diagonal(array![1.0, -1.0]),
        );
        assert!(matches!(
            GaussianDensity::new(&c),
            Err(Error::Numerical { .. })
        ));
    }

    #[test]
    fn moment_match_of_two_points() {
        let a = GaussianComponent::new(
            0.5,
            1.0,
            array![-1.0, 0.0],
            Covariance::Spherical(1.0),
        );
        let b = GaussianComponent::new(0.5, 1.0, array![1.0, 0.0], Covariance::Spherical(1.0));
        let (w, mean, cov) = moment_match([&a, &b], 2);
        assert!((w - 1.0).abs() < 1e-12);
        assert!(mean.iter().all(|v| v.abs() < 1e-12));
        // within-variance 1 + between-variance 1 along x
        assert!((cov[[0, 0]] - 2.0).abs() < 1e-12);
        assert!((cov[[1, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn validate_catches_bad_weights() {
        let mut set = SignatureSet::new("t", 2);
        let mut sig = Signature::new("a", CovarianceStructure::Full);
        sig.components.push(unit_component([0.0, 0.0], 0.4));
        sig.components.push(unit_component([5.0, 5.0], 0.4));
        set.push(sig).unwrap();
        assert!(set.validate().is_err());

        let mut fixed = set.class(0).unwrap().clone();
        fixed.normalize_weights();
        let mut set = SignatureSet::new("t", 2);
        set.push(fixed).unwrap();
        assert!(set.validate().is_ok());
    }

    #[test]
    fn push_rejects_wrong_dimension() {
        let mut set = SignatureSet::new("t", 3);
        let mut sig = Signature::new("a", CovarianceStructure::Full);
        sig.components.push(unit_component([0.0, 0.0], 1.0));
        assert!(matches!(
            set.push(sig),
            Err(Error::DimensionMismatch { expected: 3, found: 2 })
        ));
    }

    #[test]
    fn mixture_likelihood_is_logsumexp_of_components() {
        let mut sig = Signature::new("a", CovarianceStructure::Full);
        sig.components.push(unit_component([0.0, 0.0], 0.5));
        sig.components.push(unit_component([0.0, 0.0], 0.5));
        let single = GaussianDensity::new(&unit_component([0.0, 0.0], 1.0)).unwrap();
        let ll = sig.log_likelihood(&[0.2, 0.1]).unwrap();
        assert!((ll - single.log_pdf(array![0.2, 0.1].view())).abs() < 1e-12);
    }
}
