//! Splitting classes whose mixture holds separate sub-populations.
//!
//! Works on signatures alone; no samples are needed. The input set is never
//! modified, a new [`SignatureSet`] is returned.
//!
//! # Bimodal detection
//!
//! The components of a class are agglomerated into two groups by repeatedly
//! merging the pair of groups with the lowest merge cost (the same
//! likelihood-bound cost used for order selection). Each group is summarised
//! by its moment-matched Gaussian `(μ₁, Σ₁)`, `(μ₂, Σ₂)` and the class is
//! split when
//!
//! ```text
//! D = sqrt((μ₁ − μ₂)ᵀ ((Σ₁ + Σ₂) / 2)⁻¹ (μ₁ − μ₂)) ≥ min_separation
//! ```
//!
//! `D > 2` is the usual threshold for two modes being cleanly separated.
//!
//! Split classes keep their components unchanged except for weights, which
//! are renormalised within each group. New classes are numbered in order:
//! class `i` becomes one entry or two consecutive entries, and
//! [`SplitOutcome::origin`] maps every new index back to `i`.

use crate::cluster::{merge_components, merge_cost};
use crate::error::{Error, Result};
use crate::io::read_signature_set;
use crate::linalg;
use crate::signature::{
    moment_match, Covariance, CovarianceStructure, GaussianComponent, Signature, SignatureSet,
};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// How classes are split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum SplitMode {
    /// Split into two when the class is detectably bimodal.
    #[default]
    Bimodal,
    /// Every component becomes its own class.
    Subclasses,
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SplitMode::Bimodal => "bimodal",
            SplitMode::Subclasses => "subclasses",
        })
    }
}

impl FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bimodal" => Ok(SplitMode::Bimodal),
            "subclasses" | "components" => Ok(SplitMode::Subclasses),
            other => Err(Error::InvalidParameter {
                name: "mode",
                message: format!("unknown split mode '{other}'"),
            }),
        }
    }
}

/// Split configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitConfig {
    /// Split strategy.
    pub mode: SplitMode,
    /// Minimum separation `D` for a bimodal split.
    pub min_separation: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            mode: SplitMode::Bimodal,
            min_separation: 2.0,
        }
    }
}

impl SplitConfig {
    /// Set the split strategy.
    pub fn with_mode(mut self, mode: SplitMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the bimodal separation threshold.
    pub fn with_min_separation(mut self, d: f64) -> Self {
        self.min_separation = d;
        self
    }
}

/// Result of splitting a signature set.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    /// Refined signatures.
    pub signatures: SignatureSet,
    /// `origin[new] = old` class index.
    pub origin: Vec<usize>,
    /// Separation measured for each input class (`None` with fewer than two components).
    pub separations: Vec<Option<f64>>,
}

impl SplitOutcome {
    /// Input classes that were split.
    pub fn split_classes(&self) -> Vec<usize> {
        let mut out: Vec<usize> = Vec::new();
        for pair in self.origin.windows(2) {
            if pair[0] == pair[1] && out.last() != Some(&pair[0]) {
                out.push(pair[0]);
            }
        }
        out
    }
}

/// Splits classes of a signature set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SplitClasses {
    config: SplitConfig,
}

impl SplitClasses {
    /// Splitter with `config`.
    pub fn new(config: SplitConfig) -> Self {
        Self { config }
    }

    /// Read the parameter file at `path` and split it with `config`.
    pub fn from_file(path: impl AsRef<Path>, config: SplitConfig) -> Result<SplitOutcome> {
        Self::new(config).split_file(path)
    }

    /// Read a parameter file and split it.
    pub fn split_file(&self, path: impl AsRef<Path>) -> Result<SplitOutcome> {
        let set = read_signature_set(path)?;
        self.split(&set)
    }

    /// Split `set`, leaving it untouched.
    pub fn split(&self, set: &SignatureSet) -> Result<SplitOutcome> {
        if !(self.config.min_separation >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "min_separation",
                message: "must be a non-negative number".into(),
            });
        }
        let d = set.dimension();
        let mut out = SignatureSet::new(set.title.clone(), d);
        let mut origin = Vec::new();
        let mut separations = Vec::with_capacity(set.len());

        for (k, sig) in set.classes().iter().enumerate() {
            let pieces = match self.config.mode {
                SplitMode::Subclasses => {
                    separations.push(None);
                    split_subclasses(sig)
                }
                SplitMode::Bimodal => match bimodal_groups(sig, d) {
                    Some((groups, sep)) => {
                        separations.push(Some(sep));
                        if sep >= self.config.min_separation {
                            tracing::info!(class = k, separation = sep, "splitting bimodal class");
                            split_groups(sig, &groups)
                        } else {
                            vec![sig.clone()]
                        }
                    }
                    None => {
                        separations.push(None);
                        vec![sig.clone()]
                    }
                },
            };
            for piece in pieces {
                out.push(piece)?;
                origin.push(k);
            }
        }

        Ok(SplitOutcome {
            signatures: out,
            origin,
            separations,
        })
    }
}

/// Two component-index groups and their separation.
fn bimodal_groups(sig: &Signature, d: usize) -> Option<([Vec<usize>; 2], f64)> {
    if sig.components.len() < 2 {
        return None;
    }
    let n = sig.count.max(1);

    // Aggregates are kept as full-covariance components.
    let mut groups: Vec<(Vec<usize>, GaussianComponent)> = sig
        .components
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let (w, mean, cov) = moment_match([c], d);
            (vec![i], GaussianComponent::new(w, c.count, mean, Covariance::Full(cov)))
        })
        .collect();

    while groups.len() > 2 {
        let mut best = (0, 1, f64::INFINITY);
        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                let cost = merge_cost(&groups[i].1, &groups[j].1, CovarianceStructure::Full, n);
                if cost < best.2 {
                    best = (i, j, cost);
                }
            }
        }
        let (i, j, _) = best;
        let (members_j, agg_j) = groups.remove(j);
        let (members_i, agg_i) = &mut groups[i];
        *agg_i = merge_components(agg_i, &agg_j, CovarianceStructure::Full);
        members_i.extend(members_j);
        members_i.sort_unstable();
    }

    let b = groups.pop()?;
    let a = groups.pop()?;
    let sep = separation(&a.1, &b.1, d)?;
    Some(([a.0, b.0], sep))
}

fn separation(a: &GaussianComponent, b: &GaussianComponent, d: usize) -> Option<f64> {
    let mut avg = (a.covariance.to_full(d) + b.covariance.to_full(d)) * 0.5;
    linalg::symmetrize_upper(&mut avg);
    let factor = linalg::SpdFactor::new(&avg)?;
    let diff = &a.mean - &b.mean;
    Some(factor.mahalanobis_sq(diff.view()).max(0.0).sqrt())
}

fn split_groups(sig: &Signature, groups: &[Vec<usize>; 2]) -> Vec<Signature> {
    let masses: Vec<f64> = groups
        .iter()
        .map(|g| g.iter().map(|&i| sig.components[i].weight).sum())
        .collect();
    let total: f64 = masses.iter().sum();
    let first_count = if total > 0.0 {
        ((sig.count as f64 * masses[0] / total).round() as usize).min(sig.count)
    } else {
        sig.count / 2
    };
    let counts = [first_count, sig.count - first_count];

    groups
        .iter()
        .enumerate()
        .map(|(g, members)| {
            let mut piece = Signature::new(format!("{}.{g}", sig.title), sig.structure);
            piece.count = counts[g];
            piece.components = members.iter().map(|&i| sig.components[i].clone()).collect();
            piece.normalize_weights();
            piece
        })
        .collect()
}

fn split_subclasses(sig: &Signature) -> Vec<Signature> {
    if sig.components.len() < 2 {
        return vec![sig.clone()];
    }
    sig.components
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut piece = Signature::new(format!("{}.{i}", sig.title), sig.structure);
            piece.count = c.count.max(0.0).round() as usize;
            let mut comp = c.clone();
            comp.weight = 1.0;
            piece.components.push(comp);
            piece
        })
        .collect()
}
