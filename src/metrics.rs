//! Scoring a classification against known labels.
//!
//! | Metric | Range | Best | Notes |
//! |--------|-------|------|-------|
//! | [`accuracy`] | [0, 1] | 1 | rejected samples count as wrong |
//! | [`confusion_matrix`] | counts | diagonal | extra column for rejected samples |
//! | [`purity`] | [0, 1] | 1 | label-free; favours many classes |
//!
//! Predictions use [`UNCLASSIFIED`] for rejected samples.
//!
//! ```rust
//! use gmmsig::metrics::{accuracy, purity};
//! use gmmsig::UNCLASSIFIED;
//!
//! let pred = [0, 0, 1, UNCLASSIFIED];
//! let truth = [0, 0, 1, 1];
//! assert_eq!(accuracy(&pred, &truth), 0.75);
//! assert_eq!(purity(&pred, &truth), 0.75);
//! ```

use crate::classify::UNCLASSIFIED;
use std::collections::HashMap;

/// Fraction of samples whose prediction equals the true label.
///
/// Returns 0 when the slices are empty or differ in length.
pub fn accuracy(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }
    let correct = pred.iter().zip(truth).filter(|(p, t)| p == t).count();
    correct as f64 / pred.len() as f64
}

/// `m[t][p]`: samples of true class `t` predicted as `p`.
///
/// Has `n_classes + 1` columns; the last counts rejected samples. Labels at
/// or beyond `n_classes` (other than [`UNCLASSIFIED`]) are ignored.
pub fn confusion_matrix(pred: &[usize], truth: &[usize], n_classes: usize) -> Vec<Vec<usize>> {
    let mut m = vec![vec![0; n_classes + 1]; n_classes];
    for (&p, &t) in pred.iter().zip(truth) {
        if t >= n_classes {
            continue;
        }
        let col = if p == UNCLASSIFIED { n_classes } else { p };
        if col <= n_classes {
            m[t][col] += 1;
        }
    }
    m
}

/// Share of samples in the majority true class of their predicted class.
///
/// Rejected samples never count as pure.
pub fn purity(pred: &[usize], truth: &[usize]) -> f64 {
    if pred.len() != truth.len() || pred.is_empty() {
        return 0.0;
    }

    let mut joint: HashMap<(usize, usize), usize> = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth) {
        if p != UNCLASSIFIED {
            *joint.entry((p, t)).or_insert(0) += 1;
        }
    }

    let mut cluster_maxes: HashMap<usize, usize> = HashMap::new();
    for (&(p, _), &count) in &joint {
        let current = cluster_maxes.entry(p).or_insert(0);
        *current = (*current).max(count);
    }

    let correct: usize = cluster_maxes.values().sum();
    correct as f64 / pred.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
        assert_eq!(accuracy(&[0], &[0, 1]), 0.0);
    }

    #[test]
    fn test_accuracy_counts_rejections_as_wrong() {
        assert_eq!(accuracy(&[UNCLASSIFIED, UNCLASSIFIED], &[0, 1]), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let pred = [0, 0, 1, UNCLASSIFIED, 1];
        let truth = [0, 1, 1, 1, 1];
        let m = confusion_matrix(&pred, &truth, 2);
        assert_eq!(m, vec![vec![1, 0, 0], vec![1, 2, 1]]);
    }

    #[test]
    fn test_purity_overclustering() {
        // Each point is its own cluster
        let pred = [0, 1, 2, 3];
        let truth = [0, 0, 1, 1];
        assert!((purity(&pred, &truth) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_purity_permuted_labels() {
        let pred = [1, 1, 0, 0, 0];
        let truth = [0, 0, 1, 1, 0];
        assert!((purity(&pred, &truth) - 0.8).abs() < 1e-12);
    }
}
