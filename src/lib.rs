//! # gmmsig
//!
//! Gaussian-mixture signatures: train one mixture per class from labelled
//! samples, persist the result as a plain-text parameter file, split classes
//! that hide two populations, and classify new samples by maximum likelihood.
//!
//! ```text
//! sample files ─▶ io ─▶ ClusterEngine ─▶ SignatureSet ─▶ (SplitClasses) ─▶ Classifier
//!                               │                ▲
//!                               └── parameter file
//! ```
//!
//! ```rust
//! use gmmsig::{Classifier, ClusterConfig, ClusterEngine, Point, SampleCollection};
//!
//! let mut samples = SampleCollection::new(2);
//! let ring = |cx: f64, cy: f64| -> Vec<Point> {
//!     (0..30)
//!         .map(|i| {
//!             let t = i as f64 * 0.7;
//!             Point::from([cx + t.cos() * (1.0 + 0.1 * (i % 3) as f64), cy + t.sin()])
//!         })
//!         .collect()
//! };
//! samples.push_class("low", ring(0.0, 0.0)).unwrap();
//! samples.push_class("high", ring(10.0, 10.0)).unwrap();
//!
//! let set = ClusterEngine::new(ClusterConfig::default().with_n_components(1))
//!     .fit(&samples)
//!     .unwrap()
//!     .into_result()
//!     .unwrap();
//!
//! let result = Classifier::new(&set)
//!     .unwrap()
//!     .classify(&[Point::from([0.2, 0.1]), Point::from([9.5, 10.4])])
//!     .unwrap();
//! assert_eq!(result.assignments, vec![0, 1]);
//! ```
//!
//! ## Features
//!
//! - `parallel` (default): E-step and classification over rayon.
//! - `serde`: `Serialize`/`Deserialize` on the model and result types.
//! - `cli` (default): the `gmmsig` binary.

pub mod adapter;
pub mod classify;
pub mod cluster;
/// Error types used across `gmmsig`.
pub mod error;
pub mod io;
mod linalg;
pub mod metrics;
pub mod point;
pub mod signature;
pub mod split;

#[cfg(test)]
mod pipeline_tests;

pub use adapter::{FieldVector, VectorFeature};
pub use classify::{ClassificationResult, Classifier, Priors, UNCLASSIFIED};
pub use cluster::{
    ClusterConfig, ClusterEngine, FitStatus, Gmm, Init, InsufficientData, Order, TrainingReport,
};
pub use error::{Error, Result};
pub use io::{read_samples, read_signature_set, write_signature_set};
pub use point::{ClassSamples, Point, SampleCollection};
pub use signature::{Covariance, CovarianceStructure, GaussianComponent, Signature, SignatureSet};
pub use split::{SplitClasses, SplitConfig, SplitMode, SplitOutcome};
