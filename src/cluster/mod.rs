//! Training: Gaussian mixtures fitted per class by EM.
//!
//! ## Pieces
//!
//! | Item | Role |
//! |------|------|
//! | [`Gmm`] | EM for one class, any [`CovarianceStructure`] |
//! | [`Init`] | where component means start |
//! | [`Order`] / [`select_order`] | fixed count, target count, or MDL-selected count by merging |
//! | [`ClusterEngine`] | one mixture per class of a [`SampleCollection`], failures isolated per class |
//!
//! ## Covariance structures
//!
//! | Structure | Parameters per component (d features) | Shape |
//! |-----------|----------------------------------------|-------|
//! | Full | d + d(d+1)/2 + 1 | ellipsoids at any orientation |
//! | Diagonal | 2d + 1 | axis-aligned ellipsoids |
//! | Spherical | d + 2 | spheres |
//!
//! ## Usage
//!
//! ```rust
//! use gmmsig::cluster::{ClusterConfig, ClusterEngine, Order};
//! use gmmsig::{Point, SampleCollection};
//!
//! let mut samples = SampleCollection::new(2);
//! samples.push_class("near origin", (0..20)
//!     .map(|i| Point::from([0.1 * (i % 5) as f64, 0.1 * (i / 5) as f64]))
//!     .collect()).unwrap();
//!
//! let report = ClusterEngine::new(
//!     ClusterConfig::default().with_n_components(2).with_order(Order::Mdl).with_seed(7),
//! )
//! .fit(&samples)
//! .unwrap();
//! assert!(report.is_complete());
//! let sig = report.signatures.class(0).unwrap();
//! assert!((sig.total_weight() - 1.0).abs() < 1e-9);
//! ```
//!
//! [`CovarianceStructure`]: crate::signature::CovarianceStructure
//! [`SampleCollection`]: crate::point::SampleCollection

mod engine;
mod gmm;
pub(crate) mod init;
mod order;
mod traits;

pub use engine::{
    plan_model, ClassFit, ClassOutcome, ClusterConfig, ClusterEngine, InsufficientData, ModelPlan,
    TrainingReport,
};
pub use gmm::{FitStatus, Gmm, GmmFit};
pub use init::Init;
pub use order::{mdl, select_order, Order, OrderCandidate};
pub use traits::{Clustering, LogDensity, SoftClustering};

pub(crate) use order::{merge_components, merge_cost};
