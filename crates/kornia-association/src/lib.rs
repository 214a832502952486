#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Kornia Association
//!
//! Finds which observed 2D points correspond to which landmarks of a known map,
//! together with the rigid transformation relating both frames, when nothing is
//! known in advance about the pairing.
//!
//! ## Key Features
//!
//! - **Correspondence pool**: every landmark/observation pairing as a candidate
//! - **Closed-form rigid fit**: least-squares 2D pose with propagated covariance
//! - **RANSAC**: Mahalanobis gating and an adaptive iteration budget
//! - **Multi-hypothesis output**: accepted poses fused into a sum of Gaussians
//!
//! ## Example
//!
//! ```rust
//! use kornia_association::{
//!     build_correspondences, FusionParams, Point2D, Pose2D, RansacConfig, RansacEngine,
//!     SamplingStrategy,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! let map = vec![
//!     Point2D::new(0.0, 0.0),
//!     Point2D::new(4.0, 1.0),
//!     Point2D::new(1.0, 5.0),
//!     Point2D::new(7.0, 3.0),
//!     Point2D::new(3.0, 8.0),
//! ];
//!
//! // the sensor sees four landmarks from an unknown pose
//! let gt = Pose2D::new(2.0, 1.0, 0.5);
//! let observations = map[1..]
//!     .iter()
//!     .map(|p| gt.inverse_transform_point(p))
//!     .collect::<Vec<_>>();
//!
//! let pool = build_correspondences(&map, &observations)?;
//! let engine = RansacEngine::new(RansacConfig {
//!     noise_std: 0.05,
//!     min_inliers: 4,
//!     max_inliers: pool.len(),
//!     mahalanobis_threshold: 5.0,
//!     probability: 0.999,
//!     min_iterations: 1000,
//!     strategy: SamplingStrategy::Landmarks,
//!     fusion: FusionParams {
//!         position_tolerance: 0.01,
//!         angle_tolerance: 0.1_f64.to_radians(),
//!         fuse_by_correspondences: true,
//!     },
//! })?;
//!
//! let output = engine.run(&pool, &mut StdRng::seed_from_u64(0))?;
//! let best = output.best().expect("a pose");
//! assert!(best.mean.position_distance(&gt) < 1e-6);
//! assert_eq!(
//!     output.best_inliers.observation_to_map(observations.len()),
//!     vec![Some(1), Some(2), Some(3), Some(4)]
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Candidate pairings between map landmarks and observations.
pub mod correspondence;

/// Error types of the crate.
pub mod error;

/// Closed-form rigid alignment.
pub mod fit;

/// Fusion of pose hypotheses into a multi-modal belief.
pub mod fusion;

/// Reading and writing landmark maps.
pub mod io;

/// Small numeric helpers.
pub mod ops;

/// 2D points.
pub mod point;

/// Spatially indexed point sets.
pub mod pointset;

/// 2D rigid poses.
pub mod pose;

/// The RANSAC engine.
pub mod ransac;

pub use crate::correspondence::{build_correspondences, Correspondence, CorrespondenceSet};
pub use crate::error::AssociationError;
pub use crate::fit::{fit_rigid_transform, RigidFit};
pub use crate::fusion::{fuse, FusionParams, PoseBelief, PoseHypothesis};
pub use crate::point::Point2D;
pub use crate::pointset::{Neighbor, PointSet};
pub use crate::pose::Pose2D;
pub use crate::ransac::{
    adaptive_iterations, RansacConfig, RansacEngine, RansacOutput, SamplingStrategy, StopSignal,
};
