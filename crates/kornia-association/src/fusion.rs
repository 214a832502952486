use glam::DMat3;
use serde::{Deserialize, Serialize};

use crate::correspondence::CorrespondenceSet;
use crate::error::AssociationError;
use crate::pose::Pose2D;

/// Tolerances deciding when two pose hypotheses describe the same mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionParams {
    /// Maximum distance between the mean positions of two merged hypotheses.
    pub position_tolerance: f64,
    /// Maximum wrapped heading difference in radians between two merged hypotheses.
    pub angle_tolerance: f64,
    /// Also merge hypotheses whose inlier sets hold exactly the same pairs.
    pub fuse_by_correspondences: bool,
}

impl FusionParams {
    /// Check that both tolerances are finite and non-negative.
    pub fn validate(&self) -> Result<(), AssociationError> {
        if !(self.position_tolerance.is_finite() && self.position_tolerance >= 0.0) {
            return Err(AssociationError::ConfigurationError(format!(
                "position tolerance must be non-negative, got {}",
                self.position_tolerance
            )));
        }
        if !(self.angle_tolerance.is_finite() && self.angle_tolerance >= 0.0) {
            return Err(AssociationError::ConfigurationError(format!(
                "angle tolerance must be non-negative, got {}",
                self.angle_tolerance
            )));
        }
        Ok(())
    }

    /// Whether `a` and `b` fall in the same mode.
    pub fn same_mode(&self, a: &PoseHypothesis, b: &PoseHypothesis) -> bool {
        let close = a.mean.position_distance(&b.mean) < self.position_tolerance
            && a.mean.angle_distance(&b.mean) < self.angle_tolerance;
        close || (self.fuse_by_correspondences && a.inliers.same_pairings(&b.inliers))
    }
}

/// One Gaussian mode of the pose belief.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseHypothesis {
    /// Mean pose, observation frame to map frame.
    pub mean: Pose2D,
    /// Covariance of `(x, y, theta)`, scaled by the observation noise variance.
    pub covariance: DMat3,
    /// Correspondences supporting this mode.
    pub inliers: CorrespondenceSet,
    /// Accumulated support of the mode.
    pub weight: f64,
}

impl PoseHypothesis {
    /// Number of supporting correspondences.
    #[inline]
    pub fn num_inliers(&self) -> usize {
        self.inliers.len()
    }

    // Larger weight keeps its mean, covariance and inliers; ties keep `self`.
    fn absorb(&mut self, other: PoseHypothesis) {
        let weight = self.weight + other.weight;
        if other.weight > self.weight {
            *self = other;
        }
        self.weight = weight;
    }
}

/// A multi-modal pose belief represented as a sum of Gaussians.
///
/// Modes are kept pairwise distinct under the [`FusionParams`] used to build it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoseBelief {
    modes: Vec<PoseHypothesis>,
}

impl PoseBelief {
    /// An empty belief.
    pub fn new() -> Self {
        Self { modes: Vec::new() }
    }

    /// Add a hypothesis, merging it with the first matching mode.
    ///
    /// A merge can move the surviving mean next to another mode, so merging
    /// repeats until no two modes match.
    pub fn insert(&mut self, hypothesis: PoseHypothesis, params: &FusionParams) {
        let Some(mut idx) = self
            .modes
            .iter()
            .position(|m| params.same_mode(m, &hypothesis))
        else {
            self.modes.push(hypothesis);
            return;
        };

        self.modes[idx].absorb(hypothesis);

        while let Some(j) = (0..self.modes.len())
            .find(|&j| j != idx && params.same_mode(&self.modes[j], &self.modes[idx]))
        {
            let other = self.modes.remove(j);
            if j < idx {
                idx -= 1;
            }
            self.modes[idx].absorb(other);
        }
    }

    /// The mode with the largest inlier set; ties go to the larger weight, then the earlier mode.
    pub fn best(&self) -> Option<&PoseHypothesis> {
        let mut best: Option<&PoseHypothesis> = None;
        for m in &self.modes {
            best = match best {
                Some(b)
                    if m.num_inliers() > b.num_inliers()
                        || (m.num_inliers() == b.num_inliers() && m.weight > b.weight) =>
                {
                    Some(m)
                }
                None => Some(m),
                keep => keep,
            };
        }
        best
    }

    /// Total weight over all modes.
    pub fn total_weight(&self) -> f64 {
        self.modes.iter().map(|m| m.weight).sum()
    }

    /// The modes in insertion order.
    #[inline]
    pub fn modes(&self) -> &[PoseHypothesis] {
        &self.modes
    }

    /// Iterate over the modes.
    pub fn iter(&self) -> std::slice::Iter<'_, PoseHypothesis> {
        self.modes.iter()
    }

    /// Number of modes.
    #[inline]
    pub fn len(&self) -> usize {
        self.modes.len()
    }

    /// Whether the belief has no modes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Consume the belief and return its modes.
    pub fn into_modes(self) -> Vec<PoseHypothesis> {
        self.modes
    }
}

impl<'a> IntoIterator for &'a PoseBelief {
    type Item = &'a PoseHypothesis;
    type IntoIter = std::slice::Iter<'a, PoseHypothesis>;

    fn into_iter(self) -> Self::IntoIter {
        self.modes.iter()
    }
}

/// Fuse accepted hypotheses into a [`PoseBelief`].
///
/// Fusing an already fused belief with the same parameters returns it unchanged.
pub fn fuse<I>(accepted: I, params: &FusionParams) -> PoseBelief
where
    I: IntoIterator<Item = PoseHypothesis>,
{
    let mut belief = PoseBelief::new();
    for hypothesis in accepted {
        belief.insert(hypothesis, params);
    }
    belief
}
