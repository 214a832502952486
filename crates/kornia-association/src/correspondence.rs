use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::AssociationError;
use crate::point::Point2D;
use crate::pose::Pose2D;

/// A candidate pairing between one map landmark and one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    /// Index of the landmark in the map.
    pub map_index: usize,
    /// Index of the observation.
    pub obs_index: usize,
    /// Landmark coordinates in the map frame.
    pub map_point: Point2D,
    /// Observation coordinates in the observation frame.
    pub obs_point: Point2D,
}

impl Correspondence {
    /// The `(map_index, obs_index)` pair.
    #[inline]
    pub fn pair(&self) -> (usize, usize) {
        (self.map_index, self.obs_index)
    }

    /// Residual `map_point - pose * obs_point`.
    #[inline]
    pub fn residual(&self, pose: &Pose2D) -> glam::DVec2 {
        let p = pose.transform_point(&self.obs_point);
        glam::DVec2::new(self.map_point.x - p.x, self.map_point.y - p.y)
    }
}

/// An ordered collection of correspondences without duplicated pairs.
///
/// Used both for the full candidate pool and for inlier subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Correspondence>", into = "Vec<Correspondence>")]
pub struct CorrespondenceSet(Vec<Correspondence>);

impl CorrespondenceSet {
    /// An empty set.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Build a set from a vector of correspondences.
    ///
    /// # Errors
    ///
    /// Returns [`AssociationError::InvalidInput`] if a `(map_index, obs_index)` pair repeats.
    pub fn from_vec(corrs: Vec<Correspondence>) -> Result<Self, AssociationError> {
        let mut seen = HashSet::with_capacity(corrs.len());
        if !corrs.iter().all(|c| seen.insert(c.pair())) {
            return Err(AssociationError::InvalidInput("duplicated correspondence pair"));
        }
        Ok(Self(corrs))
    }

    /// Build a set from correspondences known to have unique pairs.
    pub(crate) fn from_unique(corrs: Vec<Correspondence>) -> Self {
        Self(corrs)
    }

    /// The correspondences as a slice.
    #[inline]
    pub fn as_slice(&self) -> &[Correspondence] {
        &self.0
    }

    /// Consume the set and return the inner vector.
    pub fn into_vec(self) -> Vec<Correspondence> {
        self.0
    }

    /// The `(map_index, obs_index)` pairs in order.
    pub fn pairs(&self) -> Vec<(usize, usize)> {
        self.0.iter().map(Correspondence::pair).collect()
    }

    /// Whether the set contains the given pair.
    pub fn contains_pair(&self, map_index: usize, obs_index: usize) -> bool {
        self.0
            .iter()
            .any(|c| c.map_index == map_index && c.obs_index == obs_index)
    }

    /// Whether both sets hold the same pairs, regardless of order.
    pub fn same_pairings(&self, other: &CorrespondenceSet) -> bool {
        if self.len() != other.len() {
            return false;
        }
        let mut a = self.pairs();
        let mut b = other.pairs();
        a.sort_unstable();
        b.sort_unstable();
        a == b
    }

    /// For each observation, the index of its associated landmark, if any.
    ///
    /// Observations with an index `>= num_obs` are ignored.
    pub fn observation_to_map(&self, num_obs: usize) -> Vec<Option<usize>> {
        let mut assoc = vec![None; num_obs];
        for c in &self.0 {
            if let Some(slot) = assoc.get_mut(c.obs_index) {
                *slot = Some(c.map_index);
            }
        }
        assoc
    }

    /// Root mean squared distance between the landmarks and the observations
    /// transformed by `pose`. Zero for an empty set.
    pub fn rmse(&self, pose: &Pose2D) -> f64 {
        if self.0.is_empty() {
            return 0.0;
        }
        let sum_sq = self
            .0
            .iter()
            .map(|c| c.residual(pose).length_squared())
            .sum::<f64>();
        (sum_sq / self.0.len() as f64).sqrt()
    }
}

impl TryFrom<Vec<Correspondence>> for CorrespondenceSet {
    type Error = AssociationError;

    fn try_from(corrs: Vec<Correspondence>) -> Result<Self, Self::Error> {
        Self::from_vec(corrs)
    }
}

impl From<CorrespondenceSet> for Vec<Correspondence> {
    fn from(set: CorrespondenceSet) -> Self {
        set.0
    }
}

impl std::ops::Deref for CorrespondenceSet {
    type Target = [Correspondence];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> IntoIterator for &'a CorrespondenceSet {
    type Item = &'a Correspondence;
    type IntoIter = std::slice::Iter<'a, Correspondence>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Generate every possible pairing between map landmarks and observations.
///
/// The pool is ordered observation-major: for each observation, every landmark
/// in map order. Its size is `map_points.len() * observations.len()`.
///
/// # Errors
///
/// Returns [`AssociationError::InvalidInput`] if either input is empty.
pub fn build_correspondences(
    map_points: &[Point2D],
    observations: &[Point2D],
) -> Result<CorrespondenceSet, AssociationError> {
    if map_points.is_empty() {
        return Err(AssociationError::InvalidInput("empty map point set"));
    }
    if observations.is_empty() {
        return Err(AssociationError::InvalidInput("empty observation set"));
    }

    let mut pool = Vec::with_capacity(map_points.len() * observations.len());
    for (obs_index, obs_point) in observations.iter().enumerate() {
        for (map_index, map_point) in map_points.iter().enumerate() {
            pool.push(Correspondence {
                map_index,
                obs_index,
                map_point: *map_point,
                obs_point: *obs_point,
            });
        }
    }

    log::debug!(
        "Generated {} potential pairings ({} landmarks x {} observations)",
        pool.len(),
        map_points.len(),
        observations.len()
    );

    Ok(CorrespondenceSet::from_unique(pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn corr(map_index: usize, obs_index: usize) -> Correspondence {
        Correspondence {
            map_index,
            obs_index,
            map_point: Point2D::new(map_index as f64, 0.0),
            obs_point: Point2D::new(0.0, obs_index as f64),
        }
    }

    #[test]
    fn test_build_cross_product() -> Result<(), AssociationError> {
        let map = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(0.0, 1.0),
        ];
        let obs = vec![Point2D::new(5.0, 5.0), Point2D::new(6.0, 6.0)];
        let pool = build_correspondences(&map, &obs)?;

        assert_eq!(pool.len(), 6);
        assert_eq!(
            pool.pairs(),
            vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]
        );
        assert_eq!(pool[4].map_point, map[1]);
        assert_eq!(pool[4].obs_point, obs[1]);
        Ok(())
    }

    #[test]
    fn test_build_empty_inputs() {
        let pts = vec![Point2D::new(0.0, 0.0)];
        assert!(matches!(
            build_correspondences(&[], &pts),
            Err(AssociationError::InvalidInput(_))
        ));
        assert!(matches!(
            build_correspondences(&pts, &[]),
            Err(AssociationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_from_vec_rejects_duplicates() {
        let res = CorrespondenceSet::from_vec(vec![corr(0, 1), corr(2, 3), corr(0, 1)]);
        assert!(matches!(res, Err(AssociationError::InvalidInput(_))));
        assert!(CorrespondenceSet::from_vec(vec![corr(0, 1), corr(1, 0)]).is_ok());
    }

    #[test]
    fn test_deserialize_rejects_duplicates() -> Result<(), Box<dyn std::error::Error>> {
        let set = CorrespondenceSet::from_vec(vec![corr(0, 1), corr(2, 3)])?;
        let json = serde_json::to_string(&set)?;
        assert!(json.starts_with('['));
        assert_eq!(serde_json::from_str::<CorrespondenceSet>(&json)?, set);

        let dup = serde_json::to_string(&vec![corr(0, 1), corr(2, 3), corr(0, 1)])?;
        assert!(serde_json::from_str::<CorrespondenceSet>(&dup).is_err());
        Ok(())
    }

    #[test]
    fn test_same_pairings_ignores_order() -> Result<(), AssociationError> {
        let a = CorrespondenceSet::from_vec(vec![corr(0, 1), corr(2, 3)])?;
        let b = CorrespondenceSet::from_vec(vec![corr(2, 3), corr(0, 1)])?;
        let c = CorrespondenceSet::from_vec(vec![corr(2, 3), corr(0, 2)])?;
        assert!(a.same_pairings(&b));
        assert!(!a.same_pairings(&c));
        assert!(a.contains_pair(2, 3));
        assert!(!a.contains_pair(3, 2));
        Ok(())
    }

    #[test]
    fn test_observation_to_map() -> Result<(), AssociationError> {
        let set = CorrespondenceSet::from_vec(vec![corr(7, 0), corr(4, 2)])?;
        assert_eq!(set.observation_to_map(3), vec![Some(7), None, Some(4)]);
        Ok(())
    }

    #[test]
    fn test_rmse() -> Result<(), AssociationError> {
        let pose = Pose2D::new(1.0, 0.0, 0.0);
        let set = CorrespondenceSet::from_vec(vec![
            Correspondence {
                map_index: 0,
                obs_index: 0,
                map_point: Point2D::new(1.0, 0.0),
                obs_point: Point2D::new(0.0, 0.0),
            },
            Correspondence {
                map_index: 1,
                obs_index: 1,
                map_point: Point2D::new(3.0, 0.0),
                obs_point: Point2D::new(0.0, 0.0),
            },
        ])?;
        // residuals are 0 and 2
        assert_relative_eq!(set.rmse(&pose), 2.0_f64.sqrt(), epsilon = 1e-12);
        assert_eq!(CorrespondenceSet::new().rmse(&pose), 0.0);
        Ok(())
    }
}
