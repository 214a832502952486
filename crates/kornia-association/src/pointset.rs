use kiddo::immutable::float::kdtree::ImmutableKdTree;

use crate::error::AssociationError;
use crate::point::Point2D;

/// A neighbor returned by a [`PointSet`] query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index of the point in the set.
    pub index: usize,
    /// Euclidean distance to the query.
    pub distance: f64,
}

/// An immutable set of 2D points indexed by a k-d tree.
pub struct PointSet {
    points: Vec<Point2D>,
    kdtree: ImmutableKdTree<f64, u32, 2, 32>,
}

impl PointSet {
    /// Build the set and its spatial index.
    ///
    /// # Errors
    ///
    /// Returns [`AssociationError::InvalidInput`] if `points` is empty.
    pub fn from_points(points: Vec<Point2D>) -> Result<Self, AssociationError> {
        if points.is_empty() {
            return Err(AssociationError::InvalidInput("empty point set"));
        }
        let coords = points.iter().map(Point2D::to_array).collect::<Vec<_>>();
        let kdtree = ImmutableKdTree::new_from_slice(&coords);
        Ok(Self { points, kdtree })
    }

    /// The stored points.
    #[inline]
    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false, empty sets cannot be built.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point at `index`, if any.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Point2D> {
        self.points.get(index)
    }

    /// All points within `radius` of `query`, sorted by increasing distance.
    ///
    /// Empty for a negative or NaN radius.
    pub fn within_radius(&self, query: &Point2D, radius: f64) -> Vec<Neighbor> {
        if !(radius >= 0.0) {
            return Vec::new();
        }
        self.kdtree
            .within::<kiddo::SquaredEuclidean>(&query.to_array(), radius * radius)
            .into_iter()
            .map(|nn| Neighbor {
                index: nn.item as usize,
                distance: nn.distance.sqrt(),
            })
            .collect()
    }

    /// The point closest to `query`.
    pub fn nearest(&self, query: &Point2D) -> Neighbor {
        let nn = self
            .kdtree
            .nearest_one::<kiddo::SquaredEuclidean>(&query.to_array());
        Neighbor {
            index: nn.item as usize,
            distance: nn.distance.sqrt(),
        }
    }
}

impl std::fmt::Debug for PointSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointSet")
            .field("num_points", &self.points.len())
            .finish()
    }
}
