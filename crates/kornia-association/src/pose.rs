use std::f64::consts::PI;
use std::fmt;

use glam::{DMat2, DMat3, DVec2, DVec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ops::wrap_angle;
use crate::point::Point2D;

/// A 2D rigid body transformation, SE(2), parametrized as `(x, y, theta)`.
///
/// In this crate the pose always maps coordinates from the **observation**
/// frame to the **map** frame: `p_map = R(theta) * p_obs + [x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// Translation along x.
    pub x: f64,
    /// Translation along y.
    pub y: f64,
    /// Heading in radians, wrapped to `[-pi, pi)`.
    pub theta: f64,
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose2D {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        theta: 0.0,
    };

    /// Create a new pose. The angle is wrapped to `[-pi, pi)`.
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta: wrap_angle(theta),
        }
    }

    /// Create a pose from a rotation angle and a translation vector.
    pub fn from_angle_translation(theta: f64, t: DVec2) -> Self {
        Self::new(t.x, t.y, theta)
    }

    /// Draw a pose with translation uniformly in `[x_range] x [y_range]` and
    /// heading uniformly in `[-pi, pi)`.
    pub fn from_random<R: Rng + ?Sized>(
        rng: &mut R,
        x_range: std::ops::Range<f64>,
        y_range: std::ops::Range<f64>,
    ) -> Self {
        Self::new(
            rng.random_range(x_range),
            rng.random_range(y_range),
            rng.random_range(-PI..PI),
        )
    }

    /// Create a pose from a 3x3 homogeneous matrix.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self::new(
            mat.z_axis.x,
            mat.z_axis.y,
            mat.x_axis.y.atan2(mat.x_axis.x),
        )
    }

    /// The translation part.
    #[inline]
    pub fn translation(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    /// The 2x2 rotation matrix.
    #[inline]
    pub fn rotation(&self) -> DMat2 {
        DMat2::from_angle(self.theta)
    }

    /// The 3x3 homogeneous matrix.
    pub fn matrix(&self) -> DMat3 {
        let (s, c) = self.theta.sin_cos();
        DMat3::from_cols(
            DVec3::new(c, s, 0.0),
            DVec3::new(-s, c, 0.0),
            DVec3::new(self.x, self.y, 1.0),
        )
    }

    /// The inverse transformation, mapping map coordinates into the observation frame.
    pub fn inverse(&self) -> Self {
        let (s, c) = self.theta.sin_cos();
        Self::new(
            -(c * self.x + s * self.y),
            s * self.x - c * self.y,
            -self.theta,
        )
    }

    /// Composition `self * other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Pose2D) -> Self {
        let t = self.transform_point(&Point2D::new(other.x, other.y));
        Self::new(t.x, t.y, self.theta + other.theta)
    }

    /// Transform a point from the observation frame into the map frame.
    #[inline]
    pub fn transform_point(&self, p: &Point2D) -> Point2D {
        let (s, c) = self.theta.sin_cos();
        Point2D::new(c * p.x - s * p.y + self.x, s * p.x + c * p.y + self.y)
    }

    /// Transform a point from the map frame back into the observation frame.
    #[inline]
    pub fn inverse_transform_point(&self, p: &Point2D) -> Point2D {
        let (s, c) = self.theta.sin_cos();
        let dx = p.x - self.x;
        let dy = p.y - self.y;
        Point2D::new(c * dx + s * dy, -s * dx + c * dy)
    }

    /// Derivative of [`Pose2D::transform_point`] with respect to `theta`.
    ///
    /// The derivative with respect to `(x, y)` is the identity.
    #[inline]
    pub fn transform_point_jacobian_theta(&self, p: &Point2D) -> DVec2 {
        let (s, c) = self.theta.sin_cos();
        DVec2::new(-s * p.x - c * p.y, c * p.x - s * p.y)
    }

    /// Euclidean distance between the translation parts of two poses.
    #[inline]
    pub fn position_distance(&self, other: &Pose2D) -> f64 {
        (self.translation() - other.translation()).length()
    }

    /// Absolute heading difference, wrapped to `[0, pi]`.
    #[inline]
    pub fn angle_distance(&self, other: &Pose2D) -> f64 {
        wrap_angle(self.theta - other.theta).abs()
    }

    /// The pose as a `[x, y, theta]` vector.
    #[inline]
    pub fn to_vec3(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.theta)
    }
}

impl std::ops::Mul<Pose2D> for Pose2D {
    type Output = Pose2D;

    fn mul(self, rhs: Pose2D) -> Pose2D {
        self.compose(&rhs)
    }
}

impl std::ops::Mul<Point2D> for Pose2D {
    type Output = Point2D;

    fn mul(self, rhs: Point2D) -> Point2D {
        self.transform_point(&rhs)
    }
}

impl fmt::Display for Pose2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.6} {:.6} {:.3}deg]",
            self.x,
            self.y,
            self.theta.to_degrees()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn assert_pose_eq(a: &Pose2D, b: &Pose2D, eps: f64) {
        assert_relative_eq!(a.x, b.x, epsilon = eps);
        assert_relative_eq!(a.y, b.y, epsilon = eps);
        assert_relative_eq!(a.angle_distance(b), 0.0, epsilon = eps);
    }

    #[test]
    fn test_compose_inverse_is_identity() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let pose = Pose2D::from_random(&mut rng, -50.0..50.0, -50.0..50.0);
            assert_pose_eq(&(pose * pose.inverse()), &Pose2D::IDENTITY, 1e-9);
            assert_pose_eq(&(pose.inverse() * pose), &Pose2D::IDENTITY, 1e-9);
        }
    }

    #[test]
    fn test_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let p = Pose2D::from_random(&mut rng, -10.0..10.0, -10.0..10.0);
            let q = Pose2D::from_random(&mut rng, -10.0..10.0, -10.0..10.0);
            let back = p * (p.inverse() * q);
            assert_pose_eq(&back, &q, 1e-9);
        }
    }

    #[test]
    fn test_transform_point() {
        let pose = Pose2D::new(1.0, 2.0, std::f64::consts::FRAC_PI_2);
        let p = pose * Point2D::new(1.0, 0.0);
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 3.0, epsilon = 1e-12);

        let q = pose.inverse_transform_point(&p);
        assert_relative_eq!(q.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_round_trip() {
        let pose = Pose2D::new(-3.0, 0.5, 2.5);
        let back = Pose2D::from_matrix(&pose.matrix());
        assert_pose_eq(&back, &pose, 1e-12);

        // composition agrees with matrix product
        let other = Pose2D::new(1.0, -1.0, -0.7);
        let prod = Pose2D::from_matrix(&(pose.matrix() * other.matrix()));
        assert_pose_eq(&prod, &(pose * other), 1e-12);
    }

    #[test]
    fn test_angle_wrapping() {
        let pose = Pose2D::new(0.0, 0.0, 3.0 * PI);
        assert!(pose.theta >= -PI && pose.theta < PI);
        let a = Pose2D::new(0.0, 0.0, PI - 0.01);
        let b = Pose2D::new(0.0, 0.0, -PI + 0.01);
        assert_relative_eq!(a.angle_distance(&b), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_jacobian_theta() {
        let pose = Pose2D::new(0.3, -0.2, 0.4);
        let p = Point2D::new(2.0, 1.0);
        let h = 1e-7;
        let plus = Pose2D::new(pose.x, pose.y, pose.theta + h) * p;
        let minus = Pose2D::new(pose.x, pose.y, pose.theta - h) * p;
        let jac = pose.transform_point_jacobian_theta(&p);
        assert_relative_eq!(jac.x, (plus.x - minus.x) / (2.0 * h), epsilon = 1e-6);
        assert_relative_eq!(jac.y, (plus.y - minus.y) / (2.0 * h), epsilon = 1e-6);
    }
}
