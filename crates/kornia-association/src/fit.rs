//! Closed-form least-squares rigid alignment in the plane.

use glam::{DMat3, DVec2, DVec3};

use crate::correspondence::Correspondence;
use crate::error::AssociationError;
use crate::pose::Pose2D;

// Below this spread (sum of squared distances to the centroid) the points are coincident.
const MIN_SPREAD: f64 = 1e-12;

/// Output of [`fit_rigid_transform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidFit {
    /// Transformation from the observation frame to the map frame.
    pub pose: Pose2D,
    /// Covariance of `(x, y, theta)` under isotropic point noise.
    pub covariance: DMat3,
}

/// Least-squares rigid transformation between paired observations and landmarks.
///
/// Minimizes `sum_i |map_i - T * obs_i|^2` in closed form (the 2D Kabsch / Umeyama
/// solution without scale):
///
/// 1. Center both point sets on their centroids.
/// 2. `theta = atan2(sum(my * ox - mx * oy), sum(mx * ox + my * oy))` on centered coordinates.
/// 3. `t = c_map - R(theta) * c_obs`.
///
/// The covariance is propagated from isotropic Gaussian noise with standard deviation
/// `noise_std` on each observation: `sigma^2 * (sum_i J_i^T J_i)^-1`, with `J_i` the
/// 2x3 jacobian of `T * obs_i` with respect to `(x, y, theta)`.
///
/// # Arguments
///
/// * `correspondences` - At least two landmark-observation pairs.
/// * `noise_std` - Standard deviation of the observation noise.
///
/// # Errors
///
/// Returns [`AssociationError::DegenerateGeometry`] with fewer than two correspondences
/// or when the landmarks or the observations all coincide.
pub fn fit_rigid_transform(
    correspondences: &[Correspondence],
    noise_std: f64,
) -> Result<RigidFit, AssociationError> {
    let n = correspondences.len();
    if n < 2 {
        return Err(AssociationError::DegenerateGeometry(format!(
            "need at least 2 correspondences, got {n}"
        )));
    }
    let nf = n as f64;

    // compute centroids
    let (mut c_map, mut c_obs) = (DVec2::ZERO, DVec2::ZERO);
    for c in correspondences {
        c_map += DVec2::from(c.map_point);
        c_obs += DVec2::from(c.obs_point);
    }
    c_map /= nf;
    c_obs /= nf;

    // accumulate dot and cross terms of the centered pairs
    let mut sum_dot = 0.0;
    let mut sum_cross = 0.0;
    let mut spread_map = 0.0;
    let mut spread_obs = 0.0;
    for c in correspondences {
        let m = DVec2::from(c.map_point) - c_map;
        let o = DVec2::from(c.obs_point) - c_obs;
        sum_dot += m.dot(o);
        sum_cross += o.perp_dot(m);
        spread_map += m.length_squared();
        spread_obs += o.length_squared();
    }

    if spread_map < MIN_SPREAD || spread_obs < MIN_SPREAD {
        return Err(AssociationError::DegenerateGeometry(
            "coincident points".to_string(),
        ));
    }

    let theta = sum_cross.atan2(sum_dot);
    let (s, cth) = theta.sin_cos();
    let t = c_map - DVec2::new(cth * c_obs.x - s * c_obs.y, s * c_obs.x + cth * c_obs.y);
    let pose = Pose2D::from_angle_translation(theta, t);

    // information matrix H = sum_i J_i^T J_i with J_i = [I | dT/dtheta(obs_i)]
    let mut sum_u = DVec2::ZERO;
    let mut sum_u2 = 0.0;
    for c in correspondences {
        let u = pose.transform_point_jacobian_theta(&c.obs_point);
        sum_u += u;
        sum_u2 += u.length_squared();
    }
    let info = DMat3::from_cols(
        DVec3::new(nf, 0.0, sum_u.x),
        DVec3::new(0.0, nf, sum_u.y),
        DVec3::new(sum_u.x, sum_u.y, sum_u2),
    );

    // det(H) = n^2 * spread_obs, strictly positive past the check above
    let covariance = info.inverse() * (noise_std * noise_std);

    Ok(RigidFit { pose, covariance })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Point2D;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn make_pairs(pose: &Pose2D, obs: &[Point2D]) -> Vec<Correspondence> {
        obs.iter()
            .enumerate()
            .map(|(i, o)| Correspondence {
                map_index: i,
                obs_index: i,
                map_point: pose.transform_point(o),
                obs_point: *o,
            })
            .collect()
    }

    #[test]
    fn test_fit_identity() -> Result<(), AssociationError> {
        let obs = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(0.0, 1.0),
        ];
        let fit = fit_rigid_transform(&make_pairs(&Pose2D::IDENTITY, &obs), 0.1)?;
        assert_relative_eq!(fit.pose.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(fit.pose.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(fit.pose.theta, 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_fit_exact_random() -> Result<(), AssociationError> {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..20 {
            let gt = Pose2D::from_random(&mut rng, -20.0..20.0, -20.0..20.0);
            let num_points = rng.random_range(2..30);
            let obs = (0..num_points)
                .map(|_| Point2D::new(rng.random_range(-10.0..10.0), rng.random_range(-10.0..10.0)))
                .collect::<Vec<_>>();
            let pairs = make_pairs(&gt, &obs);

            let fit = fit_rigid_transform(&pairs, 0.1)?;
            assert_relative_eq!(fit.pose.x, gt.x, epsilon = 1e-9);
            assert_relative_eq!(fit.pose.y, gt.y, epsilon = 1e-9);
            assert_relative_eq!(fit.pose.angle_distance(&gt), 0.0, epsilon = 1e-9);

            // zero residual on every pair
            for c in &pairs {
                assert_relative_eq!(c.residual(&fit.pose).length(), 0.0, epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn test_fit_two_points() -> Result<(), AssociationError> {
        let gt = Pose2D::new(3.0, -1.0, 2.0);
        let obs = vec![Point2D::new(1.0, 1.0), Point2D::new(-2.0, 4.0)];
        let fit = fit_rigid_transform(&make_pairs(&gt, &obs), 0.1)?;
        assert_relative_eq!(fit.pose.x, gt.x, epsilon = 1e-12);
        assert_relative_eq!(fit.pose.y, gt.y, epsilon = 1e-12);
        assert_relative_eq!(fit.pose.theta, gt.theta, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_fit_covariance_centered() -> Result<(), AssociationError> {
        // observations centered on the origin and an identity pose decouple the
        // translation from the rotation: var(x) = sigma^2 / n, var(theta) = sigma^2 / spread
        let obs = vec![
            Point2D::new(1.0, 0.0),
            Point2D::new(-1.0, 0.0),
            Point2D::new(0.0, 2.0),
            Point2D::new(0.0, -2.0),
        ];
        let sigma = 0.5;
        let fit = fit_rigid_transform(&make_pairs(&Pose2D::IDENTITY, &obs), sigma)?;
        let cov = fit.covariance;
        assert_relative_eq!(cov.x_axis.x, sigma * sigma / 4.0, epsilon = 1e-12);
        assert_relative_eq!(cov.y_axis.y, sigma * sigma / 4.0, epsilon = 1e-12);
        assert_relative_eq!(cov.z_axis.z, sigma * sigma / 10.0, epsilon = 1e-12);
        assert_relative_eq!(cov.z_axis.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(cov.x_axis.z, 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn test_fit_covariance_symmetric_psd() -> Result<(), AssociationError> {
        let gt = Pose2D::new(10.0, 5.0, -1.2);
        let obs = vec![
            Point2D::new(4.0, 1.0),
            Point2D::new(5.0, 3.0),
            Point2D::new(7.0, 0.5),
        ];
        let cov = fit_rigid_transform(&make_pairs(&gt, &obs), 0.15)?.covariance;
        let cols = cov.to_cols_array_2d();
        for (i, col) in cols.iter().enumerate() {
            assert!(col[i] > 0.0);
            for (j, v) in col.iter().enumerate() {
                assert_relative_eq!(*v, cols[j][i], epsilon = 1e-12);
            }
        }
        assert!(cov.determinant() > 0.0);
        Ok(())
    }

    #[test]
    fn test_fit_degenerate() {
        let single = make_pairs(&Pose2D::IDENTITY, &[Point2D::new(1.0, 1.0)]);
        assert!(matches!(
            fit_rigid_transform(&single, 0.1),
            Err(AssociationError::DegenerateGeometry(_))
        ));

        let coincident = make_pairs(
            &Pose2D::IDENTITY,
            &[Point2D::new(1.0, 1.0), Point2D::new(1.0, 1.0)],
        );
        assert!(matches!(
            fit_rigid_transform(&coincident, 0.1),
            Err(AssociationError::DegenerateGeometry(_))
        ));
    }
}
