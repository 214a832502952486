use std::f64::consts::{PI, TAU};

use glam::{DMat2, DVec2};

/// Wrap an angle in radians to `[-pi, pi)`.
#[inline]
pub fn wrap_angle(angle: f64) -> f64 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid may round up to TAU
    if wrapped >= PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Mahalanobis distance `sqrt(r^T S^-1 r)` of a 2D residual under covariance `S`.
///
/// Returns `None` if the covariance is singular.
#[inline]
pub fn mahalanobis_distance(residual: DVec2, cov: &DMat2) -> Option<f64> {
    let det = cov.determinant();
    if !det.is_finite() || det.abs() <= f64::EPSILON * f64::EPSILON {
        return None;
    }
    let d2 = residual.dot(cov.inverse() * residual);
    if d2 < 0.0 {
        return None;
    }
    Some(d2.sqrt())
}

/// Quantile of the chi-squared distribution with one degree of freedom.
///
/// Uses `chi2(p; 1) = z^2` with `z` the standard normal quantile of the
/// two-sided tail `(1 - p) / 2`.
pub fn chi2_inv_1dof(p: f64) -> f64 {
    let tail = 0.5 * (1.0 - p);
    let z = normal_quantile(tail);
    z * z
}

// Acklam's rational approximation, relative error below 1.15e-9.
const ACKLAM_A: [f64; 6] = [
    -3.969_683_028_665_376e1,
    2.209_460_984_245_205e2,
    -2.759_285_104_469_687e2,
    1.383_577_518_672_69e2,
    -3.066_479_806_614_716e1,
    2.506_628_277_459_239,
];
const ACKLAM_B: [f64; 5] = [
    -5.447_609_879_822_406e1,
    1.615_858_368_580_409e2,
    -1.556_989_798_598_866e2,
    6.680_131_188_771_972e1,
    -1.328_068_155_288_572e1,
];
const ACKLAM_C: [f64; 6] = [
    -7.784_894_002_430_293e-3,
    -3.223_964_580_411_365e-1,
    -2.400_758_277_161_838,
    -2.549_732_539_343_734,
    4.374_664_141_464_968,
    2.938_163_982_698_783,
];
const ACKLAM_D: [f64; 4] = [
    7.784_695_709_041_462e-3,
    3.224_671_290_700_398e-1,
    2.445_134_137_142_996,
    3.754_408_661_907_416,
];

/// Inverse of the standard normal cumulative distribution function.
pub fn normal_quantile(p: f64) -> f64 {
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        let (c, d) = (&ACKLAM_C, &ACKLAM_D);
        (((((c[0] * q + c[1]) * q + c[2]) * q + c[3]) * q + c[4]) * q + c[5])
            / ((((d[0] * q + d[1]) * q + d[2]) * q + d[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let (a, b) = (&ACKLAM_A, &ACKLAM_B);
        let q = p - 0.5;
        let r = q * q;
        (((((a[0] * r + a[1]) * r + a[2]) * r + a[3]) * r + a[4]) * r + a[5]) * q
            / (((((b[0] * r + b[1]) * r + b[2]) * r + b[3]) * r + b[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}
