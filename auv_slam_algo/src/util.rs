//! Angle helpers and in-place resizing of the state mean/covariance pair
//!
//! The state is laid out as `[x, y, z, roll, pitch, yaw, m1x, m1y, m1z, ...]`.
//! Landmarks are only ever appended to or removed from the tail.

use nalgebra::{DMatrix, DVector, Vector3};
use std::f64::consts::{PI, TAU};

/// Number of pose entries at the head of the state vector
pub const POSE_DIM: usize = 6;

/// Number of entries per landmark
pub const LANDMARK_DIM: usize = 3;

/// Normalize angle to [-π, π)
///
/// Angles already in range are returned untouched so that repeated
/// normalization is exact.
pub fn normalize_angle(angle: f64) -> f64 {
    if !angle.is_finite() || (-PI..PI).contains(&angle) {
        return angle;
    }
    let a = (angle + PI).rem_euclid(TAU) - PI;
    // rem_euclid may round up to TAU for tiny negative inputs
    if a >= PI {
        a - TAU
    } else {
        a
    }
}

/// Index of the first entry of landmark `idx` in the state vector
#[inline]
pub fn landmark_offset(idx: usize) -> usize {
    POSE_DIM + LANDMARK_DIM * idx
}

/// Number of landmark blocks held by a state vector of length `len`
///
/// Returns `None` when `len` is not `6 + 3n`.
pub fn landmark_count(len: usize) -> Option<usize> {
    if len < POSE_DIM || (len - POSE_DIM) % LANDMARK_DIM != 0 {
        return None;
    }
    Some((len - POSE_DIM) / LANDMARK_DIM)
}

/// Append a landmark to the state
///
/// The new covariance block is diagonal with the given per-axis variances and
/// uncorrelated with the rest of the state. All prior entries are kept.
pub fn grow_state(
    mu: &mut DVector<f64>,
    sigma: &mut DMatrix<f64>,
    landmark: &Vector3<f64>,
    variances: &Vector3<f64>,
) {
    let old_n = mu.len();
    let new_n = old_n + LANDMARK_DIM;

    let mut new_mu = DVector::zeros(new_n);
    new_mu.rows_mut(0, old_n).copy_from(mu);
    new_mu.fixed_rows_mut::<3>(old_n).copy_from(landmark);
    *mu = new_mu;

    let (rows, cols) = sigma.shape();
    let mut new_sigma = DMatrix::zeros(rows + LANDMARK_DIM, cols + LANDMARK_DIM);
    new_sigma.view_mut((0, 0), (rows, cols)).copy_from(sigma);
    for k in 0..LANDMARK_DIM {
        new_sigma[(rows + k, cols + k)] = variances[k];
    }
    *sigma = new_sigma;
}

/// Remove the most recently appended landmark from the state
pub fn shrink_state(mu: &mut DVector<f64>, sigma: &mut DMatrix<f64>) {
    let n = mu.len().saturating_sub(LANDMARK_DIM).max(POSE_DIM);
    *mu = mu.rows(0, n).into_owned();
    shrink_covariance(sigma);
}

/// Remove the trailing landmark block from the covariance only
pub fn shrink_covariance(sigma: &mut DMatrix<f64>) {
    let n = sigma.nrows().saturating_sub(LANDMARK_DIM).max(POSE_DIM);
    *sigma = sigma.view((0, 0), (n, n)).into_owned();
}
