//! Growable mean/covariance pair of the augmented SLAM state

use log::warn;
use nalgebra::{DMatrix, DVector, Matrix3, Matrix6, SMatrix, Vector3, Vector6};

use crate::util::*;

/// 9x9 covariance block of the pose and a single landmark
pub type PoseLandmarkCovariance = SMatrix<f64, 9, 9>;

/// EKF-SLAM state containing the mean and covariance of the state estimate
#[derive(Debug, Clone, PartialEq)]
pub struct EkfSlamState {
    /// State mean [x, y, z, roll, pitch, yaw, m1_x, m1_y, m1_z, ...]
    pub mu: DVector<f64>,
    /// State covariance matrix (6+3n × 6+3n)
    pub sigma: DMatrix<f64>,
    /// Number of confirmed landmarks. A speculative landmark may sit past
    /// this count while an observation is being associated.
    pub n_landmarks: usize,
}

impl EkfSlamState {
    /// Pose-only state with the given pose and diagonal pose variances
    pub fn with_pose(pose: Vector6<f64>, variances: Vector6<f64>) -> Self {
        Self {
            mu: DVector::from_column_slice(pose.as_slice()),
            sigma: DMatrix::from_diagonal(&DVector::from_column_slice(variances.as_slice())),
            n_landmarks: 0,
        }
    }

    /// Get the vehicle pose [x, y, z, roll, pitch, yaw]
    pub fn pose(&self) -> Vector6<f64> {
        self.mu.fixed_rows::<6>(0).into_owned()
    }

    /// Get the vehicle position [x, y, z]
    pub fn position(&self) -> Vector3<f64> {
        self.mu.fixed_rows::<3>(0).into_owned()
    }

    /// Get the 6x6 pose covariance
    pub fn pose_covariance(&self) -> Matrix6<f64> {
        self.sigma.fixed_view::<6, 6>(0, 0).into_owned()
    }

    /// Number of landmark blocks physically present in the mean, including a
    /// speculative one
    pub fn stored_landmarks(&self) -> usize {
        (self.mu.len() - POSE_DIM) / LANDMARK_DIM
    }

    /// Get landmark position by index
    pub fn landmark(&self, idx: usize) -> Option<Vector3<f64>> {
        if idx >= self.stored_landmarks() {
            return None;
        }
        Some(self.mu.fixed_rows::<3>(landmark_offset(idx)).into_owned())
    }

    /// Get the 3x3 covariance block for a specific landmark
    pub fn landmark_covariance(&self, idx: usize) -> Option<Matrix3<f64>> {
        if idx >= self.stored_landmarks() {
            return None;
        }
        let base = landmark_offset(idx);
        Some(self.sigma.fixed_view::<3, 3>(base, base).into_owned())
    }

    /// Covariance of the pose and landmark `idx` with their cross terms
    ///
    /// Rows/cols 0..6 are the pose, 6..9 the landmark.
    pub fn pose_landmark_covariance(&self, idx: usize) -> PoseLandmarkCovariance {
        let b = landmark_offset(idx);
        let mut sub = PoseLandmarkCovariance::zeros();
        sub.fixed_view_mut::<6, 6>(0, 0)
            .copy_from(&self.sigma.fixed_view::<6, 6>(0, 0));
        sub.fixed_view_mut::<6, 3>(0, 6)
            .copy_from(&self.sigma.fixed_view::<6, 3>(0, b));
        sub.fixed_view_mut::<3, 6>(6, 0)
            .copy_from(&self.sigma.fixed_view::<3, 6>(b, 0));
        sub.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(&self.sigma.fixed_view::<3, 3>(b, b));
        sub
    }

    /// Append a speculative landmark; it is not counted until confirmed
    pub fn push_speculative(&mut self, landmark: &Vector3<f64>, variances: &Vector3<f64>) {
        grow_state(&mut self.mu, &mut self.sigma, landmark, variances);
    }

    /// Drop the trailing (speculative) landmark
    pub fn discard_speculative(&mut self) {
        shrink_state(&mut self.mu, &mut self.sigma);
    }

    /// Count the trailing speculative landmark as part of the map
    pub fn confirm_speculative(&mut self) -> usize {
        let idx = self.n_landmarks;
        self.n_landmarks += 1;
        idx
    }

    /// Whether mean, covariance and landmark count agree
    pub fn is_consistent(&self) -> bool {
        self.sigma.is_square()
            && self.sigma.nrows() == self.mu.len()
            && landmark_count(self.mu.len()) == Some(self.n_landmarks)
    }

    /// Trim trailing covariance blocks until the covariance matches the mean
    ///
    /// Returns the number of blocks removed. Any removal indicates a
    /// bookkeeping fault upstream and is reported as a warning.
    pub fn reconcile_dimensions(&mut self) -> usize {
        let mut removed = 0;
        while self.mu.len() < self.sigma.nrows() {
            warn!(
                "state mean ({}) and covariance ({}) sizes differ, trimming covariance",
                self.mu.len(),
                self.sigma.nrows()
            );
            shrink_covariance(&mut self.sigma);
            removed += 1;
        }
        removed
    }
}
