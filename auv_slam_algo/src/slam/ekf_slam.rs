//! EKF-SLAM (Extended Kalman Filter Simultaneous Localization and Mapping)
//!
//! This module implements the filter facade, which estimates both the
//! vehicle's 6-DOF pose and the positions of 3-D landmarks seen by a ranging
//! sonar and an echo sounder.
//!
//! ## State Vector Structure
//! - Dimension: 6 + 3n (vehicle pose + n landmarks)
//! - Vehicle pose: [x, y, z, roll, pitch, yaw]
//! - Landmarks: [m1_x, m1_y, m1_z, m2_x, ...] (global positions)
//!
//! ## Cycle
//! 1. [`EkfSlamCore::predict_motion`] on each odometry sample
//! 2. [`EkfSlamCore::associate_and_update`] on each observation batch
//! 3. [`EkfSlamCore::finalize`] to commit the hypothesis and read it back
//!
//! Prediction and association work on a hypothesis copy of the state; the
//! committed copy only changes in `finalize`.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use super::association::{self, AssociationReport};
use super::correspondence::SensorKind;
use super::motion::{MotionPredictor, OdometryReading};
use super::state::EkfSlamState;
use crate::config::EkfSlamConfig;
use crate::error::{Result, SlamError};
use crate::util::{landmark_count, normalize_angle};

/// Committed filter output
#[derive(Debug, Clone, PartialEq)]
pub struct SlamEstimate {
    /// State mean [x, y, z, roll, pitch, yaw, m1_x, m1_y, m1_z, ...]
    pub mean: DVector<f64>,
    /// State covariance
    pub covariance: DMatrix<f64>,
    /// Landmarks classified as pipeline observations
    pub pipeline_landmarks: Vec<Vector3<f64>>,
}

/// EKF-SLAM filter with separate committed and hypothesis states
#[derive(Debug, Clone)]
pub struct EkfSlamCore {
    config: EkfSlamConfig,
    committed: EkfSlamState,
    hypothesis: EkfSlamState,
    predictor: MotionPredictor,
    pipeline_map: Vec<Vector3<f64>>,
}

impl EkfSlamCore {
    /// Create a filter from an initial mean/covariance
    ///
    /// The mean must hold a pose followed by whole landmark triples and match
    /// the covariance dimensions.
    pub fn new(
        initial_mean: DVector<f64>,
        initial_covariance: DMatrix<f64>,
        config: EkfSlamConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (rows, cols) = initial_covariance.shape();
        if rows != cols {
            return Err(SlamError::NonSquareCovariance { rows, cols });
        }
        if initial_mean.len() != rows {
            return Err(SlamError::DimensionMismatch {
                mean: initial_mean.len(),
                covariance: rows,
            });
        }
        let n_landmarks = landmark_count(initial_mean.len())
            .ok_or(SlamError::InvalidStateDimension(initial_mean.len()))?;
        if initial_mean.iter().chain(initial_covariance.iter()).any(|v| !v.is_finite()) {
            return Err(SlamError::NonFiniteState);
        }

        let mut mu = initial_mean;
        for i in 3..6 {
            mu[i] = normalize_angle(mu[i]);
        }
        let state = EkfSlamState {
            mu,
            sigma: initial_covariance,
            n_landmarks,
        };

        Ok(Self {
            predictor: MotionPredictor::new(config.process_noise),
            config,
            committed: state.clone(),
            hypothesis: state,
            pipeline_map: Vec::new(),
        })
    }

    /// Create a pose-only filter with diagonal pose variances
    pub fn with_pose(
        pose: Vector6<f64>,
        variances: Vector6<f64>,
        config: EkfSlamConfig,
    ) -> Result<Self> {
        let state = EkfSlamState::with_pose(pose, variances);
        Self::new(state.mu, state.sigma, config)
    }

    /// Propagate the hypothesis with an odometry sample
    pub fn predict_motion(&mut self, reading: &OdometryReading) {
        let u = self.predictor.predict(&mut self.hypothesis, reading);
        debug!("predicted motion increment ({:.3}, {:.3}, {:.3})", u[0], u[1], u[2]);
        debug_assert!(self.hypothesis.is_consistent());
    }

    /// Associate a batch of observations from one sensor and update the
    /// hypothesis
    ///
    /// `pipeline_estimate` is the expected pipeline position in the body
    /// frame, if the pipeline tracker has one for this cycle.
    pub fn associate_and_update(
        &mut self,
        observations: &[Vector3<f64>],
        kind: SensorKind,
        pipeline_estimate: Option<&Vector3<f64>>,
    ) -> AssociationReport {
        association::associate_and_update(
            &mut self.hypothesis,
            &self.config,
            observations,
            kind,
            pipeline_estimate,
            &mut self.pipeline_map,
        )
    }

    /// Commit the hypothesis and return the committed estimate
    pub fn finalize(&mut self) -> SlamEstimate {
        if self.committed.n_landmarks != self.hypothesis.n_landmarks {
            debug!(
                "committing {} landmarks (was {})",
                self.hypothesis.n_landmarks, self.committed.n_landmarks
            );
        }
        self.committed.clone_from(&self.hypothesis);
        debug_assert!(self.committed.is_consistent());

        SlamEstimate {
            mean: self.committed.mu.clone(),
            covariance: self.committed.sigma.clone(),
            pipeline_landmarks: self.pipeline_map.clone(),
        }
    }

    pub fn config(&self) -> &EkfSlamConfig {
        &self.config
    }

    /// Last committed state
    pub fn state(&self) -> &EkfSlamState {
        &self.committed
    }

    /// Working hypothesis, including uncommitted predictions and updates
    pub fn hypothesis(&self) -> &EkfSlamState {
        &self.hypothesis
    }

    /// Number of committed landmarks
    pub fn n_landmarks(&self) -> usize {
        self.committed.n_landmarks
    }

    /// Committed vehicle pose [x, y, z, roll, pitch, yaw]
    pub fn pose(&self) -> Vector6<f64> {
        self.committed.pose()
    }

    /// Committed landmark position
    pub fn landmark(&self, idx: usize) -> Option<Vector3<f64>> {
        if idx >= self.committed.n_landmarks {
            return None;
        }
        self.committed.landmark(idx)
    }

    /// Committed 3x3 landmark covariance
    pub fn landmark_covariance(&self, idx: usize) -> Option<Matrix3<f64>> {
        if idx >= self.committed.n_landmarks {
            return None;
        }
        self.committed.landmark_covariance(idx)
    }

    pub fn pipeline_landmarks(&self) -> &[Vector3<f64>] {
        &self.pipeline_map
    }

    /// Odometry position consumed by the motion predictor so far
    pub fn odometry_position(&self) -> Vector3<f64> {
        self.predictor.odometry_position()
    }
}
