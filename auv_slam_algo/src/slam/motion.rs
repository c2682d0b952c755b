//! Motion prediction from absolute odometry samples
//!
//! Position is integrated from increments between consecutive odometry
//! positions. Orientation is taken directly from the reading, so the filter
//! never integrates angular rates and the orientation rows of the motion
//! Jacobian are zero.

use nalgebra::{DMatrix, Matrix3, Matrix6, UnitQuaternion, Vector3};

use super::state::EkfSlamState;
use crate::geometry::RotationTrig;
use crate::util::normalize_angle;

/// A single odometry sample: absolute position and orientation in the
/// odometry frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryReading {
    pub position: Vector3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl OdometryReading {
    pub fn new(position: Vector3<f64>, orientation: UnitQuaternion<f64>) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Reading with orientation given as roll, pitch, yaw
    pub fn from_rpy(position: Vector3<f64>, roll: f64, pitch: f64, yaw: f64) -> Self {
        Self::new(position, UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }
}

/// Propagates the pose hypothesis and owns the odometry accumulator
#[derive(Debug, Clone)]
pub struct MotionPredictor {
    process_noise: Matrix6<f64>,
    /// Sum of all position increments consumed so far
    odom_position: Vector3<f64>,
}

impl MotionPredictor {
    pub fn new(process_noise: Matrix6<f64>) -> Self {
        Self {
            process_noise,
            odom_position: Vector3::zeros(),
        }
    }

    /// Odometry position consumed so far
    pub fn odometry_position(&self) -> Vector3<f64> {
        self.odom_position
    }

    /// EKF prediction step
    ///
    /// Returns the position increment applied to the state.
    pub fn predict(&mut self, state: &mut EkfSlamState, reading: &OdometryReading) -> Vector3<f64> {
        // Increment in x, y, z
        let u = reading.position - self.odom_position;
        self.odom_position += u;

        {
            let mut position = state.mu.fixed_rows_mut::<3>(0);
            position += u;
        }

        let (roll, pitch, yaw) = reading.orientation.euler_angles();
        state.mu[3] = normalize_angle(roll);
        state.mu[4] = normalize_angle(pitch);
        state.mu[5] = normalize_angle(yaw);

        let trig = RotationTrig::from_state(&state.mu);
        let g = trig.rotated_vector_jacobian(&u);
        let G = motion_jacobian(&g, state.mu.len());

        // Σ' = G Σ Gᵀ + Fxᵀ R Fx
        let mut sigma = &G * &state.sigma * G.transpose();
        {
            let mut pose_block = sigma.fixed_view_mut::<6, 6>(0, 0);
            pose_block += self.process_noise;
        }
        state.sigma = sigma;

        u
    }
}

/// Full-state motion Jacobian
///
/// Identity except for the orientation diagonal, which is zero because
/// orientation is overwritten, and the position/orientation block `g`.
/// Landmark rows and columns stay identity.
pub fn motion_jacobian(g: &Matrix3<f64>, n: usize) -> DMatrix<f64> {
    let mut G = DMatrix::<f64>::identity(n, n);
    for i in 3..6 {
        G[(i, i)] = 0.0;
    }
    G.fixed_view_mut::<3, 3>(0, 3).copy_from(g);
    G
}
