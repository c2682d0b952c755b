//! Rigid transforms and rotation derivatives for the 6-DOF vehicle pose
//!
//! Orientation uses fixed-axis roll-pitch-yaw, i.e.
//! `R = Rz(yaw) * Ry(pitch) * Rx(roll)`, which matches
//! `nalgebra::Rotation3::from_euler_angles`.

use nalgebra::{DVector, Isometry3, Matrix3, Translation3, UnitQuaternion, Vector3};

/// Body-to-global transform from the pose entries of a state vector
pub fn pose_isometry(mu: &DVector<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(mu[0], mu[1], mu[2]),
        UnitQuaternion::from_euler_angles(mu[3], mu[4], mu[5]),
    )
}

/// Build a transform from a translation and roll/pitch/yaw angles
pub fn isometry_from_rpy(translation: &Vector3<f64>, rpy: &Vector3<f64>) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(*translation),
        UnitQuaternion::from_euler_angles(rpy[0], rpy[1], rpy[2]),
    )
}

/// Trigonometric terms of the current pose estimate
///
/// Built once per observation and shared by every candidate Jacobian, and by
/// the motion Jacobian during prediction.
#[derive(Debug, Clone, Copy)]
pub struct RotationTrig {
    /// Vehicle position [x, y, z]
    pub position: Vector3<f64>,
    /// Body-to-global rotation
    pub R: Matrix3<f64>,
    /// ∂R/∂roll
    pub dR_droll: Matrix3<f64>,
    /// ∂R/∂pitch
    pub dR_dpitch: Matrix3<f64>,
    /// ∂R/∂yaw
    pub dR_dyaw: Matrix3<f64>,
}

impl RotationTrig {
    /// Cache rotation terms for the pose stored at the head of `mu`
    pub fn from_state(mu: &DVector<f64>) -> Self {
        Self::new(
            Vector3::new(mu[0], mu[1], mu[2]),
            Vector3::new(mu[3], mu[4], mu[5]),
        )
    }

    pub fn new(position: Vector3<f64>, rpy: Vector3<f64>) -> Self {
        let (s3, c3) = rpy[0].sin_cos();
        let (s4, c4) = rpy[1].sin_cos();
        let (s5, c5) = rpy[2].sin_cos();

        #[rustfmt::skip]
        let R = Matrix3::new(
            c5 * c4, c5 * s4 * s3 - s5 * c3, c5 * s4 * c3 + s5 * s3,
            s5 * c4, s5 * s4 * s3 + c5 * c3, s5 * s4 * c3 - c5 * s3,
            -s4,     c4 * s3,                c4 * c3,
        );

        #[rustfmt::skip]
        let dR_droll = Matrix3::new(
            0.0, c5 * s4 * c3 + s5 * s3,  -c5 * s4 * s3 + s5 * c3,
            0.0, s5 * s4 * c3 - c5 * s3,  -s5 * s4 * s3 - c5 * c3,
            0.0, c4 * c3,                 -c4 * s3,
        );

        #[rustfmt::skip]
        let dR_dpitch = Matrix3::new(
            -c5 * s4, c5 * c4 * s3, c5 * c4 * c3,
            -s5 * s4, s5 * c4 * s3, s5 * c4 * c3,
            -c4,      -s4 * s3,     -s4 * c3,
        );

        #[rustfmt::skip]
        let dR_dyaw = Matrix3::new(
            -s5 * c4, -s5 * s4 * s3 - c5 * c3, -s5 * s4 * c3 + c5 * s3,
            c5 * c4,  c5 * s4 * s3 - s5 * c3,  c5 * s4 * c3 + s5 * s3,
            0.0,      0.0,                     0.0,
        );

        Self {
            position,
            R,
            dR_droll,
            dR_dpitch,
            dR_dyaw,
        }
    }

    /// Partial derivatives of `R * v` with respect to roll, pitch and yaw,
    /// one per column
    pub fn rotated_vector_jacobian(&self, v: &Vector3<f64>) -> Matrix3<f64> {
        Matrix3::from_columns(&[self.dR_droll * v, self.dR_dpitch * v, self.dR_dyaw * v])
    }

    /// Partial derivatives of `Rᵀ * v` with respect to roll, pitch and yaw,
    /// one per column
    pub fn inverse_rotated_vector_jacobian(&self, v: &Vector3<f64>) -> Matrix3<f64> {
        Matrix3::from_columns(&[
            self.dR_droll.transpose() * v,
            self.dR_dpitch.transpose() * v,
            self.dR_dyaw.transpose() * v,
        ])
    }
}
