//! Sequential EKF measurement update for a single correspondence
//!
//! Only the pose and the involved landmark are corrected. Correlations with
//! other landmarks are not revised by a single update.

use nalgebra::SMatrix;

use super::correspondence::Correspondence;
use super::state::{EkfSlamState, PoseLandmarkCovariance};
use crate::util::{landmark_offset, normalize_angle};

/// Apply the Kalman correction of one accepted correspondence
///
/// The pose/landmark covariance block is read from the current state, so
/// updates applied earlier in the same batch are taken into account.
/// Returns the 9-dimensional correction `K ν`.
pub fn sequential_update(state: &mut EkfSlamState, c: &Correspondence) -> SMatrix<f64, 9, 1> {
    let sigma_sub = state.pose_landmark_covariance(c.landmark);

    // Kalman gain: K = Σ Hᵀ S⁻¹
    let K = sigma_sub * c.H.transpose() * c.S_inv;
    let delta = K * c.nu;

    // Pose
    {
        let mut pose = state.mu.fixed_rows_mut::<6>(0);
        pose += delta.fixed_rows::<6>(0);
    }
    for i in 3..6 {
        state.mu[i] = normalize_angle(state.mu[i]);
    }

    // Landmark
    let b = landmark_offset(c.landmark);
    {
        let mut landmark = state.mu.fixed_rows_mut::<3>(b);
        landmark += delta.fixed_rows::<3>(6);
    }

    // Covariance update: Σ' = (I - K H) Σ
    let updated = (PoseLandmarkCovariance::identity() - K * c.H) * sigma_sub;
    // Ensure symmetry
    let updated = (updated + updated.transpose()) * 0.5;

    state
        .sigma
        .fixed_view_mut::<6, 6>(0, 0)
        .copy_from(&updated.fixed_view::<6, 6>(0, 0));
    state
        .sigma
        .fixed_view_mut::<3, 3>(b, b)
        .copy_from(&updated.fixed_view::<3, 3>(6, 6));
    state
        .sigma
        .fixed_view_mut::<3, 6>(b, 0)
        .copy_from(&updated.fixed_view::<3, 6>(6, 0));
    state
        .sigma
        .fixed_view_mut::<6, 3>(0, b)
        .copy_from(&updated.fixed_view::<6, 3>(0, 6));

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slam::correspondence::{Correspondence, SensorFrames, SensorKind};
    use approx::assert_relative_eq;
    use nalgebra::{Isometry3, Matrix3, Vector3, Vector6};

    fn two_landmark_state() -> EkfSlamState {
        let mut state = EkfSlamState::with_pose(
            Vector6::new(0.0, 0.0, -10.0, 0.0, 0.0, 0.3),
            Vector6::new(0.2, 0.2, 0.1, 0.01, 0.01, 0.02),
        );
        for lm in [Vector3::new(5.0, 2.0, -20.0), Vector3::new(-3.0, 6.0, -18.0)] {
            state.push_speculative(&lm, &Vector3::repeat(1.0));
            state.confirm_speculative();
        }
        // landmark 0 correlated with landmark 1
        state.sigma[(6, 9)] = 0.3;
        state.sigma[(9, 6)] = 0.3;
        state
    }

    fn correspondence(state: &EkfSlamState, landmark: usize, z: &Vector3<f64>) -> Correspondence {
        let frames = SensorFrames::new(&state.mu, &Isometry3::identity());
        Correspondence::evaluate(
            SensorKind::EchoSounder,
            &frames,
            0,
            landmark,
            &state.landmark(landmark).unwrap(),
            z,
            &state.pose_landmark_covariance(landmark),
            &(Matrix3::identity() * 0.1),
        )
        .unwrap()
    }

    #[test]
    fn test_zero_innovation_leaves_means_unchanged() {
        let mut state = two_landmark_state();
        let frames = SensorFrames::new(&state.mu, &Isometry3::identity());
        let (z, _) = SensorKind::EchoSounder
            .predict_observation(&state.landmark(1).unwrap(), &frames)
            .unwrap();
        let prior = state.clone();
        let c = correspondence(&state, 1, &z);

        let delta = sequential_update(&mut state, &c);
        assert_eq!(delta, SMatrix::<f64, 9, 1>::zeros());
        assert_eq!(state.mu, prior.mu);
        // Uncertainty shrinks on the observed landmark
        assert!(state.sigma[(9, 9)] < prior.sigma[(9, 9)]);
        assert!(state.sigma[(0, 0)] < prior.sigma[(0, 0)]);
    }

    #[test]
    fn test_update_touches_only_pose_and_landmark_blocks() {
        let mut state = two_landmark_state();
        let prior = state.clone();
        let frames = SensorFrames::new(&state.mu, &Isometry3::identity());
        let (z, _) = SensorKind::EchoSounder
            .predict_observation(&state.landmark(1).unwrap(), &frames)
            .unwrap();
        let c = correspondence(&state, 1, &(z + Vector3::new(0.4, -0.2, 0.1)));

        sequential_update(&mut state, &c);

        // Landmark 0 mean, its block and its cross term with landmark 1 are untouched
        assert_eq!(state.landmark(0), prior.landmark(0));
        assert_eq!(state.landmark_covariance(0), prior.landmark_covariance(0));
        assert_eq!(state.sigma[(6, 9)], prior.sigma[(6, 9)]);
        assert_eq!(state.sigma[(0, 6)], prior.sigma[(0, 6)]);

        // Pose and landmark 1 moved
        assert_ne!(state.landmark(1), prior.landmark(1));
        assert_ne!(state.position(), prior.position());

        // Written blocks stay symmetric
        assert_relative_eq!(
            state.sigma.fixed_view::<6, 3>(0, 9).into_owned(),
            state.sigma.fixed_view::<3, 6>(9, 0).transpose(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_update_matches_full_kalman_equations() {
        let mut state = two_landmark_state();
        let frames = SensorFrames::new(&state.mu, &Isometry3::identity());
        let (z, _) = SensorKind::EchoSounder
            .predict_observation(&state.landmark(0).unwrap(), &frames)
            .unwrap();
        let z = z + Vector3::new(-0.3, 0.2, 0.25);
        let c = correspondence(&state, 0, &z);
        let sub = state.pose_landmark_covariance(0);

        let S = c.H * sub * c.H.transpose() + Matrix3::identity() * 0.1;
        let K = sub * c.H.transpose() * S.try_inverse().unwrap();
        let expected_delta = K * c.nu;

        let prior_mu = state.mu.clone();
        let delta = sequential_update(&mut state, &c);
        assert_relative_eq!(delta, expected_delta, epsilon = 1e-10);
        for i in 0..3 {
            assert_relative_eq!(state.mu[i], prior_mu[i] + expected_delta[i], epsilon = 1e-10);
            assert_relative_eq!(
                state.mu[6 + i],
                prior_mu[6 + i] + expected_delta[6 + i],
                epsilon = 1e-10
            );
        }
    }
}
