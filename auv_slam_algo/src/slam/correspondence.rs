//! Measurement models and correspondence scoring
//!
//! Two sensors observe 3-D point landmarks:
//! - **Echo sounder**: the landmark position in the vehicle body frame.
//! - **Ranging sonar**: `[range, azimuth, elevation]` of the landmark in the
//!   sonar frame, which is mounted on the body at a fixed transform.
//!
//! A [`Correspondence`] scores one observation against one landmark and keeps
//! everything the sequential update needs afterwards.

use nalgebra::{DVector, Isometry3, Matrix3, Point3, SMatrix, Vector3};

use super::state::PoseLandmarkCovariance;
use crate::error::{Result, SlamError};
use crate::geometry::{pose_isometry, RotationTrig};
use crate::util::normalize_angle;

/// Observation Jacobian: 3 measurement rows × (6 pose + 3 landmark) columns
pub type ObservationJacobian = SMatrix<f64, 3, 9>;

/// Smallest accepted reciprocal condition number of the innovation covariance
const MIN_RCOND: f64 = 1e-12;

/// Minimum range / horizontal range for the spherical sonar projection
const MIN_SONAR_RANGE: f64 = 1e-9;

/// Sensor that produced an observation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Forward-looking ranging sonar, observations in spherical coordinates
    RangingSonar,
    /// Echo sounder, observations as Cartesian points in the body frame
    EchoSounder,
}

/// Transforms and cached trig terms of the pose hypothesis
///
/// Rebuilt for each observation since the pose moves with every update.
#[derive(Debug, Clone)]
pub struct SensorFrames {
    pub global_from_body: Isometry3<f64>,
    pub body_from_global: Isometry3<f64>,
    pub body_from_sonar: Isometry3<f64>,
    pub sonar_from_body: Isometry3<f64>,
    /// Rotation part of `sonar_from_body`
    pub R_sonar_body: Matrix3<f64>,
    pub trig: RotationTrig,
}

impl SensorFrames {
    pub fn new(mu: &DVector<f64>, sonar_mount: &Isometry3<f64>) -> Self {
        let global_from_body = pose_isometry(mu);
        let sonar_from_body = sonar_mount.inverse();
        Self {
            global_from_body,
            body_from_global: global_from_body.inverse(),
            body_from_sonar: *sonar_mount,
            sonar_from_body,
            R_sonar_body: sonar_from_body.rotation.to_rotation_matrix().into_inner(),
            trig: RotationTrig::from_state(mu),
        }
    }

    /// Transform from the given sensor's frame to the global frame
    pub fn global_from_sensor(&self, kind: SensorKind) -> Isometry3<f64> {
        match kind {
            SensorKind::RangingSonar => self.global_from_body * self.body_from_sonar,
            SensorKind::EchoSounder => self.global_from_body,
        }
    }
}

impl SensorKind {
    /// Predict the observation of a global landmark
    ///
    /// Returns `(z_hat, z_hat_sensor)`: the prediction in the sensor's
    /// observation space and the landmark position in the sensor frame.
    pub fn predict_observation(
        &self,
        landmark: &Vector3<f64>,
        frames: &SensorFrames,
    ) -> Result<(Vector3<f64>, Vector3<f64>)> {
        let body = frames.body_from_global * Point3::from(*landmark);
        match self {
            SensorKind::EchoSounder => Ok((body.coords, body.coords)),
            SensorKind::RangingSonar => {
                let s = (frames.sonar_from_body * body).coords;
                Ok((to_spherical(&s)?, s))
            }
        }
    }

    /// Jacobian of the predicted observation with respect to the pose and
    /// the landmark, evaluated at the current linearization point
    pub fn jacobian(
        &self,
        frames: &SensorFrames,
        landmark: &Vector3<f64>,
        z_hat_sensor: &Vector3<f64>,
    ) -> Result<ObservationJacobian> {
        let trig = &frames.trig;
        let d = landmark - trig.position;
        let Rt = trig.R.transpose();

        // body-frame point b = Rᵀ (m - p)
        let mut H_body = ObservationJacobian::zeros();
        H_body.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-Rt));
        H_body
            .fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&trig.inverse_rotated_vector_jacobian(&d));
        H_body.fixed_view_mut::<3, 3>(0, 6).copy_from(&Rt);

        match self {
            SensorKind::EchoSounder => Ok(H_body),
            SensorKind::RangingSonar => {
                let J = spherical_jacobian(z_hat_sensor)?;
                Ok(J * frames.R_sonar_body * H_body)
            }
        }
    }

    /// Innovation `z - z_hat`, with angular components wrapped
    pub fn innovation(&self, z_hat: &Vector3<f64>, z: &Vector3<f64>) -> Vector3<f64> {
        let mut nu = z - z_hat;
        if let SensorKind::RangingSonar = self {
            nu[1] = normalize_angle(nu[1]);
            nu[2] = normalize_angle(nu[2]);
        }
        nu
    }

    /// Global position of a landmark seen by this sensor
    pub fn back_project(
        &self,
        z: &Vector3<f64>,
        global_from_sensor: &Isometry3<f64>,
    ) -> Vector3<f64> {
        let s = match self {
            SensorKind::EchoSounder => *z,
            SensorKind::RangingSonar => from_spherical(z),
        };
        (global_from_sensor * Point3::from(s)).coords
    }
}

/// Spherical projection `[range, azimuth, elevation]` of a sonar-frame point
fn to_spherical(s: &Vector3<f64>) -> Result<Vector3<f64>> {
    let rho = s[0].hypot(s[1]);
    let range = s.norm();
    if range < MIN_SONAR_RANGE || rho < MIN_SONAR_RANGE {
        return Err(SlamError::DegenerateGeometry(
            "landmark on the sonar's vertical axis",
        ));
    }
    Ok(Vector3::new(range, s[1].atan2(s[0]), s[2].atan2(rho)))
}

fn from_spherical(z: &Vector3<f64>) -> Vector3<f64> {
    let (range, azimuth, elevation) = (z[0], z[1], z[2]);
    Vector3::new(
        range * elevation.cos() * azimuth.cos(),
        range * elevation.cos() * azimuth.sin(),
        range * elevation.sin(),
    )
}

/// Jacobian of [`to_spherical`] with respect to the sonar-frame point
fn spherical_jacobian(s: &Vector3<f64>) -> Result<Matrix3<f64>> {
    let (x, y, z) = (s[0], s[1], s[2]);
    let rho2 = x * x + y * y;
    let rho = rho2.sqrt();
    let r2 = rho2 + z * z;
    let r = r2.sqrt();
    if r < MIN_SONAR_RANGE || rho < MIN_SONAR_RANGE {
        return Err(SlamError::DegenerateGeometry(
            "landmark on the sonar's vertical axis",
        ));
    }

    #[rustfmt::skip]
    let J = Matrix3::new(
        x / r,                 y / r,                 z / r,
        -y / rho2,             x / rho2,              0.0,
        -x * z / (r2 * rho),   -y * z / (r2 * rho),   rho / r2,
    );
    Ok(J)
}

/// Innovation covariance inverse and Mahalanobis distance
///
/// `S = H Σ Hᵀ + Q`, `d = νᵀ S⁻¹ ν`. Fails when `S` is ill-conditioned or
/// not positive definite, so a returned distance is never negative.
pub fn mahalanobis(
    H: &ObservationJacobian,
    sigma_sub: &PoseLandmarkCovariance,
    Q: &Matrix3<f64>,
    nu: &Vector3<f64>,
) -> Result<(Matrix3<f64>, f64)> {
    let S = H * sigma_sub * H.transpose() + Q;
    let S = (S + S.transpose()) * 0.5;

    if S.iter().any(|v| !v.is_finite()) {
        return Err(SlamError::SingularInnovation { rcond: f64::NAN });
    }
    let sv = S.singular_values();
    let rcond = if sv.max() > 0.0 { sv.min() / sv.max() } else { 0.0 };
    if rcond < MIN_RCOND {
        return Err(SlamError::SingularInnovation { rcond });
    }
    // Singular values hide the sign of indefinite eigenvalues
    let S_inv = S
        .cholesky()
        .ok_or(SlamError::SingularInnovation { rcond })?
        .inverse();

    let d_m = nu.dot(&(S_inv * nu));
    if !(d_m >= 0.0) {
        return Err(SlamError::SingularInnovation { rcond });
    }
    Ok((S_inv, d_m))
}

/// Score of one observation against one landmark
#[derive(Debug, Clone)]
pub struct Correspondence {
    /// Index of the observation in its batch
    pub observation: usize,
    /// Index of the landmark in the state
    pub landmark: usize,
    /// Predicted observation
    pub z_hat: Vector3<f64>,
    /// Innovation `z - z_hat`
    pub nu: Vector3<f64>,
    /// Observation Jacobian w.r.t. [pose, landmark]
    pub H: ObservationJacobian,
    /// Inverse innovation covariance
    pub S_inv: Matrix3<f64>,
    /// Mahalanobis distance
    pub d_m: f64,
}

impl Correspondence {
    /// Evaluate observation `z` against `landmark`
    #[allow(clippy::too_many_arguments)]
    pub fn evaluate(
        kind: SensorKind,
        frames: &SensorFrames,
        observation: usize,
        landmark_idx: usize,
        landmark: &Vector3<f64>,
        z: &Vector3<f64>,
        sigma_sub: &PoseLandmarkCovariance,
        Q: &Matrix3<f64>,
    ) -> Result<Self> {
        let (z_hat, z_hat_sensor) = kind.predict_observation(landmark, frames)?;
        let H = kind.jacobian(frames, landmark, &z_hat_sensor)?;
        let nu = kind.innovation(&z_hat, z);
        let (S_inv, d_m) = mahalanobis(&H, sigma_sub, Q, &nu)?;

        Ok(Self {
            observation,
            landmark: landmark_idx,
            z_hat,
            nu,
            H,
            S_inv,
            d_m,
        })
    }
}

/// Pick the candidate with the smallest Mahalanobis distance
///
/// On equal distances the later candidate wins.
pub fn select_best(candidates: Vec<Correspondence>) -> Option<Correspondence> {
    candidates
        .into_iter()
        .reduce(|best, c| if c.d_m <= best.d_m { c } else { best })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::isometry_from_rpy;
    use approx::assert_relative_eq;

    fn test_mu() -> DVector<f64> {
        DVector::from_vec(vec![2.0, -1.0, -10.0, 0.05, -0.1, 0.8])
    }

    fn test_mount() -> Isometry3<f64> {
        isometry_from_rpy(&Vector3::new(1.5, 0.2, -0.3), &Vector3::new(0.0, 0.4, 0.05))
    }

    fn sigma_sub() -> PoseLandmarkCovariance {
        let mut s = PoseLandmarkCovariance::identity() * 0.1;
        for k in 6..9 {
            s[(k, k)] = 2.0;
        }
        s[(0, 6)] = 0.05;
        s[(6, 0)] = 0.05;
        s
    }

    fn predict(kind: SensorKind, params: &[f64; 9]) -> Vector3<f64> {
        let mu = DVector::from_column_slice(&params[0..6]);
        let frames = SensorFrames::new(&mu, &test_mount());
        let landmark = Vector3::new(params[6], params[7], params[8]);
        kind.predict_observation(&landmark, &frames).unwrap().0
    }

    fn check_jacobian(kind: SensorKind, landmark: Vector3<f64>) {
        let mu = test_mu();
        let frames = SensorFrames::new(&mu, &test_mount());
        let (_, z_hat_sensor) = kind.predict_observation(&landmark, &frames).unwrap();
        let H = kind.jacobian(&frames, &landmark, &z_hat_sensor).unwrap();

        let mut params = [0.0; 9];
        params[..6].copy_from_slice(mu.as_slice());
        params[6..].copy_from_slice(landmark.as_slice());

        let h = 1e-6;
        for col in 0..9 {
            let mut plus = params;
            let mut minus = params;
            plus[col] += h;
            minus[col] -= h;
            let mut diff = predict(kind, &plus) - predict(kind, &minus);
            if kind == SensorKind::RangingSonar {
                diff[1] = normalize_angle(diff[1]);
                diff[2] = normalize_angle(diff[2]);
            }
            let numeric = diff / (2.0 * h);
            for row in 0..3 {
                assert_relative_eq!(H[(row, col)], numeric[row], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_echosounder_jacobian_matches_finite_differences() {
        check_jacobian(SensorKind::EchoSounder, Vector3::new(5.0, 3.0, -14.0));
    }

    #[test]
    fn test_sonar_jacobian_matches_finite_differences() {
        check_jacobian(SensorKind::RangingSonar, Vector3::new(12.0, 8.0, -12.0));
    }

    #[test]
    fn test_back_projection_inverts_prediction() {
        let frames = SensorFrames::new(&test_mu(), &test_mount());
        let landmark = Vector3::new(10.0, 4.0, -13.0);
        for kind in [SensorKind::EchoSounder, SensorKind::RangingSonar] {
            let (z_hat, _) = kind.predict_observation(&landmark, &frames).unwrap();
            let back = kind.back_project(&z_hat, &frames.global_from_sensor(kind));
            assert_relative_eq!(back, landmark, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_exact_prediction_has_zero_distance() {
        let frames = SensorFrames::new(&test_mu(), &test_mount());
        let landmark = Vector3::new(8.0, 1.0, -11.0);
        let Q = Matrix3::identity() * 0.1;
        for kind in [SensorKind::EchoSounder, SensorKind::RangingSonar] {
            let (z, _) = kind.predict_observation(&landmark, &frames).unwrap();
            let c = Correspondence::evaluate(kind, &frames, 0, 3, &landmark, &z, &sigma_sub(), &Q)
                .unwrap();
            assert_eq!(c.d_m, 0.0);
            assert_eq!(c.landmark, 3);
            assert_eq!(c.nu, Vector3::zeros());
        }
    }

    #[test]
    fn test_distance_is_non_negative_and_grows_with_innovation() {
        let frames = SensorFrames::new(&test_mu(), &test_mount());
        let landmark = Vector3::new(8.0, 1.0, -11.0);
        let Q = Matrix3::identity() * 0.1;
        let kind = SensorKind::EchoSounder;
        let (z, _) = kind.predict_observation(&landmark, &frames).unwrap();

        let mut last = 0.0;
        for k in 1..10 {
            let offset = Vector3::new(0.3, -0.2, 0.1) * k as f64;
            let c = Correspondence::evaluate(
                kind,
                &frames,
                0,
                0,
                &landmark,
                &(z + offset),
                &sigma_sub(),
                &Q,
            )
            .unwrap();
            assert!(c.d_m >= 0.0);
            assert!(c.d_m > last);
            last = c.d_m;
        }
    }

    #[test]
    fn test_sonar_innovation_wraps_angles() {
        let nu = SensorKind::RangingSonar.innovation(
            &Vector3::new(10.0, 3.1, 0.0),
            &Vector3::new(10.5, -3.1, 0.1),
        );
        assert_relative_eq!(nu[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(nu[1], 2.0 * std::f64::consts::PI - 6.2, epsilon = 1e-12);
        assert_relative_eq!(nu[2], 0.1, epsilon = 1e-12);

        let nu = SensorKind::EchoSounder
            .innovation(&Vector3::new(0.0, 3.1, 0.0), &Vector3::new(0.0, -3.1, 0.0));
        assert_relative_eq!(nu[1], -6.2, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_innovation_is_rejected() {
        let H = ObservationJacobian::zeros();
        let sigma = PoseLandmarkCovariance::zeros();
        let err = mahalanobis(&H, &sigma, &Matrix3::zeros(), &Vector3::new(1.0, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, SlamError::SingularInnovation { .. }));

        let mut Q = Matrix3::identity();
        Q[(2, 2)] = f64::NAN;
        let err = mahalanobis(&H, &sigma, &Q, &Vector3::zeros()).unwrap_err();
        assert!(matches!(err, SlamError::SingularInnovation { .. }));
    }

    #[test]
    fn test_indefinite_innovation_is_rejected() {
        // Echo sounder at the identity pose: b = m - p
        let mut H = ObservationJacobian::zeros();
        H.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-Matrix3::identity()));
        H.fixed_view_mut::<3, 3>(0, 6).copy_from(&Matrix3::identity());

        // Pose/landmark cross term larger than both variances allow
        let mut sigma = PoseLandmarkCovariance::identity() * 0.01;
        for i in 6..9 {
            sigma[(i, i)] = 0.5;
        }
        sigma[(0, 6)] = 0.4;
        sigma[(6, 0)] = 0.4;
        let Q = Matrix3::identity() * 0.1;

        // S[0, 0] = 0.01 - 0.8 + 0.5 + 0.1 < 0 while all singular values are well away from 0
        let S = H * sigma * H.transpose() + Q;
        assert!(S[(0, 0)] < 0.0);
        let sv = S.singular_values();
        assert!(sv.min() / sv.max() > 1e-3);

        let innovations = [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::zeros(),
        ];
        for nu in innovations {
            let err = mahalanobis(&H, &sigma, &Q, &nu).unwrap_err();
            assert!(matches!(err, SlamError::SingularInnovation { .. }));
        }

        // The same block without the stale cross term is accepted
        sigma[(0, 6)] = 0.0;
        sigma[(6, 0)] = 0.0;
        let (_, d_m) = mahalanobis(&H, &sigma, &Q, &Vector3::new(1.0, 0.0, 0.0)).unwrap();
        assert!(d_m > 0.0);
    }

    #[test]
    fn test_sonar_degenerate_geometry() {
        let mu = DVector::zeros(6);
        let frames = SensorFrames::new(&mu, &Isometry3::identity());
        let above = Vector3::new(0.0, 0.0, 5.0);
        let err = SensorKind::RangingSonar
            .predict_observation(&above, &frames)
            .unwrap_err();
        assert!(matches!(err, SlamError::DegenerateGeometry(_)));
    }

    fn candidate(landmark: usize, d_m: f64) -> Correspondence {
        Correspondence {
            observation: 0,
            landmark,
            z_hat: Vector3::zeros(),
            nu: Vector3::zeros(),
            H: ObservationJacobian::zeros(),
            S_inv: Matrix3::identity(),
            d_m,
        }
    }

    #[test]
    fn test_select_best_takes_minimum() {
        let best = select_best(vec![candidate(0, 4.0), candidate(1, 1.5), candidate(2, 7.8)]);
        assert_eq!(best.unwrap().landmark, 1);
        assert!(select_best(Vec::new()).is_none());
    }

    #[test]
    fn test_select_best_tie_goes_to_later_candidate() {
        let best = select_best(vec![
            candidate(0, 2.0),
            candidate(1, 1.0),
            candidate(2, 1.0),
            candidate(3, 3.0),
        ]);
        assert_eq!(best.unwrap().landmark, 2);

        // Speculative landmark appended last wins a tie with a known one
        let best = select_best(vec![candidate(0, 7.81), candidate(1, 7.81)]);
        assert_eq!(best.unwrap().landmark, 1);
    }
}
