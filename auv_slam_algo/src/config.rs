//! Filter configuration
//!
//! [`EkfSlamConfig`] is the runtime form handed to the filter. It is usually
//! built from [`EkfSlamFileConfig`], the TOML representation, where noise
//! models are given as per-axis variances:
//!
//! ```toml
//! [process]
//! noise_variances = [0.01, 0.01, 0.01, 0.001, 0.001, 0.001]
//!
//! [sonar]
//! outlier_gate = 11.34
//! new_landmark_distance = 7.81
//!
//! [sonar_mount]
//! translation = [1.2, 0.0, -0.1]
//! rpy = [0.0, 0.35, 0.0]
//! ```

use std::path::Path;

use nalgebra::{Isometry3, Matrix3, Matrix6, Vector3, Vector6};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};
use crate::geometry::isometry_from_rpy;
use crate::slam::SensorKind;

/// Per-sensor measurement model parameters
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// Measurement noise in the sensor's observation space (3x3)
    pub noise: Matrix3<f64>,
    /// Candidates with a Mahalanobis distance at or above this are outliers
    pub outlier_gate: f64,
    /// Distance assigned to the speculative new-landmark hypothesis
    pub new_landmark_distance: f64,
    /// Initial per-axis variance of a freshly back-projected landmark
    pub new_landmark_variance: Vector3<f64>,
}

/// Runtime configuration of the EKF-SLAM core
#[derive(Debug, Clone)]
pub struct EkfSlamConfig {
    /// Motion noise on [x, y, z, roll, pitch, yaw]
    pub process_noise: Matrix6<f64>,
    /// Forward-looking ranging sonar
    pub sonar: SensorConfig,
    /// Downward echo sounder
    pub echosounder: SensorConfig,
    /// Pose of the sonar frame expressed in the vehicle body frame
    pub sonar_mount: Isometry3<f64>,
    /// Maximum distance between the pipeline estimate and an observation's
    /// back-projection for the observation to be treated as the pipeline
    pub pipeline_match_radius: f64,
}

impl Default for EkfSlamConfig {
    fn default() -> Self {
        EkfSlamFileConfig::default().to_ekf_config()
    }
}

impl EkfSlamConfig {
    /// Parameters of the given sensor
    pub fn sensor(&self, kind: SensorKind) -> &SensorConfig {
        match kind {
            SensorKind::RangingSonar => &self.sonar,
            SensorKind::EchoSounder => &self.echosounder,
        }
    }

    /// Check noise models and thresholds
    pub fn validate(&self) -> Result<()> {
        check_noise("process", self.process_noise.as_slice(), 6, false)?;
        check_sensor("sonar", &self.sonar)?;
        check_sensor("echosounder", &self.echosounder)?;
        if !(self.pipeline_match_radius >= 0.0) {
            return Err(SlamError::InvalidConfig(format!(
                "pipeline_match_radius must be non-negative, got {}",
                self.pipeline_match_radius
            )));
        }
        let t = self.sonar_mount.translation.vector;
        if !t.iter().all(|v| v.is_finite()) {
            return Err(SlamError::InvalidConfig(
                "sonar mount translation is not finite".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_sensor(name: &'static str, sensor: &SensorConfig) -> Result<()> {
    check_noise(name, sensor.noise.as_slice(), 3, true)?;
    if !(sensor.outlier_gate > 0.0) {
        return Err(SlamError::InvalidConfig(format!(
            "{name} outlier_gate must be positive, got {}",
            sensor.outlier_gate
        )));
    }
    if !(sensor.new_landmark_distance >= 0.0) {
        return Err(SlamError::InvalidConfig(format!(
            "{name} new_landmark_distance must be non-negative, got {}",
            sensor.new_landmark_distance
        )));
    }
    if !sensor.new_landmark_variance.iter().all(|v| *v > 0.0) {
        return Err(SlamError::InvalidConfig(format!(
            "{name} new_landmark_variance must be positive"
        )));
    }
    Ok(())
}

/// Column-major square matrix check: finite, symmetric, non-negative diagonal
/// (strictly positive when `positive_diagonal`)
fn check_noise(
    name: &'static str,
    data: &[f64],
    dim: usize,
    positive_diagonal: bool,
) -> Result<()> {
    if data.iter().any(|v| !v.is_finite()) {
        return Err(SlamError::InvalidNoise {
            name,
            reason: "contains non-finite entries".to_string(),
        });
    }
    for i in 0..dim {
        let d = data[i * dim + i];
        if d < 0.0 || (positive_diagonal && d == 0.0) {
            return Err(SlamError::InvalidNoise {
                name,
                reason: format!("diagonal entry {i} is {d}"),
            });
        }
        for j in (i + 1)..dim {
            let (a, b) = (data[j * dim + i], data[i * dim + j]);
            if (a - b).abs() > 1e-9 * (1.0 + a.abs().max(b.abs())) {
                return Err(SlamError::InvalidNoise {
                    name,
                    reason: format!("not symmetric at ({i}, {j})"),
                });
            }
        }
    }
    Ok(())
}

/// `[process]` section
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessSection {
    /// Variances of [x, y, z, roll, pitch, yaw]
    pub noise_variances: [f64; 6],
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            noise_variances: [0.01, 0.01, 0.01, 0.001, 0.001, 0.001],
        }
    }
}

/// `[sonar]` section
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SonarSection {
    /// Variances of [range, azimuth, elevation]
    pub noise_variances: [f64; 3],
    pub outlier_gate: f64,
    pub new_landmark_distance: f64,
    pub new_landmark_variances: [f64; 3],
}

impl Default for SonarSection {
    fn default() -> Self {
        Self {
            // 0.5 m range, ~1 deg azimuth, ~5 deg elevation
            noise_variances: [0.25, 3.0e-4, 7.6e-3],
            // chi-squared, 3 DOF: 99% and 95%
            outlier_gate: 11.34,
            new_landmark_distance: 7.81,
            new_landmark_variances: [50.0, 50.0, 100.0],
        }
    }
}

/// `[echosounder]` section
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoSounderSection {
    /// Variances of the body-frame point [x, y, z]
    pub noise_variances: [f64; 3],
    pub outlier_gate: f64,
    pub new_landmark_distance: f64,
    pub new_landmark_variances: [f64; 3],
}

impl Default for EchoSounderSection {
    fn default() -> Self {
        Self {
            noise_variances: [0.1, 0.1, 0.1],
            outlier_gate: 11.34,
            new_landmark_distance: 7.81,
            new_landmark_variances: [5.0, 5.0, 5.0],
        }
    }
}

/// `[sonar_mount]` section: sonar pose in the body frame
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSection {
    pub translation: [f64; 3],
    /// Roll, pitch, yaw in radians
    pub rpy: [f64; 3],
}

/// `[pipeline]` section
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub match_radius: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self { match_radius: 100.0 }
    }
}

/// Full filter configuration as stored in TOML
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EkfSlamFileConfig {
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub sonar: SonarSection,
    #[serde(default)]
    pub echosounder: EchoSounderSection,
    #[serde(default)]
    pub sonar_mount: MountSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl EkfSlamFileConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Serialize to a TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Convert to the runtime configuration
    pub fn to_ekf_config(&self) -> EkfSlamConfig {
        EkfSlamConfig {
            process_noise: Matrix6::from_diagonal(&Vector6::from_row_slice(
                &self.process.noise_variances,
            )),
            sonar: SensorConfig {
                noise: diag3(&self.sonar.noise_variances),
                outlier_gate: self.sonar.outlier_gate,
                new_landmark_distance: self.sonar.new_landmark_distance,
                new_landmark_variance: Vector3::from(self.sonar.new_landmark_variances),
            },
            echosounder: SensorConfig {
                noise: diag3(&self.echosounder.noise_variances),
                outlier_gate: self.echosounder.outlier_gate,
                new_landmark_distance: self.echosounder.new_landmark_distance,
                new_landmark_variance: Vector3::from(self.echosounder.new_landmark_variances),
            },
            sonar_mount: isometry_from_rpy(
                &Vector3::from(self.sonar_mount.translation),
                &Vector3::from(self.sonar_mount.rpy),
            ),
            pipeline_match_radius: self.pipeline.match_radius,
        }
    }

    /// Convert and validate in one step
    pub fn build(&self) -> Result<EkfSlamConfig> {
        let config = self.to_ekf_config();
        config.validate()?;
        Ok(config)
    }
}

fn diag3(v: &[f64; 3]) -> Matrix3<f64> {
    Matrix3::from_diagonal(&Vector3::from(*v))
}
