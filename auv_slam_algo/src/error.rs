//! Error types for the EKF-SLAM core

use thiserror::Error;

/// Errors raised by filter construction, correspondence evaluation and
/// configuration loading
#[derive(Debug, Error)]
pub enum SlamError {
    #[error("Covariance must be square, got {rows}x{cols}")]
    NonSquareCovariance { rows: usize, cols: usize },
    #[error("Mean has {mean} entries but covariance is {covariance}x{covariance}")]
    DimensionMismatch { mean: usize, covariance: usize },
    #[error("State length {0} is not 6 + 3 * n_landmarks")]
    InvalidStateDimension(usize),
    #[error("Invalid {name} noise: {reason}")]
    InvalidNoise { name: &'static str, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Initial state contains non-finite values")]
    NonFiniteState,
    #[error("Innovation covariance is singular or not positive definite (rcond = {rcond:e})")]
    SingularInnovation { rcond: f64 },
    #[error("Degenerate measurement geometry: {0}")]
    DegenerateGeometry(&'static str),
    #[error("Failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, SlamError>;
