#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]

pub mod config;
pub mod error;
pub mod geometry;
pub mod slam;
pub mod util;
pub mod prelude {
    pub use crate::config::{EkfSlamConfig, EkfSlamFileConfig, SensorConfig};
    pub use crate::error::{Result, SlamError};
    pub use crate::geometry::*;
    pub use crate::slam::{
        AssociationReport, EkfSlamCore, EkfSlamState, OdometryReading, SensorKind, SlamEstimate,
    };
    pub use crate::util::*;
    pub use nalgebra;
    pub use nalgebra::{matrix, vector};
}

pub use prelude::*;
