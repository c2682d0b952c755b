pub mod association;
pub mod correspondence;
pub mod ekf_slam;
pub mod motion;
pub mod state;
pub mod update;

pub use association::*;
pub use correspondence::*;
pub use ekf_slam::*;
pub use motion::*;
pub use state::*;
pub use update::*;
