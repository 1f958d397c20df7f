//! Launching, supervising and reporting on the external separation tool.

pub mod command;
pub mod diagnostics;
pub mod executor;
pub mod outputs;
pub mod progress;

pub use command::SeparationCommand;
pub use executor::{EstimatorFactory, SeparationExecutor};
pub use progress::{PhaseEstimator, ProgressEstimator};
