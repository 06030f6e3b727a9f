//! Configuration module for simulation options.
//!
//! Options are plain serde structs with defaults suitable for small models.

mod options;

pub use options::{
    BackendKind, ConvergenceMode, ErrorTolerance, PixelIntegrator, PixelOptions,
    SimulationOptions, SteadyStateOptions,
};
