//! Spatial RD Sim - voxel-lattice reaction-diffusion solver
//!
//! A model is a classified voxel image split into compartments, with species
//! that diffuse inside their compartment, react locally, and cross membranes
//! between neighbouring compartments. The pixel backend integrates the
//! method-of-lines system with explicit Runge-Kutta schemes and adaptive
//! step control; [`Simulation`] drives it through discrete events and records
//! snapshots, and [`SteadyStateSimulation`] runs it until the rate of change
//! falls below a tolerance.

pub mod config;
pub mod error;
pub mod export;
pub mod geometry;
pub mod model;
pub mod pixel;
pub mod pool;
pub mod simulate;
pub mod symbolic;

pub use config::{
    BackendKind, ConvergenceMode, PixelIntegrator, PixelOptions, SimulationOptions,
    SteadyStateOptions,
};
pub use error::{ConfigError, GeometryError, ModelError};
pub use geometry::{CompartmentId, Geometry, MembraneId, Volume, VoxelImage};
pub use model::{ModelEvent, SpatialModel};
pub use pixel::PixelSim;
pub use pool::WorkerPool;
pub use simulate::{
    Backend, BackendFactory, RunReport, Simulation, SimulationData, Simulator,
    SteadyStateSimulation, StopHandle, Termination,
};
