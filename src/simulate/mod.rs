//! Simulation drivers: the backend contract, recorded data, the event queue,
//! the time-series orchestrator and the steady-state controller.

mod backend;
mod data;
mod events;
mod simulation;
mod steady_state;

pub use backend::{
    Backend, BackendFactory, RunReport, Simulator, StopHandle, Termination, STOPPED_MESSAGE,
    TIMED_OUT_MESSAGE,
};
pub use data::{AvgMinMax, SimulationData};
pub use events::SimEvent;
pub use simulation::Simulation;
pub use steady_state::SteadyStateSimulation;
