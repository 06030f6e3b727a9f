//! Backend abstraction shared by the Pixel solver and external solvers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::BackendKind;
use crate::model::{SimLayout, SpatialModel, Substitutions};
use crate::pixel::PixelSim;

pub const STOPPED_MESSAGE: &str = "Simulation stopped early";
pub const TIMED_OUT_MESSAGE: &str = "Simulation timed out";

/// Why a [`Simulator::run`] call returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Termination {
    Completed,
    Stopped,
    TimedOut,
    Failed(String),
}

impl Termination {
    pub fn message(&self) -> &str {
        match self {
            Termination::Completed => "",
            Termination::Stopped => STOPPED_MESSAGE,
            Termination::TimedOut => TIMED_OUT_MESSAGE,
            Termination::Failed(message) => message,
        }
    }
}

/// Outcome of one [`Simulator::run`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Accepted integration steps
    pub steps: usize,
    pub termination: Termination,
}

impl RunReport {
    pub fn completed(steps: usize) -> Self {
        Self {
            steps,
            termination: Termination::Completed,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.termination == Termination::Completed
    }
}

/// Shared stop flag, settable from another thread while a run is in progress.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn set(&self, stop: bool) {
        self.0.store(stop, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A numerical solver advancing the concentrations of a [`SimLayout`].
pub trait Simulator: Send {
    /// Advance by `time`. `stop_callback` is polled before every step.
    fn run(
        &mut self,
        time: f64,
        timeout_ms: Option<f64>,
        stop_callback: &dyn Fn() -> bool,
    ) -> RunReport;

    /// Voxel-major concentrations of simulated compartment `compartment`,
    /// including the extra variable slots.
    fn concentrations(&self, compartment: usize) -> &[f64];

    /// Number of extra variable slots per voxel.
    fn concentration_padding(&self) -> usize;

    fn error_message(&self) -> &str;

    fn stop_requested(&self) -> bool;

    fn set_stop_requested(&self, stop: bool);
}

/// Builds external backends, e.g. a finite-element solver.
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        model: &SpatialModel,
        layout: &SimLayout,
        substitutions: &Substitutions,
    ) -> Result<Box<dyn Simulator>, String>;
}

/// The backend a simulation drives.
pub enum Backend {
    Pixel(PixelSim),
    External(Box<dyn Simulator>),
}

impl Backend {
    pub fn as_pixel(&self) -> Option<&PixelSim> {
        match self {
            Backend::Pixel(sim) => Some(sim),
            Backend::External(_) => None,
        }
    }

    fn inner(&self) -> &dyn Simulator {
        match self {
            Backend::Pixel(sim) => sim,
            Backend::External(sim) => sim.as_ref(),
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Simulator {
        match self {
            Backend::Pixel(sim) => sim,
            Backend::External(sim) => sim.as_mut(),
        }
    }
}

impl Simulator for Backend {
    fn run(
        &mut self,
        time: f64,
        timeout_ms: Option<f64>,
        stop_callback: &dyn Fn() -> bool,
    ) -> RunReport {
        self.inner_mut().run(time, timeout_ms, stop_callback)
    }

    fn concentrations(&self, compartment: usize) -> &[f64] {
        self.inner().concentrations(compartment)
    }

    fn concentration_padding(&self) -> usize {
        self.inner().concentration_padding()
    }

    fn error_message(&self) -> &str {
        self.inner().error_message()
    }

    fn stop_requested(&self) -> bool {
        self.inner().stop_requested()
    }

    fn set_stop_requested(&self, stop: bool) {
        self.inner().set_stop_requested(stop)
    }
}

/// Stands in for a backend that could not be built; every run fails.
pub(crate) struct UnavailableBackend {
    message: String,
    stop: StopHandle,
}

impl UnavailableBackend {
    pub fn new(message: String) -> Self {
        Self {
            message,
            stop: StopHandle::new(),
        }
    }
}

impl Simulator for UnavailableBackend {
    fn run(&mut self, _time: f64, _timeout_ms: Option<f64>, _stop_callback: &dyn Fn() -> bool) -> RunReport {
        RunReport {
            steps: 0,
            termination: Termination::Failed(self.message.clone()),
        }
    }

    fn concentrations(&self, _compartment: usize) -> &[f64] {
        &[]
    }

    fn concentration_padding(&self) -> usize {
        0
    }

    fn error_message(&self) -> &str {
        &self.message
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    fn set_stop_requested(&self, stop: bool) {
        self.stop.set(stop);
    }
}

/// Build a backend of the given kind.
///
/// `resume`: continue from the model's latest recorded concentrations
/// (Pixel only; external backends decide for themselves).
pub(crate) fn create_backend(
    model: &SpatialModel,
    layout: &SimLayout,
    substitutions: &Substitutions,
    kind: BackendKind,
    resume: bool,
) -> Backend {
    let pixel = || {
        if resume {
            PixelSim::new(model, layout, substitutions)
        } else {
            PixelSim::from_initial_conditions(model, layout, substitutions)
        }
    };
    match kind {
        BackendKind::Pixel => Backend::Pixel(pixel()),
        BackendKind::Fem => match model.fem_backend() {
            Some(factory) => match factory.create(model, layout, substitutions) {
                Ok(sim) => Backend::External(sim),
                Err(message) => {
                    log::error!("External backend setup failed: {}", message);
                    Backend::External(Box::new(UnavailableBackend::new(message)))
                }
            },
            None => {
                log::warn!("FEM backend selected but none registered, using Pixel");
                Backend::Pixel(pixel())
            }
        },
    }
}
