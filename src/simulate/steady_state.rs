//! Steady-state search: advance a backend in fixed increments until the
//! rate of change stays below a tolerance.
//!
//! ## Criterion
//! After each increment of length `dt` the controller evaluates
//! `‖C(t + dt) − C(t)‖₂ / dt`, divided by `‖C(t + dt)‖₂` in relative mode.
//! The extra time/space slots are excluded. `steps_to_convergence`
//! consecutive increments below `tolerance` count as converged.

use std::time::Instant;

use crate::config::{BackendKind, ConvergenceMode, SteadyStateOptions};
use crate::model::{SimLayout, SpatialModel, Substitutions};

use super::backend::{create_backend, Backend, Simulator, StopHandle, Termination, STOPPED_MESSAGE, TIMED_OUT_MESSAGE};

/// Floor for the increment length and the concentration norm.
const NORM_FLOOR: f64 = 1e-12;

/// Steady-state controller over a model's initial conditions.
pub struct SteadyStateSimulation<'m> {
    model: &'m SpatialModel,
    layout: SimLayout,
    backend_kind: BackendKind,
    backend: Backend,
    options: SteadyStateOptions,
    has_converged: bool,
    steps_below_tolerance: usize,
    /// model time of each criterion evaluation
    steps: Vec<f64>,
    errors: Vec<f64>,
    current_step: f64,
    stop: StopHandle,
    message: String,
}

impl<'m> SteadyStateSimulation<'m> {
    /// Controller with the model's steady-state options and backend.
    pub fn new(model: &'m SpatialModel) -> Self {
        let layout = model.sim_layout();
        let backend_kind = model.options().backend;
        let backend = create_backend(model, &layout, &Substitutions::new(), backend_kind, false);
        Self {
            model,
            layout,
            backend_kind,
            backend,
            options: model.options().steady_state.clone(),
            has_converged: false,
            steps_below_tolerance: 0,
            steps: Vec::new(),
            errors: Vec::new(),
            current_step: 0.0,
            stop: StopHandle::new(),
            message: String::new(),
        }
    }

    /// Run until converged, stopped, timed out or failed; returns backend steps taken.
    pub fn run(&mut self) -> usize {
        self.run_until(f64::INFINITY)
    }

    /// Like [`SteadyStateSimulation::run`] but advance at most `time` model time.
    pub fn run_for(&mut self, time: f64) -> usize {
        self.run_until(time)
    }

    fn run_until(&mut self, max_time: f64) -> usize {
        self.message.clear();
        if let Err(e) = self.options.validate() {
            self.message = format!("Invalid steady-state options: {}", e);
            log::error!("{}", self.message);
            return 0;
        }
        let timer = Instant::now();
        let mut steps = 0;
        let mut elapsed = 0.0;
        log::info!(
            "Steady state: tolerance {}, {} steps to convergence, dt {}, {:?}",
            self.options.tolerance,
            self.options.steps_to_convergence,
            self.options.dt,
            self.options.convergence_mode
        );

        let reached = |elapsed: f64| max_time.is_finite() && elapsed + max_time * 1e-12 >= max_time;
        while !self.has_converged && !reached(elapsed) {
            let remaining_ms = self
                .options
                .timeout_ms
                .map(|ms| ms - timer.elapsed().as_secs_f64() * 1000.0);
            if remaining_ms.is_some_and(|ms| ms <= 0.0) {
                self.message = TIMED_OUT_MESSAGE.to_string();
                break;
            }
            if self.stop.is_set() {
                self.message = STOPPED_MESSAGE.to_string();
                break;
            }
            let dt = self.options.dt.min(max_time - elapsed);
            let before = self.species_concentrations();
            let stop = self.stop.clone();
            let report = self.backend.run(dt, remaining_ms, &|| stop.is_set());
            steps += report.steps;
            if report.termination != Termination::Completed {
                self.message = report.termination.message().to_string();
                break;
            }
            elapsed += dt;
            self.current_step += dt;

            let error = self.criterion(&before, &self.species_concentrations(), dt);
            self.steps.push(self.current_step);
            self.errors.push(error);
            log::debug!("t = {}: steady-state criterion {:e}", self.current_step, error);
            if !error.is_finite() {
                self.message = "Simulation failed: NaN or Inf detected in norm".to_string();
                log::error!("{}", self.message);
                break;
            }
            if error < self.options.tolerance {
                self.steps_below_tolerance += 1;
            } else {
                self.steps_below_tolerance = 0;
            }
            if self.steps_below_tolerance >= self.options.steps_to_convergence {
                self.has_converged = true;
                log::info!("Steady state reached at t = {} (criterion {:e})", self.current_step, error);
            }
        }
        self.stop.set(false);
        self.backend.set_stop_requested(false);
        steps
    }

    /// Species slots of every compartment, concatenated (padding excluded).
    fn species_concentrations(&self) -> Vec<f64> {
        let padding = self.backend.concentration_padding();
        let mut values = Vec::new();
        for (ic, species) in self.layout.species.iter().enumerate() {
            let n = species.len();
            let stride = n + padding;
            values.extend(
                self.backend
                    .concentrations(ic)
                    .chunks(stride)
                    .flat_map(|voxel| voxel[..n.min(voxel.len())].iter().copied()),
            );
        }
        values
    }

    fn criterion(&self, before: &[f64], after: &[f64], dt: f64) -> f64 {
        let change = before
            .iter()
            .zip(after)
            .map(|(b, a)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
            / dt.max(NORM_FLOOR);
        match self.options.convergence_mode {
            ConvergenceMode::Absolute => change,
            ConvergenceMode::Relative => {
                let norm = after.iter().map(|a| a * a).sum::<f64>().sqrt();
                change / norm.max(NORM_FLOOR)
            }
        }
    }

    /// Rebuild the backend from the initial conditions and forget all history.
    pub fn reset(&mut self) {
        self.backend = create_backend(self.model, &self.layout, &Substitutions::new(), self.backend_kind, false);
        self.has_converged = false;
        self.steps_below_tolerance = 0;
        self.steps.clear();
        self.errors.clear();
        self.current_step = 0.0;
        self.message.clear();
        self.stop.set(false);
    }

    // ------------------------------------------------------------------
    // accessors
    // ------------------------------------------------------------------

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Latest criterion value, infinite before the first increment.
    pub fn current_error(&self) -> f64 {
        self.errors.last().copied().unwrap_or(f64::INFINITY)
    }

    /// Model time advanced so far.
    pub fn current_step(&self) -> f64 {
        self.current_step
    }

    pub fn has_converged(&self) -> bool {
        self.has_converged
    }

    pub fn steps_below_tolerance(&self) -> usize {
        self.steps_below_tolerance
    }

    pub fn options(&self) -> &SteadyStateOptions {
        &self.options
    }

    pub fn error_message(&self) -> &str {
        if self.message.is_empty() {
            self.backend.error_message()
        } else {
            &self.message
        }
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // ------------------------------------------------------------------
    // setters
    // ------------------------------------------------------------------

    pub fn set_tolerance(&mut self, tolerance: f64) {
        self.options.tolerance = tolerance;
    }

    pub fn set_steps_to_convergence(&mut self, steps: usize) {
        self.options.steps_to_convergence = steps;
    }

    pub fn set_convergence_mode(&mut self, mode: ConvergenceMode) {
        self.options.convergence_mode = mode;
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.options.dt = dt;
    }

    pub fn set_timeout(&mut self, timeout_ms: Option<f64>) {
        self.options.timeout_ms = timeout_ms;
    }

    /// Switch backend; the controller is reset.
    pub fn set_backend_kind(&mut self, kind: BackendKind) {
        self.backend_kind = kind;
        self.reset();
    }
}
