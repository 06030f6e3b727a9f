//! Finite-difference reaction-diffusion solver on the voxel lattice.
//!
//! Each voxel of a compartment is one finite-difference cell. Diffusion uses
//! the 6-neighbour stencil with face-averaged diffusion constants, reactions
//! are evaluated per voxel and membrane fluxes per boundary voxel pair.
//!
//! ## Integrators
//! - `Rk101`: forward Euler at a fixed step, limited by the diffusion
//!   stability bound.
//! - `Rk212`: Heun with an embedded Euler error estimate.
//! - `Rk323`: Shu-Osher SSP RK3 with an embedded Heun estimate.
//! - `Rk435`: low-storage 3S* five-stage RK4 with an embedded RK3 estimate.
//!
//! The adaptive schemes pick the next step from the local error:
//! `dt_next = min(0.95 · dt · min(abs_max/abs, rel_max/rel)^p, dt_max)`
//! and reject the step while the error exceeds the tolerance.

mod compartment;
mod membrane;

use std::time::Instant;

use crate::config::{ErrorTolerance, PixelIntegrator, PixelOptions};
use crate::model::{SimLayout, SpatialModel, Substitutions, SPACE_SYMBOLS, TIME_SYMBOL};
use crate::pool::WorkerPool;
use crate::simulate::{RunReport, Simulator, StopHandle, Termination, STOPPED_MESSAGE, TIMED_OUT_MESSAGE};

use compartment::SimCompartment;
use membrane::SimMembrane;

pub use compartment::IntegratorError;

/// Offset keeping the relative error finite where concentrations vanish.
const REL_ERROR_EPSILON: f64 = 1e-14;
const INITIAL_TIMESTEP: f64 = 1e-7;
const SAFETY_FACTOR: f64 = 0.95;
/// Below this fraction of the maximum step the solver gives up.
const MIN_TIMESTEP_RATIO: f64 = 1e-20;
/// Relative slack on the end time of a run.
const TIME_TOLERANCE: f64 = 1e-12;

/// Implicit variables appended to every voxel's species slots.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ExtraVariables {
    pub time: bool,
    pub space: bool,
}

impl ExtraVariables {
    pub fn of(model: &SpatialModel) -> Self {
        Self {
            time: model.is_time_dependent(),
            space: model.is_space_dependent(),
        }
    }

    pub fn count(self) -> usize {
        usize::from(self.time) + 3 * usize::from(self.space)
    }

    pub fn names(self) -> Vec<String> {
        let mut names = Vec::new();
        if self.time {
            names.push(TIME_SYMBOL.to_string());
        }
        if self.space {
            names.extend(SPACE_SYMBOLS.iter().map(|s| s.to_string()));
        }
        names
    }

    /// d(time)/dt = 1, coordinates are fixed.
    pub fn rate_expressions(self) -> Vec<String> {
        let mut rates = Vec::new();
        if self.time {
            rates.push("1".to_string());
        }
        if self.space {
            rates.extend(std::iter::repeat("0".to_string()).take(3));
        }
        rates
    }
}

/// One stage of a low-storage Runge-Kutta scheme.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RkStage {
    pub g1: f64,
    pub g2: f64,
    pub g3: f64,
    pub beta: f64,
    pub delta: f64,
}

const fn stage(g1: f64, g2: f64, g3: f64, beta: f64, delta: f64) -> RkStage {
    RkStage { g1, g2, g3, beta, delta }
}

const RK323_STAGES: [RkStage; 3] = [
    stage(1.0, 0.0, 0.0, 1.0, 0.0),
    stage(0.25, 0.0, 0.75, 0.25, 0.0),
    stage(2.0 / 3.0, 0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0),
];
const RK323_FINALISE: (f64, f64, f64) = (0.0, 2.0, -1.0);

const RK435_STAGES: [RkStage; 5] = [
    stage(0.0, 1.0, 0.0, 0.075152045700771, 1.0),
    stage(-0.497531095840104, 1.384996869124138, 0.0, 0.211361016946069, 0.081252332929194),
    stage(1.010070514199942, 3.878155713328178, 0.0, 1.100713347634329, -1.083849060586449),
    stage(-3.196559004608766, -2.324512951813145, 1.642598936063715, 0.728537814675568, -1.096110881845602),
    stage(1.717835630267259, -0.514633322274467, 0.188295940828347, 0.393172889823198, 2.859440022030827),
];
const RK435_DELTA_TAIL: [f64; 2] = [-0.655568367959557, -0.194421504490852];

/// Weights of the RK4(3) lower-order estimate.
fn rk435_finalise() -> (f64, f64, f64) {
    let sum: f64 = RK435_STAGES.iter().map(|s| s.delta).sum::<f64>() + RK435_DELTA_TAIL.iter().sum::<f64>();
    let delta_sum = 1.0 / sum;
    (delta_sum * RK435_DELTA_TAIL[0], delta_sum, delta_sum * RK435_DELTA_TAIL[1])
}

/// Pixel backend: owns the per-compartment state and advances it in time.
pub struct PixelSim {
    compartments: Vec<SimCompartment>,
    membranes: Vec<SimMembrane>,
    options: PixelOptions,
    max_stable_timestep: f64,
    next_timestep: f64,
    discarded_steps: usize,
    n_extra: usize,
    pool: Option<WorkerPool>,
    /// Sticky: once set every run fails immediately
    failure: Option<String>,
    error_message: String,
    stop: StopHandle,
}

impl PixelSim {
    /// Build from the model, continuing from its latest stored concentrations
    /// when their shape matches.
    pub fn new(model: &SpatialModel, layout: &SimLayout, substitutions: &Substitutions) -> Self {
        Self::build(model, layout, substitutions, true)
    }

    /// Build from the species fields' initial concentrations only.
    pub fn from_initial_conditions(
        model: &SpatialModel,
        layout: &SimLayout,
        substitutions: &Substitutions,
    ) -> Self {
        Self::build(model, layout, substitutions, false)
    }

    fn build(model: &SpatialModel, layout: &SimLayout, substitutions: &Substitutions, resume: bool) -> Self {
        let options = model.options().pixel.clone();
        let extra = ExtraVariables::of(model);
        let mut sim = Self {
            compartments: Vec::new(),
            membranes: Vec::new(),
            options,
            max_stable_timestep: f64::MAX,
            next_timestep: INITIAL_TIMESTEP,
            discarded_steps: 0,
            n_extra: extra.count(),
            pool: None,
            failure: None,
            error_message: String::new(),
            stop: StopHandle::new(),
        };
        if let Err(e) = sim.options.validate() {
            let message = format!("Invalid simulation options: {}", e);
            log::error!("Pixel backend setup failed: {}", message);
            sim.fail(message);
            return sim;
        }
        if let Err(message) = sim.populate(model, layout, substitutions, extra) {
            log::error!("Pixel backend setup failed: {}", message);
            sim.fail(message);
            return sim;
        }
        if sim.options.enable_multithreading {
            let pool = match model.worker_pool() {
                Some(pool) => Ok(pool.clone()),
                None => WorkerPool::shared(sim.options.max_threads),
            };
            match pool {
                Ok(pool) => sim.pool = Some(pool),
                Err(e) => {
                    sim.fail(format!("Failed to start worker pool: {}", e));
                    return sim;
                }
            }
        }
        if resume {
            sim.resume_from(model);
        }
        log::info!(
            "Pixel backend: {} compartments, {} membranes, {:?}, {} threads",
            sim.compartments.len(),
            sim.membranes.len(),
            sim.options.integrator,
            sim.pool.as_ref().map_or(1, WorkerPool::num_threads)
        );
        sim
    }

    fn populate(
        &mut self,
        model: &SpatialModel,
        layout: &SimLayout,
        substitutions: &Substitutions,
        extra: ExtraVariables,
    ) -> Result<(), String> {
        for (&cid, species) in layout.compartments.iter().zip(&layout.species) {
            let compartment = SimCompartment::new(model, cid, species, extra, substitutions)?;
            self.max_stable_timestep = self.max_stable_timestep.min(compartment.max_stable_timestep());
            self.compartments.push(compartment);
        }
        let geometry = model.geometry();
        for (im, m) in geometry.membranes().iter().enumerate() {
            let side_a = layout.compartment_index(m.compartment_a());
            let side_b = layout.compartment_index(m.compartment_b());
            if side_a.is_none() && side_b.is_none() {
                continue;
            }
            let membrane = SimMembrane::new(
                model,
                crate::geometry::MembraneId(im),
                &self.compartments,
                side_a,
                side_b,
                extra,
                substitutions,
            )?;
            if let Some(membrane) = membrane {
                log::debug!("  - flux terms across membrane '{}'", membrane.id());
                self.membranes.push(membrane);
            }
        }
        Ok(())
    }

    fn resume_from(&mut self, model: &SpatialModel) {
        let data = model.simulation_data();
        let Some(last) = data.concentration.last() else {
            return;
        };
        let padding_matches = data.conc_padding.last() == Some(&self.n_extra);
        let shape_matches = last.len() == self.compartments.len()
            && last
                .iter()
                .zip(&self.compartments)
                .all(|(c, sim)| c.len() == sim.concentrations().len());
        if !(padding_matches && shape_matches) {
            log::warn!("Stored concentrations do not match the model layout; starting from initial conditions");
            return;
        }
        for (c, sim) in last.iter().zip(&mut self.compartments) {
            sim.set_concentrations(c);
        }
    }

    fn fail(&mut self, message: String) {
        self.error_message = message.clone();
        self.failure = Some(message);
    }

    pub fn n_compartments(&self) -> usize {
        self.compartments.len()
    }

    /// dC/dt from the last evaluation, voxel-major like the concentrations.
    pub fn dcdt(&self, compartment: usize) -> &[f64] {
        self.compartments
            .get(compartment)
            .map(|c| c.dcdt())
            .unwrap_or(&[])
    }

    /// Lower-order estimate of the last adaptive step, 0 if none exists.
    pub fn lower_order_concentration(&self, compartment: usize, species: usize, voxel: usize) -> f64 {
        self.compartments
            .get(compartment)
            .map_or(0.0, |c| c.lower_order_concentration(species, voxel))
    }

    /// Total rejected adaptive steps since construction.
    pub fn discarded_steps(&self) -> usize {
        self.discarded_steps
    }

    pub fn next_timestep(&self) -> f64 {
        self.next_timestep
    }

    pub fn max_stable_timestep(&self) -> f64 {
        self.max_stable_timestep
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn calculate_dcdt(&mut self) {
        let pool = self.pool.as_ref();
        for c in &mut self.compartments {
            c.evaluate_reactions_and_diffusion(pool);
        }
        for m in &self.membranes {
            m.evaluate_reactions(&mut self.compartments);
        }
        for c in &mut self.compartments {
            c.spatially_average_dcdt();
        }
    }

    fn do_rk101(&mut self, dt: f64) {
        self.calculate_dcdt();
        let pool = self.pool.as_ref();
        for c in &mut self.compartments {
            c.forward_euler(dt, pool);
        }
    }

    fn do_rk212(&mut self, dt: f64) {
        self.calculate_dcdt();
        let pool = self.pool.as_ref();
        for c in &mut self.compartments {
            c.rk212_substep1(dt, pool);
        }
        self.calculate_dcdt();
        let pool = self.pool.as_ref();
        for c in &mut self.compartments {
            c.rk212_substep2(dt, pool);
        }
    }

    fn do_rk_general(&mut self, dt: f64, stages: &[RkStage], finalise: (f64, f64, f64)) {
        for c in &mut self.compartments {
            c.rk_init();
        }
        for &stage in stages {
            self.calculate_dcdt();
            let pool = self.pool.as_ref();
            for c in &mut self.compartments {
                c.rk_substep(dt, stage, pool);
            }
        }
        let pool = self.pool.as_ref();
        let (c_factor, s2_factor, s3_factor) = finalise;
        for c in &mut self.compartments {
            c.rk_finalise(c_factor, s2_factor, s3_factor, pool);
        }
    }

    fn do_rk_substeps(&mut self, dt: f64) {
        match self.options.integrator {
            PixelIntegrator::Rk101 => self.do_rk101(dt),
            PixelIntegrator::Rk212 => self.do_rk212(dt),
            PixelIntegrator::Rk323 => self.do_rk_general(dt, &RK323_STAGES, RK323_FINALISE),
            PixelIntegrator::Rk435 => self.do_rk_general(dt, &RK435_STAGES, rk435_finalise()),
        }
    }

    fn undo_rk_step(&mut self) {
        for c in &mut self.compartments {
            c.undo_rk_step();
        }
    }

    fn rk_error(&self) -> IntegratorError {
        self.compartments
            .iter()
            .map(|c| c.rk_error(REL_ERROR_EPSILON))
            .fold(IntegratorError::default(), |acc, e| IntegratorError {
                abs: acc.abs.max(e.abs),
                rel: acc.rel.max(e.rel),
            })
    }

    fn largest_error_species(&self) -> String {
        self.compartments
            .iter()
            .filter_map(|c| c.largest_relative_error(REL_ERROR_EPSILON))
            .fold(None, |best: Option<(f64, String)>, (rel, name)| match best {
                Some((r, _)) if r >= rel => best,
                _ => Some((rel, name)),
            })
            .map(|(_, name)| name)
            .unwrap_or_default()
    }

    /// One accepted adaptive step of at most `dt_max`; returns its length.
    fn do_rk_adaptive(&mut self, dt_max: f64) -> Result<f64, String> {
        let power = self.options.integrator.error_power();
        let ErrorTolerance { abs: max_abs, rel: max_rel } = self.options.max_err;
        loop {
            let dt = self.next_timestep.min(dt_max);
            self.do_rk_substeps(dt);
            let err = self.rk_error();
            let err_factor = (max_abs / err.abs).min(max_rel / err.rel).powf(power);
            self.next_timestep = (SAFETY_FACTOR * dt * err_factor).min(dt_max);
            if self.next_timestep / dt_max < MIN_TIMESTEP_RATIO {
                let species = self.largest_error_species();
                self.undo_rk_step();
                return Err(format!(
                    "Failed to solve model to required accuracy. The largest relative integration error comes from species '{}'",
                    species
                ));
            }
            if err.abs > max_abs || err.rel > max_rel {
                self.discarded_steps += 1;
                log::trace!("discarding step dt={} (abs err {}, rel err {})", dt, err.abs, err.rel);
                self.undo_rk_step();
            } else {
                return Ok(dt);
            }
        }
    }

    fn non_finite_species(&self) -> Option<String> {
        self.compartments
            .iter()
            .find_map(|c| c.non_finite_slot().map(str::to_string))
    }

    /// Checked before every step: timeout, then the callback, then the stop flag.
    fn interruption(&self, timer: &Instant, timeout_ms: Option<f64>, stop_callback: &dyn Fn() -> bool) -> Option<Termination> {
        if let Some(timeout) = timeout_ms {
            if timer.elapsed().as_secs_f64() * 1000.0 >= timeout {
                self.stop.request_stop();
                return Some(Termination::TimedOut);
            }
        }
        if stop_callback() {
            self.stop.request_stop();
        }
        self.stop.is_set().then_some(Termination::Stopped)
    }
}

impl Simulator for PixelSim {
    fn run(&mut self, time: f64, timeout_ms: Option<f64>, stop_callback: &dyn Fn() -> bool) -> RunReport {
        if let Some(failure) = &self.failure {
            return RunReport {
                steps: 0,
                termination: Termination::Failed(failure.clone()),
            };
        }
        self.error_message.clear();
        let timer = Instant::now();
        let discarded_before = self.discarded_steps;
        let mut t_now = 0.0;
        let mut steps = 0;
        while t_now + time * TIME_TOLERANCE < time {
            if let Some(termination) = self.interruption(&timer, timeout_ms, stop_callback) {
                let message = if termination == Termination::TimedOut {
                    TIMED_OUT_MESSAGE
                } else {
                    STOPPED_MESSAGE
                };
                log::info!("{} after {} steps (t = {})", message, steps, t_now);
                self.error_message = message.to_string();
                return RunReport { steps, termination };
            }
            let dt_max = self.options.max_timestep.min(time - t_now);
            if !(dt_max > 0.0) {
                let message = format!("Simulation failed: non-positive timestep {}", dt_max);
                log::error!("{}", message);
                self.fail(message.clone());
                return RunReport {
                    steps,
                    termination: Termination::Failed(message),
                };
            }
            let dt = if self.options.integrator == PixelIntegrator::Rk101 {
                let dt = dt_max.min(self.max_stable_timestep);
                self.do_rk101(dt);
                dt
            } else {
                match self.do_rk_adaptive(dt_max) {
                    Ok(dt) => dt,
                    Err(message) => {
                        log::error!("{}", message);
                        self.fail(message.clone());
                        return RunReport {
                            steps,
                            termination: Termination::Failed(message),
                        };
                    }
                }
            };
            t_now += dt;
            steps += 1;
            if let Some(species) = self.non_finite_species() {
                let message = format!("Simulation failed: NaN or Inf detected in species '{}'", species);
                log::error!("{}", message);
                self.fail(message.clone());
                return RunReport {
                    steps,
                    termination: Termination::Failed(message),
                };
            }
        }
        log::debug!(
            "t = {}: {} steps, {} discarded, next dt {}, {:.1} ms",
            time,
            steps,
            self.discarded_steps - discarded_before,
            self.next_timestep,
            timer.elapsed().as_secs_f64() * 1000.0
        );
        RunReport::completed(steps)
    }

    fn concentrations(&self, compartment: usize) -> &[f64] {
        self.compartments
            .get(compartment)
            .map(|c| c.concentrations())
            .unwrap_or(&[])
    }

    fn concentration_padding(&self) -> usize {
        self.n_extra
    }

    fn error_message(&self) -> &str {
        &self.error_message
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    fn set_stop_requested(&self, stop: bool) {
        self.stop.set(stop);
    }
}
