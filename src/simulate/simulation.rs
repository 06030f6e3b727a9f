//! Time-series simulation: drives a backend through requested timesteps,
//! applies model events and records results into the model.
//!
//! ## Step anatomy
//! For each requested step of length `dt` starting at `t0`:
//! 1. Events due at `t0` are applied to the latest record and the backend
//!    is rebuilt from it.
//! 2. For each event strictly inside `(t0, t0 + dt)` the backend runs up to
//!    the event time, a temporary record is taken, the event is applied to
//!    it, the backend is rebuilt from it and the temporary record is dropped.
//! 3. The backend runs to `t0 + dt` and one record is appended.
//!
//! A failure, stop request or timeout returns immediately without a record.

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::ModelError;
use crate::geometry::{image_array, VoxelFlattener};
use crate::model::{EventAction, SimLayout, SpatialModel, Substitutions};

use super::backend::{create_backend, Backend, Simulator, StopHandle, Termination};
use super::data::AvgMinMax;
use super::events::{init_events, SimEvent};

/// Relative distance below which an event counts as due now.
const EVENT_DUE_TOLERANCE: f64 = 1e-12;
/// Relative distance an event must lie before the end of a step to split it.
const EVENT_SPLIT_TOLERANCE: f64 = 1e-13;

/// A simulation of a [`SpatialModel`], borrowing it for its lifetime.
pub struct Simulation<'m> {
    model: &'m mut SpatialModel,
    layout: SimLayout,
    backend: Backend,
    events: VecDeque<SimEvent>,
    substitutions: Substitutions,
    stop: StopHandle,
    is_running: bool,
    /// Termination message of the last batch, if it did not complete
    message: String,
    failed: bool,
}

impl<'m> Simulation<'m> {
    /// Continue from the model's recorded data if it holds more than the
    /// initial time point, otherwise start afresh at t = 0.
    pub fn new(model: &'m mut SpatialModel) -> Self {
        let layout = model.sim_layout();
        if model.simulation_data().size() <= 1 {
            model.simulation_data_mut().clear();
        }
        let mut substitutions = Substitutions::new();
        let events = init_events(model.events(), model.simulation_data().last_time(), &mut substitutions);
        let backend = create_backend(model, &layout, &substitutions, model.options().backend, true);
        log::info!(
            "Simulation: {} compartments, {} species, {} pending event times",
            layout.n_compartments(),
            layout.species.iter().map(Vec::len).sum::<usize>(),
            events.len() - 1
        );
        let mut sim = Self {
            model,
            layout,
            backend,
            events,
            substitutions,
            stop: StopHandle::new(),
            is_running: false,
            message: String::new(),
            failed: false,
        };
        if sim.model.simulation_data().is_empty() && sim.backend.error_message().is_empty() {
            sim.update_concentrations(0.0);
        }
        sim
    }

    pub fn model(&self) -> &SpatialModel {
        &*self.model
    }

    pub fn layout(&self) -> &SimLayout {
        &self.layout
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Current parameter overrides from applied events.
    pub fn substitutions(&self) -> &Substitutions {
        &self.substitutions
    }

    /// `n_steps` steps of length `time` without a stop callback.
    pub fn do_timesteps(&mut self, time: f64, n_steps: usize, timeout_ms: Option<f64>) -> usize {
        self.do_multiple_timesteps(&[(n_steps, time)], timeout_ms, &|| false)
    }

    /// Run every `(n_steps, dt)` batch in order; returns the backend steps taken.
    ///
    /// Check [`Simulation::error_message`] afterwards: a failure, stop or
    /// timeout ends the call early with the records made so far.
    pub fn do_multiple_timesteps(
        &mut self,
        timesteps: &[(usize, f64)],
        timeout_ms: Option<f64>,
        stop_callback: &dyn Fn() -> bool,
    ) -> usize {
        if self.failed {
            return 0;
        }
        self.message.clear();
        let timer = Instant::now();
        self.is_running = true;
        {
            let (settings, data) = self.model.settings_and_data_mut();
            if data.size() <= 1 {
                settings.times.clear();
            }
            settings.times.extend_from_slice(timesteps);
            data.reserve(timesteps.iter().map(|&(n, _)| n).sum());
        }
        let mut steps = 0;
        for &(n_steps, dt) in timesteps {
            for _ in 0..n_steps {
                if let Err(termination) = self.do_timestep(dt, &timer, timeout_ms, stop_callback, &mut steps) {
                    self.finish_interrupted(termination);
                    self.is_running = false;
                    return steps;
                }
            }
        }
        self.is_running = false;
        steps
    }

    fn do_timestep(
        &mut self,
        dt: f64,
        timer: &Instant,
        timeout_ms: Option<f64>,
        stop_callback: &dyn Fn() -> bool,
        steps: &mut usize,
    ) -> Result<(), Termination> {
        let t_start = self.model.simulation_data().last_time();
        let t_end = t_start + dt;
        let scale = dt.max(f64::MIN_POSITIVE);

        while (self.next_event_time() - t_start).abs() / scale < EVENT_DUE_TOLERANCE {
            self.apply_next_event().map_err(Termination::Failed)?;
        }

        let mut t = t_start;
        while (t_end - self.next_event_time()) / scale > EVENT_SPLIT_TOLERANCE {
            let t_event = self.next_event_time();
            self.run_backend(t_event - t, timer, timeout_ms, stop_callback, steps)?;
            t = t_event;
            self.update_concentrations(t);
            let applied = self.apply_next_event();
            self.model.simulation_data_mut().pop_back();
            applied.map_err(Termination::Failed)?;
        }

        self.run_backend(t_end - t, timer, timeout_ms, stop_callback, steps)?;
        self.update_concentrations(t_end);
        Ok(())
    }

    fn run_backend(
        &mut self,
        time: f64,
        timer: &Instant,
        timeout_ms: Option<f64>,
        stop_callback: &dyn Fn() -> bool,
        steps: &mut usize,
    ) -> Result<(), Termination> {
        let remaining_ms = timeout_ms.map(|ms| (ms - timer.elapsed().as_secs_f64() * 1000.0).max(0.0));
        let stop = self.stop.clone();
        let callback = || stop.is_set() || stop_callback();
        let report = self.backend.run(time, remaining_ms, &callback);
        *steps += report.steps;
        match report.termination {
            Termination::Completed => Ok(()),
            termination => Err(termination),
        }
    }

    fn finish_interrupted(&mut self, termination: Termination) {
        self.message = termination.message().to_string();
        self.stop.set(false);
        self.backend.set_stop_requested(false);
        match termination {
            Termination::Failed(message) => {
                log::error!("Simulation failed: {}", message);
                self.failed = true;
            }
            _ => {
                // the backend may have advanced past the last record
                log::info!("{} at t = {}", self.message, self.model.simulation_data().last_time());
                self.reset_to_last_record();
            }
        }
    }

    /// Rebuild events and backend so that a later call resumes from the latest record.
    fn reset_to_last_record(&mut self) {
        self.substitutions.clear();
        self.events = init_events(
            self.model.events(),
            self.model.simulation_data().last_time(),
            &mut self.substitutions,
        );
        self.rebuild_backend();
    }

    fn rebuild_backend(&mut self) {
        self.backend = create_backend(
            &*self.model,
            &self.layout,
            &self.substitutions,
            self.model.options().backend,
            true,
        );
    }

    fn next_event_time(&self) -> f64 {
        self.events.front().map_or(f64::INFINITY, |e| e.time)
    }

    /// Apply the earliest pending event group to the latest record and rebuild the backend.
    fn apply_next_event(&mut self) -> Result<(), String> {
        let Some(event) = self.events.pop_front() else {
            return Ok(());
        };
        if event.is_sentinel() {
            self.events.push_front(event);
            return Ok(());
        }
        log::info!("t = {}: applying events {:?}", event.time, event.ids);
        for id in &event.ids {
            let action = self
                .model
                .events()
                .iter()
                .find(|e| &e.id == id)
                .map(|e| e.action.clone());
            match action {
                Some(EventAction::SetParameter { parameter, value }) => {
                    self.substitutions.insert(parameter, value);
                }
                Some(EventAction::SetSpeciesConcentration { species, expression }) => {
                    self.set_species_concentration(&species, &expression)
                        .map_err(|e| format!("Event '{}' failed: {}", id, e))?;
                }
                None => log::warn!("event '{}' no longer exists in the model", id),
            }
        }
        self.rebuild_backend();
        Ok(())
    }

    fn set_species_concentration(&mut self, species: &str, expression: &str) -> Result<(), ModelError> {
        let index = self
            .model
            .species_index(species)
            .ok_or_else(|| ModelError::UnknownSpecies(species.to_string()))?;
        let values = self
            .model
            .analytic_concentration(index, expression, &self.substitutions)?;
        let Some((ic, slot)) = self.layout.locate_species(index) else {
            // constant species: the field itself is the value seen by reactions
            self.model.species_mut(species)?.field.set_concentration(values)?;
            return Ok(());
        };
        let data = self.model.simulation_data_mut();
        let stride = self.layout.species[ic].len() + data.conc_padding.last().copied().unwrap_or(0);
        if let Some(conc) = data.concentration.last_mut().and_then(|c| c.get_mut(ic)) {
            for (ix, value) in values.into_iter().enumerate() {
                conc[stride * ix + slot] = value;
            }
        }
        Ok(())
    }

    /// Append the backend's current state as a record at time `t`.
    fn update_concentrations(&mut self, t: f64) {
        let padding = self.backend.concentration_padding();
        let mut concentration = Vec::with_capacity(self.layout.n_compartments());
        let mut avg_min_max = Vec::with_capacity(self.layout.n_compartments());
        for (ic, species) in self.layout.species.iter().enumerate() {
            let c = self.backend.concentrations(ic);
            let stride = species.len() + padding;
            avg_min_max.push(
                (0..species.len())
                    .map(|is| AvgMinMax::from_values(c.iter().skip(is).step_by(stride).copied()))
                    .collect::<Vec<_>>(),
            );
            concentration.push(c.to_vec());
        }

        let data = self.model.simulation_data_mut();
        let mut concentration_max: Vec<Vec<f64>> = avg_min_max
            .iter()
            .map(|c| c.iter().map(|s| s.max).collect())
            .collect();
        if let Some(previous) = data.concentration_max.last() {
            for (now, before) in concentration_max.iter_mut().zip(previous) {
                for (m, &b) in now.iter_mut().zip(before) {
                    *m = m.max(b);
                }
            }
        }
        data.time_points.push(t);
        data.concentration.push(concentration);
        data.avg_min_max.push(avg_min_max);
        data.concentration_max.push(concentration_max);
        data.conc_padding.push(padding);
    }

    // ------------------------------------------------------------------
    // projections of the recorded data
    // ------------------------------------------------------------------

    pub fn time_points(&self) -> &[f64] {
        &self.model.simulation_data().time_points
    }

    /// Recorded time points, including the initial one.
    pub fn n_completed_timesteps(&self) -> usize {
        self.model.simulation_data().size()
    }

    /// Concentration of species slot `species` of simulated compartment
    /// `compartment` at `time_index`, in compartment voxel order.
    pub fn concentration(&self, time_index: usize, compartment: usize, species: usize) -> Vec<f64> {
        let data = self.model.simulation_data();
        let stride = data.stride(time_index, compartment);
        match data.concentration.get(time_index).and_then(|t| t.get(compartment)) {
            Some(c) if species < stride => c.iter().skip(species).step_by(stride).copied().collect(),
            _ => Vec::new(),
        }
    }

    /// Full-lattice array, y-flipped (y = 0 at the bottom), zero outside the compartment.
    pub fn concentration_array(&self, time_index: usize, compartment: usize, species: usize) -> Vec<f64> {
        let values = self.concentration(time_index, compartment, species);
        self.flipped_lattice_array(compartment, &values)
    }

    /// Every species of a compartment as full-lattice arrays indexed x + w·y + w·h·z.
    pub fn species_arrays(&self, time_index: usize, compartment: usize) -> Vec<Vec<f64>> {
        let Some(&cid) = self.layout.compartments.get(compartment) else {
            return Vec::new();
        };
        let comp = self.model.geometry().compartment(cid);
        (0..self.layout.species[compartment].len())
            .map(|is| image_array(comp, &self.concentration(time_index, compartment, is), true))
            .collect()
    }

    /// Current dC/dt of a species; empty unless the Pixel backend is active.
    pub fn dcdt(&self, compartment: usize, species: usize) -> Vec<f64> {
        let Some(pixel) = self.backend.as_pixel() else {
            return Vec::new();
        };
        let n_species = self.layout.species.get(compartment).map_or(0, Vec::len);
        if species >= n_species {
            return Vec::new();
        }
        let stride = n_species + pixel.concentration_padding();
        pixel
            .dcdt(compartment)
            .iter()
            .skip(species)
            .step_by(stride)
            .copied()
            .collect()
    }

    pub fn dcdt_array(&self, compartment: usize, species: usize) -> Vec<f64> {
        let values = self.dcdt(compartment, species);
        if values.is_empty() {
            return Vec::new();
        }
        self.flipped_lattice_array(compartment, &values)
    }

    /// Lower-order estimate from the last adaptive step (Pixel only, else 0).
    pub fn lower_order_concentration(&self, compartment: usize, species: usize, voxel: usize) -> f64 {
        self.backend
            .as_pixel()
            .map_or(0.0, |p| p.lower_order_concentration(compartment, species, voxel))
    }

    pub fn avg_min_max(&self, time_index: usize, compartment: usize, species: usize) -> AvgMinMax {
        self.model
            .simulation_data()
            .avg_min_max
            .get(time_index)
            .and_then(|t| t.get(compartment))
            .and_then(|c| c.get(species))
            .copied()
            .unwrap_or_default()
    }

    /// Copy the concentrations at `time_index` into the model's species fields.
    pub fn apply_concentrations_to_model(&mut self, time_index: usize) -> Result<(), ModelError> {
        for (ic, species) in self.layout.species.clone().iter().enumerate() {
            for (slot, &index) in species.iter().enumerate() {
                let values = self.concentration(time_index, ic, slot);
                if values.is_empty() {
                    continue;
                }
                let id = self.model.species()[index].id.clone();
                self.model.species_mut(&id)?.field.set_concentration(values)?;
            }
        }
        Ok(())
    }

    fn flipped_lattice_array(&self, compartment: usize, values: &[f64]) -> Vec<f64> {
        let Some(&cid) = self.layout.compartments.get(compartment) else {
            return Vec::new();
        };
        let comp = self.model.geometry().compartment(cid);
        let flattener = VoxelFlattener::new(comp.volume());
        let mut array = vec![0.0; comp.volume().n_voxels()];
        for (&v, &value) in comp.voxels().iter().zip(values) {
            array[flattener.flatten_y_flipped(v)] = value;
        }
        array
    }

    // ------------------------------------------------------------------
    // status and control
    // ------------------------------------------------------------------

    /// Why the last call ended early, or the backend's sticky error; empty if neither.
    pub fn error_message(&self) -> &str {
        if self.message.is_empty() {
            self.backend.error_message()
        } else {
            &self.message
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Handle for requesting a stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }
}
