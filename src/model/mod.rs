//! Spatial model: geometry, species, reactions, parameters, events and the
//! accumulated simulation results.
//!
//! This is the document layer the simulation backends are built from. A
//! [`crate::simulate::Simulation`] borrows the model mutably for its lifetime
//! and appends to [`SpatialModel::simulation_data`].
//!
//! ## Reaction terms
//! - Each species may carry a net reaction rate expression evaluated per voxel
//!   against the species of its compartment, the model parameters, constant
//!   species and, when mentioned, `time`, `x`, `y` and `z`.
//! - Membrane fluxes are evaluated per boundary voxel pair against the species
//!   of both compartments and give an amount per unit membrane area.

mod events;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SimulationOptions;
use crate::error::ModelError;
use crate::geometry::{CompartmentId, Field, Geometry, MembraneId};
use crate::pool::WorkerPool;
use crate::simulate::{BackendFactory, SimulationData};
use crate::symbolic::{self, mentions_symbol, EvaluatorFactory, MevalFactory};

pub use events::{EventAction, ModelEvent};

/// Parameter overrides produced by events, keyed by parameter id.
pub type Substitutions = BTreeMap<String, f64>;

/// Names of the implicit variables available to reaction expressions.
pub const TIME_SYMBOL: &str = "time";
pub const SPACE_SYMBOLS: [&str; 3] = ["x", "y", "z"];

/// A chemical species living in one compartment.
#[derive(Debug, Clone)]
pub struct Species {
    pub id: String,
    pub name: String,
    /// Constant species are not simulated; they enter reactions as named constants
    pub is_constant: bool,
    pub field: Field,
    /// Net rate of change from reactions, `None` = no reactions
    pub reaction_rate: Option<String>,
}

impl Species {
    pub fn compartment(&self) -> CompartmentId {
        self.field.compartment()
    }

    fn mean_concentration(&self) -> f64 {
        let c = self.field.concentration();
        if c.is_empty() {
            0.0
        } else {
            c.iter().sum::<f64>() / c.len() as f64
        }
    }
}

/// A named scalar constant.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub id: String,
    pub value: f64,
}

/// Flux of one species across a membrane, per unit membrane area.
#[derive(Debug, Clone, PartialEq)]
pub struct MembraneFlux {
    pub membrane: MembraneId,
    pub species: String,
    pub expression: String,
}

/// Requested timesteps and numeric options.
#[derive(Debug, Clone, Default)]
pub struct SimulationSettings {
    /// (number of steps, step length) batches requested so far
    pub times: Vec<(usize, f64)>,
    pub options: SimulationOptions,
}

/// Which compartments and species take part in a simulation.
///
/// Only compartments holding at least one non-constant species appear.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimLayout {
    pub compartments: Vec<CompartmentId>,
    /// Model species indices per simulated compartment
    pub species: Vec<Vec<usize>>,
}

impl SimLayout {
    pub fn n_compartments(&self) -> usize {
        self.compartments.len()
    }

    pub fn compartment_index(&self, id: CompartmentId) -> Option<usize> {
        self.compartments.iter().position(|&c| c == id)
    }

    /// (simulated compartment, species slot) of a model species.
    pub fn locate_species(&self, species_index: usize) -> Option<(usize, usize)> {
        self.species.iter().enumerate().find_map(|(ic, s)| {
            s.iter()
                .position(|&is| is == species_index)
                .map(|slot| (ic, slot))
        })
    }
}

/// The full model a simulation is built from.
pub struct SpatialModel {
    geometry: Arc<Geometry>,
    species: Vec<Species>,
    parameters: Vec<Parameter>,
    membrane_fluxes: Vec<MembraneFlux>,
    events: Vec<ModelEvent>,
    settings: SimulationSettings,
    simulation_data: SimulationData,
    evaluator_factory: Arc<dyn EvaluatorFactory>,
    fem_backend: Option<Arc<dyn BackendFactory>>,
    worker_pool: Option<WorkerPool>,
}

impl SpatialModel {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry: Arc::new(geometry),
            species: Vec::new(),
            parameters: Vec::new(),
            membrane_fluxes: Vec::new(),
            events: Vec::new(),
            settings: SimulationSettings::default(),
            simulation_data: SimulationData::default(),
            evaluator_factory: Arc::new(MevalFactory),
            fem_backend: None,
            worker_pool: None,
        }
    }

    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    // ------------------------------------------------------------------
    // species
    // ------------------------------------------------------------------

    /// Add a non-constant spatial species with a uniform diffusion constant.
    pub fn add_species(
        &mut self,
        id: &str,
        compartment: &str,
        diffusion_constant: f64,
    ) -> Result<usize, ModelError> {
        self.check_new_id(id)?;
        let cid = self
            .geometry
            .compartment_id(compartment)
            .ok_or_else(|| ModelError::UnknownCompartment(compartment.to_string()))?;
        let field = Field::new(id, (cid, self.geometry.compartment(cid)), diffusion_constant);
        self.species.push(Species {
            id: id.to_string(),
            name: id.to_string(),
            is_constant: false,
            field,
            reaction_rate: None,
        });
        Ok(self.species.len() - 1)
    }

    pub fn species(&self) -> &[Species] {
        &self.species
    }

    pub fn species_index(&self, id: &str) -> Option<usize> {
        self.species.iter().position(|s| s.id == id)
    }

    pub fn species_by_id(&self, id: &str) -> Option<&Species> {
        self.species.iter().find(|s| s.id == id)
    }

    pub fn species_mut(&mut self, id: &str) -> Result<&mut Species, ModelError> {
        self.species
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ModelError::UnknownSpecies(id.to_string()))
    }

    pub fn set_reaction_rate(&mut self, species: &str, expression: &str) -> Result<(), ModelError> {
        self.species_mut(species)?.reaction_rate = Some(expression.to_string());
        Ok(())
    }

    pub fn set_uniform_concentration(&mut self, species: &str, concentration: f64) -> Result<(), ModelError> {
        self.species_mut(species)?
            .field
            .set_uniform_concentration(concentration);
        Ok(())
    }

    /// Import a full-lattice (y = 0 at the bottom) concentration array into a species field.
    pub fn set_concentration_array(&mut self, species: &str, array: &[f64]) -> Result<(), ModelError> {
        let geometry = Arc::clone(&self.geometry);
        let s = self.species_mut(species)?;
        let compartment = geometry.compartment(s.field.compartment());
        s.field.import_concentration(compartment, array)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // parameters, membranes, events
    // ------------------------------------------------------------------

    pub fn add_parameter(&mut self, id: &str, value: f64) -> Result<(), ModelError> {
        self.check_new_id(id)?;
        self.parameters.push(Parameter {
            id: id.to_string(),
            value,
        });
        Ok(())
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// New ids must be unique and must not shadow the time or space variables.
    fn check_new_id(&self, id: &str) -> Result<(), ModelError> {
        if id == TIME_SYMBOL || SPACE_SYMBOLS.contains(&id) {
            return Err(ModelError::ReservedId(id.to_string()));
        }
        if self.species_index(id).is_some() || self.parameter_index(id).is_some() {
            return Err(ModelError::DuplicateId(id.to_string()));
        }
        Ok(())
    }

    fn parameter_index(&self, id: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.id == id)
    }

    /// Flux of `species` across `membrane`; the species must live in one of its compartments.
    pub fn add_membrane_flux(&mut self, membrane: &str, species: &str, expression: &str) -> Result<(), ModelError> {
        let mid = self
            .geometry
            .membrane_id(membrane)
            .ok_or_else(|| ModelError::UnknownMembrane(membrane.to_string()))?;
        let s = self
            .species_by_id(species)
            .ok_or_else(|| ModelError::UnknownSpecies(species.to_string()))?;
        let m = self.geometry.membrane(mid);
        if s.compartment() != m.compartment_a() && s.compartment() != m.compartment_b() {
            return Err(ModelError::UnknownSpecies(format!("{} (not adjacent to {})", species, membrane)));
        }
        self.membrane_fluxes.push(MembraneFlux {
            membrane: mid,
            species: species.to_string(),
            expression: expression.to_string(),
        });
        Ok(())
    }

    pub fn membrane_fluxes(&self) -> &[MembraneFlux] {
        &self.membrane_fluxes
    }

    pub fn add_event(&mut self, event: ModelEvent) -> Result<(), ModelError> {
        if self.events.iter().any(|e| e.id == event.id) {
            return Err(ModelError::DuplicateId(event.id));
        }
        match &event.action {
            EventAction::SetParameter { parameter, .. } => {
                if self.parameter_index(parameter).is_none() {
                    return Err(ModelError::UnknownParameter(parameter.clone()));
                }
            }
            EventAction::SetSpeciesConcentration { species, .. } => {
                if self.species_index(species).is_none() {
                    return Err(ModelError::UnknownSpecies(species.clone()));
                }
            }
        }
        self.events.push(event);
        Ok(())
    }

    pub fn events(&self) -> &[ModelEvent] {
        &self.events
    }

    // ------------------------------------------------------------------
    // settings, results, collaborators
    // ------------------------------------------------------------------

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut SimulationSettings {
        &mut self.settings
    }

    pub fn options(&self) -> &SimulationOptions {
        &self.settings.options
    }

    pub fn options_mut(&mut self) -> &mut SimulationOptions {
        &mut self.settings.options
    }

    pub fn simulation_data(&self) -> &SimulationData {
        &self.simulation_data
    }

    pub fn simulation_data_mut(&mut self) -> &mut SimulationData {
        &mut self.simulation_data
    }

    pub(crate) fn settings_and_data_mut(&mut self) -> (&mut SimulationSettings, &mut SimulationData) {
        (&mut self.settings, &mut self.simulation_data)
    }

    pub fn evaluator_factory(&self) -> &Arc<dyn EvaluatorFactory> {
        &self.evaluator_factory
    }

    pub fn set_evaluator_factory(&mut self, factory: Arc<dyn EvaluatorFactory>) {
        self.evaluator_factory = factory;
    }

    pub fn fem_backend(&self) -> Option<&Arc<dyn BackendFactory>> {
        self.fem_backend.as_ref()
    }

    /// Register the external finite-element backend used when options select it.
    pub fn set_fem_backend(&mut self, factory: Arc<dyn BackendFactory>) {
        self.fem_backend = Some(factory);
    }

    pub fn worker_pool(&self) -> Option<&WorkerPool> {
        self.worker_pool.as_ref()
    }

    /// Pool used by the Pixel backend instead of the process-wide one.
    pub fn set_worker_pool(&mut self, pool: Option<WorkerPool>) {
        self.worker_pool = pool;
    }

    // ------------------------------------------------------------------
    // derived views used by the backends
    // ------------------------------------------------------------------

    /// Compartments (geometry order) with their non-constant species (model order).
    pub fn sim_layout(&self) -> SimLayout {
        let mut layout = SimLayout::default();
        for (ic, _) in self.geometry.compartments().iter().enumerate() {
            let cid = CompartmentId(ic);
            let species: Vec<usize> = self
                .species
                .iter()
                .enumerate()
                .filter(|(_, s)| !s.is_constant && s.compartment() == cid)
                .map(|(i, _)| i)
                .collect();
            if !species.is_empty() {
                layout.compartments.push(cid);
                layout.species.push(species);
            }
        }
        layout
    }

    /// True if any reaction rate or membrane flux mentions `symbol`.
    pub fn reactions_mention(&self, symbol: &str) -> bool {
        self.species
            .iter()
            .filter_map(|s| s.reaction_rate.as_deref())
            .chain(self.membrane_fluxes.iter().map(|f| f.expression.as_str()))
            .any(|e| mentions_symbol(e, symbol))
    }

    pub fn is_time_dependent(&self) -> bool {
        self.reactions_mention(TIME_SYMBOL)
    }

    pub fn is_space_dependent(&self) -> bool {
        SPACE_SYMBOLS.iter().any(|s| self.reactions_mention(s))
    }

    /// Named constants for expression evaluation: parameters (overridden by
    /// `substitutions`), then constant species at their mean concentration.
    pub fn constants(&self, substitutions: &Substitutions) -> Vec<(String, f64)> {
        let mut constants: Vec<(String, f64)> = self
            .parameters
            .iter()
            .map(|p| (p.id.clone(), substitutions.get(&p.id).copied().unwrap_or(p.value)))
            .collect();
        constants.extend(
            self.species
                .iter()
                .filter(|s| s.is_constant)
                .map(|s| (s.id.clone(), s.mean_concentration())),
        );
        constants
    }

    /// Evaluate `expression` at every voxel of a species' compartment, with
    /// `x`, `y`, `z` bound to physical voxel coordinates.
    pub fn analytic_concentration(
        &self,
        species_index: usize,
        expression: &str,
        substitutions: &Substitutions,
    ) -> Result<Vec<f64>, ModelError> {
        let species = self
            .species
            .get(species_index)
            .ok_or_else(|| ModelError::UnknownSpecies(species_index.to_string()))?;
        let variables: Vec<String> = SPACE_SYMBOLS.iter().map(|s| s.to_string()).collect();
        let evaluator = symbolic::compile(
            self.evaluator_factory.as_ref(),
            &[expression.to_string()],
            &variables,
            &self.constants(substitutions),
        )
        .map_err(|message| ModelError::Expression {
            expression: expression.to_string(),
            message,
        })?;
        let compartment = self.geometry.compartment(species.compartment());
        let mut result = [0.0];
        Ok(compartment
            .voxels()
            .iter()
            .map(|&v| {
                let p = self.geometry.physical_point(v);
                evaluator.eval(&mut result, &[p.x, p.y, p.z]);
                result[0]
            })
            .collect())
    }
}
