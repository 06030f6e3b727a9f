//! Discrete model events: parameter overrides and species re-initialisation at fixed times.

use serde::{Deserialize, Serialize};

/// What an event changes when it fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventAction {
    /// Override a model parameter from this time on
    SetParameter { parameter: String, value: f64 },
    /// Re-initialise a species field from an expression in x, y, z and parameters
    SetSpeciesConcentration { species: String, expression: String },
}

/// An event at a fixed model time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEvent {
    pub id: String,
    pub time: f64,
    pub action: EventAction,
}

impl ModelEvent {
    pub fn set_parameter(id: impl Into<String>, time: f64, parameter: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            time,
            action: EventAction::SetParameter {
                parameter: parameter.into(),
                value,
            },
        }
    }

    pub fn set_species_concentration(
        id: impl Into<String>,
        time: f64,
        species: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            time,
            action: EventAction::SetSpeciesConcentration {
                species: species.into(),
                expression: expression.into(),
            },
        }
    }

    pub fn is_parameter(&self) -> bool {
        matches!(self.action, EventAction::SetParameter { .. })
    }
}
