//! Export of recorded simulation data.
//!
//! Provides CSV time-series export of per-species statistics and JSON export
//! of the full record.

mod csv_export;
mod json_export;

pub use csv_export::{CsvExporter, SpeciesStatsRecord};
pub use json_export::{export_simulation_json, export_simulation_json_to, SimulationExport};
