//! JSON export of the full recorded simulation.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

use crate::config::SimulationOptions;
use crate::model::SpatialModel;
use crate::simulate::SimulationData;

/// Full export structure
#[derive(Debug, Clone, Serialize)]
pub struct SimulationExport<'a> {
    /// Export timestamp
    pub exported_at: String,
    /// Export version for compatibility
    pub version: &'static str,
    /// Requested (steps, dt) batches
    pub times: &'a [(usize, f64)],
    pub options: &'a SimulationOptions,
    pub data: &'a SimulationData,
}

fn export_of(model: &SpatialModel) -> SimulationExport<'_> {
    SimulationExport {
        exported_at: Local::now().to_rfc3339(),
        version: "1.0.0",
        times: &model.settings().times,
        options: model.options(),
        data: model.simulation_data(),
    }
}

/// Export the model's simulation data to JSON
///
/// Creates the exports directory if it doesn't exist.
/// Filename is auto-generated with timestamp: `simulation_YYYYMMDD_HHMMSS.json`
///
/// Returns the path to the saved JSON file.
pub fn export_simulation_json(model: &SpatialModel) -> Result<PathBuf> {
    let dir = PathBuf::from("exports");
    std::fs::create_dir_all(&dir)?;

    let filename = format!("simulation_{}.json", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);
    export_simulation_json_to(model, &path)?;
    Ok(path)
}

/// Export simulation data to a specific file
pub fn export_simulation_json_to(model: &SpatialModel, path: &Path) -> Result<()> {
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(file, &export_of(model))?;

    log::info!("JSON simulation exported: {}", path.display());
    Ok(())
}
