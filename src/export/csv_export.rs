//! CSV time-series export of per-species statistics.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use serde::Serialize;

use crate::model::SpatialModel;

/// One row: statistics of one species at one time point.
#[derive(Debug, Clone, Serialize)]
pub struct SpeciesStatsRecord {
    /// Model time
    pub time: f64,
    pub compartment: String,
    pub species: String,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// CSV exporter for recorded simulation data
pub struct CsvExporter {
    writer: csv::Writer<File>,
    /// Path to output file
    path: PathBuf,
    rows_written: usize,
}

impl CsvExporter {
    /// Create a new exporter writing to `exports/timeseries_<timestamp>.csv`
    ///
    /// Creates the exports directory if it doesn't exist.
    pub fn new() -> Result<Self> {
        let dir = PathBuf::from("exports");
        std::fs::create_dir_all(&dir)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("timeseries_{}.csv", timestamp));
        Self::to_path(path)
    }

    /// Create an exporter writing to `path`
    pub fn to_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let writer = csv::Writer::from_writer(file);

        log::info!("CSV export started: {}", path.display());

        Ok(Self {
            writer,
            path,
            rows_written: 0,
        })
    }

    /// Write one row per simulated species at `time_index`; returns the rows written
    pub fn record_time_point(&mut self, model: &SpatialModel, time_index: usize) -> Result<usize> {
        let data = model.simulation_data();
        let (Some(&time), Some(stats)) = (data.time_points.get(time_index), data.avg_min_max.get(time_index)) else {
            return Ok(0);
        };
        let layout = model.sim_layout();
        let geometry = model.geometry();
        let mut rows = 0;
        for ((cid, species), compartment_stats) in layout.compartments.iter().zip(&layout.species).zip(stats) {
            for (&is, s) in species.iter().zip(compartment_stats) {
                self.writer.serialize(SpeciesStatsRecord {
                    time,
                    compartment: geometry.compartment(*cid).id().to_string(),
                    species: model.species()[is].name.clone(),
                    avg: s.avg,
                    min: s.min,
                    max: s.max,
                })?;
                rows += 1;
            }
        }
        self.rows_written += rows;
        Ok(rows)
    }

    /// Write every recorded time point
    pub fn record_all(&mut self, model: &SpatialModel) -> Result<usize> {
        let mut rows = 0;
        for time_index in 0..model.simulation_data().size() {
            rows += self.record_time_point(model, time_index)?;
        }
        Ok(rows)
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Finish writing and return the output path
    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        log::info!("CSV export completed: {} ({} rows)", self.path.display(), self.rows_written);
        Ok(self.path)
    }

    /// Get the output path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
