//! Recorded simulation time series.

use serde::{Deserialize, Serialize};

/// Average, minimum and maximum of one species over its compartment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AvgMinMax {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for AvgMinMax {
    fn default() -> Self {
        Self {
            avg: 0.0,
            min: f64::MAX,
            max: 0.0,
        }
    }
}

impl AvgMinMax {
    /// Statistics of `values`; the default for an empty set.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut stats = Self::default();
        let mut n = 0usize;
        for c in values {
            stats.avg += c;
            stats.min = stats.min.min(c);
            stats.max = stats.max.max(c);
            n += 1;
        }
        if n > 0 {
            stats.avg /= n as f64;
        }
        stats
    }
}

/// Append-only record of a simulation.
///
/// Indexing: `concentration[time][compartment][voxel * stride + species]`
/// with `stride = n_species + conc_padding[time]`, in simulated compartment
/// order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationData {
    pub time_points: Vec<f64>,
    pub concentration: Vec<Vec<Vec<f64>>>,
    /// `[time][compartment][species]`
    pub avg_min_max: Vec<Vec<Vec<AvgMinMax>>>,
    /// Running per-species maximum up to and including each time point
    pub concentration_max: Vec<Vec<Vec<f64>>>,
    /// Extra slots per voxel after the species at each time point
    pub conc_padding: Vec<usize>,
}

impl SimulationData {
    pub fn size(&self) -> usize {
        self.time_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time_points.is_empty()
    }

    /// Make room for `additional` time points.
    pub fn reserve(&mut self, additional: usize) {
        self.time_points.reserve(additional);
        self.concentration.reserve(additional);
        self.avg_min_max.reserve(additional);
        self.concentration_max.reserve(additional);
        self.conc_padding.reserve(additional);
    }

    /// Remove the latest time point.
    pub fn pop_back(&mut self) {
        self.time_points.pop();
        self.concentration.pop();
        self.avg_min_max.pop();
        self.concentration_max.pop();
        self.conc_padding.pop();
    }

    pub fn clear(&mut self) {
        self.time_points.clear();
        self.concentration.clear();
        self.avg_min_max.clear();
        self.concentration_max.clear();
        self.conc_padding.clear();
    }

    pub fn last_time(&self) -> f64 {
        self.time_points.last().copied().unwrap_or(0.0)
    }

    /// Slot stride of compartment `compartment` at `time_index`.
    pub fn stride(&self, time_index: usize, compartment: usize) -> usize {
        self.avg_min_max
            .get(time_index)
            .and_then(|t| t.get(compartment))
            .map_or(0, Vec::len)
            + self.conc_padding.get(time_index).copied().unwrap_or(0)
    }
}
