//! Numeric options for the simulation backends and the steady-state controller.
//!
//! Every structure round-trips through JSON so option sets can be kept next to
//! a model and reloaded.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Which numerical backend drives a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Finite-difference voxel integrator
    Pixel,
    /// Externally supplied finite-element backend
    Fem,
}

/// Runge-Kutta scheme used by the Pixel backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelIntegrator {
    /// Forward Euler, fixed stable step, no error estimate
    Rk101,
    /// Heun with embedded forward Euler
    Rk212,
    /// Shu-Osher 3rd order with embedded Heun
    Rk323,
    /// Five-stage 4th order 3S* with embedded 3rd order
    Rk435,
}

impl PixelIntegrator {
    /// Exponent applied to the error ratio when choosing the next step.
    pub fn error_power(self) -> f64 {
        match self {
            PixelIntegrator::Rk101 => 1.0,
            PixelIntegrator::Rk212 => 1.0 / 2.0,
            PixelIntegrator::Rk323 => 1.0 / 3.0,
            PixelIntegrator::Rk435 => 1.0 / 4.0,
        }
    }

    /// Parse the short CLI name (`rk101`, `rk212`, `rk323`, `rk435`).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rk101" => Some(PixelIntegrator::Rk101),
            "rk212" => Some(PixelIntegrator::Rk212),
            "rk323" => Some(PixelIntegrator::Rk323),
            "rk435" => Some(PixelIntegrator::Rk435),
            _ => None,
        }
    }
}

/// Maximum local integration error allowed per accepted sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorTolerance {
    /// Absolute error bound (concentration units)
    pub abs: f64,
    /// Relative error bound (dimensionless)
    pub rel: f64,
}

impl Default for ErrorTolerance {
    fn default() -> Self {
        Self {
            abs: f64::MAX,
            rel: 0.005,
        }
    }
}

/// Options for the Pixel (finite-difference) backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PixelOptions {
    /// Runge-Kutta scheme
    pub integrator: PixelIntegrator,
    /// Error tolerance for adaptive schemes
    pub max_err: ErrorTolerance,
    /// Upper bound on any internal sub-step (model time units)
    pub max_timestep: f64,
    /// Distribute per-voxel work over a worker pool
    pub enable_multithreading: bool,
    /// Worker pool size cap, 0 = all hardware threads
    pub max_threads: usize,
}

impl Default for PixelOptions {
    fn default() -> Self {
        Self {
            integrator: PixelIntegrator::Rk212,
            max_err: ErrorTolerance::default(),
            max_timestep: f64::MAX,
            enable_multithreading: false,
            max_threads: 0,
        }
    }
}

impl PixelOptions {
    /// Step and error bounds must be positive; checked whenever a backend is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("pixel.max_timestep", self.max_timestep)?;
        positive("pixel.max_err.abs", self.max_err.abs)?;
        positive("pixel.max_err.rel", self.max_err.rel)
    }
}

/// How the steady-state criterion is normalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceMode {
    /// ‖ΔC/dt‖
    Absolute,
    /// ‖ΔC/dt‖ / ‖C‖
    Relative,
}

/// Options for the steady-state controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SteadyStateOptions {
    /// Criterion threshold
    pub tolerance: f64,
    /// Consecutive increments below tolerance required to converge
    pub steps_to_convergence: usize,
    /// Absolute or relative criterion
    pub convergence_mode: ConvergenceMode,
    /// Increment between criterion evaluations (model time units)
    pub dt: f64,
    /// Wall-clock budget in milliseconds, `None` = unbounded
    pub timeout_ms: Option<f64>,
}

impl Default for SteadyStateOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            steps_to_convergence: 10,
            convergence_mode: ConvergenceMode::Relative,
            dt: 1.0,
            timeout_ms: None,
        }
    }
}

impl SteadyStateOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("steady_state.tolerance", self.tolerance)?;
        positive("steady_state.dt", self.dt)?;
        if self.steps_to_convergence == 0 {
            return Err(ConfigError::ZeroStepsToConvergence);
        }
        Ok(())
    }
}

/// Top-level options container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Backend selected for the next (re)construction
    pub backend: BackendKind,
    /// Pixel backend options
    pub pixel: PixelOptions,
    /// Steady-state controller options
    pub steady_state: SteadyStateOptions,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            backend: BackendKind::Pixel,
            pixel: PixelOptions::default(),
            steady_state: SteadyStateOptions::default(),
        }
    }
}

impl SimulationOptions {
    /// Load from JSON file or return defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(options) => {
                    log::info!("Loaded simulation options from {:?}", path.as_ref());
                    options
                }
                Err(e) => {
                    log::warn!("Failed to parse simulation options: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                log::info!("Simulation options file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Save as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let file = std::fs::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Check all bounds that the backends rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pixel.validate()?;
        self.steady_state.validate()
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails the comparison as well
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { name, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_valid() {
        let options = SimulationOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.pixel.integrator, PixelIntegrator::Rk212);
        assert_eq!(options.pixel.max_err.rel, 0.005);
        assert_eq!(options.pixel.max_threads, 0);
    }

    #[test]
    fn test_validation_rejects_bad_bounds() {
        let mut options = SimulationOptions::default();
        options.pixel.max_timestep = 0.0;
        assert!(matches!(
            options.validate(),
            Err(ConfigError::NotPositive { name: "pixel.max_timestep", .. })
        ));

        let mut options = SimulationOptions::default();
        options.steady_state.tolerance = f64::NAN;
        assert!(options.validate().is_err());

        let mut options = SimulationOptions::default();
        options.steady_state.steps_to_convergence = 0;
        assert_eq!(options.validate(), Err(ConfigError::ZeroStepsToConvergence));
    }

    #[test]
    fn test_section_validation_is_independent() {
        let mut options = SimulationOptions::default();
        options.steady_state.dt = -1.0;
        assert!(options.pixel.validate().is_ok());
        assert!(options.steady_state.validate().is_err());

        options.pixel.max_err.rel = 0.0;
        assert!(matches!(
            options.pixel.validate(),
            Err(ConfigError::NotPositive { name: "pixel.max_err.rel", .. })
        ));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut options = SimulationOptions::default();
        options.pixel.integrator = PixelIntegrator::Rk435;
        options.steady_state.timeout_ms = Some(250.0);
        let json = serde_json::to_string(&options).unwrap();
        let parsed: SimulationOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.pixel.integrator, PixelIntegrator::Rk435);
        assert_eq!(parsed.steady_state.timeout_ms, Some(250.0));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let options = SimulationOptions::load_or_default("no/such/options.json");
        assert_eq!(options.backend, BackendKind::Pixel);
    }

    #[test]
    fn test_integrator_names() {
        assert_eq!(PixelIntegrator::from_name("RK323"), Some(PixelIntegrator::Rk323));
        assert_eq!(PixelIntegrator::from_name("euler"), None);
        assert_eq!(PixelIntegrator::Rk435.error_power(), 0.25);
    }
}
