//! Construction-time error types.
//!
//! Run-time outcomes of a simulation (divergence, stop, timeout) are not
//! errors; they are reported through [`crate::simulate::RunReport`] and the
//! backend's sticky error message.

use thiserror::Error;

use crate::geometry::Voxel;

/// Errors raised while building compartments, membranes and fields.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("voxel ({x}, {y}, {z}) is out of bounds for volume {nx}x{ny}x{nz}")]
    OutOfBounds {
        x: i32,
        y: i32,
        z: i32,
        nx: usize,
        ny: usize,
        nz: usize,
    },

    #[error("membrane '{membrane}': voxel ({}, {}, {}) is not part of compartment '{compartment}'", .voxel.x, .voxel.y, .voxel.z)]
    UnresolvedMembranePair {
        membrane: String,
        compartment: String,
        voxel: Voxel,
    },

    #[error("membrane '{membrane}': voxels ({}, {}, {}) and ({}, {}, {}) are not face neighbours", .a.x, .a.y, .a.z, .b.x, .b.y, .b.z)]
    NonAdjacentPair { membrane: String, a: Voxel, b: Voxel },

    #[error("array of size {actual} does not match volume of size {expected}")]
    ArraySizeMismatch { expected: usize, actual: usize },

    #[error("duplicate geometry id '{0}'")]
    DuplicateId(String),

    #[error("membrane '{0}' must join two different compartments")]
    SelfMembrane(String),

    #[error("layer {layer} has {actual} rows, expected {expected}")]
    RaggedLayer {
        layer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("row {row} of layer {layer} has {actual} voxels, expected {expected}")]
    RaggedRow {
        layer: usize,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("voxel image has {actual} labels but volume {nx}x{ny}x{nz} needs {expected}")]
    ImageSizeMismatch {
        expected: usize,
        actual: usize,
        nx: usize,
        ny: usize,
        nz: usize,
    },
}

impl GeometryError {
    pub fn out_of_bounds(voxel: Voxel, volume: crate::geometry::Volume) -> Self {
        Self::OutOfBounds {
            x: voxel.x,
            y: voxel.y,
            z: voxel.z,
            nx: volume.width,
            ny: volume.height,
            nz: volume.depth,
        }
    }
}

/// Errors raised by option validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("steady-state steps_to_convergence must be at least 1")]
    ZeroStepsToConvergence,
}

/// Errors raised while assembling a model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("unknown compartment '{0}'")]
    UnknownCompartment(String),

    #[error("unknown species '{0}'")]
    UnknownSpecies(String),

    #[error("unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("unknown membrane '{0}'")]
    UnknownMembrane(String),

    #[error("duplicate id '{0}'")]
    DuplicateId(String),

    #[error("'{0}' is reserved for the time and space variables")]
    ReservedId(String),

    #[error("failed to evaluate expression '{expression}': {message}")]
    Expression { expression: String, message: String },

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
