//! Voxel geometry: lattice indexing, compartments, membranes and fields.
//!
//! [`Geometry`] is the arena that owns every compartment and membrane.
//! Membranes and fields refer to compartments through [`CompartmentId`]
//! handles, which stay valid for the geometry's lifetime.

mod compartment;
mod field;
mod image;
mod membrane;
mod voxel;

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

pub use compartment::{Compartment, N_NEIGHBOURS};
pub use field::Field;
pub(crate) use field::image_array;
pub use image::{VoxelImage, BACKGROUND};
pub use membrane::{FluxAxis, Membrane};
pub use voxel::{Volume, Voxel, VoxelFlattener, VoxelIndexer};

/// Handle of a compartment inside a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompartmentId(pub usize);

/// Handle of a membrane inside a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembraneId(pub usize);

/// Classified voxel image plus the compartments and membranes built from it.
#[derive(Debug, Clone)]
pub struct Geometry {
    image: VoxelImage,
    /// Physical voxel edge lengths (x, y, z)
    voxel_size: DVec3,
    /// Physical position of the bottom-left-front voxel
    origin: DVec3,
    compartments: Vec<Compartment>,
    membranes: Vec<Membrane>,
}

impl Geometry {
    pub fn new(image: VoxelImage, voxel_size: DVec3) -> Self {
        Self {
            image,
            voxel_size,
            origin: DVec3::ZERO,
            compartments: Vec::new(),
            membranes: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: DVec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn image(&self) -> &VoxelImage {
        &self.image
    }

    pub fn volume(&self) -> Volume {
        self.image.volume()
    }

    pub fn voxel_size(&self) -> DVec3 {
        self.voxel_size
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// Build a compartment from every voxel labelled `label`.
    pub fn add_compartment(&mut self, id: &str, label: u32) -> Result<CompartmentId, GeometryError> {
        if self.compartment_id(id).is_some() {
            return Err(GeometryError::DuplicateId(id.to_string()));
        }
        self.compartments.push(Compartment::new(id, &self.image, label)?);
        Ok(CompartmentId(self.compartments.len() - 1))
    }

    /// Membrane along every face shared by compartments `a` and `b`.
    pub fn add_membrane(
        &mut self,
        id: &str,
        a: CompartmentId,
        b: CompartmentId,
    ) -> Result<MembraneId, GeometryError> {
        let pairs = self
            .image
            .membrane_voxel_pairs(self.compartment(a).label(), self.compartment(b).label());
        self.add_membrane_with_pairs(id, a, b, &pairs)
    }

    /// Membrane from explicit (voxel in `a`, voxel in `b`) pairs.
    pub fn add_membrane_with_pairs(
        &mut self,
        id: &str,
        a: CompartmentId,
        b: CompartmentId,
        pairs: &[(Voxel, Voxel)],
    ) -> Result<MembraneId, GeometryError> {
        if self.membrane_id(id).is_some() {
            return Err(GeometryError::DuplicateId(id.to_string()));
        }
        if a == b {
            return Err(GeometryError::SelfMembrane(id.to_string()));
        }
        let membrane = Membrane::new(
            id,
            (a, self.compartment(a)),
            (b, self.compartment(b)),
            pairs,
        )?;
        self.membranes.push(membrane);
        Ok(MembraneId(self.membranes.len() - 1))
    }

    pub fn compartment(&self, id: CompartmentId) -> &Compartment {
        &self.compartments[id.0]
    }

    pub fn compartments(&self) -> &[Compartment] {
        &self.compartments
    }

    pub fn compartment_id(&self, id: &str) -> Option<CompartmentId> {
        self.compartments
            .iter()
            .position(|c| c.id() == id)
            .map(CompartmentId)
    }

    pub fn membrane(&self, id: MembraneId) -> &Membrane {
        &self.membranes[id.0]
    }

    pub fn membranes(&self) -> &[Membrane] {
        &self.membranes
    }

    pub fn membrane_id(&self, id: &str) -> Option<MembraneId> {
        self.membranes
            .iter()
            .position(|m| m.id() == id)
            .map(MembraneId)
    }

    /// Physical coordinates of a voxel centre-corner, with y measured from the bottom row.
    pub fn physical_point(&self, v: Voxel) -> DVec3 {
        let ny = self.volume().height as f64;
        self.origin
            + DVec3::new(
                v.x as f64 * self.voxel_size.x,
                (ny - 1.0 - v.y as f64) * self.voxel_size.y,
                v.z as f64 * self.voxel_size.z,
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_handles() {
        let image = VoxelImage::from_rows(&["aab", "aab"]).unwrap();
        let mut geometry = Geometry::new(image, DVec3::ONE);
        let a = geometry.add_compartment("a", 'a' as u32).unwrap();
        let b = geometry.add_compartment("b", 'b' as u32).unwrap();
        let m = geometry.add_membrane("a_b", a, b).unwrap();
        assert_eq!(geometry.compartment_id("b"), Some(b));
        assert_eq!(geometry.membrane(m).compartment_a(), a);
        assert_eq!(geometry.membrane(m).n_pairs(), 2);
        assert!(matches!(
            geometry.add_compartment("a", 'a' as u32),
            Err(GeometryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_membrane_needs_two_compartments() {
        let image = VoxelImage::from_rows(&["aab"]).unwrap();
        let mut geometry = Geometry::new(image, DVec3::ONE);
        let a = geometry.add_compartment("a", 'a' as u32).unwrap();
        let pairs = [(Voxel::new(0, 0, 0), Voxel::new(1, 0, 0))];

        assert_eq!(
            geometry.add_membrane_with_pairs("self", a, a, &pairs),
            Err(GeometryError::SelfMembrane("self".to_string()))
        );
        assert!(geometry.add_membrane("a_a", a, a).is_err());
        assert!(geometry.membranes().is_empty());
    }

    #[test]
    fn test_physical_point_flips_y() {
        let image = VoxelImage::from_rows(&["a", "a", "a"]).unwrap();
        let geometry = Geometry::new(image, DVec3::new(1.0, 0.5, 2.0)).with_origin(DVec3::new(10.0, 0.0, 0.0));
        let p = geometry.physical_point(Voxel::new(0, 0, 0));
        assert_eq!(p, DVec3::new(10.0, 1.0, 0.0));
    }
}
