//! Membranes: paired boundary voxels between two compartments.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

use super::compartment::Compartment;
use super::voxel::Voxel;
use super::CompartmentId;

/// Lattice axis a membrane face is normal to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FluxAxis {
    X,
    Y,
    Z,
}

impl FluxAxis {
    pub const ALL: [FluxAxis; 3] = [FluxAxis::X, FluxAxis::Y, FluxAxis::Z];

    fn index(self) -> usize {
        match self {
            FluxAxis::X => 0,
            FluxAxis::Y => 1,
            FluxAxis::Z => 2,
        }
    }

    /// Axis joining two face-adjacent voxels, `None` if they are not face neighbours.
    pub fn between(a: Voxel, b: Voxel) -> Option<FluxAxis> {
        let (dx, dy, dz) = ((a.x - b.x).abs(), (a.y - b.y).abs(), (a.z - b.z).abs());
        match (dx, dy, dz) {
            (1, 0, 0) => Some(FluxAxis::X),
            (0, 1, 0) => Some(FluxAxis::Y),
            (0, 0, 1) => Some(FluxAxis::Z),
            _ => None,
        }
    }
}

/// Boundary between compartments A and B.
///
/// Holds compartment handles rather than references; the owning
/// [`super::Geometry`] keeps both compartments alive.
#[derive(Debug, Clone)]
pub struct Membrane {
    id: String,
    compartment_a: CompartmentId,
    compartment_b: CompartmentId,
    index_pairs: [Vec<(usize, usize)>; 3],
}

impl Membrane {
    /// Resolve each (voxel in A, voxel in B) pair to indices into A's and B's voxel lists.
    ///
    /// Every pair must be face adjacent and resolvable in both compartments.
    pub fn new(
        id: impl Into<String>,
        (a_id, a): (CompartmentId, &Compartment),
        (b_id, b): (CompartmentId, &Compartment),
        voxel_pairs: &[(Voxel, Voxel)],
    ) -> Result<Self, GeometryError> {
        let id = id.into();
        let indexer_a = a.indexer()?;
        let indexer_b = b.indexer()?;
        let mut index_pairs: [Vec<(usize, usize)>; 3] = Default::default();
        for &(va, vb) in voxel_pairs {
            let axis = FluxAxis::between(va, vb).ok_or_else(|| GeometryError::NonAdjacentPair {
                membrane: id.clone(),
                a: va,
                b: vb,
            })?;
            let ia = indexer_a
                .get_index(va)
                .ok_or_else(|| unresolved(&id, a, va))?;
            let ib = indexer_b
                .get_index(vb)
                .ok_or_else(|| unresolved(&id, b, vb))?;
            index_pairs[axis.index()].push((ia, ib));
        }
        log::info!(
            "membrane '{}': '{}' <-> '{}', {} voxel pairs",
            id,
            a.id(),
            b.id(),
            voxel_pairs.len()
        );
        Ok(Self {
            id,
            compartment_a: a_id,
            compartment_b: b_id,
            index_pairs,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn compartment_a(&self) -> CompartmentId {
        self.compartment_a
    }

    pub fn compartment_b(&self) -> CompartmentId {
        self.compartment_b
    }

    /// (index in A, index in B) pairs whose shared face is normal to `axis`.
    pub fn index_pairs(&self, axis: FluxAxis) -> &[(usize, usize)] {
        &self.index_pairs[axis.index()]
    }

    pub fn n_pairs(&self) -> usize {
        self.index_pairs.iter().map(Vec::len).sum()
    }
}

fn unresolved(membrane: &str, compartment: &Compartment, voxel: Voxel) -> GeometryError {
    GeometryError::UnresolvedMembranePair {
        membrane: membrane.to_string(),
        compartment: compartment.id().to_string(),
        voxel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VoxelImage;

    fn two_compartments() -> (VoxelImage, Compartment, Compartment) {
        let image = VoxelImage::from_rows(&["aab", "aab"]).unwrap();
        let a = Compartment::new("a", &image, 'a' as u32).unwrap();
        let b = Compartment::new("b", &image, 'b' as u32).unwrap();
        (image, a, b)
    }

    #[test]
    fn test_pairs_grouped_by_axis() {
        let (image, a, b) = two_compartments();
        let pairs = image.membrane_voxel_pairs('a' as u32, 'b' as u32);
        let m = Membrane::new("a_b", (CompartmentId(0), &a), (CompartmentId(1), &b), &pairs).unwrap();
        assert_eq!(m.n_pairs(), 2);
        assert_eq!(m.index_pairs(FluxAxis::X).len(), 2);
        assert!(m.index_pairs(FluxAxis::Y).is_empty());
        // (1,0) is voxel 2 of a, (2,0) is voxel 0 of b
        assert_eq!(m.index_pairs(FluxAxis::X)[0], (2, 0));
    }

    #[test]
    fn test_unresolvable_pair_is_an_error() {
        let (_, a, b) = two_compartments();
        let pairs = [(Voxel::new(0, 0, 0), Voxel::new(1, 0, 0))];
        let err = Membrane::new("bad", (CompartmentId(0), &a), (CompartmentId(1), &b), &pairs);
        assert!(matches!(err, Err(GeometryError::UnresolvedMembranePair { .. })));
    }

    #[test]
    fn test_non_adjacent_pair_is_an_error() {
        let (_, a, b) = two_compartments();
        let pairs = [(Voxel::new(0, 0, 0), Voxel::new(2, 0, 0))];
        let err = Membrane::new("bad", (CompartmentId(0), &a), (CompartmentId(1), &b), &pairs);
        assert!(matches!(err, Err(GeometryError::NonAdjacentPair { .. })));
    }
}
