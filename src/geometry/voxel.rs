//! Voxel lattice coordinates and the lattice <-> compartment index mappings.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Marks a lattice point that does not belong to the indexed voxel set.
pub(crate) const INVALID_INDEX: usize = usize::MAX;

/// Integer lattice coordinate.
///
/// `y = 0` is the top row of the source image; `z` is the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Voxel {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Voxel {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    /// Face neighbours in stencil order: +x, -x, +y, -y, +z, -z.
    pub const fn face_neighbours(self) -> [Voxel; 6] {
        [
            self.offset(1, 0, 0),
            self.offset(-1, 0, 0),
            self.offset(0, 1, 0),
            self.offset(0, -1, 0),
            self.offset(0, 0, 1),
            self.offset(0, 0, -1),
        ]
    }
}

/// Size of a voxel lattice in voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Volume {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    pub const fn n_voxels(&self) -> usize {
        self.width * self.height * self.depth
    }

    pub fn contains(&self, v: Voxel) -> bool {
        v.x >= 0
            && v.y >= 0
            && v.z >= 0
            && (v.x as usize) < self.width
            && (v.y as usize) < self.height
            && (v.z as usize) < self.depth
    }
}

/// Bijection between in-bounds voxels and `0..volume.n_voxels()`.
///
/// Index = x + width·y + width·height·z.
#[derive(Debug, Clone, Copy)]
pub struct VoxelFlattener {
    volume: Volume,
}

impl VoxelFlattener {
    pub fn new(volume: Volume) -> Self {
        Self { volume }
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Flat index of a voxel. The voxel must be in bounds.
    pub fn flatten(&self, v: Voxel) -> usize {
        v.x as usize + self.volume.width * (v.y as usize + self.volume.height * v.z as usize)
    }

    /// Flat index with the y axis inverted, so that y = 0 maps to the last row.
    pub fn flatten_y_flipped(&self, v: Voxel) -> usize {
        let y = self.volume.height - 1 - v.y as usize;
        v.x as usize + self.volume.width * (y + self.volume.height * v.z as usize)
    }

    pub fn unflatten(&self, index: usize) -> Voxel {
        let w = self.volume.width;
        let h = self.volume.height;
        Voxel::new((index % w) as i32, ((index / w) % h) as i32, (index / (w * h)) as i32)
    }

    /// Flat index if in bounds.
    pub fn try_flatten(&self, v: Voxel) -> Option<usize> {
        self.volume.contains(v).then(|| self.flatten(v))
    }
}

/// Lookup from lattice coordinate to position in an ordered voxel list.
#[derive(Debug, Clone)]
pub struct VoxelIndexer {
    flattener: VoxelFlattener,
    indices: Vec<usize>,
}

impl VoxelIndexer {
    /// Build the lookup; every voxel must lie within `volume`.
    pub fn new(volume: Volume, voxels: &[Voxel]) -> Result<Self, GeometryError> {
        let flattener = VoxelFlattener::new(volume);
        let mut indices = vec![INVALID_INDEX; volume.n_voxels()];
        for (i, &v) in voxels.iter().enumerate() {
            let flat = flattener
                .try_flatten(v)
                .ok_or_else(|| GeometryError::out_of_bounds(v, volume))?;
            indices[flat] = i;
        }
        Ok(Self { flattener, indices })
    }

    /// Position of `v` in the voxel list, `None` if out of bounds or absent.
    pub fn get_index(&self, v: Voxel) -> Option<usize> {
        let flat = self.flattener.try_flatten(v)?;
        match self.indices[flat] {
            INVALID_INDEX => None,
            i => Some(i),
        }
    }

    pub fn volume(&self) -> Volume {
        self.flattener.volume()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_roundtrip_and_layout() {
        let f = VoxelFlattener::new(Volume::new(3, 4, 2));
        assert_eq!(f.flatten(Voxel::new(1, 0, 0)), 1);
        assert_eq!(f.flatten(Voxel::new(0, 1, 0)), 3);
        assert_eq!(f.flatten(Voxel::new(0, 0, 1)), 12);
        assert_eq!(f.unflatten(f.flatten(Voxel::new(2, 3, 1))), Voxel::new(2, 3, 1));
        assert_eq!(f.flatten_y_flipped(Voxel::new(0, 0, 0)), 9);
    }

    #[test]
    fn test_indexer_rejects_out_of_bounds() {
        let volume = Volume::new(2, 2, 1);
        let err = VoxelIndexer::new(volume, &[Voxel::new(0, 0, 0), Voxel::new(2, 0, 0)]);
        assert!(matches!(err, Err(GeometryError::OutOfBounds { x: 2, .. })));
    }

    #[test]
    fn test_indexer_lookup() {
        let volume = Volume::new(3, 1, 1);
        let indexer = VoxelIndexer::new(volume, &[Voxel::new(2, 0, 0), Voxel::new(0, 0, 0)]).unwrap();
        assert_eq!(indexer.get_index(Voxel::new(2, 0, 0)), Some(0));
        assert_eq!(indexer.get_index(Voxel::new(0, 0, 0)), Some(1));
        assert_eq!(indexer.get_index(Voxel::new(1, 0, 0)), None);
        assert_eq!(indexer.get_index(Voxel::new(-1, 0, 0)), None);
        assert_eq!(indexer.get_index(Voxel::new(0, 0, 5)), None);
    }
}
