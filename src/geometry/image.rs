//! Classified voxel volume: one compartment label per lattice point.

use crate::error::GeometryError;

use super::voxel::{Volume, Voxel, VoxelFlattener};

/// Label used for lattice points outside every compartment.
pub const BACKGROUND: u32 = 0;

/// A voxel volume where every point carries a compartment label (colour).
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelImage {
    volume: Volume,
    labels: Vec<u32>,
}

impl VoxelImage {
    /// Wrap a label array laid out as x + width·y + width·height·z.
    pub fn new(volume: Volume, labels: Vec<u32>) -> Result<Self, GeometryError> {
        if labels.len() != volume.n_voxels() {
            return Err(GeometryError::ImageSizeMismatch {
                expected: volume.n_voxels(),
                actual: labels.len(),
                nx: volume.width,
                ny: volume.height,
                nz: volume.depth,
            });
        }
        Ok(Self { volume, labels })
    }

    pub fn filled(volume: Volume, label: u32) -> Self {
        Self {
            volume,
            labels: vec![label; volume.n_voxels()],
        }
    }

    /// Single-layer image from text rows; each character's code point is its label
    /// and `.` is background.
    ///
    /// ```
    /// use spatial_rd_sim::geometry::VoxelImage;
    /// let image = VoxelImage::from_rows(&["aab", "aab"]).unwrap();
    /// assert_eq!(image.volume().width, 3);
    /// ```
    pub fn from_rows(rows: &[&str]) -> Result<Self, GeometryError> {
        Self::from_layers(&[rows])
    }

    /// Multi-layer variant of [`VoxelImage::from_rows`].
    pub fn from_layers(layers: &[&[&str]]) -> Result<Self, GeometryError> {
        let depth = layers.len();
        let height = layers.first().map_or(0, |l| l.len());
        let width = layers
            .first()
            .and_then(|l| l.first())
            .map_or(0, |r| r.chars().count());
        let volume = Volume::new(width, height, depth);
        let mut labels = Vec::with_capacity(volume.n_voxels());
        for (iz, layer) in layers.iter().enumerate() {
            if layer.len() != height {
                return Err(GeometryError::RaggedLayer {
                    layer: iz,
                    expected: height,
                    actual: layer.len(),
                });
            }
            for (iy, row) in layer.iter().enumerate() {
                let n = row.chars().count();
                if n != width {
                    return Err(GeometryError::RaggedRow {
                        layer: iz,
                        row: iy,
                        expected: width,
                        actual: n,
                    });
                }
                labels.extend(row.chars().map(|c| if c == '.' { BACKGROUND } else { c as u32 }));
            }
        }
        Self::new(volume, labels)
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn label(&self, v: Voxel) -> Option<u32> {
        VoxelFlattener::new(self.volume)
            .try_flatten(v)
            .map(|i| self.labels[i])
    }

    pub fn set_label(&mut self, v: Voxel, label: u32) -> Result<(), GeometryError> {
        let i = VoxelFlattener::new(self.volume)
            .try_flatten(v)
            .ok_or_else(|| GeometryError::out_of_bounds(v, self.volume))?;
        self.labels[i] = label;
        Ok(())
    }

    /// Voxels carrying `label`, in compartment order (z, then x, then y).
    pub fn voxels_with_label(&self, label: u32) -> Vec<Voxel> {
        let flattener = VoxelFlattener::new(self.volume);
        let mut voxels = Vec::new();
        for z in 0..self.volume.depth {
            for x in 0..self.volume.width {
                for y in 0..self.volume.height {
                    let v = Voxel::new(x as i32, y as i32, z as i32);
                    if self.labels[flattener.flatten(v)] == label {
                        voxels.push(v);
                    }
                }
            }
        }
        voxels
    }

    /// Face-adjacent (voxel in `a`, voxel in `b`) pairs along the boundary between two labels.
    pub fn membrane_voxel_pairs(&self, a: u32, b: u32) -> Vec<(Voxel, Voxel)> {
        let mut pairs = Vec::new();
        for va in self.voxels_with_label(a) {
            for vb in va.face_neighbours() {
                if self.label(vb) == Some(b) {
                    pairs.push((va, vb));
                }
            }
        }
        pairs
    }
}
