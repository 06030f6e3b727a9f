//! A compartment: the voxels of one label plus their diffusion stencil.

use crate::error::GeometryError;

use super::image::VoxelImage;
use super::voxel::{Volume, Voxel, VoxelFlattener, VoxelIndexer, INVALID_INDEX};

/// Stencil slots per voxel: +x, -x, +y, -y, +z, -z.
pub const N_NEIGHBOURS: usize = 6;

/// Voxels of one compartment with a precomputed neighbour table.
///
/// Voxels are ordered z-major, then x, then y. A neighbour outside the
/// compartment is replaced by the voxel itself, which realises a zero-flux
/// boundary in the diffusion stencil.
#[derive(Debug, Clone)]
pub struct Compartment {
    id: String,
    label: u32,
    volume: Volume,
    voxels: Vec<Voxel>,
    neighbours: Vec<usize>,
    array_points: Vec<usize>,
}

impl Compartment {
    /// Classify every lattice point of `image` by `label`.
    pub fn new(id: impl Into<String>, image: &VoxelImage, label: u32) -> Result<Self, GeometryError> {
        let id = id.into();
        let volume = image.volume();
        let voxels = image.voxels_with_label(label);
        let flattener = VoxelFlattener::new(volume);

        let mut array_points = vec![INVALID_INDEX; volume.n_voxels()];
        for (i, &v) in voxels.iter().enumerate() {
            array_points[flattener.flatten_y_flipped(v)] = i;
        }
        if !voxels.is_empty() {
            fill_missing_by_dilation(&mut array_points, volume);
        }

        let indexer = VoxelIndexer::new(volume, &voxels)?;
        let mut neighbours = Vec::with_capacity(N_NEIGHBOURS * voxels.len());
        for (i, v) in voxels.iter().enumerate() {
            for vn in v.face_neighbours() {
                neighbours.push(indexer.get_index(vn).unwrap_or(i));
            }
        }

        log::info!("compartment '{}': {} voxels, label {:#x}", id, voxels.len(), label);

        Ok(Self {
            id,
            label,
            volume,
            voxels,
            neighbours,
            array_points,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> u32 {
        self.label
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    pub fn n_voxels(&self) -> usize {
        self.voxels.len()
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn voxel(&self, index: usize) -> Voxel {
        self.voxels[index]
    }

    /// Flat neighbour table, `N_NEIGHBOURS` entries per voxel.
    pub fn neighbours(&self) -> &[usize] {
        &self.neighbours
    }

    /// Neighbour indices of voxel `i` in stencil order.
    #[inline]
    pub fn neighbours_of(&self, i: usize) -> &[usize] {
        &self.neighbours[N_NEIGHBOURS * i..N_NEIGHBOURS * (i + 1)]
    }

    #[inline]
    pub fn up_x(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i]
    }

    #[inline]
    pub fn dn_x(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i + 1]
    }

    #[inline]
    pub fn up_y(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i + 2]
    }

    #[inline]
    pub fn dn_y(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i + 3]
    }

    #[inline]
    pub fn up_z(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i + 4]
    }

    #[inline]
    pub fn dn_z(&self, i: usize) -> usize {
        self.neighbours[N_NEIGHBOURS * i + 5]
    }

    /// Lattice -> nearest compartment voxel index for every point of the
    /// volume, y-flipped (index x + w·(h-1-y) + w·h·z). Empty compartments
    /// leave every entry invalid.
    pub fn array_points(&self) -> &[usize] {
        &self.array_points
    }

    /// Indexer over this compartment's voxels.
    pub fn indexer(&self) -> Result<VoxelIndexer, GeometryError> {
        VoxelIndexer::new(self.volume, &self.voxels)
    }
}

/// Replace invalid entries by a valid face neighbour's entry, growing the valid
/// region one voxel per sweep, at most nx+ny+nz sweeps. Anything left over
/// falls back to index 0.
fn fill_missing_by_dilation(arr: &mut [usize], volume: Volume) {
    let (nx, ny, nz) = (volume.width, volume.height, volume.depth);
    let dy = nx;
    let dz = nx * ny;
    let max_iter = nx + ny + nz;
    let mut next = arr.to_vec();
    for iter in 0..max_iter {
        let mut finished = true;
        let mut changed = false;
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let i = x + dy * y + dz * z;
                    if arr[i] != INVALID_INDEX {
                        continue;
                    }
                    let candidates = [
                        (x > 0).then(|| i - 1),
                        (x + 1 < nx).then(|| i + 1),
                        (y > 0).then(|| i - dy),
                        (y + 1 < ny).then(|| i + dy),
                        (z > 0).then(|| i - dz),
                        (z + 1 < nz).then(|| i + dz),
                    ];
                    match candidates.into_iter().flatten().find(|&j| arr[j] != INVALID_INDEX) {
                        Some(j) => {
                            next[i] = arr[j];
                            changed = true;
                        }
                        None => finished = false,
                    }
                }
            }
        }
        arr.copy_from_slice(&next);
        if finished {
            log::debug!("replaced all invalid indices after {} iterations", iter);
            return;
        }
        if !changed {
            log::warn!("dilation iteration {} did not modify any values, giving up", iter);
            break;
        }
    }
    let unresolved = arr.iter().filter(|&&a| a == INVALID_INDEX).count();
    if unresolved > 0 {
        log::warn!("failed to resolve {} lattice points by dilation, using index 0", unresolved);
        for a in arr.iter_mut().filter(|a| **a == INVALID_INDEX) {
            *a = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_order_is_z_x_y() {
        let image = VoxelImage::from_rows(&["aa", "aa"]).unwrap();
        let comp = Compartment::new("c", &image, 'a' as u32).unwrap();
        assert_eq!(
            comp.voxels(),
            &[Voxel::new(0, 0, 0), Voxel::new(0, 1, 0), Voxel::new(1, 0, 0), Voxel::new(1, 1, 0)]
        );
    }

    #[test]
    fn test_line_neighbours_reflect_at_ends() {
        let image = VoxelImage::from_rows(&["aaaa"]).unwrap();
        let comp = Compartment::new("line", &image, 'a' as u32).unwrap();
        assert_eq!(comp.neighbours().len(), 6 * 4);
        assert_eq!(comp.neighbours_of(0), &[1, 0, 0, 0, 0, 0]);
        assert_eq!(comp.neighbours_of(2), &[3, 1, 2, 2, 2, 2]);
        assert_eq!(comp.up_x(3), 3);
        assert_eq!(comp.dn_x(3), 2);
    }

    #[test]
    fn test_dilation_covers_whole_volume() {
        let image = VoxelImage::from_rows(&["....", ".a..", "....", "...a"]).unwrap();
        let comp = Compartment::new("c", &image, 'a' as u32).unwrap();
        assert_eq!(comp.n_voxels(), 2);
        assert_eq!(comp.array_points().len(), 16);
        assert!(comp.array_points().iter().all(|&i| i < 2));
    }

    #[test]
    fn test_full_compartment_array_points_are_identity() {
        let image = VoxelImage::from_rows(&["aaa", "aaa"]).unwrap();
        let comp = Compartment::new("c", &image, 'a' as u32).unwrap();
        let flattener = VoxelFlattener::new(comp.volume());
        for (i, &v) in comp.voxels().iter().enumerate() {
            assert_eq!(comp.array_points()[flattener.flatten_y_flipped(v)], i);
        }
    }

    #[test]
    fn test_empty_compartment() {
        let image = VoxelImage::from_rows(&["bb"]).unwrap();
        let comp = Compartment::new("empty", &image, 'a' as u32).unwrap();
        assert_eq!(comp.n_voxels(), 0);
        assert!(comp.neighbours().is_empty());
    }
}
