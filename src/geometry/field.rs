//! Per-species concentration and diffusion fields over a compartment.

use crate::error::GeometryError;

use super::compartment::Compartment;
use super::voxel::VoxelFlattener;
use super::CompartmentId;

/// One species' values, one scalar per voxel of its compartment in voxel order.
#[derive(Debug, Clone)]
pub struct Field {
    species_id: String,
    compartment: CompartmentId,
    concentration: Vec<f64>,
    diffusion_constant: Vec<f64>,
    is_spatial: bool,
    is_uniform_concentration: bool,
    is_uniform_diffusion_constant: bool,
}

impl Field {
    /// Zero concentration and uniform diffusion constant over `compartment`.
    pub fn new(
        species_id: impl Into<String>,
        (compartment_id, compartment): (CompartmentId, &Compartment),
        diffusion_constant: f64,
    ) -> Self {
        let n = compartment.n_voxels();
        Self {
            species_id: species_id.into(),
            compartment: compartment_id,
            concentration: vec![0.0; n],
            diffusion_constant: vec![diffusion_constant; n],
            is_spatial: true,
            is_uniform_concentration: true,
            is_uniform_diffusion_constant: true,
        }
    }

    pub fn species_id(&self) -> &str {
        &self.species_id
    }

    pub fn compartment(&self) -> CompartmentId {
        self.compartment
    }

    /// Move the field to another compartment; values reset to zero.
    pub fn set_compartment(&mut self, compartment_id: CompartmentId, compartment: &Compartment) {
        log::debug!("species '{}': changing compartment to '{}'", self.species_id, compartment.id());
        self.compartment = compartment_id;
        self.concentration = vec![0.0; compartment.n_voxels()];
        self.diffusion_constant = vec![0.0; compartment.n_voxels()];
    }

    pub fn n_voxels(&self) -> usize {
        self.concentration.len()
    }

    pub fn is_spatial(&self) -> bool {
        self.is_spatial
    }

    /// Non-spatial species behave as if infinitely fast diffusing.
    pub fn set_is_spatial(&mut self, spatial: bool) {
        self.is_spatial = spatial;
    }

    pub fn is_uniform_concentration(&self) -> bool {
        self.is_uniform_concentration
    }

    pub fn is_uniform_diffusion_constant(&self) -> bool {
        self.is_uniform_diffusion_constant
    }

    pub fn concentration(&self) -> &[f64] {
        &self.concentration
    }

    pub fn concentration_mut(&mut self) -> &mut [f64] {
        &mut self.concentration
    }

    pub fn set_uniform_concentration(&mut self, concentration: f64) {
        self.concentration.fill(concentration);
        self.is_uniform_concentration = true;
    }

    /// Replace the per-voxel concentrations (compartment voxel order).
    pub fn set_concentration(&mut self, concentration: Vec<f64>) -> Result<(), GeometryError> {
        check_len(self.concentration.len(), concentration.len())?;
        self.concentration = concentration;
        self.is_uniform_concentration = false;
        Ok(())
    }

    /// Import from a full-lattice array laid out x + w·y + w·h·z with y = 0 at the bottom.
    pub fn import_concentration(
        &mut self,
        compartment: &Compartment,
        array: &[f64],
    ) -> Result<(), GeometryError> {
        self.concentration = sample_lattice_array(compartment, array)?;
        self.is_uniform_concentration = false;
        Ok(())
    }

    pub fn diffusion_constant(&self) -> &[f64] {
        &self.diffusion_constant
    }

    pub fn max_diffusion_constant(&self) -> f64 {
        self.diffusion_constant.iter().copied().fold(0.0, f64::max)
    }

    pub fn set_uniform_diffusion_constant(&mut self, diffusion_constant: f64) {
        self.diffusion_constant.fill(diffusion_constant);
        self.is_uniform_diffusion_constant = true;
    }

    /// Per-voxel diffusion constants (compartment voxel order).
    pub fn set_diffusion_constant(&mut self, diffusion_constant: Vec<f64>) -> Result<(), GeometryError> {
        check_len(self.diffusion_constant.len(), diffusion_constant.len())?;
        self.diffusion_constant = diffusion_constant;
        self.is_uniform_diffusion_constant = false;
        Ok(())
    }

    /// Import diffusion constants from a full-lattice array, see [`Field::import_concentration`].
    pub fn import_diffusion_constant(
        &mut self,
        compartment: &Compartment,
        array: &[f64],
    ) -> Result<(), GeometryError> {
        self.diffusion_constant = sample_lattice_array(compartment, array)?;
        self.is_uniform_diffusion_constant = false;
        Ok(())
    }

    /// Concentrations expanded to the full lattice.
    ///
    /// `masked`: zero outside the compartment, index x + w·y + w·h·z.
    /// Otherwise every lattice point takes its nearest compartment voxel's
    /// value, y-flipped to match [`Field::import_concentration`].
    pub fn concentration_image_array(&self, compartment: &Compartment, masked: bool) -> Vec<f64> {
        image_array(compartment, &self.concentration, masked)
    }
}

fn check_len(expected: usize, actual: usize) -> Result<(), GeometryError> {
    if expected != actual {
        return Err(GeometryError::ArraySizeMismatch { expected, actual });
    }
    Ok(())
}

fn sample_lattice_array(compartment: &Compartment, array: &[f64]) -> Result<Vec<f64>, GeometryError> {
    let volume = compartment.volume();
    check_len(volume.n_voxels(), array.len())?;
    let flattener = VoxelFlattener::new(volume);
    Ok(compartment
        .voxels()
        .iter()
        .map(|&v| array[flattener.flatten_y_flipped(v)])
        .collect())
}

pub(crate) fn image_array(compartment: &Compartment, values: &[f64], masked: bool) -> Vec<f64> {
    let volume = compartment.volume();
    if masked {
        let flattener = VoxelFlattener::new(volume);
        let mut a = vec![0.0; volume.n_voxels()];
        for (&v, &value) in compartment.voxels().iter().zip(values) {
            a[flattener.flatten(v)] = value;
        }
        a
    } else if compartment.n_voxels() == 0 {
        vec![0.0; volume.n_voxels()]
    } else {
        compartment.array_points().iter().map(|&i| values[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::VoxelImage;

    #[test]
    fn test_import_flips_y() {
        // two rows: top row (y=0) is compartment, bottom row background
        let image = VoxelImage::from_rows(&["aa", ".."]).unwrap();
        let comp = Compartment::new("c", &image, 'a' as u32).unwrap();
        let mut field = Field::new("s", (CompartmentId(0), &comp), 1.0);
        // y = 0 at the bottom in the array, so the image's top row is array row 1
        field.import_concentration(&comp, &[0.0, 0.0, 3.0, 4.0]).unwrap();
        assert_eq!(field.concentration(), &[3.0, 4.0]);
        assert!(!field.is_uniform_concentration());
        let roundtrip = field.concentration_image_array(&comp, false);
        assert_eq!(roundtrip, vec![3.0, 4.0, 3.0, 4.0]);
        let masked = field.concentration_image_array(&comp, true);
        assert_eq!(masked, vec![3.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_size_mismatch() {
        let image = VoxelImage::from_rows(&["aa"]).unwrap();
        let comp = Compartment::new("c", &image, 'a' as u32).unwrap();
        let mut field = Field::new("s", (CompartmentId(0), &comp), 1.0);
        assert!(field.set_concentration(vec![1.0]).is_err());
        assert!(field.import_diffusion_constant(&comp, &[1.0; 3]).is_err());
    }

    #[test]
    fn test_set_compartment_resets() {
        let image = VoxelImage::from_rows(&["aab"]).unwrap();
        let a = Compartment::new("a", &image, 'a' as u32).unwrap();
        let b = Compartment::new("b", &image, 'b' as u32).unwrap();
        let mut field = Field::new("s", (CompartmentId(0), &a), 2.0);
        field.set_uniform_concentration(5.0);
        field.set_compartment(CompartmentId(1), &b);
        assert_eq!(field.concentration(), &[0.0]);
        assert_eq!(field.diffusion_constant(), &[0.0]);
        assert_eq!(field.compartment(), CompartmentId(1));
    }
}
