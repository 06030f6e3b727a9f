//! Per-compartment state of the Pixel backend: concentrations, dC/dt and the
//! Runge-Kutta scratch buffers.

use std::sync::Arc;

use glam::DVec3;
use rayon::prelude::*;

use crate::geometry::{CompartmentId, Geometry, N_NEIGHBOURS};
use crate::model::{SpatialModel, Substitutions};
use crate::pool::WorkerPool;
use crate::symbolic::{self, SymbolicEvaluator};

use super::ExtraVariables;

/// Minimum number of voxels (or elements) handed to one worker.
const GRAIN_SIZE: usize = 64;

/// Local integration error of one sub-step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntegratorError {
    pub abs: f64,
    pub rel: f64,
}

/// Concentrations of every simulated species of one compartment.
///
/// Layout is voxel-major: `conc[ix * n_slots + is]`, where the slots are the
/// compartment's species followed by the extra time/space variables.
pub(crate) struct SimCompartment {
    pub(super) compartment_id: String,
    compartment: CompartmentId,
    geometry: Arc<Geometry>,
    pub(super) n_voxels: usize,
    /// species + extra variables per voxel
    pub(super) n_slots: usize,
    /// species only
    pub(super) n_species: usize,
    pub(super) species_ids: Vec<String>,
    species_names: Vec<String>,
    non_spatial: Vec<usize>,
    /// per species, per voxel
    diffusion: Vec<Vec<f64>>,
    /// 1/dx², 1/dy², 1/dz² (z term dropped for single-layer volumes)
    inv_dx2: DVec3,
    max_stable_timestep: f64,
    evaluator: Box<dyn SymbolicEvaluator>,
    pub(super) conc: Vec<f64>,
    pub(super) dcdt: Vec<f64>,
    s2: Vec<f64>,
    s3: Vec<f64>,
}

impl SimCompartment {
    pub fn new(
        model: &SpatialModel,
        compartment: CompartmentId,
        species_indices: &[usize],
        extra: ExtraVariables,
        substitutions: &Substitutions,
    ) -> Result<Self, String> {
        let geometry = Arc::clone(model.geometry());
        let comp = geometry.compartment(compartment);
        let n_voxels = comp.n_voxels();
        let voxel_size = geometry.voxel_size();
        let mut inv_dx2 = DVec3::ONE / (voxel_size * voxel_size);
        if geometry.volume().depth <= 1 {
            inv_dx2.z = 0.0;
        }

        let species: Vec<_> = species_indices.iter().map(|&i| &model.species()[i]).collect();
        let n_species = species.len();
        let n_slots = n_species + extra.count();
        log::debug!("compartment: {}", comp.id());

        let mut diffusion = Vec::with_capacity(n_species);
        let mut non_spatial = Vec::new();
        let mut max_stable_timestep = f64::MAX;
        for (is, s) in species.iter().enumerate() {
            let d = s.field.diffusion_constant();
            diffusion.push(if d.len() == n_voxels { d.to_vec() } else { vec![0.0; n_voxels] });
            let max_d = s.field.max_diffusion_constant();
            max_stable_timestep = max_stable_timestep.min(forward_euler_stable_timestep(max_d * inv_dx2));
            if !s.field.is_spatial() {
                non_spatial.push(is);
            }
            log::debug!("  - adding species: {}, diff constant (max) {}", s.id, max_d);
        }

        let mut variables: Vec<String> = species.iter().map(|s| s.id.clone()).collect();
        variables.extend(extra.names());
        let mut expressions: Vec<String> = species
            .iter()
            .map(|s| s.reaction_rate.clone().unwrap_or_else(|| "0".to_string()))
            .collect();
        expressions.extend(extra.rate_expressions());
        let evaluator = symbolic::compile(
            model.evaluator_factory().as_ref(),
            &expressions,
            &variables,
            &model.constants(substitutions),
        )?;

        let mut conc = Vec::with_capacity(n_slots * n_voxels);
        for (ix, &v) in comp.voxels().iter().enumerate() {
            for s in &species {
                conc.push(s.field.concentration().get(ix).copied().unwrap_or(0.0));
            }
            if extra.time {
                conc.push(0.0);
            }
            if extra.space {
                let p = geometry.physical_point(v);
                conc.extend([p.x, p.y, p.z]);
            }
        }
        let n = conc.len();

        Ok(Self {
            compartment_id: comp.id().to_string(),
            compartment,
            n_voxels,
            n_slots,
            n_species,
            species_ids: variables,
            species_names: species.iter().map(|s| s.name.clone()).collect(),
            non_spatial,
            diffusion,
            inv_dx2,
            max_stable_timestep,
            evaluator,
            conc,
            dcdt: vec![0.0; n],
            s2: vec![0.0; n],
            s3: vec![0.0; n],
            geometry,
        })
    }

    pub fn max_stable_timestep(&self) -> f64 {
        self.max_stable_timestep
    }

    /// dC/dt = reactions + diffusion, overwriting the previous dC/dt.
    pub fn evaluate_reactions_and_diffusion(&mut self, pool: Option<&WorkerPool>) {
        let stride = self.n_slots;
        let neighbours = self.geometry.compartment(self.compartment).neighbours();
        let conc = &self.conc;
        let diffusion = &self.diffusion;
        let evaluator = &*self.evaluator;
        let face_coefficients = [
            self.inv_dx2.x,
            self.inv_dx2.x,
            self.inv_dx2.y,
            self.inv_dx2.y,
            self.inv_dx2.z,
            self.inv_dx2.z,
        ];
        let kernel = |i: usize, out: &mut [f64]| {
            evaluator.eval(out, &conc[i * stride..(i + 1) * stride]);
            let nn = &neighbours[N_NEIGHBOURS * i..N_NEIGHBOURS * (i + 1)];
            for (is, d) in diffusion.iter().enumerate() {
                let d_i = d[i];
                let c_i = conc[i * stride + is];
                let mut flux = 0.0;
                for (&j, &inv) in nn.iter().zip(&face_coefficients) {
                    flux += 0.5 * (d_i + d[j]) * inv * (conc[j * stride + is] - c_i);
                }
                out[is] += flux;
            }
        };
        match pool {
            Some(pool) => pool.install(|| {
                self.dcdt
                    .par_chunks_mut(stride)
                    .with_min_len(GRAIN_SIZE)
                    .enumerate()
                    .for_each(|(i, out)| kernel(i, out))
            }),
            None => self
                .dcdt
                .chunks_mut(stride)
                .enumerate()
                .for_each(|(i, out)| kernel(i, out)),
        }
    }

    /// Replace dC/dt of non-spatial species by its compartment average.
    pub fn spatially_average_dcdt(&mut self) {
        if self.n_voxels == 0 {
            return;
        }
        for &is in &self.non_spatial {
            let slots = self.dcdt.iter().skip(is).step_by(self.n_slots);
            let avg = slots.sum::<f64>() / self.n_voxels as f64;
            for d in self.dcdt.iter_mut().skip(is).step_by(self.n_slots) {
                *d = avg;
            }
        }
    }

    /// Apply `f(c, s2, s3, dcdt)` to every element.
    fn update<F>(&mut self, pool: Option<&WorkerPool>, f: F)
    where
        F: Fn(&mut f64, &mut f64, &mut f64, f64) + Sync + Send,
    {
        let (conc, s2, s3, dcdt) = (&mut self.conc, &mut self.s2, &mut self.s3, &self.dcdt);
        match pool {
            Some(pool) => pool.install(|| {
                conc.par_iter_mut()
                    .zip(s2.par_iter_mut())
                    .zip(s3.par_iter_mut())
                    .zip(dcdt.par_iter())
                    .with_min_len(GRAIN_SIZE * 8)
                    .for_each(|(((c, a), b), &d)| f(c, a, b, d))
            }),
            None => conc
                .iter_mut()
                .zip(s2.iter_mut())
                .zip(s3.iter_mut())
                .zip(dcdt.iter())
                .for_each(|(((c, a), b), &d)| f(c, a, b, d)),
        }
    }

    pub fn forward_euler(&mut self, dt: f64, pool: Option<&WorkerPool>) {
        self.update(pool, |c, _, _, d| *c += dt * d);
    }

    /// Heun stage 1: s3 = c; c += dt·dcdt.
    pub fn rk212_substep1(&mut self, dt: f64, pool: Option<&WorkerPool>) {
        self.update(pool, |c, _, s3, d| {
            *s3 = *c;
            *c += dt * d;
        });
    }

    /// Heun stage 2; s2 keeps the forward Euler result as the lower-order estimate.
    pub fn rk212_substep2(&mut self, dt: f64, pool: Option<&WorkerPool>) {
        self.update(pool, |c, s2, s3, d| {
            *s2 = *c;
            *c = 0.5 * *s3 + 0.5 * *c + 0.5 * dt * d;
        });
    }

    pub fn rk_init(&mut self) {
        self.s2.fill(0.0);
        self.s3.copy_from_slice(&self.conc);
    }

    /// Generic low-storage stage: s2 += δ·c; c = g1·c + g2·s2 + g3·s3 + β·dt·dcdt.
    pub fn rk_substep(&mut self, dt: f64, stage: super::RkStage, pool: Option<&WorkerPool>) {
        let super::RkStage { g1, g2, g3, beta, delta } = stage;
        self.update(pool, |c, s2, s3, d| {
            *s2 += delta * *c;
            *c = g1 * *c + g2 * *s2 + g3 * *s3 + beta * dt * d;
        });
    }

    /// Lower-order estimate: s2 = cf·c + s2f·s2 + s3f·s3.
    pub fn rk_finalise(&mut self, c_factor: f64, s2_factor: f64, s3_factor: f64, pool: Option<&WorkerPool>) {
        self.update(pool, |c, s2, s3, _| {
            *s2 = c_factor * *c + s2_factor * *s2 + s3_factor * *s3;
        });
    }

    /// Restore the concentrations from before the last step.
    pub fn undo_rk_step(&mut self) {
        self.conc.copy_from_slice(&self.s3);
    }

    /// Max absolute and relative difference between the two estimates.
    pub fn rk_error(&self, epsilon: f64) -> IntegratorError {
        let mut err = IntegratorError::default();
        for ((&c, &lower), &prev) in self.conc.iter().zip(&self.s2).zip(&self.s3) {
            let local = (c - lower).abs();
            err.abs = err.abs.max(local);
            // average of old and new values, offset to avoid dividing by zero
            let norm = (0.5 * (c + prev + epsilon)).abs();
            err.rel = err.rel.max(local / norm);
        }
        err
    }

    /// Name of the slot with the largest relative error, with that error.
    pub fn largest_relative_error(&self, epsilon: f64) -> Option<(f64, String)> {
        let mut largest: Option<(f64, usize)> = None;
        for (i, ((&c, &lower), &prev)) in self.conc.iter().zip(&self.s2).zip(&self.s3).enumerate() {
            let rel = (c - lower).abs() / (0.5 * (c + prev + epsilon)).abs();
            if largest.map_or(true, |(r, _)| rel > r) {
                largest = Some((rel, i % self.n_slots));
            }
        }
        largest.map(|(rel, is)| (rel, self.slot_name(is).to_string()))
    }

    /// First species (or extra variable) holding a NaN or infinite value.
    pub fn non_finite_slot(&self) -> Option<&str> {
        self.conc
            .iter()
            .position(|c| !c.is_finite())
            .map(|i| self.slot_name(i % self.n_slots))
    }

    fn slot_name(&self, is: usize) -> &str {
        self.species_names
            .get(is)
            .unwrap_or(&self.species_ids[is])
    }

    pub fn concentrations(&self) -> &[f64] {
        &self.conc
    }

    /// Overwrite all slots; ignored unless the length matches.
    pub fn set_concentrations(&mut self, concentrations: &[f64]) -> bool {
        if concentrations.len() != self.conc.len() {
            return false;
        }
        self.conc.copy_from_slice(concentrations);
        true
    }

    pub fn dcdt(&self) -> &[f64] {
        &self.dcdt
    }

    pub fn lower_order_concentration(&self, species: usize, voxel: usize) -> f64 {
        self.s2
            .get(voxel * self.n_slots + species)
            .copied()
            .unwrap_or(0.0)
    }
}

/// Forward Euler stability bound for dimensionless diffusion {D/dx², D/dy², D/dz²}.
fn forward_euler_stable_timestep(dimensionless: DVec3) -> f64 {
    let sum = dimensionless.x + dimensionless.y + dimensionless.z;
    if sum > 0.0 {
        1.0 / (2.0 * sum)
    } else {
        f64::MAX
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_timestep() {
        assert_eq!(forward_euler_stable_timestep(DVec3::new(1.0, 1.0, 0.0)), 0.25);
        assert_eq!(forward_euler_stable_timestep(DVec3::ZERO), f64::MAX);
    }
}
