//! Membrane flux terms of the Pixel backend.

use std::sync::Arc;

use crate::geometry::{FluxAxis, Geometry, MembraneId};
use crate::model::{SpatialModel, Substitutions};
use crate::symbolic::{self, SymbolicEvaluator};

use super::compartment::SimCompartment;
use super::ExtraVariables;

/// Fluxes across one membrane.
///
/// Either side may be absent when its compartment holds no simulated
/// species; the flux then only changes the other side.
pub(crate) struct SimMembrane {
    id: String,
    membrane: MembraneId,
    geometry: Arc<Geometry>,
    /// index into the simulated compartments
    side_a: Option<usize>,
    side_b: Option<usize>,
    n_species_a: usize,
    n_species_b: usize,
    n_extra: usize,
    evaluator: Box<dyn SymbolicEvaluator>,
}

impl SimMembrane {
    /// `None` if no species has a flux across this membrane.
    pub fn new(
        model: &SpatialModel,
        membrane: MembraneId,
        compartments: &[SimCompartment],
        side_a: Option<usize>,
        side_b: Option<usize>,
        extra: ExtraVariables,
        substitutions: &Substitutions,
    ) -> Result<Option<Self>, String> {
        let fluxes: Vec<_> = model
            .membrane_fluxes()
            .iter()
            .filter(|f| f.membrane == membrane)
            .collect();
        if fluxes.is_empty() {
            return Ok(None);
        }
        let geometry = Arc::clone(model.geometry());
        let id = geometry.membrane(membrane).id().to_string();
        log::debug!("membrane: {}", id);

        let species_a = simulated_species(compartments, side_a);
        let species_b = simulated_species(compartments, side_b);

        let mut variables: Vec<String> = species_a.iter().chain(species_b).cloned().collect();
        variables.extend(extra.names());
        let expressions: Vec<String> = species_a
            .iter()
            .chain(species_b)
            .map(|s| {
                let terms: Vec<&str> = fluxes
                    .iter()
                    .filter(|f| &f.species == s)
                    .map(|f| f.expression.as_str())
                    .collect();
                match terms.len() {
                    0 => "0".to_string(),
                    1 => terms[0].to_string(),
                    _ => format!("({})", terms.join(") + (")),
                }
            })
            .collect();
        for f in &fluxes {
            if !species_a.contains(&f.species) && !species_b.contains(&f.species) {
                log::debug!("  - flux of constant species '{}' ignored", f.species);
            }
        }
        let evaluator = symbolic::compile(
            model.evaluator_factory().as_ref(),
            &expressions,
            &variables,
            &model.constants(substitutions),
        )?;

        Ok(Some(Self {
            id,
            membrane,
            side_a,
            side_b,
            n_species_a: species_a.len(),
            n_species_b: species_b.len(),
            n_extra: extra.count(),
            evaluator,
            geometry,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add the flux of every voxel pair to dC/dt of both sides, divided by
    /// the voxel length along the pair's axis.
    pub fn evaluate_reactions(&self, compartments: &mut [SimCompartment]) {
        let (mut a, mut b) = sides_mut(compartments, self.side_a, self.side_b);
        let (na, nb) = (self.n_species_a, self.n_species_b);
        let mut inputs = vec![0.0; na + nb + self.n_extra];
        let mut result = vec![0.0; na + nb];
        let membrane = self.geometry.membrane(self.membrane);
        let voxel_size = self.geometry.voxel_size();

        for axis in FluxAxis::ALL {
            let pairs = membrane.index_pairs(axis);
            if pairs.is_empty() {
                continue;
            }
            let inv_length = 1.0
                / match axis {
                    FluxAxis::X => voxel_size.x,
                    FluxAxis::Y => voxel_size.y,
                    FluxAxis::Z => voxel_size.z,
                };
            for &(ia, ib) in pairs {
                if let Some(a) = a.as_deref() {
                    let s = a.n_slots;
                    inputs[..na].copy_from_slice(&a.conc[ia * s..ia * s + na]);
                    if b.is_none() {
                        inputs[na + nb..].copy_from_slice(&a.conc[ia * s + na..(ia + 1) * s]);
                    }
                }
                if let Some(b) = b.as_deref() {
                    let s = b.n_slots;
                    inputs[na..na + nb].copy_from_slice(&b.conc[ib * s..ib * s + nb]);
                    inputs[na + nb..].copy_from_slice(&b.conc[ib * s + nb..(ib + 1) * s]);
                }
                self.evaluator.eval(&mut result, &inputs);
                if let Some(a) = a.as_deref_mut() {
                    let s = a.n_slots;
                    for (d, r) in a.dcdt[ia * s..ia * s + na].iter_mut().zip(&result[..na]) {
                        *d += r * inv_length;
                    }
                }
                if let Some(b) = b.as_deref_mut() {
                    let s = b.n_slots;
                    for (d, r) in b.dcdt[ib * s..ib * s + nb].iter_mut().zip(&result[na..]) {
                        *d += r * inv_length;
                    }
                }
            }
        }
    }
}

fn simulated_species(compartments: &[SimCompartment], side: Option<usize>) -> &[String] {
    match side {
        Some(ic) => {
            let c = &compartments[ic];
            &c.species_ids[..c.n_species]
        }
        None => &[],
    }
}

/// Mutable access to two distinct (optional) compartments.
fn sides_mut(
    compartments: &mut [SimCompartment],
    a: Option<usize>,
    b: Option<usize>,
) -> (Option<&mut SimCompartment>, Option<&mut SimCompartment>) {
    match (a, b) {
        (Some(ia), Some(ib)) if ia < ib => {
            let (lo, hi) = compartments.split_at_mut(ib);
            (Some(&mut lo[ia]), Some(&mut hi[0]))
        }
        (Some(ia), Some(ib)) if ia > ib => {
            let (lo, hi) = compartments.split_at_mut(ia);
            (Some(&mut hi[0]), Some(&mut lo[ib]))
        }
        // a membrane always joins two different compartments
        (Some(ia), Some(_)) => (compartments.get_mut(ia), None),
        (Some(ia), None) => (compartments.get_mut(ia), None),
        (None, Some(ib)) => (None, compartments.get_mut(ib)),
        (None, None) => (None, None),
    }
}
