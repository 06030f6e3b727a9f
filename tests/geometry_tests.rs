//! Geometry tests: lattice indexing, compartment stencils and membranes
//!
//! Tests verify that:
//! - Flattening and unflattening are inverse bijections
//! - Every neighbour entry is either the face neighbour or the voxel itself
//! - Membrane pairs are face adjacent and lie in the right compartments

use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use spatial_rd_sim::geometry::{
    FluxAxis, Geometry, Volume, Voxel, VoxelFlattener, VoxelImage, N_NEIGHBOURS,
};

const A: u32 = 'a' as u32;
const B: u32 = 'b' as u32;

/// Random two-label image with a fixed seed.
fn random_image(volume: Volume, seed: u64) -> VoxelImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let labels = (0..volume.n_voxels())
        .map(|_| if rng.gen_bool(0.5) { A } else { B })
        .collect();
    VoxelImage::new(volume, labels).unwrap()
}

// ============================================================================
// Indexing
// ============================================================================

#[test]
fn test_flatten_unflatten_roundtrip() {
    let volume = Volume::new(5, 4, 3);
    let flattener = VoxelFlattener::new(volume);
    for index in 0..volume.n_voxels() {
        let v = flattener.unflatten(index);
        assert!(volume.contains(v), "{:?} should be in bounds", v);
        assert_eq!(flattener.flatten(v), index);
    }
    assert_eq!(flattener.flatten(Voxel::new(1, 2, 1)), 1 + 5 * 2 + 5 * 4);
    assert_eq!(flattener.flatten_y_flipped(Voxel::new(1, 2, 1)), 1 + 5 * 1 + 5 * 4);
    assert_eq!(flattener.try_flatten(Voxel::new(5, 0, 0)), None);
    assert_eq!(flattener.try_flatten(Voxel::new(0, -1, 0)), None);
}

#[test]
fn test_image_size_mismatch_rejected() {
    let result = VoxelImage::new(Volume::new(3, 3, 1), vec![A; 8]);
    assert!(result.is_err(), "8 labels cannot fill a 3x3 image");
}

// ============================================================================
// Compartments
// ============================================================================

#[test]
fn test_random_images_have_valid_neighbour_tables() {
    for seed in 0..8 {
        let volume = Volume::new(7, 6, if seed % 2 == 0 { 1 } else { 4 });
        let image = random_image(volume, seed);
        let mut geometry = Geometry::new(image, DVec3::splat(1.0));
        let a = geometry.add_compartment("a", A).unwrap();
        let b = geometry.add_compartment("b", B).unwrap();

        let total: usize = geometry.compartments().iter().map(|c| c.n_voxels()).sum();
        assert_eq!(total, volume.n_voxels(), "labels must partition the lattice");

        for id in [a, b] {
            let compartment = geometry.compartment(id);
            assert_eq!(compartment.neighbours().len(), N_NEIGHBOURS * compartment.n_voxels());
            for (i, &v) in compartment.voxels().iter().enumerate() {
                for (slot, (&n, vn)) in compartment
                    .neighbours_of(i)
                    .iter()
                    .zip(v.face_neighbours())
                    .enumerate()
                {
                    assert!(n < compartment.n_voxels(), "seed {}: index {} out of range", seed, n);
                    let in_compartment = geometry.image().label(vn) == Some(compartment.label());
                    if in_compartment {
                        assert_eq!(compartment.voxel(n), vn, "seed {}: slot {} of {:?}", seed, slot, v);
                    } else {
                        assert_eq!(n, i, "seed {}: missing neighbour must point to itself", seed);
                    }
                }
            }
        }
    }
}

#[test]
fn test_neighbour_slot_order() {
    let image = VoxelImage::from_rows(&["aaa", "aaa", "aaa"]).unwrap();
    let mut geometry = Geometry::new(image, DVec3::splat(1.0));
    let a = geometry.add_compartment("a", A).unwrap();
    let compartment = geometry.compartment(a);
    let centre = compartment
        .voxels()
        .iter()
        .position(|&v| v == Voxel::new(1, 1, 0))
        .unwrap();

    assert_eq!(compartment.voxel(compartment.up_x(centre)), Voxel::new(2, 1, 0));
    assert_eq!(compartment.voxel(compartment.dn_x(centre)), Voxel::new(0, 1, 0));
    assert_eq!(compartment.voxel(compartment.up_y(centre)), Voxel::new(1, 2, 0));
    assert_eq!(compartment.voxel(compartment.dn_y(centre)), Voxel::new(1, 0, 0));
    // single layer: z neighbours are the voxel itself
    assert_eq!(compartment.up_z(centre), centre);
    assert_eq!(compartment.dn_z(centre), centre);
}

#[test]
fn test_array_points_cover_lattice() {
    let image = random_image(Volume::new(6, 5, 2), 42);
    let mut geometry = Geometry::new(image, DVec3::splat(0.5));
    let a = geometry.add_compartment("a", A).unwrap();
    let compartment = geometry.compartment(a);
    let flattener = VoxelFlattener::new(compartment.volume());

    assert_eq!(compartment.array_points().len(), compartment.volume().n_voxels());
    for &p in compartment.array_points() {
        assert!(p < compartment.n_voxels(), "every lattice point maps to a voxel");
    }
    for (i, &v) in compartment.voxels().iter().enumerate() {
        assert_eq!(compartment.array_points()[flattener.flatten_y_flipped(v)], i);
    }
}

// ============================================================================
// Membranes
// ============================================================================

#[test]
fn test_membrane_pairs_are_adjacent_and_resolved() {
    let image = random_image(Volume::new(8, 8, 3), 7);
    let mut geometry = Geometry::new(image, DVec3::new(1.0, 2.0, 0.5));
    let a = geometry.add_compartment("a", A).unwrap();
    let b = geometry.add_compartment("b", B).unwrap();
    geometry.add_membrane("a_b", a, b).unwrap();

    let membrane = &geometry.membranes()[0];
    assert!(membrane.n_pairs() > 0, "a random image must have a boundary");
    let ca = geometry.compartment(membrane.compartment_a());
    let cb = geometry.compartment(membrane.compartment_b());
    let mut counted = 0;
    for axis in FluxAxis::ALL {
        for &(ia, ib) in membrane.index_pairs(axis) {
            let va = ca.voxel(ia);
            let vb = cb.voxel(ib);
            assert_eq!(FluxAxis::between(va, vb), Some(axis), "{:?} / {:?}", va, vb);
            counted += 1;
        }
    }
    assert_eq!(counted, membrane.n_pairs());
}

#[test]
fn test_two_halves_membrane_is_one_column() {
    let image = VoxelImage::from_rows(&["aabb", "aabb", "aabb"]).unwrap();
    let mut geometry = Geometry::new(image, DVec3::splat(1.0));
    let a = geometry.add_compartment("a", A).unwrap();
    let b = geometry.add_compartment("b", B).unwrap();
    geometry.add_membrane("a_b", a, b).unwrap();

    let membrane = &geometry.membranes()[0];
    assert_eq!(membrane.index_pairs(FluxAxis::X).len(), 3);
    assert!(membrane.index_pairs(FluxAxis::Y).is_empty());
    assert!(membrane.index_pairs(FluxAxis::Z).is_empty());
}

#[test]
fn test_physical_point_uses_voxel_size_and_origin() {
    let image = VoxelImage::filled(Volume::new(3, 3, 1), A);
    let geometry = Geometry::new(image, DVec3::new(2.0, 3.0, 1.0)).with_origin(DVec3::new(1.0, 0.0, 0.0));
    // y is measured from the bottom row
    let p = geometry.physical_point(Voxel::new(1, 0, 0));
    assert!((p.x - 3.0).abs() < 1e-12, "x = {}", p.x);
    assert!((p.y - 6.0).abs() < 1e-12, "y = {}", p.y);
    let p = geometry.physical_point(Voxel::new(0, 2, 0));
    assert!((p.x - 1.0).abs() < 1e-12, "x = {}", p.x);
    assert!(p.y.abs() < 1e-12, "y = {}", p.y);
}
