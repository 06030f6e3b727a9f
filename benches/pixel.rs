//! Pixel backend benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use glam::DVec3;
use spatial_rd_sim::config::PixelIntegrator;
use spatial_rd_sim::geometry::{Geometry, Volume, VoxelImage};
use spatial_rd_sim::model::{SpatialModel, Substitutions};
use spatial_rd_sim::pixel::PixelSim;
use spatial_rd_sim::simulate::{Simulation, Simulator};

const CELL: u32 = 'c' as u32;

/// Square lattice, one compartment, two species with a Gray-Scott style reaction.
fn square_model(size: usize, integrator: PixelIntegrator, threads: bool) -> SpatialModel {
    let image = VoxelImage::filled(Volume::new(size, size, 1), CELL);
    let mut geometry = Geometry::new(image, DVec3::splat(1.0));
    geometry.add_compartment("cell", CELL).unwrap();
    let mut model = SpatialModel::new(geometry);
    model.add_parameter("f", 0.04).unwrap();
    model.add_parameter("k", 0.06).unwrap();
    model.add_species("u", "cell", 0.2).unwrap();
    model.add_species("v", "cell", 0.1).unwrap();
    model.set_uniform_concentration("u", 1.0).unwrap();
    let seeded: Vec<f64> = (0..size * size).map(|i| if i % 7 == 0 { 0.5 } else { 0.0 }).collect();
    model.species_mut("v").unwrap().field.set_concentration(seeded).unwrap();
    model.set_reaction_rate("u", "-u * v * v + f * (1 - u)").unwrap();
    model.set_reaction_rate("v", "u * v * v - (f + k) * v").unwrap();
    let pixel = &mut model.options_mut().pixel;
    pixel.integrator = integrator;
    pixel.enable_multithreading = threads;
    model
}

fn bench_pixel_construction(c: &mut Criterion) {
    let model = square_model(64, PixelIntegrator::Rk212, false);
    let layout = model.sim_layout();

    c.bench_function("pixel_construction_64x64", |b| {
        b.iter(|| PixelSim::new(black_box(&model), &layout, &Substitutions::new()))
    });
}

fn bench_integrators(c: &mut Criterion) {
    for integrator in [
        PixelIntegrator::Rk101,
        PixelIntegrator::Rk212,
        PixelIntegrator::Rk323,
        PixelIntegrator::Rk435,
    ] {
        let model = square_model(64, integrator, false);
        let layout = model.sim_layout();
        c.bench_function(&format!("run_1.0_64x64_{:?}", integrator), |b| {
            b.iter(|| {
                let mut sim = PixelSim::new(&model, &layout, &Substitutions::new());
                black_box(sim.run(1.0, None, &|| false))
            })
        });
    }
}

fn bench_multithreaded(c: &mut Criterion) {
    let model = square_model(128, PixelIntegrator::Rk323, true);
    let layout = model.sim_layout();

    c.bench_function("run_1.0_128x128_threads", |b| {
        b.iter(|| {
            let mut sim = PixelSim::new(&model, &layout, &Substitutions::new());
            black_box(sim.run(1.0, None, &|| false))
        })
    });
}

fn bench_simulation_recording(c: &mut Criterion) {
    c.bench_function("simulation_10_records_32x32", |b| {
        b.iter(|| {
            let mut model = square_model(32, PixelIntegrator::Rk212, false);
            let mut sim = Simulation::new(&mut model);
            black_box(sim.do_timesteps(0.5, 10, None))
        })
    });
}

criterion_group!(
    benches,
    bench_pixel_construction,
    bench_integrators,
    bench_multithreaded,
    bench_simulation_recording
);
criterion_main!(benches);
