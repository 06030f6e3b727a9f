//! Spatial RD Sim - Entry point
//!
//! Runs a two-compartment reaction-diffusion demo on a voxel lattice: a
//! circular cell inside an extracellular square, with a species leaking
//! across the membrane until an event closes the channel.
//!
//! CLI Usage:
//!   cargo run                                   # time series, default options
//!   cargo run -- -n 50 --dt 0.5 --integrator rk435
//!   cargo run -- --steady                       # steady-state search
//!   cargo run -- --csv --json                   # also export the results

use std::time::Instant;

use anyhow::{bail, Result};
use glam::DVec3;
use spatial_rd_sim::{
    config::{PixelIntegrator, SimulationOptions},
    export::{export_simulation_json, CsvExporter},
    geometry::{Geometry, Volume, VoxelImage},
    model::{ModelEvent, SpatialModel},
    simulate::{Simulation, SteadyStateSimulation},
};

const CELL: u32 = 'c' as u32;
const OUTSIDE: u32 = 'e' as u32;

struct Args {
    steady: bool,
    steps: usize,
    dt: f64,
    size: usize,
    integrator: Option<PixelIntegrator>,
    options: Option<String>,
    csv: bool,
    json: bool,
}

/// Circular cell of radius `size / 3` centred in a `size` x `size` square.
fn build_model(size: usize, options: SimulationOptions) -> Result<SpatialModel> {
    let centre = (size as f64 - 1.0) / 2.0;
    let radius = size as f64 / 3.0;
    let mut labels = Vec::with_capacity(size * size);
    for y in 0..size {
        for x in 0..size {
            let r = ((x as f64 - centre).powi(2) + (y as f64 - centre).powi(2)).sqrt();
            labels.push(if r <= radius { CELL } else { OUTSIDE });
        }
    }
    let image = VoxelImage::new(Volume::new(size, size, 1), labels)?;
    let mut geometry = Geometry::new(image, DVec3::splat(1.0));
    let cell = geometry.add_compartment("cell", CELL)?;
    let outside = geometry.add_compartment("outside", OUTSIDE)?;
    geometry.add_membrane("cell_membrane", cell, outside)?;

    let mut model = SpatialModel::new(geometry);
    *model.options_mut() = options;
    model.add_parameter("p", 0.2)?;
    model.add_parameter("k_decay", 0.05)?;
    model.add_species("A", "cell", 1.0)?;
    model.add_species("B", "outside", 4.0)?;
    model.set_uniform_concentration("A", 1.0)?;
    model.set_reaction_rate("B", "0.01 - k_decay * B")?;
    model.add_membrane_flux("cell_membrane", "A", "-p * (A - B)")?;
    model.add_membrane_flux("cell_membrane", "B", "p * (A - B)")?;
    Ok(model)
}

fn print_row_header() {
    println!("{:>10} {:>12} {:>12} {:>12} {:>12}", "t", "avg A", "avg B", "max B", "total");
}

fn print_row(sim: &Simulation<'_>, time_index: usize) {
    let model = sim.model();
    let a = sim.avg_min_max(time_index, 0, 0);
    let b = sim.avg_min_max(time_index, 1, 0);
    let n_a = model.geometry().compartments()[0].n_voxels() as f64;
    let n_b = model.geometry().compartments()[1].n_voxels() as f64;
    println!(
        "{:>10.3} {:>12.6} {:>12.6} {:>12.6} {:>12.4}",
        sim.time_points()[time_index],
        a.avg,
        b.avg,
        b.max,
        a.avg * n_a + b.avg * n_b
    );
}

/// Time series with a channel-closing event halfway
fn run_time_series(mut model: SpatialModel, args: &Args) -> Result<()> {
    let t_close = 0.5 * args.dt * args.steps as f64;
    model.add_event(ModelEvent::set_parameter("close_channel", t_close, "p", 0.0))?;

    println!("=== Spatial RD Sim - Time Series ===\n");
    println!("Lattice: {0}x{0}, {1} steps of {2}", args.size, args.steps, args.dt);
    println!("Channel closes at t = {}\n", t_close);

    let start = Instant::now();
    let steps = {
        let mut sim = Simulation::new(&mut model);
        let steps = sim.do_timesteps(args.dt, args.steps, None);
        print_row_header();
        for i in 0..sim.time_points().len() {
            print_row(&sim, i);
        }
        if !sim.error_message().is_empty() {
            println!("\n⚠️  {}", sim.error_message());
        }
        steps
    };
    let elapsed = start.elapsed();

    println!("\n=== Results ===");
    println!("Elapsed time: {:.2?}", elapsed);
    println!("Integration steps: {}", steps);
    println!("Steps per second: {:.0}", steps as f64 / elapsed.as_secs_f64());

    export_results(&model, args)
}

fn run_steady_state(model: SpatialModel, args: &Args) -> Result<()> {
    println!("=== Spatial RD Sim - Steady State ===\n");
    let mut sim = SteadyStateSimulation::new(&model);
    sim.set_dt(args.dt);
    let start = Instant::now();
    let steps = sim.run_for(args.dt * args.steps as f64);

    println!("{:>10} {:>14}", "t", "criterion");
    for (t, e) in sim.steps().iter().zip(sim.errors()) {
        println!("{:>10.3} {:>14.6e}", t, e);
    }
    println!("\n=== Results ===");
    println!("Elapsed time: {:.2?}", start.elapsed());
    println!("Integration steps: {}", steps);
    if sim.has_converged() {
        println!("✓ Converged at t = {:.3}", sim.current_step());
    } else if !sim.error_message().is_empty() {
        println!("⚠️  {}", sim.error_message());
    } else {
        println!("⚠️  Not converged (criterion {:.3e}, tolerance {:.1e})", sim.current_error(), sim.options().tolerance);
    }
    Ok(())
}

fn export_results(model: &SpatialModel, args: &Args) -> Result<()> {
    if args.csv {
        let mut exporter = CsvExporter::new()?;
        exporter.record_all(model)?;
        let path = exporter.finish()?;
        println!("CSV written to {}", path.display());
    }
    if args.json {
        let path = export_simulation_json(model)?;
        println!("JSON written to {}", path.display());
    }
    Ok(())
}

fn parse_args() -> Result<Args> {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        steady: false,
        steps: 20,
        dt: 1.0,
        size: 40,
        integrator: None,
        options: None,
        csv: false,
        json: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--steady" | "-s" => parsed.steady = true,
            "--csv" => parsed.csv = true,
            "--json" => parsed.json = true,
            "-n" | "--steps" => {
                i += 1;
                if i < args.len() {
                    parsed.steps = args[i].parse().unwrap_or(20);
                }
            }
            "--dt" => {
                i += 1;
                if i < args.len() {
                    parsed.dt = args[i].parse().unwrap_or(1.0);
                }
            }
            "--size" => {
                i += 1;
                if i < args.len() {
                    parsed.size = args[i].parse().unwrap_or(40);
                }
            }
            "--integrator" => {
                i += 1;
                if i < args.len() {
                    match PixelIntegrator::from_name(&args[i]) {
                        Some(integrator) => parsed.integrator = Some(integrator),
                        None => bail!("unknown integrator '{}'", args[i]),
                    }
                }
            }
            "--options" => {
                i += 1;
                parsed.options = args.get(i).cloned();
            }
            "--help" | "-h" => {
                println!("Spatial RD Sim");
                println!();
                println!("Usage: spatial-rd-sim [OPTIONS]");
                println!();
                println!("Options:");
                println!("  --steady, -s         Search for a steady state instead");
                println!("  -n, --steps N        Number of timesteps (default: 20)");
                println!("  --dt DT              Timestep length (default: 1.0)");
                println!("  --size N             Lattice edge length in voxels (default: 40)");
                println!("  --integrator NAME    rk101, rk212, rk323 or rk435");
                println!("  --options FILE       Load simulation options from JSON");
                println!("  --csv                Export per-species statistics to CSV");
                println!("  --json               Export the full record to JSON");
                println!("  --help, -h           Show this help");
                std::process::exit(0);
            }
            other => log::warn!("Ignoring unknown argument '{}'", other),
        }
        i += 1;
    }

    Ok(parsed)
}

fn main() -> Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let mut options = match &args.options {
        Some(path) => SimulationOptions::load_or_default(path),
        None => SimulationOptions::default(),
    };
    if let Some(integrator) = args.integrator {
        options.pixel.integrator = integrator;
    }
    options.validate()?;

    let model = build_model(args.size.max(4), options)?;
    log::info!(
        "Model built: {} voxels in cell, {} outside",
        model.geometry().compartments()[0].n_voxels(),
        model.geometry().compartments()[1].n_voxels()
    );

    if args.steady {
        run_steady_state(model, &args)
    } else {
        run_time_series(model, &args)
    }
}
