// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use glam::DVec3;

use adi_flow::grid::Grid;
use adi_flow::io;
use adi_flow::solver::{AdiSolver, FluidParams, SolverOptions};

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum GeomFormat {
    /// Animated 3D triangle mesh (text frames).
    Mesh,
    /// Animated 2D outlines extruded along z (text frames).
    Outline,
    /// Static sea-floor depth raster (.npy).
    Depth,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum SolverKind {
    Explicit,
    Adi,
    Stable,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum BcKind {
    NoSlip,
    Free,
}

#[derive(Parser)]
#[command(name = "adi-flow", about = "ADI Navier-Stokes + heat solver on voxelized geometry")]
struct Cli {
    /// Input geometry file
    #[arg(short = 'i', long)]
    input: PathBuf,

    /// Geometry format
    #[arg(short = 'f', long, value_enum)]
    format: GeomFormat,

    /// Output file prefix (frames written as <prefix>_NNNN.npy)
    #[arg(short = 'o', long, default_value = "out")]
    output: PathBuf,

    /// Time-integration scheme (only ADI is implemented)
    #[arg(long, value_enum, default_value = "adi")]
    solver: SolverKind,

    /// Cell size along x, metres
    #[arg(long, default_value = "0.01")]
    dx: f64,

    /// Cell size along y, metres
    #[arg(long, default_value = "0.01")]
    dy: f64,

    /// Cell size along z, metres
    #[arg(long, default_value = "0.01")]
    dz: f64,

    /// Extrusion depth for the outline format, metres
    #[arg(long, default_value = "0.1")]
    depth: f64,

    /// Number of z layers for the depth format
    #[arg(long, default_value = "32")]
    depth_layers: usize,

    /// Base temperature, Kelvin
    #[arg(long, default_value = "300.0")]
    base_t: f64,

    /// Velocity condition on outline walls
    #[arg(long, value_enum, default_value = "no-slip")]
    bc_type: BcKind,

    /// Dynamic viscosity (physical parameter set)
    #[arg(long, default_value = "0.05")]
    viscosity: f64,

    /// Density (physical parameter set)
    #[arg(long, default_value = "1000.0")]
    density: f64,

    /// Specific gas constant (physical parameter set)
    #[arg(long, default_value = "461.495")]
    r_specific: f64,

    /// Thermal conductivity (physical parameter set)
    #[arg(long, default_value = "0.6")]
    k: f64,

    /// Specific heat capacity (physical parameter set)
    #[arg(long, default_value = "4200.0")]
    cv: f64,

    /// Reynolds number; with --pr and --lambda selects normalized parameters
    #[arg(long)]
    re: Option<f64>,

    /// Prandtl number (normalized parameter set)
    #[arg(long)]
    pr: Option<f64>,

    /// Buoyancy coefficient (normalized parameter set)
    #[arg(long)]
    lambda: Option<f64>,

    /// Inflow velocity for the depth format, comma-separated m/s
    #[arg(long, default_value = "0.1,0,0")]
    valve_vel: String,

    /// Number of animation cycles to simulate
    #[arg(long, default_value = "1")]
    cycles: usize,

    /// Computation substeps per frame
    #[arg(long, default_value = "50")]
    calc_subframes: usize,

    /// Write a result frame every this many substeps
    #[arg(long, default_value = "10")]
    out_subframes: usize,

    /// Output lattice size along x
    #[arg(long, default_value = "50")]
    outdimx: usize,

    /// Output lattice size along y
    #[arg(long, default_value = "50")]
    outdimy: usize,

    /// Output lattice size along z
    #[arg(long, default_value = "50")]
    outdimz: usize,

    /// Picard iterations per timestep
    #[arg(long, default_value = "2")]
    num_global: usize,

    /// Local iterations per directional sweep
    #[arg(long, default_value = "1")]
    num_local: usize,

    /// Worker thread count (default: all cores)
    #[arg(long)]
    threads: Option<usize>,

    /// Run the z sweep on transposed twins
    #[arg(long)]
    transpose: bool,

    /// Round grid dimensions up to multiples of 32
    #[arg(long)]
    align: bool,

    /// Divergence-error threshold (L1 sum; 10x is fatal)
    #[arg(long, default_value = "0.1")]
    err_threshold: f64,

    /// Dump the voxelized node types to stderr after the first prepare
    #[arg(long)]
    print_grid: bool,
}

fn parse_vec3(s: &str) -> Result<DVec3> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("invalid vector: expected comma-separated floats")?;
    if parts.len() != 3 {
        bail!("expected 3 components, got {}", parts.len());
    }
    Ok(DVec3::new(parts[0], parts[1], parts[2]))
}

fn build_grid(cli: &Cli) -> Result<Grid> {
    let spacing = (cli.dx, cli.dy, cli.dz);
    let grid = match cli.format {
        GeomFormat::Mesh => {
            let frames =
                io::load_mesh_frames(&cli.input).map_err(|e| anyhow::anyhow!("{}", e))?;
            Grid::from_mesh_frames(frames, spacing, cli.base_t, cli.align)
                .map_err(|e| anyhow::anyhow!("{}", e))?
        }
        GeomFormat::Outline => {
            let frames =
                io::load_outline_frames(&cli.input).map_err(|e| anyhow::anyhow!("{}", e))?;
            Grid::from_outline_frames(
                frames,
                cli.depth,
                spacing,
                cli.base_t,
                cli.bc_type == BcKind::NoSlip,
                cli.align,
            )
            .map_err(|e| anyhow::anyhow!("{}", e))?
        }
        GeomFormat::Depth => {
            let map = io::load_depth_map(&cli.input).map_err(|e| anyhow::anyhow!("{}", e))?;
            let dims = (map.nx, map.ny, cli.depth_layers);
            let valve_vel = parse_vec3(&cli.valve_vel)?;
            Grid::from_depth_map(map, dims, spacing, cli.base_t, valve_vel, cli.align)
                .map_err(|e| anyhow::anyhow!("{}", e))?
        }
    };
    Ok(grid)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.solver {
        SolverKind::Explicit => bail!("the Explicit solver is not implemented"),
        SolverKind::Stable => bail!("the Stable solver is not implemented"),
        SolverKind::Adi => {}
    }
    if cli.calc_subframes == 0 || cli.out_subframes == 0 {
        bail!("--calc-subframes and --out-subframes must be positive");
    }

    let mut grid = build_grid(&cli)?;
    grid.prepare(0.0).map_err(|e| anyhow::anyhow!("{}", e))?;
    eprintln!("grid = {} x {} x {}", grid.dimx, grid.dimy, grid.dimz);
    if cli.print_grid {
        eprintln!("{}", grid.types_dump());
    }

    let params = match (cli.re, cli.pr, cli.lambda) {
        (Some(re), Some(pr), Some(lambda)) => FluidParams::from_normalized(re, pr, lambda),
        (None, None, None) => FluidParams::from_physical(
            cli.viscosity,
            cli.density,
            cli.r_specific,
            cli.k,
            cli.cv,
        ),
        _ => bail!("--re, --pr and --lambda must be given together"),
    };

    let options = SolverOptions {
        transpose: cli.transpose,
        threads: cli.threads,
        err_threshold: cli.err_threshold,
    };
    let mut solver =
        AdiSolver::new(&grid, params, options).map_err(|e| anyhow::anyhow!("{}", e))?;

    let frames = grid.frames_num();
    let length = grid.cycle_length();
    let dt = length / (frames * cli.calc_subframes) as f64;
    let finaltime = length * cli.cycles as f64;
    let outdims = (cli.outdimx, cli.outdimy, cli.outdimz);

    let mut res_vel = vec![DVec3::ZERO; cli.outdimx * cli.outdimy * cli.outdimz];
    let mut res_t = vec![0.0_f64; cli.outdimx * cli.outdimy * cli.outdimz];

    let start = Instant::now();
    let mut t = dt;
    let mut substep: usize = 0;
    let mut last_frame: i64 = -1;
    let mut out_index: usize = 0;

    while t < finaltime {
        let frame = grid.frame_index(t) as i64;
        if frame != last_frame {
            last_frame = frame;
            substep = 0;
        }

        grid.prepare(t).map_err(|e| anyhow::anyhow!("{}", e))?;
        solver.update_boundaries(&grid);
        let report = solver
            .timestep(&grid, dt, cli.num_global, cli.num_local)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        solver.set_grid_boundaries(&mut grid);

        eprintln!(
            "[{:.1}s] frame {} substep {} err = {:.8}{}",
            start.elapsed().as_secs_f64(),
            frame,
            substep,
            report.div_error,
            if report.div_warning { " (warning)" } else { "" },
        );

        if substep % cli.out_subframes == 0 {
            solver.export_layer(&grid, &mut res_vel, &mut res_t, outdims);
            let path = cli
                .output
                .with_file_name(format!(
                    "{}_{:04}.npy",
                    cli.output
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "out".to_string()),
                    out_index
                ));
            io::save_frame(&path, &res_vel, &res_t, outdims)
                .map_err(|e| anyhow::anyhow!("{}", e))?;
            out_index += 1;
        }

        t += dt;
        substep += 1;
    }

    eprintln!("total time: {:.2} sec", start.elapsed().as_secs_f64());
    Ok(())
}
