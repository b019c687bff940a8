// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use glam::DVec3;
use rayon::prelude::*;

use crate::error::{Result, SolverError};
use crate::grid::{Axis, BcType, Grid, Node, NodeType};
use crate::layer::{TimeLayer, Var};
use crate::segments::{build_segments, Partition, Segment, SegmentLocality};
use crate::tridiag::solve_tridiagonal;

/// Default divergence-error threshold. The error is an L1 sum over interior
/// cells, so large domains usually want a custom value.
pub const DIV_ERR_THRESHOLD: f64 = 0.1;

/// Dimensionless transport coefficients of the fluid.
#[derive(Debug, Clone, Copy)]
pub struct FluidParams {
    /// Momentum (kinematic) viscosity.
    pub v_vis: f64,
    /// Thermal diffusivity.
    pub t_vis: f64,
    /// Thermal buoyancy coefficient applied to the axis-aligned velocity.
    pub v_t: f64,
    /// Dissipation-heating coefficient applied to the temperature equation.
    pub t_phi: f64,
}

impl FluidParams {
    /// Coefficients given directly.
    pub fn new(v_vis: f64, t_vis: f64, v_t: f64, t_phi: f64) -> Self {
        FluidParams {
            v_vis,
            t_vis,
            v_t,
            t_phi,
        }
    }

    /// Coefficients from physical constants: dynamic viscosity, density, the
    /// specific gas constant, thermal conductivity, and specific heat.
    pub fn from_physical(viscosity: f64, density: f64, r_specific: f64, k: f64, cv: f64) -> Self {
        FluidParams {
            v_vis: viscosity / density,
            t_vis: k / (cv * density),
            v_t: r_specific,
            t_phi: viscosity / (cv * density),
        }
    }

    /// Coefficients from the normalized (Re, Pr, lambda) triple.
    pub fn from_normalized(re: f64, pr: f64, lambda: f64) -> Self {
        FluidParams {
            v_vis: 1.0 / re,
            t_vis: 1.0 / (re * pr),
            v_t: lambda,
            t_phi: lambda / re,
        }
    }
}

/// Solver construction options.
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    /// Run the z sweep on transposed twins (stride-1 memory order). Purely
    /// an internal optimization: results are identical either way.
    pub transpose: bool,
    /// Worker thread count; `None` uses all available cores.
    pub threads: Option<usize>,
    /// Divergence-error threshold; exceeding 10x this is fatal.
    pub err_threshold: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            transpose: false,
            threads: None,
            err_threshold: DIV_ERR_THRESHOLD,
        }
    }
}

/// Outcome of one [`AdiSolver::timestep`] call.
#[derive(Debug, Clone, Copy)]
pub struct TimestepReport {
    /// L1 incompressibility residual after the Picard iterations.
    pub div_error: f64,
    /// True when the residual exceeded the threshold (but not 10x it).
    pub div_warning: bool,
    /// Number of tridiagonal systems per unknown this step.
    pub segments: usize,
    /// Total interior unknowns across all systems.
    pub unknowns: usize,
}

/// Per-worker scratch rows for one tridiagonal system.
struct Scratch {
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
    x: Vec<f64>,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Scratch {
            a: vec![0.0; n],
            b: vec![0.0; n],
            c: vec![0.0; n],
            d: vec![0.0; n],
            x: vec![0.0; n],
        }
    }
}

/// Alternating-Direction Implicit solver for incompressible flow with heat
/// transport on a voxelized domain.
///
/// Per timestep: rebuild segments, freeze the non-linear layer, run
/// `num_global` Picard iterations of three half-steps (z, y, x), check the
/// divergence residual, clear exterior cells and rotate the layer pointers.
/// Within a sweep the per-segment systems are independent and are dispatched
/// over a rayon pool; the sweep itself is a barrier.
pub struct AdiSolver {
    dimx: usize,
    dimy: usize,
    dimz: usize,
    base_t: f64,
    params: FluidParams,
    options: SolverOptions,
    partition: Partition,
    pool: rayon::ThreadPool,

    // Layer slots. `cur` is the state at t, `temp` the non-linear freeze,
    // `half`/`next` the sweep targets; `cur`/`next` swap at the end of each
    // step. The `_t` twins hold the transposed copies for the z sweep.
    cur: TimeLayer,
    temp: TimeLayer,
    half: TimeLayer,
    next: TimeLayer,
    cur_t: TimeLayer,
    temp_t: TimeLayer,
    next_t: TimeLayer,
}

impl AdiSolver {
    /// Create a solver sized for the given (already prepared) grid. The
    /// current layer is seeded from the grid's node data, so boundary cells
    /// start at their prescribed values and interior cells at rest.
    pub fn new(grid: &Grid, params: FluidParams, options: SolverOptions) -> Result<Self> {
        let dims = grid.dims();
        let spacing = grid.spacing();
        let twin_dims = (dims.0, dims.2, dims.1);
        let twin_spacing = (spacing.0, spacing.2, spacing.1);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.threads.unwrap_or(0))
            .build()
            .map_err(|e| SolverError::Other(e.to_string()))?;

        let solver = AdiSolver {
            dimx: dims.0,
            dimy: dims.1,
            dimz: dims.2,
            base_t: grid.base_t,
            params,
            options,
            partition: Partition::full(dims.0),
            pool,
            cur: TimeLayer::new(dims, spacing),
            temp: TimeLayer::new(dims, spacing),
            half: TimeLayer::new(dims, spacing),
            next: TimeLayer::new(dims, spacing),
            cur_t: TimeLayer::new(twin_dims, twin_spacing),
            temp_t: TimeLayer::new(twin_dims, twin_spacing),
            next_t: TimeLayer::new(twin_dims, twin_spacing),
        };

        for i in 0..solver.dimx {
            for j in 0..solver.dimy {
                for k in 0..solver.dimz {
                    let node = grid.node(i, j, k);
                    solver.cur.u.set_elem(i, j, k, node.vel.x);
                    solver.cur.v.set_elem(i, j, k, node.vel.y);
                    solver.cur.w.set_elem(i, j, k, node.vel.z);
                    solver.cur.t.set_elem(i, j, k, node.temp);
                }
            }
        }
        solver.cur.copy_to(&solver.next);

        Ok(solver)
    }

    /// The layer holding the state at the current time.
    pub fn cur(&self) -> &TimeLayer {
        &self.cur
    }

    /// Pull prescribed Bound/Valve node data into both the current and the
    /// next layer. Call after every `grid.prepare`.
    pub fn update_boundaries(&self, grid: &Grid) {
        self.cur.copy_from_grid(grid, NodeType::Bound);
        self.cur.copy_from_grid(grid, NodeType::Valve);
        self.cur.copy_to_masked(grid, &self.next, NodeType::Bound);
        self.cur.copy_to_masked(grid, &self.next, NodeType::Valve);
    }

    /// Write the current layer's velocity back into the boundary nodes, so a
    /// moving-grid rebuild starts from the solved wall state.
    pub fn set_grid_boundaries(&self, grid: &mut Grid) {
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    match grid.node_type(i, j, k) {
                        NodeType::Bound | NodeType::Valve => {
                            let vel = DVec3::new(
                                self.cur.u.elem(i, j, k),
                                self.cur.v.elem(i, j, k),
                                self.cur.w.elem(i, j, k),
                            );
                            grid.set_node_vel(i, j, k, vel);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Advance the state by `dt`.
    ///
    /// Runs `num_global` Picard iterations, each sweeping z, y then x with
    /// `num_local` local iterations per direction, then evaluates the
    /// divergence residual and rotates the layer pointers.
    ///
    /// # Errors
    /// `SingularSystem` if a tridiagonal solve breaks down;
    /// `DivergenceBlowUp` if the residual exceeds ten times the threshold.
    pub fn timestep(
        &mut self,
        grid: &Grid,
        dt: f64,
        num_global: usize,
        num_local: usize,
    ) -> Result<TimestepReport> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(SolverError::InvalidTimeStep(dt));
        }

        // The shape moves, so the segment lists are rebuilt every call.
        let segs = build_segments(grid, self.partition);

        // Freeze the non-linear coefficients.
        self.cur.copy_to(&self.temp);
        if self.options.transpose {
            self.cur.transpose_to(&self.cur_t);
        }

        for _ in 0..num_global {
            self.solve_direction(grid, Axis::Z, dt, num_local, &segs.z, SrcSlot::Cur, DstSlot::Next)?;
            self.solve_direction(grid, Axis::Y, dt, num_local, &segs.y, SrcSlot::Next, DstSlot::Half)?;
            self.solve_direction(grid, Axis::X, dt, num_local, &segs.x, SrcSlot::Half, DstSlot::Next)?;
        }

        let div_error = self.next.eval_div_error(grid);
        if div_error > 10.0 * self.options.err_threshold {
            return Err(SolverError::DivergenceBlowUp {
                error: div_error,
                threshold: self.options.err_threshold,
            });
        }
        let div_warning = div_error > self.options.err_threshold;

        // Clear cells for the dynamic grid update.
        self.next
            .clear_masked(grid, NodeType::Out, DVec3::ZERO, self.base_t);

        std::mem::swap(&mut self.cur, &mut self.next);

        Ok(TimestepReport {
            div_error,
            div_warning,
            segments: segs.count(),
            unknowns: segs.total_unknowns(),
        })
    }

    /// Nearest-neighbour resample of the current layer onto a regular output
    /// lattice; exterior cells are written as the missing-value sentinel.
    pub fn export_layer(
        &self,
        grid: &Grid,
        vel: &mut [DVec3],
        temp: &mut [f64],
        outdims: (usize, usize, usize),
    ) {
        self.cur.filter_to_arrays(grid, vel, temp, outdims);
    }

    fn solve_direction(
        &self,
        grid: &Grid,
        dir: Axis,
        dt: f64,
        num_local: usize,
        segs: &[Segment],
        src: SrcSlot,
        dst: DstSlot,
    ) -> Result<()> {
        let src = match src {
            SrcSlot::Cur => &self.cur,
            SrcSlot::Next => &self.next,
            SrcSlot::Half => &self.half,
        };
        let dst = match dst {
            DstSlot::Next => &self.next,
            DstSlot::Half => &self.half,
        };

        if dir == Axis::Z && self.options.transpose {
            // Run the z sweep as a stride-friendly y sweep over the twins.
            // The z direction always reads from `cur`, whose twin was built
            // at the start of the step.
            debug_assert!(std::ptr::eq(src, &self.cur));
            self.temp.transpose_to(&self.temp_t);
            // Seed the twin target from `dst` so cells no z segment touches
            // survive the round trip unchanged.
            dst.transpose_to(&self.next_t);

            let twin_segs: Vec<Segment> = segs.iter().map(transpose_segment).collect();
            for _ in 0..num_local {
                self.sweep(
                    grid,
                    Axis::Y,
                    Axis::Z,
                    true,
                    dt,
                    &twin_segs,
                    &self.cur_t,
                    &self.temp_t,
                    &self.next_t,
                )?;
                self.next_t.merge_to(grid, &self.temp_t, NodeType::In, true);
            }

            self.next_t.transpose_to(dst);
            self.temp_t.transpose_to(&self.temp);
            return Ok(());
        }

        for _ in 0..num_local {
            self.sweep(grid, dir, dir, false, dt, segs, src, &self.temp, dst)?;
            dst.merge_to(grid, &self.temp, NodeType::In, false);
        }
        Ok(())
    }

    /// One bulk-synchronous pass: every segment's four systems solved in
    /// parallel, writing into `dst`. Segments write disjoint interior cells;
    /// cap cells shared by adjacent segments receive the same boundary value.
    #[allow(clippy::too_many_arguments)]
    fn sweep(
        &self,
        grid: &Grid,
        mem_axis: Axis,
        phys_axis: Axis,
        transposed: bool,
        dt: f64,
        segs: &[Segment],
        src: &TimeLayer,
        temp: &TimeLayer,
        dst: &TimeLayer,
    ) -> Result<()> {
        let max_n = segs.iter().map(|s| s.size).max().unwrap_or(0);
        if max_n == 0 {
            return Ok(());
        }
        let params = self.params;

        self.pool.install(|| {
            segs.par_iter().try_for_each_init(
                || Scratch::new(max_n),
                |scratch, seg| {
                    if seg.locality != SegmentLocality::FullyLocal {
                        // Cross-partition systems belong to the multi-device
                        // backend; the single-partition build never sees one.
                        return Ok(());
                    }
                    solve_segment(
                        grid, &params, mem_axis, phys_axis, transposed, dt, seg, src, temp, dst,
                        scratch,
                    )
                },
            )
        })
    }
}

enum SrcSlot {
    Cur,
    Next,
    Half,
}

enum DstSlot {
    Next,
    Half,
}

/// Map a z segment into twin (axes 1<->2 swapped) coordinates.
fn transpose_segment(seg: &Segment) -> Segment {
    Segment {
        pos: [seg.pos[0], seg.pos[2], seg.pos[1]],
        end: [seg.end[0], seg.end[2], seg.end[1]],
        size: seg.size,
        dir: Axis::Y,
        locality: seg.locality,
    }
}

fn var_axis(var: Var) -> Option<Axis> {
    match var {
        Var::U => Some(Axis::X),
        Var::V => Some(Axis::Y),
        Var::W => Some(Axis::Z),
        Var::T => None,
    }
}

fn prescribed(node: &Node, var: Var) -> f64 {
    match var {
        Var::U => node.vel.x,
        Var::V => node.vel.y,
        Var::W => node.vel.z,
        Var::T => node.temp,
    }
}

fn bc_kind(node: &Node, var: Var) -> BcType {
    if var == Var::T {
        node.bc_temp
    } else {
        node.bc_vel
    }
}

/// Build and solve the four tridiagonal systems of one segment, writing the
/// solutions into `dst` along the segment.
#[allow(clippy::too_many_arguments)]
fn solve_segment(
    grid: &Grid,
    params: &FluidParams,
    mem_axis: Axis,
    phys_axis: Axis,
    transposed: bool,
    dt: f64,
    seg: &Segment,
    src: &TimeLayer,
    temp: &TimeLayer,
    dst: &TimeLayer,
    scratch: &mut Scratch,
) -> Result<()> {
    debug_assert_eq!(seg.dir, mem_axis);
    let n = seg.size;
    let step = mem_axis.step();
    let spacing = temp.spacing();
    let dalpha = match mem_axis {
        Axis::X => spacing.0,
        Axis::Y => spacing.1,
        Axis::Z => spacing.2,
    };

    let node0 = grid.node_at(seg.pos[0], seg.pos[1], seg.pos[2], transposed);
    let node1 = grid.node_at(seg.end[0], seg.end[1], seg.end[2], transposed);

    for var in Var::ALL {
        let a = &mut scratch.a[..n];
        let b = &mut scratch.b[..n];
        let c = &mut scratch.c[..n];
        let d = &mut scratch.d[..n];
        let x = &mut scratch.x[..n];

        // Boundary row at the start cap.
        match bc_kind(&node0, var) {
            BcType::Free => {
                // Second-order one-sided extrapolation f0 = 2 f1 - f2.
                b[0] = 2.0;
                c[0] = -1.0;
                d[0] = 0.0;
            }
            BcType::NoSlip => {
                b[0] = 1.0;
                c[0] = 0.0;
                d[0] = prescribed(&node0, var);
            }
        }
        a[0] = 0.0;

        // Boundary row at the end cap.
        match bc_kind(&node1, var) {
            BcType::Free => {
                a[n - 1] = -1.0;
                b[n - 1] = 2.0;
                d[n - 1] = 0.0;
            }
            BcType::NoSlip => {
                a[n - 1] = 0.0;
                b[n - 1] = 1.0;
                d[n - 1] = prescribed(&node1, var);
            }
        }
        c[n - 1] = 0.0;

        let nu = if var == Var::T {
            params.t_vis
        } else {
            params.v_vis
        };
        let beta = nu / (dalpha * dalpha);

        for p in 1..n - 1 {
            let (i, j, k) = (
                seg.pos[0] + p * step[0],
                seg.pos[1] + p * step[1],
                seg.pos[2] + p * step[2],
            );

            let adv = temp.velocity(phys_axis).elem(i, j, k);
            a[p] = -adv / (2.0 * dalpha) - beta;
            b[p] = 3.0 / dt + 2.0 * beta;
            c[p] = adv / (2.0 * dalpha) - beta;

            let base = src.field(var).elem(i, j, k) * 3.0 / dt;
            d[p] = match var {
                Var::T => base + params.t_phi * temp.diss_func(mem_axis, phys_axis, i, j, k),
                _ if var_axis(var) == Some(phys_axis) => {
                    base - params.v_t * temp.t.d(mem_axis, i, j, k)
                }
                _ => base,
            };
        }

        solve_tridiagonal(a, b, c, d, x)?;

        let field = dst.field(var);
        for (p, &value) in x.iter().enumerate() {
            field.set_elem(
                seg.pos[0] + p * step[0],
                seg.pos[1] + p * step[1],
                seg.pos[2] + p * step[2],
                value,
            );
        }
    }

    Ok(())
}
