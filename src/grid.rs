// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::collections::VecDeque;

use glam::{DVec2, DVec3};

use crate::error::{Result, SolverError};
use crate::shape::{blend, blend_2d, cycle_length, frame_at, BoundingBox, Frame, Frame2d};

/// Sentinel written to output buffers for cells outside the fluid domain.
pub const MISSING_VALUE: f64 = -1e10;

const GEOM_EPS: f64 = 1e-10;

/// Classification of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Interior fluid cell (an unknown of the system).
    In,
    /// Exterior cell, excluded from the solve.
    Out,
    /// Boundary cell carrying Dirichlet data.
    Bound,
    /// Boundary cell admitting prescribed in/out flow.
    Valve,
}

/// Boundary-condition kind attached to a boundary cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BcType {
    /// Dirichlet: the prescribed value is imposed exactly.
    NoSlip,
    /// Homogeneous Neumann (no-stress): one-sided extrapolation.
    Free,
}

/// One of the three grid axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// First axis (i).
    X,
    /// Second axis (j).
    Y,
    /// Third axis (k).
    Z,
}

impl Axis {
    /// Unit step along the axis as an index offset.
    #[inline]
    pub fn step(self) -> [usize; 3] {
        match self {
            Axis::X => [1, 0, 0],
            Axis::Y => [0, 1, 0],
            Axis::Z => [0, 0, 1],
        }
    }
}

/// One grid cell: type, boundary-condition kinds, prescribed velocity and
/// temperature. Only Bound and Valve cells carry meaningful BC data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    /// Cell classification.
    pub node_type: NodeType,
    /// Velocity boundary-condition kind.
    pub bc_vel: BcType,
    /// Temperature boundary-condition kind.
    pub bc_temp: BcType,
    /// Prescribed velocity.
    pub vel: DVec3,
    /// Prescribed temperature.
    pub temp: f64,
}

impl Node {
    fn interior(base_t: f64) -> Node {
        Node {
            node_type: NodeType::In,
            bc_vel: BcType::NoSlip,
            bc_temp: BcType::NoSlip,
            vel: DVec3::ZERO,
            temp: base_t,
        }
    }

    fn exterior(base_t: f64) -> Node {
        Node {
            node_type: NodeType::Out,
            ..Node::interior(base_t)
        }
    }

    fn bound(bc_vel: BcType, bc_temp: BcType, vel: DVec3, temp: f64) -> Node {
        Node {
            node_type: NodeType::Bound,
            bc_vel,
            bc_temp,
            vel,
            temp,
        }
    }

    fn valve(bc_vel: BcType, bc_temp: BcType, vel: DVec3, temp: f64) -> Node {
        Node {
            node_type: NodeType::Valve,
            ..Node::bound(bc_vel, bc_temp, vel, temp)
        }
    }
}

/// Sea-floor depth raster: `depth[i * ny + j]` in metres, negative below the
/// sea surface.
#[derive(Debug, Clone)]
pub struct DepthMap {
    /// Samples along the first axis.
    pub nx: usize,
    /// Samples along the second axis.
    pub ny: usize,
    /// Depth values, row-major.
    pub depth: Vec<f64>,
}

impl DepthMap {
    /// Wrap a raw depth raster, checking the sample count.
    pub fn new(nx: usize, ny: usize, depth: Vec<f64>) -> Result<Self> {
        if depth.len() != nx * ny {
            return Err(SolverError::ShapeMismatch {
                expected: vec![nx, ny],
                got: vec![depth.len()],
            });
        }
        Ok(DepthMap { nx, ny, depth })
    }
}

enum Geometry {
    Mesh(Vec<Frame>),
    Extruded(Vec<Frame2d>),
    Depth(#[allow(dead_code)] DepthMap),
    Static,
}

/// 2D scratch cell used while building the extruded variant.
#[derive(Clone, Copy)]
struct Cell2d {
    node_type: NodeType,
    vel: DVec2,
    valve: bool,
}

/// The voxelized computation domain: a dense 3D array of typed nodes carved
/// out of the bounding box of a (possibly moving) geometry.
///
/// `prepare(t)` rewrites every node from the geometry interpolated at time
/// `t`; the grid is immutable during a solver timestep.
pub struct Grid {
    /// Cells along x.
    pub dimx: usize,
    /// Cells along y.
    pub dimy: usize,
    /// Cells along z.
    pub dimz: usize,
    /// Cell spacing along x, in metres.
    pub dx: f64,
    /// Cell spacing along y, in metres.
    pub dy: f64,
    /// Cell spacing along z, in metres.
    pub dz: f64,
    /// Ambient temperature assigned to fresh cells.
    pub base_t: f64,

    bbox: BoundingBox,
    geometry: Geometry,
    nodes: Vec<Node>,
    valve_vel: DVec3,
    wall_bc: BcType,
    active_dimz: usize,
}

fn check_spacing(h: f64) -> Result<f64> {
    if !h.is_finite() || h <= 0.0 {
        return Err(SolverError::InvalidSpacing(h));
    }
    Ok(h)
}

fn check_dims(dims: (usize, usize, usize)) -> Result<()> {
    for (axis, size) in [dims.0, dims.1, dims.2].into_iter().enumerate() {
        if size < 3 {
            return Err(SolverError::InvalidGridShape { axis, size });
        }
    }
    Ok(())
}

fn align32(n: usize) -> usize {
    n.div_ceil(32) * 32
}

impl Grid {
    /// Build a grid from animated triangle-mesh frames.
    ///
    /// The bounding box covers every vertex of every frame; vertex
    /// coordinates are converted to grid units on construction. Call
    /// [`Grid::prepare`] before the first timestep.
    ///
    /// # Errors
    /// Fails on empty animations, invalid spacing, degenerate extents, or
    /// out-of-range triangle indices.
    pub fn from_mesh_frames(
        mut frames: Vec<Frame>,
        spacing: (f64, f64, f64),
        base_t: f64,
        align: bool,
    ) -> Result<Self> {
        let (dx, dy, dz) = spacing;
        check_spacing(dx)?;
        check_spacing(dy)?;
        check_spacing(dz)?;
        if frames.is_empty() {
            return Err(SolverError::NoFrames);
        }
        for frame in &frames {
            for shape in &frame.shapes {
                shape.validate()?;
            }
        }

        let bbox = BoundingBox::from_frames(&frames);
        if !bbox.min.is_finite() || !bbox.max.is_finite() {
            return Err(SolverError::Other(
                "shape animation contains no vertices".to_string(),
            ));
        }

        let mut dimx = ((bbox.max.x - bbox.min.x) / dx).ceil() as usize + 1;
        let mut dimy = ((bbox.max.y - bbox.min.y) / dy).ceil() as usize + 1;
        let mut dimz = ((bbox.max.z - bbox.min.z) / dz).ceil() as usize + 1;
        if align {
            dimx = align32(dimx);
            dimy = align32(dimy);
            dimz = align32(dimz);
        }
        check_dims((dimx, dimy, dimz))?;

        // Convert physical coordinates to grid coordinates.
        for frame in &mut frames {
            for shape in &mut frame.shapes {
                for v in &mut shape.vertices {
                    v.x = (v.x - bbox.min.x) / dx;
                    v.y = (v.y - bbox.min.y) / dy;
                    v.z = (v.z - bbox.min.z) / dz;
                }
            }
        }

        Ok(Grid {
            dimx,
            dimy,
            dimz,
            dx,
            dy,
            dz,
            base_t,
            bbox,
            geometry: Geometry::Mesh(frames),
            nodes: vec![Node::exterior(base_t); dimx * dimy * dimz],
            valve_vel: DVec3::ZERO,
            wall_bc: BcType::NoSlip,
            active_dimz: dimz,
        })
    }

    /// Build a static sea grid from a depth raster.
    ///
    /// Columns with negative depth become fluid, their 6-neighbour shell
    /// becomes no-slip boundary, and the far x/y faces become valve strips
    /// with prescribed velocity `+valve_vel` in the upper half of each column
    /// and `-valve_vel` in the lower half. The node map is built once here;
    /// `prepare` is a no-op for this variant.
    pub fn from_depth_map(
        map: DepthMap,
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        base_t: f64,
        valve_vel: DVec3,
        align: bool,
    ) -> Result<Self> {
        let (dx, dy, dz) = spacing;
        check_spacing(dx)?;
        check_spacing(dy)?;
        check_spacing(dz)?;
        let (mut dimx, mut dimy, mut dimz) = dims;
        if align {
            dimx = align32(dimx);
            dimy = align32(dimy);
            dimz = align32(dimz);
        }
        check_dims((dimx, dimy, dimz))?;

        let z_min = map
            .depth
            .iter()
            .fold(0.0_f64, |acc, &z| acc.min(z))
            - dz;

        let bbox = BoundingBox {
            min: DVec3::new(0.0, 0.0, z_min),
            max: DVec3::new(dimx as f64 * dx, dimy as f64 * dy, 0.0),
        };

        let mut grid = Grid {
            dimx,
            dimy,
            dimz,
            dx,
            dy,
            dz,
            base_t,
            bbox,
            geometry: Geometry::Static,
            nodes: vec![Node::exterior(base_t); dimx * dimy * dimz],
            valve_vel,
            wall_bc: BcType::NoSlip,
            active_dimz: dimz,
        };
        grid.build_depth(&map);
        grid.geometry = Geometry::Depth(map);
        Ok(grid)
    }

    /// Build a grid from animated 2D outline frames, extruded along z to the
    /// given physical depth between two horizontal no-slip walls.
    ///
    /// `bc_noslip` selects the velocity condition on the outline walls:
    /// Dirichlet wall velocity when true, free slip when false.
    pub fn from_outline_frames(
        mut frames: Vec<Frame2d>,
        depth: f64,
        spacing: (f64, f64, f64),
        base_t: f64,
        bc_noslip: bool,
        align: bool,
    ) -> Result<Self> {
        let (dx, dy, dz) = spacing;
        check_spacing(dx)?;
        check_spacing(dy)?;
        check_spacing(dz)?;
        if frames.is_empty() {
            return Err(SolverError::NoFrames);
        }

        let mut min = DVec2::splat(f64::INFINITY);
        let mut max = DVec2::splat(f64::NEG_INFINITY);
        for frame in &frames {
            for outline in &frame.shapes {
                for &p in &outline.points {
                    min = min.min(p);
                    max = max.max(p);
                }
            }
        }
        if !min.is_finite() || !max.is_finite() {
            return Err(SolverError::Other(
                "outline animation contains no points".to_string(),
            ));
        }

        let mut dimx = ((max.x - min.x) / dx).ceil() as usize + 1;
        let mut dimy = ((max.y - min.y) / dy).ceil() as usize + 1;
        let active_dimz = (depth / dz).ceil() as usize + 1;
        let mut dimz = active_dimz;
        if align {
            dimx = align32(dimx);
            dimy = align32(dimy);
            dimz = align32(dimz);
        }
        check_dims((dimx, dimy, dimz))?;
        if active_dimz < 5 {
            return Err(SolverError::InvalidGridShape {
                axis: 2,
                size: active_dimz,
            });
        }

        for frame in &mut frames {
            for outline in &mut frame.shapes {
                for p in &mut outline.points {
                    p.x = (p.x - min.x) / dx;
                    p.y = (p.y - min.y) / dy;
                }
            }
        }

        Ok(Grid {
            dimx,
            dimy,
            dimz,
            dx,
            dy,
            dz,
            base_t,
            bbox: BoundingBox {
                min: DVec3::new(min.x, min.y, 0.0),
                max: DVec3::new(max.x, max.y, depth),
            },
            geometry: Geometry::Extruded(frames),
            nodes: vec![Node::exterior(base_t); dimx * dimy * dimz],
            valve_vel: DVec3::ZERO,
            wall_bc: if bc_noslip { BcType::NoSlip } else { BcType::Free },
            active_dimz,
        })
    }

    /// An unbounded quiescent box: every cell interior. Mainly useful for
    /// tests and benchmarks; there is nothing for `prepare` to rebuild.
    pub fn uniform(dims: (usize, usize, usize), spacing: (f64, f64, f64), base_t: f64) -> Result<Self> {
        Grid::from_node_types(
            dims,
            spacing,
            base_t,
            vec![NodeType::In; dims.0 * dims.1 * dims.2],
        )
    }

    /// Build a static grid from an explicit node-type mask (row-major,
    /// `i * dimy * dimz + j * dimz + k`). Bound and Valve cells get no-slip
    /// conditions with zero velocity at the ambient temperature.
    pub fn from_node_types(
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        base_t: f64,
        types: Vec<NodeType>,
    ) -> Result<Self> {
        let (dimx, dimy, dimz) = dims;
        let (dx, dy, dz) = spacing;
        check_spacing(dx)?;
        check_spacing(dy)?;
        check_spacing(dz)?;
        check_dims(dims)?;
        if types.len() != dimx * dimy * dimz {
            return Err(SolverError::ShapeMismatch {
                expected: vec![dimx, dimy, dimz],
                got: vec![types.len()],
            });
        }

        let nodes = types
            .into_iter()
            .map(|t| match t {
                NodeType::In => Node::interior(base_t),
                NodeType::Out => Node::exterior(base_t),
                NodeType::Bound => {
                    Node::bound(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t)
                }
                NodeType::Valve => {
                    Node::valve(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t)
                }
            })
            .collect();

        Ok(Grid {
            dimx,
            dimy,
            dimz,
            dx,
            dy,
            dz,
            base_t,
            bbox: BoundingBox {
                min: DVec3::ZERO,
                max: DVec3::new(dimx as f64 * dx, dimy as f64 * dy, dimz as f64 * dz),
            },
            geometry: Geometry::Static,
            nodes,
            valve_vel: DVec3::ZERO,
            wall_bc: BcType::NoSlip,
            active_dimz: dimz,
        })
    }

    /// A closed box with no-slip walls and a moving lid: the interior of the
    /// top face (`k = dimz-1`) is a valve strip with prescribed `lid_vel`.
    pub fn lid_cavity(
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        base_t: f64,
        lid_vel: DVec3,
    ) -> Result<Self> {
        let mut grid = Grid::uniform(dims, spacing, base_t)?;
        let (dimx, dimy, dimz) = dims;
        for i in 0..dimx {
            for j in 0..dimy {
                for k in 0..dimz {
                    let on_wall = i == 0
                        || i == dimx - 1
                        || j == 0
                        || j == dimy - 1
                        || k == 0
                        || k == dimz - 1;
                    if !on_wall {
                        continue;
                    }
                    let lid = k == dimz - 1
                        && i > 0
                        && i < dimx - 1
                        && j > 0
                        && j < dimy - 1;
                    let node = if lid {
                        Node::valve(BcType::NoSlip, BcType::NoSlip, lid_vel, base_t)
                    } else {
                        Node::bound(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t)
                    };
                    grid.set_node(i, j, k, node);
                }
            }
        }
        Ok(grid)
    }

    /// A straight duct along x: no-slip walls, prescribed inflow valve on the
    /// `i = 0` face and a free outflow valve on the `i = dimx-1` face.
    pub fn channel(
        dims: (usize, usize, usize),
        spacing: (f64, f64, f64),
        base_t: f64,
        inflow: DVec3,
    ) -> Result<Self> {
        let mut grid = Grid::uniform(dims, spacing, base_t)?;
        let (dimx, dimy, dimz) = dims;
        for i in 0..dimx {
            for j in 0..dimy {
                for k in 0..dimz {
                    let on_wall = i == 0
                        || i == dimx - 1
                        || j == 0
                        || j == dimy - 1
                        || k == 0
                        || k == dimz - 1;
                    if !on_wall {
                        continue;
                    }
                    let on_face_interior =
                        j > 0 && j < dimy - 1 && k > 0 && k < dimz - 1;
                    let node = if i == 0 && on_face_interior {
                        Node::valve(BcType::NoSlip, BcType::NoSlip, inflow, base_t)
                    } else if i == dimx - 1 && on_face_interior {
                        Node::valve(BcType::Free, BcType::Free, DVec3::ZERO, base_t)
                    } else {
                        Node::bound(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t)
                    };
                    grid.set_node(i, j, k, node);
                }
            }
        }
        Ok(grid)
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i * self.dimy * self.dimz + j * self.dimz + k
    }

    /// Grid extents.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.dimx, self.dimy, self.dimz)
    }

    /// Cell spacing.
    pub fn spacing(&self) -> (f64, f64, f64) {
        (self.dx, self.dy, self.dz)
    }

    /// Physical bounding box.
    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// The full node at `(i, j, k)`.
    #[inline]
    pub fn node(&self, i: usize, j: usize, k: usize) -> Node {
        self.nodes[self.index(i, j, k)]
    }

    /// Node lookup with an optional axes-1↔2 swap, for sweeps running on
    /// transposed layers.
    #[inline]
    pub fn node_at(&self, i: usize, j: usize, k: usize, transposed: bool) -> Node {
        if transposed {
            self.node(i, k, j)
        } else {
            self.node(i, j, k)
        }
    }

    /// The cell type at `(i, j, k)`.
    #[inline]
    pub fn node_type(&self, i: usize, j: usize, k: usize) -> NodeType {
        self.nodes[self.index(i, j, k)].node_type
    }

    /// Cell-type lookup with an optional axes-1↔2 swap.
    #[inline]
    pub fn node_type_at(&self, i: usize, j: usize, k: usize, transposed: bool) -> NodeType {
        if transposed {
            self.node_type(i, k, j)
        } else {
            self.node_type(i, j, k)
        }
    }

    fn set_node(&mut self, i: usize, j: usize, k: usize, node: Node) {
        let index = self.index(i, j, k);
        self.nodes[index] = node;
    }

    /// Overwrite the prescribed velocity of one node (the solver writes the
    /// current layer back into boundary nodes after each step).
    pub fn set_node_vel(&mut self, i: usize, j: usize, k: usize, vel: DVec3) {
        let index = self.index(i, j, k);
        self.nodes[index].vel = vel;
    }

    /// Number of animation frames (1 for static variants).
    pub fn frames_num(&self) -> usize {
        match &self.geometry {
            Geometry::Mesh(frames) => frames.len(),
            Geometry::Extruded(frames) => frames.len(),
            _ => 1,
        }
    }

    /// Total duration of one animation cycle in seconds (1.0 for static
    /// variants).
    pub fn cycle_length(&self) -> f64 {
        match &self.geometry {
            Geometry::Mesh(frames) => {
                cycle_length(&frames.iter().map(|f| f.duration).collect::<Vec<_>>())
            }
            Geometry::Extruded(frames) => {
                cycle_length(&frames.iter().map(|f| f.duration).collect::<Vec<_>>())
            }
            _ => 1.0,
        }
    }

    /// Index of the frame active at time `t` (modulo the cycle).
    pub fn frame_index(&self, time: f64) -> usize {
        let durations: Vec<f64> = match &self.geometry {
            Geometry::Mesh(frames) => frames.iter().map(|f| f.duration).collect(),
            Geometry::Extruded(frames) => frames.iter().map(|f| f.duration).collect(),
            _ => return 0,
        };
        frame_at(&durations, time).map(|(f, _)| f).unwrap_or(0)
    }

    /// Time remaining until the next frame boundary.
    pub fn layer_time(&self, time: f64) -> f64 {
        let durations: Vec<f64> = match &self.geometry {
            Geometry::Mesh(frames) => frames.iter().map(|f| f.duration).collect(),
            Geometry::Extruded(frames) => frames.iter().map(|f| f.duration).collect(),
            _ => return 1.0,
        };
        match frame_at(&durations, time) {
            Ok((frame, substep)) => durations[frame] * (1.0 - substep),
            Err(_) => 0.0,
        }
    }

    /// Rebuild the node map from the geometry interpolated at time `t`.
    ///
    /// After this call every cell is exactly one of In/Out/Bound/Valve, and
    /// the Out set is the 6-connected flood-fill region of the corner cell.
    pub fn prepare(&mut self, time: f64) -> Result<()> {
        match &self.geometry {
            Geometry::Mesh(frames) => {
                let durations: Vec<f64> = frames.iter().map(|f| f.duration).collect();
                let (frame, substep) = frame_at(&durations, time)?;
                let subframe = blend(frames, frame, substep);
                self.build_mesh(&subframe);
            }
            Geometry::Extruded(frames) => {
                let durations: Vec<f64> = frames.iter().map(|f| f.duration).collect();
                let (frame, substep) = frame_at(&durations, time)?;
                let subframe = blend_2d(frames, frame, substep);
                self.build_extruded(&subframe);
            }
            // Depth and hand-built grids are time-invariant.
            Geometry::Depth(_) | Geometry::Static => {}
        }
        Ok(())
    }

    // ---- 3D triangle-mesh build ----

    fn build_mesh(&mut self, frame: &Frame) {
        for node in &mut self.nodes {
            *node = Node::interior(self.base_t);
        }

        for shape in &frame.shapes {
            if shape.active {
                continue;
            }
            for tri in &shape.triangles {
                let p = [
                    shape.vertices[tri[0]],
                    shape.vertices[tri[1]],
                    shape.vertices[tri[2]],
                ];
                let v = [
                    shape.velocities[tri[0]],
                    shape.velocities[tri[1]],
                    shape.velocities[tri[2]],
                ];
                self.raster_triangle(p, v);

                // The plane scan misses slivers near steep edges; covering
                // every edge as a 3D line closes the holes.
                self.raster_line(p[0], p[1], v[0], v[1]);
                self.raster_line(p[0], p[2], v[0], v[2]);
                self.raster_line(p[2], p[1], v[2], v[1]);
            }
        }

        self.flood_fill_out();
    }

    /// Scan-convert one triangle into Bound cells via its dominant-axis
    /// projection. Zero-area triangles are skipped.
    fn raster_triangle(&mut self, p: [DVec3; 3], v: [DVec3; 3]) {
        let normal = (p[1] - p[0]).cross(p[2] - p[0]);
        if normal.length() < GEOM_EPS {
            return;
        }
        let n = normal.normalize();
        let d = -p[0].dot(n);

        let (ax, ay, az) = (n.x.abs(), n.y.abs(), n.z.abs());
        let dir = if ax >= ay && ax >= az {
            Axis::X
        } else if ay >= az {
            Axis::Y
        } else {
            Axis::Z
        };

        // Project onto the plane orthogonal to the dominant axis.
        let project = |p: DVec3| match dir {
            Axis::X => DVec2::new(p.y, p.z),
            Axis::Y => DVec2::new(p.x, p.z),
            Axis::Z => DVec2::new(p.x, p.y),
        };
        let n_off = match dir {
            Axis::X => DVec2::new(n.y, n.z),
            Axis::Y => DVec2::new(n.x, n.z),
            Axis::Z => DVec2::new(n.x, n.y),
        };
        let n_dom = match dir {
            Axis::X => n.x,
            Axis::Y => n.y,
            Axis::Z => n.z,
        };

        let mut pts = [(project(p[0]), v[0]), (project(p[1]), v[1]), (project(p[2]), v[2])];
        // Sort by scanline coordinate.
        if pts[2].0.y < pts[1].0.y {
            pts.swap(1, 2);
        }
        if pts[0].0.y > pts[1].0.y {
            pts.swap(0, 1);
        }
        if pts[2].0.y < pts[1].0.y {
            pts.swap(1, 2);
        }
        let (pp1, pp2, pp3) = (pts[0].0, pts[1].0, pts[2].0);
        let tri2d = [pp1, pp2, pp3];
        let vels = [pts[0].1, pts[1].1, pts[2].1];

        // Mid-split: the long edge's intersection at pp2's scanline.
        let mid = intersect_horizon(pp1, pp3, pp2);
        let di: i64 = if mid.x < pp2.x { 1 } else { -1 };

        let mut scan_half = |top: DVec2, from: DVec2, lo: DVec2, hi: DVec2| {
            let delta = top - from;
            let steps = delta.x.abs().max(delta.y.abs()) as i64 + 1;
            let dp = delta / steps as f64;
            let mut p = from;
            while p.y < top.y {
                let j = p.y as i64;
                let last_i = intersect_horizon(lo, hi, p).x as i64;
                let first_i = p.x as i64;
                let count = (last_i - first_i) * di;
                for s in 0..=count.max(0) {
                    let i = first_i + s * di;
                    self.project_on_plane(
                        dir,
                        i,
                        j,
                        DVec2::new(i as f64, p.y),
                        n_off,
                        n_dom,
                        d,
                        &tri2d,
                        &vels,
                    );
                }
                p += dp;
            }
            p
        };

        // Segment (pp1 - mid), bounded by the edge (pp1 - pp2).
        let resumed = scan_half(mid, pp1, pp1, pp2);
        // Segment (mid - pp3), bounded by the edge (pp2 - pp3).
        scan_half(pp3, resumed, pp2, pp3);
    }

    /// Back-project a covered planar cell onto the triangle plane and mark
    /// the hit cell as Bound with the surface velocity.
    #[allow(clippy::too_many_arguments)]
    fn project_on_plane(
        &mut self,
        dir: Axis,
        pi: i64,
        pj: i64,
        testp: DVec2,
        n_off: DVec2,
        n_dom: f64,
        d: f64,
        tri2d: &[DVec2; 3],
        vels: &[DVec3; 3],
    ) {
        let k = ((-d - testp.dot(n_off)) / n_dom).round();
        if k < 0.0 || pi < 0 || pj < 0 {
            return;
        }
        let k = k as usize;
        let (pi, pj) = (pi as usize, pj as usize);

        let (ci, cj, ck) = match dir {
            Axis::X => (k, pi, pj),
            Axis::Y => (pi, k, pj),
            Axis::Z => (pi, pj, k),
        };
        if ci >= self.dimx || cj >= self.dimy || ck >= self.dimz {
            return;
        }

        let vel = barycentric_velocity(tri2d, vels, testp);
        self.set_node(
            ci,
            cj,
            ck,
            Node::bound(BcType::NoSlip, BcType::Free, vel, self.base_t),
        );
    }

    /// Rasterize a 3D line into Bound cells, interpolating the endpoint
    /// velocities along the way.
    fn raster_line(&mut self, p1: DVec3, p2: DVec3, v1: DVec3, v2: DVec3) {
        let delta = p2 - p1;
        let steps = delta.x.abs().max(delta.y.abs()).max(delta.z.abs()) as i64 + 1;
        let dp = delta / steps as f64;
        let dv = (v2 - v1) / steps as f64;

        let mut p = p1;
        let mut v = v1;
        for _ in 0..=steps {
            let (i, j, k) = (p.x as i64, p.y as i64, p.z as i64);
            if i >= 0
                && (i as usize) < self.dimx
                && j >= 0
                && (j as usize) < self.dimy
                && k >= 0
                && (k as usize) < self.dimz
            {
                self.set_node(
                    i as usize,
                    j as usize,
                    k as usize,
                    Node::bound(BcType::NoSlip, BcType::Free, v, self.base_t),
                );
            }
            p += dp;
            v += dv;
        }
    }

    /// Recolor every In cell 6-connected to the corner `(0,0,0)` as Out.
    fn flood_fill_out(&mut self) {
        if self.node_type(0, 0, 0) != NodeType::In {
            return;
        }

        let neighbors: [[i64; 3]; 6] = [
            [-1, 0, 0],
            [1, 0, 0],
            [0, -1, 0],
            [0, 1, 0],
            [0, 0, -1],
            [0, 0, 1],
        ];

        let mut queue = VecDeque::new();
        queue.push_back((0usize, 0usize, 0usize));
        self.set_node(0, 0, 0, Node::exterior(self.base_t));

        while let Some((i, j, k)) = queue.pop_front() {
            for offset in neighbors {
                let ni = i as i64 + offset[0];
                let nj = j as i64 + offset[1];
                let nk = k as i64 + offset[2];
                if ni < 0
                    || nj < 0
                    || nk < 0
                    || ni as usize >= self.dimx
                    || nj as usize >= self.dimy
                    || nk as usize >= self.dimz
                {
                    continue;
                }
                let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
                if self.node_type(ni, nj, nk) == NodeType::In {
                    self.set_node(ni, nj, nk, Node::exterior(self.base_t));
                    queue.push_back((ni, nj, nk));
                }
            }
        }
    }

    // ---- depth-raster build ----

    fn build_depth(&mut self, map: &DepthMap) {
        let base_t = self.base_t;
        for node in &mut self.nodes {
            *node = Node::exterior(base_t);
        }
        let z_min = self.bbox.min.z;
        if z_min >= 0.0 {
            return;
        }

        // Fill sea columns.
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                let di = i * map.nx / self.dimx;
                let dj = j * map.ny / self.dimy;
                let z = map.depth[di * map.ny + dj];
                if z < 0.0 {
                    let bound_k = (self.dimz as f64 * z / z_min) as usize;
                    for k in 1..bound_k.min(self.dimz) {
                        self.set_node(i, j, k, Node::interior(base_t));
                    }
                }
            }
        }

        // No-slip shell around the fluid.
        for i in 1..self.dimx - 1 {
            for j in 1..self.dimy - 1 {
                for k in 1..self.dimz - 1 {
                    if self.node_type(i, j, k) != NodeType::In {
                        continue;
                    }
                    let touches_out = self.node_type(i - 1, j, k) == NodeType::Out
                        || self.node_type(i + 1, j, k) == NodeType::Out
                        || self.node_type(i, j - 1, k) == NodeType::Out
                        || self.node_type(i, j + 1, k) == NodeType::Out
                        || self.node_type(i, j, k - 1) == NodeType::Out
                        || self.node_type(i, j, k + 1) == NodeType::Out;
                    if touches_out {
                        self.set_node(
                            i,
                            j,
                            k,
                            Node::bound(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t),
                        );
                    }
                }
            }
        }

        // Close the shell from the outside; collected first so the pass does
        // not cascade through freshly converted cells.
        let mut closing = Vec::new();
        for i in 1..self.dimx - 1 {
            for j in 1..self.dimy - 1 {
                for k in 1..self.dimz - 1 {
                    if self.node_type(i, j, k) != NodeType::Out {
                        continue;
                    }
                    let touches_bound = self.node_type(i - 1, j, k) == NodeType::Bound
                        || self.node_type(i + 1, j, k) == NodeType::Bound
                        || self.node_type(i, j - 1, k) == NodeType::Bound
                        || self.node_type(i, j + 1, k) == NodeType::Bound
                        || self.node_type(i, j, k - 1) == NodeType::Bound
                        || self.node_type(i, j, k + 1) == NodeType::Bound;
                    if touches_bound {
                        closing.push((i, j, k));
                    }
                }
            }
        }
        for (i, j, k) in closing {
            self.set_node(
                i,
                j,
                k,
                Node::bound(BcType::NoSlip, BcType::NoSlip, DVec3::ZERO, base_t),
            );
        }

        // Prescribed in/out streams on the far faces: upper half of each
        // column flows in, lower half flows out.
        let valve_vel = self.valve_vel;
        for i in 0..self.dimx {
            self.valve_column(|grid, k| (i, grid.dimy - 1, k), valve_vel);
        }
        for j in 0..self.dimy {
            self.valve_column(|grid, k| (grid.dimx - 1, j, k), valve_vel);
        }
    }

    fn valve_column<F>(&mut self, cell: F, valve_vel: DVec3)
    where
        F: Fn(&Grid, usize) -> (usize, usize, usize),
    {
        let mut start: i64 = -1;
        let mut end: i64 = -1;
        for k in 0..self.dimz {
            let (i, j, kk) = cell(self, k);
            if self.node_type(i, j, kk) == NodeType::In {
                if start < 0 {
                    start = k as i64;
                }
                end = k as i64;
            }
        }
        if start < 0 {
            return;
        }
        let pivot = (start + end) / 2;
        for k in 0..self.dimz {
            let (i, j, kk) = cell(self, k);
            if self.node_type(i, j, kk) == NodeType::In {
                let vel = if (k as i64) < pivot {
                    valve_vel
                } else {
                    -valve_vel
                };
                self.set_node(
                    i,
                    j,
                    kk,
                    Node::valve(BcType::NoSlip, BcType::NoSlip, vel, self.base_t),
                );
            }
        }
    }

    // ---- extruded 2D build ----

    fn build_extruded(&mut self, frame: &Frame2d) {
        let mut cells = vec![
            Cell2d {
                node_type: NodeType::In,
                vel: DVec2::ZERO,
                valve: false,
            };
            self.dimx * self.dimy
        ];

        for outline in &frame.shapes {
            for pair in 0..outline.points.len().saturating_sub(1) {
                raster_line_2d(
                    &mut cells,
                    self.dimx,
                    self.dimy,
                    outline.points[pair],
                    outline.points[pair + 1],
                    outline.velocities[pair],
                    outline.velocities[pair + 1],
                    outline.valve,
                );
            }
        }

        flood_fill_2d(&mut cells, self.dimx, self.dimy);

        let base_t = self.base_t;
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                let cell = cells[i * self.dimy + j];
                if cell.node_type == NodeType::Out {
                    for k in 0..self.dimz {
                        self.set_node(i, j, k, Node::exterior(base_t));
                    }
                    continue;
                }

                // Floor and ceiling caps.
                self.set_node(i, j, 0, Node::exterior(base_t));
                for k in self.active_dimz - 1..self.dimz {
                    self.set_node(i, j, k, Node::exterior(base_t));
                }
                self.set_node(
                    i,
                    j,
                    1,
                    Node::bound(BcType::NoSlip, BcType::Free, DVec3::ZERO, base_t),
                );
                self.set_node(
                    i,
                    j,
                    self.active_dimz - 2,
                    Node::bound(BcType::NoSlip, BcType::Free, DVec3::ZERO, base_t),
                );

                let vel3 = DVec3::new(cell.vel.x, cell.vel.y, 0.0);
                for k in 2..self.active_dimz - 2 {
                    let node = match (cell.node_type, cell.valve) {
                        (NodeType::Bound, true) => {
                            if cell.vel.length_squared() < GEOM_EPS * GEOM_EPS {
                                Node::valve(BcType::Free, BcType::Free, vel3, base_t)
                            } else {
                                Node::valve(BcType::NoSlip, BcType::NoSlip, vel3, base_t)
                            }
                        }
                        (NodeType::Bound, false) => {
                            Node::bound(self.wall_bc, BcType::Free, vel3, base_t)
                        }
                        _ => Node::interior(base_t),
                    };
                    self.set_node(i, j, k, node);
                }
            }
        }
    }

    /// ASCII dump of the node types, one z-slice per block: ' ' interior,
    /// '.' exterior, '#' boundary, '+' valve.
    pub fn types_dump(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("{} {} {}\n", self.dimx, self.dimy, self.dimz));
        for k in 0..self.dimz {
            out.push_str(&format!("{}\n", k));
            for i in 0..self.dimx {
                for j in 0..self.dimy {
                    out.push(match self.node_type(i, j, k) {
                        NodeType::In => ' ',
                        NodeType::Out => '.',
                        NodeType::Bound => '#',
                        NodeType::Valve => '+',
                    });
                }
                out.push('\n');
            }
        }
        out
    }
}

/// Intersection of the segment `(p1, p2)` with the horizontal line through
/// `p`; degenerate (horizontal) segments return `p` itself.
fn intersect_horizon(p1: DVec2, p2: DVec2, p: DVec2) -> DVec2 {
    if (p1.y - p2.y).abs() < GEOM_EPS {
        return p;
    }
    DVec2::new(p1.x + (p2.x - p1.x) * (p.y - p1.y) / (p2.y - p1.y), p.y)
}

/// Velocity at a planar point by barycentric interpolation over the projected
/// triangle; degenerate projections fall back to the first vertex.
fn barycentric_velocity(tri: &[DVec2; 3], vels: &[DVec3; 3], p: DVec2) -> DVec3 {
    let v0 = tri[1] - tri[0];
    let v1 = tri[2] - tri[0];
    let v2 = p - tri[0];
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < GEOM_EPS {
        return vels[0];
    }
    let wb = (d11 * d20 - d01 * d21) / denom;
    let wc = (d00 * d21 - d01 * d20) / denom;
    let wa = 1.0 - wb - wc;
    vels[0] * wa + vels[1] * wb + vels[2] * wc
}

#[allow(clippy::too_many_arguments)]
fn raster_line_2d(
    cells: &mut [Cell2d],
    dimx: usize,
    dimy: usize,
    p1: DVec2,
    p2: DVec2,
    v1: DVec2,
    v2: DVec2,
    valve: bool,
) {
    let delta = p2 - p1;
    let steps = delta.x.abs().max(delta.y.abs()) as i64 + 1;
    let dp = delta / steps as f64;
    let dv = (v2 - v1) / steps as f64;

    let mut p = p1;
    let mut v = v1;
    for _ in 0..=steps {
        let (i, j) = (p.x as i64, p.y as i64);
        if i >= 0 && (i as usize) < dimx && j >= 0 && (j as usize) < dimy {
            cells[i as usize * dimy + j as usize] = Cell2d {
                node_type: NodeType::Bound,
                vel: v,
                valve,
            };
        }
        p += dp;
        v += dv;
    }
}

fn flood_fill_2d(cells: &mut [Cell2d], dimx: usize, dimy: usize) {
    if cells[0].node_type != NodeType::In {
        return;
    }
    let mut queue = VecDeque::new();
    queue.push_back((0usize, 0usize));
    cells[0].node_type = NodeType::Out;

    while let Some((i, j)) = queue.pop_front() {
        let neighbors: [(i64, i64); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
        for (di, dj) in neighbors {
            let ni = i as i64 + di;
            let nj = j as i64 + dj;
            if ni < 0 || nj < 0 || ni as usize >= dimx || nj as usize >= dimy {
                continue;
            }
            let (ni, nj) = (ni as usize, nj as usize);
            if cells[ni * dimy + nj].node_type == NodeType::In {
                cells[ni * dimy + nj].node_type = NodeType::Out;
                queue.push_back((ni, nj));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Shape;

    /// Closed axis-aligned cube as 12 triangles, lo..hi in physical units.
    pub(crate) fn cube_shape(lo: DVec3, hi: DVec3, vel: DVec3) -> Shape {
        let vertices = vec![
            DVec3::new(lo.x, lo.y, lo.z),
            DVec3::new(hi.x, lo.y, lo.z),
            DVec3::new(hi.x, hi.y, lo.z),
            DVec3::new(lo.x, hi.y, lo.z),
            DVec3::new(lo.x, lo.y, hi.z),
            DVec3::new(hi.x, lo.y, hi.z),
            DVec3::new(hi.x, hi.y, hi.z),
            DVec3::new(lo.x, hi.y, hi.z),
        ];
        let triangles = vec![
            [0, 1, 2],
            [0, 2, 3],
            [4, 6, 5],
            [4, 7, 6],
            [0, 5, 1],
            [0, 4, 5],
            [3, 2, 6],
            [3, 6, 7],
            [0, 3, 7],
            [0, 7, 4],
            [1, 5, 6],
            [1, 6, 2],
        ];
        Shape {
            velocities: vec![vel; vertices.len()],
            vertices,
            triangles,
            active: false,
        }
    }

    fn cube_grid() -> Grid {
        // Two frames so the bounding box is wider than either cube and the
        // corner cell stays outside the shape.
        let frame0 = Frame {
            shapes: vec![cube_shape(
                DVec3::new(0.2, 0.2, 0.2),
                DVec3::new(0.6, 0.6, 0.6),
                DVec3::ZERO,
            )],
            duration: 0.5,
        };
        let frame1 = Frame {
            shapes: vec![cube_shape(
                DVec3::new(0.0, 0.2, 0.2),
                DVec3::new(0.4, 0.6, 0.6),
                DVec3::ZERO,
            )],
            duration: 0.5,
        };
        Grid::from_mesh_frames(vec![frame0, frame1], (0.1, 0.1, 0.1), 300.0, false).unwrap()
    }

    #[test]
    fn mesh_prepare_classifies_every_cell() {
        let mut grid = cube_grid();
        grid.prepare(0.0).unwrap();

        let mut counts = [0usize; 4];
        for i in 0..grid.dimx {
            for j in 0..grid.dimy {
                for k in 0..grid.dimz {
                    match grid.node_type(i, j, k) {
                        NodeType::In => counts[0] += 1,
                        NodeType::Out => counts[1] += 1,
                        NodeType::Bound => counts[2] += 1,
                        NodeType::Valve => counts[3] += 1,
                    }
                }
            }
        }
        assert!(counts[0] > 0, "no interior cells");
        assert!(counts[1] > 0, "no exterior cells");
        assert!(counts[2] > 0, "no boundary cells");
        assert_eq!(counts[3], 0);
        assert_eq!(
            counts.iter().sum::<usize>(),
            grid.dimx * grid.dimy * grid.dimz
        );
    }

    #[test]
    fn mesh_interior_is_sealed() {
        let mut grid = cube_grid();
        grid.prepare(0.0).unwrap();

        // A closed manifold separates inside from outside: no In cell may
        // touch an Out cell.
        for i in 1..grid.dimx - 1 {
            for j in 1..grid.dimy - 1 {
                for k in 1..grid.dimz - 1 {
                    if grid.node_type(i, j, k) != NodeType::In {
                        continue;
                    }
                    for (di, dj, dk) in [
                        (-1i64, 0i64, 0i64),
                        (1, 0, 0),
                        (0, -1, 0),
                        (0, 1, 0),
                        (0, 0, -1),
                        (0, 0, 1),
                    ] {
                        let t = grid.node_type(
                            (i as i64 + di) as usize,
                            (j as i64 + dj) as usize,
                            (k as i64 + dk) as usize,
                        );
                        assert_ne!(t, NodeType::Out, "leak at ({}, {}, {})", i, j, k);
                    }
                }
            }
        }
    }

    #[test]
    fn mesh_prepare_cycle_endpoints_agree() {
        let mut grid = cube_grid();
        grid.prepare(0.0).unwrap();
        let before: Vec<NodeType> = grid.nodes.iter().map(|n| n.node_type).collect();

        grid.prepare(grid.cycle_length()).unwrap();
        let after: Vec<NodeType> = grid.nodes.iter().map(|n| n.node_type).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn mesh_out_set_is_corner_connected() {
        let mut grid = cube_grid();
        grid.prepare(0.25).unwrap();

        // Re-run a reference fill over non-Bound cells from the corner; every
        // Out cell must be reached.
        let mut reached = vec![false; grid.nodes.len()];
        let mut queue = VecDeque::new();
        assert_eq!(grid.node_type(0, 0, 0), NodeType::Out);
        reached[0] = true;
        queue.push_back((0usize, 0usize, 0usize));
        while let Some((i, j, k)) = queue.pop_front() {
            for (di, dj, dk) in [
                (-1i64, 0i64, 0i64),
                (1, 0, 0),
                (0, -1, 0),
                (0, 1, 0),
                (0, 0, -1),
                (0, 0, 1),
            ] {
                let (ni, nj, nk) = (i as i64 + di, j as i64 + dj, k as i64 + dk);
                if ni < 0
                    || nj < 0
                    || nk < 0
                    || ni as usize >= grid.dimx
                    || nj as usize >= grid.dimy
                    || nk as usize >= grid.dimz
                {
                    continue;
                }
                let (ni, nj, nk) = (ni as usize, nj as usize, nk as usize);
                let index = ni * grid.dimy * grid.dimz + nj * grid.dimz + nk;
                if !reached[index] && grid.node_type(ni, nj, nk) == NodeType::Out {
                    reached[index] = true;
                    queue.push_back((ni, nj, nk));
                }
            }
        }
        for i in 0..grid.dimx {
            for j in 0..grid.dimy {
                for k in 0..grid.dimz {
                    if grid.node_type(i, j, k) == NodeType::Out {
                        let index = i * grid.dimy * grid.dimz + j * grid.dimz + k;
                        assert!(reached[index], "disconnected Out at ({}, {}, {})", i, j, k);
                    }
                }
            }
        }
    }

    #[test]
    fn moving_boundary_records_surface_velocity() {
        let vel = DVec3::new(0.5, 0.0, 0.0);
        let frame0 = Frame {
            shapes: vec![cube_shape(
                DVec3::new(0.2, 0.2, 0.2),
                DVec3::new(0.6, 0.6, 0.6),
                vel,
            )],
            duration: 0.5,
        };
        let frame1 = Frame {
            shapes: vec![cube_shape(
                DVec3::new(0.0, 0.2, 0.2),
                DVec3::new(0.4, 0.6, 0.6),
                vel,
            )],
            duration: 0.5,
        };
        let mut grid =
            Grid::from_mesh_frames(vec![frame0, frame1], (0.1, 0.1, 0.1), 300.0, false).unwrap();
        grid.prepare(0.0).unwrap();

        let mut checked = 0;
        for i in 0..grid.dimx {
            for j in 0..grid.dimy {
                for k in 0..grid.dimz {
                    let node = grid.node(i, j, k);
                    if node.node_type == NodeType::Bound {
                        assert!((node.vel - vel).length() < 1e-9);
                        assert_eq!(node.bc_vel, BcType::NoSlip);
                        assert_eq!(node.bc_temp, BcType::Free);
                        checked += 1;
                    }
                }
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn depth_map_sea_columns() {
        // Deep basin in the middle, land at the rim.
        let (nx, ny) = (8, 8);
        let mut depth = vec![1.0; nx * ny];
        for i in 2..6 {
            for j in 2..6 {
                depth[i * ny + j] = -100.0;
            }
        }
        let map = DepthMap::new(nx, ny, depth).unwrap();
        let grid = Grid::from_depth_map(
            map,
            (8, 8, 8),
            (1.0, 1.0, 1.0),
            300.0,
            DVec3::new(0.1, 0.0, 0.0),
            false,
        )
        .unwrap();

        let mut have_in = false;
        let mut have_bound = false;
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    match grid.node_type(i, j, k) {
                        NodeType::In => have_in = true,
                        NodeType::Bound => have_bound = true,
                        _ => {}
                    }
                }
            }
        }
        assert!(have_in);
        assert!(have_bound);
        // Land columns stay exterior.
        assert_eq!(grid.node_type(0, 0, 3), NodeType::Out);
    }

    #[test]
    fn depth_map_valve_split() {
        // Sea everywhere: the far faces carry valves, upper half +v and
        // lower half -v around the truncated midpoint.
        let (nx, ny) = (6, 6);
        let map = DepthMap::new(nx, ny, vec![-50.0; nx * ny]).unwrap();
        let v_in = DVec3::new(0.25, 0.0, 0.0);
        let grid = Grid::from_depth_map(
            map,
            (6, 6, 10),
            (1.0, 1.0, 1.0),
            300.0,
            v_in,
            false,
        )
        .unwrap();

        let j = grid.dimy - 1;
        let mut start = None;
        let mut end = 0;
        for k in 0..grid.dimz {
            if grid.node_type(2, j, k) == NodeType::Valve {
                if start.is_none() {
                    start = Some(k);
                }
                end = k;
            }
        }
        let start = start.expect("no valve cells on the far face");
        let pivot = (start + end) / 2;
        for k in start..=end {
            if grid.node_type(2, j, k) != NodeType::Valve {
                continue;
            }
            let expect = if k < pivot { v_in } else { -v_in };
            assert_eq!(grid.node(2, j, k).vel, expect, "k = {}", k);
        }
    }

    #[test]
    fn extruded_outline_box() {
        use crate::shape::Outline;
        // A closed square outline, extruded.
        let square = vec![
            DVec2::new(0.0, 0.0),
            DVec2::new(0.5, 0.0),
            DVec2::new(0.5, 0.5),
            DVec2::new(0.0, 0.5),
            DVec2::new(0.0, 0.0),
        ];
        let frame = Frame2d {
            shapes: vec![Outline {
                velocities: vec![DVec2::ZERO; square.len()],
                points: square,
                valve: false,
            }],
            duration: 1.0,
        };
        let mut grid =
            Grid::from_outline_frames(vec![frame], 0.8, (0.1, 0.1, 0.1), 300.0, true, false)
                .unwrap();
        grid.prepare(0.0).unwrap();

        // Floor cap is exterior, the wall above it is a boundary, and the
        // middle of the box is interior.
        let (ci, cj) = (grid.dimx / 2, grid.dimy / 2);
        assert_eq!(grid.node_type(ci, cj, 0), NodeType::Out);
        assert_eq!(grid.node_type(ci, cj, 1), NodeType::Bound);
        assert_eq!(grid.node_type(ci, cj, grid.active_dimz / 2), NodeType::In);
        // The outline column itself is boundary at mid-height.
        assert_eq!(grid.node_type(0, 0, grid.active_dimz / 2), NodeType::Bound);
    }

    #[test]
    fn lid_cavity_layout() {
        let grid = Grid::lid_cavity(
            (8, 8, 8),
            (1.0, 1.0, 1.0),
            300.0,
            DVec3::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        assert_eq!(grid.node_type(4, 4, 7), NodeType::Valve);
        assert_eq!(grid.node(4, 4, 7).vel, DVec3::new(1.0, 0.0, 0.0));
        assert_eq!(grid.node_type(0, 4, 7), NodeType::Bound);
        assert_eq!(grid.node_type(4, 4, 0), NodeType::Bound);
        assert_eq!(grid.node_type(4, 4, 4), NodeType::In);
    }

    #[test]
    fn from_node_types_rejects_bad_length() {
        let result = Grid::from_node_types(
            (4, 4, 4),
            (1.0, 1.0, 1.0),
            300.0,
            vec![NodeType::In; 63],
        );
        assert!(matches!(result, Err(SolverError::ShapeMismatch { .. })));
    }

    #[test]
    fn invalid_spacing_rejected() {
        let result = Grid::uniform((4, 4, 4), (0.0, 1.0, 1.0), 300.0);
        assert!(matches!(result, Err(SolverError::InvalidSpacing(_))));
    }

    #[test]
    fn types_dump_shape() {
        let grid = Grid::uniform((3, 3, 3), (1.0, 1.0, 1.0), 300.0).unwrap();
        let dump = grid.types_dump();
        assert!(dump.starts_with("3 3 3\n"));
        assert!(dump.contains("\n0\n"));
    }

    #[test]
    fn frame_bookkeeping() {
        let grid = cube_grid();
        assert_eq!(grid.frames_num(), 2);
        assert!((grid.cycle_length() - 1.0).abs() < 1e-12);
        assert_eq!(grid.frame_index(0.1), 0);
        assert_eq!(grid.frame_index(0.6), 1);
        // 0.6 is 0.1 into the second 0.5 s frame.
        assert!((grid.layer_time(0.6) - 0.4).abs() < 1e-12);

        let fixed = Grid::uniform((4, 4, 4), (1.0, 1.0, 1.0), 300.0).unwrap();
        assert_eq!(fixed.frames_num(), 1);
        assert_eq!(fixed.frame_index(3.7), 0);
    }

    #[test]
    fn align_rounds_dimensions() {
        let frame = Frame {
            shapes: vec![cube_shape(
                DVec3::ZERO,
                DVec3::new(1.0, 1.0, 1.0),
                DVec3::ZERO,
            )],
            duration: 1.0,
        };
        let grid = Grid::from_mesh_frames(vec![frame], (0.1, 0.1, 0.1), 300.0, true).unwrap();
        assert_eq!(grid.dimx % 32, 0);
        assert_eq!(grid.dimy % 32, 0);
        assert_eq!(grid.dimz % 32, 0);
    }
}
