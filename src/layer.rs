// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::atomic::{AtomicU64, Ordering};

use glam::DVec3;

use crate::grid::{Axis, Grid, NodeType, MISSING_VALUE};

/// Which of the four unknown fields a solve operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    /// x-velocity.
    U,
    /// y-velocity.
    V,
    /// z-velocity.
    W,
    /// Temperature.
    T,
}

impl Var {
    /// All four unknowns, in solve order.
    pub const ALL: [Var; 4] = [Var::U, Var::V, Var::W, Var::T];
}

/// A dense scalar field over the grid.
///
/// Values are f64 bits in atomic storage so that per-segment solver workers
/// can write their slices concurrently without locks; all accesses are
/// relaxed loads/stores of whole values.
pub struct ScalarField {
    dimx: usize,
    dimy: usize,
    dimz: usize,
    dx: f64,
    dy: f64,
    dz: f64,
    data: Box<[AtomicU64]>,
}

impl ScalarField {
    /// A zero-filled field of the given extents and spacing.
    pub fn new(dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Self {
        let (dimx, dimy, dimz) = dims;
        let data: Box<[AtomicU64]> = (0..dimx * dimy * dimz)
            .map(|_| AtomicU64::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        ScalarField {
            dimx,
            dimy,
            dimz,
            dx: spacing.0,
            dy: spacing.1,
            dz: spacing.2,
            data,
        }
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        i * self.dimy * self.dimz + j * self.dimz + k
    }

    /// Value at `(i, j, k)`.
    #[inline]
    pub fn elem(&self, i: usize, j: usize, k: usize) -> f64 {
        f64::from_bits(self.data[self.index(i, j, k)].load(Ordering::Relaxed))
    }

    /// Store a value at `(i, j, k)`.
    #[inline]
    pub fn set_elem(&self, i: usize, j: usize, k: usize, value: f64) {
        self.data[self.index(i, j, k)].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Centered first difference along x.
    #[inline]
    pub fn d_x(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i + 1, j, k) - self.elem(i - 1, j, k)) / (2.0 * self.dx)
    }

    /// Centered first difference along y.
    #[inline]
    pub fn d_y(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i, j + 1, k) - self.elem(i, j - 1, k)) / (2.0 * self.dy)
    }

    /// Centered first difference along z.
    #[inline]
    pub fn d_z(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i, j, k + 1) - self.elem(i, j, k - 1)) / (2.0 * self.dz)
    }

    /// Centered first difference along the given axis.
    #[inline]
    pub fn d(&self, axis: Axis, i: usize, j: usize, k: usize) -> f64 {
        match axis {
            Axis::X => self.d_x(i, j, k),
            Axis::Y => self.d_y(i, j, k),
            Axis::Z => self.d_z(i, j, k),
        }
    }

    /// Centered second difference along x.
    #[inline]
    pub fn d2_x(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i + 1, j, k) - 2.0 * self.elem(i, j, k) + self.elem(i - 1, j, k))
            / (self.dx * self.dx)
    }

    /// Centered second difference along y.
    #[inline]
    pub fn d2_y(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i, j + 1, k) - 2.0 * self.elem(i, j, k) + self.elem(i, j - 1, k))
            / (self.dy * self.dy)
    }

    /// Centered second difference along z.
    #[inline]
    pub fn d2_z(&self, i: usize, j: usize, k: usize) -> f64 {
        (self.elem(i, j, k + 1) - 2.0 * self.elem(i, j, k) + self.elem(i, j, k - 1))
            / (self.dz * self.dz)
    }
}

/// The four scalar unknowns (U, V, W, T) over one time level, plus cached
/// spacing. Layers are preallocated once and rotated between the solver's
/// slots; every mutation goes through `&self` atomic stores so sweeps can
/// share layers across workers.
pub struct TimeLayer {
    /// x-velocity.
    pub u: ScalarField,
    /// y-velocity.
    pub v: ScalarField,
    /// z-velocity.
    pub w: ScalarField,
    /// Temperature.
    pub t: ScalarField,
    dimx: usize,
    dimy: usize,
    dimz: usize,
    dx: f64,
    dy: f64,
    dz: f64,
}

impl TimeLayer {
    /// A zero-filled layer.
    pub fn new(dims: (usize, usize, usize), spacing: (f64, f64, f64)) -> Self {
        TimeLayer {
            u: ScalarField::new(dims, spacing),
            v: ScalarField::new(dims, spacing),
            w: ScalarField::new(dims, spacing),
            t: ScalarField::new(dims, spacing),
            dimx: dims.0,
            dimy: dims.1,
            dimz: dims.2,
            dx: spacing.0,
            dy: spacing.1,
            dz: spacing.2,
        }
    }

    /// Layer extents.
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.dimx, self.dimy, self.dimz)
    }

    /// Cell spacing.
    pub fn spacing(&self) -> (f64, f64, f64) {
        (self.dx, self.dy, self.dz)
    }

    /// The field holding one of the four unknowns.
    #[inline]
    pub fn field(&self, var: Var) -> &ScalarField {
        match var {
            Var::U => &self.u,
            Var::V => &self.v,
            Var::W => &self.w,
            Var::T => &self.t,
        }
    }

    /// Velocity component along an axis.
    #[inline]
    pub fn velocity(&self, axis: Axis) -> &ScalarField {
        match axis {
            Axis::X => &self.u,
            Axis::Y => &self.v,
            Axis::Z => &self.w,
        }
    }

    /// Copy every value of every field into `dest`.
    pub fn copy_to(&self, dest: &TimeLayer) {
        debug_assert_eq!(self.dims(), dest.dims());
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    dest.u.set_elem(i, j, k, self.u.elem(i, j, k));
                    dest.v.set_elem(i, j, k, self.v.elem(i, j, k));
                    dest.w.set_elem(i, j, k, self.w.elem(i, j, k));
                    dest.t.set_elem(i, j, k, self.t.elem(i, j, k));
                }
            }
        }
    }

    /// Relaxation merge: `dest := (dest + self) / 2` on cells of the given
    /// type. With `transposed` the mask is looked up with axes 1 and 2
    /// swapped (both layers live in transposed storage).
    pub fn merge_to(&self, grid: &Grid, dest: &TimeLayer, mask: NodeType, transposed: bool) {
        debug_assert_eq!(self.dims(), dest.dims());
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    if grid.node_type_at(i, j, k, transposed) != mask {
                        continue;
                    }
                    dest.u
                        .set_elem(i, j, k, (dest.u.elem(i, j, k) + self.u.elem(i, j, k)) / 2.0);
                    dest.v
                        .set_elem(i, j, k, (dest.v.elem(i, j, k) + self.v.elem(i, j, k)) / 2.0);
                    dest.w
                        .set_elem(i, j, k, (dest.w.elem(i, j, k) + self.w.elem(i, j, k)) / 2.0);
                    dest.t
                        .set_elem(i, j, k, (dest.t.elem(i, j, k) + self.t.elem(i, j, k)) / 2.0);
                }
            }
        }
    }

    /// Pull prescribed node data into the fields on cells of the given type.
    pub fn copy_from_grid(&self, grid: &Grid, mask: NodeType) {
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    let node = grid.node(i, j, k);
                    if node.node_type != mask {
                        continue;
                    }
                    self.u.set_elem(i, j, k, node.vel.x);
                    self.v.set_elem(i, j, k, node.vel.y);
                    self.w.set_elem(i, j, k, node.vel.z);
                    self.t.set_elem(i, j, k, node.temp);
                }
            }
        }
    }

    /// Copy values into `dest` on cells of the given type only.
    pub fn copy_to_masked(&self, grid: &Grid, dest: &TimeLayer, mask: NodeType) {
        debug_assert_eq!(self.dims(), dest.dims());
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    if grid.node_type(i, j, k) != mask {
                        continue;
                    }
                    dest.u.set_elem(i, j, k, self.u.elem(i, j, k));
                    dest.v.set_elem(i, j, k, self.v.elem(i, j, k));
                    dest.w.set_elem(i, j, k, self.w.elem(i, j, k));
                    dest.t.set_elem(i, j, k, self.t.elem(i, j, k));
                }
            }
        }
    }

    /// Reset cells of the given type to a fixed velocity and temperature.
    pub fn clear_masked(&self, grid: &Grid, mask: NodeType, vel: DVec3, temp: f64) {
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    if grid.node_type(i, j, k) != mask {
                        continue;
                    }
                    self.u.set_elem(i, j, k, vel.x);
                    self.v.set_elem(i, j, k, vel.y);
                    self.w.set_elem(i, j, k, vel.z);
                    self.t.set_elem(i, j, k, temp);
                }
            }
        }
    }

    /// Out-of-place transpose swapping axes 1 and 2:
    /// `dest[i, k, j] = self[i, j, k]` for every field.
    pub fn transpose_to(&self, dest: &TimeLayer) {
        debug_assert_eq!(
            (self.dimx, self.dimz, self.dimy),
            dest.dims(),
            "transpose target must have swapped extents"
        );
        for i in 0..self.dimx {
            for j in 0..self.dimy {
                for k in 0..self.dimz {
                    dest.u.set_elem(i, k, j, self.u.elem(i, j, k));
                    dest.v.set_elem(i, k, j, self.v.elem(i, j, k));
                    dest.w.set_elem(i, k, j, self.w.elem(i, j, k));
                    dest.t.set_elem(i, k, j, self.t.elem(i, j, k));
                }
            }
        }
    }

    /// Dissipation function: the sum of squared strain components along the
    /// memory axis, with the component matching the physical axis doubled.
    /// For an untransposed sweep the two axes coincide and this reduces to
    /// `DissFuncX = 2 (d_x U)^2 + (d_x V)^2 + (d_x W)^2` and its cyclic
    /// permutations.
    #[inline]
    pub fn diss_func(&self, mem_axis: Axis, phys_axis: Axis, i: usize, j: usize, k: usize) -> f64 {
        let du = self.u.d(mem_axis, i, j, k);
        let dv = self.v.d(mem_axis, i, j, k);
        let dw = self.w.d(mem_axis, i, j, k);
        let doubled = match phys_axis {
            Axis::X => du,
            Axis::Y => dv,
            Axis::Z => dw,
        };
        du * du + dv * dv + dw * dw + doubled * doubled
    }

    /// L1 incompressibility residual: the sum of `|dU/dx + dV/dy + dW/dz|`
    /// over interior In cells.
    pub fn eval_div_error(&self, grid: &Grid) -> f64 {
        let mut sum = 0.0;
        for i in 1..self.dimx - 1 {
            for j in 1..self.dimy - 1 {
                for k in 1..self.dimz - 1 {
                    if grid.node_type(i, j, k) != NodeType::In {
                        continue;
                    }
                    let div = self.u.d_x(i, j, k) + self.v.d_y(i, j, k) + self.w.d_z(i, j, k);
                    sum += div.abs();
                }
            }
        }
        sum
    }

    /// Nearest-neighbour resample onto a regular output lattice, writing
    /// exterior cells as [`MISSING_VALUE`]. The output buffers are laid out
    /// `oi * outdimy * outdimz + oj * outdimz + ok`.
    pub fn filter_to_arrays(
        &self,
        grid: &Grid,
        vel: &mut [DVec3],
        temp: &mut [f64],
        outdims: (usize, usize, usize),
    ) {
        let (outdimx, outdimy, outdimz) = outdims;
        debug_assert!(vel.len() >= outdimx * outdimy * outdimz);
        debug_assert!(temp.len() >= outdimx * outdimy * outdimz);
        for oi in 0..outdimx {
            let i = oi * self.dimx / outdimx;
            for oj in 0..outdimy {
                let j = oj * self.dimy / outdimy;
                for ok in 0..outdimz {
                    let k = ok * self.dimz / outdimz;
                    let out = oi * outdimy * outdimz + oj * outdimz + ok;
                    if grid.node_type(i, j, k) == NodeType::Out {
                        vel[out] = DVec3::splat(MISSING_VALUE);
                        temp[out] = MISSING_VALUE;
                    } else {
                        vel[out] = DVec3::new(
                            self.u.elem(i, j, k),
                            self.v.elem(i, j, k),
                            self.w.elem(i, j, k),
                        );
                        temp[out] = self.t.elem(i, j, k);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    fn linear_layer(dims: (usize, usize, usize)) -> TimeLayer {
        let layer = TimeLayer::new(dims, (1.0, 1.0, 1.0));
        for i in 0..dims.0 {
            for j in 0..dims.1 {
                for k in 0..dims.2 {
                    layer.u.set_elem(i, j, k, 2.0 * i as f64);
                    layer.v.set_elem(i, j, k, 3.0 * j as f64);
                    layer.w.set_elem(i, j, k, 4.0 * k as f64);
                    layer
                        .t
                        .set_elem(i, j, k, i as f64 + 10.0 * j as f64 + 100.0 * k as f64);
                }
            }
        }
        layer
    }

    #[test]
    fn elem_roundtrip() {
        let field = ScalarField::new((3, 4, 5), (1.0, 1.0, 1.0));
        field.set_elem(2, 3, 4, -7.5);
        assert_eq!(field.elem(2, 3, 4), -7.5);
        assert_eq!(field.elem(0, 0, 0), 0.0);
    }

    #[test]
    fn centered_differences_on_linear_field() {
        let layer = linear_layer((5, 5, 5));
        assert!((layer.u.d_x(2, 2, 2) - 2.0).abs() < 1e-12);
        assert!((layer.v.d_y(2, 2, 2) - 3.0).abs() < 1e-12);
        assert!((layer.w.d_z(2, 2, 2) - 4.0).abs() < 1e-12);
        // Second differences of a linear field vanish.
        assert!(layer.t.d2_x(2, 2, 2).abs() < 1e-12);
        assert!(layer.t.d2_y(2, 2, 2).abs() < 1e-12);
        assert!(layer.t.d2_z(2, 2, 2).abs() < 1e-12);
    }

    #[test]
    fn spacing_scales_differences() {
        let field = ScalarField::new((5, 3, 3), (0.5, 1.0, 1.0));
        for i in 0..5 {
            field.set_elem(i, 1, 1, i as f64);
        }
        // du/dx = 1 per index step over dx = 0.5.
        assert!((field.d_x(2, 1, 1) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn transpose_round_trip() {
        let layer = linear_layer((3, 4, 5));
        let twin = TimeLayer::new((3, 5, 4), (1.0, 1.0, 1.0));
        let back = TimeLayer::new((3, 4, 5), (1.0, 1.0, 1.0));

        layer.transpose_to(&twin);
        twin.transpose_to(&back);

        for i in 0..3 {
            for j in 0..4 {
                for k in 0..5 {
                    assert_eq!(layer.u.elem(i, j, k), back.u.elem(i, j, k));
                    assert_eq!(layer.t.elem(i, j, k), back.t.elem(i, j, k));
                    assert_eq!(layer.t.elem(i, j, k), twin.t.elem(i, k, j));
                }
            }
        }
    }

    #[test]
    fn merge_halves_toward_source() {
        let grid = Grid::uniform((3, 3, 3), (1.0, 1.0, 1.0), 0.0).unwrap();
        let a = TimeLayer::new((3, 3, 3), (1.0, 1.0, 1.0));
        let b = TimeLayer::new((3, 3, 3), (1.0, 1.0, 1.0));
        a.u.set_elem(1, 1, 1, 4.0);
        b.u.set_elem(1, 1, 1, 2.0);

        a.merge_to(&grid, &b, NodeType::In, false);
        assert_eq!(b.u.elem(1, 1, 1), 3.0);
        // Source untouched.
        assert_eq!(a.u.elem(1, 1, 1), 4.0);
    }

    #[test]
    fn merge_respects_mask() {
        let mut types = vec![NodeType::Out; 27];
        types[13] = NodeType::In; // (1,1,1)
        let grid = Grid::from_node_types((3, 3, 3), (1.0, 1.0, 1.0), 0.0, types).unwrap();
        let a = TimeLayer::new((3, 3, 3), (1.0, 1.0, 1.0));
        let b = TimeLayer::new((3, 3, 3), (1.0, 1.0, 1.0));
        a.t.set_elem(0, 0, 0, 8.0);
        a.t.set_elem(1, 1, 1, 8.0);

        a.merge_to(&grid, &b, NodeType::In, false);
        assert_eq!(b.t.elem(1, 1, 1), 4.0);
        assert_eq!(b.t.elem(0, 0, 0), 0.0);
    }

    #[test]
    fn div_error_zero_on_uniform_flow() {
        let grid = Grid::uniform((5, 5, 5), (1.0, 1.0, 1.0), 0.0).unwrap();
        let layer = TimeLayer::new((5, 5, 5), (1.0, 1.0, 1.0));
        for i in 0..5 {
            for j in 0..5 {
                for k in 0..5 {
                    layer.u.set_elem(i, j, k, 1.5);
                }
            }
        }
        assert_eq!(layer.eval_div_error(&grid), 0.0);
    }

    #[test]
    fn div_error_counts_expansion() {
        let grid = Grid::uniform((3, 3, 3), (1.0, 1.0, 1.0), 0.0).unwrap();
        let layer = TimeLayer::new((3, 3, 3), (1.0, 1.0, 1.0));
        // u = x: dU/dx = 1 at the single interior cell.
        for i in 0..3 {
            for j in 0..3 {
                for k in 0..3 {
                    layer.u.set_elem(i, j, k, i as f64);
                }
            }
        }
        assert!((layer.eval_div_error(&grid) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn diss_func_doubles_aligned_component() {
        let layer = linear_layer((5, 5, 5));
        // d_x U = 2, d_x V = 0, d_x W = 0 -> DissFuncX = 2 * 4 = 8.
        assert!((layer.diss_func(Axis::X, Axis::X, 2, 2, 2) - 8.0).abs() < 1e-12);
        // d_y V = 3 -> DissFuncY = 2 * 9 = 18.
        assert!((layer.diss_func(Axis::Y, Axis::Y, 2, 2, 2) - 18.0).abs() < 1e-12);
    }

    #[test]
    fn copy_from_grid_pulls_boundary_values() {
        let grid = Grid::lid_cavity(
            (4, 4, 4),
            (1.0, 1.0, 1.0),
            250.0,
            DVec3::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        let layer = TimeLayer::new((4, 4, 4), (1.0, 1.0, 1.0));
        layer.copy_from_grid(&grid, NodeType::Valve);
        layer.copy_from_grid(&grid, NodeType::Bound);

        assert_eq!(layer.u.elem(1, 1, 3), 1.0); // lid
        assert_eq!(layer.u.elem(0, 1, 1), 0.0); // wall
        assert_eq!(layer.t.elem(0, 1, 1), 250.0);
        assert_eq!(layer.t.elem(1, 1, 1), 0.0); // interior untouched
    }

    #[test]
    fn filter_masks_exterior() {
        let mut types = vec![NodeType::In; 27];
        types[0] = NodeType::Out; // (0,0,0)
        let grid = Grid::from_node_types((3, 3, 3), (1.0, 1.0, 1.0), 0.0, types).unwrap();
        let layer = linear_layer((3, 3, 3));

        let mut vel = vec![DVec3::ZERO; 27];
        let mut temp = vec![0.0; 27];
        layer.filter_to_arrays(&grid, &mut vel, &mut temp, (3, 3, 3));

        assert_eq!(temp[0], MISSING_VALUE);
        assert_eq!(vel[0].x, MISSING_VALUE);
        let idx = 9 + 3 + 1; // (1, 1, 1)
        assert_eq!(temp[idx], 1.0 + 10.0 + 100.0);
        assert_eq!(vel[idx], DVec3::new(2.0, 3.0, 4.0));
    }
}
