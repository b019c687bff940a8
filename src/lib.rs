// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

//! An Alternating-Direction Implicit (ADI) solver for incompressible
//! Navier-Stokes flow coupled with heat transport on a 3D Cartesian grid.
//!
//! The fluid domain is carved out of the grid by voxelizing a moving
//! triangulated surface (or a depth raster, or an extruded 2D outline) into
//! typed nodes. Each timestep decomposes the domain into per-axis runs of
//! interior cells, solves a linearized tridiagonal system per run and per
//! unknown (U, V, W, T), and drives the incompressibility residual down with
//! Picard iterations over the three directional half-steps.

#![warn(missing_docs)]

/// Typed errors for the library.
pub mod error;
/// Node grid, rasterization and flood fill.
pub mod grid;
/// Driver-side input loading and result export.
pub mod io;
/// Scalar fields and time layers with finite-difference operators.
pub mod layer;
/// Per-axis interior-run enumeration and partition tagging.
pub mod segments;
/// Moving shape data model and temporal interpolation.
pub mod shape;
/// The ADI time-stepping core.
pub mod solver;
/// Thomas tridiagonal kernel.
pub mod tridiag;

pub use crate::error::{Result, SolverError};
pub use crate::grid::{Grid, NodeType, MISSING_VALUE};
pub use crate::layer::TimeLayer;
pub use crate::solver::{AdiSolver, FluidParams, SolverOptions, TimestepReport};
