// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::path::Path;

use glam::{DVec2, DVec3};
use ndarray::{Array2, Array4};

use crate::error::{Result, SolverError};
use crate::grid::DepthMap;
use crate::shape::{Frame, Frame2d, Outline, Shape};

/// Animated meshes are authored at 75 fps.
const MESH_FRAME_DURATION: f64 = 1.0 / 75.0;

/// Shape files store coordinates in millimetres.
const MM_TO_M: f64 = 1e-3;

struct Tokens<'a> {
    iter: std::str::SplitWhitespace<'a>,
    consumed: usize,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Tokens {
            iter: text.split_whitespace(),
            consumed: 0,
        }
    }

    fn next(&mut self) -> Result<&'a str> {
        self.consumed += 1;
        self.iter.next().ok_or_else(|| {
            SolverError::MalformedShapeFile(format!(
                "unexpected end of file at token {}",
                self.consumed
            ))
        })
    }

    fn next_usize(&mut self) -> Result<usize> {
        let token = self.next()?;
        token.parse::<usize>().map_err(|_| {
            SolverError::MalformedShapeFile(format!(
                "expected integer, got '{}' (token {})",
                token, self.consumed
            ))
        })
    }

    fn next_f64(&mut self) -> Result<f64> {
        let token = self.next()?;
        // Some exporters write decimal commas.
        let token = token.replace(',', ".");
        token.parse::<f64>().map_err(|_| {
            SolverError::MalformedShapeFile(format!(
                "expected number, got '{}' (token {})",
                token, self.consumed
            ))
        })
    }
}

/// Load animated triangle-mesh frames from a text file.
///
/// Format: `frame_count`, then per frame `vertex_count`, `vertex_count`
/// lines of six numbers (position in millimetres, velocity in m/s), then
/// `triangle_count` and `triangle_count` index triples. Frames run at a
/// fixed 75 fps.
pub fn load_mesh_frames(path: &Path) -> Result<Vec<Frame>> {
    let text = std::fs::read_to_string(path)?;
    let mut tokens = Tokens::new(&text);

    let num_frames = tokens.next_usize()?;
    if num_frames == 0 {
        return Err(SolverError::NoFrames);
    }

    let mut frames = Vec::with_capacity(num_frames);
    for _ in 0..num_frames {
        let vert_count = tokens.next_usize()?;
        let mut vertices = Vec::with_capacity(vert_count);
        let mut velocities = Vec::with_capacity(vert_count);
        for _ in 0..vert_count {
            let px = tokens.next_f64()?;
            let py = tokens.next_f64()?;
            let pz = tokens.next_f64()?;
            let vx = tokens.next_f64()?;
            let vy = tokens.next_f64()?;
            let vz = tokens.next_f64()?;
            vertices.push(DVec3::new(px, py, pz) * MM_TO_M);
            velocities.push(DVec3::new(vx, vy, vz));
        }

        let tri_count = tokens.next_usize()?;
        let mut triangles = Vec::with_capacity(tri_count);
        for _ in 0..tri_count {
            let i = tokens.next_usize()?;
            let j = tokens.next_usize()?;
            let k = tokens.next_usize()?;
            triangles.push([i, j, k]);
        }

        let shape = Shape {
            vertices,
            velocities,
            triangles,
            active: false,
        };
        shape.validate()?;

        frames.push(Frame {
            shapes: vec![shape],
            duration: MESH_FRAME_DURATION,
        });
    }

    Ok(frames)
}

/// Load animated 2D outline frames from a text file.
///
/// Format: `frame_count`, then per frame `duration`, `shape_count`, and per
/// shape `point_count`, `point_count` coordinate pairs (millimetres), and a
/// tag: `M vx vy` (prescribed motion, mm/s), `V vx vy` (valve), or `S`
/// (static). Static outlines get their velocities derived from consecutive
/// frame positions.
pub fn load_outline_frames(path: &Path) -> Result<Vec<Frame2d>> {
    let text = std::fs::read_to_string(path)?;
    let mut tokens = Tokens::new(&text);

    let num_frames = tokens.next_usize()?;
    if num_frames == 0 {
        return Err(SolverError::NoFrames);
    }

    let mut frames = Vec::with_capacity(num_frames);
    let mut prescribed: Vec<Vec<bool>> = Vec::with_capacity(num_frames);

    for _ in 0..num_frames {
        let duration = tokens.next_f64()?;
        let shape_count = tokens.next_usize()?;
        let mut shapes = Vec::with_capacity(shape_count);
        let mut tags = Vec::with_capacity(shape_count);

        for _ in 0..shape_count {
            let point_count = tokens.next_usize()?;
            let mut points = Vec::with_capacity(point_count);
            for _ in 0..point_count {
                let x = tokens.next_f64()?;
                let y = tokens.next_f64()?;
                points.push(DVec2::new(x, y) * MM_TO_M);
            }

            let tag = tokens.next()?;
            let (vel, valve, is_prescribed) = match tag {
                "M" => {
                    let vx = tokens.next_f64()?;
                    let vy = tokens.next_f64()?;
                    (DVec2::new(vx, vy) * MM_TO_M, false, true)
                }
                "V" => {
                    let vx = tokens.next_f64()?;
                    let vy = tokens.next_f64()?;
                    (DVec2::new(vx, vy) * MM_TO_M, true, true)
                }
                "S" => (DVec2::ZERO, false, false),
                other => {
                    return Err(SolverError::MalformedShapeFile(format!(
                        "unknown outline tag '{}'",
                        other
                    )))
                }
            };

            shapes.push(Outline {
                velocities: vec![vel; points.len()],
                points,
                valve,
            });
            tags.push(is_prescribed);
        }

        frames.push(Frame2d { shapes, duration });
        prescribed.push(tags);
    }

    derive_border_velocities(&mut frames, &prescribed)?;
    Ok(frames)
}

/// Velocities of untagged outlines come from the displacement toward the
/// next frame, divided by the frame duration.
fn derive_border_velocities(frames: &mut [Frame2d], prescribed: &[Vec<bool>]) -> Result<()> {
    let n = frames.len();
    for f in 0..n {
        let next = (f + 1) % n;
        if frames[f].shapes.len() != frames[next].shapes.len() {
            return Err(SolverError::MalformedShapeFile(
                "frames disagree on shape count".to_string(),
            ));
        }
        let m = 1.0 / frames[f].duration;
        for s in 0..frames[f].shapes.len() {
            if prescribed[f][s] {
                continue;
            }
            if frames[f].shapes[s].points.len() != frames[next].shapes[s].points.len() {
                return Err(SolverError::MalformedShapeFile(
                    "frames disagree on outline point count".to_string(),
                ));
            }
            for p in 0..frames[f].shapes[s].points.len() {
                let velocity = (frames[next].shapes[s].points[p] - frames[f].shapes[s].points[p]) * m;
                frames[next].shapes[s].velocities[p] = velocity;
            }
        }
    }
    Ok(())
}

/// Load a sea-floor depth raster from a 2D `.npy` array (f64, or f32
/// promoted), metres, negative below sea level.
pub fn load_depth_map(path: &Path) -> Result<DepthMap> {
    let arr: Array2<f64> = match ndarray_npy::read_npy(path) {
        Ok(a) => a,
        Err(_) => {
            // Try f32 and promote.
            let arr32: Array2<f32> = ndarray_npy::read_npy(path)
                .map_err(|e| SolverError::UnsupportedDtype(format!("{}", e)))?;
            arr32.mapv(|v| v as f64)
        }
    };
    let (nx, ny) = arr.dim();
    let depth: Vec<f64> = arr.as_standard_layout().iter().copied().collect();
    DepthMap::new(nx, ny, depth)
}

/// Save one exported frame as a `(outdimx, outdimy, outdimz, 4)` `.npy`
/// array holding U, V, W, T.
pub fn save_frame(
    path: &Path,
    vel: &[DVec3],
    temp: &[f64],
    outdims: (usize, usize, usize),
) -> Result<()> {
    let (dimx, dimy, dimz) = outdims;
    if vel.len() != dimx * dimy * dimz || temp.len() != vel.len() {
        return Err(SolverError::ShapeMismatch {
            expected: vec![dimx, dimy, dimz],
            got: vec![vel.len(), temp.len()],
        });
    }

    let arr = Array4::from_shape_fn((dimx, dimy, dimz, 4), |(i, j, k, c)| {
        let index = i * dimy * dimz + j * dimz + k;
        match c {
            0 => vel[index].x,
            1 => vel[index].y,
            2 => vel[index].z,
            _ => temp[index],
        }
    });

    ndarray_npy::write_npy(path, &arr)
        .map_err(|e| SolverError::Other(format!("npy write error: {}", e)))?;
    Ok(())
}

/// Read a frame written by [`save_frame`] back into velocity and temperature
/// buffers.
pub fn load_frame(path: &Path, outdims: (usize, usize, usize)) -> Result<(Vec<DVec3>, Vec<f64>)> {
    let (dimx, dimy, dimz) = outdims;
    let arr: Array4<f64> = ndarray_npy::read_npy(path)
        .map_err(|e| SolverError::UnsupportedDtype(format!("{}", e)))?;
    if arr.dim() != (dimx, dimy, dimz, 4) {
        return Err(SolverError::ShapeMismatch {
            expected: vec![dimx, dimy, dimz, 4],
            got: arr.shape().to_vec(),
        });
    }

    let mut vel = vec![DVec3::ZERO; dimx * dimy * dimz];
    let mut temp = vec![0.0; dimx * dimy * dimz];
    for i in 0..dimx {
        for j in 0..dimy {
            for k in 0..dimz {
                let index = i * dimy * dimz + j * dimz + k;
                vel[index] = DVec3::new(arr[(i, j, k, 0)], arr[(i, j, k, 1)], arr[(i, j, k, 2)]);
                temp[index] = arr[(i, j, k, 3)];
            }
        }
    }
    Ok((vel, temp))
}
