// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use glam::{DVec2, DVec3};

use crate::error::{Result, SolverError};

/// A triangulated moving surface with per-vertex position and velocity.
#[derive(Debug, Clone)]
pub struct Shape {
    /// Vertex positions.
    pub vertices: Vec<DVec3>,
    /// Per-vertex velocities.
    pub velocities: Vec<DVec3>,
    /// Triangles as vertex-index triples.
    pub triangles: Vec<[usize; 3]>,
    /// Active shapes are skipped during rasterization.
    pub active: bool,
}

impl Shape {
    /// Check that triangle indices stay inside the vertex table and that the
    /// velocity table matches the vertex table.
    pub fn validate(&self) -> Result<()> {
        if self.velocities.len() != self.vertices.len() {
            return Err(SolverError::ShapeMismatch {
                expected: vec![self.vertices.len()],
                got: vec![self.velocities.len()],
            });
        }
        for tri in &self.triangles {
            for &index in tri {
                if index >= self.vertices.len() {
                    return Err(SolverError::VertexIndexOutOfRange {
                        index,
                        count: self.vertices.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One animation frame: a set of shapes and its duration in seconds.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Shapes present during this frame.
    pub shapes: Vec<Shape>,
    /// Frame duration in seconds.
    pub duration: f64,
}

/// A closed 2D polyline with per-point velocities, for the extruded variant.
#[derive(Debug, Clone)]
pub struct Outline {
    /// Polyline points.
    pub points: Vec<DVec2>,
    /// Per-point velocities.
    pub velocities: Vec<DVec2>,
    /// Valve outlines admit prescribed in/out flow instead of a wall.
    pub valve: bool,
}

/// One 2D animation frame.
#[derive(Debug, Clone)]
pub struct Frame2d {
    /// Outlines present during this frame.
    pub shapes: Vec<Outline>,
    /// Frame duration in seconds.
    pub duration: f64,
}

/// Axis-aligned bounding box in physical units.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    /// Minimum corner.
    pub min: DVec3,
    /// Maximum corner.
    pub max: DVec3,
}

impl BoundingBox {
    /// An empty box that any added point will replace.
    pub fn empty() -> Self {
        BoundingBox {
            min: DVec3::splat(f64::INFINITY),
            max: DVec3::splat(f64::NEG_INFINITY),
        }
    }

    /// Grow the box to contain `p`.
    pub fn add_point(&mut self, p: DVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Bounding box of every vertex in every frame.
    pub fn from_frames(frames: &[Frame]) -> Self {
        let mut bbox = BoundingBox::empty();
        for frame in frames {
            for shape in &frame.shapes {
                for &v in &shape.vertices {
                    bbox.add_point(v);
                }
            }
        }
        bbox
    }
}

/// Total duration of one animation cycle.
pub fn cycle_length(durations: &[f64]) -> f64 {
    durations.iter().sum()
}

/// Locate the frame containing `time` (modulo the cycle) and the substep
/// fraction inside it.
///
/// Returns `(frame_index, substep)` with `substep` in `[0, 1)`.
pub fn frame_at(durations: &[f64], time: f64) -> Result<(usize, f64)> {
    if durations.is_empty() {
        return Err(SolverError::NoFrames);
    }
    let mut cumulative = Vec::with_capacity(durations.len() + 1);
    cumulative.push(0.0);
    for &d in durations {
        cumulative.push(cumulative[cumulative.len() - 1] + d);
    }

    let total = cumulative[durations.len()];
    let r_time = if total > 0.0 { time.rem_euclid(total) } else { 0.0 };

    let mut frame = 0;
    for i in 1..durations.len() {
        if cumulative[i] < r_time {
            frame = i;
        }
    }
    let span = cumulative[frame + 1] - cumulative[frame];
    let substep = if span > 0.0 {
        (r_time - cumulative[frame]) / span
    } else {
        0.0
    };
    Ok((frame, substep))
}

/// Linearly blend frame `index` toward the next frame (cyclic) at `substep`.
///
/// Vertex positions and velocities interpolate; connectivity and flags come
/// from the base frame. The blended frame has zero duration.
pub fn blend(frames: &[Frame], index: usize, substep: f64) -> Frame {
    let next = (index + 1) % frames.len();
    let isubstep = 1.0 - substep;

    let shapes = frames[index]
        .shapes
        .iter()
        .zip(frames[next].shapes.iter())
        .map(|(s0, s1)| Shape {
            vertices: s0
                .vertices
                .iter()
                .zip(s1.vertices.iter())
                .map(|(&v0, &v1)| v0 * isubstep + v1 * substep)
                .collect(),
            velocities: s0
                .velocities
                .iter()
                .zip(s1.velocities.iter())
                .map(|(&v0, &v1)| v0 * isubstep + v1 * substep)
                .collect(),
            triangles: s0.triangles.clone(),
            active: s0.active,
        })
        .collect();

    Frame {
        shapes,
        duration: 0.0,
    }
}

/// 2D counterpart of [`blend`].
pub fn blend_2d(frames: &[Frame2d], index: usize, substep: f64) -> Frame2d {
    let next = (index + 1) % frames.len();
    let isubstep = 1.0 - substep;

    let shapes = frames[index]
        .shapes
        .iter()
        .zip(frames[next].shapes.iter())
        .map(|(s0, s1)| Outline {
            points: s0
                .points
                .iter()
                .zip(s1.points.iter())
                .map(|(&p0, &p1)| p0 * isubstep + p1 * substep)
                .collect(),
            velocities: s0
                .velocities
                .iter()
                .zip(s1.velocities.iter())
                .map(|(&v0, &v1)| v0 * isubstep + v1 * substep)
                .collect(),
            valve: s0.valve,
        })
        .collect();

    Frame2d {
        shapes,
        duration: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_frame_animation() -> Vec<Frame> {
        let make = |x: f64| Frame {
            shapes: vec![Shape {
                vertices: vec![DVec3::new(x, 0.0, 0.0), DVec3::new(x, 1.0, 0.0)],
                velocities: vec![DVec3::X, DVec3::X],
                triangles: vec![],
                active: false,
            }],
            duration: 0.5,
        };
        vec![make(0.0), make(2.0)]
    }

    #[test]
    fn frame_lookup_within_cycle() {
        let durations = [0.5, 0.5];
        let (f, s) = frame_at(&durations, 0.25).unwrap();
        assert_eq!(f, 0);
        assert!((s - 0.5).abs() < 1e-12);

        let (f, s) = frame_at(&durations, 0.75).unwrap();
        assert_eq!(f, 1);
        assert!((s - 0.5).abs() < 1e-12);
    }

    #[test]
    fn frame_lookup_wraps_at_cycle_end() {
        let durations = [0.5, 0.5];
        let (f0, s0) = frame_at(&durations, 0.0).unwrap();
        let (f1, s1) = frame_at(&durations, 1.0).unwrap();
        assert_eq!((f0, s0), (f1, s1));
    }

    #[test]
    fn frame_lookup_no_frames() {
        assert!(matches!(frame_at(&[], 0.0), Err(SolverError::NoFrames)));
    }

    #[test]
    fn blend_midpoint() {
        let frames = two_frame_animation();
        let sub = blend(&frames, 0, 0.5);
        assert!((sub.shapes[0].vertices[0].x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn blend_wraps_to_first_frame() {
        let frames = two_frame_animation();
        // Halfway from the last frame back to the first: x = (2 + 0) / 2.
        let sub = blend(&frames, 1, 0.5);
        assert!((sub.shapes[0].vertices[0].x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn validate_catches_bad_index() {
        let shape = Shape {
            vertices: vec![DVec3::ZERO],
            velocities: vec![DVec3::ZERO],
            triangles: vec![[0, 0, 1]],
            active: false,
        };
        assert!(matches!(
            shape.validate(),
            Err(SolverError::VertexIndexOutOfRange { index: 1, count: 1 })
        ));
    }

    #[test]
    fn bbox_covers_all_frames() {
        let frames = two_frame_animation();
        let bbox = BoundingBox::from_frames(&frames);
        assert_eq!(bbox.min.x, 0.0);
        assert_eq!(bbox.max.x, 2.0);
        assert_eq!(bbox.max.y, 1.0);
    }
}
