// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use crate::grid::{Axis, Grid, NodeType};

/// Where a segment lies relative to the x-partition of the domain.
///
/// Only `FullyLocal` segments can be solved by the serial Thomas kernel; the
/// other classes mark systems whose caps live on another partition and need a
/// cross-partition tridiagonal scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentLocality {
    /// Both caps inside the partition.
    FullyLocal,
    /// Starts here, continues past the partition's upper bound.
    StartsLocal,
    /// Ends here, started before the partition's lower bound.
    EndsLocal,
    /// Passes straight through the partition.
    Crosses,
}

/// A contiguous slab of the domain along x.
#[derive(Debug, Clone, Copy)]
pub struct Partition {
    /// First x-plane owned by the partition.
    pub offset: usize,
    /// Number of x-planes owned.
    pub length: usize,
}

impl Partition {
    /// The degenerate single-partition case covering the whole domain.
    pub fn full(dimx: usize) -> Self {
        Partition {
            offset: 0,
            length: dimx,
        }
    }
}

/// A maximal run of In cells along one axis, widened by the two non-In cap
/// cells that bracket it. `size >= 3` always holds.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Start cap cell.
    pub pos: [usize; 3],
    /// End cap cell.
    pub end: [usize; 3],
    /// Number of cells including both caps.
    pub size: usize,
    /// Sweep axis.
    pub dir: Axis,
    /// Position relative to the x-partition.
    pub locality: SegmentLocality,
}

/// The three per-axis segment lists for one grid state.
pub struct SegmentLists {
    /// Segments along x.
    pub x: Vec<Segment>,
    /// Segments along y.
    pub y: Vec<Segment>,
    /// Segments along z.
    pub z: Vec<Segment>,
}

impl SegmentLists {
    /// Total number of segments across all axes.
    pub fn count(&self) -> usize {
        self.x.len() + self.y.len() + self.z.len()
    }

    /// Total number of unknown (interior) cells across all systems.
    pub fn total_unknowns(&self) -> usize {
        self.x
            .iter()
            .chain(self.y.iter())
            .chain(self.z.iter())
            .map(|s| s.size - 2)
            .sum()
    }

    /// Longest system across all axes, caps included.
    pub fn max_size(&self) -> usize {
        self.x
            .iter()
            .chain(self.y.iter())
            .chain(self.z.iter())
            .map(|s| s.size)
            .max()
            .unwrap_or(0)
    }
}

/// Enumerate the segments of every axis for the grid's current node map,
/// clipped and tagged against the partition. Lines with no In cell produce
/// nothing. Segments entirely outside the partition are dropped.
pub fn build_segments(grid: &Grid, partition: Partition) -> SegmentLists {
    SegmentLists {
        x: scan_axis(grid, Axis::X, partition),
        y: scan_axis(grid, Axis::Y, partition),
        z: scan_axis(grid, Axis::Z, partition),
    }
}

fn scan_axis(grid: &Grid, dir: Axis, partition: Partition) -> Vec<Segment> {
    let (dimx, dimy, dimz) = grid.dims();
    let (dim2, dim3) = match dir {
        Axis::X => (dimy, dimz),
        Axis::Y => (dimx, dimz),
        Axis::Z => (dimx, dimy),
    };
    let step = dir.step();
    let limit = [dimx, dimy, dimz];

    let mut list = Vec::new();
    for a in 0..dim2 {
        for b in 0..dim3 {
            let mut pos = match dir {
                Axis::X => [0, a, b],
                Axis::Y => [a, 0, b],
                Axis::Z => [a, b, 0],
            };
            let mut run_start = pos;
            let mut in_run = false;

            while pos[0] + step[0] < limit[0]
                && pos[1] + step[1] < limit[1]
                && pos[2] + step[2] < limit[2]
            {
                let next = [pos[0] + step[0], pos[1] + step[1], pos[2] + step[2]];
                if grid.node_type(next[0], next[1], next[2]) == NodeType::In {
                    if !in_run {
                        run_start = pos;
                        in_run = true;
                    }
                } else if in_run {
                    let seg = Segment {
                        pos: run_start,
                        end: next,
                        size: (next[0] - run_start[0])
                            + (next[1] - run_start[1])
                            + (next[2] - run_start[2])
                            + 1,
                        dir,
                        locality: SegmentLocality::FullyLocal,
                    };
                    if let Some(tagged) = tag_partition(seg, partition) {
                        list.push(tagged);
                    }
                    in_run = false;
                }
                pos = next;
            }
        }
    }
    list
}

/// Classify a segment against the x-partition and clip its x-extent to it.
/// Returns `None` for segments with no cell inside the partition.
fn tag_partition(mut seg: Segment, partition: Partition) -> Option<Segment> {
    let lo = partition.offset;
    let hi = partition.offset + partition.length;

    if seg.pos[0] >= hi || seg.end[0] < lo {
        return None;
    }

    let starts_before = seg.pos[0] < lo;
    let ends_after = seg.end[0] >= hi;
    seg.locality = match (starts_before, ends_after) {
        (false, false) => SegmentLocality::FullyLocal,
        (false, true) => SegmentLocality::StartsLocal,
        (true, false) => SegmentLocality::EndsLocal,
        (true, true) => SegmentLocality::Crosses,
    };

    if seg.dir == Axis::X {
        seg.pos[0] = seg.pos[0].max(lo);
        seg.end[0] = seg.end[0].min(hi - 1);
        seg.size = seg.end[0] - seg.pos[0] + 1;
    }
    Some(seg)
}
