// Copyright (c) 2026, Chad Hogan
// All rights reserved.
//
// This source code is licensed under the BSD-3-Clause license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

/// Errors that can occur during grid setup, shape loading, or time stepping.
#[derive(Debug)]
pub enum SolverError {
    /// Grid extent is invalid (dimension too small).
    InvalidGridShape {
        /// The axis index.
        axis: usize,
        /// The size provided.
        size: usize,
    },
    /// Cell spacing is not positive and finite.
    InvalidSpacing(f64),
    /// Time step is not positive and finite.
    InvalidTimeStep(f64),
    /// The animation has no frames.
    NoFrames,
    /// A triangle index points past the vertex table.
    VertexIndexOutOfRange {
        /// The offending index.
        index: usize,
        /// Number of vertices in the shape.
        count: usize,
    },
    /// Array shape does not match expected shape.
    ShapeMismatch {
        /// The expected shape.
        expected: Vec<usize>,
        /// The actual shape encountered.
        got: Vec<usize>,
    },
    /// A shape file could not be parsed.
    MalformedShapeFile(String),
    /// Unsupported data type in file.
    UnsupportedDtype(String),
    /// Unsupported file format (unrecognized extension).
    UnsupportedFileFormat(String),
    /// A tridiagonal pivot fell below the singularity threshold.
    SingularSystem {
        /// The row at which elimination broke down.
        row: usize,
    },
    /// Incompressibility residual exceeded ten times the error threshold.
    DivergenceBlowUp {
        /// The divergence error that was measured.
        error: f64,
        /// The configured threshold.
        threshold: f64,
    },
    /// I/O error occurred.
    IoError(std::io::Error),
    /// Other error with a descriptive message.
    Other(String),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::InvalidGridShape { axis, size } => {
                write!(
                    f,
                    "invalid grid shape: axis {} has size {} (must be >= 3)",
                    axis, size
                )
            }
            SolverError::InvalidSpacing(h) => {
                write!(
                    f,
                    "invalid cell spacing: {} (must be positive and finite)",
                    h
                )
            }
            SolverError::InvalidTimeStep(dt) => {
                write!(
                    f,
                    "invalid time step: {} (must be positive and finite)",
                    dt
                )
            }
            SolverError::NoFrames => {
                write!(f, "shape animation contains no frames")
            }
            SolverError::VertexIndexOutOfRange { index, count } => {
                write!(
                    f,
                    "triangle index {} out of range (shape has {} vertices)",
                    index, count
                )
            }
            SolverError::ShapeMismatch { expected, got } => {
                write!(f, "shape mismatch: expected {:?}, got {:?}", expected, got)
            }
            SolverError::MalformedShapeFile(msg) => {
                write!(f, "malformed shape file: {}", msg)
            }
            SolverError::UnsupportedDtype(dtype) => {
                write!(f, "unsupported dtype: {}", dtype)
            }
            SolverError::UnsupportedFileFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            SolverError::SingularSystem { row } => {
                write!(f, "singular tridiagonal system: zero pivot at row {}", row)
            }
            SolverError::DivergenceBlowUp { error, threshold } => {
                write!(
                    f,
                    "divergence error {} exceeds 10 x threshold {}",
                    error, threshold
                )
            }
            SolverError::IoError(e) => write!(f, "I/O error: {}", e),
            SolverError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SolverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SolverError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SolverError {
    fn from(e: std::io::Error) -> Self {
        SolverError::IoError(e)
    }
}

/// Convenience type alias for Results with SolverError.
pub type Result<T> = std::result::Result<T, SolverError>;
