//! Error handling for population synthesis.
//!
//! Every failure is scoped to the geography, segment or sample it arises
//! from. Batch callers match on the variant to decide whether to skip the
//! offending unit and continue.

pub mod util;

use std::io;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for the synthesis pipeline
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    /// No nonnegative weight vector met the configured tolerance
    #[error(
        "Infeasible allocation for geography {geography}: relative residual {relative_residual:.6} exceeds tolerance {tolerance}"
    )]
    InfeasibleAllocation {
        geography: String,
        relative_residual: f64,
        tolerance: f64,
        residual: Vec<f64>,
    },

    /// A structure or table references a field the registry does not declare
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// The graph structure contains a cycle
    #[error("Graph structure is not acyclic; cycle through fields: {}", .0.join(", "))]
    DisconnectedStructure(Vec<String>),

    /// Pinned evidence lies outside the field's domain
    #[error("Unsupported evidence {field}={value}: {reason}")]
    UnsupportedEvidence {
        field: String,
        value: String,
        reason: String,
    },

    /// A persisted model failed validation on load
    #[error("Corrupt model file {path}: {reason}")]
    CorruptModelFile { path: String, reason: String },

    /// The allocation solver exhausted its wall-clock budget
    #[error("Solver timed out after {iterations} iterations ({elapsed_ms} ms)")]
    SolverTimeout { iterations: usize, elapsed_ms: u128 },

    /// Input data failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error opening or reading a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error encoding or decoding JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error processing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error building or reading Arrow arrays
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl SynthError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Shorthand for a model file that failed validation
    pub fn corrupt_model(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CorruptModelFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the caller can carry on with a best-effort result
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InfeasibleAllocation { .. } | Self::UnsupportedEvidence { .. }
        )
    }
}

/// Result type for synthesis operations
pub type Result<T> = std::result::Result<T, SynthError>;
