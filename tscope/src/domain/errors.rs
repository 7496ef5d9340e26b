//! Structured error types for tscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Runtime errors never cross the operation hook: the hot path absorbs
//! overflow locally and degrades on sink write failure instead of
//! propagating. These types surface everywhere else.

use thiserror::Error;

/// Tracer initialization and lifecycle failures.
#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Trace sink unavailable at {path}: {reason}")]
    SinkUnavailable { path: String, reason: String },

    #[error("Tensor registry full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    #[error("Model mmap range missing or empty")]
    MmapRangeMissing,

    #[error("Tracer already initialized")]
    AlreadyInitialized,

    #[error("Graph output directory {path}: {reason}")]
    GraphDirUnavailable { path: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TracerError {
    /// Process exit code for initialization failures, distinct per kind
    /// so wrapper scripts can tell them apart.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            TracerError::SinkUnavailable { .. } => 2,
            TracerError::RegistryFull { .. } => 3,
            TracerError::MmapRangeMissing => 4,
            _ => 1,
        }
    }
}

/// Offline parser failures. Each variant carries the byte or line position
/// the parser had reached, so diagnostics point at the input.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Trace file holds no complete record ({len} bytes, record size {record_size})")]
    TruncatedTrace { len: u64, record_size: usize },

    #[error("Malformed CSV at line {line}: {reason}")]
    MalformedCsv { line: usize, reason: String },

    #[error("Malformed JSONL at line {line}: {reason}")]
    MalformedJsonl { line: usize, reason: String },

    #[error("Duplicate graph dump for token {0}")]
    DuplicateGraphForToken(u32),

    #[error("Malformed graph dump {file} at line {line}: {reason}")]
    MalformedGraph { file: String, line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Experiment-runner failures, tagged with the step that failed so the
/// operator knows what state the output directory is in.
#[derive(Error, Debug)]
#[error("Step '{step}' failed: {cause:#}")]
pub struct RunnerError {
    pub step: &'static str,
    pub cause: anyhow::Error,
}
