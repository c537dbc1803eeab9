//! Structured error types for the PTP crates.

use thiserror::Error;

/// Unified error type for all PTP operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PtpError {
    /// Parse error (malformed Newick input)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range values)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration value outside its allowed range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Tree violates the rooted binary tree invariants
    #[error("malformed tree: {0}")]
    MalformedTree(String),

    /// Node id that is not part of the tree a structure was built from
    #[error("unknown node id {0}")]
    UnknownNode(usize),

    /// Likelihood-ratio statistic below zero: the alternative model scored
    /// worse than the null model it contains
    #[error("negative likelihood-ratio statistic {0}")]
    NegativeStatistic(f64),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the PTP crates.
pub type Result<T> = std::result::Result<T, PtpError>;
