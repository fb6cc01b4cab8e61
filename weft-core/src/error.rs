//! Error types for graph construction.
//!
//! Errors here cover configuration and startup only. Submission never
//! fails and accepted work items have no failure channel; misuse of
//! the threading API (re-entrant named processing, duplicate attach)
//! is a programmer error and panics rather than returning an error.

use core::fmt;

/// Errors that can occur while validating configuration or starting
/// the worker pool.
#[derive(Debug)]
pub enum GraphError {
    /// A configuration field failed validation.
    InvalidConfiguration(&'static str),
    /// More workers were requested for a tier than the packed worker
    /// state can track.
    TooManyWorkers {
        /// Requested per-tier worker count.
        requested: usize,
        /// Hard upper bound per tier.
        max: usize,
    },
    /// The operating system refused to spawn a worker thread.
    ThreadSpawnFailed(std::io::Error),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfiguration(reason) => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::TooManyWorkers { requested, max } => {
                write!(f, "requested {requested} workers per tier, maximum is {max}")
            }
            Self::ThreadSpawnFailed(err) => write!(f, "failed to spawn worker thread: {err}"),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ThreadSpawnFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GraphError {
    fn from(err: std::io::Error) -> Self {
        Self::ThreadSpawnFailed(err)
    }
}

/// Result alias for graph construction.
pub type GraphResult<T> = Result<T, GraphError>;
