//! Autoscaler error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use shardscale_core::StreamStatus;

/// External call that produced a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Describe,
    Split,
    Merge,
    QueryMetrics,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Describe => "describe stream",
            Operation::Split => "split shard",
            Operation::Merge => "merge shards",
            Operation::QueryMetrics => "query metrics",
        };
        f.write_str(name)
    }
}

/// A failed call to the stream control API, the metrics provider, or
/// client construction.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct ProviderError {
    pub operation: Operation,
    pub message: String,
}

impl ProviderError {
    pub fn new(operation: Operation, message: impl fmt::Display) -> Self {
        Self {
            operation,
            message: message.to_string(),
        }
    }
}

/// Terminal outcomes of a pass other than a completed action.
#[derive(Debug, Clone, Error)]
pub enum ScaleError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("stream is {0}, not ACTIVE")]
    StreamNotActive(StreamStatus),

    #[error("no open shards are eligible to split")]
    NoSplittableShards,

    #[error("no metrics are selected by the scale_on setting")]
    NoMetricsSelected,

    #[error("no scaling votes were cast")]
    NoVotes,

    #[error("at capacity: {open} open + {requested} requested exceeds max_shards {max}")]
    AtCapacity {
        open: usize,
        requested: usize,
        max: usize,
    },

    #[error("at floor: {open} open - {requested} requested is below min_shards {min}")]
    AtFloor {
        open: usize,
        requested: usize,
        min: usize,
    },

    #[error("only one open shard, nothing to merge")]
    SingleShard,

    #[error("no adjacent shards available to merge")]
    NoAdjacentShards,

    #[error("all {pairs} adjacent pair(s) have an ignore-listed lower shard")]
    AllCandidatesIgnored { pairs: usize },

    #[error("stream did not return to ACTIVE within {0:?}")]
    ConvergenceTimeout(Duration),

    /// A later split or merge failed after earlier ones in the same pass
    /// had already been applied.
    #[error("{cause} (already applied: {})", .completed.join(", "))]
    Interrupted {
        completed: Vec<String>,
        cause: Box<ScaleError>,
    },
}

impl ScaleError {
    /// Expected outcomes that end a pass without anything having gone
    /// wrong with the provider.
    pub fn is_precondition(&self) -> bool {
        !matches!(
            self,
            ScaleError::Provider(_)
                | ScaleError::ConvergenceTimeout(_)
                | ScaleError::Interrupted { .. }
        )
    }

    /// Wrap `cause` with the actions that completed before it, if any.
    pub fn after(completed: Vec<String>, cause: ScaleError) -> Self {
        if completed.is_empty() {
            cause
        } else {
            ScaleError::Interrupted {
                completed,
                cause: Box::new(cause),
            }
        }
    }
}

pub type ScaleResult<T> = Result<T, ScaleError>;
