//! Domain types for shardscale.
//!
//! These are point-in-time snapshots: a stream is described fresh on every
//! control-loop pass and nothing here is cached across passes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a shard as assigned by the stream control API.
pub type ShardId = String;

/// Position in the stream's hash keyspace (up to 2^128 - 1).
pub type HashKey = u128;

// ── Shard ─────────────────────────────────────────────────────────

/// Inclusive `[start, end]` interval of the hash keyspace owned by a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKeyRange {
    pub start: HashKey,
    pub end: HashKey,
}

impl HashKeyRange {
    pub fn new(start: HashKey, end: HashKey) -> Self {
        Self { start, end }
    }

    /// Integer floor of `(start + end) / 2`, computed without overflowing
    /// near the top of the keyspace.
    pub fn midpoint(&self) -> HashKey {
        self.start / 2 + self.end / 2 + (self.start % 2 + self.end % 2) / 2
    }
}

/// Sequence numbers covered by a shard. `end` is `None` while the shard is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceNumberRange {
    pub start: String,
    pub end: Option<String>,
}

/// A single partition of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub id: ShardId,
    pub parent_id: Option<ShardId>,
    pub hash_range: HashKeyRange,
    pub sequence_range: SequenceNumberRange,
}

impl Shard {
    /// Whether the shard still accepts writes.
    pub fn is_open(&self) -> bool {
        self.sequence_range.end.is_none()
    }
}

// ── Stream ────────────────────────────────────────────────────────

/// Lifecycle status of a stream as reported by the control API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamStatus {
    Creating,
    Deleting,
    Active,
    Updating,
    Unknown(String),
}

impl StreamStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, StreamStatus::Active)
    }
}

impl From<&str> for StreamStatus {
    fn from(s: &str) -> Self {
        match s {
            "CREATING" => StreamStatus::Creating,
            "DELETING" => StreamStatus::Deleting,
            "ACTIVE" => StreamStatus::Active,
            "UPDATING" => StreamStatus::Updating,
            other => StreamStatus::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamStatus::Creating => f.write_str("CREATING"),
            StreamStatus::Deleting => f.write_str("DELETING"),
            StreamStatus::Active => f.write_str("ACTIVE"),
            StreamStatus::Updating => f.write_str("UPDATING"),
            StreamStatus::Unknown(s) => f.write_str(s),
        }
    }
}

/// Result of describing a stream: its status plus every shard the API
/// still reports, open or closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescription {
    pub name: String,
    pub status: StreamStatus,
    pub shards: Vec<Shard>,
}

/// Which traffic directions a stream is scaled on.
///
/// `NONE` selects no metrics; every pass for such a stream is skipped
/// and reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScaleOn {
    None,
    Get,
    Put,
    Puts,
    BothPuts,
    All,
}

impl ScaleOn {
    /// Consumer-side (GetRecords) traffic is monitored.
    pub fn scales_get(self) -> bool {
        matches!(self, ScaleOn::Get | ScaleOn::All)
    }

    /// Single-record producer traffic (PutRecord) is monitored.
    pub fn scales_put(self) -> bool {
        matches!(self, ScaleOn::Put | ScaleOn::BothPuts | ScaleOn::All)
    }

    /// Batched producer traffic (PutRecords) is monitored.
    pub fn scales_puts(self) -> bool {
        matches!(self, ScaleOn::Puts | ScaleOn::BothPuts | ScaleOn::All)
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// One aggregated datapoint returned by the metrics provider.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datapoint {
    /// Unix timestamp (seconds) of the period start.
    pub timestamp: u64,
    /// Sum statistic over the period.
    pub sum: f64,
}

/// Denomination of a metric, which selects the capacity it is compared to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricUnit {
    Bytes,
    Records,
}

/// All datapoints of one metric over the lookback window.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub unit: MetricUnit,
    pub datapoints: Vec<Datapoint>,
}

impl MetricSample {
    pub fn total(&self) -> f64 {
        self.datapoints.iter().map(|d| d.sum).sum()
    }
}

// ── Voting ────────────────────────────────────────────────────────

/// A categorical scaling vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    ScaleUp,
    ScaleDown,
    ScaleSame,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vote::ScaleUp => f.write_str("scale_up"),
            Vote::ScaleDown => f.write_str("scale_down"),
            Vote::ScaleSame => f.write_str("scale_same"),
        }
    }
}

/// How a majority vote is resolved when two or more buckets share the
/// highest count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Prefer the least disruptive action: `ScaleSame > ScaleDown > ScaleUp`.
    #[default]
    Conservative,
    /// Prefer whichever tied vote was cast first.
    FirstSeen,
}
