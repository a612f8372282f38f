//! Capability traits for everything outside the decision engine.
//!
//! The autoscaler only ever talks to a stream through [`StreamControl`],
//! reads throughput through [`MetricsProvider`], and reports through
//! [`Notifier`]. Cloud-backed implementations live in `shardscale-aws`
//! and `shardscale-notify`; in-memory ones live in [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;

use shardscale_core::{Datapoint, HashKey, StreamConfig, StreamDescription};

use crate::error::ProviderError;

/// Control API of a partitioned stream.
#[async_trait]
pub trait StreamControl: Send + Sync {
    async fn describe(&self, stream: &str) -> Result<StreamDescription, ProviderError>;

    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash_key: HashKey,
    ) -> Result<(), ProviderError>;

    async fn merge(
        &self,
        stream: &str,
        lower_shard_id: &str,
        higher_shard_id: &str,
    ) -> Result<(), ProviderError>;
}

/// Metric dimension naming the stream.
pub const STREAM_NAME_DIMENSION: &str = "StreamName";

/// Metric dimension naming a single shard.
pub const SHARD_ID_DIMENSION: &str = "ShardId";

/// A name/value pair scoping a metric query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parameters of one metric query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    pub metric_name: String,
    pub dimensions: Vec<Dimension>,
    /// Unix seconds, inclusive.
    pub window_start: u64,
    /// Unix seconds, exclusive.
    pub window_end: u64,
    pub period_secs: u32,
}

impl MetricQuery {
    /// Value of the named dimension, if present.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// Source of windowed metric sums.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Datapoint>, ProviderError>;
}

/// Best-effort outbound message channel. Implementations swallow and log
/// their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// The provider handles a single stream's pass runs against.
#[derive(Clone)]
pub struct StreamClients {
    pub control: Arc<dyn StreamControl>,
    pub metrics: Arc<dyn MetricsProvider>,
}

/// Resolves region- and credential-specific clients for a stream.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn clients_for(&self, stream: &StreamConfig) -> Result<StreamClients, ProviderError>;
}
