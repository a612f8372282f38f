//! shardscale-autoscale — utilization-driven shard scaling.
//!
//! Each pass describes a stream, pulls its throughput metrics for the
//! lookback window, and turns them into votes against the per-shard write
//! capacity. The majority vote picks one action:
//!
//! ```text
//! ScaleUp   => split `up.rate` random splittable shards at their midpoint
//!              (refused when open + rate > max_shards)
//! ScaleDown => merge `down.rate` random adjacent open pairs
//!              (refused when open < rate + min_shards)
//! ScaleSame => nothing
//! ```
//!
//! After every split or merge the stream is polled until it reports
//! `ACTIVE` again, bounded by the convergence timeout.
//!
//! The engine only sees the outside world through the traits in
//! [`provider`]. The [`testing`] module carries in-memory versions of them.

pub mod adjacency;
pub mod controller;
pub mod error;
pub mod executor;
pub mod provider;
pub mod scaler;
pub mod shards;
pub mod testing;
pub mod voter;

pub use adjacency::{AdjacentPair, adjacent_pairs};
pub use controller::{PassOutcome, ScaleAction, ScaleContext, StreamController};
pub use error::{Operation, ProviderError, ScaleError, ScaleResult};
pub use executor::{ConvergencePolicy, ScaleExecutor};
pub use provider::{
    ClientFactory, Dimension, MetricQuery, MetricsProvider, Notifier, SHARD_ID_DIMENSION,
    STREAM_NAME_DIMENSION, StreamClients, StreamControl,
};
pub use scaler::Autoscaler;
pub use shards::ShardView;
pub use voter::{MetricSpec, Thresholds, UtilizationVoter, majority, shard_metrics, stream_metrics};
