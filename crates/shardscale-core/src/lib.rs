//! shardscale-core — data model and configuration for shardscale.
//!
//! Holds the snapshot types read from a partitioned stream's control API
//! (shards, hash-key ranges, stream status), the metric sample shape
//! consumed by the voter, and the TOML configuration surface of the
//! daemon.
//!
//! Nothing in this crate performs I/O except [`Config::from_file`].

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AccountConfig, CapacityConfig, Config, ConvergenceConfig, MetricsWindowConfig, NotifierConfig,
    ScaleDownConfig, ScaleUpConfig, ScalingConfig, SlackConfig, StreamConfig, VotingConfig,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
