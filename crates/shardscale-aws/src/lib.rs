//! shardscale-aws — AWS-backed providers for the autoscaler.
//!
//! - [`KinesisStreamControl`] describes, splits and merges Kinesis streams.
//! - [`CloudWatchMetrics`] reads `AWS/Kinesis` metric sums.
//! - [`AwsClientFactory`] builds both per region and account, assuming the
//!   account's IAM role when one is configured, and reuses them across
//!   passes.

pub mod cloudwatch;
pub mod factory;
pub mod kinesis;

pub use cloudwatch::CloudWatchMetrics;
pub use factory::AwsClientFactory;
pub use kinesis::KinesisStreamControl;

/// Normalize SDK accessors that return either `T` or `Option<T>`.
pub(crate) fn opt<T>(value: impl Into<Option<T>>) -> Option<T> {
    value.into()
}
