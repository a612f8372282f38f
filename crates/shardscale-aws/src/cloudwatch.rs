//! CloudWatch `GetMetricStatistics` for the `AWS/Kinesis` namespace.

use async_trait::async_trait;
use aws_sdk_cloudwatch::Client;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime;
use aws_sdk_cloudwatch::types::{Dimension as SdkDimension, Statistic};
use tracing::debug;

use shardscale_autoscale::{MetricQuery, MetricsProvider, Operation, ProviderError};
use shardscale_core::Datapoint;

use crate::opt;

pub const KINESIS_NAMESPACE: &str = "AWS/Kinesis";

#[derive(Clone)]
pub struct CloudWatchMetrics {
    client: Client,
}

impl CloudWatchMetrics {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsProvider for CloudWatchMetrics {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Datapoint>, ProviderError> {
        let mut dimensions = Vec::with_capacity(query.dimensions.len());
        for d in &query.dimensions {
            let dim = SdkDimension::builder()
                .name(&d.name)
                .value(&d.value)
                .build();
            dimensions.push(dim);
        }

        let out = self
            .client
            .get_metric_statistics()
            .namespace(KINESIS_NAMESPACE)
            .metric_name(&query.metric_name)
            .set_dimensions(Some(dimensions))
            .start_time(DateTime::from_secs(to_i64(query.window_start)))
            .end_time(DateTime::from_secs(to_i64(query.window_end)))
            .period(i32::try_from(query.period_secs).unwrap_or(i32::MAX))
            .statistics(Statistic::Sum)
            .send()
            .await
            .map_err(|e| ProviderError::new(Operation::QueryMetrics, DisplayErrorContext(&e)))?;

        let mut datapoints: Vec<Datapoint> = out
            .datapoints()
            .iter()
            .map(|p| Datapoint {
                timestamp: opt::<&DateTime>(p.timestamp())
                    .map(|t| u64::try_from(t.secs()).unwrap_or(0))
                    .unwrap_or(0),
                sum: opt::<f64>(p.sum()).unwrap_or(0.0),
            })
            .collect();
        datapoints.sort_by_key(|d| d.timestamp);

        debug!(
            metric = %query.metric_name,
            datapoints = datapoints.len(),
            "fetched metric statistics"
        );
        Ok(datapoints)
    }
}

fn to_i64(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_clamp_into_sdk_range() {
        assert_eq!(to_i64(1_700_000_000), 1_700_000_000);
        assert_eq!(to_i64(u64::MAX), i64::MAX);
    }

    #[test]
    fn dimensions_require_name_and_value() {
        let dim = SdkDimension::builder()
            .name("StreamName")
            .value("events")
            .build()
            .unwrap();
        assert_eq!(opt::<&str>(dim.name()), Some("StreamName"));
        assert!(SdkDimension::builder().name("ShardId").build().is_err());
    }
}
