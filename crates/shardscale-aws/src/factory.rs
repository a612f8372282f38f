//! Per-region, per-account AWS clients.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tokio::sync::Mutex;
use tracing::{debug, info};

use shardscale_autoscale::{ClientFactory, Operation, ProviderError, StreamClients};
use shardscale_core::{AccountConfig, StreamConfig};

use crate::{CloudWatchMetrics, KinesisStreamControl};

/// Builds Kinesis and CloudWatch clients for a stream's region, assuming
/// the stream's account role when it names one. Clients are cached by
/// `(region, account)` for the life of the factory.
pub struct AwsClientFactory {
    accounts: HashMap<String, AccountConfig>,
    cache: Mutex<HashMap<(String, Option<String>), StreamClients>>,
}

impl AwsClientFactory {
    pub fn new(accounts: HashMap<String, AccountConfig>) -> Self {
        Self {
            accounts,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn sdk_config(&self, stream: &StreamConfig) -> Result<SdkConfig, ProviderError> {
        let region = Region::new(stream.region.clone());
        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(region.clone())
            .load()
            .await;

        let Some(account_name) = &stream.account else {
            return Ok(base);
        };
        let account = self.accounts.get(account_name).ok_or_else(|| {
            ProviderError::new(
                Operation::Connect,
                format!("unknown account {account_name}"),
            )
        })?;

        info!(
            account = %account_name,
            role_arn = %account.role_arn,
            region = %stream.region,
            "assuming account role"
        );
        let provider = AssumeRoleProvider::builder(&account.role_arn)
            .session_name(&account.role_session_name)
            .region(region.clone())
            .configure(&base)
            .build()
            .await;

        Ok(aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .credentials_provider(provider)
            .load()
            .await)
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn clients_for(&self, stream: &StreamConfig) -> Result<StreamClients, ProviderError> {
        let key = (stream.region.clone(), stream.account.clone());
        let mut cache = self.cache.lock().await;
        if let Some(clients) = cache.get(&key) {
            return Ok(clients.clone());
        }

        let conf = self.sdk_config(stream).await?;
        let clients = StreamClients {
            control: Arc::new(KinesisStreamControl::new(aws_sdk_kinesis::Client::new(&conf))),
            metrics: Arc::new(CloudWatchMetrics::new(aws_sdk_cloudwatch::Client::new(&conf))),
        };
        debug!(region = %stream.region, account = ?stream.account, "built aws clients");
        cache.insert(key, clients.clone());
        Ok(clients)
    }
}
