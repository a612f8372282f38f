//! shardscale-notify — where scaling reports go.
//!
//! Every message is written to the log. When a Slack webhook is configured
//! the message is also posted there; delivery failures are logged and
//! never reach the control loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use shardscale_autoscale::Notifier;
use shardscale_core::{NotifierConfig, SlackConfig};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Build the notifier selected by `[notifier]`.
pub fn from_config(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.slack {
        Some(slack) => Ok(Arc::new(SlackNotifier::new(slack.clone())?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

/// Writes each message to the log at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        info!(target: "shardscale::notify", "{message}");
    }
}

/// Slack incoming-webhook body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SlackPayload<'a> {
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<&'a str>,
}

/// Posts each message to a Slack incoming webhook.
pub struct SlackNotifier {
    config: SlackConfig,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(config: SlackConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self { config, client })
    }

    pub fn payload<'a>(&'a self, message: &'a str) -> SlackPayload<'a> {
        SlackPayload {
            text: message,
            channel: self.config.channel.as_deref(),
            username: self.config.username.as_deref(),
            icon_emoji: self.config.icon_emoji.as_deref(),
        }
    }

    async fn post(&self, message: &str) -> Result<(), String> {
        let response = self
            .client
            .post(&self.config.webhook_url)
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) {
        info!(target: "shardscale::notify", "{message}");
        if let Err(e) = self.post(message).await {
            warn!(error = %e, "slack notification failed");
        }
    }
}
