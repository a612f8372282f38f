//! Kinesis Data Streams control API.

use async_trait::async_trait;
use aws_sdk_kinesis::Client;
use aws_sdk_kinesis::error::DisplayErrorContext;
use aws_sdk_kinesis::types::Shard as SdkShard;
use tracing::debug;

use shardscale_autoscale::{Operation, ProviderError, StreamControl};
use shardscale_core::{
    HashKey, HashKeyRange, SequenceNumberRange, Shard, StreamDescription, StreamStatus,
};

use crate::opt;

#[derive(Clone)]
pub struct KinesisStreamControl {
    client: Client,
}

impl KinesisStreamControl {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamControl for KinesisStreamControl {
    /// Describe the stream, following `HasMoreShards` until every shard
    /// (open and closed) has been collected.
    async fn describe(&self, stream: &str) -> Result<StreamDescription, ProviderError> {
        let mut shards = Vec::new();
        let mut status = StreamStatus::Unknown(String::new());
        let mut start_after: Option<String> = None;

        loop {
            let out = self
                .client
                .describe_stream()
                .stream_name(stream)
                .set_exclusive_start_shard_id(start_after.take())
                .send()
                .await
                .map_err(|e| ProviderError::new(Operation::Describe, DisplayErrorContext(&e)))?;

            let desc = opt::<&aws_sdk_kinesis::types::StreamDescription>(out.stream_description())
                .ok_or_else(|| {
                    ProviderError::new(Operation::Describe, "response has no stream description")
                })?;
            if let Some(s) = opt::<&aws_sdk_kinesis::types::StreamStatus>(desc.stream_status()) {
                status = StreamStatus::from(s.as_str());
            }

            for shard in desc.shards() {
                shards.push(convert_shard(shard)?);
            }

            let more = opt::<bool>(desc.has_more_shards()).unwrap_or(false);
            match (more, shards.last()) {
                (true, Some(last)) => start_after = Some(last.id.clone()),
                _ => break,
            }
        }

        debug!(stream, %status, shards = shards.len(), "described kinesis stream");
        Ok(StreamDescription {
            name: stream.to_string(),
            status,
            shards,
        })
    }

    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash_key: HashKey,
    ) -> Result<(), ProviderError> {
        self.client
            .split_shard()
            .stream_name(stream)
            .shard_to_split(shard_id)
            .new_starting_hash_key(new_starting_hash_key.to_string())
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::new(Operation::Split, DisplayErrorContext(&e)))
    }

    async fn merge(
        &self,
        stream: &str,
        lower_shard_id: &str,
        higher_shard_id: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .merge_shards()
            .stream_name(stream)
            .shard_to_merge(lower_shard_id)
            .adjacent_shard_to_merge(higher_shard_id)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| ProviderError::new(Operation::Merge, DisplayErrorContext(&e)))
    }
}

fn convert_shard(shard: &SdkShard) -> Result<Shard, ProviderError> {
    let id = opt::<&str>(shard.shard_id()).unwrap_or_default().to_string();
    let range = opt::<&aws_sdk_kinesis::types::HashKeyRange>(shard.hash_key_range())
        .ok_or_else(|| malformed(&id, "missing hash key range"))?;
    let sequence = opt::<&aws_sdk_kinesis::types::SequenceNumberRange>(shard.sequence_number_range())
        .ok_or_else(|| malformed(&id, "missing sequence number range"))?;

    let start = opt::<&str>(range.starting_hash_key()).unwrap_or_default();
    let end = opt::<&str>(range.ending_hash_key()).unwrap_or_default();
    let hash_range = HashKeyRange::new(
        parse_hash_key(start).map_err(|e| malformed(&id, e))?,
        parse_hash_key(end).map_err(|e| malformed(&id, e))?,
    );

    Ok(Shard {
        parent_id: opt::<&str>(shard.parent_shard_id()).map(str::to_string),
        hash_range,
        sequence_range: SequenceNumberRange {
            start: opt::<&str>(sequence.starting_sequence_number())
                .unwrap_or_default()
                .to_string(),
            end: opt::<&str>(sequence.ending_sequence_number()).map(str::to_string),
        },
        id,
    })
}

/// Parse a decimal hash key. Kinesis keys span `0..=2^128 - 1`.
pub fn parse_hash_key(value: &str) -> Result<HashKey, String> {
    value
        .trim()
        .parse::<HashKey>()
        .map_err(|e| format!("invalid hash key {value:?}: {e}"))
}

fn malformed(shard_id: &str, detail: impl std::fmt::Display) -> ProviderError {
    ProviderError::new(Operation::Describe, format!("shard {shard_id}: {detail}"))
}
