//! In-memory providers for tests and local dry runs.
//!
//! [`FakeStreamControl`] applies splits and merges to its shard list the
//! way the real control API does (closing parents, opening children) and
//! can be told to stay `UPDATING` for a number of polls after each
//! mutation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use shardscale_core::{
    Datapoint, HashKey, HashKeyRange, ScaleDownConfig, ScaleOn, ScaleUpConfig, ScalingConfig,
    SequenceNumberRange, Shard, StreamConfig, StreamDescription, StreamStatus,
};

use crate::error::{Operation, ProviderError};
use crate::provider::{
    ClientFactory, MetricQuery, MetricsProvider, Notifier, SHARD_ID_DIMENSION, StreamClients,
    StreamControl,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Builders ──────────────────────────────────────────────────────

pub fn open_shard(id: &str, start: HashKey, end: HashKey) -> Shard {
    Shard {
        id: id.to_string(),
        parent_id: None,
        hash_range: HashKeyRange::new(start, end),
        sequence_range: SequenceNumberRange {
            start: "0".to_string(),
            end: None,
        },
    }
}

pub fn closed_shard(id: &str, start: HashKey, end: HashKey) -> Shard {
    let mut shard = open_shard(id, start, end);
    shard.sequence_range.end = Some("1000".to_string());
    shard
}

pub fn child_shard(id: &str, parent: &str, start: HashKey, end: HashKey) -> Shard {
    let mut shard = open_shard(id, start, end);
    shard.parent_id = Some(parent.to_string());
    shard
}

/// Stream config with 1..=10 shards, 75%/25% thresholds and rate 1.
pub fn stream_config(name: &str) -> StreamConfig {
    StreamConfig {
        name: name.to_string(),
        region: "us-east-1".to_string(),
        account: None,
        min_shards: 1,
        max_shards: 10,
        scale_on: ScaleOn::All,
        shard_level_scale: false,
        scaling: ScalingConfig {
            up: ScaleUpConfig {
                threshold_pct: 75.0,
                rate: 1,
            },
            down: ScaleDownConfig {
                threshold_pct: 25.0,
                rate: 1,
                ignore_list: Vec::new(),
            },
        },
    }
}

// ── Stream control ────────────────────────────────────────────────

/// Tracks how many calls are in flight at once across several fakes.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn max_observed(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct FakeStream {
    status: StreamStatus,
    shards: Vec<Shard>,
    converging: bool,
    remaining_updating: usize,
    updating_polls: usize,
    next_id: u32,
    splits: Vec<(String, HashKey)>,
    merges: Vec<(String, String)>,
    describe_calls: usize,
}

pub struct FakeStreamControl {
    name: String,
    state: Mutex<FakeStream>,
    fail_describe: AtomicBool,
    fail_mutations: AtomicBool,
    /// Mutations allowed before every further one fails.
    mutation_budget: Mutex<Option<usize>>,
    describe_delay: Mutex<Duration>,
    probe: Mutex<Option<Arc<ConcurrencyProbe>>>,
}

impl FakeStreamControl {
    pub fn new(name: &str, shards: Vec<Shard>) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(FakeStream {
                status: StreamStatus::Active,
                shards,
                converging: false,
                remaining_updating: 0,
                updating_polls: 0,
                next_id: 1000,
                splits: Vec::new(),
                merges: Vec::new(),
                describe_calls: 0,
            }),
            fail_describe: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            mutation_budget: Mutex::new(None),
            describe_delay: Mutex::new(Duration::ZERO),
            probe: Mutex::new(None),
        }
    }

    /// Number of `describe` calls that report `UPDATING` after each mutation.
    pub fn set_updating_polls(&self, polls: usize) {
        lock(&self.state).updating_polls = polls;
    }

    /// Pin the reported status until the next mutation.
    pub fn set_status(&self, status: StreamStatus) {
        let mut state = lock(&self.state);
        state.status = status;
        state.converging = false;
    }

    pub fn fail_describe(&self, fail: bool) {
        self.fail_describe.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    /// Let the next `n` splits or merges through, then fail the rest.
    pub fn fail_mutations_after(&self, n: usize) {
        *lock(&self.mutation_budget) = Some(n);
    }

    pub fn set_describe_delay(&self, delay: Duration, probe: Arc<ConcurrencyProbe>) {
        *lock(&self.describe_delay) = delay;
        *lock(&self.probe) = Some(probe);
    }

    pub fn shards(&self) -> Vec<Shard> {
        lock(&self.state).shards.clone()
    }

    pub fn status(&self) -> StreamStatus {
        lock(&self.state).status.clone()
    }

    pub fn splits(&self) -> Vec<(String, HashKey)> {
        lock(&self.state).splits.clone()
    }

    pub fn merges(&self) -> Vec<(String, String)> {
        lock(&self.state).merges.clone()
    }

    pub fn describe_calls(&self) -> usize {
        lock(&self.state).describe_calls
    }

    fn check_stream(&self, stream: &str, op: Operation) -> Result<(), ProviderError> {
        if stream != self.name {
            return Err(ProviderError::new(op, format!("stream {stream} not found")));
        }
        if op == Operation::Describe {
            return Ok(());
        }
        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(ProviderError::new(op, "injected failure"));
        }
        if let Some(budget) = lock(&self.mutation_budget).as_mut() {
            if *budget == 0 {
                return Err(ProviderError::new(op, "injected failure"));
            }
            *budget -= 1;
        }
        Ok(())
    }
}

impl FakeStream {
    fn open_index(&self, shard_id: &str, op: Operation) -> Result<usize, ProviderError> {
        self.shards
            .iter()
            .position(|s| s.id == shard_id && s.is_open())
            .ok_or_else(|| ProviderError::new(op, format!("shard {shard_id} is not open")))
    }

    fn next_shard_id(&mut self) -> String {
        self.next_id += 1;
        format!("shardId-{:012}", self.next_id)
    }

    fn begin_update(&mut self) {
        self.status = StreamStatus::Updating;
        self.converging = true;
        self.remaining_updating = self.updating_polls;
    }

    fn ensure_active(&self, op: Operation) -> Result<(), ProviderError> {
        if !self.status.is_active() {
            return Err(ProviderError::new(op, format!("stream is {}", self.status)));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamControl for FakeStreamControl {
    async fn describe(&self, stream: &str) -> Result<StreamDescription, ProviderError> {
        self.check_stream(stream, Operation::Describe)?;

        let delay = *lock(&self.describe_delay);
        let probe = lock(&self.probe).clone();
        if let Some(probe) = &probe {
            probe.enter();
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(probe) = &probe {
            probe.exit();
        }

        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(ProviderError::new(Operation::Describe, "injected failure"));
        }

        let mut state = lock(&self.state);
        state.describe_calls += 1;
        if state.converging {
            if state.remaining_updating > 0 {
                state.remaining_updating -= 1;
            } else {
                state.status = StreamStatus::Active;
                state.converging = false;
            }
        }

        Ok(StreamDescription {
            name: self.name.clone(),
            status: state.status.clone(),
            shards: state.shards.clone(),
        })
    }

    async fn split(
        &self,
        stream: &str,
        shard_id: &str,
        new_starting_hash_key: HashKey,
    ) -> Result<(), ProviderError> {
        self.check_stream(stream, Operation::Split)?;
        let mut state = lock(&self.state);
        state.ensure_active(Operation::Split)?;
        let idx = state.open_index(shard_id, Operation::Split)?;

        let range = state.shards[idx].hash_range;
        if new_starting_hash_key <= range.start || new_starting_hash_key > range.end {
            return Err(ProviderError::new(
                Operation::Split,
                format!("hash key {new_starting_hash_key} outside shard {shard_id}"),
            ));
        }

        state.shards[idx].sequence_range.end = Some("closed".to_string());
        let left = state.next_shard_id();
        let right = state.next_shard_id();
        state.shards.push(child_shard(
            &left,
            shard_id,
            range.start,
            new_starting_hash_key - 1,
        ));
        state
            .shards
            .push(child_shard(&right, shard_id, new_starting_hash_key, range.end));

        state.splits.push((shard_id.to_string(), new_starting_hash_key));
        state.begin_update();
        Ok(())
    }

    async fn merge(
        &self,
        stream: &str,
        lower_shard_id: &str,
        higher_shard_id: &str,
    ) -> Result<(), ProviderError> {
        self.check_stream(stream, Operation::Merge)?;
        let mut state = lock(&self.state);
        state.ensure_active(Operation::Merge)?;
        let lo = state.open_index(lower_shard_id, Operation::Merge)?;
        let hi = state.open_index(higher_shard_id, Operation::Merge)?;

        let (lower, higher) = (state.shards[lo].hash_range, state.shards[hi].hash_range);
        if higher.start.checked_sub(lower.end) != Some(1) {
            return Err(ProviderError::new(
                Operation::Merge,
                format!("{lower_shard_id} and {higher_shard_id} are not adjacent"),
            ));
        }

        state.shards[lo].sequence_range.end = Some("closed".to_string());
        state.shards[hi].sequence_range.end = Some("closed".to_string());
        let merged = state.next_shard_id();
        state
            .shards
            .push(child_shard(&merged, lower_shard_id, lower.start, higher.end));

        state
            .merges
            .push((lower_shard_id.to_string(), higher_shard_id.to_string()));
        state.begin_update();
        Ok(())
    }
}

// ── Metrics ───────────────────────────────────────────────────────

/// Metric series keyed by name and optional shard id.
#[derive(Default)]
pub struct FakeMetrics {
    series: Mutex<HashMap<(String, Option<String>), Vec<Datapoint>>>,
    queries: Mutex<Vec<MetricQuery>>,
    fail: AtomicBool,
}

impl FakeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream-wide series whose datapoints sum to `total`.
    pub fn set_stream_total(&self, metric: &str, total: f64) {
        self.set_series(metric, None, vec![Datapoint { timestamp: 0, sum: total }]);
    }

    /// Per-shard series whose datapoints sum to `total`.
    pub fn set_shard_total(&self, shard_id: &str, metric: &str, total: f64) {
        self.set_series(
            metric,
            Some(shard_id),
            vec![Datapoint { timestamp: 0, sum: total }],
        );
    }

    pub fn set_series(&self, metric: &str, shard_id: Option<&str>, datapoints: Vec<Datapoint>) {
        lock(&self.series).insert(
            (metric.to_string(), shard_id.map(str::to_string)),
            datapoints,
        );
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn queries(&self) -> Vec<MetricQuery> {
        lock(&self.queries).clone()
    }
}

#[async_trait]
impl MetricsProvider for FakeMetrics {
    async fn query(&self, query: &MetricQuery) -> Result<Vec<Datapoint>, ProviderError> {
        lock(&self.queries).push(query.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ProviderError::new(Operation::QueryMetrics, "injected failure"));
        }
        let key = (
            query.metric_name.clone(),
            query.dimension(SHARD_ID_DIMENSION).map(str::to_string),
        );
        Ok(lock(&self.series).get(&key).cloned().unwrap_or_default())
    }
}

// ── Notifier ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    /// Whether any message contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        lock(&self.messages).iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }
}

// ── Client factory ────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeClientFactory {
    streams: HashMap<String, StreamClients>,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(
        mut self,
        name: &str,
        control: Arc<FakeStreamControl>,
        metrics: Arc<FakeMetrics>,
    ) -> Self {
        self.streams
            .insert(name.to_string(), StreamClients { control, metrics });
        self
    }
}

#[async_trait]
impl ClientFactory for FakeClientFactory {
    async fn clients_for(&self, stream: &StreamConfig) -> Result<StreamClients, ProviderError> {
        self.streams.get(&stream.name).cloned().ok_or_else(|| {
            ProviderError::new(
                Operation::Connect,
                format!("no clients registered for {}", stream.name),
            )
        })
    }
}
