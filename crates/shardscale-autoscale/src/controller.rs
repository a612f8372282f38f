//! Per-stream control-loop pass.
//!
//! One pass describes the stream, votes on fresh metrics, applies at most
//! one scaling action and reports the outcome:
//!
//! ```text
//! select metrics ─▶ describe ─▶ ShardView ─▶ fetch + vote ─▶ majority
//!                                                             │
//!                   notify ◀── poll until ACTIVE ◀── split / merge / no-op
//! ```
//!
//! Stream-level mode casts one vote per metric against the capacity of
//! every open shard. Shard-level mode votes per shard against a single
//! shard's capacity and splits at most the hottest up-voting shard.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::StdRng;
use tracing::{debug, info, warn};

use shardscale_core::{
    CapacityConfig, Config, MetricSample, MetricsWindowConfig, Shard, ShardId, StreamConfig,
    TieBreak, Vote,
};

use crate::error::{ScaleError, ScaleResult};
use crate::executor::{ConvergencePolicy, ScaleExecutor};
use crate::provider::{
    Dimension, MetricQuery, Notifier, SHARD_ID_DIMENSION, STREAM_NAME_DIMENSION, StreamClients,
};
use crate::shards::ShardView;
use crate::voter::{MetricSpec, Thresholds, UtilizationVoter, majority, shard_metrics, stream_metrics};

/// Read-only settings shared by every stream's pass.
pub struct ScaleContext {
    pub notifier: Arc<dyn Notifier>,
    pub tie_break: TieBreak,
    pub capacity: CapacityConfig,
    pub window: MetricsWindowConfig,
    pub convergence: ConvergencePolicy,
}

impl ScaleContext {
    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            tie_break: config.voting.tie_break,
            capacity: config.capacity.clone(),
            window: config.metrics.clone(),
            convergence: ConvergencePolicy::from(&config.convergence),
        }
    }
}

/// What a successful pass did to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleAction {
    Split { shards: Vec<ShardId> },
    Merge { pairs: Vec<(ShardId, ShardId)> },
    NoChange,
}

/// Final result of one stream's pass.
#[derive(Debug, Clone)]
pub enum PassOutcome {
    Acted(ScaleAction),
    /// An expected precondition stopped the pass.
    Skipped(ScaleError),
    /// A provider call failed or the stream did not converge.
    Failed(ScaleError),
}

impl PassOutcome {
    pub fn from_result(result: ScaleResult<ScaleAction>) -> Self {
        match result {
            Ok(action) => PassOutcome::Acted(action),
            Err(err) if err.is_precondition() => PassOutcome::Skipped(err),
            Err(err) => PassOutcome::Failed(err),
        }
    }
}

/// Drives one stream through a pass.
pub struct StreamController {
    stream: StreamConfig,
    ctx: Arc<ScaleContext>,
    clients: StreamClients,
    executor: ScaleExecutor,
    voter: UtilizationVoter,
}

impl StreamController {
    pub fn new(
        stream: StreamConfig,
        ctx: Arc<ScaleContext>,
        clients: StreamClients,
        rng: StdRng,
    ) -> Self {
        let executor = ScaleExecutor::new(clients.control.clone(), ctx.convergence, rng);
        let voter = UtilizationVoter::new(
            ctx.window.window_secs,
            ctx.capacity.clone(),
            Thresholds {
                up_pct: stream.scaling.up.threshold_pct,
                down_pct: stream.scaling.down.threshold_pct,
            },
        );
        Self {
            stream,
            ctx,
            clients,
            executor,
            voter,
        }
    }

    /// Run one pass. Never returns an error: every outcome is reported
    /// through the notifier and returned as a [`PassOutcome`].
    pub async fn run_pass(&mut self) -> PassOutcome {
        let result = self.pass().await;
        if let Err(err) = &result {
            self.report(err).await;
        }
        PassOutcome::from_result(result)
    }

    async fn pass(&mut self) -> ScaleResult<ScaleAction> {
        let metrics = if self.stream.shard_level_scale {
            shard_metrics(self.stream.scale_on)
        } else {
            stream_metrics(self.stream.scale_on)
        };
        if metrics.is_empty() {
            return Err(ScaleError::NoMetricsSelected);
        }

        let described = self.clients.control.describe(&self.stream.name).await?;
        if !described.status.is_active() {
            return Err(ScaleError::StreamNotActive(described.status));
        }

        let view = ShardView::build(&described.shards);
        view.ensure_splittable()?;
        debug!(
            stream = %self.stream.name,
            open = view.open_count(),
            splittable = view.splittable_shards().len(),
            "described stream"
        );

        if self.stream.shard_level_scale {
            self.shard_pass(&view, &metrics).await
        } else {
            self.stream_pass(&view, &metrics).await
        }
    }

    async fn stream_pass(&mut self, view: &ShardView, metrics: &[MetricSpec]) -> ScaleResult<ScaleAction> {
        let window = self.window();
        let dimensions = vec![Dimension::new(STREAM_NAME_DIMENSION, &self.stream.name)];

        let mut votes = Vec::with_capacity(metrics.len());
        for spec in metrics {
            let sample = self.fetch(spec, &dimensions, window).await?;
            let pct = self.voter.utilization_pct(&sample, view.open_count());
            let vote = self.voter.classify(pct);
            debug!(
                stream = %self.stream.name,
                metric = spec.name,
                utilization_pct = pct,
                %vote,
                "metric vote"
            );
            votes.push(vote);
        }

        let decision = majority(&votes, self.ctx.tie_break).ok_or(ScaleError::NoVotes)?;
        info!(stream = %self.stream.name, %decision, votes = votes.len(), "stream decision");

        match decision {
            Vote::ScaleUp => {
                let shards = self.executor.scale_up(&self.stream, view).await?;
                self.notify(format!(
                    "We split the following shards for the stream {}: {}",
                    self.stream.name,
                    shards.join(", ")
                ))
                .await;
                Ok(ScaleAction::Split { shards })
            }
            Vote::ScaleDown => {
                let pairs = self.executor.scale_down(&self.stream, view).await?;
                self.notify(format!(
                    "We merged {} shard pair(s) for the stream {}.",
                    pairs.len(),
                    self.stream.name
                ))
                .await;
                Ok(ScaleAction::Merge { pairs })
            }
            Vote::ScaleSame => {
                self.notify(format!("Stream {} is just right.", self.stream.name))
                    .await;
                Ok(ScaleAction::NoChange)
            }
        }
    }

    async fn shard_pass(&mut self, view: &ShardView, metrics: &[MetricSpec]) -> ScaleResult<ScaleAction> {
        let window = self.window();
        let mut hottest: Option<(&Shard, f64)> = None;
        let mut voted = 0usize;
        let mut bored = 0usize;
        let mut blocked: Vec<&str> = Vec::new();

        for shard in view.open_shards() {
            let dimensions = vec![
                Dimension::new(STREAM_NAME_DIMENSION, &self.stream.name),
                Dimension::new(SHARD_ID_DIMENSION, &shard.id),
            ];

            let mut votes = Vec::with_capacity(metrics.len());
            let mut peak = 0.0f64;
            for spec in metrics {
                let sample = self.fetch(spec, &dimensions, window).await?;
                let pct = self.voter.utilization_pct(&sample, 1);
                peak = peak.max(pct);
                votes.push(self.voter.classify(pct));
            }

            let Some(decision) = majority(&votes, self.ctx.tie_break) else {
                continue;
            };
            voted += 1;
            debug!(
                stream = %self.stream.name,
                shard = %shard.id,
                %decision,
                peak_utilization_pct = peak,
                "shard decision"
            );

            match decision {
                Vote::ScaleUp if view.is_splittable(&shard.id) => {
                    if hottest.is_none_or(|(_, best)| peak > best) {
                        hottest = Some((shard, peak));
                    }
                }
                Vote::ScaleUp => {
                    debug!(stream = %self.stream.name, shard = %shard.id, "hot shard has open children, not splitting");
                    blocked.push(&shard.id);
                }
                Vote::ScaleDown => bored += 1,
                Vote::ScaleSame => {}
            }
        }

        if voted == 0 {
            return Err(ScaleError::NoVotes);
        }

        if bored > 0 {
            self.notify(format!(
                "{bored} shard(s) are bored for the stream {}.",
                self.stream.name
            ))
            .await;
        }

        if !blocked.is_empty() {
            self.notify(format!(
                "Shard(s) {} of the stream {} are hot but have open children, not splitting.",
                blocked.join(", "),
                self.stream.name
            ))
            .await;
        }

        if let Some((shard, peak)) = hottest {
            self.executor.scale_up_shard(&self.stream, view, shard).await?;
            self.notify(format!(
                "We split the shard {} for the stream {} ({peak:.1}% utilized).",
                shard.id, self.stream.name
            ))
            .await;
            return Ok(ScaleAction::Split {
                shards: vec![shard.id.clone()],
            });
        }

        if bored == 0 && blocked.is_empty() {
            self.notify(format!(
                "Every shard of the stream {} is just right.",
                self.stream.name
            ))
            .await;
        }
        Ok(ScaleAction::NoChange)
    }

    async fn fetch(
        &self,
        spec: &MetricSpec,
        dimensions: &[Dimension],
        (window_start, window_end): (u64, u64),
    ) -> ScaleResult<MetricSample> {
        let query = MetricQuery {
            metric_name: spec.name.to_string(),
            dimensions: dimensions.to_vec(),
            window_start,
            window_end,
            period_secs: self.ctx.window.period_secs,
        };
        let datapoints = self.clients.metrics.query(&query).await?;
        Ok(MetricSample {
            name: query.metric_name,
            unit: spec.unit,
            datapoints,
        })
    }

    fn window(&self) -> (u64, u64) {
        let end = epoch_secs();
        (end.saturating_sub(self.ctx.window.window_secs), end)
    }

    async fn notify(&self, message: String) {
        self.ctx.notifier.notify(&message).await;
    }

    async fn report(&self, err: &ScaleError) {
        let name = &self.stream.name;
        if err.is_precondition() {
            info!(stream = %name, reason = %err, "pass skipped");
        } else {
            warn!(stream = %name, error = %err, "pass failed");
        }

        let message = match err {
            ScaleError::NoMetricsSelected => {
                format!("Stream {name} has no metrics configured, skipping.")
            }
            ScaleError::StreamNotActive(status) => format!(
                "Stream {name} is currently in state `{status}` which is not active, skipping."
            ),
            ScaleError::NoSplittableShards => format!(
                "Stream {name} currently has no open shards to scale up. This should never happen; check the shard lineage."
            ),
            ScaleError::NoVotes => format!("Stream {name} had no scaling votes, skipping."),
            ScaleError::AtCapacity { open, max, .. } => format!(
                "We want to scale up {name}, but it's at capacity ({open} of {max} shards)."
            ),
            ScaleError::AtFloor { open, min, .. } => format!(
                "We want to scale down {name} from {open} shards, but min_shards is {min}."
            ),
            ScaleError::SingleShard => {
                format!("We want to scale down {name}, but it has a single open shard.")
            }
            ScaleError::NoAdjacentShards => {
                format!("We want to merge shards for {name}, but it has no adjacent shards.")
            }
            ScaleError::AllCandidatesIgnored { pairs } => format!(
                "We want to merge shards for {name}, but all {pairs} adjacent pair(s) start with an ignore-listed shard."
            ),
            ScaleError::ConvergenceTimeout(timeout) => format!(
                "Stream {name} did not return to ACTIVE within {timeout:?}, leaving it for the next pass."
            ),
            ScaleError::Provider(e) => format!("Scaling {name} failed: {e}."),
            ScaleError::Interrupted { completed, cause } => format!(
                "Scaling {name} failed after applying {}: {cause}.",
                completed.join(", ")
            ),
        };
        self.notify(message).await;
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
