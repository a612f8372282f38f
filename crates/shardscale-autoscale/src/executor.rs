//! Split and merge execution with bounded convergence polling.
//!
//! Every mutating call is followed by polling `describe` until the stream
//! reports `ACTIVE` again. The poll loop runs under a deadline and fails
//! with [`ScaleError::ConvergenceTimeout`] instead of waiting forever.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use shardscale_core::{ConvergenceConfig, Shard, ShardId, StreamConfig};

use crate::adjacency::{AdjacentPair, adjacent_pairs};
use crate::error::{ScaleError, ScaleResult};
use crate::provider::StreamControl;
use crate::shards::ShardView;

/// How long and how often to poll for `ACTIVE` after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl From<&ConvergenceConfig> for ConvergencePolicy {
    fn from(cfg: &ConvergenceConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            timeout: cfg.timeout(),
        }
    }
}

/// Applies split and merge actions to one stream.
pub struct ScaleExecutor {
    control: Arc<dyn StreamControl>,
    convergence: ConvergencePolicy,
    rng: StdRng,
}

impl ScaleExecutor {
    pub fn new(control: Arc<dyn StreamControl>, convergence: ConvergencePolicy, rng: StdRng) -> Self {
        Self {
            control,
            convergence,
            rng,
        }
    }

    /// Split `scaling.up.rate` randomly chosen splittable shards.
    ///
    /// Returns the ids of the shards that were split.
    pub async fn scale_up(&mut self, stream: &StreamConfig, view: &ShardView) -> ScaleResult<Vec<ShardId>> {
        view.ensure_splittable()?;
        let rate = stream.scaling.up.rate;
        check_ceiling(stream, view, rate)?;

        let chosen: Vec<Shard> = view
            .splittable_shards()
            .choose_multiple(&mut self.rng, rate)
            .cloned()
            .collect();

        let mut split = Vec::with_capacity(chosen.len());
        for shard in &chosen {
            if let Err(e) = self.split_shard(&stream.name, shard).await {
                return Err(ScaleError::after(split, e));
            }
            split.push(shard.id.clone());
        }

        info!(stream = %stream.name, shards = ?split, "scaled up");
        Ok(split)
    }

    /// Split exactly `shard`, used when a single shard voted to scale up.
    pub async fn scale_up_shard(
        &mut self,
        stream: &StreamConfig,
        view: &ShardView,
        shard: &Shard,
    ) -> ScaleResult<()> {
        check_ceiling(stream, view, 1)?;
        self.split_shard(&stream.name, shard).await?;
        info!(stream = %stream.name, shard = %shard.id, "scaled up shard");
        Ok(())
    }

    /// Merge `scaling.down.rate` randomly chosen adjacent pairs.
    ///
    /// Returns the `(lower, higher)` ids of every pair that was merged.
    pub async fn scale_down(
        &mut self,
        stream: &StreamConfig,
        view: &ShardView,
    ) -> ScaleResult<Vec<(ShardId, ShardId)>> {
        let open = view.open_count();
        let rate = stream.scaling.down.rate;
        if open <= 1 {
            return Err(ScaleError::SingleShard);
        }
        if open < rate + stream.min_shards {
            return Err(ScaleError::AtFloor {
                open,
                requested: rate,
                min: stream.min_shards,
            });
        }

        let pairs = adjacent_pairs(view.open_shards());
        if pairs.is_empty() {
            return Err(ScaleError::NoAdjacentShards);
        }

        let chosen = self.sample_merge_pairs(&pairs, rate, &stream.scaling.down.ignore_list)?;

        let mut consumed: HashSet<&str> = HashSet::new();
        let mut merged = Vec::with_capacity(chosen.len());
        for pair in &chosen {
            if consumed.contains(pair.lower.id.as_str()) || consumed.contains(pair.higher.id.as_str()) {
                debug!(
                    stream = %stream.name,
                    lower = %pair.lower.id,
                    higher = %pair.higher.id,
                    "skipping pair overlapping an earlier merge"
                );
                continue;
            }
            if let Err(e) = self.merge_pair(&stream.name, pair).await {
                let completed = merged.iter().map(|(lo, hi)| format!("{lo}+{hi}")).collect();
                return Err(ScaleError::after(completed, e));
            }
            consumed.insert(pair.lower.id.as_str());
            consumed.insert(pair.higher.id.as_str());
            merged.push((pair.lower.id.clone(), pair.higher.id.clone()));
        }

        info!(stream = %stream.name, merged = merged.len(), "scaled down");
        Ok(merged)
    }

    /// Draw up to `rate` distinct pairs whose lower shard is not
    /// ignore-listed.
    ///
    /// Sampling from the allowed pairs only is the same distribution as
    /// redrawing until no ignored pair is chosen, and it cannot starve when
    /// `rate` covers every pair.
    fn sample_merge_pairs(
        &mut self,
        pairs: &[AdjacentPair],
        rate: usize,
        ignore_list: &[String],
    ) -> ScaleResult<Vec<AdjacentPair>> {
        let allowed: Vec<&AdjacentPair> = pairs
            .iter()
            .filter(|p| !ignore_list.iter().any(|id| *id == p.lower.id))
            .collect();
        if allowed.is_empty() {
            return Err(ScaleError::AllCandidatesIgnored { pairs: pairs.len() });
        }
        if allowed.len() < pairs.len() {
            debug!(
                allowed = allowed.len(),
                ignored = pairs.len() - allowed.len(),
                "ignore list excludes merge candidates"
            );
        }

        Ok(allowed
            .choose_multiple(&mut self.rng, rate)
            .map(|p| (*p).clone())
            .collect())
    }

    async fn split_shard(&self, stream: &str, shard: &Shard) -> ScaleResult<()> {
        let new_starting_hash_key = shard.hash_range.midpoint();
        debug!(
            stream,
            shard = %shard.id,
            new_starting_hash_key = %new_starting_hash_key,
            "splitting shard"
        );
        self.control
            .split(stream, &shard.id, new_starting_hash_key)
            .await?;
        self.await_active(stream).await
    }

    async fn merge_pair(&self, stream: &str, pair: &AdjacentPair) -> ScaleResult<()> {
        debug!(
            stream,
            lower = %pair.lower.id,
            higher = %pair.higher.id,
            "merging shards"
        );
        self.control
            .merge(stream, &pair.lower.id, &pair.higher.id)
            .await?;
        self.await_active(stream).await
    }

    /// Poll `describe` until the stream is `ACTIVE` or the deadline passes.
    pub async fn await_active(&self, stream: &str) -> ScaleResult<()> {
        match tokio::time::timeout(self.convergence.timeout, self.poll_until_active(stream)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(stream, timeout = ?self.convergence.timeout, "stream did not converge");
                Err(ScaleError::ConvergenceTimeout(self.convergence.timeout))
            }
        }
    }

    async fn poll_until_active(&self, stream: &str) -> ScaleResult<()> {
        loop {
            let described = self.control.describe(stream).await?;
            if described.status.is_active() {
                return Ok(());
            }
            debug!(stream, status = %described.status, "waiting for stream to become active");
            tokio::time::sleep(self.convergence.poll_interval).await;
        }
    }
}

fn check_ceiling(stream: &StreamConfig, view: &ShardView, requested: usize) -> ScaleResult<()> {
    let open = view.open_count();
    if open + requested > stream.max_shards {
        return Err(ScaleError::AtCapacity {
            open,
            requested,
            max: stream.max_shards,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeStreamControl, open_shard, stream_config};
    use rand::SeedableRng;
    use shardscale_core::StreamStatus;

    fn policy() -> ConvergencePolicy {
        ConvergencePolicy {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        }
    }

    fn executor(control: &Arc<FakeStreamControl>) -> ScaleExecutor {
        ScaleExecutor::new(control.clone(), policy(), StdRng::seed_from_u64(7))
    }

    fn even_shards(n: u128) -> Vec<Shard> {
        (0..n)
            .map(|i| open_shard(&format!("shard-{i}"), i * 100, i * 100 + 99))
            .collect()
    }

    #[tokio::test]
    async fn split_uses_floor_midpoint_and_waits_for_active() {
        let control = Arc::new(FakeStreamControl::new("s", vec![open_shard("a", 0, 100)]));
        control.set_updating_polls(3);
        let mut stream = stream_config("s");
        stream.max_shards = 4;

        let view = ShardView::build(&control.shards());
        let split = executor(&control).scale_up(&stream, &view).await.unwrap();

        assert_eq!(split, vec!["a".to_string()]);
        assert_eq!(control.splits(), vec![("a".to_string(), 50)]);
        assert!(control.describe_calls() >= 4);
        assert_eq!(control.status(), StreamStatus::Active);
    }

    #[tokio::test]
    async fn split_refused_at_max_shards() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(5)));
        let mut stream = stream_config("s");
        stream.max_shards = 5;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_up(&stream, &view).await.unwrap_err();

        assert!(matches!(err, ScaleError::AtCapacity { open: 5, requested: 1, max: 5 }));
        assert!(control.splits().is_empty());
    }

    #[tokio::test]
    async fn split_rate_counts_against_ceiling() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
        let mut stream = stream_config("s");
        stream.max_shards = 4;
        stream.scaling.up.rate = 2;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_up(&stream, &view).await.unwrap_err();
        assert!(matches!(err, ScaleError::AtCapacity { requested: 2, .. }));
    }

    #[tokio::test]
    async fn split_samples_distinct_shards() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(4)));
        let mut stream = stream_config("s");
        stream.max_shards = 10;
        stream.scaling.up.rate = 3;

        let view = ShardView::build(&control.shards());
        let split = executor(&control).scale_up(&stream, &view).await.unwrap();

        let unique: HashSet<_> = split.iter().collect();
        assert_eq!(split.len(), 3);
        assert_eq!(unique.len(), 3);
        assert_eq!(control.splits().len(), 3);
    }

    #[tokio::test]
    async fn same_seed_same_choice() {
        let shards = even_shards(6);
        let mut stream = stream_config("s");
        stream.max_shards = 10;
        stream.scaling.up.rate = 2;

        let first = Arc::new(FakeStreamControl::new("s", shards.clone()));
        let second = Arc::new(FakeStreamControl::new("s", shards.clone()));
        let view = ShardView::build(&shards);

        let a = executor(&first).scale_up(&stream, &view).await.unwrap();
        let b = executor(&second).scale_up(&stream, &view).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn merge_refused_at_min_shards() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(2)));
        let mut stream = stream_config("s");
        stream.min_shards = 2;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_down(&stream, &view).await.unwrap_err();

        assert!(matches!(err, ScaleError::AtFloor { open: 2, requested: 1, min: 2 }));
        assert!(control.merges().is_empty());
    }

    #[tokio::test]
    async fn merge_refused_with_single_shard() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(1)));
        let mut stream = stream_config("s");
        stream.min_shards = 0;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_down(&stream, &view).await.unwrap_err();
        assert!(matches!(err, ScaleError::SingleShard));
    }

    #[tokio::test]
    async fn merge_without_adjacent_pairs_is_reported() {
        let control = Arc::new(FakeStreamControl::new(
            "s",
            vec![open_shard("a", 0, 100), open_shard("b", 200, 300)],
        ));
        let stream = stream_config("s");

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_down(&stream, &view).await.unwrap_err();
        assert!(matches!(err, ScaleError::NoAdjacentShards));
        assert!(control.merges().is_empty());
    }

    #[tokio::test]
    async fn merge_passes_lower_then_higher() {
        let control = Arc::new(FakeStreamControl::new(
            "s",
            vec![open_shard("high", 101, 200), open_shard("low", 0, 100)],
        ));
        let stream = stream_config("s");

        let view = ShardView::build(&control.shards());
        let merged = executor(&control).scale_down(&stream, &view).await.unwrap();

        assert_eq!(merged, vec![("low".to_string(), "high".to_string())]);
        assert_eq!(control.merges(), vec![("low".to_string(), "high".to_string())]);
        assert_eq!(ShardView::build(&control.shards()).open_count(), 1);
    }

    #[tokio::test]
    async fn merge_gives_up_when_every_lower_shard_is_ignored() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
        let mut stream = stream_config("s");
        stream.scaling.down.ignore_list = vec!["shard-0".to_string(), "shard-1".to_string()];

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_down(&stream, &view).await.unwrap_err();

        assert!(matches!(err, ScaleError::AllCandidatesIgnored { pairs: 2 }));
        assert!(control.merges().is_empty());
    }

    #[tokio::test]
    async fn merge_resamples_around_ignored_shard() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
        let mut stream = stream_config("s");
        stream.scaling.down.ignore_list = vec!["shard-0".to_string()];

        let view = ShardView::build(&control.shards());
        for seed in 0..20 {
            let mut exec =
                ScaleExecutor::new(control.clone(), policy(), StdRng::seed_from_u64(seed));
            let pairs = exec
                .sample_merge_pairs(&adjacent_pairs(view.open_shards()), 1, &stream.scaling.down.ignore_list)
                .unwrap();
            assert_eq!(pairs.len(), 1);
            assert_eq!(pairs[0].lower.id, "shard-1");
        }

        let merged = executor(&control).scale_down(&stream, &view).await.unwrap();
        assert_eq!(merged, vec![("shard-1".to_string(), "shard-2".to_string())]);
    }

    #[tokio::test]
    async fn merge_rate_covering_every_pair_skips_only_ignored_ones() {
        let mut stream = stream_config("s");
        stream.scaling.down.rate = 2;
        stream.scaling.down.ignore_list = vec!["shard-0".to_string()];

        for seed in 0..20 {
            let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
            let view = ShardView::build(&control.shards());
            let mut exec =
                ScaleExecutor::new(control.clone(), policy(), StdRng::seed_from_u64(seed));

            let merged = exec.scale_down(&stream, &view).await.unwrap();

            assert_eq!(merged, vec![("shard-1".to_string(), "shard-2".to_string())]);
            assert_eq!(control.merges(), merged);
        }
    }

    #[tokio::test]
    async fn overlapping_pairs_merge_once() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
        let mut stream = stream_config("s");
        stream.scaling.down.rate = 2;

        let view = ShardView::build(&control.shards());
        let merged = executor(&control).scale_down(&stream, &view).await.unwrap();

        // shard-0/1 and shard-1/2 share shard-1, only one can be merged.
        assert_eq!(merged.len(), 1);
        assert_eq!(control.merges().len(), 1);
    }

    #[tokio::test]
    async fn convergence_timeout_is_distinct() {
        let control = Arc::new(FakeStreamControl::new("s", vec![open_shard("a", 0, 100)]));
        control.set_updating_polls(usize::MAX);
        let mut stream = stream_config("s");
        stream.max_shards = 4;

        let view = ShardView::build(&control.shards());
        let mut exec = ScaleExecutor::new(
            control.clone(),
            ConvergencePolicy {
                poll_interval: Duration::from_millis(5),
                timeout: Duration::from_millis(50),
            },
            StdRng::seed_from_u64(7),
        );
        let err = exec.scale_up(&stream, &view).await.unwrap_err();

        assert!(matches!(err, ScaleError::ConvergenceTimeout(_)));
        assert_eq!(control.splits().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_aborts_split() {
        let control = Arc::new(FakeStreamControl::new("s", vec![open_shard("a", 0, 100)]));
        control.fail_mutations(true);
        let mut stream = stream_config("s");
        stream.max_shards = 4;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_up(&stream, &view).await.unwrap_err();
        assert!(matches!(err, ScaleError::Provider(_)));
    }

    #[tokio::test]
    async fn failure_after_split_reports_completed_shards() {
        let control = Arc::new(FakeStreamControl::new("s", even_shards(3)));
        control.fail_mutations_after(1);
        let mut stream = stream_config("s");
        stream.scaling.up.rate = 2;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_up(&stream, &view).await.unwrap_err();

        let split = control.splits();
        assert_eq!(split.len(), 1);
        match err {
            ScaleError::Interrupted { completed, cause } => {
                assert_eq!(completed, vec![split[0].0.clone()]);
                assert!(matches!(*cause, ScaleError::Provider(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_after_merge_reports_completed_pairs() {
        // Two disjoint adjacent pairs, so both are merged in some order.
        let control = Arc::new(FakeStreamControl::new(
            "s",
            vec![
                open_shard("a", 0, 99),
                open_shard("b", 100, 199),
                open_shard("c", 300, 399),
                open_shard("d", 400, 499),
            ],
        ));
        control.fail_mutations_after(1);
        let mut stream = stream_config("s");
        stream.scaling.down.rate = 2;

        let view = ShardView::build(&control.shards());
        let err = executor(&control).scale_down(&stream, &view).await.unwrap_err();

        let merges = control.merges();
        assert_eq!(merges.len(), 1);
        let (lo, hi) = &merges[0];
        match err {
            ScaleError::Interrupted { completed, cause } => {
                assert_eq!(completed, vec![format!("{lo}+{hi}")]);
                assert!(matches!(*cause, ScaleError::Provider(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
