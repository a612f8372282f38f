//! Utilization voting.
//!
//! Each metric sample casts one vote based on how much of the theoretical
//! shard capacity it used over the lookback window:
//!
//! ```text
//! avg          = sum(datapoint.sum) / window_secs
//! capacity     = per_shard_limit(unit) * shard_count
//! utilization  = avg / capacity * 100
//!
//! utilization >= up_threshold   => ScaleUp
//! utilization <= down_threshold => ScaleDown
//! otherwise                     => ScaleSame
//! ```
//!
//! Votes are then reduced to one decision by [`majority`].

use shardscale_core::{CapacityConfig, MetricSample, MetricUnit, ScaleOn, TieBreak, Vote};

/// A metric the autoscaler queries, with the capacity it is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub unit: MetricUnit,
}

const fn bytes(name: &'static str) -> MetricSpec {
    MetricSpec {
        name,
        unit: MetricUnit::Bytes,
    }
}

const fn records(name: &'static str) -> MetricSpec {
    MetricSpec {
        name,
        unit: MetricUnit::Records,
    }
}

/// Stream-wide metrics for a `scale_on` setting.
pub fn stream_metrics(scale_on: ScaleOn) -> Vec<MetricSpec> {
    let mut metrics = Vec::new();
    if scale_on.scales_get() {
        metrics.extend([bytes("GetRecords.Bytes"), records("GetRecords.Records")]);
    }
    if scale_on.scales_put() {
        metrics.extend([bytes("PutRecord.Bytes"), records("IncomingRecords")]);
    }
    if scale_on.scales_puts() {
        metrics.extend([bytes("PutRecords.Bytes"), records("PutRecords.Records")]);
    }
    metrics
}

/// Per-shard metrics for a `scale_on` setting.
pub fn shard_metrics(scale_on: ScaleOn) -> Vec<MetricSpec> {
    let mut metrics = Vec::new();
    if scale_on.scales_get() {
        metrics.extend([bytes("IncomingBytes"), records("IncomingRecords")]);
    }
    if scale_on.scales_put() || scale_on.scales_puts() {
        metrics.extend([bytes("OutgoingBytes"), records("OutgoingRecords")]);
    }
    metrics
}

/// Thresholds a utilization percentage is classified against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub up_pct: f64,
    pub down_pct: f64,
}

/// Turns metric samples into votes. Holds no state between calls.
#[derive(Debug, Clone)]
pub struct UtilizationVoter {
    window_secs: u64,
    capacity: CapacityConfig,
    thresholds: Thresholds,
}

impl UtilizationVoter {
    pub fn new(window_secs: u64, capacity: CapacityConfig, thresholds: Thresholds) -> Self {
        Self {
            window_secs,
            capacity,
            thresholds,
        }
    }

    /// Percentage of `shard_count` shards' capacity used by `sample`.
    ///
    /// Shard-level voting passes `1`; stream-level voting passes the
    /// number of open shards.
    pub fn utilization_pct(&self, sample: &MetricSample, shard_count: usize) -> f64 {
        let avg_per_sec = sample.total() / self.window_secs.max(1) as f64;
        let per_shard = match sample.unit {
            MetricUnit::Bytes => self.capacity.bytes_per_sec,
            MetricUnit::Records => self.capacity.records_per_sec,
        };
        let capacity = per_shard * shard_count.max(1) as f64;
        avg_per_sec / capacity * 100.0
    }

    pub fn classify(&self, utilization_pct: f64) -> Vote {
        if utilization_pct >= self.thresholds.up_pct {
            Vote::ScaleUp
        } else if utilization_pct <= self.thresholds.down_pct {
            Vote::ScaleDown
        } else {
            Vote::ScaleSame
        }
    }

    pub fn vote(&self, sample: &MetricSample, shard_count: usize) -> Vote {
        self.classify(self.utilization_pct(sample, shard_count))
    }
}

/// Most frequent vote, or `None` when no votes were cast.
///
/// Ties are resolved by `tie_break`:
/// - [`TieBreak::Conservative`] prefers `ScaleSame`, then `ScaleDown`, then `ScaleUp`.
/// - [`TieBreak::FirstSeen`] prefers the tied vote that appears earliest in `votes`.
pub fn majority(votes: &[Vote], tie_break: TieBreak) -> Option<Vote> {
    let count = |v: Vote| votes.iter().filter(|&&x| x == v).count();
    let best = [Vote::ScaleUp, Vote::ScaleDown, Vote::ScaleSame]
        .into_iter()
        .map(count)
        .max()?;
    if best == 0 {
        return None;
    }

    match tie_break {
        TieBreak::Conservative => [Vote::ScaleSame, Vote::ScaleDown, Vote::ScaleUp]
            .into_iter()
            .find(|&v| count(v) == best),
        TieBreak::FirstSeen => votes.iter().copied().find(|&v| count(v) == best),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardscale_core::Datapoint;

    fn voter(up: f64, down: f64) -> UtilizationVoter {
        UtilizationVoter::new(
            1440,
            CapacityConfig::default(),
            Thresholds {
                up_pct: up,
                down_pct: down,
            },
        )
    }

    fn sample(unit: MetricUnit, sums: &[f64]) -> MetricSample {
        MetricSample {
            name: "test".to_string(),
            unit,
            datapoints: sums
                .iter()
                .enumerate()
                .map(|(i, &sum)| Datapoint {
                    timestamp: i as u64 * 60,
                    sum,
                })
                .collect(),
        }
    }

    #[test]
    fn byte_utilization_over_window() {
        let v = voter(75.0, 25.0);
        // 1,440,000 bytes over 1440s = 1000 B/s against 2 MiB/s.
        let s = sample(MetricUnit::Bytes, &[720_000.0, 720_000.0]);
        let pct = v.utilization_pct(&s, 1);
        assert!((pct - 1000.0 / 2_097_152.0 * 100.0).abs() < 1e-12);
        assert!((pct - 0.0477).abs() < 0.001);
        assert_eq!(v.vote(&s, 1), Vote::ScaleDown);

        let strict = voter(75.0, 0.01);
        assert_eq!(strict.vote(&s, 1), Vote::ScaleSame);
    }

    #[test]
    fn record_utilization_scales_with_shard_count() {
        let v = voter(75.0, 25.0);
        // 1500 records/s.
        let s = sample(MetricUnit::Records, &[1500.0 * 1440.0]);
        assert_eq!(v.utilization_pct(&s, 1), 75.0);
        assert_eq!(v.vote(&s, 1), Vote::ScaleUp);
        assert_eq!(v.utilization_pct(&s, 3), 25.0);
        assert_eq!(v.vote(&s, 3), Vote::ScaleDown);
        assert_eq!(v.vote(&s, 2), Vote::ScaleSame);
    }

    #[test]
    fn empty_sample_votes_down() {
        let v = voter(75.0, 25.0);
        let s = sample(MetricUnit::Bytes, &[]);
        assert_eq!(v.utilization_pct(&s, 4), 0.0);
        assert_eq!(v.vote(&s, 4), Vote::ScaleDown);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let v = voter(50.0, 10.0);
        assert_eq!(v.classify(50.0), Vote::ScaleUp);
        assert_eq!(v.classify(10.0), Vote::ScaleDown);
        assert_eq!(v.classify(10.0001), Vote::ScaleSame);
    }

    #[test]
    fn stream_metric_selection() {
        let names = |on| stream_metrics(on).into_iter().map(|m| m.name).collect::<Vec<_>>();
        assert_eq!(names(ScaleOn::Get), vec!["GetRecords.Bytes", "GetRecords.Records"]);
        assert_eq!(names(ScaleOn::Put), vec!["PutRecord.Bytes", "IncomingRecords"]);
        assert_eq!(names(ScaleOn::Puts), vec!["PutRecords.Bytes", "PutRecords.Records"]);
        assert_eq!(names(ScaleOn::BothPuts).len(), 4);
        assert_eq!(names(ScaleOn::All).len(), 6);

        let units: Vec<_> = stream_metrics(ScaleOn::Put).into_iter().map(|m| m.unit).collect();
        assert_eq!(units, vec![MetricUnit::Bytes, MetricUnit::Records]);
    }

    #[test]
    fn shard_metric_selection() {
        let names = |on| shard_metrics(on).into_iter().map(|m| m.name).collect::<Vec<_>>();
        assert_eq!(names(ScaleOn::Get), vec!["IncomingBytes", "IncomingRecords"]);
        assert_eq!(names(ScaleOn::Put), vec!["OutgoingBytes", "OutgoingRecords"]);
        assert_eq!(names(ScaleOn::BothPuts), vec!["OutgoingBytes", "OutgoingRecords"]);
        assert_eq!(names(ScaleOn::All).len(), 4);
    }

    #[test]
    fn majority_picks_largest_bucket() {
        use Vote::*;
        let votes = [ScaleUp, ScaleDown, ScaleUp, ScaleSame];
        assert_eq!(majority(&votes, TieBreak::Conservative), Some(ScaleUp));
        assert_eq!(majority(&votes, TieBreak::FirstSeen), Some(ScaleUp));
    }

    #[test]
    fn majority_of_nothing_is_none() {
        assert_eq!(majority(&[], TieBreak::Conservative), None);
        assert_eq!(majority(&[], TieBreak::FirstSeen), None);
    }

    #[test]
    fn conservative_tie_break_prefers_least_disruptive() {
        use Vote::*;
        assert_eq!(
            majority(&[ScaleUp, ScaleDown], TieBreak::Conservative),
            Some(ScaleDown)
        );
        assert_eq!(
            majority(&[ScaleUp, ScaleSame, ScaleDown], TieBreak::Conservative),
            Some(ScaleSame)
        );
        assert_eq!(
            majority(&[ScaleUp, ScaleUp, ScaleSame, ScaleSame], TieBreak::Conservative),
            Some(ScaleSame)
        );
    }

    #[test]
    fn first_seen_tie_break_follows_input_order() {
        use Vote::*;
        assert_eq!(
            majority(&[ScaleUp, ScaleDown], TieBreak::FirstSeen),
            Some(ScaleUp)
        );
        assert_eq!(
            majority(&[ScaleSame, ScaleDown, ScaleDown, ScaleSame], TieBreak::FirstSeen),
            Some(ScaleSame)
        );
    }

    #[test]
    fn voting_is_deterministic() {
        let v = voter(75.0, 25.0);
        let s = sample(MetricUnit::Bytes, &[1.0e9, 2.0e9]);
        assert_eq!(v.utilization_pct(&s, 2), v.utilization_pct(&s, 2));
        let votes = [Vote::ScaleDown, Vote::ScaleUp];
        assert_eq!(
            majority(&votes, TieBreak::Conservative),
            majority(&votes, TieBreak::Conservative)
        );
    }
}
