//! Merge candidates: pairs of open shards with contiguous hash ranges.

use shardscale_core::Shard;

/// Two open shards whose hash ranges touch, ordered by range start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjacentPair {
    pub lower: Shard,
    pub higher: Shard,
}

impl AdjacentPair {
    pub fn contains(&self, shard_id: &str) -> bool {
        self.lower.id == shard_id || self.higher.id == shard_id
    }
}

/// Every adjacent pair among `open`.
///
/// Compares all unordered pairs. List order says nothing about keyspace
/// order once shards have been split or merged, so no sort is attempted.
pub fn adjacent_pairs(open: &[Shard]) -> Vec<AdjacentPair> {
    let mut pairs = Vec::new();

    for (i, a) in open.iter().enumerate() {
        for b in &open[i + 1..] {
            let (lower, higher) = if a.hash_range.start <= b.hash_range.start {
                (a, b)
            } else {
                (b, a)
            };

            if higher.hash_range.start.checked_sub(lower.hash_range.end) == Some(1) {
                pairs.push(AdjacentPair {
                    lower: lower.clone(),
                    higher: higher.clone(),
                });
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_shard;

    #[test]
    fn contiguous_ranges_form_one_pair() {
        let shards = vec![open_shard("a", 0, 100), open_shard("b", 101, 200)];
        let pairs = adjacent_pairs(&shards);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].lower.id, "a");
        assert_eq!(pairs[0].higher.id, "b");
    }

    #[test]
    fn gap_is_not_adjacent() {
        let shards = vec![open_shard("a", 0, 100), open_shard("b", 102, 200)];
        assert!(adjacent_pairs(&shards).is_empty());
    }

    #[test]
    fn pair_is_ordered_by_range_start_not_list_order() {
        let shards = vec![open_shard("high", 101, 200), open_shard("low", 0, 100)];
        let pairs = adjacent_pairs(&shards);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].lower.id, "low");
        assert_eq!(pairs[0].higher.id, "high");
    }

    #[test]
    fn overlapping_ranges_are_not_adjacent() {
        let shards = vec![open_shard("a", 0, 100), open_shard("b", 50, 200)];
        assert!(adjacent_pairs(&shards).is_empty());
    }

    #[test]
    fn scattered_list_finds_every_neighbour() {
        let shards = vec![
            open_shard("d", 300, 399),
            open_shard("a", 0, 99),
            open_shard("c", 200, 299),
            open_shard("b", 100, 199),
        ];
        let mut found: Vec<_> = adjacent_pairs(&shards)
            .into_iter()
            .map(|p| (p.lower.id, p.higher.id))
            .collect();
        found.sort();
        assert_eq!(
            found,
            vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "c".to_string()),
                ("c".to_string(), "d".to_string()),
            ]
        );
    }

    #[test]
    fn full_keyspace_boundaries() {
        let half = u128::MAX / 2;
        let shards = vec![open_shard("a", 0, half), open_shard("b", half + 1, u128::MAX)];
        assert_eq!(adjacent_pairs(&shards).len(), 1);
    }

    #[test]
    fn repeated_calls_agree() {
        let shards = vec![
            open_shard("a", 0, 99),
            open_shard("b", 100, 199),
            open_shard("c", 201, 299),
        ];
        assert_eq!(adjacent_pairs(&shards), adjacent_pairs(&shards));
    }
}
