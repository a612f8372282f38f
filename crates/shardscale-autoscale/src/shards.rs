//! Open and splittable shard sets derived from a stream description.

use shardscale_core::Shard;

use crate::error::{ScaleError, ScaleResult};

/// The subsets of a stream's shard list the autoscaler acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardView {
    open: Vec<Shard>,
    splittable: Vec<Shard>,
}

impl ShardView {
    /// Partition the raw shard list.
    ///
    /// A shard is open when its sequence range has no end. It is
    /// splittable when it is open and no other open shard names it as
    /// parent. List order is preserved in both sets.
    pub fn build(shards: &[Shard]) -> Self {
        let open: Vec<Shard> = shards.iter().filter(|s| s.is_open()).cloned().collect();
        let splittable = open
            .iter()
            .filter(|s| {
                !open
                    .iter()
                    .any(|other| other.parent_id.as_deref() == Some(s.id.as_str()))
            })
            .cloned()
            .collect();

        Self { open, splittable }
    }

    pub fn open_shards(&self) -> &[Shard] {
        &self.open
    }

    pub fn splittable_shards(&self) -> &[Shard] {
        &self.splittable
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn is_splittable(&self, shard_id: &str) -> bool {
        self.splittable.iter().any(|s| s.id == shard_id)
    }

    /// An empty splittable set means the shard lineage is inconsistent;
    /// the pass is skipped rather than acted on.
    pub fn ensure_splittable(&self) -> ScaleResult<()> {
        if self.splittable.is_empty() {
            return Err(ScaleError::NoSplittableShards);
        }
        Ok(())
    }
}
