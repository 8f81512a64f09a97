//! Shard-to-node resolution.

use crate::types::NodeId;
use collapse_core::types::ShardId;
use std::collections::BTreeMap;

/// Resolves shards to their owning nodes.
pub trait ShardTopology: Send + Sync {
    /// Every shard to search, in ascending id order.
    fn shards(&self) -> Vec<ShardId>;

    fn node_for(&self, shard: ShardId) -> Option<NodeId>;

    /// The node the coordinator runs on.
    fn local_node(&self) -> &NodeId;

    fn is_local(&self, shard: ShardId) -> bool {
        self.node_for(shard).as_ref() == Some(self.local_node())
    }

    fn shard_count(&self) -> usize {
        self.shards().len()
    }
}

/// A fixed shard assignment.
#[derive(Debug, Clone)]
pub struct StaticTopology {
    local: NodeId,
    assignments: BTreeMap<ShardId, NodeId>,
}

impl StaticTopology {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            assignments: BTreeMap::new(),
        }
    }

    /// `count` shards numbered from zero, all on the local node.
    pub fn all_local(local: NodeId, count: u32) -> Self {
        let mut topology = Self::new(local.clone());
        for id in 0..count {
            topology = topology.assign(ShardId::new(id), local.clone());
        }
        topology
    }

    pub fn assign(mut self, shard: ShardId, node: NodeId) -> Self {
        self.assignments.insert(shard, node);
        self
    }

    /// Shards hosted by `node`.
    pub fn shards_on(&self, node: &NodeId) -> Vec<ShardId> {
        self.assignments
            .iter()
            .filter(|(_, n)| *n == node)
            .map(|(s, _)| *s)
            .collect()
    }
}

impl ShardTopology for StaticTopology {
    fn shards(&self) -> Vec<ShardId> {
        self.assignments.keys().copied().collect()
    }

    fn node_for(&self, shard: ShardId) -> Option<NodeId> {
        self.assignments.get(&shard).cloned()
    }

    fn local_node(&self) -> &NodeId {
        &self.local
    }
}
