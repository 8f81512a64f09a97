//! Transport seam between the coordinator and shard-owning nodes.

use crate::error::{ShardError, TransportError};
use crate::shard::SearchShard;
use crate::types::{FetchRequest, FetchResult, NodeId, ShardSearchRequest};
use async_trait::async_trait;
use collapse_core::codec;
use collapse_core::types::{ShardId, ShardQueryResult};
use std::collections::HashMap;
use std::sync::Arc;

/// Delivers shard requests to the node owning the shard.
///
/// Every call fails independently; the coordinator records the failure
/// against the shard and carries on with the rest.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn send_query(
        &self,
        node: &NodeId,
        request: ShardSearchRequest,
    ) -> Result<ShardQueryResult, ShardError>;

    async fn send_fetch(&self, node: &NodeId, request: FetchRequest)
        -> Result<FetchResult, ShardError>;

    /// Release a search context. Returns whether it was still open.
    async fn free_context(
        &self,
        node: &NodeId,
        shard_id: ShardId,
        context_id: u64,
    ) -> Result<bool, ShardError>;
}

/// In-process transport over shards held in this process.
///
/// Query results still travel through the wire codec, so in-process
/// clusters exercise the same bytes a remote node would send.
#[derive(Clone, Default)]
pub struct LocalTransport {
    shards: HashMap<ShardId, Arc<SearchShard>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shard(mut self, shard: SearchShard) -> Self {
        self.shards.insert(shard.shard_id(), Arc::new(shard));
        self
    }

    pub fn add_shard(&mut self, shard: Arc<SearchShard>) {
        self.shards.insert(shard.shard_id(), shard);
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<&Arc<SearchShard>> {
        self.shards.get(&shard_id)
    }

    fn lookup(&self, shard_id: ShardId) -> Result<&Arc<SearchShard>, ShardError> {
        self.shards
            .get(&shard_id)
            .ok_or_else(|| TransportError::UnknownShard(shard_id).into())
    }
}

#[async_trait]
impl SearchTransport for LocalTransport {
    async fn send_query(
        &self,
        _node: &NodeId,
        request: ShardSearchRequest,
    ) -> Result<ShardQueryResult, ShardError> {
        let shard = self.lookup(request.shard_id)?;
        let result = shard.execute_query(&request).await?;
        let bytes = codec::encode_shard_result(&result)?;
        Ok(codec::decode_shard_result(&bytes)?)
    }

    async fn send_fetch(
        &self,
        _node: &NodeId,
        request: FetchRequest,
    ) -> Result<FetchResult, ShardError> {
        let shard = self.lookup(request.shard_id)?;
        Ok(shard.execute_fetch(&request).await?)
    }

    async fn free_context(
        &self,
        _node: &NodeId,
        shard_id: ShardId,
        context_id: u64,
    ) -> Result<bool, ShardError> {
        Ok(self.lookup(shard_id)?.free_context(context_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::MemoryIndex;
    use crate::types::{Query, QueryMode, SearchRequest};

    #[tokio::test]
    async fn test_unknown_shard() {
        let transport = LocalTransport::new();
        let request = ShardSearchRequest::for_shard(
            ShardId::new(3),
            &SearchRequest::new(Query::match_all()),
            QueryMode::Plain,
        );
        let err = transport
            .send_query(&NodeId::new("local"), request)
            .await
            .unwrap_err();
        assert_eq!(err, ShardError::Transport(TransportError::UnknownShard(ShardId::new(3))));
    }

    #[tokio::test]
    async fn test_query_round_trips_through_codec() {
        let index = MemoryIndex::builder()
            .document(r#"{"body": "merge sorted streams"}"#)
            .build()
            .unwrap();
        let transport =
            LocalTransport::new().with_shard(SearchShard::new(ShardId::new(0), Arc::new(index)));
        let request = ShardSearchRequest::for_shard(
            ShardId::new(0),
            &SearchRequest::new(Query::new("streams")),
            QueryMode::Plain,
        );
        let result = transport
            .send_query(&NodeId::new("local"), request)
            .await
            .unwrap();
        assert_eq!(result.shard_id, ShardId::new(0));
        assert_eq!(result.total_hits(), 1);
        assert_eq!(
            transport.shard(ShardId::new(0)).unwrap().open_contexts().await,
            1
        );
    }
}
