//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use collapse_core::group::GroupedResultSet;
use collapse_core::sort::SortSpec;
use collapse_core::types::{DocId, RankedResultSet, ShardId, ShardQueryResult};
use collapse_distributed::coordinator::{CoordinatorConfig, SearchCoordinator, StaticTopology};
use collapse_distributed::shard::{GroupSpec, LocalSearchEngine, MemoryIndex, SearchShard};
use collapse_distributed::transport::{LocalTransport, SearchTransport};
use collapse_distributed::{
    EngineError, FetchRequest, FetchResult, NodeId, Query, ShardError, ShardSearchRequest,
    StoredDocument,
};
use std::sync::{Arc, Mutex};

pub fn local_node() -> NodeId {
    NodeId::new("local")
}

/// Shards built from JSON document arrays, numbered from zero.
pub fn shards(docs: &[&str]) -> Vec<Arc<SearchShard>> {
    docs.iter()
        .enumerate()
        .map(|(id, json)| {
            let index = MemoryIndex::from_json_array(json).unwrap();
            Arc::new(SearchShard::new(ShardId::new(id as u32), Arc::new(index)))
        })
        .collect()
}

pub fn local_transport(shards: &[Arc<SearchShard>]) -> LocalTransport {
    let mut transport = LocalTransport::new();
    for shard in shards {
        transport.add_shard(Arc::clone(shard));
    }
    transport
}

pub fn coordinator(
    transport: Arc<dyn SearchTransport>,
    shard_count: u32,
    config: CoordinatorConfig,
) -> SearchCoordinator {
    SearchCoordinator::new(
        transport,
        Arc::new(StaticTopology::all_local(local_node(), shard_count)),
        config,
    )
}

pub async fn open_contexts(shards: &[Arc<SearchShard>]) -> usize {
    let mut open = 0;
    for shard in shards {
        open += shard.open_contexts().await;
    }
    open
}

/// Records every request before handing it to the wrapped transport.
pub struct RecordingTransport {
    inner: LocalTransport,
    pub queries: Mutex<Vec<ShardSearchRequest>>,
    pub fetches: Mutex<Vec<FetchRequest>>,
}

impl RecordingTransport {
    pub fn new(inner: LocalTransport) -> Self {
        Self {
            inner,
            queries: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<ShardSearchRequest> {
        let mut queries = self.queries.lock().unwrap().clone();
        queries.sort_by_key(|q| q.shard_id);
        queries
    }
}

#[async_trait]
impl SearchTransport for RecordingTransport {
    async fn send_query(
        &self,
        node: &NodeId,
        request: ShardSearchRequest,
    ) -> Result<ShardQueryResult, ShardError> {
        self.queries.lock().unwrap().push(request.clone());
        self.inner.send_query(node, request).await
    }

    async fn send_fetch(
        &self,
        node: &NodeId,
        request: FetchRequest,
    ) -> Result<FetchResult, ShardError> {
        self.fetches.lock().unwrap().push(request.clone());
        self.inner.send_fetch(node, request).await
    }

    async fn free_context(
        &self,
        node: &NodeId,
        shard_id: ShardId,
        context_id: u64,
    ) -> Result<bool, ShardError> {
        self.inner.free_context(node, shard_id, context_id).await
    }
}

/// An engine whose every call fails.
pub struct BrokenEngine;

impl LocalSearchEngine for BrokenEngine {
    fn search(&self, _: &Query, _: &SortSpec, _: usize) -> Result<RankedResultSet, EngineError> {
        Err(EngineError::new("index corrupted"))
    }

    fn search_grouped(&self, _: &Query, _: &GroupSpec) -> Result<GroupedResultSet, EngineError> {
        Err(EngineError::new("index corrupted"))
    }

    fn fetch(&self, _: &[DocId]) -> Result<Vec<StoredDocument>, EngineError> {
        Err(EngineError::new("index corrupted"))
    }

    fn count(&self, _: &Query) -> Result<u64, EngineError> {
        Err(EngineError::new("index corrupted"))
    }
}

/// Two shards of language notes. For the query "rust" the global order is
/// shard 1 doc 1, shard 0 doc 1, shard 0 doc 0.
pub const LANGUAGE_DOCS: [&str; 2] = [
    r#"[
        {"body": "rust tokio runtime", "lang": "rust"},
        {"body": "rust ownership", "lang": "rust"}
    ]"#,
    r#"[
        {"body": "python asyncio runtime", "lang": "python"},
        {"body": "rust rust borrow", "lang": "rust"}
    ]"#,
];
