//! Shard side: the local engine seam, query execution and search contexts.
//!
//! A [`SearchShard`] wraps one [`LocalSearchEngine`] and tracks the search
//! contexts opened by query rounds so later fetches can address them.

pub mod executor;
pub mod memory;

pub use executor::run_query;
pub use memory::{MemoryIndex, MemoryIndexBuilder};

use crate::error::{EngineError, FetchExecutionError, QueryExecutionError};
use crate::types::{FetchRequest, FetchResult, GroupBy, Query, ShardSearchRequest, StoredDocument};
use collapse_core::group::{GroupValue, GroupedResultSet};
use collapse_core::sort::SortSpec;
use collapse_core::types::{DocId, RankedResultSet, ShardId, ShardQueryResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Parameters for one grouped local search.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub group_by: GroupBy,
    pub group_sort: SortSpec,
    pub within_group_sort: SortSpec,
    /// Number of top groups to collect.
    pub num_groups: usize,
    /// Hits collected per group.
    pub hits_per_group: usize,
    /// Only these groups are collected when set.
    pub restrict_to: Option<Vec<GroupValue>>,
    pub track_group_count: bool,
}

/// The search capability of one shard.
///
/// Implementations own relevance scoring and storage; the executor only
/// decides which of these calls to make.
pub trait LocalSearchEngine: Send + Sync {
    /// Top `limit` hits by `sort`, with the exact total match count.
    fn search(
        &self,
        query: &Query,
        sort: &SortSpec,
        limit: usize,
    ) -> Result<RankedResultSet, EngineError>;

    /// Top groups by `spec.group_sort`, each with its top hits.
    fn search_grouped(&self, query: &Query, spec: &GroupSpec)
        -> Result<GroupedResultSet, EngineError>;

    /// Stored bodies for `doc_ids`, in the same order.
    fn fetch(&self, doc_ids: &[DocId]) -> Result<Vec<StoredDocument>, EngineError>;

    /// Number of matching documents.
    fn count(&self, query: &Query) -> Result<u64, EngineError> {
        Ok(self.search(query, &SortSpec::relevance(), 1)?.total_hits)
    }

    /// Facet counts for the named fields as an opaque payload.
    fn facets(&self, _query: &Query, _fields: &[String]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(None)
    }

    /// Suggestions for a prefix as an opaque payload.
    fn suggest(&self, _prefix: &str) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(None)
    }

    /// Number of documents held.
    fn doc_count(&self) -> usize {
        0
    }
}

#[derive(Debug, Clone)]
struct SearchContext {
    opened_at: Instant,
}

/// One shard: a local engine plus its open search contexts.
pub struct SearchShard {
    shard_id: ShardId,
    engine: Arc<dyn LocalSearchEngine>,
    contexts: Mutex<HashMap<u64, SearchContext>>,
    next_context: AtomicU64,
}

impl SearchShard {
    pub fn new(shard_id: ShardId, engine: Arc<dyn LocalSearchEngine>) -> Self {
        Self {
            shard_id,
            engine,
            contexts: Mutex::new(HashMap::new()),
            next_context: AtomicU64::new(1),
        }
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn engine(&self) -> &Arc<dyn LocalSearchEngine> {
        &self.engine
    }

    /// Run one query round and open a context for the later fetch.
    pub async fn execute_query(
        &self,
        request: &ShardSearchRequest,
    ) -> Result<ShardQueryResult, QueryExecutionError> {
        let context_id = self.next_context.fetch_add(1, Ordering::Relaxed);
        let result = run_query(self.engine.as_ref(), self.shard_id, context_id, request)?;
        self.contexts.lock().await.insert(
            context_id,
            SearchContext {
                opened_at: Instant::now(),
            },
        );
        debug!("Opened search context {} on {}", context_id, self.shard_id);
        Ok(result)
    }

    /// Load documents through an open context. The context is freed
    /// afterwards unless the request keeps it.
    pub async fn execute_fetch(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchResult, FetchExecutionError> {
        let fail = |message: String| FetchExecutionError {
            shard_id: self.shard_id,
            source: EngineError(message),
        };

        let mut contexts = self.contexts.lock().await;
        if !contexts.contains_key(&request.context_id) {
            return Err(fail(format!(
                "no search context {} on {}",
                request.context_id, self.shard_id
            )));
        }

        let documents = self.engine.fetch(&request.doc_ids).map_err(|e| fail(e.0))?;
        if !request.keep_context {
            if let Some(ctx) = contexts.remove(&request.context_id) {
                debug!(
                    "Freed search context {} on {} after fetch (open {:?})",
                    request.context_id,
                    self.shard_id,
                    ctx.opened_at.elapsed()
                );
            }
        }

        Ok(FetchResult {
            shard_id: self.shard_id,
            context_id: request.context_id,
            documents,
        })
    }

    /// Release a context. Returns whether it was open.
    pub async fn free_context(&self, context_id: u64) -> bool {
        let freed = self.contexts.lock().await.remove(&context_id).is_some();
        debug!("Free context {} on {}: {}", context_id, self.shard_id, freed);
        freed
    }

    pub async fn open_contexts(&self) -> usize {
        self.contexts.lock().await.len()
    }
}
