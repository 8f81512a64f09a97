//! The assembled result of a distributed search.

use super::SearchState;
use crate::error::{SearchResult, ShardFailure};
use collapse_core::group::GroupValue;
use collapse_core::sort::SortValue;
use collapse_core::types::{DocId, ShardId};
use std::time::Duration;

/// A selected hit with its loaded document.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub shard_id: ShardId,
    pub doc_id: DocId,
    pub score: f32,
    pub sort_values: Option<Vec<SortValue>>,
    /// Stored document as JSON text.
    pub source: String,
}

/// A selected group and its loaded hits.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchGroup {
    pub value: GroupValue,
    pub sort_values: Vec<SortValue>,
    pub score: f32,
    pub max_score: f32,
    pub total_hits: u64,
    pub hits: Vec<SearchHit>,
}

/// Outcome of a search as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Partial { successful: usize, total: usize },
    Failed,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    /// All returned hits; for grouped searches, group order then hit order.
    pub hits: Vec<SearchHit>,
    /// Present for grouped searches.
    pub groups: Option<Vec<SearchGroup>>,
    pub total_hits: u64,
    pub max_score: f32,
    pub total_grouped_hit_count: Option<u64>,
    pub total_group_count: Option<u64>,
    /// Per-shard facet payloads, in shard order.
    pub facets: Vec<(ShardId, Vec<u8>)>,
    /// Per-shard suggestion payloads, in shard order.
    pub suggest: Vec<(ShardId, Vec<u8>)>,
    pub scroll_id: Option<String>,
    pub total_shards: usize,
    pub successful_shards: usize,
    pub failures: Vec<ShardFailure>,
    pub timed_out: bool,
    /// Controller states traversed, in order.
    pub transitions: Vec<SearchState>,
    pub took: Duration,
}

impl SearchResponse {
    pub fn status(&self) -> ResponseStatus {
        if self.successful_shards >= self.total_shards {
            ResponseStatus::Success
        } else {
            ResponseStatus::Partial {
                successful: self.successful_shards,
                total: self.total_shards,
            }
        }
    }

    /// Number of shards that failed in any round.
    pub fn failed_shards(&self) -> usize {
        let mut shards: Vec<ShardId> = self.failures.iter().map(|f| f.shard_id).collect();
        shards.sort();
        shards.dedup();
        shards.len()
    }
}

/// Status of a finished search, failed requests included.
pub fn status_of(result: &SearchResult<SearchResponse>) -> ResponseStatus {
    match result {
        Ok(response) => response.status(),
        Err(_) => ResponseStatus::Failed,
    }
}
