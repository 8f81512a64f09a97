//! Request and addressing types shared by the coordinator, shards and the
//! RPC layer.
//!
//! A caller builds one [`SearchRequest`]. The coordinator derives a
//! [`ShardSearchRequest`] per shard per round, tagging it with the
//! [`QueryMode`] the round needs, and later a [`FetchRequest`] for every
//! shard that owns selected hits.

use collapse_core::group::GroupValue;
use collapse_core::sort::SortSpec;
use collapse_core::types::{DocId, ShardId};
use serde::{Deserialize, Serialize};

/// Identifier of a node hosting one or more shards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The query itself. Interpreted only by the local engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Matches every document.
    pub fn match_all() -> Self {
        Self::new("")
    }
}

/// Overall shape of a distributed search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SearchType {
    /// Rank on every shard, merge, then load stored documents for the winners.
    #[default]
    QueryThenFetch,
    /// Totals only; no hits are collected or fetched.
    Count,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::QueryThenFetch => "query_then_fetch",
            SearchType::Count => "count",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query_then_fetch" => Some(SearchType::QueryThenFetch),
            "count" => Some(SearchType::Count),
            _ => None,
        }
    }
}

/// What documents are grouped by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupBy {
    /// The value of a stored field.
    Field(String),
    /// A named function computed by the local engine.
    Function(String),
}

impl GroupBy {
    pub fn field(name: impl Into<String>) -> Self {
        GroupBy::Field(name.into())
    }

    pub fn function(name: impl Into<String>) -> Self {
        GroupBy::Function(name.into())
    }
}

impl std::fmt::Display for GroupBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupBy::Field(name) => write!(f, "field:{}", name),
            GroupBy::Function(name) => write!(f, "fn:{}", name),
        }
    }
}

/// Grouping part of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub group_by: GroupBy,
    /// Orders hits inside each group.
    pub within_group_sort: SortSpec,
    /// Hits skipped inside each group.
    pub group_from: u32,
    /// Hits returned per group.
    pub group_size: u32,
}

impl Grouping {
    pub fn new(group_by: GroupBy, group_size: u32) -> Self {
        Self {
            group_by,
            within_group_sort: SortSpec::relevance(),
            group_from: 0,
            group_size,
        }
    }
}

/// A distributed search as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    pub search_type: SearchType,
    /// Hits (or groups, when grouping) skipped.
    pub from: u32,
    /// Hits (or groups, when grouping) returned.
    pub size: u32,
    /// Orders hits, or groups when grouping.
    pub sort: SortSpec,
    pub grouping: Option<Grouping>,
    /// Keep shard contexts alive and return a scroll id.
    pub scroll: bool,
    pub facets: Vec<String>,
    pub suggest: Option<String>,
}

impl SearchRequest {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            search_type: SearchType::QueryThenFetch,
            from: 0,
            size: 10,
            sort: SortSpec::relevance(),
            grouping: None,
            scroll: false,
            facets: Vec::new(),
            suggest: None,
        }
    }

    pub fn from(mut self, from: u32) -> Self {
        self.from = from;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = sort;
        self
    }

    pub fn search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = Some(grouping);
        self
    }

    pub fn scroll(mut self, scroll: bool) -> Self {
        self.scroll = scroll;
        self
    }

    pub fn facet(mut self, field: impl Into<String>) -> Self {
        self.facets.push(field.into());
        self
    }

    pub fn suggest(mut self, prefix: impl Into<String>) -> Self {
        self.suggest = Some(prefix.into());
        self
    }
}

/// Which of the three query shapes a shard must run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryMode {
    /// Ungrouped top hits.
    Plain,
    /// Top groups, one representative hit each.
    Groups { grouping: Grouping },
    /// Full hits for exactly these groups.
    Hits {
        grouping: Grouping,
        groups: Vec<GroupValue>,
    },
}

impl QueryMode {
    pub fn grouping(&self) -> Option<&Grouping> {
        match self {
            QueryMode::Plain => None,
            QueryMode::Groups { grouping } | QueryMode::Hits { grouping, .. } => Some(grouping),
        }
    }
}

/// One shard's share of a query round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardSearchRequest {
    pub shard_id: ShardId,
    pub query: Query,
    pub search_type: SearchType,
    pub from: u32,
    pub size: u32,
    pub sort: SortSpec,
    pub mode: QueryMode,
    /// Soft time budget for the local search in milliseconds.
    pub timeout_ms: Option<u64>,
    pub facets: Vec<String>,
    pub suggest: Option<String>,
}

impl ShardSearchRequest {
    /// Derive the request a shard receives for one round.
    pub fn for_shard(shard_id: ShardId, request: &SearchRequest, mode: QueryMode) -> Self {
        Self {
            shard_id,
            query: request.query.clone(),
            search_type: request.search_type,
            from: request.from,
            size: request.size,
            sort: request.sort.clone(),
            mode,
            timeout_ms: None,
            facets: request.facets.clone(),
            suggest: request.suggest.clone(),
        }
    }
}

/// Load stored documents from a shard's open search context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub shard_id: ShardId,
    pub context_id: u64,
    pub doc_ids: Vec<DocId>,
    /// Leave the context open after loading (scrolling).
    pub keep_context: bool,
}

/// A stored document body as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: DocId,
    pub source: String,
}

/// Documents loaded by one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchResult {
    pub shard_id: ShardId,
    pub context_id: u64,
    pub documents: Vec<StoredDocument>,
}

/// Health of the shards hosted by one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeHealth {
    pub shards: Vec<ShardId>,
    pub documents: usize,
    pub open_contexts: usize,
}
