//! Error taxonomy for shard execution, transport, merging and whole requests.
//!
//! Per-shard failures ([`ShardError`]) are recorded against the shard and
//! never abort sibling work. [`MergeError`] means a merge input broke its
//! sortedness contract. [`SearchError`] is what a caller finally sees when
//! a request cannot produce a response at all.

use crate::coordinator::SearchState;
use crate::types::NodeId;
use collapse_core::error::CodecError;
use collapse_core::types::ShardId;
use thiserror::Error;

/// Opaque failure reported by a local search engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A shard's local search failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("query failed on {shard_id}: {source}")]
pub struct QueryExecutionError {
    pub shard_id: ShardId,
    #[source]
    pub source: EngineError,
}

/// A shard failed to load stored documents.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("fetch failed on {shard_id}: {source}")]
pub struct FetchExecutionError {
    pub shard_id: ShardId,
    #[source]
    pub source: EngineError,
}

/// Failure talking to the node that owns a shard.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("no route to {0}")]
    UnknownShard(ShardId),

    #[error("failed to connect to node {node}: {detail}")]
    Connect { node: NodeId, detail: String },

    #[error("RPC to node {node} failed: {detail}")]
    Rpc { node: NodeId, detail: String },

    #[error("{shard} did not answer within {after_ms}ms")]
    Timeout { shard: ShardId, after_ms: u64 },

    #[error("remote error: {0}")]
    Remote(String),
}

/// Anything that can go wrong for one shard in one round.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ShardError {
    #[error(transparent)]
    Query(#[from] QueryExecutionError),

    #[error(transparent)]
    Fetch(#[from] FetchExecutionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("undecodable shard response: {0}")]
    Codec(#[from] CodecError),
}

impl ShardError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ShardError::Transport(TransportError::Timeout { .. }))
    }
}

/// Which round a shard failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureStage {
    Query,
    GroupHits,
    Fetch,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Query => write!(f, "query"),
            FailureStage::GroupHits => write!(f, "group hits"),
            FailureStage::Fetch => write!(f, "fetch"),
        }
    }
}

/// A failure recorded against one shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardFailure {
    pub shard_id: ShardId,
    pub stage: FailureStage,
    pub cause: ShardError,
}

impl std::fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.shard_id, self.stage, self.cause)
    }
}

/// A merge input violated the locally-sorted or same-shape contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MergeError {
    #[error("merge invariant violated by {shard} at position {position}: {detail}")]
    InvariantViolation {
        shard: ShardId,
        position: usize,
        detail: String,
    },
}

impl MergeError {
    pub(crate) fn violation(shard: ShardId, position: usize, detail: impl Into<String>) -> Self {
        MergeError::InvariantViolation {
            shard,
            position,
            detail: detail.into(),
        }
    }
}

/// Why the reduce side of a request failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReduceFailure {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("{0}")]
    Internal(String),
}

/// Request-level failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("all {} shards failed during {state}", .failures.len())]
    AllShardsFailed {
        state: SearchState,
        failures: Vec<ShardFailure>,
    },

    #[error("reduce failed during {state}: {source}")]
    Reduce {
        state: SearchState,
        #[source]
        source: ReduceFailure,
        failures: Vec<ShardFailure>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SearchError {
    /// Shard failures gathered before the request failed.
    pub fn shard_failures(&self) -> &[ShardFailure] {
        match self {
            SearchError::AllShardsFailed { failures, .. } => failures,
            SearchError::Reduce { failures, .. } => failures,
            SearchError::InvalidRequest(_) => &[],
        }
    }
}

/// Result type for request-level operations.
pub type SearchResult<T> = Result<T, SearchError>;
