//! tarpc service definition for shard nodes.

use crate::types::{FetchRequest, FetchResult, NodeHealth, ShardSearchRequest};
use bytes::Bytes;
use collapse_core::types::ShardId;
use serde::{Deserialize, Serialize};

/// Result type for RPC operations that needs to be serializable.
pub type RpcResult<T> = Result<T, RpcError>;

/// Serializable error type for RPC calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcError {
    /// The node does not host the shard.
    ShardNotFound(u32),
    /// The local engine failed the query.
    QueryFailed { shard: u32, message: String },
    /// The fetch failed or addressed an unknown context.
    FetchFailed { shard: u32, message: String },
    /// The shard result could not be encoded.
    Codec(String),
    /// Internal error.
    Internal(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::ShardNotFound(id) => write!(f, "Shard {} not found", id),
            RpcError::QueryFailed { shard, message } => {
                write!(f, "Query failed on shard {}: {}", shard, message)
            }
            RpcError::FetchFailed { shard, message } => {
                write!(f, "Fetch failed on shard {}: {}", shard, message)
            }
            RpcError::Codec(msg) => write!(f, "Codec error: {}", msg),
            RpcError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Service provided by every node hosting shards.
#[tarpc::service]
pub trait ShardService {
    /// Run one query round on a shard.
    ///
    /// Answers with the encoded shard query result so every node speaks
    /// the same versioned byte layout.
    async fn execute_query(request: ShardSearchRequest) -> RpcResult<Bytes>;

    /// Load stored documents through an open search context.
    async fn execute_fetch(request: FetchRequest) -> RpcResult<FetchResult>;

    /// Release a search context. Returns whether it was open.
    async fn free_context(shard_id: ShardId, context_id: u64) -> RpcResult<bool>;

    /// Hosted shards, document count and open contexts.
    async fn health_check() -> RpcResult<NodeHealth>;
}
