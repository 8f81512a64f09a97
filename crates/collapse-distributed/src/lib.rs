//! # Collapse Distributed
//!
//! Grouped ("field-collapsing") search across independently indexed shards:
//! a per-shard query executor, k-way merges of shard results and a
//! scatter-gather coordinator that drives groups, hits and fetch rounds.

pub mod coordinator;
pub mod error;
pub mod merge;
pub mod rpc;
pub mod shard;
pub mod transport;
pub mod types;

pub use coordinator::{
    status_of, CoordinatorConfig, OperationThreading, ResponseStatus, ScrollId, SearchCoordinator,
    SearchGroup, SearchHit, SearchResponse, SearchState, ShardTopology, StaticTopology,
};
pub use error::{
    EngineError, FailureStage, FetchExecutionError, MergeError, QueryExecutionError,
    ReduceFailure, SearchError, SearchResult, ShardError, ShardFailure, TransportError,
};
pub use merge::{merge_grouped, merge_ranked, GroupCountMode, GroupMergeParams};
pub use rpc::{ClientConfig, NodeClientPool, RpcTransport, ShardServer};
pub use shard::{GroupSpec, LocalSearchEngine, MemoryIndex, SearchShard};
pub use transport::{LocalTransport, SearchTransport};
pub use types::*;
