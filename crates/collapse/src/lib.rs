//! # Collapse
//!
//! Grouped ("field-collapsing") search over independently indexed shards.
//! Each shard ranks its own documents; a coordinator scatters the query,
//! merges the per-shard top groups, asks the shards for the hits of the
//! accepted groups only, and fetches the stored documents of the final page.
//!
//! ## Quick Start
//!
//! ```rust
//! use collapse::prelude::*;
//!
//! let a = RankedResultSet::new(2, 0.9, vec![RankedHit::new(1, 0.9), RankedHit::new(2, 0.5)]);
//! let b = RankedResultSet::new(1, 0.7, vec![RankedHit::new(3, 0.7)]);
//!
//! // Shard results travel as versioned bytes.
//! let b = codec::decode_ranked(&codec::encode_ranked(&b).unwrap()).unwrap();
//!
//! let merged = merge_ranked(
//!     &[(ShardId::new(0), &a), (ShardId::new(1), &b)],
//!     &SortSpec::relevance(),
//!     2,
//!     0,
//! )
//! .unwrap();
//! let page: Vec<u32> = merged.hits.iter().map(|h| h.doc_id).collect();
//! assert_eq!(page, vec![1, 3]);
//! assert_eq!(merged.total_hits, 3);
//! ```
//!
//! ## Architecture
//!
//! - [`collapse_core`] - result model, typed sort and group values, wire codec
//! - [`collapse_distributed`] - shard executor, k-way merges, scatter-gather
//!   coordinator, in-process and tarpc transports

pub use collapse_core as core;

#[cfg(feature = "distributed")]
pub use collapse_distributed as distributed;

/// Prelude module for convenient imports.
///
/// ```rust
/// use collapse::prelude::*;
/// ```
pub mod prelude {
    pub use collapse_core::prelude::*;

    #[cfg(feature = "distributed")]
    pub use collapse_distributed::coordinator::{
        status_of, CoordinatorConfig, OperationThreading, ResponseStatus, SearchCoordinator,
        SearchGroup, SearchHit, SearchResponse, SearchState, ShardTopology, StaticTopology,
    };
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::merge::{
        merge_grouped, merge_ranked, GroupCountMode, GroupMergeParams,
    };
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::rpc::{NodeClientPool, RpcTransport, ShardServer};
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::shard::{LocalSearchEngine, MemoryIndex, SearchShard};
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::transport::{LocalTransport, SearchTransport};
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::types::{
        GroupBy, Grouping, NodeId, Query, SearchRequest, SearchType,
    };
    #[cfg(feature = "distributed")]
    pub use collapse_distributed::{SearchError, SearchResult};
}
