//! tarpc layer between coordinators and shard-hosting nodes.
//!
//! - **Protocol**: the `ShardService` trait and its serializable error type
//! - **Server**: `ShardServer`, exposing local [`SearchShard`](crate::shard::SearchShard)s
//! - **Client**: connection helpers and a lazily connecting pool
//! - **Transport**: `RpcTransport`, the coordinator's transport over the pool
//!
//! # Example
//!
//! ```rust,ignore
//! let addr = ShardServer::new(vec![shard]).spawn("127.0.0.1:0".parse()?).await?;
//! let transport = RpcTransport::new(NodeClientPool::new());
//! let topology = StaticTopology::new(NodeId::new("coordinator"))
//!     .assign(ShardId::new(0), NodeId::new(addr.to_string()));
//! ```

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::{
    connect_to_node, connect_to_node_with_config, connect_to_node_with_retry, ClientConfig,
    NodeClientPool,
};
pub use protocol::{RpcError, RpcResult, ShardService, ShardServiceClient};
pub use server::ShardServer;
pub use transport::RpcTransport;
