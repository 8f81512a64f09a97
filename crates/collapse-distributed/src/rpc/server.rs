//! tarpc server for shard nodes.
//!
//! A `ShardServer` wraps the [`SearchShard`]s hosted on this node and
//! exposes them through the [`ShardService`] trait.

use crate::rpc::protocol::{RpcError, RpcResult, ShardService};
use crate::shard::SearchShard;
use crate::types::{FetchRequest, FetchResult, NodeHealth, ShardSearchRequest};
use bytes::Bytes;
use collapse_core::codec;
use collapse_core::types::ShardId;
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tarpc::context::Context;
use tarpc::server::{self, Channel};
use tokio::task::JoinHandle;
use tokio_serde::formats::Bincode;
use tracing::{debug, info, instrument};

/// Connections served at the same time.
const MAX_CONCURRENT_CONNECTIONS: usize = 10;

/// Server for the shards hosted on one node.
///
/// # Example
///
/// ```rust,ignore
/// let server = ShardServer::new(vec![SearchShard::new(ShardId::new(0), engine)]);
/// server.start("127.0.0.1:7400".parse().unwrap()).await?;
/// ```
#[derive(Clone)]
pub struct ShardServer {
    shards: Arc<HashMap<ShardId, Arc<SearchShard>>>,
}

impl ShardServer {
    pub fn new(shards: impl IntoIterator<Item = SearchShard>) -> Self {
        Self::from_shared(shards.into_iter().map(Arc::new))
    }

    /// Serve shards that are also used in-process.
    pub fn from_shared(shards: impl IntoIterator<Item = Arc<SearchShard>>) -> Self {
        let shards = shards.into_iter().map(|s| (s.shard_id(), s)).collect();
        Self {
            shards: Arc::new(shards),
        }
    }

    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.shards.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Serve on `addr` until the listener closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind to the address.
    pub async fn start(self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let (_, serving) = self.bind(addr).await?;
        serving
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    /// Serve on `addr` in the background and return the bound address.
    ///
    /// Binding port 0 picks a free port.
    pub async fn spawn(self, addr: SocketAddr) -> Result<SocketAddr, std::io::Error> {
        let (local, _) = self.bind(addr).await?;
        Ok(local)
    }

    async fn bind(self, addr: SocketAddr) -> Result<(SocketAddr, JoinHandle<()>), std::io::Error> {
        let listener = tarpc::serde_transport::tcp::listen(&addr, Bincode::default).await?;
        let local = listener.local_addr();
        info!("Shard server listening on {} ({} shards)", local, self.shards.len());

        let serving = tokio::spawn(async move {
            listener
                .filter_map(|r| futures::future::ready(r.ok()))
                .map(server::BaseChannel::with_defaults)
                .for_each_concurrent(MAX_CONCURRENT_CONNECTIONS, |channel| {
                    let server = self.clone();
                    async move {
                        channel
                            .execute(server.serve())
                            .for_each(|response| async move {
                                tokio::spawn(response);
                            })
                            .await
                    }
                })
                .await;
        });
        Ok((local, serving))
    }

    fn shard(&self, shard_id: ShardId) -> RpcResult<Arc<SearchShard>> {
        self.shards
            .get(&shard_id)
            .cloned()
            .ok_or(RpcError::ShardNotFound(shard_id.as_u32()))
    }
}

impl ShardService for ShardServer {
    #[instrument(skip(self, _ctx, request), fields(shard = %request.shard_id))]
    async fn execute_query(self, _ctx: Context, request: ShardSearchRequest) -> RpcResult<Bytes> {
        let shard = self.shard(request.shard_id)?;
        let result = shard
            .execute_query(&request)
            .await
            .map_err(|e| RpcError::QueryFailed {
                shard: e.shard_id.as_u32(),
                message: e.source.to_string(),
            })?;
        debug!(
            "Answered {} query with context {} ({} total hits)",
            result.phase,
            result.context_id,
            result.total_hits()
        );
        codec::encode_shard_result(&result).map_err(|e| RpcError::Codec(e.to_string()))
    }

    #[instrument(skip(self, _ctx, request), fields(shard = %request.shard_id, docs = request.doc_ids.len()))]
    async fn execute_fetch(self, _ctx: Context, request: FetchRequest) -> RpcResult<FetchResult> {
        let shard = self.shard(request.shard_id)?;
        shard
            .execute_fetch(&request)
            .await
            .map_err(|e| RpcError::FetchFailed {
                shard: e.shard_id.as_u32(),
                message: e.source.to_string(),
            })
    }

    #[instrument(skip(self, _ctx), fields(shard = %shard_id))]
    async fn free_context(self, _ctx: Context, shard_id: ShardId, context_id: u64) -> RpcResult<bool> {
        let shard = self.shard(shard_id)?;
        Ok(shard.free_context(context_id).await)
    }

    #[instrument(skip(self, _ctx))]
    async fn health_check(self, _ctx: Context) -> RpcResult<NodeHealth> {
        let mut documents = 0;
        let mut open_contexts = 0;
        for shard in self.shards.values() {
            documents += shard.engine().doc_count();
            open_contexts += shard.open_contexts().await;
        }
        let health = NodeHealth {
            shards: self.shard_ids(),
            documents,
            open_contexts,
        };
        debug!(
            "Health: {} shards, {} documents, {} open contexts",
            health.shards.len(),
            health.documents,
            health.open_contexts
        );
        Ok(health)
    }
}
