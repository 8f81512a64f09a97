//! [`SearchTransport`] over the tarpc shard service.

use crate::error::{
    EngineError, FetchExecutionError, QueryExecutionError, ShardError, TransportError,
};
use crate::rpc::client::NodeClientPool;
use crate::rpc::protocol::{RpcError, RpcResult};
use crate::transport::SearchTransport;
use crate::types::{FetchRequest, FetchResult, NodeId, ShardSearchRequest};
use async_trait::async_trait;
use collapse_core::codec;
use collapse_core::types::{ShardId, ShardQueryResult};
use std::future::Future;
use std::time::Duration;
use tarpc::context;
use tracing::debug;

/// Sends shard calls to remote nodes.
///
/// Each call is bounded by the call timeout; a call that runs over is a
/// [`TransportError::Timeout`] failure for that shard.
#[derive(Clone)]
pub struct RpcTransport {
    pool: NodeClientPool,
    call_timeout: Option<Duration>,
}

impl RpcTransport {
    pub fn new(pool: NodeClientPool) -> Self {
        Self {
            pool,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &NodeClientPool {
        &self.pool
    }

    async fn call<T, F>(&self, node: &NodeId, shard: ShardId, call: F) -> Result<T, ShardError>
    where
        F: Future<Output = Result<RpcResult<T>, tarpc::client::RpcError>>,
    {
        let outcome = match self.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                TransportError::Timeout {
                    shard,
                    after_ms: limit.as_millis() as u64,
                }
            })?,
            None => call.await,
        };
        match outcome {
            Ok(answer) => answer.map_err(|e| remote_error(shard, e)),
            Err(e) => {
                debug!("RPC to {} for {} failed, dropping connection: {}", node, shard, e);
                self.pool.invalidate_client(node).await;
                Err(TransportError::Rpc {
                    node: node.clone(),
                    detail: e.to_string(),
                }
                .into())
            }
        }
    }

    async fn client(
        &self,
        node: &NodeId,
    ) -> Result<crate::rpc::protocol::ShardServiceClient, ShardError> {
        self.pool.get_client(node).await.map_err(|e| {
            TransportError::Connect {
                node: node.clone(),
                detail: e.to_string(),
            }
            .into()
        })
    }
}

/// Map a failure reported by the remote node onto the shard error taxonomy.
fn remote_error(shard: ShardId, err: RpcError) -> ShardError {
    match err {
        RpcError::ShardNotFound(_) => TransportError::UnknownShard(shard).into(),
        RpcError::QueryFailed { message, .. } => QueryExecutionError {
            shard_id: shard,
            source: EngineError(message),
        }
        .into(),
        RpcError::FetchFailed { message, .. } => FetchExecutionError {
            shard_id: shard,
            source: EngineError(message),
        }
        .into(),
        other => TransportError::Remote(other.to_string()).into(),
    }
}

#[async_trait]
impl SearchTransport for RpcTransport {
    async fn send_query(
        &self,
        node: &NodeId,
        request: ShardSearchRequest,
    ) -> Result<ShardQueryResult, ShardError> {
        let shard = request.shard_id;
        let client = self.client(node).await?;
        let bytes = self
            .call(node, shard, client.execute_query(context::current(), request))
            .await?;
        Ok(codec::decode_shard_result(&bytes)?)
    }

    async fn send_fetch(
        &self,
        node: &NodeId,
        request: FetchRequest,
    ) -> Result<FetchResult, ShardError> {
        let shard = request.shard_id;
        let client = self.client(node).await?;
        self.call(node, shard, client.execute_fetch(context::current(), request))
            .await
    }

    async fn free_context(
        &self,
        node: &NodeId,
        shard_id: ShardId,
        context_id: u64,
    ) -> Result<bool, ShardError> {
        let client = self.client(node).await?;
        self.call(
            node,
            shard_id,
            client.free_context(context::current(), shard_id, context_id),
        )
        .await
    }
}
