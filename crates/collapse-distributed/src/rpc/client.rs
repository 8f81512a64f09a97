//! tarpc client utilities.
//!
//! Connection helpers with timeout and retry, and a pool that connects to
//! each node lazily and reuses the connection afterwards.

use crate::rpc::protocol::ShardServiceClient;
use crate::types::NodeId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tarpc::client::Config;
use tokio::sync::RwLock;
use tokio_serde::formats::Bincode;
use tracing::{debug, error, info, warn};

/// Default connection timeout in milliseconds.
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default number of retry attempts for failed connections.
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between retry attempts in milliseconds.
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Configuration for client connections.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Number of retry attempts.
    pub retry_attempts: u32,
    /// Delay between retries.
    pub retry_delay: Duration,
    /// Maximum in-flight requests per connection.
    pub max_pending_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_pending_requests: 100,
        }
    }
}

/// Connect to a shard node.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_to_node(addr: SocketAddr) -> Result<ShardServiceClient, std::io::Error> {
    debug!("Connecting to node at {}", addr);
    let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default).await?;
    let client = ShardServiceClient::new(Config::default(), transport).spawn();
    info!("Connected to node at {}", addr);
    Ok(client)
}

/// Connect to a shard node, bounded by the configured timeout.
pub async fn connect_to_node_with_config(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ShardServiceClient, std::io::Error> {
    debug!("Connecting to node at {} with custom config", addr);

    let transport = tokio::time::timeout(
        config.connect_timeout,
        tarpc::serde_transport::tcp::connect(addr, Bincode::default),
    )
    .await
    .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connection timeout"))??;

    let mut tarpc_config = Config::default();
    tarpc_config.max_in_flight_requests = config.max_pending_requests;

    let client = ShardServiceClient::new(tarpc_config, transport).spawn();
    info!("Connected to node at {}", addr);
    Ok(client)
}

/// Connect to a shard node with automatic retry on failure.
///
/// # Errors
///
/// Returns the last connection error if all attempts fail.
pub async fn connect_to_node_with_retry(
    addr: SocketAddr,
    config: &ClientConfig,
) -> Result<ShardServiceClient, std::io::Error> {
    let mut last_error = None;

    for attempt in 0..config.retry_attempts {
        if attempt > 0 {
            warn!("Retry attempt {} connecting to node at {}", attempt + 1, addr);
            tokio::time::sleep(config.retry_delay).await;
        }

        match connect_to_node_with_config(addr, config).await {
            Ok(client) => {
                if attempt > 0 {
                    info!(
                        "Connected to node at {} after {} attempts",
                        addr,
                        attempt + 1
                    );
                }
                return Ok(client);
            }
            Err(e) => {
                warn!("Failed to connect to node at {}: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    error!(
        "Failed to connect to node at {} after {} attempts",
        addr, config.retry_attempts
    );
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "connection failed")
    }))
}

/// A pool of node client connections.
///
/// Nodes are addressed by [`NodeId`]. A node registered with an explicit
/// address connects there; any other node id must itself parse as a
/// socket address.
///
/// Clones share the same connections.
#[derive(Clone)]
pub struct NodeClientPool {
    addresses: Arc<RwLock<HashMap<NodeId, SocketAddr>>>,
    clients: Arc<RwLock<HashMap<NodeId, ShardServiceClient>>>,
    config: ClientConfig,
}

impl NodeClientPool {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            addresses: Arc::new(RwLock::new(HashMap::new())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Register a node's address. The connection is made on first use.
    pub async fn register_node(&self, node: NodeId, addr: SocketAddr) {
        debug!("Registered node {} at {}", node, addr);
        self.addresses.write().await.insert(node, addr);
    }

    /// Resolve the address a node id connects to.
    pub async fn address_of(&self, node: &NodeId) -> Result<SocketAddr, std::io::Error> {
        if let Some(addr) = self.addresses.read().await.get(node) {
            return Ok(*addr);
        }
        node.as_str().parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("node {} is not registered and is not an address", node),
            )
        })
    }

    /// A client for `node`, connecting if there is no cached one.
    pub async fn get_client(&self, node: &NodeId) -> Result<ShardServiceClient, std::io::Error> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(node) {
                return Ok(client.clone());
            }
        }

        let addr = self.address_of(node).await?;
        let client = connect_to_node_with_retry(addr, &self.config).await?;

        self.clients.write().await.insert(node.clone(), client.clone());
        Ok(client)
    }

    /// Drop the cached connection so the next call reconnects.
    pub async fn invalidate_client(&self, node: &NodeId) {
        self.clients.write().await.remove(node);
        debug!("Invalidated cached client for node {}", node);
    }

    pub async fn cached_connection_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

impl Default for NodeClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(
            config.connect_timeout.as_millis(),
            DEFAULT_CONNECT_TIMEOUT_MS as u128
        );
        assert_eq!(config.retry_attempts, DEFAULT_RETRY_ATTEMPTS);
        assert_eq!(
            config.retry_delay.as_millis(),
            DEFAULT_RETRY_DELAY_MS as u128
        );
    }

    #[tokio::test]
    async fn test_registered_address_wins() {
        let pool = NodeClientPool::new();
        let addr: SocketAddr = "127.0.0.1:7401".parse().unwrap();
        pool.register_node(NodeId::new("node-a"), addr).await;

        assert_eq!(pool.address_of(&NodeId::new("node-a")).await.unwrap(), addr);
        assert_eq!(
            pool.address_of(&NodeId::new("127.0.0.1:7402")).await.unwrap(),
            "127.0.0.1:7402".parse::<SocketAddr>().unwrap()
        );
        assert!(pool.address_of(&NodeId::new("node-b")).await.is_err());
        assert_eq!(pool.cached_connection_count().await, 0);
    }
}
