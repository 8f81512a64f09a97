//! Serve local shards over RPC.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use collapse::core::types::ShardId;
use collapse::distributed::rpc::ShardServer;
use collapse::distributed::shard::{MemoryIndex, SearchShard};

use crate::config::{Config, ShardData};

pub fn run(port: Option<u16>) -> Result<()> {
    let config = Config::load()?;
    if config.shard.shards.is_empty() {
        bail!("No shards configured; add [[shard.shards]] entries to collapse.toml");
    }

    let port = port.unwrap_or(config.shard.port);
    let addr: SocketAddr = format!("{}:{}", config.shard.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.shard.host, port))?;

    let mut shards = Vec::with_capacity(config.shard.shards.len());
    for entry in &config.shard.shards {
        let shard = load_shard(entry)?;
        println!(
            "  {} {} loaded from {}",
            "✓".green(),
            shard.shard_id(),
            entry.data.display()
        );
        shards.push(shard);
    }

    println!(
        "{} Serving {} shards on {}",
        "serve".green().bold(),
        shards.len(),
        addr
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        ShardServer::new(shards).start(addr).await?;
        Ok(())
    })
}

/// Build one shard from its JSON document array.
pub fn load_shard(entry: &ShardData) -> Result<SearchShard> {
    let json = std::fs::read_to_string(&entry.data)
        .with_context(|| format!("Failed to read {}", entry.data.display()))?;
    let index = MemoryIndex::from_json_array(&json)
        .with_context(|| format!("Failed to index {}", entry.data.display()))?;
    debug!("Indexed {} documents for shard {}", index.len(), entry.id);
    Ok(SearchShard::new(ShardId::new(entry.id), Arc::new(index)))
}
