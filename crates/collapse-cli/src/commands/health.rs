//! Check the health of every configured node.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use std::collections::BTreeSet;
use std::net::SocketAddr;

use collapse::distributed::rpc::connect_to_node;

use crate::config::Config;

pub fn run() -> Result<()> {
    let config = Config::load()?;
    let addresses: BTreeSet<&str> = config
        .cluster
        .shards
        .iter()
        .map(|s| s.address.as_str())
        .collect();
    if addresses.is_empty() {
        bail!("No cluster configured; add [[cluster.shards]] entries to collapse.toml");
    }

    println!("{} Checking {} nodes...", "→".blue(), addresses.len());

    let rt = tokio::runtime::Runtime::new()?;
    let unhealthy = rt.block_on(async {
        let mut unhealthy = 0;
        for address in &addresses {
            let addr: SocketAddr = address
                .parse()
                .with_context(|| format!("Invalid node address {}", address))?;
            match check(addr).await {
                Ok(line) => println!("  {} {} {}", "✓".green(), address, line),
                Err(e) => {
                    unhealthy += 1;
                    println!("  {} {} {}", "✗".red(), address, e);
                }
            }
        }
        Ok::<_, anyhow::Error>(unhealthy)
    })?;

    println!();
    if unhealthy == 0 {
        println!("{} All nodes healthy", "✓".green().bold());
        Ok(())
    } else {
        bail!("{} of {} nodes unreachable or failing", unhealthy, addresses.len())
    }
}

async fn check(addr: SocketAddr) -> Result<String> {
    let client = connect_to_node(addr).await?;
    let health = client.health_check(tarpc::context::current()).await??;
    let shards: Vec<String> = health.shards.iter().map(|s| s.to_string()).collect();
    Ok(format!(
        "[{}] {} documents, {} open contexts",
        shards.join(", "),
        health.documents,
        health.open_contexts
    ))
}
