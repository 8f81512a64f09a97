//! In-process demo cluster.
//!
//! Generates a small bond catalogue split across shards, then runs a grouped
//! search by issuer through the full coordinator.

use anyhow::{bail, Result};
use colored::Colorize;
use serde_json::json;
use std::sync::Arc;

use collapse::core::types::ShardId;
use collapse::distributed::coordinator::{CoordinatorConfig, SearchCoordinator, StaticTopology};
use collapse::distributed::shard::{MemoryIndex, SearchShard};
use collapse::distributed::transport::LocalTransport;
use collapse::distributed::types::{GroupBy, Grouping, NodeId, Query, SearchRequest};

const ISSUERS: [&str; 5] = ["acme", "globex", "initech", "umbrella", "hooli"];
const DOCS_PER_SHARD: u32 = 8;

pub fn run(shards: u32, query: &str, groups: u32) -> Result<()> {
    if shards == 0 {
        bail!("The demo needs at least one shard");
    }

    println!(
        "{} Building {} shards with {} documents each...",
        "→".blue(),
        shards,
        DOCS_PER_SHARD
    );
    let mut transport = LocalTransport::new();
    for shard in 0..shards {
        let index = MemoryIndex::from_json_array(&shard_documents(shard))?;
        transport = transport.with_shard(SearchShard::new(ShardId::new(shard), Arc::new(index)));
    }

    let coordinator = SearchCoordinator::new(
        Arc::new(transport),
        Arc::new(StaticTopology::all_local(NodeId::new("local"), shards)),
        CoordinatorConfig::default(),
    );
    let request = SearchRequest::new(Query::new(query))
        .size(groups)
        .grouping(Grouping::new(GroupBy::field("issuer"), 2))
        .facet("currency");

    println!(
        "{} Grouped search for {} by issuer",
        "→".blue(),
        query.bold()
    );
    let rt = tokio::runtime::Runtime::new()?;
    let response = rt.block_on(coordinator.search(request))?;
    super::search::print_response(&response);

    let trace: Vec<String> = response.transitions.iter().map(|s| s.to_string()).collect();
    println!("  {} {}", "states".dimmed(), trace.join(" → ").dimmed());
    Ok(())
}

/// Documents of one shard as a JSON array.
fn shard_documents(shard: u32) -> String {
    let docs: Vec<_> = (0..DOCS_PER_SHARD)
        .map(|i| {
            let issuer = ISSUERS[((shard * 3 + i) as usize) % ISSUERS.len()];
            let repeats = 1 + (i + shard) % 3;
            let body = format!(
                "{} {} bond coupon {}",
                issuer,
                vec!["rates"; repeats as usize].join(" "),
                if i % 2 == 0 { "fixed" } else { "floating" }
            );
            let currency = if (shard + i) % 4 == 0 { "EUR" } else { "USD" };
            json!({
                "issuer": issuer,
                "currency": currency,
                "year": 2020 + (i % 6),
                "body": body,
            })
        })
        .collect();
    serde_json::Value::Array(docs).to_string()
}
