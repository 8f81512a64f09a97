//! Run a distributed search against the configured cluster.

use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use collapse::core::sort::{SortField, SortFieldKind, SortSpec};
use collapse::core::types::ShardId;
use collapse::distributed::coordinator::{
    ResponseStatus, SearchCoordinator, SearchGroup, SearchHit, SearchResponse, StaticTopology,
};
use collapse::distributed::rpc::{NodeClientPool, RpcTransport};
use collapse::distributed::types::{GroupBy, Grouping, NodeId, Query, SearchRequest, SearchType};

use crate::config::Config;

/// Arguments of `collapse search`.
#[derive(Debug, Clone)]
pub struct SearchArgs {
    pub query: String,
    pub size: Option<u32>,
    pub from: u32,
    pub sort: Vec<String>,
    pub group_by: Option<String>,
    pub group_size: u32,
    pub count: bool,
    pub facets: Vec<String>,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let config = Config::load()?;
    if config.cluster.shards.is_empty() {
        bail!("No cluster configured; add [[cluster.shards]] entries to collapse.toml");
    }
    let request = build_request(&args, config.search.default_size)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let pool = NodeClientPool::new();
        let mut topology = StaticTopology::new(NodeId::new("cli"));
        for entry in &config.cluster.shards {
            let addr: SocketAddr = entry
                .address
                .parse()
                .with_context(|| format!("Invalid address for shard {}: {}", entry.id, entry.address))?;
            let node = NodeId::new(entry.address.clone());
            debug!("Routing shard {} to {}", entry.id, addr);
            pool.register_node(node.clone(), addr).await;
            topology = topology.assign(ShardId::new(entry.id), node);
        }

        let mut transport = RpcTransport::new(pool);
        if let Some(ms) = config.search.timeout_ms {
            transport = transport.with_call_timeout(Duration::from_millis(ms));
        }

        let coordinator = SearchCoordinator::new(
            Arc::new(transport),
            Arc::new(topology),
            config.search.coordinator_config(),
        );

        println!("{} Searching for: {}", "→".blue(), args.query.bold());
        let response = coordinator.search(request).await?;
        print_response(&response);
        Ok(())
    })
}

/// Turn CLI arguments into a search request.
pub fn build_request(args: &SearchArgs, default_size: u32) -> Result<SearchRequest> {
    let mut sort = Vec::with_capacity(args.sort.len());
    for spec in &args.sort {
        sort.push(parse_sort(spec)?);
    }

    let mut request = SearchRequest::new(Query::new(args.query.clone()))
        .from(args.from)
        .size(args.size.unwrap_or(default_size));
    if !sort.is_empty() {
        request = request.sort(SortSpec::new(sort));
    }
    if args.count {
        request = request.search_type(SearchType::Count);
    }
    if let Some(field) = &args.group_by {
        request = request.grouping(Grouping::new(GroupBy::field(field.clone()), args.group_size));
    }
    for facet in &args.facets {
        request = request.facet(facet.clone());
    }
    Ok(request)
}

/// Parse `score`, `doc` or `field:kind[:desc|:asc]`.
pub fn parse_sort(spec: &str) -> Result<SortField> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (field, direction) = match parts.as_slice() {
        ["score"] => (SortField::score(), None),
        ["score", dir] => (SortField::score(), Some(*dir)),
        ["doc"] => (SortField::doc(), None),
        ["doc", dir] => (SortField::doc(), Some(*dir)),
        [name, kind] => (SortField::field(*name, parse_kind(kind)?), None),
        [name, kind, dir] => (SortField::field(*name, parse_kind(kind)?), Some(*dir)),
        _ => return Err(anyhow!("Invalid sort '{}', expected field:kind[:desc]", spec)),
    };

    // Score defaults to descending, everything else to ascending.
    let flip = match direction {
        None => false,
        Some("asc") => field.kind == SortFieldKind::Score,
        Some("desc") => field.kind != SortFieldKind::Score,
        Some(other) => bail!("Invalid sort direction '{}' in '{}'", other, spec),
    };
    Ok(if flip { field.reversed() } else { field })
}

fn parse_kind(kind: &str) -> Result<SortFieldKind> {
    match kind {
        "int" => Ok(SortFieldKind::Int),
        "long" => Ok(SortFieldKind::Long),
        "float" => Ok(SortFieldKind::Float),
        "double" => Ok(SortFieldKind::Double),
        "text" | "string" => Ok(SortFieldKind::Text),
        other => Err(anyhow!("Unknown sort kind '{}'", other)),
    }
}

/// Print a response with its shard status.
pub fn print_response(response: &SearchResponse) {
    println!();
    match &response.groups {
        Some(groups) => {
            for group in groups {
                print_group(group);
            }
            println!();
            println!(
                "{} groups shown, {} groups total, {} grouped hits",
                groups.len(),
                response
                    .total_group_count
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "?".into()),
                response.total_grouped_hit_count.unwrap_or(0)
            );
        }
        None => {
            for hit in &response.hits {
                print_hit(hit, "");
            }
            println!();
            println!("{} hits shown", response.hits.len());
        }
    }

    println!(
        "{} total hits, max score {:.3}, took {:?}",
        response.total_hits, response.max_score, response.took
    );

    for (shard, payload) in &response.facets {
        println!("  {} facets {}: {}", "•".blue(), shard, String::from_utf8_lossy(payload));
    }
    if let Some(scroll_id) = &response.scroll_id {
        println!("  {} scroll id {}", "•".blue(), scroll_id);
    }
    if response.timed_out {
        println!("  {} some shards timed out", "!".yellow());
    }

    match response.status() {
        ResponseStatus::Success => println!(
            "{} {}/{} shards succeeded",
            "✓".green().bold(),
            response.successful_shards,
            response.total_shards
        ),
        ResponseStatus::Partial { successful, total } => {
            println!("{} {}/{} shards succeeded", "!".yellow().bold(), successful, total)
        }
        ResponseStatus::Failed => println!("{} no shard succeeded", "✗".red().bold()),
    }
    for failure in &response.failures {
        println!("  {} {}", "✗".red(), failure);
    }
}

fn print_group(group: &SearchGroup) {
    println!(
        "{} {} ({} hits, max score {:.3})",
        "▸".cyan(),
        group.value.to_string().bold(),
        group.total_hits,
        group.max_score
    );
    for hit in &group.hits {
        print_hit(hit, "  ");
    }
}

fn print_hit(hit: &SearchHit, indent: &str) {
    println!(
        "{}{} {}#{} {:.3} {}",
        indent,
        "•".blue(),
        hit.shard_id,
        hit.doc_id,
        hit.score,
        hit.source.dimmed()
    );
}
