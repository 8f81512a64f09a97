//! Collapse CLI - serve shards and run grouped searches.

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "collapse")]
#[command(author, version, about = "Collapse - grouped search across shards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default collapse.toml
    Init {
        /// Project directory (default: current directory)
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Serve the shards listed under [shard] over TCP
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Search the cluster listed under [cluster]
    Search {
        /// Search query (empty matches everything)
        query: String,

        /// Hits (or groups) to return
        #[arg(short, long)]
        size: Option<u32>,

        /// Offset of the first hit (or group)
        #[arg(short, long, default_value = "0")]
        from: u32,

        /// Sort as field:kind[:desc], repeatable (default: relevance)
        #[arg(long)]
        sort: Vec<String>,

        /// Collapse results on this field
        #[arg(short, long)]
        group_by: Option<String>,

        /// Hits shown per group
        #[arg(long, default_value = "3")]
        group_size: u32,

        /// Only count matching documents
        #[arg(long)]
        count: bool,

        /// Facet counts for these fields
        #[arg(long)]
        facet: Vec<String>,
    },

    /// Show the health of every node in the cluster
    Health,

    /// Run a grouped search against an in-process demo cluster
    Demo {
        /// Number of shards
        #[arg(short, long, default_value = "3")]
        shards: u32,

        /// Search query
        #[arg(default_value = "rates")]
        query: String,

        /// Groups to return
        #[arg(long, default_value = "3")]
        groups: u32,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Init { path } => commands::init::run(path),
        Commands::Serve { port } => commands::serve::run(port),
        Commands::Search {
            query,
            size,
            from,
            sort,
            group_by,
            group_size,
            count,
            facet,
        } => commands::search::run(commands::search::SearchArgs {
            query,
            size,
            from,
            sort,
            group_by,
            group_size,
            count,
            facets: facet,
        }),
        Commands::Health => commands::health::run(),
        Commands::Demo {
            shards,
            query,
            groups,
        } => commands::demo::run(shards, &query, groups),
    }
}
