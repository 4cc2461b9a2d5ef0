//! # LoomGraph CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create the store, optionally seeding a tenant and graph
//! - `stats` - Record counts for all tenants, one tenant or one graph
//! - `route` - Enumerate routes between two nodes
//! - `subgraph` - Extract the neighborhood of a node
//! - `ranking` - Most (or least) connected nodes of a graph
//! - `reindex` - Rebuild, or first enable, a graph's vector index
//! - `search` - Vector similarity search within a graph

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use loomgraph_core::{LoomError, SearchMode};
use std::path::PathBuf;
use uuid::Uuid;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// LoomGraph - embedded multi-tenant property-graph engine
#[derive(Parser, Debug)]
#[command(name = "loomgraph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the redb store (overrides `storage.path` from --config)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// TOML file with engine settings
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Frontier discipline of the `route` command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RouteMode {
    #[default]
    Depth,
    Breadth,
}

impl From<RouteMode> for SearchMode {
    fn from(mode: RouteMode) -> Self {
        match mode {
            RouteMode::Depth => SearchMode::DepthFirst,
            RouteMode::Breadth => SearchMode::BreadthFirst,
        }
    }
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the store file, optionally with a first tenant and graph
    Init {
        /// Name of a tenant to create
        #[arg(long)]
        tenant: Option<String>,

        /// Name of a graph to create under the new tenant
        #[arg(long, requires = "tenant")]
        graph: Option<String>,

        /// Replace an existing store file
        #[arg(short, long)]
        force: bool,
    },

    /// Show record counts
    Stats {
        /// Restrict to one tenant
        #[arg(long)]
        tenant: Option<Uuid>,

        /// Restrict to one graph of the tenant
        #[arg(long, requires = "tenant")]
        graph: Option<Uuid>,
    },

    /// Enumerate routes between two nodes
    Route {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        graph: Uuid,

        /// Start node
        #[arg(long)]
        from: Uuid,

        /// End node
        #[arg(long)]
        to: Uuid,

        /// Search mode
        #[arg(long, value_enum, default_value_t = RouteMode::Depth)]
        mode: RouteMode,

        /// Longest route, in edges
        #[arg(long)]
        max_hops: Option<usize>,
    },

    /// Extract the neighborhood of a node
    Subgraph {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        graph: Uuid,

        /// Start node
        #[arg(long)]
        node: Uuid,

        /// Hops from the start node
        #[arg(long, default_value = "2")]
        depth: usize,

        /// Most nodes to return (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_nodes: usize,

        /// Most edges to return (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_edges: usize,

        /// Only print node and edge counts
        #[arg(long)]
        counts_only: bool,
    },

    /// Rank nodes by degree
    Ranking {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        graph: Uuid,

        /// Least connected first instead of most
        #[arg(long)]
        least: bool,

        /// Number of nodes to list
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Rebuild a graph's vector index
    Reindex {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        graph: Uuid,

        /// Enable an index of this dimensionality if none is configured
        #[arg(long)]
        dimensions: Option<usize>,
    },

    /// Vector similarity search
    Search {
        #[arg(long)]
        tenant: Uuid,

        #[arg(long)]
        graph: Uuid,

        /// Query embedding (comma-separated)
        #[arg(long, value_delimiter = ',', num_args = 1.., allow_hyphen_values = true)]
        vector: Vec<f32>,

        /// Search type (cosine_similarity, cosine_distance, euclidean_similarity,
        /// euclidean_distance, dot_product)
        #[arg(short = 't', long = "type", default_value = "cosine_similarity")]
        search_type: String,

        /// Entity kind whose vectors are searched (graph, node, edge)
        #[arg(long, default_value = "node")]
        domain: String,

        /// Number of results
        #[arg(long)]
        top_k: Option<usize>,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli) -> Result<(), LoomError> {
    let settings = load_settings(cli.config.as_deref(), cli.database.as_deref())?;
    let json = cli.json;

    match cli.command {
        Some(Commands::Init {
            tenant,
            graph,
            force,
        }) => emit(
            &cmd_init(settings, tenant.as_deref(), graph.as_deref(), force)?,
            json,
        ),
        Some(Commands::Stats { tenant, graph }) => {
            emit(&cmd_stats(&open_client(settings)?, tenant, graph)?, json)
        }
        Some(Commands::Route {
            tenant,
            graph,
            from,
            to,
            mode,
            max_hops,
        }) => {
            let args = RouteArgs {
                tenant,
                graph,
                from,
                to,
                mode: mode.into(),
                max_hops,
            };
            emit(&cmd_route(&open_client(settings)?, &args)?, json)
        }
        Some(Commands::Subgraph {
            tenant,
            graph,
            node,
            depth,
            max_nodes,
            max_edges,
            counts_only,
        }) => {
            let args = SubgraphArgs {
                tenant,
                graph,
                node,
                depth,
                max_nodes,
                max_edges,
            };
            let client = open_client(settings)?;
            if counts_only {
                emit(&cmd_subgraph_counts(&client, &args)?, json)
            } else {
                emit(&cmd_subgraph(&client, &args)?, json)
            }
        }
        Some(Commands::Ranking {
            tenant,
            graph,
            least,
            limit,
        }) => emit(
            &cmd_ranking(&open_client(settings)?, tenant, graph, least, limit)?,
            json,
        ),
        Some(Commands::Reindex {
            tenant,
            graph,
            dimensions,
        }) => emit(
            &cmd_reindex(&open_client(settings)?, tenant, graph, dimensions)?,
            json,
        ),
        Some(Commands::Search {
            tenant,
            graph,
            vector,
            search_type,
            domain,
            top_k,
        }) => {
            let args = SearchArgs {
                tenant,
                graph,
                vector,
                search_type: search_type.parse()?,
                domain: domain.parse()?,
                top_k,
            };
            emit(&cmd_search(&open_client(settings)?, &args)?, json)
        }
        None => {
            // No subcommand - show statistics by default
            emit(&cmd_stats(&open_client(settings)?, None, None)?, json)
        }
    }
}
