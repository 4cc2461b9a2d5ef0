//! # LoomGraph CLI
//!
//! Operator binary for a LoomGraph store.
//!
//! ## Usage
//!
//! ```bash
//! # Create a store with one tenant and graph
//! loomgraph -D graph.redb init --tenant acme --graph social
//!
//! # Inspect it
//! loomgraph -D graph.redb stats
//! loomgraph -D graph.redb --json route --tenant <T> --graph <G> --from <A> --to <B>
//! ```

use clap::Parser;
use loomgraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // LOOMGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("LOOMGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "loomgraph=debug,loomgraph_core=debug"
    } else {
        "loomgraph=info,loomgraph_core=warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so stdout stays parseable in --json mode.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
