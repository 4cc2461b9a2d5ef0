//! # loomgraph
//!
//! Command-line front end for `loomgraph-core`. The binary in `main.rs` only
//! installs logging and hands the parsed [`cli::Cli`] to [`cli::execute`].

pub mod cli;
