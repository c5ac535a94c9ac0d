//! Command-line interface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Leadgen - bulk contact reveals through the SignalHire webhook API
#[derive(Parser, Debug)]
#[command(name = "leadgen")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter (e.g. `debug`, `info,leadgen=trace`). Overrides `RUST_LOG`.
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reveal contacts for identifiers listed in a file
    Reveal(RevealArgs),

    /// Run the webhook receiver only
    Serve,

    /// Show the remaining daily reveal allowance
    Credits,
}

#[derive(Args, Debug, Clone)]
pub struct RevealArgs {
    /// File with one identifier (email, profile URL or UID) per line
    #[arg(short, long)]
    pub input: PathBuf,

    /// Identifiers per provider request (capped at the provider maximum)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Seconds to wait for each request's webhook
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}
