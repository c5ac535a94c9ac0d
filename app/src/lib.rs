//! Leadgen application: command-line front end for the reveal pipeline.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod commands;
pub mod input;
pub mod state;

use cli::{Cli, Command};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// An explicit `filter` wins over `RUST_LOG`; without either the default is
/// `info,leadgen=debug`.
pub fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,leadgen=debug")),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = state::load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Reveal(args) => commands::reveal::run(config, args).await,
        Command::Serve => commands::serve::run(config).await,
        Command::Credits => commands::credits::run(config).await,
    }
}
