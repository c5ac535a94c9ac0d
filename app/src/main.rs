// Leadgen command-line entry point

use clap::Parser;
use leadgen_app::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    leadgen_app::init_tracing(cli.log_level.as_deref());
    leadgen_app::run(cli).await
}
