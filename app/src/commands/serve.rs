//! `leadgen serve`: run the webhook receiver on its own.

use crate::state::ReceiverTasks;
use leadgen_core::AppConfig;
use leadgen_reveal::callback_url;
use tracing::info;

/// Receive webhooks until Ctrl-C.
///
/// Useful for checking that the public URL reaches this host before a run.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let receiver = ReceiverTasks::start(&config).await?;
    info!(
        addr = %receiver.local_addr,
        callback = %callback_url(&config.receiver.public_url),
        "webhook receiver listening, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    let stats = receiver.shutdown().await?;
    info!(
        deliveries = stats.deliveries,
        unknown_keys = stats.unknown_keys,
        "receiver stopped"
    );
    Ok(())
}
