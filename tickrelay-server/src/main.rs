//! tickrelay - TCP relay from metric agents to a relational table

mod cli;
mod logging;

use anyhow::Context;
use clap::Parser;
use tickrelay_core::relay::Acceptor;
use tickrelay_core::storage::{self, StorageTarget};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = cli::Args::parse().resolve()?;
    logging::init(&config);

    info!(version = tickrelay_core::VERSION, "starting tickrelay");

    let target = StorageTarget::new(&config.relay.storage)?;
    storage::verify(&target)
        .await
        .with_context(|| format!("storage {} is not reachable", target))?;
    info!(destination = %target, lifecycle = ?config.relay.lifecycle, "storage reachable");

    let acceptor = Acceptor::bind(config.relay.clone())
        .with_context(|| format!("cannot start listener on {}", config.relay.listen_addr))?;

    let stats = acceptor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "cannot listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        connections = stats.connections_accepted,
        batches = stats.batches_read,
        records = stats.records_written,
        failed_batches = stats.batches_failed,
        discarded_lines = stats.lines_discarded,
        "tickrelay stopped"
    );

    Ok(())
}
