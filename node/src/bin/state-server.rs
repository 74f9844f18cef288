//! Runs a standalone in-memory state store.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edgefab_node::StateServer;
use edgefab_transport::Server;
use edgefab_utils::logging;

#[derive(Parser)]
struct Args {
    /// Endpoint to receive state requests.
    #[clap(long, env = "EDGEFAB_STATE_ENDPOINT", default_value = "127.0.0.1:6481")]
    bind: String,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init();

    let server = Server::bind(&args.bind, Arc::new(StateServer::new()))
        .await
        .with_context(|| "cannot start the state server")?;
    tracing::info!(endpoint = %server.endpoint(), "state server running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("terminating");
    Ok(())
}
