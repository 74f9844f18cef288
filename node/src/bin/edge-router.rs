//! Runs an edge router: lambda requests are forwarded according to two
//! weight-based tables, one for requests from clients and one for requests
//! forwarded by other nodes.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edgefab_node::{parse_destination, EdgeRouter, ForwardingTable, NullController, ProcessorConfig};
use edgefab_transport::Server;
use edgefab_utils::logging;

#[derive(Parser)]
struct Args {
    /// Endpoint to receive lambda requests.
    #[clap(long, env = "EDGEFAB_ROUTER_ENDPOINT", default_value = "127.0.0.1:6473")]
    bind: String,

    /// Known destinations, as lambda,endpoint[,final]. Final destinations
    /// serve forwarded requests too. Repeatable.
    #[clap(long = "destination")]
    destinations: Vec<String>,

    #[clap(flatten)]
    processor: ProcessorConfig,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init();

    let (router, overall, final_hop) =
        EdgeRouter::router(&args.processor, Arc::new(NullController))
            .with_context(|| "cannot create the router")?;

    for entry in &args.destinations {
        let (lambda, endpoint, is_final) = parse_destination(entry)?;
        overall.change(&lambda, &endpoint, 1.0, is_final);
        if is_final {
            // forwarded requests may only terminate on a real computer
            final_hop.change(&lambda, &endpoint, 1.0, true);
        }
    }

    let server = Server::bind(&args.bind, Arc::new(router))
        .await
        .with_context(|| "cannot start the router")?;
    tracing::info!(endpoint = %server.endpoint(), "edge router running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("terminating");
    Ok(())
}
