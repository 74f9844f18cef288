//! Runs an edge dispatcher: lambda requests from edge clients are routed
//! towards edge computers by a processing-time estimator.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edgefab_node::{
    parse_destination, EdgeDispatcher, ForwardingTable, NullController, ProcessorConfig,
};
use edgefab_node::ptime::EstimatorOptions;
use edgefab_transport::Server;
use edgefab_utils::logging;

#[derive(Parser)]
struct Args {
    /// Endpoint to receive lambda requests.
    #[clap(long, env = "EDGEFAB_DISPATCHER_ENDPOINT", default_value = "127.0.0.1:6473")]
    bind: String,

    /// Known destinations, as lambda,endpoint[,final]. Repeatable.
    #[clap(long = "destination")]
    destinations: Vec<String>,

    #[clap(flatten)]
    estimator: EstimatorOptions,

    #[clap(flatten)]
    processor: ProcessorConfig,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init();

    let (dispatcher, estimator) =
        EdgeDispatcher::dispatcher(&args.estimator, &args.processor, Arc::new(NullController))
            .with_context(|| "cannot create the dispatcher")?;

    for entry in &args.destinations {
        let (lambda, endpoint, is_final) = parse_destination(entry)?;
        estimator.change(&lambda, &endpoint, 1.0, is_final);
    }

    let server = Server::bind(&args.bind, Arc::new(dispatcher))
        .await
        .with_context(|| "cannot start the dispatcher")?;
    tracing::info!(endpoint = %server.endpoint(), "edge dispatcher running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("terminating");
    Ok(())
}
