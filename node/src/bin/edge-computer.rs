//! Runs an edge computer: a lambda server executing functions on the local
//! compute simulator, or on an external HTTP FaaS gateway.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use edgefab_node::{computer::HttpComputer, Computer, EdgeComputer, Workload};
use edgefab_transport::Server;
use edgefab_utils::logging;
use url::Url;

#[derive(Parser)]
struct Args {
    /// Endpoint to receive lambda requests.
    #[clap(long, env = "EDGEFAB_COMPUTER_ENDPOINT", default_value = "127.0.0.1:6474")]
    bind: String,

    /// Name of this computer.
    #[clap(long, default_value = "computer")]
    name: String,

    /// Number of virtual cores of the simulator.
    #[clap(long, default_value_t = 4)]
    num_cores: usize,

    /// Speed of each core, in operations per second.
    #[clap(long, default_value_t = 1e9)]
    core_speed: f64,

    /// Comma-separated lambdas served by the simulator.
    #[clap(long, default_value = "clambda0")]
    lambdas: String,

    /// Fixed cost of every lambda, in operations.
    #[clap(long, default_value_t = 1e6)]
    lambda_ops: f64,

    /// Per-input-byte cost of every lambda, in operations.
    #[clap(long, default_value_t = 1e3)]
    lambda_ops_per_byte: f64,

    /// Dispatch to this HTTP FaaS gateway instead of simulating locally.
    #[clap(long)]
    wsk_gateway: Option<Url>,

    /// Worker pool size towards the gateway.
    #[clap(long, default_value_t = 5)]
    wsk_workers: usize,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init();

    let edge_computer = match &args.wsk_gateway {
        Some(gateway) => {
            let (backend, completions) = HttpComputer::new(gateway.clone(), args.wsk_workers);
            EdgeComputer::new(backend, completions)
        },
        None => {
            let (computer, completions) =
                Computer::new(args.name.clone(), args.num_cores, args.core_speed);
            for lambda in args.lambdas.split(',').filter(|s| !s.is_empty()) {
                computer.add_workload(
                    lambda,
                    Workload::new(args.lambda_ops, args.lambda_ops_per_byte),
                );
            }
            EdgeComputer::new(computer, completions)
        },
    };

    let server = Server::bind(&args.bind, Arc::new(edge_computer))
        .await
        .with_context(|| "cannot start the edge computer")?;
    tracing::info!(endpoint = %server.endpoint(), "edge computer running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("terminating");
    Ok(())
}
