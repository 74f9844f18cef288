//! Command-line edge client: sends single lambdas, walks synchronous
//! function chains, or submits asynchronous chain/DAG invocations with a
//! local callback server.

use std::{collections::BTreeSet, time::Duration, time::Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgefab_client::{
    CallbackServer, Composer, ComposerConfig, EdgeClient, EdgeClientInterface, EdgeClientMulti,
};
use edgefab_types::model::factory;
use edgefab_utils::logging;

#[derive(Parser)]
struct Args {
    /// Comma-separated list of edge server endpoints.
    #[clap(long, env = "EDGEFAB_SERVERS", default_value = "127.0.0.1:6473")]
    servers: String,

    /// Name of the lambda to invoke (ignored with a chain or DAG).
    #[clap(long, default_value = "clambda0")]
    lambda: String,

    /// Input of the lambda.
    #[clap(long, default_value = "hello")]
    input: String,

    /// Additional payload size, in bytes.
    #[clap(long, default_value_t = 0)]
    payload_size: usize,

    /// Number of requests to issue, 0 means forever.
    #[clap(long, default_value_t = 1)]
    max_requests: usize,

    /// Time between consecutive requests, in seconds.
    #[clap(long, default_value_t = 0.0)]
    inter_request_time: f64,

    /// Persistence probability of the multi-destination client.
    #[clap(long, env = "EDGEFAB_PERSISTENCE", default_value_t = 0.05)]
    persistence: f64,

    /// JSON file with a function chain; overrides --lambda.
    #[clap(long)]
    chain_conf: Option<String>,

    /// JSON file with a function DAG; overrides --lambda.
    #[clap(long)]
    dag_conf: Option<String>,

    /// Print an example chain file and exit.
    #[clap(long)]
    chain_template: bool,

    /// Local endpoint receiving asynchronous responses. Mandatory with a
    /// DAG.
    #[clap(long)]
    callback_endpoint: Option<String>,

    /// Endpoint of the state store used to stage states by location.
    #[clap(long)]
    state_endpoint: Option<String>,

    #[clap(flatten)]
    logging: logging::Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.logging.init();

    if args.chain_template {
        println!("{}", factory::example_chain_json());
        return Ok(());
    }

    let endpoints: BTreeSet<String> = args
        .servers
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if endpoints.is_empty() {
        bail!("no edge servers specified");
    }

    let mut config = ComposerConfig {
        callback: args.callback_endpoint.clone(),
        state_endpoint: args.state_endpoint.clone(),
        ..ComposerConfig::default()
    };
    if let Some(path) = &args.chain_conf {
        let (chain, sizes) = factory::chain_from_file(path)?;
        tracing::info!(chain = %chain, "operating in function chain mode");
        config.chain = Some(chain);
        config.state_sizes = sizes;
    }
    if let Some(path) = &args.dag_conf {
        let (dag, sizes) = factory::dag_from_file(path)?;
        tracing::info!(dag = %dag, "operating in DAG mode");
        config.dag = Some(dag);
        config.state_sizes = sizes;
    }

    let mut callback_server = match &args.callback_endpoint {
        Some(endpoint) => Some(
            CallbackServer::bind(endpoint)
                .await
                .with_context(|| "cannot start the callback server")?,
        ),
        None => None,
    };

    let client: Box<dyn EdgeClientInterface> = if endpoints.len() > 1 {
        Box::new(EdgeClientMulti::new(endpoints, args.persistence)?)
    } else {
        Box::new(EdgeClient::new(endpoints.into_iter().next().unwrap()))
    };
    let mut composer = Composer::new(client, config)?;

    let data_in = vec![0u8; args.payload_size];
    let mut latencies = Vec::new();
    let mut failed = 0usize;
    let mut issued = 0usize;
    while args.max_requests == 0 || issued < args.max_requests {
        issued += 1;
        let chrono = Instant::now();
        let mut response = composer.invoke(&args.lambda, &args.input, data_in.clone()).await?;

        if response.is_ok() && response.asynchronous {
            // the first response is only an ack, wait for the callback
            let server = callback_server
                .as_mut()
                .expect("asynchronous responses imply a callback server");
            response = server
                .recv()
                .await
                .with_context(|| "callback server terminated")?;
        }

        let elapsed = chrono.elapsed().as_secs_f64();
        if response.is_ok() {
            latencies.push(elapsed);
        } else {
            failed += 1;
        }
        tracing::info!(latency_s = elapsed, %response, "lambda completed");

        if args.inter_request_time > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(args.inter_request_time)).await;
        }
    }

    if !latencies.is_empty() {
        let count = latencies.len();
        let mean = latencies.iter().sum::<f64>() / count as f64;
        let min = latencies.iter().cloned().fold(f64::MAX, f64::min);
        let max = latencies.iter().cloned().fold(0.0, f64::max);
        println!(
            "requests {count}, failed {failed}, latency mean {:.1} ms, min {:.1} ms, max {:.1} ms",
            mean * 1e3,
            min * 1e3,
            max * 1e3
        );
    } else {
        println!("requests {issued}, all failed");
    }

    Ok(())
}
