//! The abstract core of the edge dispatcher and router: one request comes
//! in, a destination is chosen, the request is forwarded through the client
//! pool, and the outcome feeds the routing layer back. Failed destinations
//! are purged and the request is retried on the next candidate.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use clap::Args;
use edgefab_client::EdgeClientPool;
use edgefab_transport::Service;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};
use rand::Rng;

use crate::{controller::Controller, forwarding_table::ForwardingTable};

/// The subclass seam: how destinations are chosen and how outcomes are
/// consumed.
#[async_trait]
pub trait Routing: Send + Sync + 'static {
    /// The destination for the given request. The request id identifies
    /// this decision until its outcome is reported.
    async fn destination(
        &self,
        request: &LambdaRequest,
        request_id: u64,
    ) -> Result<String, EdgeError>;

    /// A lambda was executed correctly. `elapsed` is the overall execution
    /// time in seconds, including transport.
    async fn process_success(
        &self,
        request: &LambdaRequest,
        request_id: u64,
        destination: &str,
        response: &LambdaResponse,
        elapsed: f64,
    );

    /// A lambda execution failed on the given destination.
    async fn process_failure(&self, request: &LambdaRequest, request_id: u64, destination: &str);

    /// The forwarding tables owned by this routing layer.
    fn tables(&self) -> Vec<Arc<dyn ForwardingTable>>;
}

/// Configuration of the processor, embeddable in a binary's arguments.
#[derive(Clone, Debug, Args)]
pub struct ProcessorConfig {
    /// Maximum number of concurrent clients per destination, 0 = unbounded.
    #[clap(long, default_value_t = 2)]
    pub max_pending_clients: usize,

    /// Lower bound of the artificial forward wait, in seconds.
    #[clap(long, default_value_t = 0.0)]
    pub min_forward_time: f64,

    /// Upper bound of the artificial forward wait, in seconds.
    #[clap(long, default_value_t = 0.0)]
    pub max_forward_time: f64,

    /// Do not contact any destination, synthesize successful responses.
    #[clap(long)]
    pub fake: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_pending_clients: 2,
            min_forward_time: 0.0,
            max_forward_time: 0.0,
            fake: false,
        }
    }
}

/// The request pipeline shared by dispatchers and routers.
pub struct LambdaProcessor<R: Routing> {
    routing: R,
    pool: EdgeClientPool,
    controller: Arc<dyn Controller>,
    fake: bool,
    min_forward_time: f64,
    max_forward_time: f64,
    next_request_id: AtomicU64,
}

impl<R: Routing> LambdaProcessor<R> {
    pub fn new(
        routing: R,
        config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
    ) -> Result<Self, EdgeError> {
        Self::with_pool(
            routing,
            config,
            controller,
            EdgeClientPool::new(config.max_pending_clients),
        )
    }

    /// Build the processor over the given pool, for testing and for
    /// alternate transports.
    pub fn with_pool(
        routing: R,
        config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
        pool: EdgeClientPool,
    ) -> Result<Self, EdgeError> {
        if config.max_forward_time < config.min_forward_time {
            return Err(EdgeError::InvalidConfiguration(format!(
                "forward time bounds are inverted: [{}, {}]",
                config.min_forward_time, config.max_forward_time
            )));
        }

        tracing::info!(
            max_pending_clients = config.max_pending_clients,
            min_forward_time_ms = config.min_forward_time * 1e3,
            max_forward_time_ms = config.max_forward_time * 1e3,
            fake = config.fake,
            "created a lambda processor"
        );
        if config.fake {
            tracing::info!("FAKE lambda processor configuration");
        }

        Ok(Self {
            routing,
            pool,
            controller,
            fake: config.fake,
            min_forward_time: config.min_forward_time,
            max_forward_time: config.max_forward_time,
            next_request_id: AtomicU64::new(0),
        })
    }

    pub fn routing(&self) -> &R {
        &self.routing
    }

    pub fn tables(&self) -> Vec<Arc<dyn ForwardingTable>> {
        self.routing.tables()
    }

    /// Process one request. Every failure produces a response with a
    /// non-OK return code, never an error.
    pub async fn process(&self, request: &LambdaRequest) -> LambdaResponse {
        // loop detection
        if request.hops > 254 {
            tracing::warn!(%request, "loop detected");
            return LambdaResponse::error("loop detected");
        }

        let mut ret_code;
        loop {
            tracing::debug!(%request, "processing");
            let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);

            let destination = match self.routing.destination(request, request_id).await {
                Ok(destination) => destination,
                Err(err) => {
                    // no candidate at all: give up
                    ret_code = err.to_string();
                    break;
                },
            };

            self.forward_wait().await;

            let result = if self.fake {
                Ok((
                    LambdaResponse::ok(""),
                    0.001 + rand::thread_rng().gen::<f64>(),
                ))
            } else {
                self.pool.invoke(&destination, request, false).await
            };

            match result {
                Ok((response, elapsed)) if response.is_ok() => {
                    self.routing
                        .process_success(request, request_id, &destination, &response, elapsed)
                        .await;
                    return response;
                },
                Ok((response, _)) => {
                    ret_code = response.ret_code;
                },
                Err(err) => {
                    ret_code = err.to_string();
                },
            }

            // purge the failed destination here and at the controller, then
            // try the next candidate
            tracing::warn!(%destination, %ret_code, "execution failed, purging destination");
            self.routing
                .process_failure(request, request_id, &destination)
                .await;
            self.controller.remove_computer(&destination).await;
        }

        LambdaResponse::error(ret_code)
    }

    /// The artificial think-time: a uniformly drawn wait in the configured
    /// bounds, skipped when both are zero.
    async fn forward_wait(&self) {
        let span = self.max_forward_time - self.min_forward_time;
        if self.min_forward_time == 0.0 && span == 0.0 {
            return;
        }
        let wait = self.min_forward_time + span * rand::thread_rng().gen::<f64>();
        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
    }
}

#[async_trait]
impl<R: Routing> Service for LambdaProcessor<R> {
    type Request = LambdaRequest;
    type Response = LambdaResponse;

    async fn call(&self, request: LambdaRequest) -> LambdaResponse {
        self.process(&request).await
    }
}
