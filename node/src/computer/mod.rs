//! The edge computer: a synchronous wrapper around a compute backend (the
//! local simulator or an HTTP FaaS gateway), plus the edge-side chain/DAG
//! orchestrator.

mod callback;
mod http;
mod orchestrator;
mod simulator;

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use edgefab_transport::Service;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse, RET_CODE_OK};
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::UnboundedReceiver,
    oneshot,
    Notify,
};

pub use callback::CallbackClient;
pub use http::HttpComputer;
pub use simulator::{Computer, Workload};

/// A compute backend: enqueue a task, or estimate what it would cost.
pub trait ComputeBackend: Send + Sync + 'static {
    /// Enqueue a task; the completion arrives on the backend's completion
    /// channel with the returned id.
    fn submit(&self, request: LambdaRequest) -> Result<u64, EdgeError>;

    /// Estimated execution time and load snapshot, without side effects.
    fn estimate(&self, request: &LambdaRequest) -> Result<(Duration, [f64; 3]), EdgeError>;
}

impl ComputeBackend for Computer {
    fn submit(&self, request: LambdaRequest) -> Result<u64, EdgeError> {
        Computer::submit(self, request)
    }

    fn estimate(&self, request: &LambdaRequest) -> Result<(Duration, [f64; 3]), EdgeError> {
        Computer::estimate(self, request)
    }
}

/// The per-request rendezvous between the submitter and the completion
/// router. Cloneable; all clones share the same pending map.
#[derive(Clone)]
pub(crate) struct Executor {
    backend: Arc<dyn ComputeBackend>,
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<LambdaResponse>>>>,
    inserted: Arc<Notify>,
}

impl Executor {
    /// Run one task to completion and compose the response: measured
    /// processing time in milliseconds, one more hop.
    pub(crate) async fn execute(&self, request: &LambdaRequest) -> LambdaResponse {
        let chrono = Instant::now();

        let id = match self.backend.submit(request.clone()) {
            Ok(id) => id,
            Err(err) => {
                let mut response = LambdaResponse::error(err.to_string());
                response.hops = request.hops + 1;
                return response;
            },
        };

        // register the descriptor and wake the completion router, which may
        // already be waiting for it
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        self.inserted.notify_one();

        let mut response = match rx.await {
            Ok(response) => response,
            Err(_) => LambdaResponse::error("computer terminated"),
        };
        response.ptime_msec = (chrono.elapsed().as_secs_f64() * 1e3 + 0.5) as u32;
        response.hops = request.hops + 1;
        response
    }

    /// Dry run: ask the backend for an estimate, no execution.
    pub(crate) fn dry_run(&self, request: &LambdaRequest) -> LambdaResponse {
        let mut response = match self.backend.estimate(request) {
            Ok((duration, loads)) => {
                let mut response = LambdaResponse::with_loads(RET_CODE_OK, "", loads);
                response.ptime_msec = (duration.as_secs_f64() * 1e3 + 0.5) as u32;
                response
            },
            Err(err) => LambdaResponse::error(err.to_string()),
        };
        response.hops = request.hops + 1;
        response
    }
}

/// The edge server executing lambdas on a compute backend. Plain requests
/// run synchronously; requests carrying a chain/DAG descriptor and a
/// callback endpoint are acknowledged immediately and orchestrated in the
/// background.
pub struct EdgeComputer {
    executor: Executor,
    completion_router: tokio::task::JoinHandle<()>,
}

impl EdgeComputer {
    pub fn new(
        backend: Arc<dyn ComputeBackend>,
        mut completions: UnboundedReceiver<(u64, LambdaResponse)>,
    ) -> Self {
        let executor = Executor {
            backend,
            pending: Arc::new(Mutex::new(HashMap::new())),
            inserted: Arc::new(Notify::new()),
        };

        // Routes every completion to its waiting descriptor. A task may
        // finish before its descriptor is registered: in that case wait
        // until the submitter has caught up.
        let pending = executor.pending.clone();
        let inserted = executor.inserted.clone();
        let completion_router = tokio::spawn(async move {
            while let Some((id, response)) = completions.recv().await {
                let mut response = Some(response);
                loop {
                    let notified = inserted.notified();
                    if let Some(tx) = pending.lock().remove(&id) {
                        if tx.send(response.take().expect("sent once")).is_err() {
                            tracing::debug!(id, "requester gone, completion dropped");
                        }
                        break;
                    }
                    notified.await;
                }
            }
        });

        Self {
            executor,
            completion_router,
        }
    }

    pub async fn process(&self, request: LambdaRequest) -> LambdaResponse {
        if let Err(err) = edgefab_types::name::parse_name(&request.name) {
            let mut response = LambdaResponse::error(err.to_string());
            response.hops = request.hops + 1;
            return response;
        }

        if request.chain.is_some() || request.dag.is_some() {
            if request.callback.is_none() {
                let mut response =
                    LambdaResponse::error("chain/DAG execution requires a callback endpoint");
                response.hops = request.hops + 1;
                return response;
            }
            return orchestrator::spawn(self.executor.clone(), request);
        }

        if request.dry {
            return self.executor.dry_run(&request);
        }
        self.executor.execute(&request).await
    }
}

impl Drop for EdgeComputer {
    fn drop(&mut self) {
        self.completion_router.abort();
    }
}

#[async_trait]
impl Service for EdgeComputer {
    type Request = LambdaRequest;
    type Response = LambdaResponse;

    async fn call(&self, request: LambdaRequest) -> LambdaResponse {
        self.process(request).await
    }
}
