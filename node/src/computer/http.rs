//! A compute backend dispatching to an external HTTP FaaS gateway: a
//! bounded worker pool issues one POST per task and routes the reply back
//! through the common completion channel. Load information is not defined
//! in this mode.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};
use url::Url;

use super::ComputeBackend;

type Job = (u64, LambdaRequest);

pub struct HttpComputer {
    jobs: UnboundedSender<Job>,
    next_task_id: AtomicU64,
    workers: Vec<JoinHandle<()>>,
}

impl HttpComputer {
    /// `gateway` is the base URL of the FaaS actions, one action per
    /// lambda name.
    pub fn new(
        gateway: Url,
        num_workers: usize,
    ) -> (Arc<Self>, UnboundedReceiver<(u64, LambdaResponse)>) {
        let (jobs, job_rx) = mpsc::unbounded_channel::<Job>();
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        let client = reqwest::Client::new();
        let mut workers = Vec::new();
        for worker in 0..num_workers.max(1) {
            let job_rx = job_rx.clone();
            let completions = completions.clone();
            let client = client.clone();
            let gateway = gateway.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = { job_rx.lock().await.recv().await };
                    let Some((id, request)) = job else {
                        break;
                    };
                    tracing::debug!(worker, id, lambda = %request.name, "posting to gateway");
                    let response = invoke_gateway(&client, &gateway, &request).await;
                    if completions.send((id, response)).is_err() {
                        break;
                    }
                }
            }));
        }

        tracing::info!(%gateway, num_workers, "created an HTTP gateway computer");

        (
            Arc::new(Self {
                jobs,
                next_task_id: AtomicU64::new(0),
                workers,
            }),
            completion_rx,
        )
    }
}

impl Drop for HttpComputer {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl ComputeBackend for HttpComputer {
    fn submit(&self, request: LambdaRequest) -> Result<u64, EdgeError> {
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.jobs
            .send((id, request))
            .map_err(|_| EdgeError::Terminating)?;
        Ok(id)
    }

    fn estimate(&self, _request: &LambdaRequest) -> Result<(Duration, [f64; 3]), EdgeError> {
        Err(EdgeError::Remote(
            "dry runs are not supported by the HTTP gateway backend".to_string(),
        ))
    }
}

async fn invoke_gateway(
    client: &reqwest::Client,
    gateway: &Url,
    request: &LambdaRequest,
) -> LambdaResponse {
    let url = match gateway.join(&request.name) {
        Ok(url) => url,
        Err(err) => return LambdaResponse::error(format!("invalid action URL: {err}")),
    };

    let body = serde_json::json!({ "input": request.input });
    let reply = match client.post(url.clone()).json(&body).send().await {
        Ok(reply) => reply,
        Err(err) => {
            return LambdaResponse::error(format!("cannot reach the gateway at {url}: {err}"))
        },
    };
    if !reply.status().is_success() {
        return LambdaResponse::error(format!("gateway returned {}", reply.status()));
    }

    match reply.json::<serde_json::Value>().await {
        Ok(value) => {
            let output = value
                .get("output")
                .and_then(|output| output.as_str())
                .unwrap_or_default();
            LambdaResponse::ok(output)
        },
        Err(err) => LambdaResponse::error(format!("invalid gateway reply: {err}")),
    }
}
