//! The local compute simulator: registered lambda workloads executed on a
//! fixed number of virtual cores, with utilization tracking.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse, RET_CODE_OK};
use parking_lot::Mutex;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    Semaphore,
};

type Handler = Arc<dyn Fn(&LambdaRequest) -> (String, Vec<u8>) + Send + Sync>;

/// A lambda the computer can run: a linear cost model over the input size,
/// plus the function body itself.
#[derive(Clone)]
pub struct Workload {
    /// Fixed cost, in operations.
    ops: f64,
    /// Cost per input byte, in operations.
    ops_per_byte: f64,
    handler: Handler,
}

impl Workload {
    /// A workload that echoes its input back.
    pub fn new(ops: f64, ops_per_byte: f64) -> Self {
        Self::with_handler(ops, ops_per_byte, |request: &LambdaRequest| {
            (request.input.clone(), request.data_in.clone())
        })
    }

    pub fn with_handler(
        ops: f64,
        ops_per_byte: f64,
        handler: impl Fn(&LambdaRequest) -> (String, Vec<u8>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            ops,
            ops_per_byte,
            handler: Arc::new(handler),
        }
    }

    fn duration(&self, input_size: usize, core_speed: f64) -> Duration {
        Duration::from_secs_f64((self.ops + self.ops_per_byte * input_size as f64) / core_speed)
    }
}

/// Tracks the busy intervals of the cores to produce the 1/10/30 s load
/// snapshots carried in the responses.
struct UtilTracker {
    cores: usize,
    running: Mutex<BTreeMap<u64, Instant>>,
    done: Mutex<Vec<(Instant, Instant)>>,
    next_token: AtomicU64,
}

impl UtilTracker {
    fn new(cores: usize) -> Self {
        Self {
            cores: cores.max(1),
            running: Mutex::new(BTreeMap::new()),
            done: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
        }
    }

    fn start(&self) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.running.lock().insert(token, Instant::now());
        token
    }

    fn stop(&self, token: u64) {
        if let Some(start) = self.running.lock().remove(&token) {
            self.done.lock().push((start, Instant::now()));
        }
    }

    /// Fraction of the core capacity used over the last 1, 10 and 30
    /// seconds, each in [0, 1].
    fn loads(&self) -> [f64; 3] {
        let now = Instant::now();
        let mut intervals: Vec<(Instant, Instant)> = self
            .running
            .lock()
            .values()
            .map(|start| (*start, now))
            .collect();
        {
            let mut done = self.done.lock();
            // intervals older than the longest window no longer matter
            done.retain(|(_, end)| now.duration_since(*end) < Duration::from_secs(30));
            intervals.extend(done.iter().copied());
        }

        let mut ret = [0.0; 3];
        for (slot, window_secs) in [1.0, 10.0, 30.0].into_iter().enumerate() {
            let window = Duration::from_secs_f64(window_secs);
            let horizon = now.checked_sub(window).unwrap_or(now);
            let busy: f64 = intervals
                .iter()
                .map(|(start, end)| {
                    let start = (*start).max(horizon);
                    if *end > start {
                        end.duration_since(start).as_secs_f64()
                    } else {
                        0.0
                    }
                })
                .sum();
            ret[slot] = (busy / (self.cores as f64 * window_secs)).clamp(0.0, 1.0);
        }
        ret
    }
}

/// The local compute scheduler: tasks queue over `cores` virtual cores,
/// each running for the duration given by its workload's cost model.
/// Completions are delivered on the channel returned by [`Computer::new`].
pub struct Computer {
    name: String,
    cores: usize,
    core_speed: f64,
    workloads: Mutex<BTreeMap<String, Workload>>,
    limiter: Arc<Semaphore>,
    pending: Arc<AtomicUsize>,
    tracker: Arc<UtilTracker>,
    completions: UnboundedSender<(u64, LambdaResponse)>,
    next_task_id: AtomicU64,
}

impl Computer {
    /// `core_speed` is in operations per second.
    pub fn new(
        name: impl Into<String>,
        cores: usize,
        core_speed: f64,
    ) -> (Arc<Self>, UnboundedReceiver<(u64, LambdaResponse)>) {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let cores = cores.max(1);
        (
            Arc::new(Self {
                name: name.into(),
                cores,
                core_speed,
                workloads: Mutex::new(BTreeMap::new()),
                limiter: Arc::new(Semaphore::new(cores)),
                pending: Arc::new(AtomicUsize::new(0)),
                tracker: Arc::new(UtilTracker::new(cores)),
                completions,
                next_task_id: AtomicU64::new(0),
            }),
            completion_rx,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_workload(&self, lambda: impl Into<String>, workload: Workload) {
        let lambda = lambda.into();
        tracing::info!(computer = %self.name, %lambda, "workload registered");
        self.workloads.lock().insert(lambda, workload);
    }

    pub fn lambdas(&self) -> Vec<String> {
        self.workloads.lock().keys().cloned().collect()
    }

    fn workload(&self, lambda: &str) -> Result<Workload, EdgeError> {
        self.workloads
            .lock()
            .get(lambda)
            .cloned()
            .ok_or_else(|| EdgeError::Remote(format!("unknown lambda: {lambda}")))
    }

    /// Estimate the time a task would take if submitted now, with the load
    /// snapshot. Does not execute anything.
    pub fn estimate(&self, request: &LambdaRequest) -> Result<(Duration, [f64; 3]), EdgeError> {
        let workload = self.workload(&request.name)?;
        let base = workload.duration(request.input_size(), self.core_speed);

        // queueing behind the tasks already in the system
        let in_system = self.pending.load(Ordering::Relaxed) + 1;
        let factor = (in_system as f64 / self.cores as f64).max(1.0);
        Ok((base.mul_f64(factor), self.tracker.loads()))
    }

    /// Enqueue a task; its completion will carry the returned id.
    pub fn submit(&self, request: LambdaRequest) -> Result<u64, EdgeError> {
        let workload = self.workload(&request.name)?;
        let duration = workload.duration(request.input_size(), self.core_speed);
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_add(1, Ordering::Relaxed);

        let limiter = self.limiter.clone();
        let tracker = self.tracker.clone();
        let pending = self.pending.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            // one core for the whole execution
            let permit = limiter.acquire_owned().await.ok();
            let token = tracker.start();
            tokio::time::sleep(duration).await;
            let (output, data_out) = (workload.handler)(&request);
            tracker.stop(token);
            let loads = tracker.loads();
            pending.fetch_sub(1, Ordering::Relaxed);
            drop(permit);

            let mut response = LambdaResponse::with_loads(RET_CODE_OK, output, loads);
            response.data_out = data_out;
            // states travel back untouched unless the handler replaced them
            response.states = request.states.clone();
            if completions.send((id, response)).is_err() {
                tracing::debug!(id, "completion dropped, computer is gone");
            }
        });

        Ok(id)
    }
}
