//! A pool of reusable edge clients, keyed on the destination endpoint, with
//! a configurable cap on the concurrent clients per destination.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use async_trait::async_trait;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{edge_client::EdgeClient, interface::EdgeClientInterface};

/// Builds a new client towards a destination, on demand.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn make(&self, endpoint: &str) -> Result<Box<dyn EdgeClientInterface>, EdgeError>;
}

/// The default factory: single-destination clients over the framed
/// transport. The pool never produces multi-destination clients.
pub struct TransportClientFactory;

#[async_trait]
impl ClientFactory for TransportClientFactory {
    async fn make(&self, endpoint: &str) -> Result<Box<dyn EdgeClientInterface>, EdgeError> {
        Ok(Box::new(EdgeClient::new(endpoint)))
    }
}

#[derive(Default)]
struct Destination {
    /// Present only when the pool is bounded.
    limiter: Option<Arc<Semaphore>>,
    free: Mutex<Vec<Box<dyn EdgeClientInterface>>>,
    busy: AtomicUsize,
    created: AtomicUsize,
}

/// For each destination the pool keeps a free list of idle clients; an
/// invocation reuses an idle client or creates a new one, waiting when
/// `max_clients` of them are already busy. A `max_clients` of zero leaves
/// the pool unbounded.
pub struct EdgeClientPool {
    factory: Box<dyn ClientFactory>,
    max_clients: usize,
    destinations: Mutex<HashMap<String, Arc<Destination>>>,
}

impl EdgeClientPool {
    pub fn new(max_clients: usize) -> Self {
        Self::with_factory(Box::new(TransportClientFactory), max_clients)
    }

    pub fn with_factory(factory: Box<dyn ClientFactory>, max_clients: usize) -> Self {
        Self {
            factory,
            max_clients,
            destinations: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a lambda on the given destination with one more hop, using a
    /// pooled client for the exact span of the invocation.
    ///
    /// Returns the response and the elapsed wall-clock time in seconds.
    pub async fn invoke(
        &self,
        destination: &str,
        request: &LambdaRequest,
        dry: bool,
    ) -> Result<(LambdaResponse, f64), EdgeError> {
        let state = self.destination(destination);

        let _permit: Option<OwnedSemaphorePermit> = match &state.limiter {
            Some(limiter) => Some(
                limiter
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| EdgeError::Terminating)?,
            ),
            None => None,
        };

        let pooled = state.free.lock().pop();
        let mut client = match pooled {
            Some(client) => client,
            None => {
                let client = self.factory.make(destination).await?;
                state.created.fetch_add(1, Ordering::Relaxed);
                client
            },
        };
        state.busy.fetch_add(1, Ordering::Relaxed);

        let chrono = Instant::now();
        let outbound = request.one_more_hop();
        let result = client.run_lambda(&outbound, dry).await;
        let elapsed = chrono.elapsed().as_secs_f64();

        // the client goes back to the free list on every exit path
        state.free.lock().push(client);
        state.busy.fetch_sub(1, Ordering::Relaxed);

        let mut response = result?;
        // if the response does not carry the actual responder, it is the
        // destination itself
        if response.responder.is_empty() {
            response.responder = destination.to_string();
        }
        Ok((response, elapsed))
    }

    pub fn busy(&self, destination: &str) -> usize {
        self.destination(destination).busy.load(Ordering::Relaxed)
    }

    pub fn free(&self, destination: &str) -> usize {
        self.destination(destination).free.lock().len()
    }

    /// Total number of clients ever created towards a destination.
    pub fn created(&self, destination: &str) -> usize {
        self.destination(destination)
            .created
            .load(Ordering::Relaxed)
    }

    fn destination(&self, endpoint: &str) -> Arc<Destination> {
        let mut guard = self.destinations.lock();
        guard
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(Destination {
                    limiter: (self.max_clients > 0)
                        .then(|| Arc::new(Semaphore::new(self.max_clients))),
                    ..Destination::default()
                })
            })
            .clone()
    }
}
