//! An edge client that races a lambda request towards multiple
//! destinations and returns the first successful reply.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};
use rand::Rng;
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{
    edge_client::EdgeClient,
    interface::EdgeClientInterface,
    pool::ClientFactory,
};

/// Command to an executor: the pending request and the dry flag. `None`
/// tells the executor to terminate.
type MessageIn = Option<(Arc<LambdaRequest>, bool)>;

/// Reply from an executor. An empty response signals a transport error on
/// that destination.
struct MessageOut {
    index: usize,
    response: Option<LambdaResponse>,
}

struct Desc {
    endpoint: String,
    queue_in: UnboundedSender<MessageIn>,
    executor: Option<JoinHandle<()>>,
}

/// An edge client with multiple possible destinations.
///
/// The client spawns one executor task per destination plus one consumer.
/// Every [`run_lambda`] contacts the *primary* destination and, with the
/// configured persistence probability, each of the others independently. It
/// returns as soon as the first OK response arrives; the consumer then
/// drains the stragglers in the background, and the *next* call blocks
/// until the drain is over. The fastest OK responder becomes the new
/// primary.
///
/// Failed destinations are not removed from the set.
///
/// [`run_lambda`]: EdgeClientInterface::run_lambda
pub struct EdgeClientMulti {
    persistence_prob: f64,
    desc: Vec<Desc>,
    consumer: Option<JoinHandle<()>>,
    consumer_queue: UnboundedSender<BTreeSet<usize>>,
    calling_tx: UnboundedSender<bool>,
    calling_rx: UnboundedReceiver<bool>,
    /// Shared with the consumer; by construction the two never hold it at
    /// the same time, because the calling gate serializes them.
    queue_out: Arc<tokio::sync::Mutex<UnboundedReceiver<MessageOut>>>,
    primary: usize,
}

impl EdgeClientMulti {
    /// Create a multi-client over the framed transport.
    pub fn new(
        endpoints: BTreeSet<String>,
        persistence_prob: f64,
    ) -> Result<Self, EdgeError> {
        Self::build(endpoints, persistence_prob, |endpoint| {
            Box::new(EdgeClient::new(endpoint))
        })
    }

    /// Create a multi-client whose per-destination clients come from the
    /// given factory.
    pub async fn with_factory(
        endpoints: BTreeSet<String>,
        persistence_prob: f64,
        factory: &dyn ClientFactory,
    ) -> Result<Self, EdgeError> {
        let mut clients = HashMap::new();
        for endpoint in &endpoints {
            clients.insert(endpoint.clone(), factory.make(endpoint).await?);
        }
        Self::build(endpoints, persistence_prob, move |endpoint| {
            clients.remove(endpoint).expect("one client per endpoint")
        })
    }

    fn build(
        endpoints: BTreeSet<String>,
        persistence_prob: f64,
        mut make_client: impl FnMut(&str) -> Box<dyn EdgeClientInterface>,
    ) -> Result<Self, EdgeError> {
        if !(0.0..=1.0).contains(&persistence_prob) {
            return Err(EdgeError::InvalidConfiguration(format!(
                "persistence probability ({persistence_prob}) cannot be < 0 or > 1"
            )));
        }
        if endpoints.is_empty() {
            return Err(EdgeError::InvalidConfiguration(
                "empty set of destinations".to_string(),
            ));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<MessageOut>();
        let queue_out = Arc::new(tokio::sync::Mutex::new(out_rx));

        // start the executors
        let mut desc = Vec::with_capacity(endpoints.len());
        for (index, endpoint) in endpoints.iter().enumerate() {
            let (in_tx, in_rx) = mpsc::unbounded_channel::<MessageIn>();
            let client = make_client(endpoint);
            let executor =
                tokio::spawn(Self::exec_lambda(index, client, in_rx, out_tx.clone()));
            desc.push(Desc {
                endpoint: endpoint.clone(),
                queue_in: in_tx,
                executor: Some(executor),
            });
        }

        // start the consumer
        let (consumer_tx, consumer_rx) = mpsc::unbounded_channel::<BTreeSet<usize>>();
        let (calling_tx, calling_rx) = mpsc::unbounded_channel::<bool>();
        let endpoints_by_index: Vec<String> =
            desc.iter().map(|d| d.endpoint.clone()).collect();
        let consumer = tokio::spawn(Self::consume(
            consumer_rx,
            queue_out.clone(),
            calling_tx.clone(),
            endpoints_by_index,
        ));

        // unblock the calling task upon the first lambda call
        calling_tx.send(true).expect("the receiver is held by self");

        tracing::info!(
            endpoints = ?endpoints,
            persistence_prob,
            "starting an edge multi-client"
        );

        Ok(Self {
            persistence_prob,
            desc,
            consumer: Some(consumer),
            consumer_queue: consumer_tx,
            calling_tx,
            calling_rx,
            queue_out,
            primary: 0,
        })
    }

    /// Terminate the executors and the consumer, and wait for them.
    pub async fn stop(&mut self) {
        let _ = self.consumer_queue.send(BTreeSet::new());
        let _ = self.calling_tx.send(false);
        for desc in &self.desc {
            let _ = desc.queue_in.send(None);
        }

        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.await;
        }
        for desc in &mut self.desc {
            if let Some(executor) = desc.executor.take() {
                let _ = executor.await;
            }
        }
    }

    /// Index of the current primary destination.
    pub fn primary(&self) -> usize {
        self.primary
    }

    /// Executor body: wait for a request, execute it on the owned client,
    /// push the outcome. Transport errors become empty responses so that a
    /// failed destination never stalls the gather loop.
    async fn exec_lambda(
        index: usize,
        mut client: Box<dyn EdgeClientInterface>,
        mut queue_in: UnboundedReceiver<MessageIn>,
        queue_out: UnboundedSender<MessageOut>,
    ) {
        while let Some(message) = queue_in.recv().await {
            let Some((request, dry)) = message else {
                break;
            };
            let response = match client.run_lambda(&request, dry).await {
                Ok(response) => Some(response),
                Err(err) => {
                    tracing::debug!(index, %err, "lambda execution failed");
                    None
                },
            };
            if queue_out.send(MessageOut { index, response }).is_err() {
                break;
            }
        }
    }

    /// Consumer body: wait for the still-pending stragglers of the previous
    /// call to return, then reopen the calling gate. An empty pending set
    /// tells the consumer to terminate.
    async fn consume(
        mut commands: UnboundedReceiver<BTreeSet<usize>>,
        queue_out: Arc<tokio::sync::Mutex<UnboundedReceiver<MessageOut>>>,
        calling_tx: UnboundedSender<bool>,
        endpoints: Vec<String>,
    ) {
        while let Some(mut pending) = commands.recv().await {
            if pending.is_empty() {
                break;
            }

            let mut queue = queue_out.lock().await;
            while !pending.is_empty() {
                let Some(message) = queue.recv().await else {
                    break;
                };
                if let Some(response) = &message.response {
                    tracing::trace!(
                        endpoint = %endpoints[message.index],
                        %response,
                        "non-fastest executor replied"
                    );
                }
                pending.remove(&message.index);
            }
            drop(queue);

            // unblock the calling task when done
            if calling_tx.send(true).is_err() {
                break;
            }
        }
    }

    /// The set of destinations to reach in addition to the primary: each
    /// non-primary is included independently with the persistence
    /// probability.
    fn secondary(&self) -> BTreeSet<usize> {
        let mut rng = rand::thread_rng();
        (0..self.desc.len())
            .filter(|&i| i != self.primary && rng.gen::<f64>() < self.persistence_prob)
            .collect()
    }
}

#[async_trait]
impl EdgeClientInterface for EdgeClientMulti {
    async fn run_lambda(
        &mut self,
        request: &LambdaRequest,
        dry: bool,
    ) -> Result<LambdaResponse, EdgeError> {
        // wait until the consumer is done with the previous call
        match self.calling_rx.recv().await {
            Some(true) => {},
            _ => return Err(EdgeError::Terminating),
        }

        // the selected destinations: secondaries plus the primary
        let mut pending = self.secondary();
        pending.insert(self.primary);

        // the request must survive this call while executors still use it
        let request = Arc::new(request.clone());
        for &index in &pending {
            let _ = self.desc[index].queue_in.send(Some((request.clone(), dry)));
        }

        // wait for the fastest OK response
        let mut fastest: Option<MessageOut> = None;
        {
            let mut queue = self.queue_out.lock().await;
            while !pending.is_empty() {
                let Some(message) = queue.recv().await else {
                    break;
                };
                debug_assert!(pending.contains(&message.index));
                pending.remove(&message.index);
                let won = matches!(&message.response, Some(r) if r.is_ok());
                fastest = Some(message);
                if won {
                    break;
                }
            }
        }

        let Some(MessageOut { index, response }) = fastest else {
            let _ = self.calling_tx.send(true);
            return Err(EdgeError::Terminating);
        };

        // none of the destinations worked out: the gate must be reopened
        // before surfacing the failure
        let Some(mut response) = response else {
            debug_assert!(pending.is_empty());
            let _ = self.calling_tx.send(true);
            return Ok(LambdaResponse::error(
                "none of the destinations responded correctly",
            ));
        };

        // only non-OK responses
        if !response.is_ok() {
            debug_assert!(pending.is_empty());
            let _ = self.calling_tx.send(true);
            return Ok(response);
        }

        response.responder = self.desc[index].endpoint.clone();

        // hand the stragglers to the consumer, or reopen the gate right away
        if pending.is_empty() {
            let _ = self.calling_tx.send(true);
        } else {
            let _ = self.consumer_queue.send(pending);
        }

        // the fastest executor becomes the new primary
        self.primary = index;

        tracing::trace!(
            endpoint = %self.desc[index].endpoint,
            %response,
            "fastest executor replied"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::{Duration, Instant},
    };

    use edgefab_types::RET_CODE_OK;
    use parking_lot::Mutex;
    use tokio::time::sleep;

    use super::*;

    /// What a mock destination does when contacted.
    #[derive(Clone)]
    enum Behaviour {
        Ok { delay: Duration },
        NonOk,
        TransportError,
    }

    struct MockClient {
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EdgeClientInterface for MockClient {
        async fn run_lambda(
            &mut self,
            request: &LambdaRequest,
            _dry: bool,
        ) -> Result<LambdaResponse, EdgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Ok { delay } => {
                    sleep(*delay).await;
                    Ok(LambdaResponse::ok(format!("out-{}", request.input)))
                },
                Behaviour::NonOk => Ok(LambdaResponse::error("simulated failure")),
                Behaviour::TransportError => {
                    Err(EdgeError::Transport("simulated outage".to_string()))
                },
            }
        }
    }

    /// A factory handing out mocks by endpoint, recording per-endpoint call
    /// counters.
    struct MockFactory {
        behaviours: Mutex<HashMap<String, Behaviour>>,
        calls: Mutex<HashMap<String, Arc<AtomicUsize>>>,
    }

    impl MockFactory {
        fn new(behaviours: impl IntoIterator<Item = (&'static str, Behaviour)>) -> Self {
            Self {
                behaviours: Mutex::new(
                    behaviours
                        .into_iter()
                        .map(|(e, b)| (e.to_string(), b))
                        .collect(),
                ),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls(&self, endpoint: &str) -> usize {
            self.calls
                .lock()
                .get(endpoint)
                .map(|c| c.load(Ordering::SeqCst))
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl ClientFactory for MockFactory {
        async fn make(
            &self,
            endpoint: &str,
        ) -> Result<Box<dyn EdgeClientInterface>, EdgeError> {
            let behaviour = self
                .behaviours
                .lock()
                .get(endpoint)
                .cloned()
                .expect("unknown endpoint");
            let calls = Arc::new(AtomicUsize::new(0));
            self.calls.lock().insert(endpoint.to_string(), calls.clone());
            Ok(Box::new(MockClient { behaviour, calls }))
        }
    }

    fn endpoints(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_invalid_configuration() {
        assert!(EdgeClientMulti::new(endpoints(&["a"]), -0.1).is_err());
        assert!(EdgeClientMulti::new(endpoints(&["a"]), 1.1).is_err());
        assert!(EdgeClientMulti::new(BTreeSet::new(), 0.5).is_err());
    }

    #[tokio::test]
    async fn test_persistence_zero_contacts_only_the_primary() {
        let factory = MockFactory::new([
            ("a", Behaviour::Ok { delay: Duration::ZERO }),
            ("b", Behaviour::Ok { delay: Duration::ZERO }),
            ("c", Behaviour::Ok { delay: Duration::ZERO }),
        ]);
        let mut client =
            EdgeClientMulti::with_factory(endpoints(&["a", "b", "c"]), 0.0, &factory)
                .await
                .unwrap();

        for _ in 0..5 {
            let response = client
                .run_lambda(&LambdaRequest::new("f", "x"), false)
                .await
                .unwrap();
            assert_eq!(RET_CODE_OK, response.ret_code);
            assert_eq!("a", response.responder);
        }
        client.stop().await;

        assert_eq!(5, factory.calls("a"));
        assert_eq!(0, factory.calls("b"));
        assert_eq!(0, factory.calls("c"));
    }

    #[tokio::test]
    async fn test_persistence_one_contacts_everyone() {
        let factory = MockFactory::new([
            ("a", Behaviour::Ok { delay: Duration::from_millis(5) }),
            ("b", Behaviour::Ok { delay: Duration::from_millis(30) }),
            ("c", Behaviour::Ok { delay: Duration::from_millis(60) }),
        ]);
        let mut client =
            EdgeClientMulti::with_factory(endpoints(&["a", "b", "c"]), 1.0, &factory)
                .await
                .unwrap();

        let response = client
            .run_lambda(&LambdaRequest::new("f", "x"), false)
            .await
            .unwrap();
        assert_eq!("a", response.responder);
        assert_eq!(0, client.primary());

        // the next call blocks until the stragglers of the first are
        // drained, then contacts everybody again
        let chrono = Instant::now();
        let response = client
            .run_lambda(&LambdaRequest::new("f", "y"), false)
            .await
            .unwrap();
        assert_eq!("a", response.responder);
        assert!(chrono.elapsed() >= Duration::from_millis(30));
        client.stop().await;

        assert_eq!(2, factory.calls("a"));
        assert_eq!(2, factory.calls("b"));
        assert_eq!(2, factory.calls("c"));
    }

    #[tokio::test]
    async fn test_fastest_becomes_primary() {
        let factory = MockFactory::new([
            ("a", Behaviour::Ok { delay: Duration::from_millis(50) }),
            ("b", Behaviour::Ok { delay: Duration::from_millis(5) }),
        ]);
        let mut client =
            EdgeClientMulti::with_factory(endpoints(&["a", "b"]), 1.0, &factory)
                .await
                .unwrap();

        assert_eq!(0, client.primary());
        let response = client
            .run_lambda(&LambdaRequest::new("f", "x"), false)
            .await
            .unwrap();
        assert_eq!("b", response.responder);
        assert_eq!(1, client.primary());
        client.stop().await;
    }

    #[tokio::test]
    async fn test_all_failures_yield_aggregate_error_and_release_the_gate() {
        let factory = MockFactory::new([
            ("a", Behaviour::TransportError),
            ("b", Behaviour::TransportError),
        ]);
        let mut client =
            EdgeClientMulti::with_factory(endpoints(&["a", "b"]), 1.0, &factory)
                .await
                .unwrap();

        for _ in 0..3 {
            // the gate must reopen after every failed call
            let response = client
                .run_lambda(&LambdaRequest::new("f", "x"), false)
                .await
                .unwrap();
            assert!(!response.is_ok());
        }
        client.stop().await;
    }

    #[tokio::test]
    async fn test_non_ok_response_is_returned_verbatim() {
        let factory = MockFactory::new([("a", Behaviour::NonOk)]);
        let mut client = EdgeClientMulti::with_factory(endpoints(&["a"]), 0.0, &factory)
            .await
            .unwrap();

        let response = client
            .run_lambda(&LambdaRequest::new("f", "x"), false)
            .await
            .unwrap();
        assert_eq!("simulated failure", response.ret_code);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_terminating() {
        let factory =
            MockFactory::new([("a", Behaviour::Ok { delay: Duration::ZERO })]);
        let mut client = EdgeClientMulti::with_factory(endpoints(&["a"]), 0.0, &factory)
            .await
            .unwrap();
        client.stop().await;

        let result = client.run_lambda(&LambdaRequest::new("f", "x"), false).await;
        assert!(matches!(result, Err(EdgeError::Terminating)));
    }
}
