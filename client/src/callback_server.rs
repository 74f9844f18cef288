//! Receiving side of the asynchronous callback channel. Edge nodes deliver
//! the final response of a chain/DAG invocation here, one-way.

use std::sync::Arc;

use async_trait::async_trait;
use edgefab_transport::{Server, Service};
use edgefab_types::{CallbackAck, EdgeError, LambdaResponse};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct CallbackService {
    queue: UnboundedSender<LambdaResponse>,
}

#[async_trait]
impl Service for CallbackService {
    type Request = LambdaResponse;
    type Response = CallbackAck;

    async fn call(&self, response: LambdaResponse) -> CallbackAck {
        if self.queue.send(response).is_err() {
            tracing::warn!("callback receiver gone, response dropped");
        }
        CallbackAck::ok()
    }
}

/// Listens for callback deliveries and queues them for the client.
pub struct CallbackServer {
    server: Server,
    queue: UnboundedReceiver<LambdaResponse>,
}

impl CallbackServer {
    pub async fn bind(endpoint: &str) -> Result<Self, EdgeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let server = Server::bind(endpoint, Arc::new(CallbackService { queue: tx })).await?;
        Ok(Self { server, queue: rx })
    }

    /// The endpoint to advertise in the `callback` field of requests.
    pub fn endpoint(&self) -> String {
        self.server.endpoint()
    }

    /// Wait for the next asynchronously delivered response.
    pub async fn recv(&mut self) -> Option<LambdaResponse> {
        self.queue.recv().await
    }
}
