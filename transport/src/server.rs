//! Generic accept loop for the edge services: one task per connection, each
//! reading framed requests and writing back the handler's responses.

use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use edgefab_types::EdgeError;
use serde::{de::DeserializeOwned, Serialize};
use tokio::{net::TcpListener, task::JoinHandle};

use crate::framing::FramedStream;

/// A request handler behind a listening socket.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    type Request: DeserializeOwned + Send;
    type Response: Serialize + Send + Sync;

    async fn call(&self, request: Self::Request) -> Self::Response;
}

/// A running server. Dropping it stops accepting new connections; in-flight
/// connections terminate when their peers disconnect.
pub struct Server {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

impl Server {
    /// Bind to the given endpoint and serve until dropped.
    pub async fn bind<S: Service>(endpoint: &str, service: Arc<S>) -> Result<Self, EdgeError> {
        let listener = TcpListener::bind(endpoint).await.map_err(|err| {
            EdgeError::Transport(format!("cannot listen on {endpoint}: {err}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| EdgeError::Transport(err.to_string()))?;
        tracing::info!(%local_addr, "server listening");

        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        tracing::debug!(%peer, "accepted connection");
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(err) = serve_connection(stream, service).await {
                                tracing::debug!(%peer, %err, "connection terminated");
                            }
                        });
                    },
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                    },
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_loop,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The endpoint clients should connect to.
    pub fn endpoint(&self) -> String {
        self.local_addr.to_string()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve_connection<S: Service>(
    stream: tokio::net::TcpStream,
    service: Arc<S>,
) -> Result<(), EdgeError> {
    let mut stream = FramedStream::new(stream);
    while let Some(request) = stream.recv::<S::Request>().await? {
        let response = service.call(request).await;
        stream.send(&response).await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use edgefab_utils::test_utils::setup_test;

    use super::*;
    use crate::client::RpcClient;

    struct Echo;

    #[async_trait]
    impl Service for Echo {
        type Request = String;
        type Response = String;

        async fn call(&self, request: String) -> String {
            format!("echo: {request}")
        }
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        setup_test();
        let server = Server::bind("127.0.0.1:0", Arc::new(Echo)).await.unwrap();

        let mut client: RpcClient<String, String> = RpcClient::new(server.endpoint());
        for i in 0..3 {
            let response = client.call(&format!("hello {i}")).await.unwrap();
            assert_eq!(format!("echo: hello {i}"), response);
        }
    }

    #[tokio::test]
    async fn test_multiple_clients() {
        setup_test();
        let server = Server::bind("127.0.0.1:0", Arc::new(Echo)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..4 {
            let endpoint = server.endpoint();
            tasks.push(tokio::spawn(async move {
                let mut client: RpcClient<String, String> = RpcClient::new(endpoint);
                client.call(&format!("{i}")).await.unwrap()
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(format!("echo: {i}"), task.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_connect_error() {
        setup_test();
        // a port that nobody listens on
        let port = portpicker::pick_unused_port().unwrap();
        let mut client: RpcClient<String, String> =
            RpcClient::new(format!("127.0.0.1:{port}"));
        assert!(client.call(&"x".to_string()).await.is_err());
    }
}
