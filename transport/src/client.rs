//! Typed request/response client over the framed transport.

use std::marker::PhantomData;

use edgefab_types::EdgeError;
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;

use crate::framing::FramedStream;

/// A client for one of the edge services, sending one request at a time over
/// a persistent connection. The connection is established lazily on the
/// first call and re-established after a transport error.
pub struct RpcClient<Req, Resp> {
    endpoint: String,
    stream: Option<FramedStream>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> RpcClient<Req, Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            stream: None,
            _marker: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, request: &Req) -> Result<Resp, EdgeError> {
        let result = self.try_call(request).await;
        if result.is_err() {
            // drop the connection so that the next call starts afresh
            self.stream = None;
        }
        result
    }

    async fn try_call(&mut self, request: &Req) -> Result<Resp, EdgeError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.endpoint).await.map_err(|err| {
                EdgeError::Transport(format!("cannot connect to {}: {err}", self.endpoint))
            })?;
            self.stream = Some(FramedStream::new(stream));
        }

        let stream = self.stream.as_mut().expect("connected above");
        stream.send(request).await?;
        match stream.recv().await? {
            Some(response) => Ok(response),
            None => Err(EdgeError::Transport(format!(
                "connection to {} closed by peer",
                self.endpoint
            ))),
        }
    }
}
