//! Length-delimited framing with bincode payloads over a TCP stream.

use bytes::Bytes;
use edgefab_types::EdgeError;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// A TCP stream speaking length-delimited bincode messages.
pub struct FramedStream {
    inner: Framed<TcpStream, LengthDelimitedCodec>,
}

impl FramedStream {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            inner: Framed::new(stream, LengthDelimitedCodec::new()),
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), EdgeError> {
        let payload =
            bincode::serialize(message).map_err(|err| EdgeError::Transport(err.to_string()))?;
        self.inner
            .send(Bytes::from(payload))
            .await
            .map_err(|err| EdgeError::Transport(err.to_string()))
    }

    /// Receive the next message; `None` when the peer closed the stream.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<Option<T>, EdgeError> {
        match self.inner.next().await {
            None => Ok(None),
            Some(Err(err)) => Err(EdgeError::Transport(err.to_string())),
            Some(Ok(frame)) => bincode::deserialize(&frame)
                .map(Some)
                .map_err(|err| EdgeError::Transport(err.to_string())),
        }
    }
}
