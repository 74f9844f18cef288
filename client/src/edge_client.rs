//! The plain single-destination edge client.

use async_trait::async_trait;
use edgefab_transport::RpcClient;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};

use crate::interface::EdgeClientInterface;

/// An edge client bound to a single destination over the framed transport.
pub struct EdgeClient {
    rpc: RpcClient<LambdaRequest, LambdaResponse>,
}

impl EdgeClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(endpoint),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.rpc.endpoint()
    }
}

#[async_trait]
impl EdgeClientInterface for EdgeClient {
    async fn run_lambda(
        &mut self,
        request: &LambdaRequest,
        dry: bool,
    ) -> Result<LambdaResponse, EdgeError> {
        let mut outbound = request.clone();
        outbound.dry = dry;
        self.rpc.call(&outbound).await
    }
}
