//! Delivery side of the asynchronous callback channel.

use edgefab_transport::RpcClient;
use edgefab_types::{CallbackAck, EdgeError, LambdaResponse};

/// Sends the final response of an orchestrated invocation back to the
/// client, one-way.
pub struct CallbackClient {
    rpc: RpcClient<LambdaResponse, CallbackAck>,
}

impl CallbackClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(endpoint),
        }
    }

    pub async fn deliver(&mut self, response: &LambdaResponse) -> Result<(), EdgeError> {
        let ack = self.rpc.call(response).await?;
        if ack.ret_code != edgefab_types::RET_CODE_OK {
            return Err(EdgeError::Remote(ack.ret_code));
        }
        Ok(())
    }
}
