//! Client of the remote state store.

use edgefab_transport::RpcClient;
use edgefab_types::{EdgeError, StateRequest, StateResponse};

/// Get/put/delete named opaque blobs on a remote state store.
pub struct StateClient {
    rpc: RpcClient<StateRequest, StateResponse>,
}

impl StateClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcClient::new(endpoint),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.rpc.endpoint()
    }

    /// Retrieve a state; `None` when the store does not have it.
    pub async fn get(&mut self, name: &str) -> Result<Option<Vec<u8>>, EdgeError> {
        let response = self.rpc.call(&StateRequest::get(name)).await?;
        if !response.is_ok() {
            tracing::debug!(
                name,
                endpoint = self.rpc.endpoint(),
                ret_code = %response.ret_code,
                "state not found"
            );
            return Ok(None);
        }
        Ok(Some(response.content))
    }

    /// Create or update a state.
    pub async fn put(&mut self, name: &str, content: Vec<u8>) -> Result<(), EdgeError> {
        let response = self.rpc.call(&StateRequest::put(name, content)).await?;
        if !response.is_ok() {
            tracing::error!(
                name,
                endpoint = self.rpc.endpoint(),
                ret_code = %response.ret_code,
                "error when updating state"
            );
        }
        Ok(())
    }

    /// Remove a state; false when the store did not have it.
    pub async fn del(&mut self, name: &str) -> Result<bool, EdgeError> {
        let response = self.rpc.call(&StateRequest::del(name)).await?;
        Ok(response.is_ok())
    }
}
