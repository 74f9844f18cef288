//! The interface shared by all the edge clients.

use async_trait::async_trait;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};

/// Anything that can execute a lambda on a remote edge server.
///
/// A `dry` invocation asks the server to only estimate the processing time,
/// without executing the function.
///
/// Transport failures surface as `Err`; a server that answered with a
/// non-OK return code surfaces as `Ok` with the response carrying the error.
#[async_trait]
pub trait EdgeClientInterface: Send {
    async fn run_lambda(
        &mut self,
        request: &LambdaRequest,
        dry: bool,
    ) -> Result<LambdaResponse, EdgeError>;
}
