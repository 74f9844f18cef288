//! Seam towards the edge controller, the external entity that keeps the
//! global view of routers and computers. Failures reaching the controller
//! are logged and never propagated to the request path.

use async_trait::async_trait;

/// Commands an edge node may issue towards the controller.
#[async_trait]
pub trait Controller: Send + Sync {
    /// Announce a router serving lambda requests at the given endpoint.
    async fn announce_router(&self, lambda_endpoint: &str);

    /// Announce a computer and the lambdas it serves.
    async fn announce_computer(&self, endpoint: &str, lambdas: &[String]);

    /// Ask to drop a computer everywhere, typically after a failure.
    async fn remove_computer(&self, endpoint: &str);
}

/// Used when no controller endpoint is configured: announce disabled.
pub struct NullController;

#[async_trait]
impl Controller for NullController {
    async fn announce_router(&self, _lambda_endpoint: &str) {}

    async fn announce_computer(&self, _endpoint: &str, _lambdas: &[String]) {}

    async fn remove_computer(&self, _endpoint: &str) {}
}
