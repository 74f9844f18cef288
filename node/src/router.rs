//! The edge router: a lambda processor with two weight-based forwarding
//! tables, one for requests arriving from edge clients and one for
//! requests forwarded by other edge nodes.

use std::sync::Arc;

use async_trait::async_trait;
use edgefab_client::EdgeClientPool;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};

use crate::{
    controller::Controller,
    forwarding_table::{ForwardingTable, LocalOptimizer, WeightedTable},
    processor::{LambdaProcessor, ProcessorConfig, Routing},
};

/// Routing over an overall and a final-hop table. Requests from clients
/// consult the overall table, forwarded requests the final one; the
/// matching optimizer learns from every success, while a failure purges
/// the destination from both tables, since a computer that fails is
/// assumed gone.
pub struct TableRouting {
    overall: Arc<WeightedTable>,
    overall_optimizer: LocalOptimizer,
    final_hop: Arc<WeightedTable>,
    final_optimizer: LocalOptimizer,
}

impl TableRouting {
    pub fn new(overall: Arc<WeightedTable>, final_hop: Arc<WeightedTable>) -> Self {
        Self {
            overall,
            overall_optimizer: LocalOptimizer::default(),
            final_hop,
            final_optimizer: LocalOptimizer::default(),
        }
    }

    pub fn overall(&self) -> &Arc<WeightedTable> {
        &self.overall
    }

    pub fn final_hop(&self) -> &Arc<WeightedTable> {
        &self.final_hop
    }
}

#[async_trait]
impl Routing for TableRouting {
    async fn destination(
        &self,
        request: &LambdaRequest,
        _request_id: u64,
    ) -> Result<String, EdgeError> {
        if request.forward {
            self.final_hop.pick(&request.name)
        } else {
            self.overall.pick(&request.name)
        }
    }

    async fn process_success(
        &self,
        request: &LambdaRequest,
        _request_id: u64,
        destination: &str,
        _response: &LambdaResponse,
        elapsed: f64,
    ) {
        // optimization stays separate for requests coming from edge clients
        // vs other nodes
        if request.forward {
            self.final_optimizer
                .on_success(&self.final_hop, &request.name, destination, elapsed);
        } else {
            self.overall_optimizer
                .on_success(&self.overall, &request.name, destination, elapsed);
        }
    }

    async fn process_failure(
        &self,
        request: &LambdaRequest,
        _request_id: u64,
        destination: &str,
    ) {
        self.overall.remove(&request.name, destination);
        self.final_hop.remove(&request.name, destination);
    }

    fn tables(&self) -> Vec<Arc<dyn ForwardingTable>> {
        vec![self.overall.clone(), self.final_hop.clone()]
    }
}

/// An edge node forwarding lambda requests towards computers or other
/// routers.
pub type EdgeRouter = LambdaProcessor<TableRouting>;

impl EdgeRouter {
    pub fn router(
        processor_config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
    ) -> Result<(Self, Arc<WeightedTable>, Arc<WeightedTable>), EdgeError> {
        let overall = Arc::new(WeightedTable::new());
        let final_hop = Arc::new(WeightedTable::new());
        let processor = LambdaProcessor::new(
            TableRouting::new(overall.clone(), final_hop.clone()),
            processor_config,
            controller,
        )?;
        Ok((processor, overall, final_hop))
    }

    /// A router over the given pool, for testing and for alternate
    /// transports.
    pub fn router_with_pool(
        routing: TableRouting,
        processor_config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
        pool: EdgeClientPool,
    ) -> Result<Self, EdgeError> {
        LambdaProcessor::with_pool(routing, processor_config, controller, pool)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use edgefab_client::{ClientFactory, EdgeClientInterface};
    use edgefab_types::RET_CODE_OK;
    use parking_lot::Mutex;

    use super::*;
    use crate::controller::NullController;

    struct OkClient {
        contacted: Arc<Mutex<Vec<String>>>,
        endpoint: String,
    }

    #[async_trait]
    impl EdgeClientInterface for OkClient {
        async fn run_lambda(
            &mut self,
            request: &LambdaRequest,
            _dry: bool,
        ) -> Result<LambdaResponse, EdgeError> {
            self.contacted.lock().push(self.endpoint.clone());
            let mut response = LambdaResponse::ok("out");
            response.hops = request.hops;
            Ok(response)
        }
    }

    struct OkFactory {
        contacted: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ClientFactory for OkFactory {
        async fn make(
            &self,
            endpoint: &str,
        ) -> Result<Box<dyn EdgeClientInterface>, EdgeError> {
            Ok(Box::new(OkClient {
                contacted: self.contacted.clone(),
                endpoint: endpoint.to_string(),
            }))
        }
    }

    struct FailingController {
        removed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Controller for FailingController {
        async fn announce_router(&self, _lambda_endpoint: &str) {}
        async fn announce_computer(&self, _endpoint: &str, _lambdas: &[String]) {}
        async fn remove_computer(&self, _endpoint: &str) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn router_with(
        contacted: Arc<Mutex<Vec<String>>>,
        controller: Arc<dyn Controller>,
    ) -> (EdgeRouter, Arc<WeightedTable>, Arc<WeightedTable>) {
        let overall = Arc::new(WeightedTable::new());
        let final_hop = Arc::new(WeightedTable::new());
        let router = EdgeRouter::router_with_pool(
            TableRouting::new(overall.clone(), final_hop.clone()),
            &ProcessorConfig::default(),
            controller,
            EdgeClientPool::with_factory(Box::new(OkFactory { contacted }), 0),
        )
        .unwrap();
        (router, overall, final_hop)
    }

    #[tokio::test]
    async fn test_forwarded_requests_use_the_final_table() {
        let contacted = Arc::new(Mutex::new(Vec::new()));
        let (router, overall, final_hop) =
            router_with(contacted.clone(), Arc::new(NullController));

        overall.change("f", "router-1", 1.0, false);
        final_hop.change("f", "computer-1", 1.0, true);

        // from an edge client: overall table
        let response = router.process(&LambdaRequest::new("f", "x")).await;
        assert_eq!(RET_CODE_OK, response.ret_code);
        assert_eq!(vec!["router-1".to_string()], contacted.lock().clone());

        // forwarded by another node: final table
        let forwarded = LambdaRequest::new("f", "x").one_more_hop();
        let response = router.process(&forwarded).await;
        assert_eq!(RET_CODE_OK, response.ret_code);
        assert_eq!(
            vec!["router-1".to_string(), "computer-1".to_string()],
            contacted.lock().clone()
        );

        // the optimizers touched each their own table
        assert_ne!(1.0, overall.weight("f", "router-1").unwrap());
        assert_ne!(1.0, final_hop.weight("f", "computer-1").unwrap());
    }

    #[tokio::test]
    async fn test_failure_purges_both_tables_and_notifies_the_controller() {
        struct BrokenFactory;

        #[async_trait]
        impl ClientFactory for BrokenFactory {
            async fn make(
                &self,
                _endpoint: &str,
            ) -> Result<Box<dyn EdgeClientInterface>, EdgeError> {
                Err(EdgeError::Transport("down".to_string()))
            }
        }

        let removed = Arc::new(AtomicUsize::new(0));
        let overall = Arc::new(WeightedTable::new());
        let final_hop = Arc::new(WeightedTable::new());
        overall.change("f", "computer-1", 1.0, true);
        final_hop.change("f", "computer-1", 1.0, true);

        let router = EdgeRouter::router_with_pool(
            TableRouting::new(overall.clone(), final_hop.clone()),
            &ProcessorConfig::default(),
            Arc::new(FailingController {
                removed: removed.clone(),
            }),
            EdgeClientPool::with_factory(Box::new(BrokenFactory), 0),
        )
        .unwrap();

        let response = router.process(&LambdaRequest::new("f", "x")).await;
        assert!(!response.is_ok());

        // a destination failing once disappears everywhere
        assert!(overall.lambdas().is_empty());
        assert!(final_hop.lambdas().is_empty());
        assert_eq!(1, removed.load(Ordering::SeqCst));
    }
}
