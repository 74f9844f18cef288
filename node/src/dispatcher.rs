//! The edge dispatcher: a lambda processor whose routing decisions come
//! from a single processing-time estimator.

use std::sync::Arc;

use async_trait::async_trait;
use edgefab_client::EdgeClientPool;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};

use crate::{
    controller::Controller,
    forwarding_table::ForwardingTable,
    processor::{LambdaProcessor, ProcessorConfig, Routing},
    ptime::{EstimatorOptions, PtimeEstimator},
};

/// Routing by processing-time estimation.
pub struct EstimatorRouting {
    estimator: Arc<PtimeEstimator>,
}

impl EstimatorRouting {
    pub fn new(estimator: Arc<PtimeEstimator>) -> Self {
        Self { estimator }
    }

    pub fn estimator(&self) -> &Arc<PtimeEstimator> {
        &self.estimator
    }
}

#[async_trait]
impl Routing for EstimatorRouting {
    async fn destination(
        &self,
        request: &LambdaRequest,
        request_id: u64,
    ) -> Result<String, EdgeError> {
        self.estimator.destination(request, request_id).await
    }

    async fn process_success(
        &self,
        request: &LambdaRequest,
        request_id: u64,
        destination: &str,
        response: &LambdaResponse,
        elapsed: f64,
    ) {
        self.estimator
            .process_success(request, request_id, destination, response, elapsed);
    }

    async fn process_failure(&self, request: &LambdaRequest, request_id: u64, destination: &str) {
        self.estimator.process_failure(request, request_id, destination);
    }

    fn tables(&self) -> Vec<Arc<dyn ForwardingTable>> {
        vec![self.estimator.clone()]
    }
}

/// An application dispatching lambda requests from edge clients towards
/// edge computers, with a single forwarding table.
pub type EdgeDispatcher = LambdaProcessor<EstimatorRouting>;

impl EdgeDispatcher {
    pub fn dispatcher(
        estimator_options: &EstimatorOptions,
        processor_config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
    ) -> Result<(Self, Arc<PtimeEstimator>), EdgeError> {
        let estimator = Arc::new(PtimeEstimator::new(estimator_options)?);
        let processor = LambdaProcessor::new(
            EstimatorRouting::new(estimator.clone()),
            processor_config,
            controller,
        )?;
        Ok((processor, estimator))
    }

    /// A dispatcher over the given pools, for testing and for alternate
    /// transports.
    pub fn dispatcher_with_pool(
        estimator: Arc<PtimeEstimator>,
        processor_config: &ProcessorConfig,
        controller: Arc<dyn Controller>,
        pool: EdgeClientPool,
    ) -> Result<Self, EdgeError> {
        LambdaProcessor::with_pool(
            EstimatorRouting::new(estimator),
            processor_config,
            controller,
            pool,
        )
    }
}
