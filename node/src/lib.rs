//! Edge-node components of the edgefab workspace: the destination table and
//! the estimator family, the lambda processor with its dispatcher and
//! router specializations, the edge computer with its local compute
//! simulator and HTTP FaaS backend, the edge-side chain/DAG orchestrator,
//! and the ancillary state and callback services.

pub mod computer;
mod controller;
mod destination_table;
mod dispatcher;
mod forwarding_table;
mod linear;
mod processor;
pub mod ptime;
mod router;
mod rtt_estimator;
mod state_server;
mod util_estimator;

pub use computer::{CallbackClient, ComputeBackend, Computer, EdgeComputer, HttpComputer, Workload};
pub use controller::{Controller, NullController};
pub use destination_table::DestinationTable;
pub use dispatcher::{EdgeDispatcher, EstimatorRouting};
pub use forwarding_table::{ForwardingTable, LocalOptimizer, WeightedTable};
pub use linear::LinearEstimator;
pub use processor::{LambdaProcessor, ProcessorConfig, Routing};
pub use ptime::{EstimatorKind, EstimatorOptions, PtimeEstimator};
pub use router::{EdgeRouter, TableRouting};
pub use rtt_estimator::RttEstimator;
pub use state_server::StateServer;
pub use util_estimator::UtilEstimator;

use edgefab_types::EdgeError;

/// Parse a `lambda,endpoint[,final]` destination entry from the CLI.
pub fn parse_destination(entry: &str) -> Result<(String, String, bool), EdgeError> {
    let parts: Vec<&str> = entry.split(',').collect();
    match parts.as_slice() {
        [lambda, endpoint] => Ok((lambda.to_string(), endpoint.to_string(), false)),
        [lambda, endpoint, "final"] => Ok((lambda.to_string(), endpoint.to_string(), true)),
        _ => Err(EdgeError::InvalidConfiguration(format!(
            "invalid destination entry '{entry}', expected lambda,endpoint[,final]"
        ))),
    }
}
