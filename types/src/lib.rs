//! Core data model of the edgefab workspace: the lambda request/response
//! messages exchanged at the edge boundary, the chain/DAG/state model for
//! composed invocations, the lambda naming convention, and the error type
//! shared by all the other crates.

pub mod error;
pub mod messages;
pub mod model;
pub mod name;

pub use error::EdgeError;
pub use messages::{
    CallbackAck, LambdaRequest, LambdaResponse, StateOp, StateRef, StateRequest, StateResponse,
    RET_CODE_OK,
};
pub use model::{Chain, Dag, States};
