//! The error type shared by the edgefab crates.

use thiserror::Error;

/// Everything that can go wrong in the dispatch and execution pipeline.
///
/// User-visible failures are ultimately rendered as a [`LambdaResponse`]
/// whose `ret_code` carries the human-readable message of the error; callers
/// must not parse the message beyond comparing it with `"OK"`.
///
/// [`LambdaResponse`]: crate::messages::LambdaResponse
#[derive(Debug, Error)]
pub enum EdgeError {
    /// Lookup of a (lambda, destination) pair that is not in a table.
    #[error("invalid combination of lambda '{lambda}' and destination '{destination}'")]
    InvalidDestination { lambda: String, destination: String },

    /// The lambda has no candidate destination at all.
    #[error("no destinations available for lambda '{0}'")]
    NoDestinations(String),

    /// The hop counter exceeded the forwarding limit.
    #[error("loop detected")]
    LoopDetected,

    /// The component is shutting down and rejects new requests.
    #[error("terminating")]
    Terminating,

    /// Any failure surfaced by the pluggable transport.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote server returned a non-OK return code.
    #[error("remote execution failed: {0}")]
    Remote(String),

    /// A chain/DAG pre-condition on the carried states was violated.
    #[error("missing state '{0}'")]
    StateMissing(String),

    /// The lambda name does not follow the `name` or `/namespace/name`
    /// convention.
    #[error("invalid lambda name '{0}'")]
    InvalidName(String),

    /// Inconsistent chain/DAG description.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Bad configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl EdgeError {
    /// The string carried in the `ret_code` field of an error response.
    pub fn ret_code(&self) -> String {
        self.to_string()
    }
}
