//! The payload schema exchanged at the edge boundary: lambda requests and
//! responses, the state store messages, and the one-way callback ack. The
//! concrete wire format is left to the transport crate; only the schema is
//! normative here.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::model::{Chain, Dag};

/// Return code of a successful operation. Any other value is a
/// human-readable error message.
pub const RET_CODE_OK: &str = "OK";

/// A named application state carried with a request, either inline or as a
/// pointer into a remote state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateRef {
    /// The state content travels with the request.
    Embedded(Vec<u8>),
    /// The state lives in a state store at the given endpoint.
    Remote(String),
}

impl StateRef {
    pub fn is_embedded(&self) -> bool {
        matches!(self, StateRef::Embedded(_))
    }
}

/// A request to execute a named lambda.
///
/// Requests are immutable after construction: forwarding uses the
/// copy-with-increment [`LambdaRequest::one_more_hop`], orchestration
/// injects states into a clone before sending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LambdaRequest {
    /// Lambda function name, `name` or `/namespace/name`.
    pub name: String,
    /// Function input (text).
    pub input: String,
    /// Function input (opaque data).
    pub data_in: Vec<u8>,
    /// True when the request was forwarded by another edge node, false when
    /// it comes straight from an edge client.
    pub forward: bool,
    /// Incremented on every forward, used for loop detection.
    pub hops: u32,
    /// When set the server must only estimate the processing time, without
    /// executing the function.
    pub dry: bool,
    /// End-point to receive the final response asynchronously.
    pub callback: Option<String>,
    /// Function chain descriptor, for composed invocations.
    pub chain: Option<Chain>,
    /// Function DAG descriptor, alternative to `chain`.
    pub dag: Option<Dag>,
    /// Index of the next function to execute within `chain`.
    pub next_function_index: u32,
    /// The application states required by the function(s), by name.
    pub states: BTreeMap<String, StateRef>,
}

impl LambdaRequest {
    /// A plain request from an edge client, with text input only.
    pub fn new(name: impl Into<String>, input: impl Into<String>) -> Self {
        Self::with_data(name, input, Vec::new())
    }

    /// A plain request from an edge client, with text and data input.
    pub fn with_data(
        name: impl Into<String>,
        input: impl Into<String>,
        data_in: Vec<u8>,
    ) -> Self {
        Self {
            name: name.into(),
            input: input.into(),
            data_in,
            forward: false,
            hops: 0,
            dry: false,
            callback: None,
            chain: None,
            dag: None,
            next_function_index: 0,
            states: BTreeMap::new(),
        }
    }

    /// An identical request with one more hop, marked as forwarded. This is
    /// what actually leaves an edge node towards the next destination.
    pub fn one_more_hop(&self) -> Self {
        let mut ret = self.clone();
        ret.hops += 1;
        ret.forward = true;
        ret
    }

    /// The input size used by the estimators: the larger of the text and
    /// data inputs.
    pub fn input_size(&self) -> usize {
        self.input.len().max(self.data_in.len())
    }
}

impl fmt::Display for LambdaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name: {}, from {}, hops: {}, input: {}, datain size: {}",
            self.name,
            if self.forward {
                "edge node"
            } else {
                "edge client"
            },
            self.hops,
            self.input,
            self.data_in.len()
        )
    }
}

/// The reply to a [`LambdaRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LambdaResponse {
    /// `"OK"` on success, a human-readable error otherwise.
    pub ret_code: String,
    /// Function output (text).
    pub output: String,
    /// End-point of the server that actually executed the lambda, filled by
    /// the processor on success.
    pub responder: String,
    /// Server-side execution time, in milliseconds, excluding transport.
    pub ptime_msec: u32,
    /// Function output (opaque data).
    pub data_out: Vec<u8>,
    /// CPU load averaged over the last second, clamped to [0, 99].
    pub load1: u16,
    /// CPU load averaged over the last 10 seconds, clamped to [0, 99].
    pub load10: u16,
    /// CPU load averaged over the last 30 seconds, clamped to [0, 99].
    pub load30: u16,
    /// Hop counter of the request, plus one.
    pub hops: u32,
    /// True when this reply is only an ack and the real payload will arrive
    /// through the callback channel.
    pub asynchronous: bool,
    /// The application states updated by the function(s).
    pub states: BTreeMap<String, StateRef>,
}

impl LambdaResponse {
    pub fn ok(output: impl Into<String>) -> Self {
        Self::with_loads(RET_CODE_OK, output, [0.0, 0.0, 0.0])
    }

    pub fn error(ret_code: impl Into<String>) -> Self {
        Self::with_loads(ret_code, "", [0.0, 0.0, 0.0])
    }

    /// Build a response with the given load snapshot, each value a fraction
    /// of the CPU capacity in [0, 1].
    pub fn with_loads(
        ret_code: impl Into<String>,
        output: impl Into<String>,
        loads: [f64; 3],
    ) -> Self {
        let clamp = |l: f64| ((l * 100.0 + 0.5) as u16).min(99);
        Self {
            ret_code: ret_code.into(),
            output: output.into(),
            responder: String::new(),
            ptime_msec: 0,
            data_out: Vec::new(),
            load1: clamp(loads[0]),
            load10: clamp(loads[1]),
            load30: clamp(loads[2]),
            hops: 0,
            asynchronous: false,
            states: BTreeMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ret_code == RET_CODE_OK
    }

    pub fn processing_time_seconds(&self) -> f64 {
        f64::from(self.ptime_msec) * 1e-3
    }
}

impl fmt::Display for LambdaResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "retcode: {}, from: {}, ptime: {} ms, hops: {}, load: {}/{}/{}, output: {}, dataout size: {}",
            self.ret_code,
            self.responder,
            self.ptime_msec,
            self.hops,
            self.load1,
            self.load10,
            self.load30,
            self.output,
            self.data_out.len()
        )
    }
}

/// Operations of the state store service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOp {
    Get,
    Put,
    Del,
}

/// A request to the state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequest {
    pub op: StateOp,
    pub name: String,
    /// Only meaningful for `Put`.
    pub content: Vec<u8>,
}

impl StateRequest {
    pub fn get(name: impl Into<String>) -> Self {
        Self {
            op: StateOp::Get,
            name: name.into(),
            content: Vec::new(),
        }
    }

    pub fn put(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            op: StateOp::Put,
            name: name.into(),
            content,
        }
    }

    pub fn del(name: impl Into<String>) -> Self {
        Self {
            op: StateOp::Del,
            name: name.into(),
            content: Vec::new(),
        }
    }
}

/// The reply of the state store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateResponse {
    pub ret_code: String,
    pub content: Vec<u8>,
}

impl StateResponse {
    pub fn ok(content: Vec<u8>) -> Self {
        Self {
            ret_code: RET_CODE_OK.to_string(),
            content,
        }
    }

    pub fn error(ret_code: impl Into<String>) -> Self {
        Self {
            ret_code: ret_code.into(),
            content: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.ret_code == RET_CODE_OK
    }
}

/// Acknowledgment of a one-way callback delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAck {
    pub ret_code: String,
}

impl CallbackAck {
    pub fn ok() -> Self {
        Self {
            ret_code: RET_CODE_OK.to_string(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_one_more_hop() {
        let req = LambdaRequest::new("f", "x");
        assert!(!req.forward);
        assert_eq!(0, req.hops);

        let fwd = req.one_more_hop();
        assert!(fwd.forward);
        assert_eq!(1, fwd.hops);
        assert_eq!(req.name, fwd.name);
        assert_eq!(req.input, fwd.input);

        // the original is untouched
        assert_eq!(0, req.hops);
    }

    #[test]
    fn test_input_size() {
        assert_eq!(3, LambdaRequest::new("f", "abc").input_size());
        assert_eq!(
            5,
            LambdaRequest::with_data("f", "abc", vec![0; 5]).input_size()
        );
    }

    #[test]
    fn test_load_clamping() {
        let rep = LambdaResponse::with_loads(RET_CODE_OK, "", [0.424, 1.0, 7.0]);
        assert_eq!(42, rep.load1);
        assert_eq!(99, rep.load10);
        assert_eq!(99, rep.load30);
        assert!(rep.is_ok());
    }

    #[test]
    fn test_processing_time_seconds() {
        let mut rep = LambdaResponse::ok("out");
        rep.ptime_msec = 1500;
        assert!((rep.processing_time_seconds() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_state_request_constructors() {
        assert_eq!(StateOp::Get, StateRequest::get("s").op);
        assert_eq!(StateOp::Del, StateRequest::del("s").op);
        let put = StateRequest::put("s", b"v".to_vec());
        assert_eq!(StateOp::Put, put.op);
        assert_eq!(b"v".to_vec(), put.content);
    }
}
