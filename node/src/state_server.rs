//! The in-memory state store behind the state service wire protocol.

use async_trait::async_trait;
use edgefab_transport::Service;
use edgefab_types::{StateOp, StateRequest, StateResponse};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Named opaque blobs, served to chain/DAG orchestration and to clients.
#[derive(Default)]
pub struct StateServer {
    repo: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl StateServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.repo.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.repo.lock().is_empty()
    }
}

#[async_trait]
impl Service for StateServer {
    type Request = StateRequest;
    type Response = StateResponse;

    async fn call(&self, request: StateRequest) -> StateResponse {
        let mut repo = self.repo.lock();
        match request.op {
            StateOp::Get => match repo.get(&request.name) {
                Some(content) => StateResponse::ok(content.clone()),
                None => StateResponse::error(format!("could not find state: {}", request.name)),
            },
            StateOp::Put => {
                repo.insert(request.name, request.content);
                StateResponse::ok(Vec::new())
            },
            StateOp::Del => {
                if repo.remove(&request.name).is_some() {
                    StateResponse::ok(Vec::new())
                } else {
                    StateResponse::error(format!("state not found: {}", request.name))
                }
            },
        }
    }
}
