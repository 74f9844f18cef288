//! Client-side orchestration of composed invocations. Three mutually
//! exclusive execution modes per call: a single function, a synchronous
//! function chain walked by the client itself, and an asynchronous
//! chain/DAG handed to the edge with a callback endpoint.

use std::collections::BTreeMap;

use edgefab_types::{
    model::factory::StateSizes, Chain, Dag, EdgeError, LambdaRequest, LambdaResponse, StateRef,
    States,
};

use crate::interface::EdgeClientInterface;

/// What to execute and where the ancillary services live.
#[derive(Default)]
pub struct ComposerConfig {
    pub chain: Option<Chain>,
    pub dag: Option<Dag>,
    /// Sizes of the dummy states created for the functions, by name.
    pub state_sizes: StateSizes,
    /// Callback endpoint; mandatory with a DAG, optional with a chain.
    pub callback: Option<String>,
    /// State store endpoint; when set, states are staged by location
    /// instead of being carried inline.
    pub state_endpoint: Option<String>,
}

/// Walks chains and DAGs by repeatedly invoking the client layer.
pub struct Composer {
    client: Box<dyn EdgeClientInterface>,
    config: ComposerConfig,
}

impl Composer {
    pub fn new(
        client: Box<dyn EdgeClientInterface>,
        config: ComposerConfig,
    ) -> Result<Self, EdgeError> {
        if config.chain.is_some() && config.dag.is_some() {
            return Err(EdgeError::InvalidConfiguration(
                "cannot specify both a chain and a DAG".to_string(),
            ));
        }
        if config.dag.is_some() && config.callback.is_none() {
            return Err(EdgeError::InvalidConfiguration(
                "a DAG can only be executed asynchronously: callback required".to_string(),
            ));
        }
        Ok(Self { client, config })
    }

    /// Execute one invocation. With a callback configured the returned
    /// response is only an ack: the real payload arrives on the callback
    /// server.
    pub async fn invoke(
        &mut self,
        name: &str,
        input: &str,
        data_in: Vec<u8>,
    ) -> Result<LambdaResponse, EdgeError> {
        if let Some(dag) = self.config.dag.clone() {
            return self.invoke_asynchronous(input, data_in, None, Some(dag)).await;
        }
        if let Some(chain) = self.config.chain.clone() {
            if self.config.callback.is_some() {
                return self
                    .invoke_asynchronous(input, data_in, Some(chain), None)
                    .await;
            }
            return self.invoke_chain(chain, input, data_in).await;
        }
        self.invoke_single(name, input, data_in).await
    }

    /// Mode 1: a single function.
    async fn invoke_single(
        &mut self,
        name: &str,
        input: &str,
        data_in: Vec<u8>,
    ) -> Result<LambdaResponse, EdgeError> {
        let mut request = LambdaRequest::with_data(name, input, data_in);
        request.callback = self.config.callback.clone();
        self.client.run_lambda(&request, false).await
    }

    /// Mode 2: walk the chain here, one synchronous invocation per step,
    /// carrying states and piping each output into the next input.
    async fn invoke_chain(
        &mut self,
        chain: Chain,
        input: &str,
        data_in: Vec<u8>,
    ) -> Result<LambdaResponse, EdgeError> {
        let mut states = self.initial_states(chain.states());
        let mut input = input.to_string();
        let mut data_in = data_in;
        let mut hops = 0;
        let mut ptime_msec = 0;

        let mut last = LambdaResponse::error("empty chain");
        for function in chain.functions() {
            let mut request = LambdaRequest::with_data(function, input.clone(), data_in.clone());
            // only the states this function depends on travel with it
            let needed = chain.states_of(function);
            request.states = states
                .iter()
                .filter(|(name, _)| needed.contains(*name))
                .map(|(name, state)| (name.clone(), state.clone()))
                .collect();

            let response = self.client.run_lambda(&request, false).await?;
            hops += response.hops;
            ptime_msec += response.ptime_msec;

            if !response.is_ok() {
                last = response;
                break;
            }

            // carry the updated states and pipe output into input
            for (name, state) in &response.states {
                states.insert(name.clone(), state.clone());
            }
            input = response.output.clone();
            data_in = response.data_out.clone();
            last = response;
        }

        last.hops = hops;
        last.ptime_msec = ptime_msec;
        // states are internal to the chain, the caller never sees them
        last.states.clear();
        Ok(last)
    }

    /// Mode 3: a single request carrying the whole descriptor, all the
    /// required states, and the callback endpoint; the edge walks the graph
    /// and calls back once.
    async fn invoke_asynchronous(
        &mut self,
        input: &str,
        data_in: Vec<u8>,
        chain: Option<Chain>,
        dag: Option<Dag>,
    ) -> Result<LambdaResponse, EdgeError> {
        let (name, states) = match (&chain, &dag) {
            (Some(chain), _) => (
                chain.functions()[0].clone(),
                self.initial_states(chain.states()),
            ),
            (_, Some(dag)) => (
                dag.entry_function_name().to_string(),
                self.initial_states(dag.states()),
            ),
            _ => unreachable!("one of chain and dag is always set here"),
        };

        let mut request = LambdaRequest::with_data(name, input, data_in);
        request.chain = chain;
        request.dag = dag;
        request.states = states;
        request.callback = Some(self.config.callback.clone().ok_or_else(|| {
            EdgeError::InvalidConfiguration("callback required".to_string())
        })?);

        self.client.run_lambda(&request, false).await
    }

    /// Build the initial value of every non-free state: a remote location
    /// when a state store is configured, a dummy blob of the declared size
    /// otherwise.
    fn initial_states(&self, states: &States) -> BTreeMap<String, StateRef> {
        states
            .all_states(false)
            .into_iter()
            .map(|name| {
                let value = match &self.config.state_endpoint {
                    Some(endpoint) => StateRef::Remote(endpoint.clone()),
                    None => {
                        let size = self.config.state_sizes.get(&name).copied().unwrap_or(0);
                        StateRef::Embedded(vec![0; size])
                    },
                };
                (name, value)
            })
            .collect()
    }
}
