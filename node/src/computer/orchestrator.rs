//! Edge-side orchestration of chains and DAGs: the request is acknowledged
//! immediately, the graph is walked locally, and the final response is
//! delivered through the callback channel. States referenced by location
//! are staged through the state store.

use std::collections::{BTreeMap, BTreeSet};

use edgefab_client::StateClient;
use edgefab_types::{
    Chain, Dag, EdgeError, LambdaRequest, LambdaResponse, StateRef,
};
use tokio::task::JoinSet;

use super::{callback::CallbackClient, Executor};

/// Acknowledge the request and walk the graph in the background. The
/// caller has checked that a callback endpoint is present.
pub(crate) fn spawn(executor: Executor, request: LambdaRequest) -> LambdaResponse {
    let mut ack = LambdaResponse::ok("");
    ack.asynchronous = true;
    ack.hops = request.hops + 1;

    tokio::spawn(async move {
        let callback = request
            .callback
            .clone()
            .expect("the caller checked the callback");

        let response = orchestrate(executor, request).await;

        // a failed delivery loses this asynchronous outcome
        let mut client = CallbackClient::new(callback.as_str());
        if let Err(err) = client.deliver(&response).await {
            tracing::error!(%err, %callback, "callback delivery failed, response dropped");
        }
    });

    ack
}

async fn orchestrate(executor: Executor, request: LambdaRequest) -> LambdaResponse {
    let result = match (request.chain.clone(), request.dag.clone()) {
        (Some(chain), _) => run_chain(&executor, &request, &chain).await,
        (_, Some(dag)) => run_dag(&executor, &request, &dag).await,
        _ => Err(EdgeError::InvalidConfiguration(
            "nothing to orchestrate".to_string(),
        )),
    };
    result.unwrap_or_else(|err| LambdaResponse::error(err.to_string()))
}

/// Walk the chain from `next_function_index`, one local execution per step,
/// piping each output into the next input.
async fn run_chain(
    executor: &Executor,
    request: &LambdaRequest,
    chain: &Chain,
) -> Result<LambdaResponse, EdgeError> {
    let mut states = request.states.clone();
    let mut input = request.input.clone();
    let mut data_in = request.data_in.clone();
    let mut total_hops = 0;
    let mut total_ptime = 0;

    let start = request.next_function_index as usize;
    let mut last: Option<LambdaResponse> = None;
    for function in chain.functions().iter().skip(start) {
        let mut stage = LambdaRequest::with_data(function, input.clone(), data_in.clone());
        stage.forward = request.forward;
        stage.hops = request.hops;
        stage.states = resolve(&states, &chain.states_of(function)).await?;

        let response = executor.execute(&stage).await;
        total_hops += response.hops;
        total_ptime += response.ptime_msec;

        if !response.is_ok() {
            last = Some(response);
            break;
        }

        write_back(&mut states, &response.states).await;
        input = response.output.clone();
        data_in = response.data_out.clone();
        last = Some(response);
    }

    let mut last = last.ok_or_else(|| EdgeError::InvalidModel("empty chain".to_string()))?;
    last.hops = total_hops;
    last.ptime_msec = total_ptime;
    last.states.clear();
    Ok(last)
}

/// Walk the DAG: a slot runs as soon as all its predecessors completed,
/// concurrent branches in parallel; the terminal slot produces the final
/// response.
async fn run_dag(
    executor: &Executor,
    request: &LambdaRequest,
    dag: &Dag,
) -> Result<LambdaResponse, EdgeError> {
    let mut states = request.states.clone();
    let mut completed: BTreeSet<usize> = BTreeSet::new();
    let mut started: BTreeSet<usize> = BTreeSet::new();
    let mut total_hops = 0;
    let mut total_ptime = 0;
    let mut terminal_response: Option<LambdaResponse> = None;

    let mut tasks: JoinSet<(usize, LambdaResponse)> = JoinSet::new();
    started.insert(0);
    start_slot(
        executor,
        request,
        dag,
        &states,
        &mut tasks,
        0,
        request.input.clone(),
        request.data_in.clone(),
    )
    .await?;

    while let Some(joined) = tasks.join_next().await {
        let (index, response) = joined.expect("orchestration tasks do not panic");
        total_hops += response.hops;
        total_ptime += response.ptime_msec;

        if !response.is_ok() {
            // first failure aborts the whole graph
            tasks.abort_all();
            let mut response = response;
            response.hops = total_hops;
            response.ptime_msec = total_ptime;
            response.states.clear();
            return Ok(response);
        }

        write_back(&mut states, &response.states).await;
        completed.insert(index);

        for &successor in dag.successors_of(index)? {
            if started.contains(&successor) {
                continue;
            }
            let ready = dag
                .predecessors_of(successor)?
                .iter()
                .all(|predecessor| completed.contains(predecessor));
            if ready {
                started.insert(successor);
                start_slot(
                    executor,
                    request,
                    dag,
                    &states,
                    &mut tasks,
                    successor,
                    response.output.clone(),
                    response.data_out.clone(),
                )
                .await?;
            }
        }

        if index == dag.terminal() {
            terminal_response = Some(response);
        }
    }

    let mut last = terminal_response
        .ok_or_else(|| EdgeError::InvalidModel("the DAG terminal never executed".to_string()))?;
    last.hops = total_hops;
    last.ptime_msec = total_ptime;
    last.states.clear();
    Ok(last)
}

/// Launch one DAG slot; its input is the output of the predecessor that
/// made it ready.
#[allow(clippy::too_many_arguments)]
async fn start_slot(
    executor: &Executor,
    request: &LambdaRequest,
    dag: &Dag,
    states: &BTreeMap<String, StateRef>,
    tasks: &mut JoinSet<(usize, LambdaResponse)>,
    index: usize,
    input: String,
    data_in: Vec<u8>,
) -> Result<(), EdgeError> {
    let function = dag.function_names()[index].clone();
    let mut stage = LambdaRequest::with_data(&function, input, data_in);
    stage.forward = request.forward;
    stage.hops = request.hops;
    stage.states = resolve(states, &dag.states().states_of(&function)).await?;

    let executor = executor.clone();
    tasks.spawn(async move { (index, executor.execute(&stage).await) });
    Ok(())
}

/// Materialize the needed states as embedded content, fetching the ones
/// addressed by location from their state store.
async fn resolve(
    states: &BTreeMap<String, StateRef>,
    needed: &BTreeSet<String>,
) -> Result<BTreeMap<String, StateRef>, EdgeError> {
    let mut ret = BTreeMap::new();
    for name in needed {
        let value = states
            .get(name)
            .ok_or_else(|| EdgeError::StateMissing(name.clone()))?;
        let content = match value {
            StateRef::Embedded(content) => content.clone(),
            StateRef::Remote(location) => StateClient::new(location.as_str())
                .get(name)
                .await?
                .ok_or_else(|| EdgeError::StateMissing(name.clone()))?,
        };
        ret.insert(name.clone(), StateRef::Embedded(content));
    }
    Ok(ret)
}

/// Store the states a stage updated: remotely-addressed states go back to
/// their store, the others replace the local copy.
async fn write_back(
    states: &mut BTreeMap<String, StateRef>,
    updated: &BTreeMap<String, StateRef>,
) {
    for (name, value) in updated {
        let remote_location = match states.get(name) {
            Some(StateRef::Remote(location)) => Some(location.clone()),
            _ => None,
        };
        match (remote_location, value) {
            (Some(location), StateRef::Embedded(content)) => {
                let mut client = StateClient::new(location);
                if let Err(err) = client.put(name, content.clone()).await {
                    tracing::error!(%err, name, "cannot write state back");
                }
            },
            _ => {
                states.insert(name.clone(), value.clone());
            },
        }
    }
}
