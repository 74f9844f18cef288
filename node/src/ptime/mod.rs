//! The processing-time estimator family. An estimator owns the forwarding
//! view of its lambdas and turns an incoming request into an outbound
//! destination; the outcome of every execution is fed back through
//! `process_success` / `process_failure` to sharpen future decisions.
//!
//! Four variants share the machinery:
//! - `rtt`: shortest predicted RTT (linear fit of RTT on input size);
//! - `util`: smallest predicted RTT + processing time (the latter from a
//!   fit of processing time on the reported load);
//! - `delay`: smallest predicted processing time only;
//! - `probe`: dry-runs all the candidates and picks the one reporting the
//!   smallest simulated processing time.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    str::FromStr,
    time::Duration,
};

use clap::Args;
use edgefab_client::EdgeClientPool;
use edgefab_types::{EdgeError, LambdaRequest, LambdaResponse};
use edgefab_utils::saver::MeasurementSaver;
use parking_lot::Mutex;

use crate::{
    forwarding_table::ForwardingTable, rtt_estimator::RttEstimator,
    util_estimator::UtilEstimator, DestinationTable,
};

/// The estimator variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum EstimatorKind {
    #[display("rtt")]
    Rtt,
    #[display("util")]
    Util,
    #[display("delay")]
    Delay,
    #[display("probe")]
    Probe,
}

impl FromStr for EstimatorKind {
    type Err = EdgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rtt" => Ok(Self::Rtt),
            "util" => Ok(Self::Util),
            "delay" => Ok(Self::Delay),
            "probe" => Ok(Self::Probe),
            other => Err(EdgeError::InvalidConfiguration(format!(
                "invalid processing time estimator type '{other}'"
            ))),
        }
    }
}

/// Configuration of the estimator, embeddable in a binary's arguments.
#[derive(Clone, Debug, Args)]
pub struct EstimatorOptions {
    /// Estimator type: rtt, util, delay, or probe.
    #[clap(long, env = "EDGEFAB_ESTIMATOR", default_value = "rtt")]
    pub estimator_type: String,

    /// Samples kept per (lambda, destination) for the RTT fit.
    #[clap(long, default_value_t = 50)]
    pub rtt_window_size: usize,

    /// Period after which the RTT samples are considered stale, in seconds.
    #[clap(long, default_value_t = 10.0)]
    pub rtt_stale_period: f64,

    /// Period after which the reported load is forgotten, in seconds.
    #[clap(long, default_value_t = 10.0)]
    pub util_load_timeout: f64,

    /// Samples kept per (lambda, destination, size) for the load fit.
    #[clap(long, default_value_t = 50)]
    pub util_window_size: usize,

    /// File where the measurements are streamed, if given.
    #[clap(long)]
    pub output: Option<String>,

    /// Maximum concurrent clients per destination used for probing.
    #[clap(long, default_value_t = 10)]
    pub probe_max_clients: usize,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            estimator_type: "rtt".to_string(),
            rtt_window_size: 50,
            rtt_stale_period: 10.0,
            util_load_timeout: 10.0,
            util_window_size: 50,
            output: None,
            probe_max_clients: 10,
        }
    }
}

/// The predictions recorded when a destination was chosen, joined with the
/// measurements when the execution completes. Values in seconds.
struct Estimates {
    rtt: f64,
    ptime: f64,
}

enum Kind {
    Rtt {
        rtt: RttEstimator,
    },
    Util {
        rtt: RttEstimator,
        util: UtilEstimator,
        saver: MeasurementSaver,
    },
    Delay {
        util: UtilEstimator,
        saver: MeasurementSaver,
    },
    Probe {
        destinations: DestinationTable<()>,
        saver: MeasurementSaver,
    },
}

struct Inner {
    lambdas: BTreeSet<String>,
    table: BTreeMap<String, BTreeMap<String, (f64, bool)>>,
    /// One entry per in-flight decision, keyed by the request id assigned
    /// by the processor. Created by `destination`, consumed by
    /// `process_success` / `process_failure` under the same lock.
    estimates: HashMap<u64, Estimates>,
    kind: Kind,
}

/// A processing-time estimator of one of the four kinds.
pub struct PtimeEstimator {
    kind_tag: EstimatorKind,
    inner: Mutex<Inner>,
    /// Used by the probe variant only; lives outside the lock because
    /// probing does network I/O.
    probe_pool: Option<EdgeClientPool>,
}

impl PtimeEstimator {
    pub fn new(options: &EstimatorOptions) -> Result<Self, EdgeError> {
        let kind_tag: EstimatorKind = options.estimator_type.parse()?;
        let saver = || {
            MeasurementSaver::from_option(options.output.as_deref())
                .map_err(|err| EdgeError::InvalidConfiguration(err.to_string()))
        };
        let rtt = || {
            RttEstimator::new(
                options.rtt_window_size,
                Some(Duration::from_secs_f64(options.rtt_stale_period)),
            )
        };
        let util = || {
            UtilEstimator::new(
                Duration::from_secs_f64(options.util_load_timeout),
                options.util_window_size,
            )
        };

        let (kind, probe_pool) = match kind_tag {
            EstimatorKind::Rtt => (Kind::Rtt { rtt: rtt() }, None),
            EstimatorKind::Util => (
                Kind::Util {
                    rtt: rtt(),
                    util: util(),
                    saver: saver()?,
                },
                None,
            ),
            EstimatorKind::Delay => (
                Kind::Delay {
                    util: util(),
                    saver: saver()?,
                },
                None,
            ),
            EstimatorKind::Probe => (
                Kind::Probe {
                    destinations: DestinationTable::new(|_, _| ()),
                    saver: saver()?,
                },
                Some(EdgeClientPool::new(options.probe_max_clients)),
            ),
        };

        tracing::info!(kind = %kind_tag, "created a processing time estimator");

        Ok(Self {
            kind_tag,
            inner: Mutex::new(Inner {
                lambdas: BTreeSet::new(),
                table: BTreeMap::new(),
                estimates: HashMap::new(),
                kind,
            }),
            probe_pool,
        })
    }

    /// A probe estimator over the given client pool, for testing and for
    /// alternate transports.
    pub fn probe_with_pool(pool: EdgeClientPool, output: Option<&str>) -> Result<Self, EdgeError> {
        Ok(Self {
            kind_tag: EstimatorKind::Probe,
            inner: Mutex::new(Inner {
                lambdas: BTreeSet::new(),
                table: BTreeMap::new(),
                estimates: HashMap::new(),
                kind: Kind::Probe {
                    destinations: DestinationTable::new(|_, _| ()),
                    saver: MeasurementSaver::from_option(output)
                        .map_err(|err| EdgeError::InvalidConfiguration(err.to_string()))?,
                },
            }),
            probe_pool: Some(pool),
        })
    }

    pub fn kind(&self) -> EstimatorKind {
        self.kind_tag
    }

    /// Pick the destination for the given request and record the prediction
    /// under the request id, to be joined with the outcome later.
    pub async fn destination(
        &self,
        request: &LambdaRequest,
        request_id: u64,
    ) -> Result<String, EdgeError> {
        let size = request.input_size();

        // the probe variant dry-runs the candidates outside the lock
        if self.kind_tag == EstimatorKind::Probe {
            return self.probe_destination(request, request_id).await;
        }

        let mut inner = self.inner.lock();
        let (destination, estimates) = match &inner.kind {
            Kind::Rtt { rtt } => {
                let (destination, rtt_est) = rtt.shortest_rtt(&request.name, size)?;
                (destination, Estimates { rtt: rtt_est, ptime: 0.0 })
            },
            Kind::Util { rtt, util, .. } => {
                let rtts = rtt.rtts(&request.name, size)?;
                let (destination, rtt_est, ptime_est) = util.best(&request.name, size, &rtts)?;
                (
                    destination,
                    Estimates {
                        rtt: rtt_est,
                        ptime: ptime_est,
                    },
                )
            },
            Kind::Delay { util, .. } => {
                let (destination, ptime_est) = util.smallest_ptime(&request.name, size)?;
                (destination, Estimates { rtt: 0.0, ptime: ptime_est })
            },
            Kind::Probe { .. } => unreachable!("handled above"),
        };

        let previous = inner.estimates.insert(request_id, estimates);
        debug_assert!(previous.is_none());
        Ok(destination)
    }

    async fn probe_destination(
        &self,
        request: &LambdaRequest,
        request_id: u64,
    ) -> Result<String, EdgeError> {
        let pool = self
            .probe_pool
            .as_ref()
            .expect("the probe variant always has a pool");

        let candidates: Vec<String> = {
            let inner = self.inner.lock();
            let Kind::Probe { destinations, .. } = &inner.kind else {
                unreachable!("kind tag is probe");
            };
            destinations
                .all(&request.name, |_, _| 0.0)?
                .into_keys()
                .collect()
        };

        let mut best: Option<(String, u32)> = None;
        for destination in candidates {
            match pool.invoke(&destination, request, true).await {
                Ok((response, _)) if response.is_ok() => {
                    tracing::trace!(
                        %destination,
                        simulated_ptime_msec = response.ptime_msec,
                        "probe reply"
                    );
                    if best
                        .as_ref()
                        .map(|(_, ptime)| response.ptime_msec < *ptime)
                        .unwrap_or(true)
                    {
                        best = Some((destination, response.ptime_msec));
                    }
                },
                Ok((response, _)) => {
                    tracing::debug!(%destination, ret_code = %response.ret_code, "probe refused");
                },
                Err(err) => {
                    tracing::debug!(%destination, %err, "probe failed");
                },
            }
        }

        let (destination, ptime_msec) =
            best.ok_or_else(|| EdgeError::NoDestinations(request.name.clone()))?;

        let mut inner = self.inner.lock();
        let previous = inner.estimates.insert(
            request_id,
            Estimates {
                rtt: 0.0,
                ptime: f64::from(ptime_msec) * 1e-3,
            },
        );
        debug_assert!(previous.is_none());
        Ok(destination)
    }

    /// Record a successful execution: join the prediction with the
    /// measurement and feed the sub-estimators.
    pub fn process_success(
        &self,
        request: &LambdaRequest,
        request_id: u64,
        destination: &str,
        response: &LambdaResponse,
        elapsed: f64,
    ) {
        let size = request.input_size();
        let measured_rtt = elapsed - response.processing_time_seconds();
        let mut inner = self.inner.lock();

        let estimates = inner.estimates.remove(&request_id);
        if estimates.is_none() {
            tracing::error!(request_id, "completion without a matching prediction");
        }

        match &inner.kind {
            Kind::Rtt { rtt } => {
                if let Some(estimates) = &estimates {
                    tracing::trace!(
                        lambda = %request.name,
                        size,
                        destination,
                        estimated_rtt_ms = estimates.rtt * 1e3,
                        measured_rtt_ms = measured_rtt * 1e3,
                        "rtt sample"
                    );
                }
                rtt.add_measurement(&request.name, destination, size, measured_rtt);
            },
            Kind::Util { rtt, util, saver } => {
                if let Some(estimates) = &estimates {
                    saver.save(
                        &format!("{} {}", request.name, destination),
                        &[
                            size as f64,
                            f64::from(response.load1),
                            estimates.rtt,
                            measured_rtt,
                            estimates.ptime,
                            response.processing_time_seconds(),
                        ],
                    );
                }
                util.add_measurement(
                    &request.name,
                    destination,
                    size,
                    response.processing_time_seconds(),
                    response.load1,
                );
                rtt.add_measurement(&request.name, destination, size, measured_rtt);
            },
            Kind::Delay { util, saver } => {
                if let Some(estimates) = &estimates {
                    saver.save(
                        &format!("{} {}", request.name, destination),
                        &[
                            size as f64,
                            f64::from(response.load1),
                            estimates.ptime,
                            elapsed,
                        ],
                    );
                }
                // the delay variant fits the overall latency, not the
                // server-side processing time
                util.add_measurement(&request.name, destination, size, elapsed, response.load1);
            },
            Kind::Probe { saver, .. } => {
                if let Some(estimates) = &estimates {
                    saver.save(
                        &format!("{} {}", request.name, destination),
                        &[
                            size as f64,
                            estimates.ptime,
                            response.processing_time_seconds(),
                        ],
                    );
                }
            },
        }
    }

    /// Record a failed execution: drop the prediction and remove the
    /// destination from the set serving this lambda.
    pub fn process_failure(&self, request: &LambdaRequest, request_id: u64, destination: &str) {
        let mut inner = self.inner.lock();
        inner.estimates.remove(&request_id);
        Self::internal_remove(&mut inner, &request.name, destination);
    }

    /// Number of in-flight predictions, for tests.
    pub fn pending_estimates(&self) -> usize {
        self.inner.lock().estimates.len()
    }

    fn internal_remove(inner: &mut Inner, lambda: &str, destination: &str) {
        let Some(destinations) = inner.table.get_mut(lambda) else {
            return;
        };
        let removed = destinations.remove(destination).is_some();
        let now_empty = destinations.is_empty();
        if removed {
            tracing::info!(lambda, destination, "destination removed");
            Self::private_remove(&mut inner.kind, lambda, destination);
        }
        if now_empty {
            tracing::info!(lambda, "lambda now has no destinations");
            inner.table.remove(lambda);
            inner.lambdas.remove(lambda);
        }
    }

    fn private_add(kind: &mut Kind, lambda: &str, destination: &str) {
        match kind {
            Kind::Rtt { rtt } => {
                rtt.add(lambda, destination);
            },
            Kind::Util { rtt, util, .. } => {
                util.add(lambda, destination);
                rtt.add(lambda, destination);
            },
            Kind::Delay { util, .. } => {
                util.add(lambda, destination);
            },
            Kind::Probe { destinations, .. } => {
                destinations.add(lambda, destination);
            },
        }
    }

    fn private_remove(kind: &mut Kind, lambda: &str, destination: &str) {
        match kind {
            Kind::Rtt { rtt } => {
                rtt.remove(lambda, destination);
            },
            Kind::Util { rtt, util, .. } => {
                util.remove(lambda, destination);
                rtt.remove(lambda, destination);
            },
            Kind::Delay { util, .. } => {
                util.remove(lambda, destination);
            },
            Kind::Probe { destinations, .. } => {
                destinations.remove(lambda, destination);
            },
        }
    }
}

impl ForwardingTable for PtimeEstimator {
    fn change(&self, lambda: &str, destination: &str, _weight: f64, is_final: bool) {
        let mut inner = self.inner.lock();
        let added = inner
            .table
            .entry(lambda.to_string())
            .or_default()
            // the estimators do not use weights
            .insert(destination.to_string(), (1.0, is_final))
            .is_none();
        if added {
            inner.lambdas.insert(lambda.to_string());
            tracing::info!(lambda, destination, is_final, "destination added");
            Self::private_add(&mut inner.kind, lambda, destination);
        }
    }

    fn remove(&self, lambda: &str, destination: &str) {
        let mut inner = self.inner.lock();
        Self::internal_remove(&mut inner, lambda, destination);
    }

    fn remove_lambda(&self, lambda: &str) {
        let mut inner = self.inner.lock();
        if let Some(destinations) = inner.table.remove(lambda) {
            for destination in destinations.keys() {
                Self::private_remove(&mut inner.kind, lambda, destination);
            }
            inner.lambdas.remove(lambda);
            tracing::info!(lambda, "removed all destinations");
        }
    }

    fn lambdas(&self) -> BTreeSet<String> {
        self.inner.lock().lambdas.clone()
    }

    fn full_table(&self) -> BTreeMap<String, BTreeMap<String, (f64, bool)>> {
        self.inner.lock().table.clone()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use edgefab_client::{ClientFactory, EdgeClientInterface};
    use pretty_assertions::assert_eq;

    use super::*;

    fn rtt_estimator() -> PtimeEstimator {
        PtimeEstimator::new(&EstimatorOptions::default()).unwrap()
    }

    fn options(kind: &str) -> EstimatorOptions {
        EstimatorOptions {
            estimator_type: kind.to_string(),
            ..EstimatorOptions::default()
        }
    }

    fn request(name: &str, input: &str) -> LambdaRequest {
        LambdaRequest::new(name, input)
    }

    fn response(ptime_msec: u32, load1: u16) -> LambdaResponse {
        let mut response = LambdaResponse::ok("out");
        response.ptime_msec = ptime_msec;
        response.load1 = load1;
        response
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(EstimatorKind::Rtt, "rtt".parse().unwrap());
        assert_eq!(EstimatorKind::Util, "util".parse().unwrap());
        assert_eq!(EstimatorKind::Delay, "delay".parse().unwrap());
        assert_eq!(EstimatorKind::Probe, "probe".parse().unwrap());
        assert!("bogus".parse::<EstimatorKind>().is_err());
    }

    #[test]
    fn test_change_and_remove_maintain_the_forwarding_view() {
        let estimator = rtt_estimator();
        let mut expected: BTreeMap<String, BTreeMap<String, (f64, bool)>> = BTreeMap::new();

        estimator.change("lambda1", "dest1", -42.0, true);
        // the weight argument is ignored, the table always carries 1.0
        expected
            .entry("lambda1".into())
            .or_default()
            .insert("dest1".into(), (1.0, true));
        assert_eq!(expected, estimator.full_table());
        assert_eq!(BTreeSet::from(["lambda1".to_string()]), estimator.lambdas());

        estimator.change("lambda2", "dest2", 1.0, false);
        estimator.change("lambda2", "dest3", 1.0, true);
        expected
            .entry("lambda2".into())
            .or_default()
            .insert("dest2".into(), (1.0, false));
        expected
            .entry("lambda2".into())
            .or_default()
            .insert("dest3".into(), (1.0, true));
        assert_eq!(expected, estimator.full_table());

        estimator.remove_lambda("lambda2");
        expected.remove("lambda2");
        assert_eq!(expected, estimator.full_table());
        assert_eq!(BTreeSet::from(["lambda1".to_string()]), estimator.lambdas());

        // removing the last destination erases the lambda
        estimator.remove("lambda1", "dest1");
        assert!(estimator.full_table().is_empty());
        assert!(estimator.lambdas().is_empty());

        // removals of unknown entries are idempotent
        estimator.remove("lambda1", "destX");
        estimator.remove_lambda("lambdaX");
    }

    #[tokio::test]
    async fn test_rtt_decision_and_feedback() {
        let estimator = rtt_estimator();
        estimator.change("f", "d1", 1.0, true);
        estimator.change("f", "d2", 1.0, true);

        let req = request("f", "x".repeat(100).as_str());

        // no measurements yet: both predict 0, smallest destination wins
        let destination = estimator.destination(&req, 1).await.unwrap();
        assert_eq!("d1", destination);
        assert_eq!(1, estimator.pending_estimates());

        // every completion consumes its prediction
        estimator.process_success(&req, 1, &destination, &response(10, 0), 0.100);
        assert_eq!(0, estimator.pending_estimates());

        // d1 now predicts ~90 ms of RTT after a second sample, d2 still 0
        let req2 = request("f", "x".repeat(200).as_str());
        let destination = estimator.destination(&req2, 2).await.unwrap();
        estimator.process_success(&req2, 2, &destination, &response(10, 0), 0.100);
        let destination = estimator.destination(&req, 3).await.unwrap();
        assert_eq!("d2", destination);
        estimator.process_failure(&req, 3, &destination);

        // the failure removed d2
        assert_eq!(
            vec!["d1".to_string()],
            estimator.full_table()["f"].keys().cloned().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_no_destinations() {
        let estimator = rtt_estimator();
        let req = request("f", "x");
        assert!(matches!(
            estimator.destination(&req, 1).await,
            Err(EdgeError::NoDestinations(_))
        ));
    }

    #[tokio::test]
    async fn test_util_decision_records_both_estimates() {
        let estimator = PtimeEstimator::new(&options("util")).unwrap();
        estimator.change("f", "d1", 1.0, true);

        let req = request("f", "xxxx");
        let destination = estimator.destination(&req, 7).await.unwrap();
        assert_eq!("d1", destination);
        estimator.process_success(&req, 7, &destination, &response(25, 50), 0.050);
        assert_eq!(0, estimator.pending_estimates());
    }

    #[tokio::test]
    async fn test_delay_variant() {
        let estimator = PtimeEstimator::new(&options("delay")).unwrap();
        estimator.change("f", "d1", 1.0, true);
        estimator.change("f", "d2", 1.0, true);

        let req = request("f", "xxxx");
        for id in 0..10u64 {
            let destination = estimator.destination(&req, id).await.unwrap();
            // d1 is consistently slower end-to-end
            let elapsed = if destination == "d1" { 1.0 } else { 0.010 };
            estimator.process_success(&req, id, &destination, &response(0, 50), elapsed);
        }
        // after a few samples the estimator settles on d2
        let destination = estimator.destination(&req, 100).await.unwrap();
        assert_eq!("d2", destination);
        estimator.process_failure(&req, 100, &destination);
    }

    /// A mock client whose dry runs report a fixed simulated ptime per
    /// destination.
    struct ProbeMock {
        ptime_msec: u32,
        dry_calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl EdgeClientInterface for ProbeMock {
        async fn run_lambda(
            &mut self,
            _request: &LambdaRequest,
            dry: bool,
        ) -> Result<LambdaResponse, EdgeError> {
            assert!(dry, "the probe estimator only issues dry requests");
            self.dry_calls.fetch_add(1, Ordering::SeqCst);
            let mut response = LambdaResponse::ok("");
            response.ptime_msec = self.ptime_msec;
            Ok(response)
        }
    }

    struct ProbeMockFactory {
        dry_calls: Arc<AtomicU64>,
    }

    #[async_trait]
    impl ClientFactory for ProbeMockFactory {
        async fn make(
            &self,
            endpoint: &str,
        ) -> Result<Box<dyn EdgeClientInterface>, EdgeError> {
            let ptime_msec = match endpoint {
                "d1" => 100,
                "d2" => 5,
                _ => 1000,
            };
            Ok(Box::new(ProbeMock {
                ptime_msec,
                dry_calls: self.dry_calls.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_probe_picks_the_smallest_simulated_ptime() {
        let dry_calls = Arc::new(AtomicU64::new(0));
        let pool = EdgeClientPool::with_factory(
            Box::new(ProbeMockFactory {
                dry_calls: dry_calls.clone(),
            }),
            10,
        );
        let estimator = PtimeEstimator::probe_with_pool(pool, None).unwrap();
        estimator.change("f", "d1", 1.0, true);
        estimator.change("f", "d2", 1.0, true);
        estimator.change("f", "d3", 1.0, true);

        let req = request("f", "x");
        let destination = estimator.destination(&req, 1).await.unwrap();
        assert_eq!("d2", destination);
        // one dry run per candidate
        assert_eq!(3, dry_calls.load(Ordering::SeqCst));

        estimator.process_success(&req, 1, &destination, &response(7, 0), 0.010);
        assert_eq!(0, estimator.pending_estimates());

        // a removal takes the destination out of the probing set
        estimator.remove("f", "d2");
        let destination = estimator.destination(&req, 2).await.unwrap();
        assert_eq!("d1", destination);
        assert_eq!(5, dry_calls.load(Ordering::SeqCst));
    }
}
