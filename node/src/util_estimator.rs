//! Estimates the processing time of a lambda from the utilization reported
//! by the edge computers.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, Instant},
};

use edgefab_types::EdgeError;
use parking_lot::Mutex;

use crate::{destination_table::DestinationTable, linear::LinearEstimator};

/// Per (lambda, destination): one linear fit of the processing time versus
/// the reported load, for each observed input size.
struct LambdaDescriptor {
    window_size: usize,
    estimators: BTreeMap<usize, LinearEstimator>,
}

impl LambdaDescriptor {
    /// Predicted processing time in seconds at the given load; 0 when the
    /// exact input size was never observed, which forces the destination to
    /// be tried.
    fn ptime(&mut self, input_size: usize, load: u16) -> f64 {
        match self.estimators.get_mut(&input_size) {
            Some(estimator) => estimator.extrapolate(f64::from(load)),
            None => 0.0,
        }
    }

    fn add(&mut self, input_size: usize, ptime: f64, load: u16) {
        let estimator = self.estimators.entry(input_size).or_insert_with(|| {
            tracing::trace!(input_size, "creating load/ptime fit for new input size");
            // samples never go stale here, the load timeout takes care of
            // inactive destinations
            LinearEstimator::new(self.window_size, None)
        });
        estimator.add(f64::from(load), ptime);
    }
}

/// Per destination: the lambdas it may run, the last reported load1, and
/// when it was reported.
struct ComputerDescriptor {
    lambdas: BTreeSet<String>,
    load_timeout: Duration,
    last_measurement: Instant,
    last_load1: u16,
}

impl ComputerDescriptor {
    fn new(load_timeout: Duration) -> Self {
        Self {
            lambdas: BTreeSet::new(),
            load_timeout,
            last_measurement: Instant::now(),
            last_load1: 0,
        }
    }

    /// The last known load1 and its age. Once the load information is older
    /// than the timeout we cannot know the state of the server anymore: the
    /// cached value resets to 0, forcing a periodic re-probing of the
    /// destination.
    fn last_load(&mut self) -> (u16, Duration) {
        let now = Instant::now();
        if now.duration_since(self.last_measurement) >= self.load_timeout {
            self.last_load1 = 0;
            self.last_measurement = now;
        }
        (self.last_load1, now.duration_since(self.last_measurement))
    }

    fn add(&mut self, load1: u16) {
        if load1 > 100 {
            tracing::warn!(load1, "overflowing load1 value");
        }
        self.last_measurement = Instant::now();
        self.last_load1 = load1.min(99);
    }
}

/// The utilization estimator: combines the last known load of each
/// destination with the per-size regression of processing time on load.
pub struct UtilEstimator {
    load_timeout: Duration,
    computers: Mutex<BTreeMap<String, ComputerDescriptor>>,
    table: DestinationTable<LambdaDescriptor>,
}

impl UtilEstimator {
    pub fn new(load_timeout: Duration, window_size: usize) -> Self {
        Self {
            load_timeout,
            computers: Mutex::new(BTreeMap::new()),
            table: DestinationTable::new(move |_, _| LambdaDescriptor {
                window_size,
                estimators: BTreeMap::new(),
            }),
        }
    }

    /// The destination minimizing predicted RTT plus predicted processing
    /// time, with both predictions. The RTTs come from the companion RTT
    /// estimator.
    pub fn best(
        &self,
        lambda: &str,
        input_size: usize,
        rtts: &BTreeMap<String, f64>,
    ) -> Result<(String, f64, f64), EdgeError> {
        let ptimes = {
            let mut computers = self.computers.lock();
            self.table.all(lambda, |destination, descriptor| {
                let load = match computers.get_mut(destination) {
                    Some(computer) => computer.last_load().0,
                    None => {
                        tracing::warn!(
                            destination,
                            "cannot estimate processing time, destination disappeared"
                        );
                        0
                    },
                };
                descriptor.ptime(input_size, load)
            })?
        };
        debug_assert_eq!(rtts.len(), ptimes.len());

        let mut ret: Option<(String, f64, f64)> = None;
        let mut min_time = f64::MAX;
        for (destination, ptime) in &ptimes {
            let rtt = rtts.get(destination).copied().unwrap_or(0.0);
            let total = rtt + ptime;
            tracing::trace!(
                lambda,
                input_size,
                %destination,
                rtt_est = rtt,
                ptime_est = ptime,
                total_est = total,
                "candidate"
            );
            if total < min_time {
                ret = Some((destination.clone(), rtt, *ptime));
                min_time = total;
            }
        }
        ret.ok_or_else(|| EdgeError::NoDestinations(lambda.to_string()))
    }

    /// The destination with the smallest predicted processing time, and the
    /// prediction.
    pub fn smallest_ptime(
        &self,
        lambda: &str,
        input_size: usize,
    ) -> Result<(String, f64), EdgeError> {
        let mut computers = self.computers.lock();
        let (destination, value) = self.table.best(lambda, |destination, descriptor| {
            let load = computers
                .get_mut(destination)
                .map(|computer| computer.last_load().0)
                .unwrap_or(0);
            -descriptor.ptime(input_size, load)
        })?;
        Ok((destination, -value))
    }

    /// Add a measurement: the processing time observed for a given size,
    /// together with the load reported by the destination.
    pub fn add_measurement(
        &self,
        lambda: &str,
        destination: &str,
        input_size: usize,
        ptime: f64,
        load1: u16,
    ) {
        if let Err(err) = self.table.with(lambda, destination, |descriptor| {
            descriptor.add(input_size, ptime, load1)
        }) {
            tracing::debug!(%err, "measurement for an unknown pair dropped");
            return;
        }
        if let Some(computer) = self.computers.lock().get_mut(destination) {
            computer.add(load1);
        }
    }

    /// Add a pair. Returns true if an element was actually added.
    pub fn add(&self, lambda: &str, destination: &str) -> bool {
        let mut computers = self.computers.lock();
        computers
            .entry(destination.to_string())
            .or_insert_with(|| ComputerDescriptor::new(self.load_timeout))
            .lambdas
            .insert(lambda.to_string());
        drop(computers);
        self.table.add(lambda, destination)
    }

    /// Remove a pair; the computer record goes when its last lambda goes.
    pub fn remove(&self, lambda: &str, destination: &str) -> bool {
        let mut computers = self.computers.lock();
        if let Some(computer) = computers.get_mut(destination) {
            computer.lambdas.remove(lambda);
            if computer.lambdas.is_empty() {
                computers.remove(destination);
            }
        }
        drop(computers);
        self.table.remove(lambda, destination)
    }
}
