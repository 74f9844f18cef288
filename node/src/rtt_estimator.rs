//! Estimates the RTT of a lambda request from the past executions.
//!
//! The RTT is the difference between the overall lambda latency and the
//! processing time reported in the response, computed by the caller.

use std::{collections::BTreeMap, time::Duration};

use edgefab_types::EdgeError;

use crate::{destination_table::DestinationTable, linear::LinearEstimator};

struct Descriptor {
    estimator: LinearEstimator,
}

impl Descriptor {
    /// The estimated RTT according to the current fit, never negative.
    ///
    /// All the values of a destination may have been purged because it was
    /// not used for the whole stale period, e.g. a better destination was
    /// consistently found. The empty window then predicts 0, which gives
    /// stale destinations a higher chance to be picked again and acts as a
    /// periodic probing mechanism.
    fn rtt(&mut self, input_size: usize) -> f64 {
        self.estimator.extrapolate(input_size as f64).max(0.0)
    }
}

/// Per (lambda, destination): a linear fit of the RTT, in seconds, as a
/// function of the input size, in bytes.
pub struct RttEstimator {
    table: DestinationTable<Descriptor>,
}

impl RttEstimator {
    pub fn new(window_size: usize, stale_period: Option<Duration>) -> Self {
        Self {
            table: DestinationTable::new(move |_, _| Descriptor {
                estimator: LinearEstimator::new(window_size, stale_period),
            }),
        }
    }

    /// The estimated RTT, in seconds, or 0 with insufficient data for the
    /// pair.
    pub fn rtt(&self, lambda: &str, destination: &str, input_size: usize) -> f64 {
        self.table
            .with(lambda, destination, |descriptor| descriptor.rtt(input_size))
            .unwrap_or(0.0)
    }

    /// The estimated RTT towards every possible destination.
    pub fn rtts(
        &self,
        lambda: &str,
        input_size: usize,
    ) -> Result<BTreeMap<String, f64>, EdgeError> {
        self.table
            .all(lambda, |_, descriptor| descriptor.rtt(input_size))
    }

    /// The destination with the shortest estimated RTT, and the estimate.
    pub fn shortest_rtt(
        &self,
        lambda: &str,
        input_size: usize,
    ) -> Result<(String, f64), EdgeError> {
        let (destination, value) = self
            .table
            .best(lambda, |_, descriptor| -descriptor.rtt(input_size))?;
        Ok((destination, -value))
    }

    /// Add a measurement.
    pub fn add_measurement(
        &self,
        lambda: &str,
        destination: &str,
        input_size: usize,
        rtt: f64,
    ) {
        if let Err(err) = self.table.with(lambda, destination, |descriptor| {
            descriptor.estimator.add(input_size as f64, rtt)
        }) {
            tracing::debug!(%err, "measurement for an unknown pair dropped");
        }
    }

    /// Add a pair. Returns true if an element was actually added.
    pub fn add(&self, lambda: &str, destination: &str) -> bool {
        self.table.add(lambda, destination)
    }

    /// Remove a pair. Returns true if an element was actually removed.
    pub fn remove(&self, lambda: &str, destination: &str) -> bool {
        self.table.remove(lambda, destination)
    }
}
