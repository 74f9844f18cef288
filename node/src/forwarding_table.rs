//! The forwarding view shared by the routing components: which destinations
//! may serve which lambda, with a weight and a final-hop marker, plus the
//! weight-based table and local optimizer used by the edge router.

use std::collections::{BTreeMap, BTreeSet};

use edgefab_types::EdgeError;
use parking_lot::Mutex;

/// A `lambda -> destination -> (weight, is_final)` view. `is_final` marks a
/// destination that must terminate forwarding, i.e. a real computer rather
/// than another router. The weight is carried for interface compatibility;
/// the estimators pin it to 1.0.
pub trait ForwardingTable: Send + Sync {
    /// Add a destination for a lambda, or change its weight.
    fn change(&self, lambda: &str, destination: &str, weight: f64, is_final: bool);

    /// Remove a destination for a lambda.
    fn remove(&self, lambda: &str, destination: &str);

    /// Remove all the destinations for a lambda.
    fn remove_lambda(&self, lambda: &str);

    /// All the lambdas served.
    fn lambdas(&self) -> BTreeSet<String>;

    /// A full representation of the table.
    fn full_table(&self) -> BTreeMap<String, BTreeMap<String, (f64, bool)>>;
}

/// A plain weight-based forwarding table: `pick` returns the destination
/// with the highest weight, ties won by the smallest destination string.
#[derive(Default)]
pub struct WeightedTable {
    table: Mutex<BTreeMap<String, BTreeMap<String, (f64, bool)>>>,
}

impl WeightedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The destination to forward the given lambda to.
    pub fn pick(&self, lambda: &str) -> Result<String, EdgeError> {
        let guard = self.table.lock();
        let destinations = guard
            .get(lambda)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| EdgeError::NoDestinations(lambda.to_string()))?;

        let mut best: Option<(&String, f64)> = None;
        for (destination, (weight, _)) in destinations {
            if best.map(|(_, w)| *weight > w).unwrap_or(true) {
                best = Some((destination, *weight));
            }
        }
        Ok(best.expect("non-empty destinations").0.clone())
    }

    /// Apply a function to the weight of an existing entry.
    pub fn update_weight(
        &self,
        lambda: &str,
        destination: &str,
        f: impl FnOnce(f64) -> f64,
    ) {
        let mut guard = self.table.lock();
        if let Some((weight, _)) = guard
            .get_mut(lambda)
            .and_then(|destinations| destinations.get_mut(destination))
        {
            *weight = f(*weight);
        }
    }

    pub fn weight(&self, lambda: &str, destination: &str) -> Option<f64> {
        self.table
            .lock()
            .get(lambda)
            .and_then(|destinations| destinations.get(destination))
            .map(|(weight, _)| *weight)
    }
}

impl ForwardingTable for WeightedTable {
    fn change(&self, lambda: &str, destination: &str, weight: f64, is_final: bool) {
        let mut guard = self.table.lock();
        let destinations = guard.entry(lambda.to_string()).or_default();
        let added = destinations
            .insert(destination.to_string(), (weight, is_final))
            .is_none();
        if added {
            tracing::info!(lambda, destination, weight, is_final, "destination added");
        }
    }

    fn remove(&self, lambda: &str, destination: &str) {
        let mut guard = self.table.lock();
        if let Some(destinations) = guard.get_mut(lambda) {
            if destinations.remove(destination).is_some() {
                tracing::info!(lambda, destination, "destination removed");
            }
            if destinations.is_empty() {
                guard.remove(lambda);
                tracing::info!(lambda, "lambda now has no destinations");
            }
        }
    }

    fn remove_lambda(&self, lambda: &str) {
        if self.table.lock().remove(lambda).is_some() {
            tracing::info!(lambda, "removed all destinations");
        }
    }

    fn lambdas(&self) -> BTreeSet<String> {
        self.table.lock().keys().cloned().collect()
    }

    fn full_table(&self) -> BTreeMap<String, BTreeMap<String, (f64, bool)>> {
        self.table.lock().clone()
    }
}

/// Adapts the weights of a [`WeightedTable`] from the observed latencies:
/// on every success the weight of the responding destination moves towards
/// the inverse of the latency, with exponential smoothing.
pub struct LocalOptimizer {
    alpha: f64,
}

impl LocalOptimizer {
    pub fn new(alpha: f64) -> Self {
        Self { alpha }
    }

    /// Record a successful execution with the given latency, in seconds.
    pub fn on_success(
        &self,
        table: &WeightedTable,
        lambda: &str,
        destination: &str,
        elapsed: f64,
    ) {
        let target = 1.0 / elapsed.max(1e-6);
        table.update_weight(lambda, destination, |weight| {
            (1.0 - self.alpha) * weight + self.alpha * target
        });
    }
}

impl Default for LocalOptimizer {
    fn default() -> Self {
        // same smoothing factor as the multi-client delay tracking
        Self::new(0.05)
    }
}
