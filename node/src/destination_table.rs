//! A thread-safe two-level mapping from lambda and destination to a
//! per-pair descriptor, built lazily by a caller-provided factory.

use std::collections::BTreeMap;

use edgefab_types::EdgeError;
use parking_lot::Mutex;

type Factory<T> = Box<dyn Fn(&str, &str) -> T + Send + Sync>;

/// Map of lambda -> destination -> descriptor. A single mutex protects the
/// whole structure; all operations are serialized.
pub struct DestinationTable<T> {
    make: Factory<T>,
    descriptors: Mutex<BTreeMap<String, BTreeMap<String, T>>>,
}

impl<T> DestinationTable<T> {
    /// The factory is called exactly once per (lambda, destination) pair,
    /// upon insertion.
    pub fn new(make: impl Fn(&str, &str) -> T + Send + Sync + 'static) -> Self {
        Self {
            make: Box::new(make),
            descriptors: Mutex::new(BTreeMap::new()),
        }
    }

    /// Run a closure on the descriptor of the given pair.
    pub fn with<R>(
        &self,
        lambda: &str,
        destination: &str,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, EdgeError> {
        let mut guard = self.descriptors.lock();
        guard
            .get_mut(lambda)
            .and_then(|destinations| destinations.get_mut(destination))
            .map(f)
            .ok_or_else(|| EdgeError::InvalidDestination {
                lambda: lambda.to_string(),
                destination: destination.to_string(),
            })
    }

    /// The destination maximizing the objective over all the descriptors of
    /// a lambda, with its value. Ties are won by the smallest destination.
    pub fn best(
        &self,
        lambda: &str,
        mut objective: impl FnMut(&str, &mut T) -> f64,
    ) -> Result<(String, f64), EdgeError> {
        let mut guard = self.descriptors.lock();
        let destinations = guard
            .get_mut(lambda)
            .ok_or_else(|| EdgeError::NoDestinations(lambda.to_string()))?;

        let mut best: Option<(String, f64)> = None;
        for (destination, descriptor) in destinations.iter_mut() {
            let value = objective(destination, descriptor);
            tracing::trace!(lambda, %destination, value, "objective evaluated");
            if best.as_ref().map(|(_, current)| value > *current).unwrap_or(true) {
                best = Some((destination.clone(), value));
            }
        }
        Ok(best.expect("a lambda in the table has at least one destination"))
    }

    /// The objective for every destination of a lambda.
    pub fn all(
        &self,
        lambda: &str,
        mut objective: impl FnMut(&str, &mut T) -> f64,
    ) -> Result<BTreeMap<String, f64>, EdgeError> {
        let mut guard = self.descriptors.lock();
        let destinations = guard
            .get_mut(lambda)
            .ok_or_else(|| EdgeError::NoDestinations(lambda.to_string()))?;

        Ok(destinations
            .iter_mut()
            .map(|(destination, descriptor)| {
                (destination.clone(), objective(destination, descriptor))
            })
            .collect())
    }

    /// Add a pair. Returns true if an element was actually added.
    pub fn add(&self, lambda: &str, destination: &str) -> bool {
        let mut guard = self.descriptors.lock();
        let destinations = guard.entry(lambda.to_string()).or_default();
        if destinations.contains_key(destination) {
            return false;
        }
        destinations.insert(destination.to_string(), (self.make)(lambda, destination));
        true
    }

    /// Remove a pair. Returns true if an element was actually removed.
    /// When the last destination of a lambda goes, the lambda entry goes
    /// with it.
    pub fn remove(&self, lambda: &str, destination: &str) -> bool {
        let mut guard = self.descriptors.lock();
        let Some(destinations) = guard.get_mut(lambda) else {
            return false;
        };
        let removed = destinations.remove(destination).is_some();
        if destinations.is_empty() {
            guard.remove(lambda);
        }
        removed
    }

    /// All the lambdas currently in the table.
    pub fn lambdas(&self) -> Vec<String> {
        self.descriptors.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn table() -> DestinationTable<f64> {
        DestinationTable::new(|_, _| 0.0)
    }

    #[test]
    fn test_lazy_construction_and_membership() {
        let made = std::sync::Arc::new(Mutex::new(Vec::new()));
        let captured = made.clone();
        let table = DestinationTable::new(move |lambda: &str, dest: &str| {
            captured.lock().push((lambda.to_string(), dest.to_string()));
            0.0
        });
        assert!(table.add("f", "d1"));
        assert!(!table.add("f", "d1"));
        assert!(table.add("f", "d2"));

        // the factory ran exactly once per pair
        assert_eq!(
            vec![
                ("f".to_string(), "d1".to_string()),
                ("f".to_string(), "d2".to_string())
            ],
            made.lock().clone()
        );
        assert_eq!(vec!["f".to_string()], table.lambdas());
    }

    #[test]
    fn test_removing_the_last_destination_erases_the_lambda() {
        let table = table();
        table.add("f", "d1");
        table.add("f", "d2");

        assert!(table.remove("f", "d1"));
        assert_eq!(vec!["f".to_string()], table.lambdas());
        assert!(table.remove("f", "d2"));
        assert!(table.lambdas().is_empty());

        assert!(!table.remove("f", "d2"));
        assert!(!table.remove("g", "d1"));
    }

    #[test]
    fn test_with_unknown_pair() {
        let table = table();
        table.add("f", "d1");

        assert!(table.with("f", "d1", |_| ()).is_ok());
        assert!(matches!(
            table.with("f", "dX", |_| ()),
            Err(EdgeError::InvalidDestination { .. })
        ));
        assert!(table.with("g", "d1", |_| ()).is_err());
    }

    #[test]
    fn test_best_and_all() {
        let table = table();
        assert!(matches!(
            table.best("f", |_, _| 0.0),
            Err(EdgeError::NoDestinations(_))
        ));
        assert!(table.all("f", |_, _| 0.0).is_err());

        table.add("f", "d1");
        table.add("f", "d2");
        table.add("f", "d3");

        let values =
            BTreeMap::from([("d1", 1.0), ("d2", 3.0), ("d3", 2.0)]);
        let objective = |dest: &str, _: &mut f64| values[dest];

        assert_eq!(("d2".to_string(), 3.0), table.best("f", objective).unwrap());
        assert_eq!(
            BTreeMap::from([
                ("d1".to_string(), 1.0),
                ("d2".to_string(), 3.0),
                ("d3".to_string(), 2.0)
            ]),
            table.all("f", objective).unwrap()
        );
    }

    #[test]
    fn test_best_ties_won_by_smallest_destination() {
        let table = table();
        table.add("f", "d2");
        table.add("f", "d1");
        assert_eq!(
            ("d1".to_string(), 7.0),
            table.best("f", |_, _| 7.0).unwrap()
        );
    }
}
