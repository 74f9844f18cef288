//! Least-squares linear regression over a bounded sliding window of
//! samples, with an optional staleness timeout.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

struct Sample {
    x: f64,
    y: f64,
    when: Instant,
}

/// A bounded window of (x, y) samples. On query it extrapolates y at a
/// given x by least-squares linear regression over the non-stale window, or
/// returns 0 if fewer than two samples remain.
pub struct LinearEstimator {
    window_size: usize,
    stale_period: Option<Duration>,
    samples: VecDeque<Sample>,
}

impl LinearEstimator {
    pub fn new(window_size: usize, stale_period: Option<Duration>) -> Self {
        Self {
            window_size: window_size.max(1),
            stale_period,
            samples: VecDeque::new(),
        }
    }

    pub fn add(&mut self, x: f64, y: f64) {
        self.samples.push_back(Sample {
            x,
            y,
            when: Instant::now(),
        });
        while self.samples.len() > self.window_size {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Extrapolate y at the given x. Purges the stale samples first.
    pub fn extrapolate(&mut self, x: f64) -> f64 {
        self.purge();

        if self.samples.len() < 2 {
            return 0.0;
        }

        let n = self.samples.len() as f64;
        let sum_x: f64 = self.samples.iter().map(|s| s.x).sum();
        let sum_y: f64 = self.samples.iter().map(|s| s.y).sum();
        let sum_xx: f64 = self.samples.iter().map(|s| s.x * s.x).sum();
        let sum_xy: f64 = self.samples.iter().map(|s| s.x * s.y).sum();

        let denominator = n * sum_xx - sum_x * sum_x;
        if denominator.abs() < f64::EPSILON {
            // all samples at the same x: the best guess is their mean
            return sum_y / n;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denominator;
        let intercept = (sum_y - slope * sum_x) / n;
        slope * x + intercept
    }

    fn purge(&mut self) {
        let Some(stale_period) = self.stale_period else {
            return;
        };
        let now = Instant::now();
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.when) < stale_period {
                break;
            }
            self.samples.pop_front();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_too_few_samples_yield_zero() {
        let mut estimator = LinearEstimator::new(10, None);
        assert_eq!(0.0, estimator.extrapolate(100.0));
        estimator.add(1.0, 1.0);
        assert_eq!(0.0, estimator.extrapolate(100.0));
    }

    #[test]
    fn test_exact_fit() {
        let mut estimator = LinearEstimator::new(10, None);
        estimator.add(100.0, 10.0);
        estimator.add(200.0, 20.0);
        estimator.add(300.0, 30.0);

        let prediction = estimator.extrapolate(250.0);
        assert!((prediction - 25.0).abs() < 1e-9, "got {prediction}");
    }

    #[test]
    fn test_window_evicts_the_oldest_sample() {
        let mut estimator = LinearEstimator::new(3, None);
        estimator.add(100.0, 10.0);
        estimator.add(200.0, 20.0);
        estimator.add(300.0, 30.0);

        // shift to a completely different regime: after enough samples the
        // early ones no longer influence the prediction
        for _ in 0..4 {
            estimator.add(100.0, 1000.0);
        }
        assert_eq!(3, estimator.len());
        let prediction = estimator.extrapolate(100.0);
        assert!((prediction - 1000.0).abs() < 1e-6, "got {prediction}");
    }

    #[test]
    fn test_same_x_yields_mean() {
        let mut estimator = LinearEstimator::new(10, None);
        estimator.add(5.0, 10.0);
        estimator.add(5.0, 30.0);
        assert!((estimator.extrapolate(42.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_samples_are_purged() {
        let mut estimator = LinearEstimator::new(10, Some(Duration::from_millis(10)));
        estimator.add(100.0, 10.0);
        estimator.add(200.0, 20.0);
        assert!(estimator.extrapolate(150.0) > 0.0);

        std::thread::sleep(Duration::from_millis(20));
        // a purged window falls back to 0
        assert_eq!(0.0, estimator.extrapolate(150.0));
        assert!(estimator.is_empty());
    }
}
