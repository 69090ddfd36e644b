//! Response time calculators.
//!
//! A [`Calculator`] folds each newly observed round trip duration into a
//! running estimate, which the [`LeastResponseTime`][crate::LeastResponseTime]
//! policy compares across transports. Every transport gets its own calculator,
//! so calculator state is never shared between transports.

use std::time::Duration;

use crate::error::CalculatorError;

/// Fold observed round trip durations into a running estimate.
pub trait Calculator: Send + 'static {
    /// Record a new sample and return the updated estimate.
    fn observe(&mut self, sample: Duration) -> Duration;
}

/// The estimate is always the most recent sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastValue;

impl Calculator for LastValue {
    fn observe(&mut self, sample: Duration) -> Duration {
        sample
    }
}

/// Arithmetic mean of the last `window` samples.
///
/// Every sample inside the window carries equal weight. With a window of 3,
/// samples of 100ms, 150ms, 200ms and 120ms produce estimates of 100ms,
/// 125ms, 150ms and then 156.67ms, once the first sample falls out of the
/// window.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    samples: Box<[Duration]>,
    next: usize,
    filled: usize,
    sum: Duration,
}

impl MovingAverage {
    /// Create a moving average over the last `window` samples.
    ///
    /// The window must hold between 1 and `u32::MAX` samples.
    pub fn new(window: usize) -> Result<Self, CalculatorError> {
        if window == 0 || u32::try_from(window).is_err() {
            return Err(CalculatorError::InvalidWindowSize(window));
        }

        Ok(Self {
            samples: vec![Duration::ZERO; window].into_boxed_slice(),
            next: 0,
            filled: 0,
            sum: Duration::ZERO,
        })
    }

    /// Number of samples the average spans once full.
    pub fn window(&self) -> usize {
        self.samples.len()
    }
}

impl Calculator for MovingAverage {
    fn observe(&mut self, sample: Duration) -> Duration {
        let slot = &mut self.samples[self.next];
        self.sum = self.sum.saturating_sub(*slot).saturating_add(sample);
        *slot = sample;

        self.next = (self.next + 1) % self.samples.len();
        self.filled = (self.filled + 1).min(self.samples.len());

        // `filled` never exceeds the window, which `new` bounds to u32.
        self.sum / self.filled as u32
    }
}

/// Exponentially weighted average.
///
/// The first sample seeds the estimate. After that each new estimate is
/// `weight * sample + (1 - weight) * previous`, so a higher weight reacts
/// faster to recent changes while older samples decay but never vanish.
///
/// With a weight of 0.8, samples of 100ms, 200ms, 150ms and 50ms produce
/// estimates of 100ms, 180ms, 156ms and 71.2ms.
#[derive(Debug, Clone)]
pub struct WeightedAverage {
    weight: f64,
    previous: Option<Duration>,
}

impl WeightedAverage {
    /// Create a weighted average which gives `weight` to each new sample.
    pub fn new(weight: f64) -> Result<Self, CalculatorError> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(CalculatorError::InvalidWeight(weight));
        }

        Ok(Self {
            weight,
            previous: None,
        })
    }

    /// The weight given to each new sample.
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

impl Default for WeightedAverage {
    fn default() -> Self {
        Self {
            weight: 0.75,
            previous: None,
        }
    }
}

impl Calculator for WeightedAverage {
    fn observe(&mut self, sample: Duration) -> Duration {
        let estimate = match self.previous {
            None => sample,
            Some(previous) => {
                let nanos = self.weight * sample.as_nanos() as f64
                    + (1.0 - self.weight) * previous.as_nanos() as f64;
                Duration::from_nanos(nanos.round() as u64)
            }
        };

        self.previous = Some(estimate);
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn estimates<C: Calculator>(mut calculator: C, samples: &[u64]) -> Vec<Duration> {
        samples
            .iter()
            .map(|&sample| calculator.observe(ms(sample)))
            .collect()
    }

    #[test]
    fn last_value() {
        assert_eq!(
            estimates(LastValue, &[100, 50, 150]),
            vec![ms(100), ms(50), ms(150)]
        );
    }

    #[test]
    fn moving_average_window() {
        let calculator = MovingAverage::new(3).unwrap();
        assert_eq!(
            estimates(calculator, &[100, 200, 300, 400]),
            vec![ms(100), ms(150), ms(200), ms(300)]
        );
    }

    #[test]
    fn moving_average_single_sample_window() {
        let calculator = MovingAverage::new(1).unwrap();
        assert_eq!(estimates(calculator, &[150, 20]), vec![ms(150), ms(20)]);
    }

    #[test]
    fn moving_average_uneven() {
        let calculator = MovingAverage::new(3).unwrap();
        let result = estimates(calculator, &[100, 150, 200, 120]);
        assert_eq!(result[1], ms(125));
        assert_eq!(result[2], ms(150));
        assert_eq!(result[3].as_micros(), 156_666);
    }

    #[test]
    fn moving_average_rejects_empty_window() {
        assert_eq!(
            MovingAverage::new(0).unwrap_err(),
            CalculatorError::InvalidWindowSize(0)
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn moving_average_rejects_oversized_window() {
        let window = u32::MAX as usize + 1;
        assert_eq!(
            MovingAverage::new(window).unwrap_err(),
            CalculatorError::InvalidWindowSize(window)
        );
    }

    #[test]
    fn weighted_average() {
        let calculator = WeightedAverage::new(0.8).unwrap();
        assert_eq!(
            estimates(calculator, &[100, 200, 150, 50]),
            vec![ms(100), ms(180), ms(156), Duration::from_micros(71_200)]
        );
    }

    #[test]
    fn weighted_average_high_weight() {
        let calculator = WeightedAverage::new(0.9).unwrap();
        let result = estimates(calculator, &[100, 200, 300]);
        assert_eq!(result.last(), Some(&ms(289)));
    }

    #[test]
    fn weighted_average_seeds_from_zero_sample() {
        let mut calculator = WeightedAverage::new(0.5).unwrap();
        assert_eq!(calculator.observe(Duration::ZERO), Duration::ZERO);
        assert_eq!(calculator.observe(ms(100)), ms(50));
    }

    #[test]
    fn weighted_average_bounds() {
        assert!(WeightedAverage::new(0.0).is_ok());
        assert!(WeightedAverage::new(1.0).is_ok());
        assert_eq!(
            WeightedAverage::new(1.5).unwrap_err(),
            CalculatorError::InvalidWeight(1.5)
        );
        assert!(matches!(
            WeightedAverage::new(-0.1),
            Err(CalculatorError::InvalidWeight(_))
        ));
        assert!(WeightedAverage::new(f64::NAN).is_err());
    }
}
