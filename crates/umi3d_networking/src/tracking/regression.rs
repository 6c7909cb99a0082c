//! Linear extrapolation between the last two filtered estimates.
//!
//! ```text
//!   value(δ) = previous + (current − previous) · R · δ
//! ```
//!
//! `R` is the observed arrival rate, recomputed at every estimate as
//! `1 / inter-arrival`. At `δ = 0` the value is `previous`, at `δ = 1/R` it
//! is `current`, and past that it keeps going on the same line up to the
//! configured horizon.

use std::time::{Duration, Instant};

/// Display-rate extrapolator for one channel.
#[derive(Clone, Debug)]
pub struct RegressionExtrapolator {
    previous: [f64; 3],
    current: [f64; 3],
    rate: f64,
    last_arrival: Option<Instant>,
    max_extrapolation: Duration,
}

impl RegressionExtrapolator {
    /// Creates an extrapolator that assumes `default_rate` (per second) until
    /// two estimates have arrived.
    #[must_use]
    pub const fn new(default_rate: f64, max_extrapolation: Duration) -> Self {
        Self {
            previous: [0.0; 3],
            current: [0.0; 3],
            rate: default_rate,
            last_arrival: None,
            max_extrapolation,
        }
    }

    /// Records a new filtered estimate.
    pub fn push(&mut self, estimate: [f64; 3], now: Instant) {
        match self.last_arrival {
            None => self.previous = estimate,
            Some(last) => {
                let interval = now.saturating_duration_since(last).as_secs_f64();
                // Two estimates in the same instant say nothing about the rate.
                if interval > 0.0 {
                    self.rate = interval.recip();
                }
                self.previous = self.current;
            }
        }
        self.current = estimate;
        self.last_arrival = Some(now);
    }

    /// Value `delta` after the last arrival, `delta` clamped to the horizon.
    #[must_use]
    pub fn value(&self, delta: Duration) -> [f64; 3] {
        let t = delta.min(self.max_extrapolation).as_secs_f64() * self.rate;
        let mut value = self.previous;
        for ((v, previous), current) in value.iter_mut().zip(self.previous).zip(self.current) {
            *v = previous + (current - previous) * t;
        }
        value
    }

    /// Value at `now`; `None` before the first estimate.
    #[must_use]
    pub fn value_at(&self, now: Instant) -> Option<[f64; 3]> {
        let last = self.last_arrival?;
        Some(self.value(now.saturating_duration_since(last)))
    }

    /// Estimate before the last one.
    #[must_use]
    pub const fn previous(&self) -> [f64; 3] {
        self.previous
    }

    /// Last estimate.
    #[must_use]
    pub const fn current(&self) -> [f64; 3] {
        self.current
    }

    /// Observed arrival rate, per second.
    #[must_use]
    pub const fn rate(&self) -> f64 {
        self.rate
    }

    /// Arrival of the last estimate.
    #[must_use]
    pub const fn last_arrival(&self) -> Option<Instant> {
        self.last_arrival
    }
}
