//! # Tick Loop
//!
//! Fixed timestep controller driving the environment.
//!
//! ```text
//! loop {
//!     while tick_loop.should_tick() {
//!         let start = tick_loop.begin_tick();
//!         server.tick(Instant::now());
//!         tick_loop.end_tick(start);
//!     }
//!     tick_loop.wait_for_next_tick();
//! }
//! ```

use std::time::{Duration, Instant};

use crate::config::ServerConfig;

/// Fixed timestep controller.
///
/// Late ticks are caught up by [`should_tick`](Self::should_tick) returning
/// true several times in a row.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    last_poll: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickStats {
    /// Shortest tick observed, in microseconds
    pub min_tick_us: u64,
    /// Longest tick observed, in microseconds
    pub max_tick_us: u64,
    /// Rolling average, in microseconds
    pub avg_tick_us: u64,
    /// Ticks that overran their budget
    pub late_ticks: u64,
    /// Ticks measured
    pub total_ticks: u64,
}

impl TickStats {
    fn fresh(budget: Duration) -> Self {
        Self {
            min_tick_us: u64::MAX,
            max_tick_us: 0,
            avg_tick_us: duration_micros(budget),
            late_ticks: 0,
            total_ticks: 0,
        }
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

impl TickLoop {
    /// Creates a loop running `tick_rate` times per second (at least once).
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_poll: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats::fresh(tick_duration),
        }
    }

    /// Creates a loop at the configured rate.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.tick_rate)
    }

    /// Returns true while a tick is due.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_poll);
        self.last_poll = now;
        self.accumulator >= self.tick_duration
    }

    /// Consumes one tick of accumulated time and returns the tick start.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Records the duration of the tick started at `start`.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let micros = duration_micros(duration);

        let stats = &mut self.stats;
        stats.total_ticks += 1;
        stats.min_tick_us = stats.min_tick_us.min(micros);
        stats.max_tick_us = stats.max_tick_us.max(micros);
        stats.avg_tick_us = (stats.avg_tick_us.saturating_mul(15).saturating_add(micros)) / 16;
        if duration > self.tick_duration {
            stats.late_ticks += 1;
            tracing::debug!(tick = self.tick_count, took_us = micros, "late tick");
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_poll.elapsed() + self.accumulator;
        if let Some(remaining) = self.tick_duration.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        }
    }

    /// Ticks begun so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }

    /// Clears the statistics.
    pub fn reset_stats(&mut self) {
        self.stats = TickStats::fresh(self.tick_duration);
    }
}

impl Default for TickLoop {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_rate() {
        assert_eq!(TickLoop::new(30).tick_duration(), Duration::from_micros(33_333));
        assert_eq!(TickLoop::new(0).tick_duration(), Duration::from_secs(1));
        assert_eq!(TickLoop::default().tick_count(), 0);
    }

    #[test]
    fn test_due_tick_runs() {
        let mut tick_loop = TickLoop::new(1_000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(tick_loop.should_tick());

        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);
        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
    }

    #[test]
    fn test_stats_reset() {
        let mut tick_loop = TickLoop::new(1_000);
        let start = tick_loop.begin_tick();
        std::thread::sleep(Duration::from_millis(2));
        tick_loop.end_tick(start);
        assert_eq!(tick_loop.stats().late_ticks, 1);

        tick_loop.reset_stats();
        assert_eq!(tick_loop.stats().total_ticks, 0);
        assert_eq!(tick_loop.stats().avg_tick_us, 1_000);
    }
}
