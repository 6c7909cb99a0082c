//! One filtered channel of one tracked node.

use std::time::Instant;

use umi3d_shared::math::wrap_degrees;
use umi3d_shared::{Quaternion, Vec3};

use super::kalman::UnscentedKalmanFilter;
use super::regression::RegressionExtrapolator;
use crate::config::{KalmanNoise, TrackingConfig};

/// Quantity a channel filters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// Position, in meters
    Position,
    /// Rotation, as Euler angles in degrees
    Rotation,
}

/// Filter and extrapolator state of one (user, node, kind).
///
/// Rotation measurements are unwrapped against the current estimate before
/// filtering, so a reading crossing 0°/360° is seen as a small step.
#[derive(Clone, Debug)]
pub struct KalmanChannel {
    kind: ChannelKind,
    filter: UnscentedKalmanFilter,
    extrapolator: RegressionExtrapolator,
    last_measurement: Option<[f64; 3]>,
}

impl KalmanChannel {
    /// Creates an empty channel.
    #[must_use]
    pub fn new(kind: ChannelKind, noise: KalmanNoise, config: &TrackingConfig) -> Self {
        Self {
            kind,
            filter: UnscentedKalmanFilter::new(noise),
            extrapolator: RegressionExtrapolator::new(config.default_rate_hz, config.max_extrapolation()),
            last_measurement: None,
        }
    }

    /// Feeds one raw measurement and returns the new estimate.
    pub fn observe(&mut self, measurement: [f64; 3], now: Instant) -> [f64; 3] {
        let filtered_input = match self.kind {
            ChannelKind::Rotation if self.filter.is_initialized() => {
                unwrap_angles(measurement, self.filter.state())
            }
            _ => measurement,
        };
        self.filter.update(filtered_input);
        let estimate = self.filter.state();
        self.extrapolator.push(estimate, now);
        self.last_measurement = Some(measurement);
        estimate
    }

    /// Position measurement.
    pub fn observe_position(&mut self, position: Vec3, now: Instant) -> [f64; 3] {
        self.observe(position.to_f64(), now)
    }

    /// Rotation measurement.
    pub fn observe_rotation(&mut self, rotation: Quaternion, now: Instant) -> [f64; 3] {
        self.observe(rotation.to_euler_degrees().to_f64(), now)
    }

    /// Filtered estimate after the last measurement.
    #[must_use]
    pub fn state(&self) -> [f64; 3] {
        self.filter.state()
    }

    /// Display value at `now`, falling back to the estimate.
    #[must_use]
    pub fn sample(&self, now: Instant) -> [f64; 3] {
        let value = self.extrapolator.value_at(now).unwrap_or_else(|| self.filter.state());
        match self.kind {
            ChannelKind::Position => value,
            ChannelKind::Rotation => value.map(wrap_degrees),
        }
    }

    /// Display position at `now`.
    #[must_use]
    pub fn sample_position(&self, now: Instant) -> Vec3 {
        Vec3::from_f64(self.sample(now))
    }

    /// Display rotation at `now`.
    #[must_use]
    pub fn sample_rotation(&self, now: Instant) -> Quaternion {
        Quaternion::from_euler_degrees(Vec3::from_f64(self.sample(now)))
    }

    /// What this channel filters.
    #[must_use]
    pub const fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Last raw measurement.
    #[must_use]
    pub const fn last_measurement(&self) -> Option<[f64; 3]> {
        self.last_measurement
    }

    /// Underlying filter.
    #[must_use]
    pub const fn filter(&self) -> &UnscentedKalmanFilter {
        &self.filter
    }

    /// Underlying extrapolator.
    #[must_use]
    pub const fn extrapolator(&self) -> &RegressionExtrapolator {
        &self.extrapolator
    }
}

/// Moves each angle by whole turns to within half a turn of `reference`.
fn unwrap_angles(angles: [f64; 3], reference: [f64; 3]) -> [f64; 3] {
    let mut unwrapped = angles;
    for (angle, reference) in unwrapped.iter_mut().zip(reference) {
        let mut step = wrap_degrees(*angle - reference);
        if step > 180.0 {
            step -= 360.0;
        }
        *angle = reference + step;
    }
    unwrapped
}
