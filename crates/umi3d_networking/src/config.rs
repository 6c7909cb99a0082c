//! # Configuration
//!
//! One TOML file configures the whole networking stack. Every field has a
//! default, so an empty file (or no file) is a valid configuration.
//!
//! ```toml
//! [server]
//! tick_rate = 30
//!
//! [batcher]
//! flush_interval_ms = 33
//! max_operations = 256
//!
//! [tracking.root]
//! q = 50.0
//! r = 0.5
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use umi3d_shared::constants::{
    BONE_MEASUREMENT_NOISE, BONE_PROCESS_NOISE, DEFAULT_TRACKING_RATE, ROOT_MEASUREMENT_NOISE,
    ROOT_PROCESS_NOISE,
};
use umi3d_shared::{DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PORT, MAX_USERS, TICK_RATE};

use crate::error::ConfigError;

/// Root configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Umi3dConfig {
    /// Environment server settings.
    pub server: ServerConfig,
    /// Transaction batching budgets.
    pub batcher: BatcherConfig,
    /// Tracking send/receive settings.
    pub tracking: TrackingConfig,
    /// Binding resolution policy.
    pub binding: BindingConfig,
    /// Background worker settings.
    pub background: BackgroundConfig,
}

impl Umi3dConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Environment server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Environment name announced by `/media`.
    pub name: String,
    /// Ticks per second.
    pub tick_rate: u32,
    /// Maximum number of simultaneous users.
    pub max_users: usize,
    /// HTTP port.
    pub http_port: u16,
    /// Socket port.
    pub socket_port: u16,
    /// Ticks without traffic before a user is dropped (0 disables).
    pub user_timeout_ticks: u64,
    /// Maximum pending update payloads kept per polling user.
    pub max_pending_updates: usize,
    /// Capacity of the network event and command channels.
    pub channel_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "umi3d environment".to_string(),
            tick_rate: TICK_RATE,
            max_users: MAX_USERS,
            http_port: DEFAULT_HTTP_PORT,
            socket_port: DEFAULT_SOCKET_PORT,
            user_timeout_ticks: u64::from(TICK_RATE) * 30,
            max_pending_updates: 64,
            channel_capacity: 10_000,
        }
    }
}

/// Transaction batching budgets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Flush when the oldest pending operation is this old (0 disables).
    pub flush_interval_ms: u64,
    /// Flush before accumulating beyond this many operations (0 disables).
    pub max_operations: usize,
}

impl BatcherConfig {
    /// Flush interval as a duration.
    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 1_000 / TICK_RATE as u64,
            max_operations: 256,
        }
    }
}

/// Process and measurement noise of one Kalman channel, as standard deviations.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KalmanNoise {
    /// Process noise.
    pub q: f64,
    /// Measurement noise.
    pub r: f64,
}

impl KalmanNoise {
    /// Loose filter for the fast-moving avatar root.
    pub const ROOT: Self = Self {
        q: ROOT_PROCESS_NOISE,
        r: ROOT_MEASUREMENT_NOISE,
    };

    /// Tight filter for fine bone detail.
    pub const BONE: Self = Self {
        q: BONE_PROCESS_NOISE,
        r: BONE_MEASUREMENT_NOISE,
    };
}

/// Tracking send/receive settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum time between two skeleton samples (0 samples every tick).
    pub sample_interval_ms: u64,
    /// Minimum time between two transmissions (0 disables the time throttle).
    pub send_interval_ms: u64,
    /// Transmit every N ticks (0 disables the count throttle).
    pub send_every_n_ticks: u32,
    /// Arrival rate assumed before two frames were seen.
    pub default_rate_hz: f64,
    /// Maximum extrapolation past the last estimate.
    pub max_extrapolation_ms: u64,
    /// Root node filter.
    pub root: KalmanNoise,
    /// Bone filter.
    pub bones: KalmanNoise,
}

impl TrackingConfig {
    /// Sampling cooldown.
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Send throttle.
    #[must_use]
    pub const fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    /// Extrapolation horizon.
    #[must_use]
    pub const fn max_extrapolation(&self) -> Duration {
        Duration::from_millis(self.max_extrapolation_ms)
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 0,
            send_interval_ms: 1_000 / 15,
            send_every_n_ticks: 0,
            default_rate_hz: DEFAULT_TRACKING_RATE,
            max_extrapolation_ms: 500,
            root: KalmanNoise::ROOT,
            bones: KalmanNoise::BONE,
        }
    }
}

/// Binding resolution policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingConfig {
    /// Resolution attempts before a binding is reported unresolved.
    pub max_attempts: u32,
    /// Upper bound of the exponential backoff, in fixed updates.
    pub max_backoff_updates: u32,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            max_backoff_updates: 50,
        }
    }
}

/// Background worker settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// How often workers drain their input queue.
    pub poll_interval_ms: u64,
    /// Maximum queued items before producers see backpressure.
    pub queue_capacity: usize,
}

impl BackgroundConfig {
    /// Drain interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 20,
            queue_capacity: 4_096,
        }
    }
}
