//! # Network Constants
//!
//! Default values baked into both sides of the connection. Every one of them
//! can be overridden through the networking configuration file.

// =============================================================================
// NETWORK CONFIGURATION
// =============================================================================

/// Default HTTP port for the environment's REST surface
pub const DEFAULT_HTTP_PORT: u16 = 50_043;

/// Default port for the real-time socket channel
pub const DEFAULT_SOCKET_PORT: u16 = 50_044;

/// Environment tick rate (updates per second)
pub const TICK_RATE: u32 = 30;

/// Maximum users per environment
pub const MAX_USERS: usize = 256;

/// Version string announced in the media descriptor
pub const PROTOCOL_VERSION: &str = "2.6";

// =============================================================================
// TRACKING
// =============================================================================

/// Rate assumed before two tracking frames have been observed (frames/second)
pub const DEFAULT_TRACKING_RATE: f64 = 15.0;

/// Root node process noise (standard deviation)
pub const ROOT_PROCESS_NOISE: f64 = 50.0;

/// Root node measurement noise (standard deviation)
pub const ROOT_MEASUREMENT_NOISE: f64 = 0.5;

/// Bone process noise (standard deviation)
pub const BONE_PROCESS_NOISE: f64 = 0.001;

/// Bone measurement noise (standard deviation)
pub const BONE_MEASUREMENT_NOISE: f64 = 0.001;
