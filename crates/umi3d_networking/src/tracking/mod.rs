//! # Avatar Tracking
//!
//! Smooths and redistributes avatar tracking under lossy, variable latency
//! delivery.
//!
//! ```text
//! SkeletonSource ──> TrackingSender ──> TrackingFrame ──> network
//!                                                           │
//! AvatarRenderer <── RegressionExtrapolator <── UKF <── TrackingReceiver
//! ```
//!
//! Every (user, node, quantity) gets its own [`KalmanChannel`]: a 3-state
//! unscented Kalman filter followed by a linear extrapolator running at the
//! observed arrival rate. The avatar root uses the loose
//! [`KalmanNoise::ROOT`](crate::config::KalmanNoise::ROOT) preset, bones the
//! tight [`KalmanNoise::BONE`](crate::config::KalmanNoise::BONE) one.

pub mod binding;
pub mod channel;
pub mod dispatcher;
pub mod kalman;
pub mod regression;

pub use binding::{Binding, BindingResolver, BindingTargets};
pub use channel::{ChannelKind, KalmanChannel};
pub use dispatcher::{
    AvatarPose, AvatarRenderer, BonePose, ChannelKey, FrameReport, SkeletonSource, TrackedNode, TrackingReceiver,
    TrackingSender,
};
pub use kalman::UnscentedKalmanFilter;
pub use regression::RegressionExtrapolator;
