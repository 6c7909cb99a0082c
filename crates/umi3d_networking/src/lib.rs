//! # UMI3D Networking
//!
//! Entity synchronization and avatar tracking for shared 3D environments.
//!
//! ## Architecture
//!
//! This crate implements both ends of an environment:
//!
//! - **Codec**: little-endian binary values, explicit wire codes
//! - **Entities**: authoritative registry of per-user properties, and the
//!   read-only mirror clients keep of it
//! - **Transactions**: operations batched under a time and a count budget
//! - **Tracking**: unscented Kalman filtering followed by regression
//!   extrapolation, per bone and per quantity
//! - **Server / Client**: tick orchestration, HTTP routes, socket messages
//!
//! ## Data Flow
//!
//! ```text
//! ENVIRONMENT                                   BROWSER
//!   registry ──> batcher ──> Transaction ──────> mirror ──> renderer
//!                                 ▲
//!   relay <──────────── TrackingFrame <──────── sender <── skeleton
//!     └──────────────── TrackingFrame ────────> receiver ──> renderer
//! ```
//!
//! Nothing here is global: the caller owns the server, its registry, the
//! batcher and the tracking receiver, and passes them where they are needed.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Instant;
//! use umi3d_networking::{EntityDraft, EnvironmentServer, TickLoop, Umi3dConfig};
//! use umi3d_shared::EntityCategory;
//!
//! let config = Umi3dConfig::default();
//! let mut tick_loop = TickLoop::from_config(&config.server);
//! let (mut server, _network) = EnvironmentServer::new(config);
//! server
//!     .registry_mut()
//!     .register(EntityDraft::new(EntityCategory::Scene).with_name("lobby"));
//!
//! loop {
//!     while tick_loop.should_tick() {
//!         let start = tick_loop.begin_tick();
//!         server.tick(Instant::now());
//!         tick_loop.end_tick(start);
//!     }
//!     tick_loop.wait_for_next_tick();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod background;
pub mod client;
pub mod codec;
pub mod config;
pub mod entity;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tracking;
pub mod transaction;

// Re-exports for convenience
pub use client::{ClientState, ClientTick, EnvironmentClient};
pub use config::Umi3dConfig;
pub use entity::{EntityDraft, EntityId, EntityMirror, EntityRegistry, MutationOutcome};
pub use error::{CodecError, ConfigError, NetworkError, RecorderError, ServerError, TrackingError};
pub use protocol::{DecoderTable, Message, Operation, PropertyValue, TrackingFrameMessage, Transaction, UserSet};
pub use server::{EnvironmentServer, NetworkCommand, NetworkEvent, TickLoop, UserId};
pub use tracking::{KalmanChannel, TrackingReceiver, TrackingSender, UnscentedKalmanFilter};
pub use transaction::{TransactionBatcher, TransactionSink};
