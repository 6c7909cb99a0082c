//! # UMI3D Shared
//!
//! Common types used by both the environment server and the browser client.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - sockets, threads or the filesystem
//! - any rendering collaborator
//!
//! If you need transport or state, put it in `umi3d_networking`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bones;
pub mod constants;
pub mod math;
pub mod protocol;

pub use bones::BoneType;
pub use constants::{DEFAULT_HTTP_PORT, DEFAULT_SOCKET_PORT, TICK_RATE, MAX_USERS};
pub use math::{Quaternion, Transform, Vec3};
pub use protocol::{keys, EntityCategory, MessageType, OperationKind, PropertyKey, ValueTag};
