//! # Networking Error Types
//!
//! All errors that can cross a module boundary in this crate.
//!
//! Lookup misses are not errors: registries and mirrors answer them with
//! `Option` or an outcome enum so that a disconnecting user never turns into
//! a failure on the tick thread.

use std::path::PathBuf;

use thiserror::Error;
use umi3d_shared::BoneType;

use crate::entity::EntityId;
use crate::server::UserId;

/// Errors raised while decoding a wire payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A read ran past the end of the buffer or hit an invalid encoding.
    #[error("unreadable {what} at byte {offset}")]
    Unreadable {
        /// What was being read.
        what: &'static str,
        /// Reader position when the read failed.
        offset: usize,
    },

    /// The leading type code has no registered decoder.
    #[error("unknown message type code {0}")]
    UnknownMessageType(u8),

    /// The message decoded but bytes were left over.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    /// Empty payload.
    #[error("empty payload")]
    Empty,
}

/// Errors raised by the tracking pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// A frame carried the same bone type twice.
    #[error("bone {0} appears twice in one frame")]
    DuplicateBone(BoneType),

    /// A binding target never became resolvable within the retry budget.
    #[error("binding of {target} to {bone} for user {user} unresolved after {attempts} attempts")]
    BindingUnresolved {
        /// Owner of the bone.
        user: UserId,
        /// Bone the target should follow.
        bone: BoneType,
        /// External object that never appeared.
        target: u64,
        /// Number of resolution attempts made.
        attempts: u32,
    },
}

/// Errors raised when handing data to the transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The transport is closed.
    #[error("network unavailable")]
    Unavailable,

    /// The outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,
}

/// Errors raised by the environment server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Request referenced a user that is not connected.
    #[error("unknown user {0}")]
    UnknownUser(UserId),

    /// Request referenced an entity that does not exist.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// The environment is full.
    #[error("environment full: {0} users")]
    Full(usize),

    /// A payload could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(#[from] CodecError),

    /// A previously established invariant does not hold anymore.
    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that was read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised by the background recorder.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// Opening or reading the recording failed.
    #[error("recording i/o on {path}: {source}")]
    Io {
        /// Recording file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The recorder queue is full (backpressure).
    #[error("recorder buffer full")]
    BufferFull,

    /// A recorded frame could not be decoded.
    #[error("corrupt recording: {0}")]
    Corrupt(#[from] CodecError),
}

/// Result type for decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
