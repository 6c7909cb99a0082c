//! # Wire Protocol
//!
//! Messages exchanged between environment and browser.
//!
//! ## Message Layout
//!
//! ```text
//! ┌──────────┬───────────────────────────────────────────────┐
//! │ type: u8 │ body (layout per message type)                │
//! └──────────┴───────────────────────────────────────────────┘
//!
//! TrackingFrame (1): user, position, rotation, scale, bones[]
//! Transaction   (2): reliable, operations[] (each led by its kind code)
//! Interaction   (3): user, entity, kind, payload
//! ```
//!
//! Decoding goes through [`DecoderTable`]; a payload that fails anywhere is
//! discarded whole.

mod descriptor;
mod dispatch;
mod interaction;
mod operation;
mod tracking;
mod value;

pub use descriptor::{EntityDescriptor, ListDescriptor};
pub use dispatch::{DecodeFn, DecoderTable};
pub use interaction::{InteractionKind, InteractionRequest};
pub use operation::{Operation, Transaction, UserSet};
pub use tracking::{BoneSample, TrackingFrameMessage};
pub use value::{Color, PropertyValue, MAX_VALUE_DEPTH};

use umi3d_shared::MessageType;

use crate::codec::{ByteWriter, Encode};

/// Any message of the socket channel.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Avatar tracking frame
    TrackingFrame(TrackingFrameMessage),
    /// Batch of entity operations
    Transaction(Transaction),
    /// Interaction request
    Interaction(InteractionRequest),
}

impl Message {
    /// Wire type code.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::TrackingFrame(_) => MessageType::TrackingFrame,
            Self::Transaction(_) => MessageType::Transaction,
            Self::Interaction(_) => MessageType::Interaction,
        }
    }

    /// Encodes the message, type code first.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(64);
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

impl Encode for Message {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.message_type() as u8);
        match self {
            Self::TrackingFrame(frame) => frame.encode(writer),
            Self::Transaction(transaction) => transaction.encode(writer),
            Self::Interaction(request) => request.encode(writer),
        }
    }
}

impl From<TrackingFrameMessage> for Message {
    fn from(frame: TrackingFrameMessage) -> Self {
        Self::TrackingFrame(frame)
    }
}

impl From<Transaction> for Message {
    fn from(transaction: Transaction) -> Self {
        Self::Transaction(transaction)
    }
}

impl From<InteractionRequest> for Message {
    fn from(request: InteractionRequest) -> Self {
        Self::Interaction(request)
    }
}
