//! Registration table from wire type code to decode function.

use umi3d_shared::MessageType;

use super::{InteractionRequest, Message, TrackingFrameMessage, Transaction};
use crate::codec::{ByteReader, Decode};
use crate::error::{CodecError, CodecResult};

/// Decodes a message body (the type code already consumed).
pub type DecodeFn = fn(&mut ByteReader<'_>) -> Option<Message>;

#[derive(Clone, Copy)]
struct DecoderEntry {
    name: &'static str,
    decode: DecodeFn,
}

/// Type code → decoder lookup.
///
/// Receivers never inspect a decoded value to find out what it is; they
/// dispatch on the code they read.
#[derive(Clone)]
pub struct DecoderTable {
    entries: [Option<DecoderEntry>; 256],
}

impl DecoderTable {
    /// Table with no decoder registered.
    #[must_use]
    pub const fn empty() -> Self {
        Self { entries: [None; 256] }
    }

    /// Table with every message type of this protocol.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(MessageType::TrackingFrame, "tracking frame", |reader| {
            TrackingFrameMessage::decode(reader).map(Message::TrackingFrame)
        });
        table.register(MessageType::Transaction, "transaction", |reader| {
            Transaction::decode(reader).map(Message::Transaction)
        });
        table.register(MessageType::Interaction, "interaction", |reader| {
            InteractionRequest::decode(reader).map(Message::Interaction)
        });
        table
    }

    /// Registers a decoder, returning true if it replaced another one.
    pub fn register(&mut self, code: MessageType, name: &'static str, decode: DecodeFn) -> bool {
        self.entries[code as usize]
            .replace(DecoderEntry { name, decode })
            .is_some()
    }

    /// Returns true if a decoder handles `code`.
    #[must_use]
    pub fn handles(&self, code: u8) -> bool {
        self.entries[usize::from(code)].is_some()
    }

    /// Decodes one complete payload.
    ///
    /// The payload must be consumed exactly; a message with leftover bytes
    /// is as malformed as a truncated one.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Message> {
        let (&code, _) = bytes.split_first().ok_or(CodecError::Empty)?;
        let entry = self.entries[usize::from(code)].ok_or(CodecError::UnknownMessageType(code))?;

        let mut reader = ByteReader::new(bytes);
        let _ = reader.read_u8();
        let message = (entry.decode)(&mut reader).ok_or(CodecError::Unreadable {
            what: entry.name,
            offset: reader.position(),
        })?;

        match reader.remaining() {
            0 => Ok(message),
            trailing => Err(CodecError::TrailingBytes(trailing)),
        }
    }
}

impl Default for DecoderTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for DecoderTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .enumerate()
                    .filter_map(|(code, entry)| entry.map(|e| (code, e.name))),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::UserId;

    #[test]
    fn test_standard_table_round_trips_a_frame() {
        let table = DecoderTable::standard();
        let message = Message::TrackingFrame(TrackingFrameMessage::new(UserId(4)));
        assert_eq!(table.decode(&message.to_bytes()), Ok(message));
    }

    #[test]
    fn test_rejections() {
        let table = DecoderTable::standard();
        assert_eq!(table.decode(&[]), Err(CodecError::Empty));
        assert_eq!(table.decode(&[77]), Err(CodecError::UnknownMessageType(77)));
        assert!(matches!(
            table.decode(&[MessageType::Transaction as u8, 1]),
            Err(CodecError::Unreadable { what: "transaction", .. })
        ));

        let mut bytes = Message::Transaction(Transaction::default()).to_bytes();
        bytes.push(0);
        assert_eq!(table.decode(&bytes), Err(CodecError::TrailingBytes(1)));
    }

    #[test]
    fn test_empty_table_knows_nothing() {
        let table = DecoderTable::empty();
        let bytes = Message::Transaction(Transaction::default()).to_bytes();
        assert!(!table.handles(bytes[0]));
        assert_eq!(
            table.decode(&bytes),
            Err(CodecError::UnknownMessageType(MessageType::Transaction as u8))
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut table = DecoderTable::standard();
        let replaced = table.register(MessageType::Interaction, "ignored", |_| None);
        assert!(replaced);
        assert!(table.handles(MessageType::Interaction as u8));
    }
}
