//! Browser-originated interaction requests.

use serde::{Deserialize, Serialize};

use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::entity::EntityId;
use crate::server::UserId;

/// What the user did to the entity.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    /// One-shot trigger
    Trigger = 1,
    /// Pointer entered
    HoverEnter = 2,
    /// Pointer left
    HoverExit = 3,
    /// Continuous manipulation step, payload carries the delta
    Manipulation = 4,
    /// Form or parameter submission, payload carries the value
    Parameter = 5,
}

impl InteractionKind {
    /// Converts from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Trigger),
            2 => Some(Self::HoverEnter),
            3 => Some(Self::HoverExit),
            4 => Some(Self::Manipulation),
            5 => Some(Self::Parameter),
            _ => None,
        }
    }
}

/// A client request to interact with an entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InteractionRequest {
    /// Requesting user
    pub user: UserId,
    /// Target entity
    pub entity: EntityId,
    /// Interaction
    pub kind: InteractionKind,
    /// Kind-specific bytes
    pub payload: Vec<u8>,
}

impl Encode for InteractionRequest {
    fn encode(&self, writer: &mut ByteWriter) {
        self.user.encode(writer);
        self.entity.encode(writer);
        writer.write_u8(self.kind as u8);
        writer.write_len(self.payload.len());
        writer.write_bytes(&self.payload);
    }
}

impl Decode for InteractionRequest {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        let user = UserId::decode(reader)?;
        let entity = EntityId::decode(reader)?;
        let kind = InteractionKind::from_u8(reader.read_u8()?)?;
        let len = reader.read_len(1)?;
        let payload = reader.read_bytes(len)?.to_vec();
        Some(Self {
            user,
            entity,
            kind,
            payload,
        })
    }
}
