//! Full state of one entity as seen by one user.

use umi3d_shared::PropertyKey;

use super::value::PropertyValue;
use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::entity::EntityId;

/// A list property with its version stamp.
#[derive(Clone, Debug, PartialEq)]
pub struct ListDescriptor {
    /// Property key
    pub key: PropertyKey,
    /// Version for the describing audience
    pub version: u32,
    /// Items
    pub items: Vec<PropertyValue>,
}

/// Payload of `LoadEntity` and of `/load` responses.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityDescriptor {
    /// Entity
    pub id: EntityId,
    /// Parent, `None` for scene roots
    pub parent: Option<EntityId>,
    /// Scalar properties, sorted by key
    pub properties: Vec<(PropertyKey, PropertyValue)>,
    /// List properties, sorted by key
    pub lists: Vec<ListDescriptor>,
}

impl EntityDescriptor {
    /// Looks up a scalar property.
    #[must_use]
    pub fn property(&self, key: PropertyKey) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find_map(|(k, value)| (*k == key).then_some(value))
    }

    /// Looks up a list property.
    #[must_use]
    pub fn list(&self, key: PropertyKey) -> Option<&ListDescriptor> {
        self.lists.iter().find(|list| list.key == key)
    }
}

impl Encode for ListDescriptor {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.key);
        writer.write_u32(self.version);
        self.items.encode(writer);
    }
}

impl Decode for ListDescriptor {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            key: reader.read_u32()?,
            version: reader.read_u32()?,
            items: Vec::decode(reader)?,
        })
    }
}

impl Encode for EntityDescriptor {
    fn encode(&self, writer: &mut ByteWriter) {
        self.id.encode(writer);
        self.parent.encode(writer);
        writer.write_len(self.properties.len());
        for (key, value) in &self.properties {
            writer.write_u32(*key);
            value.encode(writer);
        }
        self.lists.encode(writer);
    }
}

impl Decode for EntityDescriptor {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        let id = EntityId::decode(reader)?;
        let parent = Option::<EntityId>::decode(reader)?;
        // key plus value tag
        let count = reader.read_len(5)?;
        let mut properties = Vec::with_capacity(count);
        for _ in 0..count {
            properties.push((reader.read_u32()?, PropertyValue::decode(reader)?));
        }
        Some(Self {
            id,
            parent,
            properties,
            lists: Vec::decode(reader)?,
        })
    }
}
