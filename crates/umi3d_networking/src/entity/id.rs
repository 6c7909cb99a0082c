//! Entity identifiers.

use serde::{Deserialize, Serialize};
use umi3d_shared::EntityCategory;

use crate::codec::{ByteReader, ByteWriter, Decode, Encode};

/// Identifier of an entity, unique for the lifetime of an environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    /// Category the serial was drawn from
    pub category: EntityCategory,
    /// Per-category serial, starting at 1
    pub serial: u64,
}

impl EntityId {
    /// Creates an identifier.
    #[must_use]
    pub const fn new(category: EntityCategory, serial: u64) -> Self {
        Self { category, serial }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.category.prefix(), self.serial)
    }
}

impl std::str::FromStr for EntityId {
    type Err = ();

    /// Parses the display form, `object3d_12`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (prefix, serial) = text.rsplit_once('_').ok_or(())?;
        let category = EntityCategory::ALL
            .into_iter()
            .find(|category| category.prefix() == prefix)
            .ok_or(())?;
        Ok(Self::new(category, serial.parse().map_err(|_| ())?))
    }
}

impl Encode for EntityId {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.category as u8);
        writer.write_u64(self.serial);
    }
}

impl Decode for EntityId {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        let category = EntityCategory::from_u8(reader.read_u8()?)?;
        Some(Self::new(category, reader.read_u64()?))
    }
}

/// Hands out identifiers, monotonically per category.
///
/// Serials are never reused, even after the entity is removed.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    next: [u64; EntityCategory::ALL.len()],
}

impl IdAllocator {
    /// Creates an allocator whose first serial is 1 in every category.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: [1; EntityCategory::ALL.len()],
        }
    }

    /// Returns a fresh identifier.
    pub fn allocate(&mut self, category: EntityCategory) -> EntityId {
        let slot = &mut self.next[category as usize];
        let serial = *slot;
        *slot += 1;
        EntityId::new(category, serial)
    }

    /// Number of identifiers handed out in `category`.
    #[must_use]
    pub const fn allocated(&self, category: EntityCategory) -> u64 {
        self.next[category as usize] - 1
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(EntityId::new(EntityCategory::Object3D, 3).to_string(), "object3d_3");
        assert_eq!(EntityId::new(EntityCategory::Other, 1).to_string(), "entity_1");
    }

    #[test]
    fn test_parse_display_form() {
        let id = EntityId::new(EntityCategory::Interactable, 42);
        assert_eq!(id.to_string().parse::<EntityId>(), Ok(id));
        assert!("object3d".parse::<EntityId>().is_err());
        assert!("planet_1".parse::<EntityId>().is_err());
        assert!("node_x".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_allocation_is_per_category() {
        let mut ids = IdAllocator::new();
        assert_eq!(ids.allocate(EntityCategory::Object3D).serial, 1);
        assert_eq!(ids.allocate(EntityCategory::Object3D).serial, 2);
        assert_eq!(ids.allocate(EntityCategory::Material).serial, 1);
        assert_eq!(ids.allocated(EntityCategory::Object3D), 2);
        assert_eq!(ids.allocated(EntityCategory::Tool), 0);
    }
}
