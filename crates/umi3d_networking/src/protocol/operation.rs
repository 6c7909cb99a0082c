//! Entity operations and the transactions that carry them.
//!
//! Operations replay current values. Applying one twice converges to the
//! same state as applying it once; list edits carry a version stamp so the
//! receiver can tell a replay from a gap.

use std::collections::BTreeSet;

use umi3d_shared::{OperationKind, PropertyKey};

use super::descriptor::EntityDescriptor;
use super::value::PropertyValue;
use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::entity::EntityId;
use crate::server::UserId;

/// Users an operation is addressed to.
///
/// Audiences are resolved by the server when a transaction is split per
/// user; they never travel on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum UserSet {
    /// Every connected user.
    #[default]
    All,
    /// Only these users.
    Only(BTreeSet<UserId>),
    /// Every user except these.
    AllExcept(BTreeSet<UserId>),
}

impl UserSet {
    /// Audience of exactly one user.
    #[must_use]
    pub fn only(user: UserId) -> Self {
        Self::Only(BTreeSet::from([user]))
    }

    /// Returns true if `user` is addressed.
    #[must_use]
    pub fn contains(&self, user: UserId) -> bool {
        match self {
            Self::All => true,
            Self::Only(users) => users.contains(&user),
            Self::AllExcept(users) => !users.contains(&user),
        }
    }

    /// Returns true if nobody can be addressed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Only(users) if users.is_empty())
    }
}

/// One atomic instruction on an entity.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Replace a property value.
    SetEntityProperty {
        /// Target entity
        entity: EntityId,
        /// Property
        key: PropertyKey,
        /// New value
        value: PropertyValue,
        /// Audience
        users: UserSet,
    },
    /// Replace one list item.
    SetEntityListItem {
        /// Target entity
        entity: EntityId,
        /// List property
        key: PropertyKey,
        /// Item position
        index: u32,
        /// New item
        value: PropertyValue,
        /// List version after the edit
        version: u32,
        /// Audience
        users: UserSet,
    },
    /// Insert one list item.
    AddEntityListItem {
        /// Target entity
        entity: EntityId,
        /// List property
        key: PropertyKey,
        /// Insert position
        index: u32,
        /// Inserted item
        value: PropertyValue,
        /// List version after the edit
        version: u32,
        /// Audience
        users: UserSet,
    },
    /// Remove one list item.
    RemoveEntityListItem {
        /// Target entity
        entity: EntityId,
        /// List property
        key: PropertyKey,
        /// Removed position
        index: u32,
        /// List version after the edit
        version: u32,
        /// Audience
        users: UserSet,
    },
    /// Destroy an entity and its subtree.
    DeleteEntity {
        /// Target entity
        entity: EntityId,
        /// Audience
        users: UserSet,
    },
    /// Create or refresh an entity.
    LoadEntity {
        /// Target entity
        entity: EntityId,
        /// Full state, as seen by the addressed user
        descriptor: Option<EntityDescriptor>,
        /// Audience
        users: UserSet,
    },
}

impl Operation {
    /// Wire kind code.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        match self {
            Self::SetEntityProperty { .. } => OperationKind::SetEntityProperty,
            Self::SetEntityListItem { .. } => OperationKind::SetEntityListItem,
            Self::AddEntityListItem { .. } => OperationKind::AddEntityListItem,
            Self::RemoveEntityListItem { .. } => OperationKind::RemoveEntityListItem,
            Self::DeleteEntity { .. } => OperationKind::DeleteEntity,
            Self::LoadEntity { .. } => OperationKind::LoadEntity,
        }
    }

    /// Entity the operation targets.
    #[must_use]
    pub const fn entity(&self) -> EntityId {
        match self {
            Self::SetEntityProperty { entity, .. }
            | Self::SetEntityListItem { entity, .. }
            | Self::AddEntityListItem { entity, .. }
            | Self::RemoveEntityListItem { entity, .. }
            | Self::DeleteEntity { entity, .. }
            | Self::LoadEntity { entity, .. } => *entity,
        }
    }

    /// Audience of the operation.
    #[must_use]
    pub const fn users(&self) -> &UserSet {
        match self {
            Self::SetEntityProperty { users, .. }
            | Self::SetEntityListItem { users, .. }
            | Self::AddEntityListItem { users, .. }
            | Self::RemoveEntityListItem { users, .. }
            | Self::DeleteEntity { users, .. }
            | Self::LoadEntity { users, .. } => users,
        }
    }

    /// Returns true if the operation must travel on the reliable path.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        self.kind().is_structural()
    }

    /// Returns the operation readdressed to `users`.
    #[must_use]
    pub fn addressed_to(mut self, audience: UserSet) -> Self {
        match &mut self {
            Self::SetEntityProperty { users, .. }
            | Self::SetEntityListItem { users, .. }
            | Self::AddEntityListItem { users, .. }
            | Self::RemoveEntityListItem { users, .. }
            | Self::DeleteEntity { users, .. }
            | Self::LoadEntity { users, .. } => *users = audience,
        }
        self
    }
}

impl Encode for Operation {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.kind() as u8);
        match self {
            Self::SetEntityProperty { entity, key, value, .. } => {
                entity.encode(writer);
                writer.write_u32(*key);
                value.encode(writer);
            }
            Self::SetEntityListItem { entity, key, index, value, version, .. }
            | Self::AddEntityListItem { entity, key, index, value, version, .. } => {
                entity.encode(writer);
                writer.write_u32(*key);
                writer.write_u32(*index);
                writer.write_u32(*version);
                value.encode(writer);
            }
            Self::RemoveEntityListItem { entity, key, index, version, .. } => {
                entity.encode(writer);
                writer.write_u32(*key);
                writer.write_u32(*index);
                writer.write_u32(*version);
            }
            Self::DeleteEntity { entity, .. } => entity.encode(writer),
            Self::LoadEntity { entity, descriptor, .. } => {
                entity.encode(writer);
                descriptor.encode(writer);
            }
        }
    }
}

impl Decode for Operation {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        let users = UserSet::All;
        let operation = match OperationKind::from_u8(reader.read_u8()?)? {
            OperationKind::SetEntityProperty => Self::SetEntityProperty {
                entity: EntityId::decode(reader)?,
                key: reader.read_u32()?,
                value: PropertyValue::decode(reader)?,
                users,
            },
            OperationKind::SetEntityListItem => Self::SetEntityListItem {
                entity: EntityId::decode(reader)?,
                key: reader.read_u32()?,
                index: reader.read_u32()?,
                version: reader.read_u32()?,
                value: PropertyValue::decode(reader)?,
                users,
            },
            OperationKind::AddEntityListItem => Self::AddEntityListItem {
                entity: EntityId::decode(reader)?,
                key: reader.read_u32()?,
                index: reader.read_u32()?,
                version: reader.read_u32()?,
                value: PropertyValue::decode(reader)?,
                users,
            },
            OperationKind::RemoveEntityListItem => Self::RemoveEntityListItem {
                entity: EntityId::decode(reader)?,
                key: reader.read_u32()?,
                index: reader.read_u32()?,
                version: reader.read_u32()?,
                users,
            },
            OperationKind::DeleteEntity => Self::DeleteEntity {
                entity: EntityId::decode(reader)?,
                users,
            },
            OperationKind::LoadEntity => Self::LoadEntity {
                entity: EntityId::decode(reader)?,
                descriptor: Option::<EntityDescriptor>::decode(reader)?,
                users,
            },
        };
        Some(operation)
    }
}

/// Ordered batch of operations sent as one network unit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transaction {
    /// Delivered on the reliable path.
    pub reliable: bool,
    /// Operations, applied in order.
    pub operations: Vec<Operation>,
}

impl Transaction {
    /// Builds a transaction, reliable if any operation is structural.
    #[must_use]
    pub fn from_operations(operations: Vec<Operation>) -> Self {
        let reliable = operations.iter().any(Operation::is_structural);
        Self { reliable, operations }
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if the transaction carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl Encode for Transaction {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_bool(self.reliable);
        self.operations.encode(writer);
    }
}

impl Decode for Transaction {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            reliable: reader.read_bool()?,
            operations: Vec::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_bytes;
    use umi3d_shared::{keys, EntityCategory};

    fn cube() -> EntityId {
        EntityId::new(EntityCategory::Object3D, 3)
    }

    #[test]
    fn test_user_set_membership() {
        let a = UserId(1);
        let b = UserId(2);
        assert!(UserSet::All.contains(a));
        assert!(UserSet::only(a).contains(a));
        assert!(!UserSet::only(a).contains(b));
        assert!(!UserSet::AllExcept(BTreeSet::from([a])).contains(a));
        assert!(UserSet::AllExcept(BTreeSet::from([a])).contains(b));
        assert!(UserSet::Only(BTreeSet::new()).is_empty());
    }

    #[test]
    fn test_audience_is_not_on_the_wire() {
        let op = Operation::SetEntityProperty {
            entity: cube(),
            key: keys::NAME,
            value: "cube".into(),
            users: UserSet::only(UserId(9)),
        };
        let bytes = to_bytes(&op);
        let mut reader = ByteReader::new(&bytes);
        let decoded = Operation::decode(&mut reader).unwrap();
        assert_eq!(decoded, op.clone().addressed_to(UserSet::All));
        assert_eq!(bytes, to_bytes(&op.addressed_to(UserSet::All)));
    }

    #[test]
    fn test_reliability_follows_structure() {
        let set = Operation::SetEntityProperty {
            entity: cube(),
            key: keys::POSITION,
            value: PropertyValue::Float(1.0),
            users: UserSet::All,
        };
        assert!(!Transaction::from_operations(vec![set.clone()]).reliable);

        let delete = Operation::DeleteEntity {
            entity: cube(),
            users: UserSet::All,
        };
        assert!(Transaction::from_operations(vec![set, delete]).reliable);
    }

    #[test]
    fn test_unknown_operation_kind_is_unreadable() {
        let mut reader = ByteReader::new(&[99, 1, 0, 0, 0]);
        assert!(Operation::decode(&mut reader).is_none());
    }
}
