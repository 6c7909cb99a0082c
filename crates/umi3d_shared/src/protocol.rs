//! Wire codes shared between environment and browser.
//!
//! Both sides must agree on these definitions. Codes are explicit so that a
//! receiver dispatches on the number it read, never on a runtime type.

use serde::{Deserialize, Serialize};

/// Property identifier within an entity.
pub type PropertyKey = u32;

/// Top-level message type code (first byte of every socket payload).
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Avatar tracking frame
    TrackingFrame = 1,
    /// Ordered batch of entity operations
    Transaction = 2,
    /// Browser-originated interaction request
    Interaction = 3,
}

impl MessageType {
    /// Converts from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::TrackingFrame),
            2 => Some(Self::Transaction),
            3 => Some(Self::Interaction),
            _ => None,
        }
    }
}

/// Operation kind code inside a transaction.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Replace a property value
    SetEntityProperty = 1,
    /// Replace one item of a list property
    SetEntityListItem = 2,
    /// Insert one item into a list property
    AddEntityListItem = 3,
    /// Remove one item from a list property
    RemoveEntityListItem = 4,
    /// Destroy an entity
    DeleteEntity = 5,
    /// Create (or refresh) an entity
    LoadEntity = 6,
}

impl OperationKind {
    /// Converts from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::SetEntityProperty),
            2 => Some(Self::SetEntityListItem),
            3 => Some(Self::AddEntityListItem),
            4 => Some(Self::RemoveEntityListItem),
            5 => Some(Self::DeleteEntity),
            6 => Some(Self::LoadEntity),
            _ => None,
        }
    }

    /// Structural operations change the shape of the scene or of a list and
    /// must travel on the reliable path.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::AddEntityListItem | Self::RemoveEntityListItem | Self::DeleteEntity | Self::LoadEntity
        )
    }
}

/// Type tag written in front of every property value.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueTag {
    /// Boolean
    Bool = 1,
    /// Signed 32-bit integer
    Int = 2,
    /// 32-bit float
    Float = 3,
    /// UTF-8 string
    Text = 4,
    /// Three floats
    Vec3 = 5,
    /// Four floats, `[x, y, z, w]`
    Quaternion = 6,
    /// Four floats, `[r, g, b, a]`
    Color = 7,
    /// Reference to another entity
    Entity = 8,
    /// Homogeneous or heterogeneous list of values
    List = 9,
}

impl ValueTag {
    /// Converts from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Bool),
            2 => Some(Self::Int),
            3 => Some(Self::Float),
            4 => Some(Self::Text),
            5 => Some(Self::Vec3),
            6 => Some(Self::Quaternion),
            7 => Some(Self::Color),
            8 => Some(Self::Entity),
            9 => Some(Self::List),
            _ => None,
        }
    }
}

/// Entity category. Identifiers are assigned monotonically per category.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityCategory {
    /// Scene root
    Scene = 0,
    /// Generic 3D object
    Object3D = 1,
    /// Sub-node of a model
    Node = 2,
    /// Material
    Material = 3,
    /// Interactable
    Interactable = 4,
    /// Tool
    Tool = 5,
    /// User avatar
    Avatar = 6,
    /// Anything else
    Other = 7,
}

impl EntityCategory {
    /// Every category, in code order.
    pub const ALL: [Self; 8] = [
        Self::Scene,
        Self::Object3D,
        Self::Node,
        Self::Material,
        Self::Interactable,
        Self::Tool,
        Self::Avatar,
        Self::Other,
    ];

    /// Converts from u8
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Scene),
            1 => Some(Self::Object3D),
            2 => Some(Self::Node),
            3 => Some(Self::Material),
            4 => Some(Self::Interactable),
            5 => Some(Self::Tool),
            6 => Some(Self::Avatar),
            7 => Some(Self::Other),
            _ => None,
        }
    }

    /// Prefix used when displaying identifiers (`object3d_12`).
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Scene => "scene",
            Self::Object3D => "object3d",
            Self::Node => "node",
            Self::Material => "material",
            Self::Interactable => "interactable",
            Self::Tool => "tool",
            Self::Avatar => "avatar",
            Self::Other => "entity",
        }
    }
}

/// Well-known property keys.
pub mod keys {
    use super::PropertyKey;

    /// Display name
    pub const NAME: PropertyKey = 1;
    /// Per-user activity; inactive entities are hidden from `/load`
    pub const ACTIVE: PropertyKey = 2;
    /// Local position
    pub const POSITION: PropertyKey = 3;
    /// Local rotation
    pub const ROTATION: PropertyKey = 4;
    /// Local scale
    pub const SCALE: PropertyKey = 5;
    /// Scene ambient color
    pub const AMBIENT_COLOR: PropertyKey = 7;
    /// Material references of a model
    pub const MATERIALS: PropertyKey = 8;
    /// Whether the entity can be picked by interactions
    pub const INTERACTABLE: PropertyKey = 9;
    /// First key available to applications
    pub const USER_DEFINED: PropertyKey = 1_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_discriminants() {
        for kind in [
            OperationKind::SetEntityProperty,
            OperationKind::SetEntityListItem,
            OperationKind::AddEntityListItem,
            OperationKind::RemoveEntityListItem,
            OperationKind::DeleteEntity,
            OperationKind::LoadEntity,
        ] {
            assert_eq!(OperationKind::from_u8(kind as u8), Some(kind));
        }
        for category in EntityCategory::ALL {
            assert_eq!(EntityCategory::from_u8(category as u8), Some(category));
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(ValueTag::from_u8(42), None);
    }

    #[test]
    fn test_structural_kinds() {
        assert!(OperationKind::LoadEntity.is_structural());
        assert!(OperationKind::DeleteEntity.is_structural());
        assert!(!OperationKind::SetEntityProperty.is_structural());
        assert!(!OperationKind::SetEntityListItem.is_structural());
    }
}
