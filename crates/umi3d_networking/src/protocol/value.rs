//! Type-tagged property values.

use umi3d_shared::{Quaternion, ValueTag, Vec3};

use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::entity::EntityId;

/// Deepest list nesting a decoder accepts.
pub const MAX_VALUE_DEPTH: usize = 8;

/// RGBA color, components in `[0, 1]`.
pub type Color = [f32; 4];

/// Value of one entity property.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i32),
    /// Float
    Float(f32),
    /// UTF-8 text
    Text(String),
    /// Vector
    Vec3(Vec3),
    /// Rotation
    Quaternion(Quaternion),
    /// Color
    Color(Color),
    /// Reference to another entity
    Entity(EntityId),
    /// List of values
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Wire tag of this value.
    #[must_use]
    pub const fn tag(&self) -> ValueTag {
        match self {
            Self::Bool(_) => ValueTag::Bool,
            Self::Int(_) => ValueTag::Int,
            Self::Float(_) => ValueTag::Float,
            Self::Text(_) => ValueTag::Text,
            Self::Vec3(_) => ValueTag::Vec3,
            Self::Quaternion(_) => ValueTag::Quaternion,
            Self::Color(_) => ValueTag::Color,
            Self::Entity(_) => ValueTag::Entity,
            Self::List(_) => ValueTag::List,
        }
    }

    /// Returns the referenced entity, if this is an entity reference.
    #[must_use]
    pub const fn as_entity(&self) -> Option<EntityId> {
        match self {
            Self::Entity(id) => Some(*id),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the items, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[PropertyValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    fn decode_nested(reader: &mut ByteReader<'_>, depth: usize) -> Option<Self> {
        let start = reader.position();
        let value = match ValueTag::from_u8(reader.read_u8()?) {
            Some(ValueTag::Bool) => reader.read_bool().map(Self::Bool),
            Some(ValueTag::Int) => reader.read_i32().map(Self::Int),
            Some(ValueTag::Float) => reader.read_f32().map(Self::Float),
            Some(ValueTag::Text) => String::decode(reader).map(Self::Text),
            Some(ValueTag::Vec3) => Vec3::decode(reader).map(Self::Vec3),
            Some(ValueTag::Quaternion) => Quaternion::decode(reader).map(Self::Quaternion),
            Some(ValueTag::Color) => read_color(reader).map(Self::Color),
            Some(ValueTag::Entity) => EntityId::decode(reader).map(Self::Entity),
            Some(ValueTag::List) if depth < MAX_VALUE_DEPTH => {
                // A nested value is at least its tag byte.
                reader.read_len(1).and_then(|count| {
                    let mut items = Vec::with_capacity(count);
                    for _ in 0..count {
                        items.push(Self::decode_nested(reader, depth + 1)?);
                    }
                    Some(Self::List(items))
                })
            }
            Some(ValueTag::List) | None => None,
        };
        if value.is_none() {
            tracing::trace!(offset = start, "unreadable property value");
        }
        value
    }
}

fn read_color(reader: &mut ByteReader<'_>) -> Option<Color> {
    Some([
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_f32()?,
        reader.read_f32()?,
    ])
}

impl Encode for PropertyValue {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u8(self.tag() as u8);
        match self {
            Self::Bool(value) => writer.write_bool(*value),
            Self::Int(value) => writer.write_i32(*value),
            Self::Float(value) => writer.write_f32(*value),
            Self::Text(value) => value.encode(writer),
            Self::Vec3(value) => value.encode(writer),
            Self::Quaternion(value) => value.encode(writer),
            Self::Color(rgba) => rgba.iter().for_each(|c| writer.write_f32(*c)),
            Self::Entity(id) => id.encode(writer),
            Self::List(items) => items.encode(writer),
        }
    }
}

impl Decode for PropertyValue {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Self::decode_nested(reader, 0)
    }
}

macro_rules! impl_from_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_value! {
    bool => Bool,
    i32 => Int,
    f32 => Float,
    String => Text,
    Vec3 => Vec3,
    Quaternion => Quaternion,
    Color => Color,
    EntityId => Entity,
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<PropertyValue>> From<Vec<T>> for PropertyValue {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::to_bytes;
    use umi3d_shared::EntityCategory;

    #[test]
    fn test_tag_leads_payload() {
        let bytes = to_bytes(&PropertyValue::Int(-2));
        assert_eq!(bytes[0], ValueTag::Int as u8);
        assert_eq!(&bytes[1..], &(-2i32).to_le_bytes());
    }

    #[test]
    fn test_nested_list_decodes() {
        let value = PropertyValue::List(vec![
            PropertyValue::Entity(EntityId::new(EntityCategory::Material, 4)),
            PropertyValue::List(vec![PropertyValue::Text("x".into())]),
        ]);
        let bytes = to_bytes(&value);
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(PropertyValue::decode(&mut reader), Some(value));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_unknown_tag_and_excessive_depth_are_rejected() {
        let mut reader = ByteReader::new(&[200, 0, 0]);
        assert!(PropertyValue::decode(&mut reader).is_none());

        let mut deep = PropertyValue::Bool(true);
        for _ in 0..=MAX_VALUE_DEPTH {
            deep = PropertyValue::List(vec![deep]);
        }
        let bytes = to_bytes(&deep);
        let mut reader = ByteReader::new(&bytes);
        assert!(PropertyValue::decode(&mut reader).is_none());
    }
}
