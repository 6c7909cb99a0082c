//! # Byte Codec
//!
//! Binary (de)serialization of primitive and composite values.
//!
//! ## Wire Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Integers / floats   little-endian, fixed width               │
//! │ bool                one byte, 0 or 1 (anything else fails)   │
//! │ String              u32 byte length + UTF-8 bytes            │
//! │ Vec<T>              u32 item count + items                   │
//! │ Option<T>           bool presence flag + item                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writing never fails. Every read returns `None` when the bytes cannot be
//! read; the caller discards the whole message and applies nothing.

mod reader;
mod writer;

pub use reader::ByteReader;
pub use writer::ByteWriter;

use umi3d_shared::{BoneType, Quaternion, Transform, Vec3};

use crate::error::{CodecError, CodecResult};

/// A value that can be written to the wire.
pub trait Encode {
    /// Appends the encoded value.
    fn encode(&self, writer: &mut ByteWriter);
}

/// A value that can be read from the wire.
pub trait Decode: Sized {
    /// Reads one value, `None` if unreadable.
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self>;
}

/// Encodes a value into a fresh buffer.
#[must_use]
pub fn to_bytes<T: Encode + ?Sized>(value: &T) -> Vec<u8> {
    let mut writer = ByteWriter::new();
    value.encode(&mut writer);
    writer.into_bytes()
}

/// Decodes one value that must span the whole buffer.
pub fn from_bytes<T: Decode>(bytes: &[u8], what: &'static str) -> CodecResult<T> {
    let mut reader = ByteReader::new(bytes);
    let value = T::decode(&mut reader).ok_or(CodecError::Unreadable {
        what,
        offset: reader.position(),
    })?;
    match reader.remaining() {
        0 => Ok(value),
        trailing => Err(CodecError::TrailingBytes(trailing)),
    }
}

macro_rules! impl_le_number {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl Encode for $ty {
                #[inline]
                fn encode(&self, writer: &mut ByteWriter) {
                    writer.$write(*self);
                }
            }

            impl Decode for $ty {
                #[inline]
                fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
                    reader.$read()
                }
            }
        )*
    };
}

impl_le_number! {
    u8 => write_u8, read_u8;
    u16 => write_u16, read_u16;
    u32 => write_u32, read_u32;
    u64 => write_u64, read_u64;
    i32 => write_i32, read_i32;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
    bool => write_bool, read_bool;
}

impl Encode for str {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_len(self.len());
        writer.write_bytes(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, writer: &mut ByteWriter) {
        self.as_str().encode(writer);
    }
}

impl Decode for String {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        let len = reader.read_len(1)?;
        let bytes = reader.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_len(self.len());
        for item in self {
            item.encode(writer);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, writer: &mut ByteWriter) {
        self.as_slice().encode(writer);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        // Every item takes at least one byte, which bounds the allocation.
        let count = reader.read_len(1)?;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(T::decode(reader)?);
        }
        Some(items)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_bool(self.is_some());
        if let Some(value) = self {
            value.encode(writer);
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        if reader.read_bool()? {
            T::decode(reader).map(Some)
        } else {
            Some(None)
        }
    }
}

impl Encode for Vec3 {
    fn encode(&self, writer: &mut ByteWriter) {
        for component in self.to_array() {
            writer.write_f32(component);
        }
    }
}

impl Decode for Vec3 {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?))
    }
}

impl Encode for Quaternion {
    fn encode(&self, writer: &mut ByteWriter) {
        for component in self.to_array() {
            writer.write_f32(component);
        }
    }
}

impl Decode for Quaternion {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Quaternion::new(
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
            reader.read_f32()?,
        ))
    }
}

impl Encode for Transform {
    fn encode(&self, writer: &mut ByteWriter) {
        self.position.encode(writer);
        self.rotation.encode(writer);
        self.scale.encode(writer);
    }
}

impl Decode for Transform {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Transform::new(
            Vec3::decode(reader)?,
            Quaternion::decode(reader)?,
            Vec3::decode(reader)?,
        ))
    }
}

impl Encode for BoneType {
    fn encode(&self, writer: &mut ByteWriter) {
        writer.write_u32(self.0);
    }
}

impl Decode for BoneType {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        reader.read_u32().map(BoneType)
    }
}
