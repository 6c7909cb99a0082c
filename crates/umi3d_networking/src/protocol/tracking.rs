//! Avatar tracking frames.

use umi3d_shared::{BoneType, Quaternion, Vec3};

use crate::codec::{ByteReader, ByteWriter, Decode, Encode};
use crate::server::UserId;

/// One bone of a tracking frame, in local space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneSample {
    /// Joint
    pub bone: BoneType,
    /// Local position
    pub position: Vec3,
    /// Local rotation
    pub rotation: Quaternion,
    /// Local scale
    pub scale: Vec3,
    /// Whether a device currently drives this bone
    pub tracked: bool,
}

impl BoneSample {
    /// A tracked sample with unit scale.
    #[must_use]
    pub const fn tracked(bone: BoneType, position: Vec3, rotation: Quaternion) -> Self {
        Self {
            bone,
            position,
            rotation,
            scale: Vec3::ONE,
            tracked: true,
        }
    }
}

/// Snapshot of one user's avatar, timestamped by arrival.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingFrameMessage {
    /// Owner of the avatar
    pub user: UserId,
    /// Root position
    pub position: Vec3,
    /// Root rotation
    pub rotation: Quaternion,
    /// Root scale
    pub scale: Vec3,
    /// Bones, each bone type at most once
    pub bones: Vec<BoneSample>,
}

impl TrackingFrameMessage {
    /// Empty frame at the origin.
    #[must_use]
    pub const fn new(user: UserId) -> Self {
        Self {
            user,
            position: Vec3::ZERO,
            rotation: Quaternion::IDENTITY,
            scale: Vec3::ONE,
            bones: Vec::new(),
        }
    }

    /// Looks up a bone sample.
    #[must_use]
    pub fn bone(&self, bone: BoneType) -> Option<&BoneSample> {
        self.bones.iter().find(|sample| sample.bone == bone)
    }
}

impl Encode for BoneSample {
    fn encode(&self, writer: &mut ByteWriter) {
        self.bone.encode(writer);
        self.position.encode(writer);
        self.rotation.encode(writer);
        self.scale.encode(writer);
        writer.write_bool(self.tracked);
    }
}

impl Decode for BoneSample {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            bone: BoneType::decode(reader)?,
            position: Vec3::decode(reader)?,
            rotation: Quaternion::decode(reader)?,
            scale: Vec3::decode(reader)?,
            tracked: reader.read_bool()?,
        })
    }
}

impl Encode for TrackingFrameMessage {
    fn encode(&self, writer: &mut ByteWriter) {
        self.user.encode(writer);
        self.position.encode(writer);
        self.rotation.encode(writer);
        self.scale.encode(writer);
        self.bones.encode(writer);
    }
}

impl Decode for TrackingFrameMessage {
    fn decode(reader: &mut ByteReader<'_>) -> Option<Self> {
        Some(Self {
            user: UserId::decode(reader)?,
            position: Vec3::decode(reader)?,
            rotation: Quaternion::decode(reader)?,
            scale: Vec3::decode(reader)?,
            bones: Vec::decode(reader)?,
        })
    }
}
