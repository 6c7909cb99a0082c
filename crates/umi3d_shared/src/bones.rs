//! Skeletal joint identifiers carried in tracking frames.
//!
//! A bone type is an opaque small integer on the wire. Only the values listed
//! in [`BoneType::ALL`] are accepted by receivers.

use serde::{Deserialize, Serialize};

/// Identifier of a skeletal joint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoneType(pub u32);

macro_rules! bone_types {
    ($($name:ident = $value:literal, $label:literal;)*) => {
        impl BoneType {
            $(
                #[doc = concat!("The ", $label, " joint.")]
                pub const $name: Self = Self($value);
            )*

            /// Every bone type a receiver accepts.
            pub const ALL: &'static [Self] = &[$(Self::$name),*];

            /// Human readable name, `None` for unknown values.
            #[must_use]
            pub const fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some($label),)*
                    _ => None,
                }
            }
        }
    };
}

bone_types! {
    HIPS = 1, "hips";
    LEFT_UPPER_LEG = 2, "left upper leg";
    RIGHT_UPPER_LEG = 3, "right upper leg";
    LEFT_LOWER_LEG = 4, "left lower leg";
    RIGHT_LOWER_LEG = 5, "right lower leg";
    LEFT_FOOT = 6, "left foot";
    RIGHT_FOOT = 7, "right foot";
    SPINE = 8, "spine";
    CHEST = 9, "chest";
    NECK = 10, "neck";
    HEAD = 11, "head";
    LEFT_SHOULDER = 12, "left shoulder";
    RIGHT_SHOULDER = 13, "right shoulder";
    LEFT_UPPER_ARM = 14, "left upper arm";
    RIGHT_UPPER_ARM = 15, "right upper arm";
    LEFT_FOREARM = 16, "left forearm";
    RIGHT_FOREARM = 17, "right forearm";
    LEFT_HAND = 18, "left hand";
    RIGHT_HAND = 19, "right hand";
    LEFT_TOE_BASE = 20, "left toe base";
    RIGHT_TOE_BASE = 21, "right toe base";
    LEFT_EYE = 22, "left eye";
    RIGHT_EYE = 23, "right eye";
    JAW = 24, "jaw";
    LEFT_THUMB_PROXIMAL = 25, "left thumb proximal";
    LEFT_THUMB_INTERMEDIATE = 26, "left thumb intermediate";
    LEFT_THUMB_DISTAL = 27, "left thumb distal";
    LEFT_INDEX_PROXIMAL = 28, "left index proximal";
    LEFT_INDEX_INTERMEDIATE = 29, "left index intermediate";
    LEFT_INDEX_DISTAL = 30, "left index distal";
    LEFT_MIDDLE_PROXIMAL = 31, "left middle proximal";
    LEFT_MIDDLE_INTERMEDIATE = 32, "left middle intermediate";
    LEFT_MIDDLE_DISTAL = 33, "left middle distal";
    LEFT_RING_PROXIMAL = 34, "left ring proximal";
    LEFT_RING_INTERMEDIATE = 35, "left ring intermediate";
    LEFT_RING_DISTAL = 36, "left ring distal";
    LEFT_LITTLE_PROXIMAL = 37, "left little proximal";
    LEFT_LITTLE_INTERMEDIATE = 38, "left little intermediate";
    LEFT_LITTLE_DISTAL = 39, "left little distal";
    RIGHT_THUMB_PROXIMAL = 40, "right thumb proximal";
    RIGHT_THUMB_INTERMEDIATE = 41, "right thumb intermediate";
    RIGHT_THUMB_DISTAL = 42, "right thumb distal";
    RIGHT_INDEX_PROXIMAL = 43, "right index proximal";
    RIGHT_INDEX_INTERMEDIATE = 44, "right index intermediate";
    RIGHT_INDEX_DISTAL = 45, "right index distal";
    RIGHT_MIDDLE_PROXIMAL = 46, "right middle proximal";
    RIGHT_MIDDLE_INTERMEDIATE = 47, "right middle intermediate";
    RIGHT_MIDDLE_DISTAL = 48, "right middle distal";
    RIGHT_RING_PROXIMAL = 49, "right ring proximal";
    RIGHT_RING_INTERMEDIATE = 50, "right ring intermediate";
    RIGHT_RING_DISTAL = 51, "right ring distal";
    RIGHT_LITTLE_PROXIMAL = 52, "right little proximal";
    RIGHT_LITTLE_INTERMEDIATE = 53, "right little intermediate";
    RIGHT_LITTLE_DISTAL = 54, "right little distal";
    UPPER_CHEST = 55, "upper chest";
    CENTER_FEET = 56, "center feet";
    VIEWPOINT = 57, "viewpoint";
}

impl BoneType {
    /// Returns true if receivers accept this bone type.
    #[must_use]
    pub const fn is_known(self) -> bool {
        self.name().is_some()
    }
}

impl std::fmt::Display for BoneType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "unknown bone #{}", self.0),
        }
    }
}
