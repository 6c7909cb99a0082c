//! Mathematical types shared between environment and browser.
//!
//! These are the canonical representations used in the wire protocol.
//! Rotations follow the left-handed, Z-then-X-then-Y Euler convention used by
//! the browsers, with angles expressed in degrees.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D Vector - position, scale, Euler angles
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// All components set to one
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Unit Y vector
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);

    /// Converts to array
    #[must_use]
    pub fn to_array(self) -> [f32; 3] {
        bytemuck::cast(self)
    }

    /// Creates from array
    #[must_use]
    pub fn from_array(arr: [f32; 3]) -> Self {
        bytemuck::cast(arr)
    }

    /// Widens to double precision, the precision the estimators run at.
    #[must_use]
    pub fn to_f64(self) -> [f64; 3] {
        [f64::from(self.x), f64::from(self.y), f64::from(self.z)]
    }

    /// Narrows a double precision triple.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(arr: [f64; 3]) -> Self {
        Self::new(arr[0] as f32, arr[1] as f32, arr[2] as f32)
    }

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Component-wise product
    #[must_use]
    pub fn scale_by(self, other: Self) -> Self {
        Self::new(self.x * other.x, self.y * other.y, self.z * other.z)
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Quaternion for rotations
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W component
    pub w: f32,
}

impl Quaternion {
    /// Creates a new quaternion
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Identity rotation
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Converts to array in `[x, y, z, w]` order
    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        bytemuck::cast(self)
    }

    /// Returns the unit quaternion pointing the same way.
    ///
    /// A degenerate (zero length) quaternion normalizes to identity.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        Self::new(self.x / len, self.y / len, self.z / len, self.w / len)
    }

    /// Builds a rotation from Euler angles in degrees.
    ///
    /// Applied Z first, then X, then Y.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_euler_degrees(angles: Vec3) -> Self {
        let half = |deg: f32| f64::from(deg).to_radians() * 0.5;
        let (hx, hy, hz) = (half(angles.x), half(angles.y), half(angles.z));
        let qx = Self::new(hx.sin() as f32, 0.0, 0.0, hx.cos() as f32);
        let qy = Self::new(0.0, hy.sin() as f32, 0.0, hy.cos() as f32);
        let qz = Self::new(0.0, 0.0, hz.sin() as f32, hz.cos() as f32);
        qy * qx * qz
    }

    /// Decomposes into Euler angles in degrees, each in `[0, 360)`.
    ///
    /// Inverse of [`Quaternion::from_euler_degrees`] away from gimbal lock.
    #[must_use]
    pub fn to_euler_degrees(self) -> Vec3 {
        let q = self.normalized();
        let (x, y, z, w) = (
            f64::from(q.x),
            f64::from(q.y),
            f64::from(q.z),
            f64::from(q.w),
        );

        let r00 = 1.0 - 2.0 * (y * y + z * z);
        let r02 = 2.0 * (x * z + w * y);
        let r10 = 2.0 * (x * y + w * z);
        let r11 = 1.0 - 2.0 * (x * x + z * z);
        let r12 = 2.0 * (y * z - w * x);
        let r20 = 2.0 * (x * z - w * y);
        let r22 = 1.0 - 2.0 * (x * x + y * y);

        let sin_x = (-r12).clamp(-1.0, 1.0);
        let angle_x = sin_x.asin();
        let (angle_y, angle_z) = if sin_x.abs() < 0.999_999 {
            (r02.atan2(r22), r10.atan2(r11))
        } else {
            // Gimbal lock: fold the whole twist into Y.
            ((-r20).atan2(r00), 0.0)
        };

        Vec3::from_f64([
            wrap_degrees(angle_x.to_degrees()),
            wrap_degrees(angle_y.to_degrees()),
            wrap_degrees(angle_z.to_degrees()),
        ])
    }

    /// Rotates a vector.
    #[must_use]
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Angle between two rotations in degrees.
    #[must_use]
    pub fn angle_to(self, other: Self) -> f32 {
        let a = self.normalized();
        let b = other.normalized();
        let dot = (a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w).abs().min(1.0);
        2.0 * dot.acos().to_degrees()
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl std::ops::Mul for Quaternion {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

/// Maps an angle in degrees into `[0, 360)`.
#[must_use]
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Transform - position + rotation + scale
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform {
    /// Position
    pub position: Vec3,
    /// Rotation
    pub rotation: Quaternion,
    /// Scale (per axis)
    pub scale: Vec3,
}

impl Transform {
    /// Creates a new transform
    #[must_use]
    pub const fn new(position: Vec3, rotation: Quaternion, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    /// Identity transform
    pub const IDENTITY: Self = Self::new(Vec3::ZERO, Quaternion::IDENTITY, Vec3::ONE);

    /// Composes a child transform expressed in this transform's space.
    #[must_use]
    pub fn compose(&self, local: &Self) -> Self {
        Self {
            position: self.position + self.rotation.rotate(local.position.scale_by(self.scale)),
            rotation: self.rotation * local.rotation,
            scale: self.scale.scale_by(local.scale),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}
