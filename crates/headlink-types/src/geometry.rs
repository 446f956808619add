//! Minimal geometry carried by tracking packets.
//!
//! [`Mat4`] is stored row-major: `m[row][col]`, with the translation in the
//! last column and `[0, 0, 0, 1]` as the bottom row.

use serde::{Deserialize, Serialize};

/// A 3-D position (metres).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A 4×4 homogeneous transform, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat4(pub [[f32; 4]; 4]);

impl Mat4 {
    pub fn identity() -> Self {
        Self([
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    /// Embed a row-major 3×3 rotation block (`r00, r01, r02, r10, …, r22`)
    /// as the upper-left of a homogeneous transform with zero translation.
    pub fn from_rotation_rows(r: [f32; 9]) -> Self {
        Self([
            [r[0], r[1], r[2], 0.0],
            [r[3], r[4], r[5], 0.0],
            [r[6], r[7], r[8], 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ])
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.0[row][col]
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.0[0][3], self.0[1][3], self.0[2][3])
    }

    /// Post-multiply by a translation: `self * T(v)`.
    ///
    /// The offset is expressed in this transform's local frame, so a
    /// rotated transform moves along its own axes.
    pub fn translated(&self, v: Vec3) -> Mat4 {
        let mut out = *self;
        for r in 0..4 {
            out.0[r][3] += self.0[r][0] * v.x + self.0[r][1] * v.y + self.0[r][2] * v.z;
        }
        out
    }
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::identity()
    }
}
