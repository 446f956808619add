//! Orientation quaternion and view-matrix conversion.
//!
//! # Example
//!
//! ```rust
//! use headlink_perception::transform::{Quaternion, extract_yaw};
//!
//! let view = Quaternion::identity().to_view_matrix();
//! assert!(extract_yaw(&view).abs() < 1e-6);
//! ```

use headlink_types::Mat4;

/// A rotation quaternion stored in `(x, y, z, w)` order, as the platform
/// sensor reports it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Quaternion {
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Rotation of `angle` radians about the vertical (y) axis.
    pub fn from_yaw(angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(0.0, s, 0.0, c)
    }

    /// Rotation matrix for the renderer.
    ///
    /// The scalar part is negated before conversion, which yields the
    /// inverse rotation: the world turns opposite to the head.
    pub fn to_view_matrix(&self) -> Mat4 {
        let Self { x, y, z, .. } = *self;
        let w = -self.w;
        Mat4::from_rotation_rows([
            1.0 - 2.0 * y * y - 2.0 * z * z,
            2.0 * x * y - 2.0 * z * w,
            2.0 * x * z + 2.0 * y * w,
            2.0 * x * y + 2.0 * z * w,
            1.0 - 2.0 * x * x - 2.0 * z * z,
            2.0 * y * z - 2.0 * x * w,
            2.0 * x * z - 2.0 * y * w,
            2.0 * y * z + 2.0 * x * w,
            1.0 - 2.0 * x * x - 2.0 * y * y,
        ])
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Heading of a row-major transform: `atan2(m[0][2], m[2][2])`.
pub fn extract_yaw(transform: &Mat4) -> f32 {
    transform.get(0, 2).atan2(transform.get(2, 2))
}
