//! `headlink-perception` – head pose for rendering.
//!
//! Turns the platform orientation and the tracker's irregular Head/Joint
//! arrivals into the per-frame view transform handed to the renderer.
//!
//! # Modules
//!
//! - [`transform`] – [`Quaternion`][transform::Quaternion] and its
//!   conversion into a view matrix.
//! - [`kalman`] – [`YawFilter`][kalman::YawFilter]: constant-velocity yaw
//!   model (predict step only).
//! - [`head_pose`] – [`HeadPoseEstimator`][head_pose::HeadPoseEstimator]:
//!   readiness gate, filter stepping, and the head transform.

pub mod head_pose;
pub mod kalman;
pub mod transform;

pub use head_pose::HeadPoseEstimator;
pub use kalman::YawFilter;
pub use transform::Quaternion;
