//! Head pose estimator.
//!
//! The estimator stays in a warm-up state until the tracker has delivered at
//! least one Head packet and one Joint packet. Until then
//! [`get_head_transform`](HeadPoseEstimator::get_head_transform) returns the
//! fixed default: identity orientation, head at [`DEFAULT_HEAD_OFFSET`].
//!
//! The first [`step`](HeadPoseEstimator::step) after both sources have been
//! seen seeds a [`YawFilter`] with the yaw of the current platform
//! transform. Later steps predict forward by the wall-clock time since the
//! previous step.

use std::time::Instant;

use headlink_types::{Mat4, Packet, Vec3};
use nalgebra::Matrix3;
use tracing::{debug, info};

use crate::kalman::YawFilter;
use crate::transform::{Quaternion, extract_yaw};

/// Eye height of a standing user, metres.
pub const DEFAULT_HEAD_OFFSET: Vec3 = Vec3 {
    x: 0.0,
    y: 1.8,
    z: 0.0,
};

#[derive(Debug, Clone)]
pub struct HeadPoseEstimator {
    head_offset: Vec3,
    orientation: Quaternion,
    head_seen: bool,
    joint_seen: bool,
    filter: Option<YawFilter>,
    last_step: Option<Instant>,
}

impl HeadPoseEstimator {
    pub fn new() -> Self {
        Self {
            head_offset: DEFAULT_HEAD_OFFSET,
            orientation: Quaternion::identity(),
            head_seen: false,
            joint_seen: false,
            filter: None,
            last_step: None,
        }
    }

    pub fn with_head_offset(mut self, offset: Vec3) -> Self {
        self.head_offset = offset;
        self
    }

    /// Record a tracker arrival. Only Head and Joint packets count towards
    /// readiness; anything else is ignored.
    pub fn observe(&mut self, packet: &Packet) {
        match packet {
            Packet::Head(_) => self.head_seen = true,
            Packet::Joint(_) => self.joint_seen = true,
            _ => {}
        }
    }

    /// Orientation reported by the platform sensor. Used once ready.
    pub fn set_orientation(&mut self, orientation: Quaternion) {
        self.orientation = orientation;
    }

    /// Advance the filter to `now`. `orientation` is the platform's current
    /// row-major transform; it only seeds the filter on the first ready step.
    pub fn step(&mut self, orientation: &Mat4, now: Instant) {
        let Some(filter) = self.filter.as_mut() else {
            if self.head_seen && self.joint_seen {
                let yaw = extract_yaw(orientation);
                info!(yaw, "head pose estimator ready");
                self.filter = Some(YawFilter::new(f64::from(yaw)));
                self.last_step = Some(now);
            }
            return;
        };

        let dt = self
            .last_step
            .map_or(0.0, |last| now.saturating_duration_since(last).as_secs_f64());
        self.last_step = Some(now);
        filter.predict(dt);
        debug!(dt, yaw = filter.yaw(), "head pose predicted");
    }

    /// View transform for the renderer: rotation from the orientation
    /// quaternion, then the world shifted by the negated head offset.
    pub fn get_head_transform(&self) -> Mat4 {
        let orientation = if self.is_ready() {
            self.orientation
        } else {
            Quaternion::identity()
        };
        orientation
            .to_view_matrix()
            .translated(self.head_offset.neg())
    }

    pub fn is_ready(&self) -> bool {
        self.filter.is_some()
    }

    pub fn predicted_yaw(&self) -> Option<f64> {
        self.filter.as_ref().map(YawFilter::yaw)
    }

    /// Transition matrix from the latest step, once ready.
    pub fn transition(&self) -> Option<&Matrix3<f64>> {
        self.filter.as_ref().map(YawFilter::transition)
    }
}

impl Default for HeadPoseEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headlink_types::{GameStatePacket, HeadPacket, JointPacket};
    use std::time::Duration;

    fn head() -> Packet {
        Packet::Head(HeadPacket {
            delta_t: 16,
            position: Vec3::new(0.0, 1.7, 0.0),
            rotation: None,
        })
    }

    fn joints() -> Packet {
        Packet::Joint(JointPacket {
            delta_t: 16,
            joints: Vec::new(),
        })
    }

    fn default_transform() -> Mat4 {
        Mat4::identity().translated(DEFAULT_HEAD_OFFSET.neg())
    }

    #[test]
    fn default_transform_until_both_sources_seen() {
        let mut est = HeadPoseEstimator::new();
        est.set_orientation(Quaternion::from_yaw(1.0));
        let platform = Quaternion::from_yaw(1.0).to_view_matrix();
        let t0 = Instant::now();

        est.observe(&head());
        est.step(&platform, t0);
        assert!(!est.is_ready());
        assert_eq!(est.get_head_transform(), default_transform());
        assert!((est.get_head_transform().translation().y + 1.8).abs() < 1e-6);

        est.observe(&Packet::GameState(GameStatePacket { state: 1 }));
        est.step(&platform, t0);
        assert!(!est.is_ready());

        est.observe(&joints());
        est.step(&platform, t0);
        assert!(est.is_ready());
        assert_ne!(est.get_head_transform(), default_transform());
    }

    #[test]
    fn joint_alone_is_not_enough() {
        let mut est = HeadPoseEstimator::new();
        est.observe(&joints());
        est.step(&Mat4::identity(), Instant::now());
        assert!(!est.is_ready());
        assert!(est.predicted_yaw().is_none());
        assert!(est.transition().is_none());
    }

    #[test]
    fn ready_step_seeds_yaw_from_platform_transform() {
        let mut est = HeadPoseEstimator::new();
        est.observe(&head());
        est.observe(&joints());
        let platform = Quaternion::from_yaw(0.4).to_view_matrix();
        est.step(&platform, Instant::now());

        let yaw = est.predicted_yaw().unwrap();
        assert!((yaw - f64::from(extract_yaw(&platform))).abs() < 1e-6);
    }

    #[test]
    fn transition_tracks_most_recent_elapsed_time() {
        let mut est = HeadPoseEstimator::new();
        est.observe(&head());
        est.observe(&joints());
        let t0 = Instant::now();
        est.step(&Mat4::identity(), t0);

        let mut now = t0;
        for ms in [16u64, 16, 32] {
            now += Duration::from_millis(ms);
            est.step(&Mat4::identity(), now);
            let dt = est.transition().unwrap()[(0, 1)];
            assert!((dt - ms as f64 / 1000.0).abs() < 1e-9, "step of {ms} ms gave {dt}");
        }
    }

    #[test]
    fn ready_transform_uses_current_orientation() {
        let mut est = HeadPoseEstimator::new().with_head_offset(Vec3::new(0.0, 1.5, 0.0));
        est.observe(&head());
        est.observe(&joints());
        est.step(&Mat4::identity(), Instant::now());

        let q = Quaternion::from_yaw(0.25);
        est.set_orientation(q);
        let expected = q.to_view_matrix().translated(Vec3::new(0.0, -1.5, 0.0));
        assert_eq!(est.get_head_transform(), expected);
    }
}
