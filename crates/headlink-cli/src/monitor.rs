//! Frame-loop consumer: drains the packet store and drives the estimator.

use std::time::Instant;

use headlink_link::PacketStore;
use headlink_perception::HeadPoseEstimator;
use headlink_types::{HeadPacket, Mat4, Packet, PacketKind};

pub struct Monitor {
    estimator: HeadPoseEstimator,
    /// Latest tracked head rotation, standing in for the platform sensor.
    platform: Mat4,
    ready_reported: bool,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            estimator: HeadPoseEstimator::new(),
            platform: Mat4::identity(),
            ready_reported: false,
        }
    }

    /// Take every fresh packet, feed the estimator, and step it to `now`.
    pub fn drain(&mut self, store: &PacketStore, now: Instant) -> Vec<Packet> {
        let packets: Vec<Packet> = PacketKind::ALL
            .iter()
            .filter_map(|kind| store.take(*kind))
            .collect();
        for packet in &packets {
            self.estimator.observe(packet);
            if let Packet::Head(HeadPacket {
                rotation: Some(rotation),
                ..
            }) = packet
            {
                self.platform = *rotation;
            }
        }
        self.estimator.step(&self.platform, now);
        packets
    }

    /// `true` exactly once, on the first call after the estimator is ready.
    pub fn take_ready_transition(&mut self) -> bool {
        if self.estimator.is_ready() && !self.ready_reported {
            self.ready_reported = true;
            return true;
        }
        false
    }

    pub fn estimator(&self) -> &HeadPoseEstimator {
        &self.estimator
    }
}

/// One-line human summary of a packet.
pub fn describe(packet: &Packet) -> String {
    match packet {
        Packet::Joint(p) => format!("JOINT     dt={:>4} joints={}", p.delta_t, p.joints.len()),
        Packet::Head(p) => format!(
            "HEAD      dt={:>4} pos=({:.3}, {:.3}, {:.3}){}",
            p.delta_t,
            p.position.x,
            p.position.y,
            p.position.z,
            if p.rotation.is_some() { " +rot" } else { "" }
        ),
        Packet::RobotPos(p) => format!(
            "ROBOT     dt={:>4} pos=({:.3}, {:.3}, {:.3})",
            p.delta_t, p.position.x, p.position.y, p.position.z
        ),
        Packet::RobotKinPos(p) => format!(
            "ROBOTKIN  dt={:>4} pos=({:.3}, {:.3}, {:.3})",
            p.delta_t, p.position.x, p.position.y, p.position.z
        ),
        Packet::GameState(p) => format!("GAMESTATE state={}", p.state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headlink_types::{GameStatePacket, JointPacket, Vec3};

    fn head(rotation: Option<Mat4>) -> Packet {
        Packet::Head(HeadPacket {
            delta_t: 16,
            position: Vec3::new(0.0, 1.7, 0.0),
            rotation,
        })
    }

    #[test]
    fn drain_empties_the_store() {
        let store = PacketStore::new();
        store.put(head(None));
        store.put(Packet::GameState(GameStatePacket { state: 2 }));

        let mut monitor = Monitor::new();
        let now = Instant::now();
        assert_eq!(monitor.drain(&store, now).len(), 2);
        assert!(monitor.drain(&store, now).is_empty());
    }

    #[test]
    fn estimator_becomes_ready_after_head_and_joint() {
        let store = PacketStore::new();
        let mut monitor = Monitor::new();
        let now = Instant::now();

        store.put(head(None));
        monitor.drain(&store, now);
        assert!(!monitor.take_ready_transition());

        store.put(Packet::Joint(JointPacket::default()));
        monitor.drain(&store, now);
        assert!(monitor.estimator().is_ready());
        assert!(monitor.take_ready_transition());
        assert!(!monitor.take_ready_transition());
    }

    #[test]
    fn head_rotation_seeds_the_filter() {
        let store = PacketStore::new();
        let mut monitor = Monitor::new();
        let quarter_turn = Mat4::from_rotation_rows([0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0]);
        store.put(head(Some(quarter_turn)));
        store.put(Packet::Joint(JointPacket::default()));

        monitor.drain(&store, Instant::now());
        let yaw = monitor.estimator().predicted_yaw().unwrap();
        assert!((yaw - std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn describe_is_one_line() {
        let line = describe(&head(Some(Mat4::identity())));
        assert!(line.starts_with("HEAD"));
        assert!(line.ends_with("+rot"));
        assert!(!line.contains('\n'));
        assert_eq!(
            describe(&Packet::GameState(GameStatePacket { state: 3 })),
            "GAMESTATE state=3"
        );
    }
}
