//! Typed tracking packets.
//!
//! Tag literals are shared with the external sender and must stay
//! byte-for-byte stable.

use serde::{Deserialize, Serialize};

use crate::geometry::{Mat4, Vec3};

/// Leading field of a skeleton record.
pub const JOINT_TAG: &str = "JOINT";
/// Leading field of a marker record (head and/or robot sub-records).
pub const MARKER_TAG: &str = "MARKER";
/// Leading field of a kinematic robot position record.
pub const ROBOT_KIN_TAG: &str = "ROBOTKIN";
/// Leading field of a game state record.
pub const GAME_STATE_TAG: &str = "GAMESTATE";
/// Sub-tag introducing the head pose inside a marker record.
pub const HEAD_SUBTAG: &str = "HEAD";
/// Sub-tag introducing the robot pose inside a marker record.
pub const ROBOT_SUBTAG: &str = "ROBOT";
/// Token that opens every joint group inside a skeleton record.
pub const JOINT_SEPARATOR: &str = "SEP";

/// Discriminant of [`Packet`], used as the packet store slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PacketKind {
    Joint,
    Head,
    RobotPos,
    RobotKinPos,
    GameState,
}

impl PacketKind {
    pub const COUNT: usize = 5;

    pub const ALL: [PacketKind; PacketKind::COUNT] = [
        PacketKind::Joint,
        PacketKind::Head,
        PacketKind::RobotPos,
        PacketKind::RobotKinPos,
        PacketKind::GameState,
    ];

    /// Dense slot index in `0..COUNT`.
    pub const fn index(self) -> usize {
        match self {
            PacketKind::Joint => 0,
            PacketKind::Head => 1,
            PacketKind::RobotPos => 2,
            PacketKind::RobotKinPos => 3,
            PacketKind::GameState => 4,
        }
    }

    /// Stable tag string identifying this kind to the sender and to consumers.
    pub const fn tag(self) -> &'static str {
        match self {
            PacketKind::Joint => JOINT_TAG,
            PacketKind::Head => MARKER_TAG,
            PacketKind::RobotPos => ROBOT_SUBTAG,
            PacketKind::RobotKinPos => ROBOT_KIN_TAG,
            PacketKind::GameState => GAME_STATE_TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Skeleton joints, in the sender's index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JointType {
    SpineBase,
    SpineMid,
    Neck,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    SpineShoulder,
    HandTipLeft,
    ThumbLeft,
    HandTipRight,
    ThumbRight,
}

impl JointType {
    pub const ALL: [JointType; 25] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// How confidently the tracker located a joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    NotTracked,
    Inferred,
    Tracked,
}

impl TrackingState {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(TrackingState::NotTracked),
            1 => Some(TrackingState::Inferred),
            2 => Some(TrackingState::Tracked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub joint_type: JointType,
    pub tracking_state: TrackingState,
    pub position: Vec3,
}

/// Skeleton frame. Joints keep their order of appearance on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointPacket {
    /// Sender-side milliseconds since its previous frame.
    pub delta_t: i32,
    pub joints: Vec<Joint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPacket {
    pub delta_t: i32,
    pub position: Vec3,
    /// Absent when the sender only tracked the head marker position.
    pub rotation: Option<Mat4>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPosPacket {
    pub delta_t: i32,
    pub position: Vec3,
    pub rotation: Mat4,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotKinPosPacket {
    pub delta_t: i32,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatePacket {
    pub state: i32,
}

/// One decoded tracking record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Packet {
    Joint(JointPacket),
    Head(HeadPacket),
    RobotPos(RobotPosPacket),
    RobotKinPos(RobotKinPosPacket),
    GameState(GameStatePacket),
}

impl Packet {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::Joint(_) => PacketKind::Joint,
            Packet::Head(_) => PacketKind::Head,
            Packet::RobotPos(_) => PacketKind::RobotPos,
            Packet::RobotKinPos(_) => PacketKind::RobotKinPos,
            Packet::GameState(_) => PacketKind::GameState,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind().tag()
    }
}
