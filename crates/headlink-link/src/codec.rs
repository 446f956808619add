//! Packet codec: one newline-delimited text record in, zero or more
//! [`Packet`]s out.
//!
//! # Wire format
//!
//! ```text
//! JOINT,<deltaT>,{SEP,<jointTypeIdx>,<trackingStateIdx>,<x>,<y>,<z>}*
//! MARKER,<deltaT>,HEAD,<x>,<y>,<z>[,<r00>..<r22>][,ROBOT,<x>,<y>,<z>,<r00>..<r22>]
//! MARKER,<deltaT>,ROBOT,<x>,<y>,<z>,<r00>..<r22>
//! ROBOTKIN,<deltaT>,<x>,<y>,<z>
//! GAMESTATE,<state>
//! ```
//!
//! The codec is stateless. A record that cannot be decoded yields a
//! [`ProtocolError`]; the caller drops that record and keeps reading.

use headlink_types::packet::{
    GAME_STATE_TAG, HEAD_SUBTAG, JOINT_SEPARATOR, JOINT_TAG, MARKER_TAG, ROBOT_KIN_TAG,
    ROBOT_SUBTAG,
};
use headlink_types::{
    GameStatePacket, HeadPacket, Joint, JointPacket, JointType, Mat4, Packet, ProtocolError,
    RobotKinPosPacket, RobotPosPacket, TrackingState, Vec3,
};
use tracing::debug;

/// Fields per joint group: separator, joint type, tracking state, x, y, z.
const JOINT_GROUP_LEN: usize = 6;

/// Decode one record (without its line terminator).
///
/// Empty records decode to an empty list. An unrecognised leading tag is
/// reported as [`ProtocolError::UnknownTag`].
pub fn decode_record(line: &str) -> Result<Vec<Packet>, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut items: Vec<&str> = line.split(',').collect();
    // Trailing empty fields carry nothing (senders sometimes end with a comma).
    while items.last().is_some_and(|f| f.is_empty()) {
        items.pop();
    }
    let Some(&tag) = items.first() else {
        return Ok(Vec::new());
    };

    match tag {
        JOINT_TAG => decode_joint(&Fields::new(JOINT_TAG, items)).map(|p| vec![p]),
        MARKER_TAG => decode_marker(&Fields::new(MARKER_TAG, items)),
        ROBOT_KIN_TAG => decode_robot_kin(&Fields::new(ROBOT_KIN_TAG, items)).map(|p| vec![p]),
        GAME_STATE_TAG => decode_game_state(&Fields::new(GAME_STATE_TAG, items)).map(|p| vec![p]),
        other => Err(ProtocolError::UnknownTag(other.to_string())),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-tag decoders
// ────────────────────────────────────────────────────────────────────────────

fn decode_joint(f: &Fields<'_>) -> Result<Packet, ProtocolError> {
    let mut packet = JointPacket {
        delta_t: f.int(1)?,
        joints: Vec::new(),
    };

    let mut i = 2;
    while i < f.len() {
        // A missing separator or a short trailing group ends the skeleton;
        // everything decoded so far is kept.
        if f.get(i) != Some(JOINT_SEPARATOR) {
            debug!(index = i, "joint separator absent; truncating skeleton");
            break;
        }
        if i + JOINT_GROUP_LEN > f.len() {
            debug!(index = i, "truncated joint group; truncating skeleton");
            break;
        }
        let type_idx = f.index(i + 1)?;
        let state_idx = f.index(i + 2)?;
        let (Some(joint_type), Some(tracking_state)) = (
            JointType::from_index(type_idx),
            TrackingState::from_index(state_idx),
        ) else {
            debug!(type_idx, state_idx, "joint index out of range; truncating skeleton");
            break;
        };
        packet.joints.push(Joint {
            joint_type,
            tracking_state,
            position: f.vec3(i + 3)?,
        });
        i += JOINT_GROUP_LEN;
    }

    Ok(Packet::Joint(packet))
}

fn decode_marker(f: &Fields<'_>) -> Result<Vec<Packet>, ProtocolError> {
    let mut packets = Vec::with_capacity(2);
    let mut i = 2;
    f.field(i)?;

    if f.get(i) == Some(HEAD_SUBTAG) {
        let delta_t = f.int(1)?;
        let position = f.vec3(i + 1)?;
        // The rotation block is present unless the record ends after the
        // position or a robot sub-record follows immediately.
        let rotation = match f.get(i + 4) {
            Some(next) if next != ROBOT_SUBTAG => {
                let rotation = f.rotation(i + 4)?;
                i += 13;
                Some(rotation)
            }
            _ => {
                i += 4;
                None
            }
        };
        packets.push(Packet::Head(HeadPacket {
            delta_t,
            position,
            rotation,
        }));
    }

    if f.get(i) == Some(ROBOT_SUBTAG) {
        packets.push(Packet::RobotPos(RobotPosPacket {
            delta_t: f.int(1)?,
            position: f.vec3(i + 1)?,
            rotation: f.rotation(i + 4)?,
        }));
    }

    if packets.is_empty() {
        debug!(sub_tag = f.get(2).unwrap_or_default(), "marker record without known sub-record");
    }
    Ok(packets)
}

fn decode_robot_kin(f: &Fields<'_>) -> Result<Packet, ProtocolError> {
    Ok(Packet::RobotKinPos(RobotKinPosPacket {
        delta_t: f.int(1)?,
        position: f.vec3(2)?,
    }))
}

fn decode_game_state(f: &Fields<'_>) -> Result<Packet, ProtocolError> {
    Ok(Packet::GameState(GameStatePacket { state: f.int(1)? }))
}

// ────────────────────────────────────────────────────────────────────────────
// Field access
// ────────────────────────────────────────────────────────────────────────────

/// Split record with typed, bounds-checked accessors.
struct Fields<'a> {
    tag: &'static str,
    items: Vec<&'a str>,
}

impl<'a> Fields<'a> {
    fn new(tag: &'static str, items: Vec<&'a str>) -> Self {
        Self { tag, items }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<&'a str> {
        self.items.get(index).copied()
    }

    fn field(&self, index: usize) -> Result<&'a str, ProtocolError> {
        self.get(index).ok_or_else(|| ProtocolError::MissingField {
            tag: self.tag.to_string(),
            index,
        })
    }

    fn invalid_number(&self, index: usize, value: &str) -> ProtocolError {
        ProtocolError::InvalidNumber {
            tag: self.tag.to_string(),
            index,
            value: value.to_string(),
        }
    }

    fn int(&self, index: usize) -> Result<i32, ProtocolError> {
        let raw = self.field(index)?;
        raw.trim().parse().map_err(|_| self.invalid_number(index, raw))
    }

    fn index(&self, index: usize) -> Result<usize, ProtocolError> {
        let raw = self.field(index)?;
        raw.trim().parse().map_err(|_| self.invalid_number(index, raw))
    }

    fn float(&self, index: usize) -> Result<f32, ProtocolError> {
        let raw = self.field(index)?;
        raw.trim().parse().map_err(|_| self.invalid_number(index, raw))
    }

    fn vec3(&self, start: usize) -> Result<Vec3, ProtocolError> {
        Ok(Vec3::new(
            self.float(start)?,
            self.float(start + 1)?,
            self.float(start + 2)?,
        ))
    }

    /// Nine floats, row-major, embedded in a homogeneous transform.
    fn rotation(&self, start: usize) -> Result<Mat4, ProtocolError> {
        let mut r = [0.0f32; 9];
        for (k, cell) in r.iter_mut().enumerate() {
            *cell = self.float(start + k)?;
        }
        Ok(Mat4::from_rotation_rows(r))
    }
}
