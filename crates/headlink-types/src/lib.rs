//! `headlink-types` – shared vocabulary of the telemetry pipeline.
//!
//! Everything that crosses a crate boundary lives here: the typed packets
//! produced by the wire codec, the small amount of geometry they carry, the
//! connection lifecycle vocabulary, and the error taxonomy.

pub mod geometry;
pub mod packet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use geometry::{Mat4, Vec3};
pub use packet::{
    GameStatePacket, HeadPacket, Joint, JointPacket, JointType, Packet, PacketKind,
    RobotKinPosPacket, RobotPosPacket, TrackingState,
};

/// Lifecycle state of the single wireless link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Doing nothing; no tasks are running.
    Idle,
    /// Polling the paired-device list (and optionally accepting inbound links).
    Listening,
    /// An outbound connect attempt is in flight.
    Connecting,
    /// A packet channel owns the link.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Listening => write!(f, "listening"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// A peer found in the host's paired-device list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub name: String,
    /// Transport-specific address (MAC address, `host:port`, …).
    pub address: String,
}

impl RemoteDevice {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }
}

/// Notification emitted by the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: LinkEventKind,
}

impl LinkEvent {
    pub fn new(kind: LinkEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Variants of [`LinkEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkEventKind {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    DeviceConnected(RemoteDevice),
    /// A decoded packet of this kind was written into the store.
    PacketPublished(PacketKind),
}

/// A record that could not be decoded. The record is dropped; the link stays up.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("unknown packet tag '{0}'")]
    UnknownTag(String),

    #[error("{tag} record is missing field {index}")]
    MissingField { tag: String, index: usize },

    #[error("{tag} record field {index} is not a number: '{value}'")]
    InvalidNumber {
        tag: String,
        index: usize,
        value: String,
    },

    #[error("{tag} record field {index} is out of range: {value}")]
    InvalidIndex {
        tag: String,
        index: usize,
        value: usize,
    },
}

/// Failures of the injected discovery and transport capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkError {
    #[error("Transport Error on {address}: {details}")]
    Transport { address: String, details: String },

    #[error("link closed")]
    Closed,

    /// The host has no usable discovery or transport capability.
    #[error("link capability unavailable: {0}")]
    Unavailable(String),
}

impl LinkError {
    pub fn transport(address: impl Into<String>, details: impl std::fmt::Display) -> Self {
        LinkError::Transport {
            address: address.into(),
            details: details.to_string(),
        }
    }
}
