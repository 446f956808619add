//! Latest-value packet store.
//!
//! One slot per [`PacketKind`], each behind its own lock. The channel
//! overwrites a slot on every arrival; consumers either `take` (destructive)
//! or `peek`/`has_packet` (non-destructive). A slow consumer never builds a
//! backlog: it simply skips superseded packets.

use std::sync::{Mutex, MutexGuard, PoisonError};

use headlink_types::{Packet, PacketKind};

/// Fixed array of single-packet slots indexed by [`PacketKind::index`].
#[derive(Debug)]
pub struct PacketStore {
    slots: [Mutex<Option<Packet>>; PacketKind::COUNT],
}

impl PacketStore {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(None)),
        }
    }

    fn slot(&self, kind: PacketKind) -> MutexGuard<'_, Option<Packet>> {
        // A panicking holder cannot leave an `Option` half-written.
        self.slots[kind.index()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `packet` in its kind's slot, replacing any previous value.
    pub fn put(&self, packet: Packet) {
        let kind = packet.kind();
        *self.slot(kind) = Some(packet);
    }

    /// Return and clear the latest packet of `kind`.
    pub fn take(&self, kind: PacketKind) -> Option<Packet> {
        self.slot(kind).take()
    }

    /// Return a copy of the latest packet of `kind` without clearing it.
    pub fn peek(&self, kind: PacketKind) -> Option<Packet> {
        self.slot(kind).clone()
    }

    pub fn has_packet(&self, kind: PacketKind) -> bool {
        self.slot(kind).is_some()
    }

    /// [`take`](Self::take) addressed by wire tag. Unknown tags yield `None`.
    pub fn take_tag(&self, tag: &str) -> Option<Packet> {
        PacketKind::from_tag(tag).and_then(|kind| self.take(kind))
    }

    /// [`has_packet`](Self::has_packet) addressed by wire tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        PacketKind::from_tag(tag).is_some_and(|kind| self.has_packet(kind))
    }
}

impl Default for PacketStore {
    fn default() -> Self {
        Self::new()
    }
}
