//! Packet channel: the read/write loop of one established link.
//!
//! [`pump`] blocks on the link, decodes each record with
//! [`codec::decode_record`](crate::codec::decode_record) and publishes the
//! packets into the [`PacketStore`]. A record that fails to decode is logged
//! and dropped; only a failing read ends the loop. There is no read timeout:
//! loss is detected by the transport.

use std::sync::Arc;

use headlink_types::{LinkError, LinkEventKind, ProtocolError, RemoteDevice};
use tracing::{debug, error, warn};

use crate::codec;
use crate::events::LinkEventBus;
use crate::store::PacketStore;
use crate::transport::{LineReader, LinkHandle};

/// Write side of the connected link, shared with the connection manager.
#[derive(Clone)]
pub struct PacketChannel {
    device: RemoteDevice,
    handle: Arc<dyn LinkHandle>,
}

impl PacketChannel {
    pub fn new(device: RemoteDevice, handle: Arc<dyn LinkHandle>) -> Self {
        Self { device, handle }
    }

    pub fn device(&self) -> &RemoteDevice {
        &self.device
    }

    /// Best-effort write. Failures are logged and do not end the channel.
    pub fn write(&self, bytes: &[u8]) {
        match self.handle.write(bytes) {
            Ok(()) => debug!(device = %self.device.name, len = bytes.len(), "wrote to link"),
            Err(e) => error!(device = %self.device.name, error = %e, "write to link failed"),
        }
    }

    /// Close the link, which ends a concurrent [`pump`] with an error.
    pub fn close(&self) {
        self.handle.close();
    }
}

impl std::fmt::Debug for PacketChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketChannel")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

/// Decode one record and publish its packets.
///
/// Returns the number of packets written into `store`.
pub fn process_record(
    line: &str,
    store: &PacketStore,
    events: &LinkEventBus,
) -> Result<usize, ProtocolError> {
    let packets = codec::decode_record(line)?;
    let count = packets.len();
    for packet in packets {
        let kind = packet.kind();
        store.put(packet);
        events.publish(LinkEventKind::PacketPublished(kind));
    }
    Ok(count)
}

/// Read records until the link fails, publishing every decoded packet.
///
/// Returns the read error that ended the loop.
pub fn pump(reader: &mut dyn LineReader, store: &PacketStore, events: &LinkEventBus) -> LinkError {
    loop {
        let line = match reader.read_line() {
            Ok(line) => line,
            Err(e) => return e,
        };
        match process_record(&line, store, events) {
            Ok(_) => {}
            Err(ProtocolError::UnknownTag(tag)) => {
                warn!(tag = %tag, "unknown packet type; record skipped");
            }
            Err(e) => {
                warn!(error = %e, record = %line, "incorrectly formatted record dropped");
            }
        }
    }
}
