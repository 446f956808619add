//! Injected capabilities: device discovery and the byte-stream transport.
//!
//! The link crate never talks to a radio stack directly. A host provides a
//! [`DeviceDiscovery`] (the paired-device list) and a [`Transport`] (outbound
//! connect and, optionally, inbound accept). Implementations shipped here:
//!
//! - [`crate::tcp`] – TCP sockets standing in for the wireless serial socket.
//! - [`crate::sim`] – in-memory links for tests and headless runs.
//!
//! # Cancellation
//!
//! Blocking calls are cancelled by closing the resource underneath them:
//! [`Close::close`] on a link handle must make a concurrent
//! [`LineReader::read_line`] return an error, closing a listener must make a
//! concurrent [`Acceptor::accept`] return an error, and closing a [`Dial`]
//! handle before the connect resolves must make [`PendingLink::finish`]
//! return [`LinkError::Closed`].

use std::sync::Arc;

use headlink_types::{LinkError, RemoteDevice};

/// Source of already-paired peers.
pub trait DeviceDiscovery: Send + Sync {
    /// Snapshot of the paired-device list.
    ///
    /// # Errors
    ///
    /// [`LinkError::Unavailable`] when the host has no discovery capability;
    /// any other error is treated as transient.
    fn paired_devices(&self) -> Result<Vec<RemoteDevice>, LinkError>;

    /// `false` when the host has no discovery capability at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// Something whose blocking users can be woken by closing it.
pub trait Close: Send + Sync {
    /// Close the underlying resource. Idempotent; never fails loudly.
    fn close(&self);
}

/// Write side and cancellation handle of an established link.
pub trait LinkHandle: Close {
    /// Write all of `bytes` to the peer.
    fn write(&self, bytes: &[u8]) -> Result<(), LinkError>;
}

/// Read side of an established link.
pub trait LineReader: Send {
    /// Block until one record is available and return it without its line
    /// terminator.
    ///
    /// # Errors
    ///
    /// Returns an error once the link is closed (locally or by the peer) or
    /// broken. After an error the reader is not used again.
    fn read_line(&mut self) -> Result<String, LinkError>;
}

/// An established bidirectional link, split into its read half and a shared
/// write/close handle.
pub struct Link {
    pub reader: Box<dyn LineReader>,
    pub handle: Arc<dyn LinkHandle>,
}

impl Link {
    pub fn new(reader: Box<dyn LineReader>, handle: Arc<dyn LinkHandle>) -> Self {
        Self { reader, handle }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

/// Blocking inbound-connection source.
pub trait Acceptor: Send {
    /// Block until a peer connects.
    fn accept(&mut self) -> Result<(Link, RemoteDevice), LinkError>;
}

/// A listening endpoint: the acceptor plus a handle that cancels it.
pub struct Listener {
    pub acceptor: Box<dyn Acceptor>,
    pub handle: Arc<dyn Close>,
}

/// An outbound connect that has not resolved yet.
pub trait PendingLink: Send {
    /// Block until connected or failed.
    ///
    /// # Errors
    ///
    /// [`LinkError::Closed`] when the dial handle was closed first; a
    /// transport error otherwise. A link that completes after the handle was
    /// closed is shut down instead of returned.
    fn finish(self: Box<Self>) -> Result<Link, LinkError>;
}

/// A prepared outbound connect plus the handle that aborts it. Closing the
/// handle after the connect resolved has no effect on the link.
pub struct Dial {
    pub pending: Box<dyn PendingLink>,
    pub handle: Arc<dyn Close>,
}

/// Connection establishment.
pub trait Transport: Send + Sync {
    /// Prepare an outbound link to `device`. Never blocks; the connect itself
    /// runs in [`PendingLink::finish`].
    fn dial(&self, device: &RemoteDevice) -> Dial;

    /// Start listening for inbound links.
    fn listen(&self) -> Result<Listener, LinkError> {
        Err(LinkError::Unavailable(
            "transport does not accept inbound links".to_string(),
        ))
    }

    /// `false` when the host has no transport capability at all.
    fn is_available(&self) -> bool {
        true
    }
}
