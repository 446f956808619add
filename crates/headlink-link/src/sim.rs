//! In-memory transport for tests and headless runs without a radio.
//!
//! [`SimTransport`] hands out scripted outcomes for outbound connects and
//! queues inbound dial-ins; every link is a [`SimPeer`] whose remote end the
//! caller drives directly.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use headlink_link::sim::{SimDiscovery, SimTransport};
//! use headlink_link::{ConnectionManager, LinkConfig};
//! use headlink_types::RemoteDevice;
//!
//! let discovery = Arc::new(SimDiscovery::new(vec![RemoteDevice::new("GEMMI", "sim:0")]));
//! let transport = Arc::new(SimTransport::new());
//! let peer = transport.queue_peer();
//!
//! let manager = ConnectionManager::new(LinkConfig::default(), discovery, transport);
//! manager.start();
//! peer.send_line("GAMESTATE,1");
//! manager.stop();
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use headlink_types::{LinkError, RemoteDevice};

use crate::transport::{
    Acceptor, Close, DeviceDiscovery, Dial, LineReader, Link, LinkHandle, Listener, PendingLink,
    Transport,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────────────────

/// A paired-device list the caller can change at any time.
pub struct SimDiscovery {
    devices: Mutex<Vec<RemoteDevice>>,
    available: AtomicBool,
    queries: AtomicUsize,
}

impl SimDiscovery {
    pub fn new(devices: Vec<RemoteDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            available: AtomicBool::new(true),
            queries: AtomicUsize::new(0),
        }
    }

    /// A host without any discovery capability.
    pub fn unavailable() -> Self {
        let discovery = Self::new(Vec::new());
        discovery.set_available(false);
        discovery
    }

    /// Simulate the adapter appearing or going away.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_devices(&self, devices: Vec<RemoteDevice>) {
        *lock(&self.devices) = devices;
    }

    /// Number of times the paired list was queried.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl DeviceDiscovery for SimDiscovery {
    fn paired_devices(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.is_available() {
            return Err(LinkError::Unavailable("simulated host has no adapter".into()));
        }
        Ok(lock(&self.devices).clone())
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Links
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct PipeState {
    inbound: VecDeque<String>,
    written: Vec<u8>,
    local_closed: bool,
    peer_closed: bool,
}

#[derive(Default)]
struct Pipe {
    state: Mutex<PipeState>,
    cvar: Condvar,
}

/// The remote end of a simulated link.
#[derive(Clone, Default)]
pub struct SimPeer {
    pipe: Arc<Pipe>,
}

impl SimPeer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one record for the local reader.
    pub fn send_line(&self, line: &str) {
        lock(&self.pipe.state).inbound.push_back(line.to_string());
        self.pipe.cvar.notify_all();
    }

    /// Drop the link from the remote side. Queued records are still read
    /// before the local reader sees the failure.
    pub fn disconnect(&self) {
        lock(&self.pipe.state).peer_closed = true;
        self.pipe.cvar.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        let state = lock(&self.pipe.state);
        state.local_closed || state.peer_closed
    }

    /// Everything the local side has written so far.
    pub fn written(&self) -> Vec<u8> {
        lock(&self.pipe.state).written.clone()
    }

    /// The local end of this link.
    pub fn link(&self) -> Link {
        Link::new(
            Box::new(SimReader {
                pipe: self.pipe.clone(),
            }),
            Arc::new(SimHandle {
                pipe: self.pipe.clone(),
            }),
        )
    }
}

struct SimReader {
    pipe: Arc<Pipe>,
}

impl LineReader for SimReader {
    fn read_line(&mut self) -> Result<String, LinkError> {
        let mut state = lock(&self.pipe.state);
        loop {
            if state.local_closed {
                return Err(LinkError::Closed);
            }
            if let Some(line) = state.inbound.pop_front() {
                return Ok(line);
            }
            if state.peer_closed {
                return Err(LinkError::Closed);
            }
            state = self
                .pipe
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct SimHandle {
    pipe: Arc<Pipe>,
}

impl Close for SimHandle {
    fn close(&self) {
        lock(&self.pipe.state).local_closed = true;
        self.pipe.cvar.notify_all();
    }
}

impl LinkHandle for SimHandle {
    fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut state = lock(&self.pipe.state);
        if state.local_closed || state.peer_closed {
            return Err(LinkError::Closed);
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Listener
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ListenState {
    pending: VecDeque<(SimPeer, RemoteDevice)>,
    closed: bool,
}

#[derive(Default)]
struct SimListen {
    state: Mutex<ListenState>,
    cvar: Condvar,
}

impl Close for SimListen {
    fn close(&self) {
        lock(&self.state).closed = true;
        self.cvar.notify_all();
    }
}

struct SimAcceptor {
    listen: Arc<SimListen>,
}

impl Acceptor for SimAcceptor {
    fn accept(&mut self) -> Result<(Link, RemoteDevice), LinkError> {
        let mut state = lock(&self.listen.state);
        loop {
            if state.closed {
                return Err(LinkError::Closed);
            }
            if let Some((peer, device)) = state.pending.pop_front() {
                return Ok((peer.link(), device));
            }
            state = self
                .listen
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

enum Outcome {
    Connect(SimPeer),
    Refuse,
}

#[derive(Default)]
struct Shared {
    outcomes: Mutex<VecDeque<Outcome>>,
    peers: Mutex<Vec<SimPeer>>,
    listener: Mutex<Option<Arc<SimListen>>>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scripted transport. Connect attempts consume queued outcomes in order;
/// with nothing queued an attempt is refused.
#[derive(Default)]
pub struct SimTransport {
    shared: Arc<Shared>,
    connect_delay: Duration,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connect attempt block for `delay` before resolving. Closing
    /// the dial handle ends the wait early.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Let the next unscripted connect attempt succeed; returns its remote end.
    pub fn queue_peer(&self) -> SimPeer {
        let peer = SimPeer::new();
        lock(&self.shared.peers).push(peer.clone());
        lock(&self.shared.outcomes).push_back(Outcome::Connect(peer.clone()));
        peer
    }

    /// Refuse the next unscripted connect attempt.
    pub fn refuse_next(&self) {
        lock(&self.shared.outcomes).push_back(Outcome::Refuse);
    }

    /// Dial in to the current listener. Without an open listener the
    /// returned peer is already closed.
    pub fn dial_in(&self, device: RemoteDevice) -> SimPeer {
        let peer = SimPeer::new();
        lock(&self.shared.peers).push(peer.clone());
        let listener = lock(&self.shared.listener).clone();
        match listener {
            Some(listen) if !lock(&listen.state).closed => {
                lock(&listen.state).pending.push_back((peer.clone(), device));
                listen.cvar.notify_all();
            }
            _ => peer.disconnect(),
        }
        peer
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.shared.listener)
            .as_ref()
            .is_some_and(|l| !lock(&l.state).closed)
    }

    /// Number of outbound connect attempts made so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of outbound connects that were running at once.
    pub fn max_concurrent_connects(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of links handed out (or queued) that are still open.
    pub fn open_links(&self) -> usize {
        lock(&self.shared.peers)
            .iter()
            .filter(|p| !p.is_closed())
            .count()
    }
}

#[derive(Default)]
struct DialState {
    closed: bool,
    resolved: bool,
}

#[derive(Default)]
struct DialGate {
    state: Mutex<DialState>,
    cvar: Condvar,
}

impl Close for DialGate {
    fn close(&self) {
        let mut state = lock(&self.state);
        if !state.resolved {
            state.closed = true;
            self.cvar.notify_all();
        }
    }
}

struct SimPending {
    shared: Arc<Shared>,
    gate: Arc<DialGate>,
    address: String,
    delay: Duration,
}

impl SimPending {
    fn resolve(&self) -> Result<Link, LinkError> {
        let state = lock(&self.gate.state);
        let (mut state, _) = self
            .gate
            .cvar
            .wait_timeout_while(state, self.delay, |s| !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Err(LinkError::Closed);
        }
        state.resolved = true;
        drop(state);
        match lock(&self.shared.outcomes).pop_front() {
            Some(Outcome::Connect(peer)) => Ok(peer.link()),
            Some(Outcome::Refuse) | None => {
                Err(LinkError::transport(&self.address, "connection refused"))
            }
        }
    }
}

impl PendingLink for SimPending {
    fn finish(self: Box<Self>) -> Result<Link, LinkError> {
        if lock(&self.gate.state).closed {
            return Err(LinkError::Closed);
        }
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        let running = self.shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.resolve();
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Transport for SimTransport {
    fn dial(&self, device: &RemoteDevice) -> Dial {
        let gate = Arc::new(DialGate::default());
        Dial {
            pending: Box::new(SimPending {
                shared: self.shared.clone(),
                gate: gate.clone(),
                address: device.address.clone(),
                delay: self.connect_delay,
            }),
            handle: gate,
        }
    }

    fn listen(&self) -> Result<Listener, LinkError> {
        let listen = Arc::new(SimListen::default());
        *lock(&self.shared.listener) = Some(listen.clone());
        Ok(Listener {
            acceptor: Box::new(SimAcceptor {
                listen: listen.clone(),
            }),
            handle: listen,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn peer_lines_reach_reader_in_order() {
        let peer = SimPeer::new();
        let mut link = peer.link();
        peer.send_line("A");
        peer.send_line("B");
        assert_eq!(link.reader.read_line().unwrap(), "A");
        assert_eq!(link.reader.read_line().unwrap(), "B");
    }

    #[test]
    fn local_close_wakes_blocked_reader() {
        let peer = SimPeer::new();
        let Link { mut reader, handle } = peer.link();
        let blocked = thread::spawn(move || reader.read_line());
        thread::sleep(Duration::from_millis(20));
        handle.close();
        assert_eq!(blocked.join().unwrap(), Err(LinkError::Closed));
        assert!(peer.is_closed());
    }

    #[test]
    fn peer_disconnect_drains_pending_lines_first() {
        let peer = SimPeer::new();
        let mut link = peer.link();
        peer.send_line("last");
        peer.disconnect();
        assert_eq!(link.reader.read_line().unwrap(), "last");
        assert_eq!(link.reader.read_line(), Err(LinkError::Closed));
    }

    #[test]
    fn writes_are_visible_to_peer() {
        let peer = SimPeer::new();
        let link = peer.link();
        link.handle.write(b"ping").unwrap();
        assert_eq!(peer.written(), b"ping");
        peer.disconnect();
        assert_eq!(link.handle.write(b"x"), Err(LinkError::Closed));
    }

    fn connect(transport: &SimTransport, device: &RemoteDevice) -> Result<Link, LinkError> {
        transport.dial(device).pending.finish()
    }

    #[test]
    fn transport_consumes_outcomes_in_order() {
        let transport = SimTransport::new();
        let device = RemoteDevice::new("GEMMI", "sim:0");
        transport.refuse_next();
        let _peer = transport.queue_peer();
        assert!(connect(&transport, &device).is_err());
        assert!(connect(&transport, &device).is_ok());
        assert!(connect(&transport, &device).is_err());
        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.max_concurrent_connects(), 1);
    }

    #[test]
    fn closing_dial_handle_aborts_slow_connect() {
        let transport = SimTransport::new().with_connect_delay(Duration::from_secs(30));
        let _peer = transport.queue_peer();
        let Dial { pending, handle } = transport.dial(&RemoteDevice::new("GEMMI", "sim:0"));

        let blocked = thread::spawn(move || pending.finish().map(|_| ()));
        thread::sleep(Duration::from_millis(20));
        handle.close();
        assert_eq!(blocked.join().unwrap(), Err(LinkError::Closed));
        assert_eq!(transport.open_links(), 1);
    }

    #[test]
    fn dial_closed_before_finish_never_attempts() {
        let transport = SimTransport::new();
        let dial = transport.dial(&RemoteDevice::new("GEMMI", "sim:0"));
        dial.handle.close();
        assert_eq!(dial.pending.finish().map(|_| ()), Err(LinkError::Closed));
        assert_eq!(transport.attempts(), 0);
    }

    #[test]
    fn closing_after_resolution_keeps_the_link() {
        let transport = SimTransport::new();
        let peer = transport.queue_peer();
        let Dial { pending, handle } = transport.dial(&RemoteDevice::new("GEMMI", "sim:0"));
        let link = pending.finish().unwrap();
        handle.close();
        assert!(!peer.is_closed());
        link.handle.write(b"ok").unwrap();
    }

    #[test]
    fn dial_in_without_listener_is_refused() {
        let transport = SimTransport::new();
        let peer = transport.dial_in(RemoteDevice::new("GEMMI", "sim:1"));
        assert!(peer.is_closed());
    }

    #[test]
    fn closing_listener_wakes_acceptor() {
        let transport = SimTransport::new();
        let Listener {
            mut acceptor,
            handle,
        } = transport.listen().unwrap();
        assert!(transport.is_listening());
        let blocked = thread::spawn(move || acceptor.accept().map(|(_, d)| d));
        thread::sleep(Duration::from_millis(20));
        handle.close();
        assert_eq!(blocked.join().unwrap(), Err(LinkError::Closed));
        assert!(!transport.is_listening());
    }

    #[test]
    fn unavailable_discovery_reports_configuration_error() {
        let discovery = SimDiscovery::unavailable();
        assert!(!discovery.is_available());
        assert!(matches!(
            discovery.paired_devices(),
            Err(LinkError::Unavailable(_))
        ));
    }
}
