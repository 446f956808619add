//! TCP transport: the wireless serial socket's stand-in on hosts that reach
//! the tracking rig over IP.
//!
//! Records are newline-terminated; `\r\n` is accepted. Bytes that are not
//! valid UTF-8 are replaced rather than failing the link, so the codec drops
//! the record instead of the channel dropping the connection. A record longer
//! than [`MAX_RECORD_LEN`] is a protocol violation and ends the link.
//!
//! `std` cannot interrupt a connect already in progress, so closing a dial
//! handle stops any further address from being tried and shuts down a stream
//! that connects late.
//!
//! Discovery on such hosts is the static peer list from configuration
//! ([`StaticDiscovery`]).

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use headlink_types::{LinkError, RemoteDevice};
use tracing::debug;

use crate::config::LinkConfig;
use crate::transport::{
    Acceptor, Close, DeviceDiscovery, Dial, LineReader, Link, LinkHandle, Listener, PendingLink,
    Transport,
};

/// How often a listening acceptor checks whether it was closed.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Longest record accepted, terminator included.
pub const MAX_RECORD_LEN: usize = 64 * 1024;

// ────────────────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────────────────

/// A fixed "paired" list, typically the `[[peers]]` from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    devices: Vec<RemoteDevice>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<RemoteDevice>) -> Self {
        Self { devices }
    }
}

impl DeviceDiscovery for StaticDiscovery {
    fn paired_devices(&self) -> Result<Vec<RemoteDevice>, LinkError> {
        Ok(self.devices.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Links
// ────────────────────────────────────────────────────────────────────────────

struct TcpLineReader {
    reader: BufReader<TcpStream>,
    buf: Vec<u8>,
}

impl LineReader for TcpLineReader {
    fn read_line(&mut self) -> Result<String, LinkError> {
        self.buf.clear();
        let read = (&mut self.reader)
            .take(MAX_RECORD_LEN as u64)
            .read_until(b'\n', &mut self.buf);
        let n = read.map_err(|e| LinkError::transport(peer_label(self.reader.get_ref()), e))?;
        if n == 0 {
            return Err(LinkError::Closed);
        }
        if n == MAX_RECORD_LEN && self.buf.last() != Some(&b'\n') {
            return Err(LinkError::transport(
                peer_label(self.reader.get_ref()),
                format!("record exceeds {MAX_RECORD_LEN} bytes"),
            ));
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

struct TcpLinkHandle {
    stream: TcpStream,
}

impl Close for TcpLinkHandle {
    fn close(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(error = %e, "socket shutdown");
        }
    }
}

impl LinkHandle for TcpLinkHandle {
    fn write(&self, bytes: &[u8]) -> Result<(), LinkError> {
        (&self.stream)
            .write_all(bytes)
            .map_err(|e| LinkError::transport(peer_label(&self.stream), e))
    }
}

fn peer_label(stream: &TcpStream) -> String {
    stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Split a connected stream into a [`Link`].
pub fn link_from_stream(stream: TcpStream) -> Result<Link, LinkError> {
    let label = peer_label(&stream);
    let read_half = stream
        .try_clone()
        .map_err(|e| LinkError::transport(&label, e))?;
    Ok(Link::new(
        Box::new(TcpLineReader {
            reader: BufReader::new(read_half),
            buf: Vec::new(),
        }),
        Arc::new(TcpLinkHandle { stream }),
    ))
}

// ────────────────────────────────────────────────────────────────────────────
// Listener
// ────────────────────────────────────────────────────────────────────────────

struct TcpAcceptor {
    listener: TcpListener,
    closed: Arc<AtomicBool>,
}

impl Acceptor for TcpAcceptor {
    fn accept(&mut self) -> Result<(Link, RemoteDevice), LinkError> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(LinkError::Closed);
            }
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream
                        .set_nonblocking(false)
                        .map_err(|e| LinkError::transport(addr.to_string(), e))?;
                    let device = RemoteDevice::new(addr.to_string(), addr.to_string());
                    return Ok((link_from_stream(stream)?, device));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => return Err(LinkError::transport("listener", e)),
            }
        }
    }
}

struct ListenHandle {
    closed: Arc<AtomicBool>,
}

impl Close for ListenHandle {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// Outbound connects with a timeout; inbound accepts when a listen address
/// is configured.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    connect_timeout: Duration,
    service_name: String,
    listen_address: Option<String>,
}

impl TcpTransport {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            service_name: config.service_name.clone(),
            listen_address: None,
        }
    }

    pub fn with_listen_address(mut self, address: impl Into<String>) -> Self {
        self.listen_address = Some(address.into());
        self
    }

    /// Bind `address` and return the listener together with the bound
    /// address (useful with port `0`).
    pub fn listen_on(address: &str) -> Result<(Listener, SocketAddr), LinkError> {
        let listener =
            TcpListener::bind(address).map_err(|e| LinkError::transport(address, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| LinkError::transport(address, e))?;
        let local = listener
            .local_addr()
            .map_err(|e| LinkError::transport(address, e))?;
        let closed = Arc::new(AtomicBool::new(false));
        Ok((
            Listener {
                acceptor: Box::new(TcpAcceptor {
                    listener,
                    closed: closed.clone(),
                }),
                handle: Arc::new(ListenHandle { closed }),
            },
            local,
        ))
    }
}

#[derive(Default)]
struct DialState {
    closed: bool,
    resolved: bool,
}

struct DialHandle {
    state: Arc<Mutex<DialState>>,
}

impl Close for DialHandle {
    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.resolved {
            state.closed = true;
        }
    }
}

struct TcpPending {
    address: String,
    timeout: Duration,
    state: Arc<Mutex<DialState>>,
}

impl TcpPending {
    fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    fn connect(&self) -> Result<TcpStream, LinkError> {
        let addrs = self
            .address
            .to_socket_addrs()
            .map_err(|e| LinkError::transport(&self.address, e))?;

        let mut last_err = None;
        for addr in addrs {
            if self.is_closed() {
                return Err(LinkError::Closed);
            }
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => LinkError::transport(&self.address, e),
            None => LinkError::transport(&self.address, "address resolved to nothing"),
        })
    }
}

impl PendingLink for TcpPending {
    fn finish(self: Box<Self>) -> Result<Link, LinkError> {
        let stream = self.connect()?;
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                debug!(address = %self.address, "dial aborted; dropping late stream");
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!(error = %e, "socket shutdown");
                }
                return Err(LinkError::Closed);
            }
            state.resolved = true;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "TCP_NODELAY not set");
        }
        link_from_stream(stream)
    }
}

impl Transport for TcpTransport {
    fn dial(&self, device: &RemoteDevice) -> Dial {
        let state = Arc::new(Mutex::new(DialState::default()));
        Dial {
            pending: Box::new(TcpPending {
                address: device.address.clone(),
                timeout: self.connect_timeout,
                state: state.clone(),
            }),
            handle: Arc::new(DialHandle { state }),
        }
    }

    fn listen(&self) -> Result<Listener, LinkError> {
        let address = self.listen_address.as_deref().ok_or_else(|| {
            LinkError::Unavailable("no listen address configured".to_string())
        })?;
        let (listener, local) = Self::listen_on(address)?;
        debug!(address = %local, service = %self.service_name, "listening");
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> TcpTransport {
        TcpTransport::new(&LinkConfig {
            connect_timeout_ms: 1000,
            ..LinkConfig::default()
        })
    }

    fn connect(device: &RemoteDevice) -> Result<Link, LinkError> {
        transport().dial(device).pending.finish()
    }

    #[test]
    fn reads_crlf_terminated_records() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let mut link = connect(&device).unwrap();
        let (mut peer, _) = server.accept().unwrap();
        peer.write_all(b"GAMESTATE,3\r\nROBOTKIN,12,1.0,2.0,3.0\n").unwrap();

        assert_eq!(link.reader.read_line().unwrap(), "GAMESTATE,3");
        assert_eq!(link.reader.read_line().unwrap(), "ROBOTKIN,12,1.0,2.0,3.0");

        drop(peer);
        assert_eq!(link.reader.read_line(), Err(LinkError::Closed));
    }

    #[test]
    fn invalid_utf8_does_not_fail_the_read() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let mut link = connect(&device).unwrap();
        let (mut peer, _) = server.accept().unwrap();
        peer.write_all(b"GAME\xffSTATE,1\n").unwrap();

        let line = link.reader.read_line().unwrap();
        assert!(line.starts_with("GAME"));
    }

    #[test]
    fn writes_and_close_reach_the_peer() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let link = connect(&device).unwrap();
        let (mut peer, _) = server.accept().unwrap();
        link.handle.write(b"ping\n").unwrap();
        link.handle.close();

        let mut received = String::new();
        peer.read_to_string(&mut received).unwrap();
        assert_eq!(received, "ping\n");
    }

    #[test]
    fn refused_connect_is_a_transport_error() {
        let address = {
            let server = TcpListener::bind("127.0.0.1:0").unwrap();
            server.local_addr().unwrap().to_string()
        };
        let err = connect(&RemoteDevice::new("GEMMI", address)).unwrap_err();
        assert!(matches!(err, LinkError::Transport { .. }));
    }

    #[test]
    fn closed_dial_does_not_connect() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let dial = transport().dial(&device);
        dial.handle.close();
        assert_eq!(dial.pending.finish().map(|_| ()), Err(LinkError::Closed));
    }

    #[test]
    fn closing_dial_after_connect_keeps_the_link() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let Dial { pending, handle } = transport().dial(&device);
        let mut link = pending.finish().unwrap();
        handle.close();
        let (mut peer, _) = server.accept().unwrap();
        peer.write_all(b"GAMESTATE,1\n").unwrap();
        assert_eq!(link.reader.read_line().unwrap(), "GAMESTATE,1");
    }

    #[test]
    fn overlong_record_ends_the_link() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let mut link = connect(&device).unwrap();
        let (mut peer, _) = server.accept().unwrap();
        let writer = thread::spawn(move || {
            let _ = peer.write_all(&vec![b'7'; MAX_RECORD_LEN + 16]);
            peer
        });

        let err = link.reader.read_line().unwrap_err();
        assert!(matches!(err, LinkError::Transport { .. }));
        drop(link);
        drop(writer.join().unwrap());
    }

    #[test]
    fn record_of_exactly_max_length_is_accepted() {
        let server = TcpListener::bind("127.0.0.1:0").unwrap();
        let device = RemoteDevice::new("GEMMI", server.local_addr().unwrap().to_string());

        let mut link = connect(&device).unwrap();
        let (mut peer, _) = server.accept().unwrap();
        let mut record = vec![b'7'; MAX_RECORD_LEN - 1];
        record.push(b'\n');
        let writer = thread::spawn(move || {
            peer.write_all(&record).unwrap();
            peer
        });

        assert_eq!(link.reader.read_line().unwrap().len(), MAX_RECORD_LEN - 1);
        drop(writer.join().unwrap());
    }

    #[test]
    fn listen_without_address_is_unavailable() {
        assert!(matches!(
            transport().listen(),
            Err(LinkError::Unavailable(_))
        ));
    }

    #[test]
    fn acceptor_yields_inbound_link_and_stops_when_closed() {
        let (Listener { mut acceptor, handle }, local) =
            TcpTransport::listen_on("127.0.0.1:0").unwrap();

        let mut client = TcpStream::connect(local).unwrap();
        let (mut link, device) = acceptor.accept().unwrap();
        assert_eq!(device.address, client.local_addr().unwrap().to_string());

        client.write_all(b"GAMESTATE,2\n").unwrap();
        assert_eq!(link.reader.read_line().unwrap(), "GAMESTATE,2");

        handle.close();
        assert_eq!(acceptor.accept().map(|(_, d)| d), Err(LinkError::Closed));
    }

    #[test]
    fn static_discovery_lists_configured_peers() {
        let discovery = StaticDiscovery::new(vec![RemoteDevice::new("GEMMI", "10.0.0.2:7000")]);
        assert!(discovery.is_available());
        assert_eq!(discovery.paired_devices().unwrap().len(), 1);
    }
}
