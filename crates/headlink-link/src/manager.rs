//! Connection manager: discovery, connection lifecycle, and recovery.
//!
//! [`ConnectionManager`] finds the configured peer among already-paired
//! devices, keeps exactly one link alive, and re-enters discovery whenever a
//! connect attempt fails or an established link drops.
//!
//! # State machine
//!
//! | From | Trigger | To |
//! |---|---|---|
//! | `Idle` | [`start`](ConnectionManager::start) | `Listening` |
//! | `Listening` | matching device found | `Connecting` |
//! | `Connecting` | connect succeeded | `Connected` |
//! | `Connecting` | connect failed, after one poll interval | `Listening` |
//! | `Connected` | link lost | `Listening` |
//! | any | [`stop`](ConnectionManager::stop) | `Idle` |
//!
//! # Tasks
//!
//! Each lifecycle phase runs on its own OS thread: discovery (poll + sleep),
//! inbound accept, one outbound connect attempt, and the packet channel of
//! the connected link. The state field and all task handles live behind one
//! mutex. Every slot replacement cancels the previous occupant before the
//! new task is spawned, so a task whose token is still live under the lock
//! owns its slot. Cancellation closes the dial, link or listener underneath
//! the blocked call and sets the task's token; a cancelled task never reports
//! a failure and never promotes a link.
//!
//! A new connect thread joins every cancelled connect thread before it dials,
//! so at most one outbound connect is in flight even when the transport
//! cannot abort a connect that has already started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use headlink_types::{ConnectionState, LinkError, LinkEventKind, RemoteDevice};
use thread_priority::{ThreadPriority, set_current_thread_priority};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::channel::{self, PacketChannel};
use crate::config::LinkConfig;
use crate::events::{LinkEventBus, LinkEventReceiver};
use crate::store::PacketStore;
use crate::transport::{
    Acceptor, Close, DeviceDiscovery, Dial, LineReader, Link, Listener, PendingLink, Transport,
};

// ────────────────────────────────────────────────────────────────────────────
// Task slots
// ────────────────────────────────────────────────────────────────────────────

struct Task {
    token: CancelToken,
    closer: Option<Arc<dyn Close>>,
    thread: JoinHandle<()>,
}

impl Task {
    fn signal(&self) {
        self.token.cancel();
        if let Some(closer) = &self.closer {
            closer.close();
        }
    }

    fn cancel(self) {
        self.signal();
    }

    /// Cancel and hand back the thread so a successor can wait for it.
    fn retire(self) -> JoinHandle<()> {
        self.signal();
        self.thread
    }

    fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

struct ConnectedTask {
    task: Task,
    channel: PacketChannel,
}

impl ConnectedTask {
    fn cancel(self) {
        self.task.token.cancel();
        self.channel.close();
    }
}

struct Slots {
    state: ConnectionState,
    discover: Option<Task>,
    accept: Option<Task>,
    connect: Option<Task>,
    /// Cancelled connect threads that may still be inside the transport.
    retired_connects: Vec<JoinHandle<()>>,
    connected: Option<ConnectedTask>,
}

impl Slots {
    fn cancel_discover(&mut self) {
        if let Some(task) = self.discover.take() {
            task.cancel();
        }
    }

    fn cancel_accept(&mut self) {
        if let Some(task) = self.accept.take() {
            task.cancel();
        }
    }

    fn cancel_connect(&mut self) {
        if let Some(task) = self.connect.take() {
            self.retired_connects.retain(|t| !t.is_finished());
            self.retired_connects.push(task.retire());
        }
    }

    fn cancel_connected(&mut self) {
        if let Some(task) = self.connected.take() {
            task.cancel();
        }
    }
}

fn needs_spawn(slot: &Option<Task>) -> bool {
    slot.as_ref().is_none_or(Task::is_finished)
}

// ────────────────────────────────────────────────────────────────────────────
// ConnectionManager
// ────────────────────────────────────────────────────────────────────────────

struct Inner {
    config: LinkConfig,
    discovery: Arc<dyn DeviceDiscovery>,
    transport: Arc<dyn Transport>,
    store: Arc<PacketStore>,
    events: LinkEventBus,
    slots: Mutex<Slots>,
    unavailable_logged: AtomicBool,
}

/// Owner of the link lifecycle. Clones share the same state.
///
/// Background threads hold a clone, so call [`stop`](Self::stop) to release
/// them.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: LinkConfig,
        discovery: Arc<dyn DeviceDiscovery>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                discovery,
                transport,
                store: Arc::new(PacketStore::new()),
                events: LinkEventBus::default(),
                slots: Mutex::new(Slots {
                    state: ConnectionState::Idle,
                    discover: None,
                    accept: None,
                    connect: None,
                    retired_connects: Vec::new(),
                    connected: None,
                }),
                unavailable_logged: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// The peer of the current link, if connected.
    pub fn connected_device(&self) -> Option<RemoteDevice> {
        self.lock()
            .connected
            .as_ref()
            .map(|c| c.channel.device().clone())
    }

    /// The store the packet channel publishes into.
    pub fn store(&self) -> Arc<PacketStore> {
        self.inner.store.clone()
    }

    pub fn subscribe(&self) -> LinkEventReceiver {
        self.inner.events.subscribe()
    }

    /// Enter `Listening` and launch discovery (and the accept loop when
    /// enabled). Cancels any in-flight connect attempt or connected link.
    /// Calling it again is harmless.
    pub fn start(&self) {
        let mut slots = self.lock();
        self.start_locked(&mut slots);
    }

    /// Launch an outbound connect to `device`, replacing any attempt already
    /// in flight.
    pub fn connect(&self, device: RemoteDevice) {
        let mut slots = self.lock();
        self.connect_locked(&mut slots, device);
    }

    /// Promote an established link: cancel every other task and start the
    /// packet channel over `link`.
    pub fn on_connected(&self, link: Link, device: RemoteDevice) {
        let mut slots = self.lock();
        self.on_connected_locked(&mut slots, link, device);
    }

    /// Cancel every task and return to `Idle`.
    pub fn stop(&self) {
        let mut slots = self.lock();
        info!("stopping link");
        slots.cancel_discover();
        slots.cancel_accept();
        slots.cancel_connect();
        slots.cancel_connected();
        self.set_state(&mut slots, ConnectionState::Idle);
    }

    /// Forward `bytes` to the connected peer. A no-op unless connected;
    /// write failures are logged by the channel.
    pub fn write(&self, bytes: &[u8]) {
        let channel = {
            let slots = self.lock();
            if slots.state != ConnectionState::Connected {
                debug!(state = %slots.state, "write ignored while not connected");
                return;
            }
            slots.connected.as_ref().map(|c| c.channel.clone())
        };
        if let Some(channel) = channel {
            channel.write(bytes);
        }
    }

    // ── Transitions (lock held) ────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, slots: &mut Slots, to: ConnectionState) {
        let from = slots.state;
        if from == to {
            return;
        }
        slots.state = to;
        info!(%from, %to, "link state changed");
        self.inner
            .events
            .publish(LinkEventKind::StateChanged { from, to });
    }

    fn capabilities_available(&self) -> bool {
        if self.inner.discovery.is_available() && self.inner.transport.is_available() {
            return true;
        }
        if !self.inner.unavailable_logged.swap(true, Ordering::SeqCst) {
            warn!("no discovery or transport capability on this host; link disabled");
        }
        false
    }

    fn start_locked(&self, slots: &mut Slots) {
        if !self.capabilities_available() {
            return;
        }
        slots.cancel_connect();
        slots.cancel_connected();
        self.set_state(slots, ConnectionState::Listening);

        if needs_spawn(&slots.discover) {
            slots.discover =
                self.spawn_task("headlink-discovery", None, |this, token| {
                    this.discovery_loop(&token)
                });
        }
        if self.inner.config.accept_inbound && needs_spawn(&slots.accept) {
            slots.accept = self.spawn_accept();
        }
    }

    fn connect_locked(&self, slots: &mut Slots, device: RemoteDevice) {
        info!(device = %device.name, address = %device.address, "connecting");
        slots.cancel_connect();
        slots.cancel_connected();

        let Dial { pending, handle } = self.inner.transport.dial(&device);
        let previous = std::mem::take(&mut slots.retired_connects);
        let task = self.spawn_task("headlink-connect", Some(handle), move |this, token| {
            for thread in previous {
                if thread.join().is_err() {
                    warn!("previous connect thread panicked");
                }
            }
            this.connect_attempt(pending, device, &token)
        });
        match task {
            Some(task) => {
                slots.connect = Some(task);
                self.set_state(slots, ConnectionState::Connecting);
            }
            None => self.start_locked(slots),
        }
    }

    fn on_connected_locked(&self, slots: &mut Slots, link: Link, device: RemoteDevice) {
        info!(device = %device.name, address = %device.address, "connected");
        slots.cancel_connect();
        slots.cancel_connected();
        slots.cancel_accept();
        slots.cancel_discover();

        let Link { reader, handle } = link;
        let channel = PacketChannel::new(device.clone(), handle);
        let peer = device.clone();
        let task = self.spawn_task("headlink-channel", None, move |this, token| {
            this.channel_loop(reader, &peer, &token)
        });
        match task {
            Some(task) => {
                slots.connected = Some(ConnectedTask { task, channel });
                self.set_state(slots, ConnectionState::Connected);
                self.inner
                    .events
                    .publish(LinkEventKind::DeviceConnected(device));
            }
            None => {
                channel.close();
                self.start_locked(slots);
            }
        }
    }

    // ── Task bodies ────────────────────────────────────────────────────────

    fn spawn_task<F>(&self, name: &str, closer: Option<Arc<dyn Close>>, body: F) -> Option<Task>
    where
        F: FnOnce(ConnectionManager, CancelToken) + Send + 'static,
    {
        let token = CancelToken::new();
        let this = self.clone();
        let task_token = token.clone();
        match thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(this, task_token))
        {
            Ok(thread) => Some(Task {
                token,
                closer,
                thread,
            }),
            Err(e) => {
                error!(thread = name, error = %e, "failed to spawn link thread");
                if let Some(closer) = closer {
                    closer.close();
                }
                None
            }
        }
    }

    fn spawn_accept(&self) -> Option<Task> {
        match self.inner.transport.listen() {
            Ok(Listener { acceptor, handle }) => {
                info!(service = %self.inner.config.service_name, "accepting inbound links");
                self.spawn_task("headlink-accept", Some(handle), move |this, token| {
                    this.accept_loop(acceptor, &token)
                })
            }
            Err(LinkError::Unavailable(reason)) => {
                debug!(reason = %reason, "inbound links unavailable");
                None
            }
            Err(e) => {
                warn!(error = %e, "unable to listen for inbound links");
                None
            }
        }
    }

    fn discovery_loop(&self, token: &CancelToken) {
        let target = self.inner.config.target_name.as_str();
        debug!(target_name = target, "discovery started");
        loop {
            if token.is_cancelled() {
                break;
            }
            match self.inner.discovery.paired_devices() {
                Ok(devices) => {
                    if let Some(device) = devices.into_iter().find(|d| d.name.contains(target)) {
                        info!(device = %device.name, address = %device.address, "found paired device");
                        let mut slots = self.lock();
                        if token.is_cancelled() {
                            break;
                        }
                        slots.discover = None;
                        self.connect_locked(&mut slots, device);
                        break;
                    }
                }
                Err(LinkError::Unavailable(reason)) => {
                    if !self.inner.unavailable_logged.swap(true, Ordering::SeqCst) {
                        warn!(reason = %reason, "device discovery unavailable; link disabled");
                    }
                    let mut slots = self.lock();
                    if !token.is_cancelled() {
                        slots.discover = None;
                        slots.cancel_accept();
                        self.set_state(&mut slots, ConnectionState::Idle);
                    }
                    break;
                }
                Err(e) => warn!(error = %e, "paired device query failed"),
            }
            if token.sleep(self.inner.config.poll_interval()) {
                break;
            }
        }
        debug!("discovery stopped");
    }

    fn accept_loop(&self, mut acceptor: Box<dyn Acceptor>, token: &CancelToken) {
        loop {
            let (link, device) = match acceptor.accept() {
                Ok(accepted) => accepted,
                Err(e) => {
                    if !token.is_cancelled() {
                        warn!(error = %e, "accepting inbound link failed");
                    }
                    break;
                }
            };
            let mut slots = self.lock();
            if token.is_cancelled() {
                link.handle.close();
                break;
            }
            match slots.state {
                ConnectionState::Listening | ConnectionState::Connecting => {
                    self.on_connected_locked(&mut slots, link, device);
                    break;
                }
                ConnectionState::Idle | ConnectionState::Connected => {
                    debug!(device = %device.name, state = %slots.state, "rejecting inbound link");
                    link.handle.close();
                }
            }
        }
        debug!("accept loop stopped");
    }

    fn connect_attempt(
        &self,
        pending: Box<dyn PendingLink>,
        device: RemoteDevice,
        token: &CancelToken,
    ) {
        if token.is_cancelled() {
            return;
        }
        match pending.finish() {
            Ok(link) => {
                let mut slots = self.lock();
                if token.is_cancelled() {
                    debug!(device = %device.name, "connect superseded; closing link");
                    link.handle.close();
                    return;
                }
                self.on_connected_locked(&mut slots, link, device);
            }
            Err(e) => {
                if token.is_cancelled() {
                    return;
                }
                warn!(device = %device.name, error = %e, "unable to connect device");
                self.connection_failed(token);
            }
        }
    }

    /// Wait one poll interval, then re-enter `Listening`.
    fn connection_failed(&self, token: &CancelToken) {
        if token.sleep(self.inner.config.poll_interval()) {
            return;
        }
        let mut slots = self.lock();
        if token.is_cancelled() {
            return;
        }
        self.start_locked(&mut slots);
    }

    fn channel_loop(&self, mut reader: Box<dyn LineReader>, device: &RemoteDevice, token: &CancelToken) {
        raise_priority();
        debug!(device = %device.name, "channel started");
        let err = channel::pump(reader.as_mut(), &self.inner.store, &self.inner.events);
        if token.is_cancelled() {
            debug!(device = %device.name, "channel closed");
            return;
        }
        warn!(device = %device.name, error = %err, "device connection was lost");
        self.connection_lost(token);
    }

    fn connection_lost(&self, token: &CancelToken) {
        let mut slots = self.lock();
        if token.is_cancelled() {
            return;
        }
        self.start_locked(&mut slots);
    }
}

/// Run the calling thread at the highest priority the platform grants.
/// Returns `false`, after a warning, when the request is refused.
fn raise_priority() -> bool {
    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = ?e, "channel thread keeps default priority");
            false
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("target", &self.inner.config.target_name)
            .finish_non_exhaustive()
    }
}
