//! `headlink-link` – telemetry ingestion from the tracking rig.
//!
//! Discovers the rig among paired devices, keeps a single link to it alive,
//! and turns its line-oriented wire records into typed packets that the
//! render loop picks up without ever blocking on I/O.
//!
//! # Modules
//!
//! - [`codec`] – stateless record parser: one text line in, zero or more
//!   [`Packet`][headlink_types::Packet]s out.
//! - [`store`] – [`PacketStore`]: latest-value slot per packet kind with
//!   destructive `take`.
//! - [`channel`] – read loop of one established link; bad records are
//!   dropped, only a failed read ends it.
//! - [`manager`] – [`ConnectionManager`]: discovery, connect, promotion, and
//!   recovery state machine.
//! - [`transport`] – injected capability traits.
//! - [`tcp`] / [`sim`] – TCP and in-memory transports.
//! - [`events`] – [`LinkEventBus`]: broadcast of state changes and packet
//!   arrivals.
//! - [`config`] – [`LinkConfig`].

pub mod cancel;
pub mod channel;
pub mod codec;
pub mod config;
pub mod events;
pub mod manager;
pub mod sim;
pub mod store;
pub mod tcp;
pub mod transport;

pub use cancel::CancelToken;
pub use channel::PacketChannel;
pub use config::LinkConfig;
pub use events::{LinkEventBus, LinkEventReceiver};
pub use manager::ConnectionManager;
pub use store::PacketStore;
pub use transport::{DeviceDiscovery, Link, Transport};
