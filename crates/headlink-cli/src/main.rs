//! `headlink` – tracking-rig link monitor.
//!
//! 1. Loads `~/.headlink/config.toml` (writing defaults on first run).
//! 2. Starts the connection manager over TCP, or over an in-memory link fed
//!    with sample records when run with `--sim`.
//! 3. Logs link state changes from the event bus and prints every decoded
//!    packet once per frame tick (`--json` for JSON lines).
//! 4. Stops the link cleanly on **Ctrl-C**.

mod config;
mod monitor;
mod telemetry;

use clap::Parser;
use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use headlink_link::sim::{SimDiscovery, SimPeer, SimTransport};
use headlink_link::tcp::{StaticDiscovery, TcpTransport};
use headlink_link::{ConnectionManager, DeviceDiscovery, LinkEventReceiver, Transport};
use headlink_types::{LinkEvent, LinkEventKind, Packet, RemoteDevice};

/// Render-loop cadence of the monitor.
const FRAME: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "headlink", version, about = "Tracking-rig link monitor")]
struct Options {
    /// Run against an in-memory link replaying sample records
    #[arg(long)]
    sim: bool,

    /// Print packets and link events as JSON lines
    #[arg(long)]
    json: bool,
}

fn main() {
    let _telemetry = telemetry::init_tracing("headlink");

    let options = Options::parse();
    if !options.json {
        print_banner();
    }

    let cfg = load_config();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; stop with SIGKILL");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("headlink-events")
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start event runtime");
            std::process::exit(1);
        }
    };

    let manager = if options.sim {
        sim_manager(&cfg, shutdown.clone())
    } else {
        tcp_manager(&cfg)
    };
    runtime.spawn(report_events(manager.subscribe(), options.json));
    manager.start();

    // ── Frame loop ────────────────────────────────────────────────────────
    let store = manager.store();
    let mut monitor = monitor::Monitor::new();
    while !shutdown.load(Ordering::SeqCst) {
        for packet in monitor.drain(&store, Instant::now()) {
            print_packet(&packet, options.json);
        }
        if monitor.take_ready_transition() {
            info!(
                yaw = monitor.estimator().predicted_yaw().unwrap_or_default(),
                "head pose estimator ready"
            );
        }
        thread::sleep(FRAME);
    }

    if !options.json {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing link …".yellow().bold());
    }
    manager.stop();
    runtime.shutdown_timeout(Duration::from_millis(200));
    if !options.json {
        println!("{}", "  ✓ Link stopped.".green());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Setup
// ─────────────────────────────────────────────────────────────────────────────

fn load_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => info!(path = %config::config_path().display(), "wrote default config"),
                Err(e) => warn!(error = %e, "could not write default config"),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            warn!(error = %e, "config error; using defaults");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn tcp_manager(cfg: &config::Config) -> ConnectionManager {
    let link = cfg.effective_link();
    if cfg.peers.is_empty() && cfg.listen_address.is_none() {
        warn!("no [[peers]] and no listen_address configured; nothing to connect to");
    }
    let discovery: Arc<dyn DeviceDiscovery> = Arc::new(StaticDiscovery::new(cfg.peers.clone()));
    let mut transport = TcpTransport::new(&link);
    if let Some(address) = &cfg.listen_address {
        transport = transport.with_listen_address(address.clone());
    }
    let transport: Arc<dyn Transport> = Arc::new(transport);
    ConnectionManager::new(link, discovery, transport)
}

fn sim_manager(cfg: &config::Config, shutdown: Arc<AtomicBool>) -> ConnectionManager {
    let link = cfg.effective_link();
    let device = RemoteDevice::new(format!("{}-SIM", link.target_name), "sim:0");
    let discovery = Arc::new(SimDiscovery::new(vec![device]));
    let transport = Arc::new(SimTransport::new());
    let peer = transport.queue_peer();

    if let Err(e) = thread::Builder::new()
        .name("headlink-sim-feed".to_string())
        .spawn(move || feed_samples(&peer, &shutdown))
    {
        warn!(error = %e, "failed to start sample feed");
    }
    ConnectionManager::new(link, discovery, transport)
}

/// Replay a short tracking session into `peer` at ~30 Hz.
fn feed_samples(peer: &SimPeer, shutdown: &AtomicBool) {
    const ROT: &str = "1,0,0,0,1,0,0,0,1";
    let mut frame: u32 = 0;
    while !shutdown.load(Ordering::SeqCst) && !peer.is_closed() {
        let t = frame as f32 * 0.033;
        let x = t.sin() * 0.2;
        peer.send_line(&format!(
            "JOINT,33,SEP,3,2,{x:.3},1.70,2.00,SEP,11,1,{x:.3},1.00,2.10"
        ));
        peer.send_line(&format!(
            "MARKER,33,HEAD,{x:.3},1.72,2.00,{ROT},ROBOT,0.00,0.80,1.00,{ROT}"
        ));
        if frame % 30 == 0 {
            peer.send_line(&format!("ROBOTKIN,33,{:.3},0.80,1.00", x * 0.5));
            peer.send_line(&format!("GAMESTATE,{}", (frame / 30) % 4));
        }
        frame = frame.wrapping_add(1);
        thread::sleep(Duration::from_millis(33));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

async fn report_events(mut events: LinkEventReceiver, json: bool) {
    while let Some(event) = events.recv().await {
        if matches!(event.kind, LinkEventKind::PacketPublished(_)) {
            continue;
        }
        if json {
            print_json(&event);
        } else {
            print_event(&event);
        }
    }
}

fn print_event(event: &LinkEvent) {
    let stamp = event.timestamp.format("%H:%M:%S%.3f").to_string().dimmed();
    match &event.kind {
        LinkEventKind::StateChanged { from, to } => {
            println!("  {} link {} → {}", stamp, from.to_string().dimmed(), to.to_string().bold().cyan());
        }
        LinkEventKind::DeviceConnected(device) => {
            println!(
                "  {} {} {} ({})",
                stamp,
                "connected to".green(),
                device.name.bold(),
                device.address
            );
        }
        LinkEventKind::PacketPublished(_) => {}
    }
}

fn print_packet(packet: &Packet, json: bool) {
    if json {
        print_json(packet);
    } else {
        println!("  {}", monitor::describe(packet));
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "failed to serialise output"),
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   _                _ _ _       _    "#.bold().cyan());
    println!("{}", r#"  | |_  ___ __ _ __| | (_)_ _  | |__ "#.bold().cyan());
    println!("{}", r#"  | ' \/ -_) _` / _` | | | ' \ | / / "#.bold().cyan());
    println!("{}", r#"  |_||_\___\__,_\__,_|_|_|_||_||_\_\ "#.bold().cyan());
    println!();
    println!("  {}", "Tracking-rig link monitor".dimmed());
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Options::command().debug_assert();
    }

    #[test]
    fn parses_flags() {
        let options = Options::try_parse_from(["headlink", "--json", "--sim"]).unwrap();
        assert!(options.json && options.sim);

        let options = Options::try_parse_from(["headlink"]).unwrap();
        assert!(!options.json && !options.sim);
    }

    #[test]
    fn rejects_unknown_argument() {
        let err = Options::try_parse_from(["headlink", "--verbose"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
