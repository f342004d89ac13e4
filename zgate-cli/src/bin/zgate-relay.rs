//! zgate Relay - protects a local media stream on its way to a remote relay
//!
//! Cleartext RTP arriving on `local_listen` is protected and sent to the
//! peer relay; protected RTP from the peer is unprotected and delivered to
//! `local_dest`. Key negotiation control packets travel on the same socket
//! as the protected media.
//!
//! Examples:
//!   zgate-relay --example initiator > relay.toml
//!   zgate-relay --config relay.toml -v

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zgate::io::{Connector, UdpConnector};
use zgate::{EventSink, GatePhase, SecurityEvent, SecurityGate};
use zgate_cli::{compact_stats, display_gate_stats, PresharedEngine, RelayConfig, RoleConfig};

#[derive(Parser, Debug)]
#[command(name = "zgate-relay")]
#[command(about = "Media relay with key negotiation and SRTP protection", long_about = None)]
struct Args {
    /// Relay configuration file (TOML)
    #[arg(short, long, required_unless_present = "example")]
    config: Option<PathBuf>,

    /// Print an example configuration for the given role and exit
    #[arg(long, value_enum)]
    example: Option<ExampleRole>,

    /// Override the statistics interval in seconds (0 disables)
    #[arg(long)]
    stats: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ExampleRole {
    Initiator,
    Responder,
}

impl From<ExampleRole> for RoleConfig {
    fn from(role: ExampleRole) -> Self {
        match role {
            ExampleRole::Initiator => RoleConfig::Initiator,
            ExampleRole::Responder => RoleConfig::Responder,
        }
    }
}

/// Reports gate events through the log
struct LogSink;

impl EventSink for LogSink {
    fn on_event(&self, event: SecurityEvent) {
        match event {
            SecurityEvent::Initialized => tracing::debug!("Gate ready"),
            SecurityEvent::SecureOn { cipher } => tracing::info!("Secure: {}", cipher),
            SecurityEvent::ShowSas { sas, verified } => {
                tracing::info!("SAS: {} ({})", sas, if verified { "verified" } else { "unverified" })
            }
            SecurityEvent::SecureOff { direction } => {
                tracing::warn!("Security off for {} direction", direction)
            }
            SecurityEvent::Message { code } => tracing::info!("{}", code),
            SecurityEvent::NegotiationFailed { code } => {
                tracing::error!("Negotiation failed: {}", code)
            }
            SecurityEvent::NotSupportedByOther => {
                tracing::warn!("Peer relay does not answer key negotiation")
            }
            other => tracing::info!("{:?}", other),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(role) = args.example {
        print!("{}", toml::to_string_pretty(&RelayConfig::example(role.into()))?);
        return Ok(());
    }

    let path = args.config.context("--config is required")?;
    let mut config = RelayConfig::from_file(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    if let Some(stats) = args.stats {
        config.stats_interval_secs = stats;
    }
    let secrets = config
        .secrets()?
        .context("No [keys] section: the relay needs pre-shared keys")?;

    tracing::info!("zgate relay starting...");
    tracing::info!("Wire: {} <-> {}", config.network.bind, config.network.peer);
    tracing::info!(
        "Local: in {} / out {}",
        config.network.local_listen,
        config.network.local_dest
    );

    let wire = UdpConnector::bind(config.network.bind)?;
    wire.connect(config.network.peer)?;
    wire.set_read_timeout(Some(Duration::from_millis(500)))?;
    let local = UdpSocket::bind(config.network.local_listen)?;

    let gate = SecurityGate::new();
    gate.set_connector(Arc::new(wire.try_clone()?));
    gate.set_event_sink(Arc::new(LogSink));
    gate.initialize(config.gate_config(), &PresharedEngine::factory(secrets))?;

    if !config.auto_enable {
        // no auto-sensing: process control packets and start right away
        gate.set_enabled(true);
        gate.start();
    }

    let wire_out = wire.try_clone()?;
    let inbound_gate = gate.clone();
    let inbound_local = local.try_clone()?;
    let local_dest = config.network.local_dest;
    let mtu = config.network.mtu;
    thread::Builder::new()
        .name("zgate-inbound".to_string())
        .spawn(move || {
            if let Err(e) = relay_inbound(&inbound_gate, &wire, &inbound_local, local_dest, mtu) {
                tracing::error!("Inbound relay stopped: {:#}", e);
            }
        })?;

    if let Some(interval) = config.stats_interval() {
        let stats_gate = gate.clone();
        thread::spawn(move || loop {
            thread::sleep(interval);
            tracing::info!("{}", compact_stats(&stats_gate));
        });
    }

    let result = relay_outbound(&gate, &local, &wire_out, mtu);

    gate.stop();
    display_gate_stats(&gate.stats());
    result
}

/// Wire to local: unprotect and deliver, control packets stay in the gate
fn relay_inbound(
    gate: &SecurityGate,
    wire: &UdpConnector,
    local: &UdpSocket,
    dest: SocketAddr,
    mtu: usize,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; mtu];
    loop {
        let n = match wire.recv(&mut buf) {
            Ok(n) => n,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e.into()),
        };
        if gate.phase() == GatePhase::Stopped {
            return Ok(());
        }
        if let Some(packet) = gate.receive_media(Bytes::copy_from_slice(&buf[..n])) {
            local.send_to(&packet, dest)?;
        }
    }
}

/// Local to wire: protect and forward
fn relay_outbound(
    gate: &SecurityGate,
    local: &UdpSocket,
    wire: &UdpConnector,
    mtu: usize,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; mtu];
    loop {
        let (n, _) = local.recv_from(&mut buf)?;
        let Some(packet) = gate.send_media(Bytes::copy_from_slice(&buf[..n])) else {
            continue;
        };
        if let Err(e) = wire.write(&packet) {
            tracing::warn!("Failed to forward {} bytes: {}", packet.len(), e);
        }
    }
}
