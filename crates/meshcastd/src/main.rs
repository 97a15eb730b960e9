//! meshcastd — Meshcast mesh-streaming daemon.
//!
//! Wires one StreamingPeer to a real IPv6 link-local multicast segment.
//! Everything protocol-shaped lives in meshcast-engine; this binary only
//! owns sockets, config, and lifecycle.

use std::net::Ipv6Addr;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;

use meshcast_core::config::MeshcastConfig;
use meshcast_core::PeerAddr;
use meshcast_engine::{PeerStats, StatsRegistry, StreamingPeer};

mod net;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshcastConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeshcastConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshcastConfig::default()
    });
    config.validate().context("invalid configuration")?;

    let interface = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.node.interface.clone());
    if interface.is_empty() {
        anyhow::bail!("no interface: pass one as the first argument or set node.interface");
    }
    tracing::info!(interface, role = ?config.node.role, "meshcastd starting");

    let interface_index = net::if_index(&interface)?;

    // Get our link-local address
    let local_addr: Ipv6Addr = {
        let probe = std::net::UdpSocket::bind("[::]:0")?;
        let dest = std::net::SocketAddrV6::new(
            net::MULTICAST_ADDR.parse()?,
            net::PORT,
            0,
            interface_index,
        );
        probe.connect(dest)?;
        match probe.local_addr()? {
            std::net::SocketAddr::V6(v6) => *v6.ip(),
            _ => anyhow::bail!("expected IPv6 local address"),
        }
    };
    tracing::info!(addr = %local_addr, "local link-local address");

    let sender_socket = net::make_sender(interface_index)?;
    let listener_socket = net::make_listener(interface_index)?;

    // Transport channels — the engine owns the near ends.
    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let (inbound_tx, inbound_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let registry = StatsRegistry::new();
    let name = PeerAddr::new(local_addr, interface_index).to_string();
    let mut peer = StreamingPeer::new(name, config.clone(), outbound_tx, inbound_rx, shutdown_rx)
        .context("failed to build peer")?
        .with_stats_registry(registry.clone());
    if let Some(source) = config.node.source_addr {
        peer = peer.with_source(PeerAddr::new(source, interface_index));
    }

    tokio::spawn(net::outbound_loop(sender_socket, outbound_rx, interface_index));
    tokio::spawn(net::inbound_loop(
        listener_socket,
        inbound_tx,
        local_addr,
        interface_index,
    ));
    let mut engine = tokio::spawn(peer.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            let _ = shutdown_tx.send(());
        }
        result = &mut engine => {
            report_engine(result);
            return Ok(());
        }
    }

    report_engine(engine.await);
    Ok(())
}

fn report_engine(result: Result<Result<PeerStats, anyhow::Error>, JoinError>) {
    match result {
        Ok(Ok(stats)) => tracing::info!(
            pushed = stats.chunks_pushed,
            relayed = stats.chunks_relayed,
            received = stats.chunks_received,
            recovered = stats.pulls_recovered,
            "engine stopped"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "engine failed"),
        Err(e) => tracing::error!(error = %e, "engine task panicked"),
    }
}
