use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use meshcast_core::config::{MeshcastConfig, PeerRole};
use meshcast_core::{Message, PeerAddr, SendTarget};
use meshcast_engine::{PeerStats, StatsRegistry, StreamingPeer};

// ── Mesh router ───────────────────────────────────────────────────────────────

/// Delivery decision: (from, to, is_broadcast, message) → deliver?
type Filter = Arc<Mutex<Box<dyn Fn(PeerAddr, PeerAddr, bool, &Message) -> bool + Send>>>;

/// In-process mesh segment. Each joined peer gets a router task that
/// fans its outbound traffic to the other peers' inboxes, subject to
/// the current filter. Unfiltered by default.
pub struct Mesh {
    inboxes: Arc<Mutex<HashMap<PeerAddr, mpsc::Sender<(PeerAddr, Message)>>>>,
    filter: Filter,
    pub shutdown: broadcast::Sender<()>,
    pub registry: StatsRegistry,
}

impl Mesh {
    pub fn new() -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            inboxes: Arc::new(Mutex::new(HashMap::new())),
            filter: Arc::new(Mutex::new(Box::new(|_, _, _, _| true))),
            shutdown,
            registry: StatsRegistry::new(),
        }
    }

    /// Replace the delivery filter. Takes effect for the next message,
    /// so tests can change link conditions mid-run.
    pub fn set_filter(
        &self,
        filter: impl Fn(PeerAddr, PeerAddr, bool, &Message) -> bool + Send + 'static,
    ) {
        *self.filter.lock().unwrap() = Box::new(filter);
    }

    /// Join a peer to the mesh and start its engine.
    pub fn spawn_peer(
        &self,
        name: &str,
        addr: PeerAddr,
        config: MeshcastConfig,
    ) -> JoinHandle<anyhow::Result<PeerStats>> {
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<(SendTarget, Message)>(1024);
        let (inbound_tx, inbound_rx) = mpsc::channel(1024);
        self.inboxes.lock().unwrap().insert(addr, inbound_tx);

        let inboxes = self.inboxes.clone();
        let filter = self.filter.clone();
        tokio::spawn(async move {
            while let Some((target, message)) = outbound_rx.recv().await {
                let is_broadcast = matches!(target, SendTarget::Broadcast);
                let destinations: Vec<(PeerAddr, mpsc::Sender<(PeerAddr, Message)>)> = {
                    let inboxes = inboxes.lock().unwrap();
                    match target {
                        SendTarget::Broadcast => inboxes
                            .iter()
                            .filter(|(dest, _)| **dest != addr)
                            .map(|(dest, tx)| (*dest, tx.clone()))
                            .collect(),
                        SendTarget::Peer { addr: dest } => inboxes
                            .get(&dest)
                            .map(|tx| (dest, tx.clone()))
                            .into_iter()
                            .collect(),
                    }
                };
                for (dest, tx) in destinations {
                    let deliver = {
                        let filter = filter.lock().unwrap();
                        (*filter)(addr, dest, is_broadcast, &message)
                    };
                    if deliver {
                        let _ = tx.send((addr, message.clone())).await;
                    }
                }
            }
        });

        let peer =
            StreamingPeer::new(name, config, outbound_tx, inbound_rx, self.shutdown.subscribe())
                .expect("test config must validate")
                .with_rng_seed(u64::from(addr.addr.segments()[7]) + 1)
                .with_stats_registry(self.registry.clone());
        tokio::spawn(peer.run())
    }

    /// Stop every engine and wait for the final stats to be published.
    pub async fn stop(&self, handles: Vec<JoinHandle<anyhow::Result<PeerStats>>>) {
        let _ = self.shutdown.send(());
        for handle in handles {
            handle
                .await
                .expect("engine task must not panic")
                .expect("engine must stop cleanly on shutdown");
        }
    }

    pub fn stats(&self, name: &str) -> PeerStats {
        self.registry
            .get(name)
            .unwrap_or_else(|| panic!("no stats published for {name}"))
    }
}

// ── Test fixtures ─────────────────────────────────────────────────────────────

pub fn addr(last: u16) -> PeerAddr {
    PeerAddr::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, last), 1)
}

/// 1250-byte chunks at 100 kbit/s: one push every 100ms.
fn base_config() -> MeshcastConfig {
    let mut config = MeshcastConfig::default();
    config.stream.data_rate = 100_000;
    config.stream.packet_size = 1250;
    config.stream.window_size = 16;
    config.pull.time_ms = 100;
    config.pull.max = 3;
    config.pull.slot_ms = 200;
    config.pull.reply_max = 4;
    config.hello.time_ms = 500;
    config.hello.loss = 2;
    config
}

pub fn source_config() -> MeshcastConfig {
    let mut config = base_config();
    config.node.role = PeerRole::Source;
    config
}

pub fn peer_config() -> MeshcastConfig {
    base_config()
}
