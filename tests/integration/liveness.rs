use std::time::Duration;

use tokio::time;

use crate::infra::*;

/// Two idle peers discover each other by Hello alone; when one goes
/// silent, the other drops it after the configured number of missed
/// hello periods.
#[tokio::test(start_paused = true)]
async fn silent_peer_is_expired_after_hello_loss() {
    let mesh = Mesh::new();
    let quiet = addr(2);

    let handles = vec![
        mesh.spawn_peer("peer-a", addr(1), peer_config()),
        mesh.spawn_peer("peer-b", quiet, peer_config()),
    ];

    // Discovery phase: hellos flow both ways.
    time::sleep(Duration::from_secs(3)).await;

    // Peer B falls silent — its transmissions stop reaching anyone.
    mesh.set_filter(move |from, _, _, _| from != quiet);

    // hello.time_ms = 500, hello.loss = 2: B is gone from A's neighbor
    // set after two silent periods. Give it a few extra periods.
    time::sleep(Duration::from_secs(3)).await;
    mesh.stop(handles).await;

    let a = mesh.stats("peer-a");
    assert!(a.hellos_received >= 2, "discovery never happened");
    assert_eq!(a.neighbors_expired, 1, "peer-b should have been expired exactly once");

    // B still hears A the whole time, so it expires nobody.
    let b = mesh.stats("peer-b");
    assert!(b.hellos_received >= 2);
    assert_eq!(b.neighbors_expired, 0);
}

/// A lone source runs, stops on shutdown, and publishes its snapshot
/// into the registry.
#[tokio::test(start_paused = true)]
async fn shutdown_publishes_final_stats() {
    let mesh = Mesh::new();
    let handles = vec![mesh.spawn_peer("source", addr(1), source_config())];

    time::sleep(Duration::from_secs(2)).await;
    mesh.stop(handles).await;

    assert_eq!(mesh.registry.len(), 1);
    let stats = mesh.stats("source");
    assert!(stats.chunks_pushed >= 15, "pushed {}", stats.chunks_pushed);
    assert_eq!(stats.pulls_sent, 0, "a source has nothing to pull");
}
