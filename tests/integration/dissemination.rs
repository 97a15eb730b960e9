use std::time::Duration;

use tokio::time;

use meshcast_core::Message;

use crate::infra::*;

/// Source plus two peers on a clean link: everything arrives by push,
/// the pull path never activates.
#[tokio::test(start_paused = true)]
async fn lossless_stream_needs_no_pulls() {
    let mesh = Mesh::new();
    let handles = vec![
        mesh.spawn_peer("source", addr(1), source_config()),
        mesh.spawn_peer("peer-b", addr(2), peer_config()),
        mesh.spawn_peer("peer-c", addr(3), peer_config()),
    ];

    time::sleep(Duration::from_secs(10)).await;
    mesh.stop(handles).await;

    let source = mesh.stats("source");
    // ~100ms period with up to 2% jitter: at least 95 chunks in 10s.
    assert!(source.chunks_pushed >= 95, "pushed {}", source.chunks_pushed);

    for name in ["peer-b", "peer-c"] {
        let stats = mesh.stats(name);
        assert!(
            stats.chunks_received >= 90,
            "{name} received only {}",
            stats.chunks_received
        );
        assert_eq!(stats.pulls_sent, 0, "{name} pulled on a lossless link");
        assert!(stats.hellos_received >= 2, "{name} heard no hellos");
    }
}

/// Peer C never hears the source directly, and a third of peer B's
/// relayed chunks are lost on the way. Whatever C holds came relayed or
/// pulled through B — that is the gossip working.
#[tokio::test(start_paused = true)]
async fn relays_and_pulls_reach_a_shadowed_peer() {
    let mesh = Mesh::new();
    let source = addr(1);
    let relay = addr(2);
    let shadowed = addr(3);
    mesh.set_filter(move |from, to, is_broadcast, message| {
        if from == source && to == shadowed {
            return false;
        }
        if from == relay && to == shadowed && is_broadcast {
            if let Message::Chunk { chunk } = message {
                return chunk.id % 3 != 0;
            }
        }
        true
    });

    let handles = vec![
        mesh.spawn_peer("source", source, source_config()),
        mesh.spawn_peer("peer-b", relay, peer_config()),
        mesh.spawn_peer("peer-c", shadowed, peer_config()),
    ];

    time::sleep(Duration::from_secs(15)).await;
    mesh.stop(handles).await;

    let stats = mesh.stats("peer-c");
    assert!(
        stats.chunks_received >= 50,
        "shadowed peer received only {}",
        stats.chunks_received
    );
    assert!(
        stats.pulls_recovered >= 1,
        "shadowed peer never recovered a chunk by pull"
    );
}
