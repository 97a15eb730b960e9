use std::time::Duration;

use tokio::time;

use meshcast_core::Message;

use crate::infra::*;

/// A third of the source's pushes never reach peer B. The completeness
/// ratio falls through the hysteresis floor, B pulls the gaps back from
/// the source, and the source answers within its slot budget.
#[tokio::test(start_paused = true)]
async fn pulls_recover_deterministic_push_loss() {
    let mesh = Mesh::new();
    let source = addr(1);
    let lossy = addr(2);
    mesh.set_filter(move |from, to, is_broadcast, message| {
        if from == source && to == lossy && is_broadcast {
            if let Message::Chunk { chunk } = message {
                return chunk.id % 3 != 0;
            }
        }
        true
    });

    let handles = vec![
        mesh.spawn_peer("source", source, source_config()),
        mesh.spawn_peer("peer-b", lossy, peer_config()),
    ];

    time::sleep(Duration::from_secs(15)).await;
    mesh.stop(handles).await;

    let peer = mesh.stats("peer-b");
    let src = mesh.stats("source");

    assert!(peer.pulls_sent >= 10, "only {} pulls sent", peer.pulls_sent);
    assert!(
        peer.pulls_recovered >= 10,
        "only {} chunks recovered by pull",
        peer.pulls_recovered
    );
    assert_eq!(peer.pulls_abandoned, 0, "nothing should be abandoned on a serving link");
    assert!(
        src.pulls_answered >= 10,
        "source answered only {} pulls",
        src.pulls_answered
    );
    assert!(
        peer.mean_pull_latency().is_some(),
        "recovery latency must be recorded"
    );
}

/// Same loss pattern, but B's pull requests are swallowed too: every
/// missed chunk burns its full retry budget and is then abandoned —
/// never retried indefinitely.
#[tokio::test(start_paused = true)]
async fn unanswerable_pulls_stop_at_the_retry_cap() {
    let mesh = Mesh::new();
    let source = addr(1);
    let lossy = addr(2);
    mesh.set_filter(move |from, to, is_broadcast, message| {
        if from == lossy && matches!(message, Message::Pull { .. }) {
            return false;
        }
        if from == source && to == lossy && is_broadcast {
            if let Message::Chunk { chunk } = message {
                return chunk.id % 3 != 0;
            }
        }
        true
    });

    let handles = vec![
        mesh.spawn_peer("source", source, source_config()),
        mesh.spawn_peer("peer-b", lossy, peer_config()),
    ];

    time::sleep(Duration::from_secs(10)).await;
    mesh.stop(handles).await;

    let peer = mesh.stats("peer-b");
    assert_eq!(peer.pulls_recovered, 0);
    assert!(
        peer.pulls_abandoned >= 3,
        "only {} chunks abandoned",
        peer.pulls_abandoned
    );
    assert!(peer.pulls_sent >= 9, "only {} pulls sent", peer.pulls_sent);

    let src = mesh.stats("source");
    assert_eq!(src.pulls_answered, 0, "no pull should have arrived at the source");
}

/// Two lossy peers hammer a source configured to answer at most one
/// pull per slot: the overflow is shed silently, not queued.
#[tokio::test(start_paused = true)]
async fn overloaded_source_sheds_pulls_at_the_slot_cap() {
    let mesh = Mesh::new();
    let source = addr(1);
    let peer_b = addr(2);
    let peer_c = addr(3);
    mesh.set_filter(move |from, to, is_broadcast, message| {
        if from != source || !is_broadcast {
            return true;
        }
        if let Message::Chunk { chunk } = message {
            if to == peer_b {
                return chunk.id % 3 != 0;
            }
            if to == peer_c {
                return chunk.id % 3 != 1;
            }
        }
        true
    });

    let mut src_config = source_config();
    src_config.pull.reply_max = 1;
    src_config.pull.slot_ms = 1000;

    let handles = vec![
        mesh.spawn_peer("source", source, src_config),
        mesh.spawn_peer("peer-b", peer_b, peer_config()),
        mesh.spawn_peer("peer-c", peer_c, peer_config()),
    ];

    time::sleep(Duration::from_secs(10)).await;
    mesh.stop(handles).await;

    let src = mesh.stats("source");
    assert!(
        src.pulls_dropped_at_cap >= 1,
        "cap never engaged: answered {}, dropped {}",
        src.pulls_answered,
        src.pulls_dropped_at_cap
    );
    // Roughly one answer per one-second slot over a 10s run.
    assert!(
        src.pulls_answered <= 12,
        "slot cap leaked: answered {}",
        src.pulls_answered
    );
}
