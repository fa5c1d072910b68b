//! End-to-end scenarios
//!
//! Each test drives a full client (transport, engine, facade) against the
//! in-memory backend on tokio's paused clock.
//!
//! Run with: cargo test -p integration-tests --test scenarios

use std::collections::HashSet;
use std::time::Duration;

use integration_tests::{
    drain_remote_events, remote_event, remote_join, remote_message, seqs, unique_topic,
    wait_for_view, TestClient,
};
use presence_core::{ActivityKind, UserId};
use presence_engine::TopicUpdate;
use presence_transport::{ClientFrame, TransportState};

fn me() -> UserId {
    UserId::new("me")
}

// ============================================================================
// Presence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_join_then_leave_updates_presence() {
    let mut backend = TestClient::start().await.expect("Failed to start client");
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();
    assert_eq!(backend.next_publish().await.unwrap().kind, ActivityKind::Join);

    backend.link.send_event(&remote_join(&topic_id, "u", "Una", 1));
    let view = wait_for_view(&mut topic, |v| v.presence.len() == 2).await.unwrap();
    assert!(view.is_present(&UserId::new("u")));

    backend
        .link
        .send_event(&remote_event(&topic_id, ActivityKind::Leave, "u", 2));
    let view = wait_for_view(&mut topic, |v| v.presence.len() == 1).await.unwrap();
    assert_eq!(view.presence[0].user_id(), &me());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_remote_joins_keep_one_entry() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    for seq in 1..=5 {
        backend.link.send_event(&remote_join(&topic_id, "u", "Una", seq));
    }
    backend.settle(&topic_id).await.unwrap();

    let others: Vec<_> = topic
        .presence()
        .into_iter()
        .filter(|e| e.user_id() != &me())
        .collect();
    assert_eq!(others.len(), 1);

    let joins = drain_remote_events(&mut topic, &me());
    assert_eq!(joins.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_user_is_evicted_once() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    backend.link.send_event(&remote_join(&topic_id, "u", "Una", 1));
    wait_for_view(&mut topic, |v| v.presence.len() == 2).await.unwrap();
    drain_remote_events(&mut topic, &me());

    // Timeout is 60s and the sweep runs every 15s.
    tokio::time::sleep(Duration::from_secs(80)).await;
    backend.settle(&topic_id).await.unwrap();

    let view = topic.view();
    assert!(!view.is_present(&UserId::new("u")));
    // Heartbeats kept the local user alive.
    assert!(view.is_present(&me()));

    let leaves: Vec<_> = drain_remote_events(&mut topic, &me())
        .into_iter()
        .filter(|e| e.kind == ActivityKind::Leave)
        .collect();
    assert_eq!(leaves.len(), 1);
}

// ============================================================================
// Typing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_typing_burst_sends_one_start_and_one_stop() {
    let mut backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let topic = backend.client.use_topic(topic_id.clone()).await.unwrap();
    assert_eq!(backend.next_publish().await.unwrap().kind, ActivityKind::Join);

    for _ in 0..5 {
        topic.start_typing().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    backend.settle(&topic_id).await.unwrap();
    let kinds: Vec<_> = backend.drain_publishes().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::TypingStart]);

    tokio::time::sleep(Duration::from_millis(5_500)).await;
    backend.settle(&topic_id).await.unwrap();
    let kinds: Vec<_> = backend.drain_publishes().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::TypingStop]);
    assert!(topic.view().typing_users.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_remote_typing_expires_locally() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    backend
        .link
        .send_event(&remote_event(&topic_id, ActivityKind::TypingStart, "u", 1));
    wait_for_view(&mut topic, |v| !v.typing_users.is_empty()).await.unwrap();
    assert_eq!(topic.typing_users(), vec![UserId::new("u")]);

    // No typingStop ever arrives; the local timeout clears it.
    wait_for_view(&mut topic, |v| v.typing_users.is_empty()).await.unwrap();
    let kinds: Vec<_> = drain_remote_events(&mut topic, &me())
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![ActivityKind::TypingStart, ActivityKind::TypingStop]);
}

#[tokio::test(start_paused = true)]
async fn test_message_ends_remote_typing() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    backend
        .link
        .send_event(&remote_event(&topic_id, ActivityKind::TypingStart, "u", 1));
    backend.link.send_event(&remote_message(&topic_id, "u", 2));
    backend.settle(&topic_id).await.unwrap();

    assert!(topic.typing_users().is_empty());
    let kinds: Vec<_> = drain_remote_events(&mut topic, &me())
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ActivityKind::TypingStart, ActivityKind::TypingStop, ActivityKind::Message]
    );
}

// ============================================================================
// Ordering and resync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_out_of_order_events_are_delivered_in_order() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    for seq in [1, 2, 4, 3] {
        backend.link.send_event(&remote_message(&topic_id, "u", seq));
    }
    backend.settle(&topic_id).await.unwrap();

    assert_eq!(seqs(&drain_remote_events(&mut topic, &me())), vec![1, 2, 3, 4]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_events_are_delivered_once() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    let message = remote_message(&topic_id, "u", 1);
    backend.link.send_event(&message);
    backend.link.send_event(&message);
    backend.link.send_event(&remote_message(&topic_id, "u", 2));
    backend.settle(&topic_id).await.unwrap();

    assert_eq!(seqs(&drain_remote_events(&mut topic, &me())), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn test_gap_is_recovered_from_history() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();
    backend.history.record(remote_message(&topic_id, "u", 2));

    backend.link.send_event(&remote_message(&topic_id, "u", 1));
    backend.link.send_event(&remote_message(&topic_id, "u", 3));

    let view = wait_for_view(&mut topic, |v| v.last_seq == Some(3)).await.unwrap();
    assert!(!view.resyncing);
    assert_eq!(backend.history.requests(), vec![(topic_id.clone(), 1)]);

    let updates = topic.updates().drain();
    assert!(updates.contains(&TopicUpdate::ResyncRequired { since: 1 }));
    let delivered: Vec<u64> = updates
        .into_iter()
        .filter_map(|u| match u {
            TopicUpdate::Event(e) if e.user_id != me() => Some(e.seq),
            _ => None,
        })
        .collect();
    assert_eq!(delivered, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_history_surfaces_last_error() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();
    backend.history.set_failing(true);

    backend.link.send_event(&remote_message(&topic_id, "u", 1));
    backend.link.send_event(&remote_message(&topic_id, "u", 3));

    let view = wait_for_view(&mut topic, |v| v.last_error.is_some()).await.unwrap();
    assert_eq!(view.last_seq, Some(3));
    assert_eq!(topic.last_error().unwrap().code, "HISTORY_ERROR");

    // The gap was skipped; delivery continues after it.
    backend.link.send_event(&remote_message(&topic_id, "u", 4));
    backend.settle(&topic_id).await.unwrap();
    assert_eq!(seqs(&drain_remote_events(&mut topic, &me())), vec![1, 3, 4]);
}

// ============================================================================
// Connection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reconnect_resubscribes_every_open_topic() {
    let mut backend = TestClient::start().await.unwrap();
    let first = unique_topic();
    let second = unique_topic();
    let _a = backend.client.use_topic(first.clone()).await.unwrap();
    let mut b = backend.client.use_topic(second.clone()).await.unwrap();
    backend.settle(&second).await.unwrap();
    backend.drain_publishes();

    let mut backend = backend.drop_connection(Some(1006)).await.unwrap();
    let mut resubscribed = HashSet::new();
    for _ in 0..2 {
        match backend.next_frame().await.unwrap() {
            ClientFrame::Subscribe { topic_id } => {
                resubscribed.insert(topic_id);
            }
            other => panic!("expected subscribe, got {other:?}"),
        }
    }
    assert_eq!(resubscribed, HashSet::from([first, second.clone()]));
    assert_eq!(backend.client.transport_state(), TransportState::Connected);

    backend.link.send_event(&remote_message(&second, "u", 1));
    backend.settle(&second).await.unwrap();
    assert_eq!(seqs(&drain_remote_events(&mut b, &me())), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replays_events_missed_while_offline() {
    let backend = TestClient::start().await.unwrap();
    let topic_id = unique_topic();
    let mut topic = backend.client.use_topic(topic_id.clone()).await.unwrap();

    backend.link.send_event(&remote_message(&topic_id, "u", 1));
    backend.settle(&topic_id).await.unwrap();
    // Published by others while this client is offline.
    backend.history.record(remote_message(&topic_id, "u", 2));
    backend.history.record(remote_message(&topic_id, "u", 3));

    let mut backend = backend.drop_connection(Some(1006)).await.unwrap();
    let view = wait_for_view(&mut topic, |v| v.last_seq == Some(3) && !v.resyncing)
        .await
        .unwrap();
    assert!(view.is_present(&me()));
    assert_eq!(backend.history.requests(), vec![(topic_id.clone(), 1)]);
    assert_eq!(seqs(&drain_remote_events(&mut topic, &me())), vec![1, 2, 3]);

    // Presence is announced again on the new link.
    assert_eq!(backend.next_publish().await.unwrap().kind, ActivityKind::Join);
}
