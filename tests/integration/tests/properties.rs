//! Engine invariants
//!
//! Drives `EngineState` directly with explicit timestamps and checks the
//! guarantees the engine makes for every input in a family, not one example.
//!
//! Run with: cargo test -p integration-tests --test properties

use integration_tests::{local_user, remote_event, remote_join, remote_message, seqs, unique_topic};
use presence_core::{ActivityEvent, ActivityKind, TopicId, UserId};
use presence_engine::{Effect, EngineConfig, EngineState, FanoutHub, FanoutSubscription, TopicUpdate};

const T0: i64 = 1_700_000_000_000;

fn engine() -> EngineState {
    EngineState::new(EngineConfig::default(), local_user(), FanoutHub::new_shared())
}

fn dispatched(sub: &mut FanoutSubscription) -> Vec<ActivityEvent> {
    sub.drain()
        .into_iter()
        .filter_map(|update| match update {
            TopicUpdate::Event(event) => Some(event),
            TopicUpdate::ResyncRequired { .. } => None,
        })
        .collect()
}

fn published(effects: &[Effect]) -> Vec<ActivityKind> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Publish { event, .. } => Some(event.kind),
            Effect::FetchHistory { .. } => None,
        })
        .collect()
}

/// Every ordering of `items`
fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *first);
            all.push(tail);
        }
    }
    all
}

// ============================================================================
// Presence
// ============================================================================

#[test]
fn test_joins_upsert_a_single_entry() {
    for joins in [1_u64, 2, 5, 20] {
        let mut engine = engine();
        let topic_id = unique_topic();
        let (mut sub, view) = engine.open_topic(&topic_id);

        for seq in 1..=joins {
            engine.ingest(remote_join(&topic_id, "u", "Una", seq), T0 + seq as i64 * 1_000);
        }

        assert_eq!(view.borrow().presence.len(), 1, "joins = {joins}");
        let joined = dispatched(&mut sub)
            .into_iter()
            .filter(|e| e.kind == ActivityKind::Join)
            .count();
        assert_eq!(joined, 1, "joins = {joins}");
    }
}

#[test]
fn test_eviction_emits_exactly_one_leave() {
    let mut engine = engine();
    let topic_id = unique_topic();
    let (mut sub, view) = engine.open_topic(&topic_id);
    engine.ingest(remote_join(&topic_id, "u", "Una", 1), T0);
    engine.ingest(remote_join(&topic_id, "v", "Vic", 2), T0 + 50_000);
    sub.drain();

    for offset in (0..=180_000).step_by(15_000) {
        engine.sweep(T0 + offset);
    }

    assert!(view.borrow().presence.is_empty());
    let leaves: Vec<UserId> = dispatched(&mut sub)
        .into_iter()
        .filter(|e| e.kind == ActivityKind::Leave)
        .map(|e| e.user_id)
        .collect();
    assert_eq!(leaves, vec![UserId::new("u"), UserId::new("v")]);
}

#[test]
fn test_leave_while_typing_stops_typing_first() {
    let mut engine = engine();
    let topic_id = unique_topic();
    let (mut sub, view) = engine.open_topic(&topic_id);

    engine.ingest(remote_join(&topic_id, "u", "Una", 1), T0);
    engine.ingest(remote_event(&topic_id, ActivityKind::TypingStart, "u", 2), T0);
    engine.ingest(remote_event(&topic_id, ActivityKind::Leave, "u", 3), T0);

    assert!(view.borrow().typing_users.is_empty());
    let kinds: Vec<ActivityKind> = dispatched(&mut sub).into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            ActivityKind::Join,
            ActivityKind::TypingStart,
            ActivityKind::TypingStop,
            ActivityKind::Leave
        ]
    );
}

// ============================================================================
// Typing
// ============================================================================

#[test]
fn test_keystroke_bursts_publish_one_start_and_one_stop_on_timeout() {
    for keystrokes in [1_i64, 2, 5, 19] {
        let mut engine = engine();
        let topic_id = unique_topic();
        engine.open_topic(&topic_id);

        let mut effects = Vec::new();
        for i in 0..keystrokes {
            effects.extend(engine.start_typing(&topic_id, T0 + i * 100));
        }
        let last = T0 + (keystrokes - 1) * 100;
        for step in 0..=60 {
            effects.extend(engine.tick(last + step * 100));
        }

        assert_eq!(
            published(&effects),
            vec![ActivityKind::TypingStart, ActivityKind::TypingStop],
            "keystrokes = {keystrokes}"
        );
    }
}

#[test]
fn test_keystroke_bursts_publish_one_start_and_one_stop_on_explicit_stop() {
    for keystrokes in [1_i64, 2, 5, 19] {
        let mut engine = engine();
        let topic_id = unique_topic();
        engine.open_topic(&topic_id);

        let mut effects = Vec::new();
        for i in 0..keystrokes {
            effects.extend(engine.start_typing(&topic_id, T0 + i * 100));
        }
        let last = T0 + (keystrokes - 1) * 100;
        effects.extend(engine.stop_typing(&topic_id, last + 50));
        effects.extend(engine.stop_typing(&topic_id, last + 60));
        effects.extend(engine.tick(last + 10_000));

        assert_eq!(
            published(&effects),
            vec![ActivityKind::TypingStart, ActivityKind::TypingStop],
            "keystrokes = {keystrokes}"
        );
    }
}

#[test]
fn test_message_is_dispatched_after_implicit_stop() {
    let mut engine = engine();
    let topic_id = unique_topic();
    let (mut sub, view) = engine.open_topic(&topic_id);
    engine.join(&topic_id, T0);
    engine.start_typing(&topic_id, T0 + 100);
    sub.drain();

    let effects = engine.send_message(&topic_id, "hello", T0 + 200);

    assert_eq!(published(&effects), vec![ActivityKind::Message]);
    let kinds: Vec<ActivityKind> = dispatched(&mut sub).into_iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![ActivityKind::TypingStop, ActivityKind::Message]);
    assert!(view.borrow().typing_users.is_empty());

    // Nothing left to expire.
    assert!(published(&engine.tick(T0 + 10_000)).is_empty());
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_redelivered_events_are_dispatched_once() {
    let mut engine = engine();
    let topic_id = unique_topic();
    let (mut sub, _view) = engine.open_topic(&topic_id);

    let events: Vec<ActivityEvent> = (1..=4).map(|seq| remote_message(&topic_id, "u", seq)).collect();
    for round in 0..3 {
        for event in &events {
            engine.ingest(event.clone(), T0 + round);
        }
    }

    assert_eq!(seqs(&dispatched(&mut sub)), vec![1, 2, 3, 4]);
}

#[test]
fn test_every_arrival_order_is_dispatched_ascending() {
    for order in permutations(&[2, 3, 4, 5, 6]) {
        let mut engine = engine();
        let topic_id = TopicId::new("ordering");
        let (mut sub, _view) = engine.open_topic(&topic_id);

        engine.ingest(remote_message(&topic_id, "u", 1), T0);
        for seq in &order {
            engine.ingest(remote_message(&topic_id, "u", *seq), T0 + 10);
        }

        assert_eq!(
            seqs(&dispatched(&mut sub)),
            vec![1, 2, 3, 4, 5, 6],
            "arrival order = {order:?}"
        );
    }
}

#[test]
fn test_unfilled_gap_requests_history_once() {
    let mut engine = engine();
    let topic_id = unique_topic();
    engine.open_topic(&topic_id);

    engine.ingest(remote_message(&topic_id, "u", 1), T0);
    engine.ingest(remote_message(&topic_id, "u", 3), T0);

    let mut fetches = Vec::new();
    for step in 0..=50 {
        for effect in engine.tick(T0 + step * 100) {
            if let Effect::FetchHistory { since, .. } = effect {
                fetches.push(since);
            }
        }
    }
    assert_eq!(fetches, vec![1]);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_presence_snapshot_follows_join_and_leave() {
    let mut engine = engine();
    let topic_id = unique_topic();
    let (_sub, view) = engine.open_topic(&topic_id);

    engine.ingest(remote_join(&topic_id, "u", "Una", 1), T0);
    let snapshot: Vec<UserId> = view.borrow().presence.iter().map(|e| e.user_id().clone()).collect();
    assert_eq!(snapshot, vec![UserId::new("u")]);

    engine.ingest(remote_event(&topic_id, ActivityKind::Leave, "u", 2), T0 + 1_000);
    assert!(view.borrow().presence.is_empty());
}
