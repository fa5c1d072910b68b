//! Presence tracker
//!
//! Keeps, per topic, the set of users currently viewing or participating.
//! Entries are upserted on join, refreshed by heartbeats and activity, and
//! evicted by an explicit leave or by the periodic sweep once they have been
//! silent for longer than the presence timeout.
//!
//! Sequenced operations (those carrying the backend's per-topic `seq`) are
//! checked against the last sequence applied for the same user, so a `leave`
//! that overtook its `join` on the wire cannot resurrect or remove the wrong
//! entry. Local operations carry no sequence and always apply.

use presence_core::{PresenceEntry, TopicId, UserId, UserRef};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Roster {
    entries: HashMap<UserId, PresenceEntry>,
    last_seq: HashMap<UserId, u64>,
}

impl Roster {
    /// Record `seq` for `user_id`; false when it is not newer than the last one
    fn accept(&mut self, user_id: &UserId, seq: Option<u64>) -> bool {
        let Some(seq) = seq else {
            return true;
        };
        match self.last_seq.get(user_id) {
            Some(&last) if seq <= last => false,
            _ => {
                self.last_seq.insert(user_id.clone(), seq);
                true
            }
        }
    }
}

/// Per-topic presence rosters
#[derive(Debug)]
pub struct PresenceTracker {
    timeout_ms: i64,
    topics: HashMap<TopicId, Roster>,
}

impl PresenceTracker {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms: i64::try_from(timeout_ms).unwrap_or(i64::MAX),
            topics: HashMap::new(),
        }
    }

    /// Upsert `user` into `topic_id`
    ///
    /// Returns `true` only when a new entry was inserted. A repeated join
    /// refreshes `last_seen_at` (and the display fields) in place.
    pub fn join(&mut self, topic_id: &TopicId, user: UserRef, now: i64, seq: Option<u64>) -> bool {
        let roster = self.topics.entry(topic_id.clone()).or_default();
        if !roster.accept(&user.id, seq) {
            tracing::debug!(topic_id = %topic_id, user_id = %user.id, ?seq, "Dropping stale join");
            return false;
        }

        match roster.entries.get_mut(&user.id) {
            Some(entry) => {
                entry.touch(now);
                entry.user = user;
                false
            }
            None => {
                roster
                    .entries
                    .insert(user.id.clone(), PresenceEntry::new(topic_id.clone(), user, now));
                true
            }
        }
    }

    /// Remove `user_id` from `topic_id`
    ///
    /// Idempotent; returns the removed entry, or `None` when the user was
    /// not present or the leave is older than the last applied event.
    pub fn leave(&mut self, topic_id: &TopicId, user_id: &UserId, seq: Option<u64>) -> Option<PresenceEntry> {
        let roster = self.topics.get_mut(topic_id)?;
        if !roster.accept(user_id, seq) {
            tracing::debug!(topic_id = %topic_id, user_id = %user_id, ?seq, "Dropping stale leave");
            return None;
        }
        roster.entries.remove(user_id)
    }

    /// Whether `seq` is not newer than the last event applied for `user_id`
    pub fn is_stale(&self, topic_id: &TopicId, user_id: &UserId, seq: Option<u64>) -> bool {
        let (Some(roster), Some(seq)) = (self.topics.get(topic_id), seq) else {
            return false;
        };
        roster.last_seq.get(user_id).is_some_and(|&last| seq <= last)
    }

    /// Refresh `last_seen_at` without changing membership
    pub fn heartbeat(&mut self, topic_id: &TopicId, user_id: &UserId, now: i64, seq: Option<u64>) -> bool {
        let Some(roster) = self.topics.get_mut(topic_id) else {
            return false;
        };
        if !roster.accept(user_id, seq) {
            return false;
        }
        match roster.entries.get_mut(user_id) {
            Some(entry) => {
                entry.touch(now);
                true
            }
            None => false,
        }
    }

    /// Entries for `topic_id` ordered by `joined_at`, ties broken by user id
    pub fn snapshot(&self, topic_id: &TopicId) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self
            .topics
            .get(topic_id)
            .map(|roster| roster.entries.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id().cmp(b.user_id()))
        });
        entries
    }

    pub fn contains(&self, topic_id: &TopicId, user_id: &UserId) -> bool {
        self.topics
            .get(topic_id)
            .is_some_and(|roster| roster.entries.contains_key(user_id))
    }

    /// Evict every entry silent for longer than the timeout
    pub fn sweep(&mut self, now: i64) -> Vec<PresenceEntry> {
        let timeout_ms = self.timeout_ms;
        let mut evicted = Vec::new();

        for roster in self.topics.values_mut() {
            let stale: Vec<UserId> = roster
                .entries
                .values()
                .filter(|entry| entry.is_stale(now, timeout_ms))
                .map(|entry| entry.user_id().clone())
                .collect();

            for user_id in stale {
                if let Some(entry) = roster.entries.remove(&user_id) {
                    evicted.push(entry);
                }
            }
        }

        evicted.sort_by(|a, b| {
            a.topic_id
                .cmp(&b.topic_id)
                .then_with(|| a.last_seen_at.cmp(&b.last_seen_at))
        });
        evicted
    }

    /// Drop all state for `topic_id`
    pub fn forget_topic(&mut self, topic_id: &TopicId) {
        self.topics.remove(topic_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> TopicId {
        TopicId::new("thread-1")
    }

    fn user(id: &str) -> UserRef {
        UserRef::new(id, id.to_uppercase())
    }

    #[test]
    fn test_join_then_leave() {
        let mut tracker = PresenceTracker::new(60_000);

        assert!(tracker.join(&topic(), user("u"), 1_000, None));
        let snapshot = tracker.snapshot(&topic());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].user_id().as_str(), "u");

        assert!(tracker.leave(&topic(), &UserId::new("u"), None).is_some());
        assert!(tracker.snapshot(&topic()).is_empty());
    }

    #[test]
    fn test_repeated_join_and_heartbeat_keep_one_entry() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("u");

        assert!(tracker.join(&topic(), user("u"), 1_000, None));
        for t in 0..20 {
            if t % 2 == 0 {
                assert!(!tracker.join(&topic(), user("u"), 1_000 + t * 100, None));
            } else {
                assert!(tracker.heartbeat(&topic(), &uid, 1_000 + t * 100, None));
            }
        }

        let snapshot = tracker.snapshot(&topic());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].joined_at, 1_000);
        assert_eq!(snapshot[0].last_seen_at, 2_900);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("ghost");

        assert!(tracker.leave(&topic(), &uid, None).is_none());
        tracker.join(&topic(), user("ghost"), 0, None);
        assert!(tracker.leave(&topic(), &uid, None).is_some());
        assert!(tracker.leave(&topic(), &uid, None).is_none());
    }

    #[test]
    fn test_heartbeat_does_not_insert() {
        let mut tracker = PresenceTracker::new(60_000);
        assert!(!tracker.heartbeat(&topic(), &UserId::new("u"), 0, None));
        assert!(tracker.snapshot(&topic()).is_empty());
    }

    #[test]
    fn test_snapshot_order_is_stable() {
        let mut tracker = PresenceTracker::new(60_000);
        tracker.join(&topic(), user("c"), 300, None);
        tracker.join(&topic(), user("b"), 100, None);
        tracker.join(&topic(), user("a"), 100, None);

        let ids: Vec<String> = tracker
            .snapshot(&topic())
            .iter()
            .map(|e| e.user_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(tracker.snapshot(&topic()), tracker.snapshot(&topic()));
    }

    #[test]
    fn test_sweep_evicts_only_stale_entries() {
        let mut tracker = PresenceTracker::new(60_000);
        tracker.join(&topic(), user("old"), 0, None);
        tracker.join(&topic(), user("fresh"), 30_000, None);

        // Exactly at the timeout is not yet stale.
        assert!(tracker.sweep(60_000).is_empty());

        let evicted = tracker.sweep(60_001);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].user_id().as_str(), "old");
        assert!(tracker.contains(&topic(), &UserId::new("fresh")));

        // A second sweep does not report the same entry again.
        assert!(tracker.sweep(60_002).is_empty());
    }

    #[test]
    fn test_heartbeat_postpones_eviction() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("u");
        tracker.join(&topic(), user("u"), 0, None);
        tracker.heartbeat(&topic(), &uid, 50_000, None);

        assert!(tracker.sweep(100_000).is_empty());
        assert_eq!(tracker.sweep(110_001).len(), 1);
    }

    #[test]
    fn test_stale_leave_is_dropped() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("u");

        // leave(seq 3) arrives first, then join(seq 5), then the stale leave(seq 4).
        assert!(tracker.leave(&topic(), &uid, Some(3)).is_none());
        assert!(tracker.join(&topic(), user("u"), 0, Some(5)));
        assert!(tracker.leave(&topic(), &uid, Some(4)).is_none());
        assert!(tracker.contains(&topic(), &uid));

        assert!(tracker.leave(&topic(), &uid, Some(6)).is_some());
    }

    #[test]
    fn test_is_stale_does_not_record() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("u");
        assert!(!tracker.is_stale(&topic(), &uid, Some(1)));

        tracker.join(&topic(), user("u"), 0, Some(5));
        assert!(tracker.is_stale(&topic(), &uid, Some(5)));
        assert!(!tracker.is_stale(&topic(), &uid, Some(6)));
        assert!(!tracker.is_stale(&topic(), &uid, None));
        // Peeking at seq 6 did not consume it.
        assert!(tracker.leave(&topic(), &uid, Some(6)).is_some());
    }

    #[test]
    fn test_join_older_than_applied_leave_is_dropped() {
        let mut tracker = PresenceTracker::new(60_000);
        let uid = UserId::new("u");

        tracker.join(&topic(), user("u"), 0, Some(1));
        assert!(tracker.leave(&topic(), &uid, Some(8)).is_some());
        assert!(!tracker.join(&topic(), user("u"), 10, Some(7)));
        assert!(!tracker.contains(&topic(), &uid));
    }

    #[test]
    fn test_forget_topic() {
        let mut tracker = PresenceTracker::new(60_000);
        tracker.join(&topic(), user("u"), 0, Some(1));
        tracker.forget_topic(&topic());

        assert!(tracker.snapshot(&topic()).is_empty());
        // Sequence memory is gone too: an old seq applies again.
        assert!(tracker.join(&topic(), user("u"), 0, Some(1)));
    }
}
