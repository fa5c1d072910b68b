//! Per-topic ordering and duplicate suppression
//!
//! The sequencer sits between the transport and the state machines. It
//! releases events strictly in ascending `seq`, holds out-of-order arrivals
//! while a gap is open, and asks for a resync when the gap outlives the
//! reorder window or the buffer overflows.

use presence_common::FanoutConfig;
use presence_core::ActivityEvent;
use std::collections::{BTreeMap, HashSet, VecDeque};

/// What happened to an event offered to the sequencer
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Events now deliverable, in ascending `seq`
    Release(Vec<ActivityEvent>),
    /// Held until the gap before it fills
    Buffered,
    /// Already delivered recently
    Duplicate,
    /// Older than the release cursor and never delivered (skipped gap)
    Stale,
    /// Gap cannot be closed locally; fetch history after `since`
    Resync { since: u64 },
    /// Dropped because the buffer is full while a resync is in flight
    Overflow,
}

#[derive(Debug)]
pub struct TopicSequencer {
    /// Last released seq
    cursor: Option<u64>,
    seen: VecDeque<u64>,
    seen_set: HashSet<u64>,
    buffer: BTreeMap<u64, ActivityEvent>,
    /// When the current gap opened
    gap_since: Option<i64>,
    resyncing: bool,
    seen_capacity: usize,
    buffer_capacity: usize,
    window_ms: i64,
}

impl TopicSequencer {
    pub fn new(config: &FanoutConfig) -> Self {
        Self {
            cursor: None,
            seen: VecDeque::with_capacity(config.resync_buffer_size),
            seen_set: HashSet::with_capacity(config.resync_buffer_size),
            buffer: BTreeMap::new(),
            gap_since: None,
            resyncing: false,
            seen_capacity: config.resync_buffer_size.max(1),
            buffer_capacity: config.reorder_buffer_size.max(1),
            window_ms: i64::try_from(config.reorder_window_ms).unwrap_or(i64::MAX),
        }
    }

    /// Start with a known last-delivered seq instead of trusting the first event
    pub fn with_baseline(config: &FanoutConfig, seq: u64) -> Self {
        let mut sequencer = Self::new(config);
        sequencer.cursor = Some(seq);
        sequencer
    }

    /// Last released seq
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn is_resyncing(&self) -> bool {
        self.resyncing
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Offer an inbound event
    pub fn push(&mut self, event: ActivityEvent, now: i64) -> Admission {
        let seq = event.seq;

        if self.seen_set.contains(&seq) || self.buffer.contains_key(&seq) {
            return Admission::Duplicate;
        }

        let Some(cursor) = self.cursor else {
            // First event establishes the baseline.
            self.cursor = Some(seq);
            self.remember(seq);
            return Admission::Release(vec![event]);
        };

        if seq <= cursor {
            return Admission::Stale;
        }

        if self.resyncing {
            if self.buffer.len() >= self.seen_capacity {
                return Admission::Overflow;
            }
            self.buffer.insert(seq, event);
            return Admission::Buffered;
        }

        if seq == cursor + 1 {
            let mut released = vec![event];
            self.advance(seq);
            self.drain_contiguous(&mut released);
            if self.buffer.is_empty() {
                self.gap_since = None;
            }
            return Admission::Release(released);
        }

        self.buffer.insert(seq, event);
        self.gap_since.get_or_insert(now);

        if self.buffer.len() > self.buffer_capacity {
            self.resyncing = true;
            return Admission::Resync { since: cursor };
        }
        Admission::Buffered
    }

    /// Check the reorder window; returns the resync point if it just expired
    pub fn poll_timeout(&mut self, now: i64) -> Option<u64> {
        if self.resyncing {
            return None;
        }
        let opened = self.gap_since?;
        if now - opened < self.window_ms {
            return None;
        }
        self.resyncing = true;
        self.cursor
    }

    /// Replay history after the cursor regardless of any open gap
    ///
    /// Used when the link may have dropped events silently. Returns `None`
    /// when nothing was delivered yet or a resync is already in flight.
    pub fn begin_resync(&mut self) -> Option<u64> {
        if self.resyncing {
            return None;
        }
        let cursor = self.cursor?;
        self.resyncing = true;
        Some(cursor)
    }

    /// Finish a resync with whatever history returned
    ///
    /// Fetched events are merged with the buffer and everything above the
    /// cursor is released in ascending order. Gaps that history could not
    /// fill are skipped; an empty `fetched` (history failure) releases the
    /// buffer as-is.
    pub fn complete_resync(&mut self, fetched: Vec<ActivityEvent>) -> Vec<ActivityEvent> {
        let cursor = self.cursor.unwrap_or(0);
        for event in fetched {
            if event.seq > cursor && !self.seen_set.contains(&event.seq) {
                self.buffer.entry(event.seq).or_insert(event);
            }
        }

        let buffer = std::mem::take(&mut self.buffer);
        let mut released = Vec::with_capacity(buffer.len());
        for (seq, event) in buffer {
            self.advance(seq);
            released.push(event);
        }

        self.resyncing = false;
        self.gap_since = None;
        released
    }

    fn advance(&mut self, seq: u64) {
        self.cursor = Some(seq);
        self.remember(seq);
    }

    fn drain_contiguous(&mut self, released: &mut Vec<ActivityEvent>) {
        while let Some(cursor) = self.cursor {
            let Some(event) = self.buffer.remove(&(cursor + 1)) else {
                break;
            };
            self.advance(event.seq);
            released.push(event);
        }
    }

    fn remember(&mut self, seq: u64) {
        if self.seen_set.insert(seq) {
            self.seen.push_back(seq);
            while self.seen.len() > self.seen_capacity {
                if let Some(old) = self.seen.pop_front() {
                    self.seen_set.remove(&old);
                }
            }
        }
    }
}
