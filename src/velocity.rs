// src/velocity.rs
//! # Velocity Window
//! Per-topic sliding window of occurrence timestamps (default 30 min).
//!
//! Timestamps arrive in non-decreasing order (the replay is chronological),
//! so each deque stays sorted and pruning only ever pops from the front.
//! An entry counts while `ts > now - window`.
//!
//! Entries are keyed by article id: inserting an id that is already in the
//! topic's window leaves the window unchanged.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct VelocityWindow {
    topics: HashMap<String, VecDeque<(DateTime<Utc>, String)>>,
}

impl VelocityWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record occurrence `member` and drop entries that fell out of the
    /// window. Returns the in-window count including the new entry.
    pub fn insert(&mut self, topic: &str, member: &str, ts: DateTime<Utc>, window: Duration) -> usize {
        let buf = self.topics.entry(topic.to_string()).or_default();
        if !buf.iter().any(|(_, m)| m == member) {
            buf.push_back((ts, member.to_string()));
        }
        pop_until(buf, ts - window);
        buf.len()
    }

    pub fn count_in_window(&self, topic: &str, now: DateTime<Utc>, window: Duration) -> usize {
        let cutoff = now - window;
        self.topics
            .get(topic)
            .map(|buf| buf.iter().rev().take_while(|(t, _)| *t > cutoff).count())
            .unwrap_or(0)
    }

    /// Drop every entry at or before `cutoff`; empty topics are removed.
    /// Returns how many topics lost entries.
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let mut touched = 0usize;
        self.topics.retain(|_, buf| {
            let before = buf.len();
            pop_until(buf, cutoff);
            if buf.len() < before {
                touched += 1;
            }
            !buf.is_empty()
        });
        touched
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn clear(&mut self) {
        self.topics.clear();
    }
}

fn pop_until(buf: &mut VecDeque<(DateTime<Utc>, String)>, cutoff: DateTime<Utc>) {
    while buf.front().is_some_and(|(t, _)| *t <= cutoff) {
        buf.pop_front();
    }
}

/// Map an in-window count to [0, 1].
///
/// Below the threshold the score ramps linearly up to 0.4; from the
/// threshold on it starts at 0.7 and gains 0.3 per extra article,
/// saturating at 1.0. Non-decreasing in `count`.
pub fn velocity_score(count: usize, threshold: usize) -> f64 {
    let threshold = threshold.max(1);
    if count == 0 {
        return 0.0;
    }
    if count < threshold {
        return 0.4 * count as f64 / threshold as f64;
    }
    (0.4 + 0.3 * (count - threshold + 1) as f64).min(1.0)
}
