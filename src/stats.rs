// src/stats.rs
//! Aggregate counters and processing rate.
//!
//! Rate is events per virtual second since the replay started. Once the
//! stream completes it is frozen; late `record_processed` calls still bump
//! the counter but no longer move the rate.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Processing,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Completion {
    at: DateTime<Utc>,
    final_rate: f64,
}

/// Counter snapshot. Store-derived figures (active records, topics) are
/// joined in by the query layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_processed: u64,
    pub breaking_detected: u64,
    pub duplicates_skipped: u64,
    pub malformed_skipped: u64,
    pub store_errors: u64,
    pub processing_rate: f64,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
}

#[derive(Debug)]
pub struct StatsTracker {
    processed: AtomicU64,
    breaking: AtomicU64,
    duplicates: AtomicU64,
    malformed: AtomicU64,
    store_errors: AtomicU64,
    virtual_start: DateTime<Utc>,
    wall_start: Instant,
    completion: RwLock<Option<Completion>>,
}

impl StatsTracker {
    pub fn new(virtual_start: DateTime<Utc>) -> Self {
        Self {
            processed: AtomicU64::new(0),
            breaking: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
            virtual_start,
            wall_start: Instant::now(),
            completion: RwLock::new(None),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Newly detected breaking records (refreshes are not counted).
    pub fn record_breaking(&self, delta: u64) {
        self.breaking.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn is_complete(&self) -> bool {
        self.completion.read().is_some()
    }

    pub fn status(&self) -> ProcessingStatus {
        if self.is_complete() {
            ProcessingStatus::Complete
        } else {
            ProcessingStatus::Processing
        }
    }

    /// Events per virtual second at `now`, or the frozen final rate.
    pub fn rate(&self, now: DateTime<Utc>) -> f64 {
        if let Some(c) = *self.completion.read() {
            return c.final_rate;
        }
        self.live_rate(now)
    }

    fn live_rate(&self, now: DateTime<Utc>) -> f64 {
        let secs = (now - self.virtual_start).num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed() as f64 / secs
    }

    /// Freeze the rate. Returns the final rate; later calls return the
    /// same value and change nothing.
    pub fn mark_complete(&self, now: DateTime<Utc>) -> f64 {
        let mut g = self.completion.write();
        if let Some(c) = *g {
            return c.final_rate;
        }
        let final_rate = self.live_rate(now);
        *g = Some(Completion { at: now, final_rate });
        final_rate
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AggregateStats {
        let completion = *self.completion.read();
        AggregateStats {
            total_processed: self.processed(),
            breaking_detected: self.breaking.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates.load(Ordering::Relaxed),
            malformed_skipped: self.malformed.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            processing_rate: completion.map_or_else(|| self.live_rate(now), |c| c.final_rate),
            processing_status: if completion.is_some() {
                ProcessingStatus::Complete
            } else {
                ProcessingStatus::Processing
            },
            final_rate: completion.map(|c| c.final_rate),
            completed_at: completion.map(|c| c.at),
            uptime_seconds: self.wall_start.elapsed().as_secs(),
        }
    }
}
