// src/clock.rs
//! Virtual time.
//!
//! Everything that needs "now" (recency, TTL, rate) asks a `Clock` instead of
//! reading the wall clock. The replay uses `SimulationClock`; tests use
//! `ManualClock`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Accelerated clock: `virtual_start + factor × elapsed_wall`.
///
/// Wall time is read from `tokio::time::Instant`, so paused-time tests drive
/// it deterministically. Once frozen, `now()` stays at the freeze instant.
#[derive(Debug)]
pub struct SimulationClock {
    virtual_start: DateTime<Utc>,
    wall_start: Instant,
    factor: f64,
    frozen: Mutex<Option<DateTime<Utc>>>,
}

impl SimulationClock {
    pub fn starting_at(virtual_start: DateTime<Utc>, factor: f64) -> Self {
        Self {
            virtual_start,
            wall_start: Instant::now(),
            factor,
            frozen: Mutex::new(None),
        }
    }

    pub fn virtual_start(&self) -> DateTime<Utc> {
        self.virtual_start
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Wall-clock instant at which virtual time reaches `ts`.
    /// Instants before the start map to the start.
    pub fn wall_deadline(&self, ts: DateTime<Utc>) -> Instant {
        let offset = ts - self.virtual_start;
        if offset <= Duration::zero() {
            return self.wall_start;
        }
        let nanos = (offset.num_milliseconds() as f64 * 1_000_000.0 / self.factor).round();
        self.wall_start + std::time::Duration::from_nanos(nanos as u64)
    }

    /// Stop the clock at its current reading. Later calls are no-ops.
    pub fn freeze(&self) -> DateTime<Utc> {
        let mut frozen = self.frozen.lock();
        if let Some(at) = *frozen {
            return at;
        }
        let at = self.running_now();
        *frozen = Some(at);
        at
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.lock().is_some()
    }

    fn running_now(&self) -> DateTime<Utc> {
        let wall = Instant::now().saturating_duration_since(self.wall_start);
        let micros = wall.as_secs_f64() * self.factor * 1_000_000.0;
        self.virtual_start + Duration::microseconds(micros as i64)
    }
}

impl Clock for SimulationClock {
    fn now(&self) -> DateTime<Utc> {
        if let Some(at) = *self.frozen.lock() {
            return at;
        }
        self.running_now()
    }
}

/// Hand-driven clock for tests and offline evaluation.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
