// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod article;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod error;
pub mod janitor;
pub mod pipeline;
pub mod replay;
pub mod scoring;
pub mod shutdown;
pub mod stats;
pub mod store;
pub mod telemetry;
pub mod topic;
pub mod velocity;
pub mod views;

// ---- Re-exports for stable public API ----
pub use crate::article::{prepare_stream, Article, ContentFingerprint, TimeRange};
pub use crate::clock::{Clock, ManualClock, SimulationClock};
pub use crate::config::EngineConfig;
pub use crate::pipeline::{EventOutcome, Pipeline, RunSummary};
pub use crate::replay::{Emission, PacedReplayer};
pub use crate::stats::{ProcessingStatus, StatsTracker};
pub use crate::store::{StateStore, StoreBackend};
pub use crate::views::QueryService;
