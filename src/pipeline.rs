// src/pipeline.rs
//! # Replay pipeline
//! The single writer: takes one article at a time and runs it through
//! validation → dedup → topic → velocity window → scoring → state store →
//! stats. Each article is handled to completion before the next one; the
//! only suspension points are store calls.

use chrono::Duration;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::article::Article;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{ArticleError, ConfigError, StoreError};
use crate::replay::{Emission, PacedReplayer};
use crate::scoring::ScoringEngine;
use crate::stats::StatsTracker;
use crate::store::{BreakingNewsRecord, StateStore, UpsertOutcome};
use crate::telemetry::{ensure_metrics_described, short_title};
use crate::topic::TopicExtractor;

/// What happened to one article.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// Scored below the threshold.
    Scored { topic: String, total: f64 },
    Breaking {
        key: String,
        topic: String,
        total: f64,
        upsert: UpsertOutcome,
    },
    Duplicate,
    Malformed(ArticleError),
    /// A store call failed after retries; the article is dropped.
    StoreFailed,
}

/// How a `run` ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub emitted: u64,
    pub completed: bool,
    pub final_rate: Option<f64>,
}

pub struct Pipeline {
    store: Arc<dyn StateStore>,
    scoring: ScoringEngine,
    topics: TopicExtractor,
    stats: Arc<StatsTracker>,
    clock: Arc<dyn Clock>,
    window: Duration,
    ttl: Duration,
    progress_every: u64,
}

impl Pipeline {
    pub fn new(
        cfg: &EngineConfig,
        store: Arc<dyn StateStore>,
        stats: Arc<StatsTracker>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            store,
            scoring: ScoringEngine::from_config(cfg)?,
            topics: TopicExtractor::from_config(cfg),
            stats,
            clock,
            window: cfg.velocity_window(),
            ttl: cfg.ttl(),
            progress_every: cfg.progress_every.max(1),
        })
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Process one article. Never fails: problems become outcomes and
    /// counters.
    pub async fn process(&self, article: Article) -> EventOutcome {
        ensure_metrics_described();
        match self.try_process(article).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.stats.record_store_error();
                counter!("news_store_errors_total").increment(1);
                warn!(target: "pipeline", error = %e, "store call failed; article dropped");
                EventOutcome::StoreFailed
            }
        }
    }

    async fn try_process(&self, article: Article) -> Result<EventOutcome, StoreError> {
        let fp = match article.validate().and_then(|_| article.fingerprint()) {
            Ok(fp) => fp,
            Err(e) => {
                self.stats.record_malformed();
                counter!("news_malformed_total").increment(1);
                warn!(target: "pipeline", id = %article.id, error = %e, "skipping malformed article");
                return Ok(EventOutcome::Malformed(e));
            }
        };

        if !self.store.record_fingerprint(&fp, &article.id).await? {
            self.stats.record_duplicate();
            counter!("news_duplicates_total").increment(1);
            debug!(target: "pipeline", title = %short_title(&article.title), "duplicate skipped");
            return Ok(EventOutcome::Duplicate);
        }

        let now = self.clock.now();
        let topic = self.topics.extract(&article.title);
        let count = self
            .store
            .record_occurrence(&topic, &article.id, article.pub_timestamp, self.window)
            .await?;
        let outcome = self.scoring.score(&article, &topic, count, now);
        let total = outcome.breakdown.total;

        let result = if outcome.is_breaking {
            let title = short_title(&article.title);
            let record = BreakingNewsRecord::new(article, outcome, now, self.ttl);
            let key = record.key.clone();
            let upsert = self.store.upsert_breaking(record).await?;
            if upsert == UpsertOutcome::Inserted {
                self.stats.record_breaking(1);
                counter!("news_breaking_total").increment(1);
            }
            info!(
                target: "pipeline",
                %key,
                %topic,
                score = total,
                refreshed = upsert == UpsertOutcome::Refreshed,
                title = %title,
                "breaking news detected"
            );
            EventOutcome::Breaking {
                key,
                topic,
                total,
                upsert,
            }
        } else {
            EventOutcome::Scored { topic, total }
        };

        self.stats.record_processed();
        counter!("news_events_total").increment(1);
        let processed = self.stats.processed();
        if processed % self.progress_every == 0 {
            info!(
                target: "pipeline",
                processed,
                rate = self.stats.rate(now),
                virtual_now = %now,
                "progress"
            );
        }
        Ok(result)
    }

    /// Drain the replayer. On end-of-stream the simulation clock is frozen
    /// and the stats are marked complete; on shutdown neither happens.
    pub async fn run(&self, replayer: &mut PacedReplayer) -> RunSummary {
        info!(
            target: "pipeline",
            queued = replayer.remaining(),
            factor = replayer.clock().factor(),
            "replay started"
        );
        while let Some(emission) = replayer.next().await {
            match emission {
                Emission::Article(article) => {
                    self.process(article).await;
                }
                Emission::EndOfStream => {
                    let at = replayer.clock().freeze();
                    let final_rate = self.stats.mark_complete(at);
                    info!(
                        target: "pipeline",
                        processed = self.stats.processed(),
                        final_rate,
                        virtual_end = %at,
                        "replay complete"
                    );
                    return RunSummary {
                        emitted: replayer.emitted(),
                        completed: true,
                        final_rate: Some(final_rate),
                    };
                }
            }
        }
        info!(target: "pipeline", emitted = replayer.emitted(), "replay stopped by shutdown");
        RunSummary {
            emitted: replayer.emitted(),
            completed: false,
            final_rate: None,
        }
    }
}
