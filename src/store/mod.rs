// src/store/mod.rs
//! # State Store
//! The single home of shared mutable state: active breaking-news records,
//! the seen-fingerprint set and per-topic velocity windows.
//!
//! One writer (the replay pipeline), one periodic mutator (the janitor) and
//! any number of readers. Every method is atomic with respect to the others
//! on the same store.
//!
//! Backends are picked once at startup by `StoreBackend::build`; callers only
//! ever see `dyn StateStore`.

pub mod memory;
pub mod redis_backend;
pub mod resilient;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use crate::article::{Article, ContentFingerprint};
use crate::config::StoreSettings;
use crate::error::{ConfigError, StoreError};
use crate::scoring::{ScoreBreakdown, ScoringOutcome};

pub use memory::MemoryStore;
pub use redis_backend::RedisStore;
pub use resilient::{ResilientStore, RetryPolicy};

/// An article that crossed the breaking threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakingNewsRecord {
    /// Stable key: the article id.
    pub key: String,
    pub article: Article,
    pub scores: ScoreBreakdown,
    pub detected_keywords: Vec<String>,
    pub topic: String,
    /// Virtual time of first detection.
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BreakingNewsRecord {
    pub fn new(article: Article, outcome: ScoringOutcome, detected_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: article.id.clone(),
            article,
            scores: outcome.breakdown,
            detected_keywords: outcome.detected_keywords,
            topic: outcome.topic,
            detected_at,
            expires_at: detected_at + ttl,
        }
    }

    /// Active while `now < expires_at`; gone at exactly `expires_at`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Refresh policy: keep the first detection time, take everything else
    /// (scores, keywords, topic, expiry) from the newer record.
    pub fn refreshed_with(&self, newer: BreakingNewsRecord) -> BreakingNewsRecord {
        BreakingNewsRecord {
            detected_at: self.detected_at,
            ..newer
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Refreshed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicCount {
    pub topic: String,
    pub active_count: usize,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Drop all state.
    async fn reset(&self) -> Result<(), StoreError>;

    async fn has_fingerprint(&self, fp: &ContentFingerprint) -> Result<bool, StoreError>;

    /// Claim the fingerprint for article `owner`. Returns `true` if it was
    /// unclaimed or is already owned by `owner`; repeating the call gives the
    /// same answer.
    async fn record_fingerprint(&self, fp: &ContentFingerprint, owner: &str) -> Result<bool, StoreError>;

    /// Add occurrence `member` (an article id) to the topic window, prune
    /// entries at or before `ts - window`, and return the in-window count.
    /// A member already in the window is not counted twice.
    async fn record_occurrence(
        &self,
        topic: &str,
        member: &str,
        ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError>;

    async fn count_in_window(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError>;

    /// Remove window entries at or before `cutoff`. Returns topics touched.
    async fn prune_windows(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Insert, or refresh an existing still-active record with the same key
    /// that was detected earlier. A repeat at the same detection instant
    /// rewrites the record and still reports `Inserted`.
    async fn upsert_breaking(
        &self,
        record: BreakingNewsRecord,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Unexpired records, newest detection first (key breaks ties).
    async fn list_active(
        &self,
        now: DateTime<Utc>,
        topic: Option<&str>,
    ) -> Result<Vec<BreakingNewsRecord>, StoreError>;

    async fn list_topics(&self, now: DateTime<Utc>) -> Result<Vec<TopicCount>, StoreError> {
        Ok(topic_counts(&self.list_active(now, None).await?))
    }

    async fn active_count(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.list_active(now, None).await?.len())
    }

    /// Remove every record with `expires_at <= now`. Idempotent.
    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Shared ordering for `list_active`.
pub(crate) fn sort_newest_first(records: &mut [BreakingNewsRecord]) {
    records.sort_by(|a, b| b.detected_at.cmp(&a.detected_at).then_with(|| a.key.cmp(&b.key)));
}

/// Per-topic counts, largest first, then by name.
pub fn topic_counts(records: &[BreakingNewsRecord]) -> Vec<TopicCount> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for r in records {
        *counts.entry(r.topic.as_str()).or_default() += 1;
    }
    let mut out: Vec<TopicCount> = counts
        .into_iter()
        .map(|(topic, active_count)| TopicCount {
            topic: topic.to_string(),
            active_count,
        })
        .collect();
    out.sort_by(|a, b| b.active_count.cmp(&a.active_count).then_with(|| a.topic.cmp(&b.topic)));
    out
}

/// Backend choice, resolved once from config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis { url: String },
}

impl StoreBackend {
    pub fn from_settings(settings: &StoreSettings) -> Result<Self, ConfigError> {
        match settings.backend.as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis {
                url: settings.redis_url.clone(),
            }),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    /// Connect (for redis), clear previous state, and wrap with retries.
    pub async fn build(&self, retry: RetryPolicy) -> Result<Arc<ResilientStore>, StoreError> {
        let inner: Arc<dyn StateStore> = match self {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Redis { url } => {
                let store = RedisStore::connect(url, redis_backend::DEFAULT_NAMESPACE).await?;
                store.reset().await?;
                Arc::new(store)
            }
        };
        info!(target: "store", backend = inner.backend_name(), "state store ready");
        Ok(Arc::new(ResilientStore::new(inner, retry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rec(key: &str, topic: &str, detected_min: i64) -> BreakingNewsRecord {
        let at = Utc.with_ymd_and_hms(2022, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(detected_min);
        BreakingNewsRecord {
            key: key.into(),
            article: Article {
                id: key.into(),
                title: format!("t {key}"),
                description: String::new(),
                link: String::new(),
                category: None,
                pub_timestamp: at,
                raw_text: String::new(),
            },
            scores: ScoreBreakdown::default(),
            detected_keywords: vec![],
            topic: topic.into(),
            detected_at: at,
            expires_at: at + Duration::hours(6),
        }
    }

    #[test]
    fn topic_counts_sorted_by_count_then_name() {
        let v = vec![rec("1", "gaza", 0), rec("2", "kyiv", 1), rec("3", "kyiv", 2), rec("4", "covid", 3)];
        let out = topic_counts(&v);
        let pairs: Vec<_> = out.iter().map(|t| (t.topic.as_str(), t.active_count)).collect();
        assert_eq!(pairs, vec![("kyiv", 2), ("covid", 1), ("gaza", 1)]);
    }

    #[test]
    fn newest_first_with_key_tiebreak() {
        let mut v = vec![rec("b", "x", 5), rec("c", "x", 10), rec("a", "x", 5)];
        sort_newest_first(&mut v);
        let keys: Vec<_> = v.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn refresh_keeps_first_detection() {
        let old = rec("k", "x", 0);
        let mut newer = rec("k", "y", 30);
        newer.detected_keywords = vec!["war".into()];
        let merged = old.refreshed_with(newer.clone());
        assert_eq!(merged.detected_at, old.detected_at);
        assert_eq!(merged.expires_at, newer.expires_at);
        assert_eq!(merged.topic, "y");
        assert_eq!(merged.detected_keywords, vec!["war".to_string()]);
    }

    #[test]
    fn backend_from_settings() {
        let mut s = StoreSettings::default();
        assert_eq!(StoreBackend::from_settings(&s), Ok(StoreBackend::Memory));
        s.backend = "redis".into();
        assert!(matches!(StoreBackend::from_settings(&s), Ok(StoreBackend::Redis { .. })));
        s.backend = "sqlite".into();
        assert!(StoreBackend::from_settings(&s).is_err());
    }
}
