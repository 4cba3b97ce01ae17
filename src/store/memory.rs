// src/store/memory.rs
//! In-process backend. One reader-writer lock over all state, so every
//! trait call is a single critical section: readers never see a half-applied
//! upsert and eviction cannot interleave with a refresh of the same key.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{sort_newest_first, BreakingNewsRecord, StateStore, UpsertOutcome};
use crate::article::ContentFingerprint;
use crate::dedup::Deduplicator;
use crate::error::StoreError;
use crate::velocity::VelocityWindow;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, BreakingNewsRecord>,
    dedup: Deduplicator,
    windows: VelocityWindow,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records held right now, expired-but-not-evicted included.
    pub fn stored_len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn tracked_topics(&self) -> usize {
        self.inner.read().windows.topic_count()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut g = self.inner.write();
        g.records.clear();
        g.dedup.clear();
        g.windows.clear();
        Ok(())
    }

    async fn has_fingerprint(&self, fp: &ContentFingerprint) -> Result<bool, StoreError> {
        Ok(self.inner.read().dedup.seen(fp))
    }

    async fn record_fingerprint(&self, fp: &ContentFingerprint, owner: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().dedup.record(fp.clone(), owner))
    }

    async fn record_occurrence(
        &self,
        topic: &str,
        member: &str,
        ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        Ok(self.inner.write().windows.insert(topic, member, ts, window))
    }

    async fn count_in_window(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        Ok(self.inner.read().windows.count_in_window(topic, now, window))
    }

    async fn prune_windows(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.inner.write().windows.prune(cutoff))
    }

    async fn upsert_breaking(
        &self,
        record: BreakingNewsRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.inner.write();
        let outcome = match g.records.get(&record.key) {
            Some(existing)
                if existing.is_active(record.detected_at)
                    && existing.detected_at < record.detected_at =>
            {
                let merged = existing.refreshed_with(record);
                g.records.insert(merged.key.clone(), merged);
                UpsertOutcome::Refreshed
            }
            _ => {
                g.records.insert(record.key.clone(), record);
                UpsertOutcome::Inserted
            }
        };
        Ok(outcome)
    }

    async fn list_active(
        &self,
        now: DateTime<Utc>,
        topic: Option<&str>,
    ) -> Result<Vec<BreakingNewsRecord>, StoreError> {
        let mut out: Vec<BreakingNewsRecord> = {
            let g = self.inner.read();
            g.records
                .values()
                .filter(|r| r.is_active(now))
                .filter(|r| topic.map_or(true, |t| r.topic == t))
                .cloned()
                .collect()
        };
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn active_count(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .records
            .values()
            .filter(|r| r.is_active(now))
            .count())
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut g = self.inner.write();
        let before = g.records.len();
        g.records.retain(|_, r| r.is_active(now));
        Ok(before - g.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;
    use crate::scoring::ScoreBreakdown;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap()
    }

    fn rec(key: &str, topic: &str, at: DateTime<Utc>, total: f64) -> BreakingNewsRecord {
        BreakingNewsRecord {
            key: key.into(),
            article: Article {
                id: key.into(),
                title: format!("title {key}"),
                description: String::new(),
                link: String::new(),
                category: Some("world".into()),
                pub_timestamp: at,
                raw_text: String::new(),
            },
            scores: ScoreBreakdown {
                total,
                ..Default::default()
            },
            detected_keywords: vec![],
            topic: topic.into(),
            detected_at: at,
            expires_at: at + Duration::hours(6),
        }
    }

    #[tokio::test]
    async fn ttl_boundary_is_exclusive_at_expiry() {
        let s = MemoryStore::new();
        s.upsert_breaking(rec("a", "kyiv", t0(), 0.8)).await.unwrap();

        let just_before = t0() + Duration::hours(5) + Duration::minutes(59);
        assert_eq!(s.list_active(just_before, None).await.unwrap().len(), 1);

        let at_expiry = t0() + Duration::hours(6);
        assert!(s.list_active(at_expiry, None).await.unwrap().is_empty());

        let after = at_expiry + Duration::seconds(1);
        assert!(s.list_active(after, None).await.unwrap().is_empty());

        assert_eq!(s.evict_expired(at_expiry).await.unwrap(), 1);
        assert_eq!(s.stored_len(), 0);
    }

    #[tokio::test]
    async fn evict_is_idempotent() {
        let s = MemoryStore::new();
        s.upsert_breaking(rec("a", "x", t0(), 0.8)).await.unwrap();
        s.upsert_breaking(rec("b", "x", t0() + Duration::hours(3), 0.8)).await.unwrap();
        let now = t0() + Duration::hours(7);

        assert_eq!(s.evict_expired(now).await.unwrap(), 1);
        let first = s.list_active(now, None).await.unwrap();
        assert_eq!(s.evict_expired(now).await.unwrap(), 0);
        let second = s.list_active(now, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn refresh_preserves_detection_and_extends_expiry() {
        let s = MemoryStore::new();
        assert_eq!(
            s.upsert_breaking(rec("a", "x", t0(), 0.6)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        let later = t0() + Duration::hours(2);
        let mut newer = rec("a", "x", later, 0.9);
        newer.detected_keywords = vec!["attack".into()];
        assert_eq!(s.upsert_breaking(newer).await.unwrap(), UpsertOutcome::Refreshed);

        let active = s.list_active(later, None).await.unwrap();
        assert_eq!(active.len(), 1);
        let r = &active[0];
        assert_eq!(r.detected_at, t0());
        assert_eq!(r.expires_at, later + Duration::hours(6));
        assert!((r.scores.total - 0.9).abs() < 1e-12);
        assert_eq!(r.detected_keywords, vec!["attack".to_string()]);
        // still active past the first expiry
        assert_eq!(s.active_count(t0() + Duration::hours(7)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_upsert_at_same_instant_stays_inserted() {
        let s = MemoryStore::new();
        s.upsert_breaking(rec("a", "x", t0(), 0.6)).await.unwrap();
        assert_eq!(
            s.upsert_breaking(rec("a", "x", t0(), 0.6)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(s.stored_len(), 1);
    }

    #[tokio::test]
    async fn expired_but_unevicted_key_is_reinserted_fresh() {
        let s = MemoryStore::new();
        s.upsert_breaking(rec("a", "x", t0(), 0.6)).await.unwrap();
        let much_later = t0() + Duration::hours(8);
        assert_eq!(
            s.upsert_breaking(rec("a", "x", much_later, 0.7)).await.unwrap(),
            UpsertOutcome::Inserted
        );
        let active = s.list_active(much_later, None).await.unwrap();
        assert_eq!(active[0].detected_at, much_later);
    }

    #[tokio::test]
    async fn list_filters_by_topic_and_orders_newest_first() {
        let s = MemoryStore::new();
        s.upsert_breaking(rec("a", "kyiv", t0(), 0.6)).await.unwrap();
        s.upsert_breaking(rec("b", "gaza", t0() + Duration::minutes(5), 0.6)).await.unwrap();
        s.upsert_breaking(rec("c", "kyiv", t0() + Duration::minutes(9), 0.6)).await.unwrap();
        let now = t0() + Duration::minutes(10);

        let all: Vec<String> = s.list_active(now, None).await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(all, vec!["c", "b", "a"]);

        let kyiv: Vec<String> = s.list_active(now, Some("kyiv")).await.unwrap().into_iter().map(|r| r.key).collect();
        assert_eq!(kyiv, vec!["c", "a"]);

        let topics = s.list_topics(now).await.unwrap();
        assert_eq!(topics[0].topic, "kyiv");
        assert_eq!(topics[0].active_count, 2);
        assert_eq!(topics[1].topic, "gaza");
    }

    #[tokio::test]
    async fn fingerprints_and_windows() {
        let s = MemoryStore::new();
        let fp = ContentFingerprint::of_title("Quake hits coast").unwrap();
        assert!(!s.has_fingerprint(&fp).await.unwrap());
        assert!(s.record_fingerprint(&fp, "q1").await.unwrap());
        assert!(s.has_fingerprint(&fp).await.unwrap());
        assert!(s.record_fingerprint(&fp, "q1").await.unwrap());
        assert!(!s.record_fingerprint(&fp, "q2").await.unwrap());

        let w = Duration::minutes(30);
        s.record_occurrence("quake", "q1", t0(), w).await.unwrap();
        assert_eq!(s.record_occurrence("quake", "q1", t0(), w).await.unwrap(), 1);
        assert_eq!(s.record_occurrence("quake", "q3", t0() + Duration::minutes(1), w).await.unwrap(), 2);
        assert_eq!(s.count_in_window("quake", t0() + Duration::minutes(31), w).await.unwrap(), 0);
        assert_eq!(s.prune_windows(t0() + Duration::minutes(1)).await.unwrap(), 1);
        assert_eq!(s.tracked_topics(), 0);

        s.reset().await.unwrap();
        assert!(!s.has_fingerprint(&fp).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_run_alongside_writer_and_janitor() {
        let s = Arc::new(MemoryStore::new());
        let writer = {
            let s = s.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let at = t0() + Duration::minutes(i);
                    s.upsert_breaking(rec(&format!("k{i}"), "x", at, 0.7)).await.unwrap();
                }
            })
        };
        let janitor = {
            let s = s.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    s.evict_expired(t0() + Duration::minutes(i * 4)).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut readers = Vec::new();
        for _ in 0..4 {
            let s = s.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let now = t0() + Duration::minutes(100);
                    for r in s.list_active(now, None).await.unwrap() {
                        assert!(r.is_active(now));
                        assert_eq!(r.key, r.article.id);
                    }
                    tokio::task::yield_now().await;
                }
            }));
        }
        writer.await.unwrap();
        janitor.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
        let end = t0() + Duration::minutes(199);
        assert_eq!(s.active_count(end).await.unwrap(), 200);
    }
}
