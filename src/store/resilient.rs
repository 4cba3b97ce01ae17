// src/store/resilient.rs
//! Retry and fallback wrapper around any `StateStore`.
//!
//! Transient failures (`StoreError::Unavailable`) are retried with
//! exponential backoff and ±30% jitter. When a read still fails, the last
//! good `list_active` result is served instead and the store reports itself
//! as degraded until the next successful read.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::{BreakingNewsRecord, StateStore, UpsertOutcome};
use crate::article::ContentFingerprint;
use crate::config::RetrySettings;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: std::time::Duration,
    pub max_backoff: std::time::Duration,
    pub backoff_multiplier: f64,
    /// ±30% on each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(s: &RetrySettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_backoff: std::time::Duration::from_millis(s.initial_backoff_ms),
            max_backoff: std::time::Duration::from_millis(s.max_backoff_ms),
            backoff_multiplier: s.backoff_multiplier,
            jitter: s.jitter,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn next_backoff(&self, current: std::time::Duration) -> std::time::Duration {
        let next = (current.as_millis() as f64 * self.backoff_multiplier)
            .min(self.max_backoff.as_millis() as f64);
        std::time::Duration::from_millis(next as u64)
    }

    fn delay_for(&self, base: std::time::Duration) -> std::time::Duration {
        if self.jitter {
            let factor = 1.0 + rand::rng().random_range(-0.3..0.3);
            std::time::Duration::from_millis((base.as_millis() as f64 * factor) as u64)
        } else {
            base
        }
    }

    /// Run `f` until it succeeds, fails permanently, or retries run out.
    pub async fn run<F, Fut, T>(&self, op: &'static str, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0u32;
        let mut backoff = self.initial_backoff;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(backoff);
                    warn!(
                        target: "store",
                        op,
                        attempt,
                        max = self.max_retries,
                        ?delay,
                        error = %e,
                        "store call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    backoff = self.next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A read result plus whether it came from the fallback cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    pub value: T,
    pub degraded: bool,
}

pub struct ResilientStore {
    inner: Arc<dyn StateStore>,
    policy: RetryPolicy,
    last_active: RwLock<Option<Vec<BreakingNewsRecord>>>,
    degraded: AtomicBool,
}

impl ResilientStore {
    pub fn new(inner: Arc<dyn StateStore>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            last_active: RwLock::new(None),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// True after a read was served from the fallback cache, until the next
    /// successful read.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Active records, falling back to the last good result on failure.
    /// Errors only when the backend fails and nothing was ever cached.
    pub async fn active_snapshot(
        &self,
        now: DateTime<Utc>,
        topic: Option<&str>,
    ) -> Result<Snapshot<Vec<BreakingNewsRecord>>, StoreError> {
        let result = self
            .policy
            .run("list_active", || self.inner.list_active(now, None))
            .await;
        match result {
            Ok(all) => {
                self.degraded.store(false, Ordering::Release);
                let value = filter_topic(&all, topic);
                *self.last_active.write() = Some(all);
                Ok(Snapshot {
                    value,
                    degraded: false,
                })
            }
            Err(e) => {
                let cached = self.last_active.read().clone();
                match cached {
                    Some(all) => {
                        self.degraded.store(true, Ordering::Release);
                        warn!(target: "store", error = %e, "serving last known active records");
                        let live: Vec<_> = all.into_iter().filter(|r| r.is_active(now)).collect();
                        Ok(Snapshot {
                            value: filter_topic(&live, topic),
                            degraded: true,
                        })
                    }
                    None => Err(e),
                }
            }
        }
    }
}

fn filter_topic(records: &[BreakingNewsRecord], topic: Option<&str>) -> Vec<BreakingNewsRecord> {
    records
        .iter()
        .filter(|r| topic.map_or(true, |t| r.topic == t))
        .cloned()
        .collect()
}

#[async_trait]
impl StateStore for ResilientStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.policy.run("reset", || self.inner.reset()).await?;
        *self.last_active.write() = None;
        self.degraded.store(false, Ordering::Release);
        Ok(())
    }

    async fn has_fingerprint(&self, fp: &ContentFingerprint) -> Result<bool, StoreError> {
        self.policy
            .run("has_fingerprint", || self.inner.has_fingerprint(fp))
            .await
    }

    // Writes are idempotent per article id: a retry after a dropped reply
    // returns the first attempt's answer.
    async fn record_fingerprint(&self, fp: &ContentFingerprint, owner: &str) -> Result<bool, StoreError> {
        self.policy
            .run("record_fingerprint", || self.inner.record_fingerprint(fp, owner))
            .await
    }

    async fn record_occurrence(
        &self,
        topic: &str,
        member: &str,
        ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        self.policy
            .run("record_occurrence", || {
                self.inner.record_occurrence(topic, member, ts, window)
            })
            .await
    }

    async fn count_in_window(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        self.policy
            .run("count_in_window", || self.inner.count_in_window(topic, now, window))
            .await
    }

    async fn prune_windows(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        self.policy
            .run("prune_windows", || self.inner.prune_windows(cutoff))
            .await
    }

    async fn upsert_breaking(
        &self,
        record: BreakingNewsRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        self.policy
            .run("upsert_breaking", || self.inner.upsert_breaking(record.clone()))
            .await
    }

    async fn list_active(
        &self,
        now: DateTime<Utc>,
        topic: Option<&str>,
    ) -> Result<Vec<BreakingNewsRecord>, StoreError> {
        Ok(self.active_snapshot(now, topic).await?.value)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        self.policy
            .run("evict_expired", || self.inner.evict_expired(now))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Article;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::pipeline::{EventOutcome, Pipeline};
    use crate::scoring::ScoreBreakdown;
    use crate::stats::StatsTracker;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicU32;

    /// Memory store that fails the next `n` calls, or every call while down.
    /// `lost_replies` writes are applied and then reported as dropped.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next: AtomicU32,
        down: AtomicBool,
        calls: AtomicU32,
        permanent: AtomicBool,
        lost_replies: AtomicU32,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("WRONGTYPE".into()));
            }
            if self.down.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection refused".into()));
            }
            let left = self.fail_next.load(Ordering::SeqCst);
            if left > 0 {
                self.fail_next.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("timeout".into()));
            }
            Ok(())
        }

        fn reply<T>(&self, applied: Result<T, StoreError>) -> Result<T, StoreError> {
            let value = applied?;
            let left = self.lost_replies.load(Ordering::SeqCst);
            if left > 0 {
                self.lost_replies.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::Unavailable("connection dropped".into()));
            }
            Ok(value)
        }
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        fn backend_name(&self) -> &'static str {
            "flaky"
        }
        async fn reset(&self) -> Result<(), StoreError> {
            self.check()?;
            self.inner.reset().await
        }
        async fn has_fingerprint(&self, fp: &ContentFingerprint) -> Result<bool, StoreError> {
            self.check()?;
            self.inner.has_fingerprint(fp).await
        }
        async fn record_fingerprint(&self, fp: &ContentFingerprint, owner: &str) -> Result<bool, StoreError> {
            self.check()?;
            self.reply(self.inner.record_fingerprint(fp, owner).await)
        }
        async fn record_occurrence(
            &self,
            topic: &str,
            member: &str,
            ts: DateTime<Utc>,
            window: Duration,
        ) -> Result<usize, StoreError> {
            self.check()?;
            self.reply(self.inner.record_occurrence(topic, member, ts, window).await)
        }
        async fn count_in_window(
            &self,
            topic: &str,
            now: DateTime<Utc>,
            window: Duration,
        ) -> Result<usize, StoreError> {
            self.check()?;
            self.inner.count_in_window(topic, now, window).await
        }
        async fn prune_windows(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            self.check()?;
            self.inner.prune_windows(cutoff).await
        }
        async fn upsert_breaking(
            &self,
            record: BreakingNewsRecord,
        ) -> Result<UpsertOutcome, StoreError> {
            self.check()?;
            self.reply(self.inner.upsert_breaking(record).await)
        }
        async fn list_active(
            &self,
            now: DateTime<Utc>,
            topic: Option<&str>,
        ) -> Result<Vec<BreakingNewsRecord>, StoreError> {
            self.check()?;
            self.inner.list_active(now, topic).await
        }
        async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
            self.check()?;
            self.inner.evict_expired(now).await
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 3, 1, 12, 0, 0).unwrap()
    }

    fn rec(key: &str, topic: &str, at: DateTime<Utc>) -> BreakingNewsRecord {
        BreakingNewsRecord {
            key: key.into(),
            article: Article {
                id: key.into(),
                title: format!("title {key}"),
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

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff: std::time::Duration::from_millis(10),
            max_backoff: std::time::Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn wrap(policy: RetryPolicy) -> (Arc<FlakyStore>, ResilientStore) {
        let flaky = Arc::new(FlakyStore::default());
        let store = ResilientStore::new(flaky.clone(), policy);
        (flaky, store)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_with_backoff() {
        let (flaky, store) = wrap(fast_policy());
        flaky.fail_next.store(2, Ordering::SeqCst);

        let started = tokio::time::Instant::now();
        let out = store.upsert_breaking(rec("a", "x", t0())).await.unwrap();
        assert_eq!(out, UpsertOutcome::Inserted);
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        // 10ms + 20ms
        assert!(started.elapsed() >= std::time::Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let (flaky, store) = wrap(fast_policy());
        flaky.down.store(true, Ordering::SeqCst);
        let err = store.evict_expired(t0()).await.unwrap_err();
        assert!(err.is_transient());
        // initial + 3 retries
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let (flaky, store) = wrap(fast_policy());
        flaky.permanent.store(true, Ordering::SeqCst);
        assert!(store.prune_windows(t0()).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_fall_back_to_last_good_result() {
        let (flaky, store) = wrap(fast_policy());
        store.upsert_breaking(rec("a", "kyiv", t0())).await.unwrap();
        store.upsert_breaking(rec("b", "gaza", t0())).await.unwrap();

        let now = t0() + Duration::minutes(1);
        let fresh = store.active_snapshot(now, None).await.unwrap();
        assert!(!fresh.degraded);
        assert_eq!(fresh.value.len(), 2);
        assert!(!store.is_degraded());

        flaky.down.store(true, Ordering::SeqCst);
        let stale = store.active_snapshot(now, Some("kyiv")).await.unwrap();
        assert!(stale.degraded);
        assert_eq!(stale.value.len(), 1);
        assert_eq!(stale.value[0].key, "a");
        assert!(store.is_degraded());

        // cached records still honor expiry
        let late = t0() + Duration::hours(6);
        assert!(store.list_active(late, None).await.unwrap().is_empty());

        flaky.down.store(false, Ordering::SeqCst);
        assert_eq!(store.list_active(now, None).await.unwrap().len(), 2);
        assert!(!store.is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn retried_writes_after_lost_reply_apply_once() {
        let (flaky, store) = wrap(RetryPolicy::default());
        let fp = ContentFingerprint::of_title("Breaking: missile attack on Kyiv").unwrap();

        flaky.lost_replies.store(1, Ordering::SeqCst);
        assert!(store.record_fingerprint(&fp, "a2").await.unwrap());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 2);
        // a later article with the same title is still a duplicate
        assert!(!store.record_fingerprint(&fp, "a3").await.unwrap());

        let w = Duration::minutes(30);
        flaky.lost_replies.store(1, Ordering::SeqCst);
        assert_eq!(store.record_occurrence("kyiv", "a2", t0(), w).await.unwrap(), 1);
        assert_eq!(store.count_in_window("kyiv", t0(), w).await.unwrap(), 1);

        flaky.lost_replies.store(1, Ordering::SeqCst);
        assert_eq!(
            store.upsert_breaking(rec("a2", "kyiv", t0())).await.unwrap(),
            UpsertOutcome::Inserted
        );
        assert_eq!(store.list_active(t0(), None).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_scores_article_whose_dedup_reply_was_lost() {
        let flaky = Arc::new(FlakyStore::default());
        let store = Arc::new(ResilientStore::new(flaky.clone(), RetryPolicy::default()));
        let clock = Arc::new(ManualClock::new(t0()));
        let stats = Arc::new(StatsTracker::new(t0()));
        let pipeline = Pipeline::new(&EngineConfig::default(), store.clone(), stats.clone(), clock).unwrap();

        flaky.lost_replies.store(1, Ordering::SeqCst);
        let article = Article {
            id: "a2".into(),
            title: "Breaking: missile attack on Kyiv".into(),
            description: String::new(),
            link: String::new(),
            category: Some("world".into()),
            pub_timestamp: t0(),
            raw_text: String::new(),
        };
        let out = pipeline.process(article).await;
        assert!(matches!(out, EventOutcome::Breaking { ref topic, .. } if topic == "kyiv"), "{out:?}");
        assert_eq!(stats.processed(), 1);
        let snap = stats.snapshot(t0());
        assert_eq!((snap.duplicates_skipped, snap.breaking_detected), (0, 1));
        assert_eq!(store.count_in_window("kyiv", t0(), Duration::minutes(30)).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_without_cache_surfaces_the_error() {
        let (flaky, store) = wrap(RetryPolicy::none());
        flaky.down.store(true, Ordering::SeqCst);
        assert!(store.list_active(t0(), None).await.is_err());
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = fast_policy();
        let ms = std::time::Duration::from_millis;
        assert_eq!(p.next_backoff(ms(10)), ms(20));
        assert_eq!(p.next_backoff(ms(80)), ms(100));
        assert_eq!(p.delay_for(ms(40)), ms(40));

        let jittered = RetryPolicy {
            jitter: true,
            ..fast_policy()
        };
        for _ in 0..50 {
            let d = jittered.delay_for(ms(100));
            assert!(d >= ms(70) && d <= ms(130), "{d:?}");
        }
    }

    #[test]
    fn policy_from_settings() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.initial_backoff, std::time::Duration::from_millis(50));
        assert_eq!(p.max_backoff, std::time::Duration::from_secs(2));
        assert!(p.jitter);
    }
}
