// src/store/redis_backend.rs
//! Networked backend on Redis, for deployments where several processes
//! share one view of the stream.
//!
//! Layout (all keys under a namespace):
//! - `{ns}:breaking:{key}`  hash { record: JSON, first_detected: ms }
//! - `{ns}:breaking_expiry` zset key → expiry ms
//! - `{ns}:seen`            hash fingerprint → owning article id
//! - `{ns}:topic:{topic}`   zset article id → ms
//! - `{ns}:topics`          set of topics with a window
//!
//! Claim, upsert, eviction and window pruning run as Lua scripts, so each
//! check-then-write is serialized by Redis itself. Every write can be
//! replayed after a dropped connection without changing its result.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};

use super::{sort_newest_first, BreakingNewsRecord, StateStore, UpsertOutcome};
use crate::article::ContentFingerprint;
use crate::error::StoreError;

pub const DEFAULT_NAMESPACE: &str = "breaking";

// KEYS[1]=seen hash; ARGV[1]=fingerprint, ARGV[2]=article id
static CLAIM: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2])
if redis.call('HGET', KEYS[1], ARGV[1]) == ARGV[2] then
  return 1
end
return 0
"#,
    )
});

// KEYS[1]=record hash, KEYS[2]=expiry zset
// ARGV[1]=key, ARGV[2]=json, ARGV[3]=detected ms, ARGV[4]=expires ms
static UPSERT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local first = redis.call('HGET', KEYS[1], 'first_detected')
local exp = redis.call('ZSCORE', KEYS[2], ARGV[1])
local refreshed = 0
if first and exp and tonumber(exp) > tonumber(ARGV[3]) and tonumber(first) < tonumber(ARGV[3]) then
  refreshed = 1
else
  first = ARGV[3]
end
redis.call('HSET', KEYS[1], 'record', ARGV[2], 'first_detected', first)
redis.call('ZADD', KEYS[2], ARGV[4], ARGV[1])
return refreshed
"#,
    )
});

// KEYS[1]=expiry zset; ARGV[1]=now ms, ARGV[2]=record key prefix
static EVICT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
for _, id in ipairs(ids) do
  redis.call('DEL', ARGV[2] .. id)
end
if #ids > 0 then
  redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
end
return #ids
"#,
    )
});

// KEYS[1]=topics set; ARGV[1]=cutoff ms, ARGV[2]=topic key prefix
static PRUNE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local touched = 0
for _, topic in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  local key = ARGV[2] .. topic
  if redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[1]) > 0 then
    touched = touched + 1
  end
  if redis.call('ZCARD', key) == 0 then
    redis.call('SREM', KEYS[1], topic)
  end
end
return touched
"#,
    )
});

pub struct RedisStore {
    conn: ConnectionManager,
    ns: String,
}

impl RedisStore {
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ns: namespace.to_string(),
        })
    }

    fn record_prefix(&self) -> String {
        format!("{}:breaking:", self.ns)
    }

    fn record_key(&self, key: &str) -> String {
        format!("{}{}", self.record_prefix(), key)
    }

    fn expiry_key(&self) -> String {
        format!("{}:breaking_expiry", self.ns)
    }

    fn seen_key(&self) -> String {
        format!("{}:seen", self.ns)
    }

    fn topics_key(&self) -> String {
        format!("{}:topics", self.ns)
    }

    fn topic_prefix(&self) -> String {
        format!("{}:topic:", self.ns)
    }

    fn topic_key(&self, topic: &str) -> String {
        format!("{}{}", self.topic_prefix(), topic)
    }
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| StoreError::Backend(format!("timestamp out of range: {ms}")))
}

/// Rebuild a record from its hash fields; `first_detected` wins over the
/// JSON's `detected_at` (the JSON is rewritten on every refresh).
fn decode_record(json: &str, first_detected_ms: Option<i64>) -> Result<BreakingNewsRecord, StoreError> {
    let mut rec: BreakingNewsRecord = serde_json::from_str(json)?;
    if let Some(ms) = first_detected_ms {
        rec.detected_at = from_millis(ms)?;
    }
    Ok(rec)
}

#[async_trait]
impl StateStore for RedisStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:*", self.ns);
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                conn.del::<_, ()>(keys).await?;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(())
    }

    async fn has_fingerprint(&self, fp: &ContentFingerprint) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        Ok(conn.hexists(self.seen_key(), fp.as_str()).await?)
    }

    async fn record_fingerprint(&self, fp: &ContentFingerprint, owner: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let owned: i64 = CLAIM
            .key(self.seen_key())
            .arg(fp.as_str())
            .arg(owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(owned == 1)
    }

    async fn record_occurrence(
        &self,
        topic: &str,
        member: &str,
        ts: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let key = self.topic_key(topic);
        let ts_ms = millis(ts);
        let cutoff_ms = millis(ts - window);
        let (count,): (usize,) = redis::pipe()
            .atomic()
            .sadd(self.topics_key(), topic)
            .ignore()
            .zadd(&key, member, ts_ms)
            .ignore()
            .zrembyscore(&key, "-inf", cutoff_ms)
            .ignore()
            .zcard(&key)
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn count_in_window(
        &self,
        topic: &str,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let min = format!("({}", millis(now - window));
        Ok(conn.zcount(self.topic_key(topic), min, "+inf").await?)
    }

    async fn prune_windows(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let touched: usize = PRUNE
            .key(self.topics_key())
            .arg(millis(cutoff))
            .arg(self.topic_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(touched)
    }

    async fn upsert_breaking(
        &self,
        record: BreakingNewsRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(&record)?;
        let refreshed: i64 = UPSERT
            .key(self.record_key(&record.key))
            .key(self.expiry_key())
            .arg(&record.key)
            .arg(json)
            .arg(millis(record.detected_at))
            .arg(millis(record.expires_at))
            .invoke_async(&mut conn)
            .await?;
        Ok(if refreshed == 1 {
            UpsertOutcome::Refreshed
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn list_active(
        &self,
        now: DateTime<Utc>,
        topic: Option<&str>,
    ) -> Result<Vec<BreakingNewsRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let min = format!("({}", millis(now));
        let keys: Vec<String> = conn.zrangebyscore(self.expiry_key(), min, "+inf").await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.hget(self.record_key(key), &["record", "first_detected"]);
        }
        let rows: Vec<(Option<String>, Option<i64>)> = pipe.query_async(&mut conn).await?;

        let mut out = Vec::with_capacity(rows.len());
        for (json, first) in rows {
            // Evicted between the range read and the fetch.
            let Some(json) = json else { continue };
            let rec = decode_record(&json, first)?;
            if topic.map_or(true, |t| rec.topic == t) && rec.is_active(now) {
                out.push(rec);
            }
        }
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn active_count(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let min = format!("({}", millis(now));
        Ok(conn.zcount(self.expiry_key(), min, "+inf").await?)
    }

    async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let evicted: usize = EVICT
            .key(self.expiry_key())
            .arg(millis(now))
            .arg(self.record_prefix())
            .invoke_async(&mut conn)
            .await?;
        Ok(evicted)
    }
}
