// src/config/mod.rs
//! Engine configuration.
//!
//! Loaded from TOML with env overrides, then validated once at startup.
//! Every field has a default, so an empty file (or no file) is valid.
//!
//! Lookup order:
//! 1) $BREAKING_CONFIG_PATH
//! 2) config/engine.toml
//! 3) built-in defaults

mod defaults;

use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const ENV_CONFIG_PATH: &str = "BREAKING_CONFIG_PATH";
pub const ENV_THRESHOLD: &str = "BREAKING_THRESHOLD";
pub const ENV_ACCELERATION: &str = "TIME_ACCELERATION";
pub const ENV_STORE_BACKEND: &str = "STORE_BACKEND";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const DEFAULT_CONFIG_PATH: &str = "config/engine.toml";

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// Upper bounds for duration-like settings (one year).
const MAX_MINUTES: i64 = 365 * 24 * 60;
const MAX_HOURS: i64 = 365 * 24;
const MAX_RETENTION_FACTOR: i64 = 100;
const MAX_JANITOR_PERIOD_SECS: u64 = 24 * 60 * 60;
const MAX_TIME_ACCELERATION: f64 = 1_000_000.0;

/// Per-signal weights of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub keyword: f64,
    pub velocity: f64,
    pub category: f64,
    pub recency: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            keyword: 0.40,
            velocity: 0.35,
            category: 0.15,
            recency: 0.10,
        }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.keyword + self.velocity + self.category + self.recency
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("keyword", self.keyword),
            ("velocity", self.velocity),
            ("category", self.category),
            ("recency", self.recency),
        ] {
            if w < 0.0 || !w.is_finite() {
                return Err(ConfigError::NegativeWeight(name));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Retry policy for the networked store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// "memory" | "redis"
    pub backend: String,
    pub redis_url: String,
    pub retry: RetrySettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: "redis://localhost:6379".to_string(),
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Composite score at or above which an article is breaking.
    pub threshold: f64,
    pub weights: ScoringWeights,
    pub velocity_window_minutes: i64,
    /// Same-topic count at which velocity starts to saturate.
    pub velocity_threshold: usize,
    /// Janitor keeps window entries for `window × factor` before pruning.
    pub window_retention_factor: i64,
    pub ttl_hours: i64,
    pub time_acceleration: f64,
    pub janitor_period_secs: u64,
    pub freshness_minutes: i64,
    pub recency_horizon_hours: i64,
    pub default_category_score: f64,
    pub min_topic_word_len: usize,
    pub progress_every: u64,
    pub urgency_keywords: Vec<String>,
    pub high_urgency_keywords: Vec<String>,
    pub category_scores: BTreeMap<String, f64>,
    pub major_topics: Vec<String>,
    pub stopwords: Vec<String>,
    pub store: StoreSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: 0.50,
            weights: ScoringWeights::default(),
            velocity_window_minutes: 30,
            velocity_threshold: 3,
            window_retention_factor: 2,
            ttl_hours: 6,
            time_acceleration: 1000.0,
            janitor_period_secs: 5,
            freshness_minutes: 60,
            recency_horizon_hours: 24,
            default_category_score: 0.50,
            min_topic_word_len: 4,
            progress_every: 10,
            urgency_keywords: defaults::urgency_keywords(),
            high_urgency_keywords: defaults::high_urgency_keywords(),
            category_scores: defaults::category_scores(),
            major_topics: defaults::major_topics(),
            stopwords: defaults::stopwords(),
            store: StoreSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Parse TOML text; missing fields fall back to defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: EngineConfig = toml::from_str(s).context("parsing engine config TOML")?;
        Ok(cfg)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Env path → `config/engine.toml` → defaults, then env overrides.
    /// The result is not validated; call `validate()` before use.
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else {
            let p = PathBuf::from(DEFAULT_CONFIG_PATH);
            if p.exists() {
                Self::load_from(&p)?
            } else {
                Self::default()
            }
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_THRESHOLD) {
            self.threshold = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_THRESHOLD}={v} is not a number"))?;
        }
        if let Ok(v) = std::env::var(ENV_ACCELERATION) {
            self.time_acceleration = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_ACCELERATION}={v} is not a number"))?;
        }
        if let Ok(v) = std::env::var(ENV_STORE_BACKEND) {
            self.store.backend = v.trim().to_ascii_lowercase();
        }
        if let Ok(v) = std::env::var(ENV_REDIS_URL) {
            self.store.redis_url = v;
        }
        Ok(())
    }

    /// Fail-fast checks. Upper bounds keep every derived `Duration` and
    /// clock offset representable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        if !(self.time_acceleration > 0.0 && self.time_acceleration.is_finite()) {
            return Err(ConfigError::NonPositive("time_acceleration"));
        }
        if self.time_acceleration > MAX_TIME_ACCELERATION {
            return Err(ConfigError::TooLarge(
                "time_acceleration",
                MAX_TIME_ACCELERATION as i64,
                self.time_acceleration as i64,
            ));
        }
        for (name, v, max) in [
            ("velocity_window_minutes", self.velocity_window_minutes, MAX_MINUTES),
            ("window_retention_factor", self.window_retention_factor, MAX_RETENTION_FACTOR),
            ("ttl_hours", self.ttl_hours, MAX_HOURS),
            ("freshness_minutes", self.freshness_minutes, MAX_MINUTES),
            ("recency_horizon_hours", self.recency_horizon_hours, MAX_HOURS),
        ] {
            if v <= 0 {
                return Err(ConfigError::NonPositive(name));
            }
            if v > max {
                return Err(ConfigError::TooLarge(name, max, v));
            }
        }
        if self.velocity_threshold == 0 {
            return Err(ConfigError::NonPositive("velocity_threshold"));
        }
        if self.janitor_period_secs == 0 {
            return Err(ConfigError::NonPositive("janitor_period_secs"));
        }
        if self.janitor_period_secs > MAX_JANITOR_PERIOD_SECS {
            return Err(ConfigError::TooLarge(
                "janitor_period_secs",
                MAX_JANITOR_PERIOD_SECS as i64,
                self.janitor_period_secs.min(i64::MAX as u64) as i64,
            ));
        }
        if self.recency_horizon_hours * 60 <= self.freshness_minutes {
            return Err(ConfigError::NonPositive("recency_horizon_hours - freshness"));
        }
        if !(0.0..=1.0).contains(&self.default_category_score) {
            return Err(ConfigError::OutOfRange(
                "default_category_score",
                0.0,
                1.0,
                self.default_category_score,
            ));
        }
        if let Some(&bad) = self.category_scores.values().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(ConfigError::OutOfRange("category_scores", 0.0, 1.0, bad));
        }
        if self.urgency_keywords.is_empty() {
            return Err(ConfigError::Empty("urgency_keywords"));
        }
        if self.major_topics.is_empty() {
            return Err(ConfigError::Empty("major_topics"));
        }
        match self.store.backend.as_str() {
            "memory" | "redis" => {}
            other => return Err(ConfigError::UnknownBackend(other.to_string())),
        }
        Ok(())
    }

    pub fn velocity_window(&self) -> Duration {
        Duration::minutes(self.velocity_window_minutes)
    }

    /// How long the janitor keeps topic-window entries.
    pub fn window_retention(&self) -> Duration {
        Duration::minutes(self.velocity_window_minutes * self.window_retention_factor)
    }

    pub fn ttl(&self) -> Duration {
        Duration::hours(self.ttl_hours)
    }

    pub fn janitor_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.janitor_period_secs)
    }
}
