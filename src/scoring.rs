// src/scoring.rs
//! # Scoring Engine
//! Pure, testable mapping `(article, velocity count, virtual now)` → score.
//! No I/O and no hidden state; every sub-score is total over its input and
//! lands in [0, 1].
//!
//! total = w_keyword·keyword + w_velocity·velocity + w_category·category + w_recency·recency

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::article::Article;
use crate::config::{EngineConfig, ScoringWeights};
use crate::error::ConfigError;
use crate::velocity::velocity_score;

/// Four sub-scores plus their weighted sum.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub keyword: f64,
    pub velocity: f64,
    pub category: f64,
    pub recency: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    /// Clamp each signal to [0, 1] and combine with `weights`.
    pub fn combine(
        weights: &ScoringWeights,
        keyword: f64,
        velocity: f64,
        category: f64,
        recency: f64,
    ) -> Self {
        let (keyword, velocity, category, recency) =
            (clamp01(keyword), clamp01(velocity), clamp01(category), clamp01(recency));
        let total = weights.keyword * keyword
            + weights.velocity * velocity
            + weights.category * category
            + weights.recency * recency;
        Self {
            keyword,
            velocity,
            category,
            recency,
            total,
        }
    }
}

/// Everything the pipeline needs from one scoring call.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringOutcome {
    pub breakdown: ScoreBreakdown,
    pub detected_keywords: Vec<String>,
    pub topic: String,
    pub is_breaking: bool,
}

#[derive(Debug)]
struct KeywordMatcher {
    keyword: String,
    re: Regex,
}

#[derive(Debug)]
pub struct ScoringEngine {
    weights: ScoringWeights,
    threshold: f64,
    keywords: Vec<KeywordMatcher>,
    high_urgency: HashSet<String>,
    category_scores: BTreeMap<String, f64>,
    default_category_score: f64,
    velocity_threshold: usize,
    freshness: Duration,
    horizon: Duration,
}

impl ScoringEngine {
    /// Expects a validated config.
    pub fn from_config(cfg: &EngineConfig) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut keywords = Vec::with_capacity(cfg.urgency_keywords.len());
        for k in &cfg.urgency_keywords {
            let k = k.trim().to_lowercase();
            if k.is_empty() || !seen.insert(k.clone()) {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", regex::escape(&k).replace(' ', r"\s+"));
            let re = Regex::new(&pattern).map_err(|e| ConfigError::Keyword(k.clone(), e.to_string()))?;
            keywords.push(KeywordMatcher { keyword: k, re });
        }

        Ok(Self {
            weights: cfg.weights,
            threshold: cfg.threshold,
            keywords,
            high_urgency: cfg
                .high_urgency_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            category_scores: cfg
                .category_scores
                .iter()
                .map(|(k, v)| (k.trim().to_lowercase(), clamp01(*v)))
                .collect(),
            default_category_score: clamp01(cfg.default_category_score),
            velocity_threshold: cfg.velocity_threshold,
            freshness: Duration::minutes(cfg.freshness_minutes),
            horizon: Duration::hours(cfg.recency_horizon_hours),
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(
        &self,
        article: &Article,
        topic: &str,
        velocity_count: usize,
        now: DateTime<Utc>,
    ) -> ScoringOutcome {
        let (keyword, detected_keywords) = self.keyword_score(&article.title);
        let velocity = velocity_score(velocity_count, self.velocity_threshold);
        let category = self.category_score(article.category.as_deref());
        let recency = self.recency_score(article.pub_timestamp, now);

        let breakdown = ScoreBreakdown::combine(&self.weights, keyword, velocity, category, recency);
        ScoringOutcome {
            is_breaking: self.is_breaking(breakdown.total),
            breakdown,
            detected_keywords,
            topic: topic.to_string(),
        }
    }

    pub fn is_breaking(&self, total: f64) -> bool {
        total >= self.threshold
    }

    /// 0.3 per distinct keyword, +0.3 if any is high-urgency, capped at 1.0.
    /// Keywords are reported in configured order.
    pub fn keyword_score(&self, text: &str) -> (f64, Vec<String>) {
        let detected: Vec<String> = self
            .keywords
            .iter()
            .filter(|m| m.re.is_match(text))
            .map(|m| m.keyword.clone())
            .collect();
        if detected.is_empty() {
            return (0.0, detected);
        }

        let mut score = (detected.len() as f64 * 0.3).min(1.0);
        if detected.iter().any(|k| self.high_urgency.contains(k)) {
            score = (score + 0.3).min(1.0);
        }
        (score, detected)
    }

    pub fn category_score(&self, category: Option<&str>) -> f64 {
        category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .and_then(|c| self.category_scores.get(&c).copied())
            .unwrap_or(self.default_category_score)
    }

    /// 1.0 up to the freshness age, then linear decay to 0.0 at the horizon.
    /// Future-dated articles count as fresh.
    pub fn recency_score(&self, published: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age = now - published;
        if age <= self.freshness {
            return 1.0;
        }
        let span = (self.horizon - self.freshness).num_milliseconds() as f64;
        let over = (age - self.freshness).num_milliseconds() as f64;
        clamp01(1.0 - over / span)
    }
}

fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}
