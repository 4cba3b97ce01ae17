// src/article.rs
//! Article model consumed by the engine, plus the content fingerprint used
//! for exact-duplicate detection.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

use crate::error::ArticleError;

/// One news event, already parsed by the loading side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub category: Option<String>,
    pub pub_timestamp: DateTime<Utc>,
    /// Full source text, carried through untouched.
    #[serde(default)]
    pub raw_text: String,
}

impl Article {
    /// Required: non-blank id and title.
    pub fn validate(&self) -> Result<(), ArticleError> {
        if self.id.trim().is_empty() {
            return Err(ArticleError::MissingField("id"));
        }
        if self.title.trim().is_empty() {
            return Err(ArticleError::MissingField("title"));
        }
        Ok(())
    }

    pub fn fingerprint(&self) -> Result<ContentFingerprint, ArticleError> {
        ContentFingerprint::of_title(&self.title)
    }
}

/// SHA-256 of the normalized title (lower-cased, trimmed, whitespace collapsed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn of_title(title: &str) -> Result<Self, ArticleError> {
        let norm = normalize_title(title);
        if norm.is_empty() {
            return Err(ArticleError::EmptyFingerprint);
        }
        let mut hasher = Sha256::new();
        hasher.update(norm.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Inclusive publication-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// The `days` before (and including) the newest article.
    pub fn trailing_days(articles: &[Article], days: i64) -> Option<Self> {
        let end = articles.iter().map(|a| a.pub_timestamp).max()?;
        Some(Self::new(end - Duration::days(days), end))
    }
}

/// Drop out-of-range articles and sort the rest chronologically.
/// The sort is stable, so same-timestamp articles keep their input order.
pub fn prepare_stream(mut articles: Vec<Article>, range: Option<TimeRange>) -> Vec<Article> {
    if let Some(r) = range {
        articles.retain(|a| r.contains(a.pub_timestamp));
    }
    articles.sort_by_key(|a| a.pub_timestamp);
    articles
}

/// Section slug from a news URL, e.g. `.../news/world-europe-60638042` → `world`.
pub fn category_from_link(link: &str) -> Option<String> {
    static RE_SECTION: OnceCell<Regex> = OnceCell::new();
    let re = RE_SECTION.get_or_init(|| {
        Regex::new(r"/(?:news|sport)/([a-z]+(?:-[a-z]+)*)").expect("valid section regex")
    });
    let lower = link.to_lowercase();
    let slug = re.captures(&lower)?.get(1)?.as_str();
    slug.split('-').next().map(str::to_string)
}

/// Read a JSON array of articles. Missing categories are inferred from the
/// link when possible.
pub fn load_articles(path: &Path) -> Result<Vec<Article>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading articles from {}", path.display()))?;
    let mut articles: Vec<Article> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for a in &mut articles {
        if a.category.as_deref().map_or(true, |c| c.trim().is_empty()) {
            a.category = category_from_link(&a.link);
        }
    }
    Ok(articles)
}
