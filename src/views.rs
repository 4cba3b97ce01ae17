// src/views.rs
//! Read-only query surface: the shapes handed to whatever serves the data
//! (HTTP, CLI output). Every query reads the store and stats at the current
//! virtual time and never mutates anything.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::stats::{ProcessingStatus, StatsTracker};
use crate::store::{topic_counts, BreakingNewsRecord, ResilientStore, TopicCount};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakingNewsView {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub category: Option<String>,
    pub total_score: f64,
    pub detected_keywords: Vec<String>,
    pub topic: String,
    pub pub_timestamp: DateTime<Utc>,
    pub detected_timestamp: DateTime<Utc>,
    pub time_ago: String,
}

impl BreakingNewsView {
    pub fn from_record(r: &BreakingNewsRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: r.article.id.clone(),
            title: r.article.title.clone(),
            description: r.article.description.clone(),
            link: r.article.link.clone(),
            category: r.article.category.clone(),
            total_score: round3(r.scores.total),
            detected_keywords: r.detected_keywords.clone(),
            topic: r.topic.clone(),
            pub_timestamp: r.article.pub_timestamp,
            detected_timestamp: r.detected_at,
            time_ago: format_time_ago(r.detected_at, now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakingNewsList {
    pub items: Vec<BreakingNewsView>,
    pub count: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicsView {
    pub topics: Vec<TopicCount>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub total_processed: u64,
    pub breaking_news_count: usize,
    pub active_topics: usize,
    pub processing_rate: f64,
    pub processing_status: ProcessingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_rate: Option<f64>,
    pub duplicates_skipped: u64,
    pub malformed_skipped: u64,
    pub store_errors: u64,
    pub simulation_time: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub degraded: bool,
}

#[derive(Clone)]
pub struct QueryService {
    store: Arc<ResilientStore>,
    stats: Arc<StatsTracker>,
    clock: Arc<dyn Clock>,
}

impl QueryService {
    pub fn new(store: Arc<ResilientStore>, stats: Arc<StatsTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            stats,
            clock,
        }
    }

    /// Active breaking news, newest detection first.
    pub async fn breaking_news(
        &self,
        topic: Option<&str>,
        limit: Option<usize>,
    ) -> Result<BreakingNewsList, StoreError> {
        let now = self.clock.now();
        let snap = self.store.active_snapshot(now, topic).await?;
        let items: Vec<BreakingNewsView> = snap
            .value
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| BreakingNewsView::from_record(r, now))
            .collect();
        Ok(BreakingNewsList {
            count: items.len(),
            items,
            degraded: snap.degraded,
        })
    }

    pub async fn topics(&self) -> Result<TopicsView, StoreError> {
        let now = self.clock.now();
        let snap = self.store.active_snapshot(now, None).await?;
        Ok(TopicsView {
            topics: topic_counts(&snap.value),
            degraded: snap.degraded,
        })
    }

    pub async fn stats(&self) -> Result<StatsView, StoreError> {
        let now = self.clock.now();
        let snap = self.store.active_snapshot(now, None).await?;
        let agg = self.stats.snapshot(now);
        Ok(StatsView {
            total_processed: agg.total_processed,
            breaking_news_count: snap.value.len(),
            active_topics: topic_counts(&snap.value).len(),
            processing_rate: round2(agg.processing_rate),
            processing_status: agg.processing_status,
            final_rate: agg.final_rate.map(round2),
            duplicates_skipped: agg.duplicates_skipped,
            malformed_skipped: agg.malformed_skipped,
            store_errors: agg.store_errors,
            simulation_time: now,
            uptime_seconds: agg.uptime_seconds,
            degraded: snap.degraded,
        })
    }
}

/// "42s ago", "5m ago", "3h ago", "2d ago". Future instants read "0s ago".
pub fn format_time_ago(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{s}s ago"),
        s if s < 3_600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3_600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
