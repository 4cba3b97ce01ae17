// src/telemetry.rs
//! Tracing subscriber setup and metric descriptions.

use metrics::{describe_counter, describe_gauge};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LOG_FILTER: &str = "breaking_news_engine=info,replay=info,pipeline=info,janitor=info,store=info,warn";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// One-time metrics registration.
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("news_events_total", "Articles scored by the pipeline.");
        describe_counter!(
            "news_duplicates_total",
            "Articles skipped because their title fingerprint was already seen."
        );
        describe_counter!(
            "news_malformed_total",
            "Articles skipped for missing required fields."
        );
        describe_counter!(
            "news_breaking_total",
            "Breaking-news detections (first detections only)."
        );
        describe_counter!(
            "news_store_errors_total",
            "State store calls that failed after retries."
        );
        describe_counter!("news_evicted_total", "Expired breaking records removed by the janitor.");
        describe_gauge!(
            "news_active_breaking",
            "Active breaking records at the last janitor run."
        );
    });
}

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var(ENV_LOG_FORMAT)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

/// Shorten a title for log lines.
pub fn short_title(title: &str) -> String {
    const MAX: usize = 50;
    if title.chars().count() <= MAX {
        return title.to_string();
    }
    let mut s: String = title.chars().take(MAX).collect();
    s.push('…');
    s
}
