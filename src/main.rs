//! Breaking-news replay engine — binary entrypoint.
//! Loads config and the article file, replays the stream against an
//! accelerated clock, and prints the final state as JSON.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use breaking_news_engine::article::{load_articles, prepare_stream, TimeRange};
use breaking_news_engine::clock::{Clock, SimulationClock};
use breaking_news_engine::config::EngineConfig;
use breaking_news_engine::janitor::Janitor;
use breaking_news_engine::pipeline::Pipeline;
use breaking_news_engine::replay::PacedReplayer;
use breaking_news_engine::shutdown;
use breaking_news_engine::stats::StatsTracker;
use breaking_news_engine::store::{RetryPolicy, StoreBackend};
use breaking_news_engine::telemetry;
use breaking_news_engine::views::QueryService;

const ENV_ARTICLES_PATH: &str = "ARTICLES_PATH";
const DEFAULT_ARTICLES_PATH: &str = "data/articles.json";
const REPLAY_DAYS: i64 = 7;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();
    telemetry::ensure_metrics_described();

    // --- Config: fail fast before touching any data ---
    let cfg = EngineConfig::load_default()?;
    cfg.validate().context("invalid engine configuration")?;
    let backend = StoreBackend::from_settings(&cfg.store)?;

    // --- Input ---
    let path = std::env::var(ENV_ARTICLES_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_ARTICLES_PATH));
    let articles = load_articles(&path)?;
    let loaded = articles.len();
    let range = TimeRange::trailing_days(&articles, REPLAY_DAYS);
    let stream = prepare_stream(articles, range);
    if let Some(r) = range {
        info!(loaded, in_range = stream.len(), start = %r.start, end = %r.end, "articles loaded");
    } else {
        warn!(path = %path.display(), "no articles to replay");
    }
    let virtual_start = stream.first().map(|a| a.pub_timestamp).unwrap_or_else(Utc::now);

    // --- Wiring ---
    let store = backend
        .build(RetryPolicy::from_settings(&cfg.store.retry))
        .await
        .context("building state store")?;
    let clock = Arc::new(SimulationClock::starting_at(virtual_start, cfg.time_acceleration));
    let stats = Arc::new(StatsTracker::new(virtual_start));
    let (handle, listener) = shutdown::channel();
    let handle = Arc::new(handle);

    let janitor = Janitor::new(
        store.clone(),
        clock.clone(),
        cfg.janitor_period(),
        cfg.window_retention(),
    )
    .spawn(handle.subscribe());

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received; shutting down");
                handle.trigger();
            }
        });
    }

    let pipeline = Pipeline::new(&cfg, store.clone(), stats.clone(), clock.clone())?;
    let mut replayer = PacedReplayer::new(stream, clock.clone(), listener);
    let summary = pipeline.run(&mut replayer).await;

    // --- Final state ---
    let query = QueryService::new(store, stats, clock.clone());
    let report = serde_json::json!({
        "completed": summary.completed,
        "stats": query.stats().await?,
        "topics": query.topics().await?,
        "breaking_news": query.breaking_news(None, None).await?,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    handle.trigger();
    if let Err(e) = janitor.await {
        warn!(error = %e, "janitor task ended abnormally");
    }
    info!(virtual_now = %clock.now(), "bye");
    Ok(())
}
