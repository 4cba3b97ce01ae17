// src/error.rs
//! Error taxonomy for the engine.
//!
//! Only `ConfigError` is fatal, and only at startup. Article and store
//! errors are handled inside the pipeline and surface as counters.

use thiserror::Error;

/// Invalid configuration detected before any event is processed.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("scoring weights must sum to 1.0 (got {0:.6})")]
    WeightSum(f64),
    #[error("scoring weight `{0}` must be non-negative")]
    NegativeWeight(&'static str),
    #[error("score threshold must be within [0, 1] (got {0})")]
    Threshold(f64),
    #[error("`{0}` must be greater than zero")]
    NonPositive(&'static str),
    #[error("`{0}` must be at most {1} (got {2})")]
    TooLarge(&'static str, i64, i64),
    #[error("`{0}` must be within [{1}, {2}] (got {3})")]
    OutOfRange(&'static str, f64, f64, f64),
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
    #[error("urgency keyword `{0}` does not compile: {1}")]
    Keyword(String, String),
    #[error("unknown store backend `{0}` (expected `memory` or `redis`)")]
    UnknownBackend(String),
}

/// A single malformed article. Skipped and counted, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArticleError {
    #[error("article is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("article title normalizes to an empty string")]
    EmptyFingerprint,
}

/// Storage backend failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}
