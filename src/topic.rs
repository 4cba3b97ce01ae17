// src/topic.rs
//! Topic labelling for velocity tracking.
//!
//! Order of resolution:
//! 1. first major topic (priority order) found as a case-insensitive substring,
//! 2. first significant word of the title (long enough, not a stopword),
//! 3. the literal `"general"`.
//!
//! Total and deterministic: equal titles always give equal topics.

use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;

use crate::config::EngineConfig;

pub const FALLBACK_TOPIC: &str = "general";

#[derive(Debug, Clone)]
pub struct TopicExtractor {
    major_topics: Vec<String>,
    stopwords: HashSet<String>,
    min_word_len: usize,
}

impl TopicExtractor {
    pub fn new(major_topics: Vec<String>, stopwords: Vec<String>, min_word_len: usize) -> Self {
        Self {
            major_topics: major_topics
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            stopwords: stopwords.into_iter().map(|s| s.to_lowercase()).collect(),
            min_word_len,
        }
    }

    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            cfg.major_topics.clone(),
            cfg.stopwords.clone(),
            cfg.min_topic_word_len,
        )
    }

    pub fn extract(&self, title: &str) -> String {
        let lower = title.to_lowercase();

        if let Some(t) = self.major_topics.iter().find(|t| lower.contains(t.as_str())) {
            return t.clone();
        }

        static RE_WORD: OnceCell<Regex> = OnceCell::new();
        let re = RE_WORD.get_or_init(|| Regex::new(r"(?u)\b[[:alpha:]]+\b").expect("word regex"));
        re.find_iter(&lower)
            .map(|m| m.as_str())
            .find(|w| w.chars().count() >= self.min_word_len && !self.stopwords.contains(*w))
            .map(str::to_string)
            .unwrap_or_else(|| FALLBACK_TOPIC.to_string())
    }
}
