// src/config/defaults.rs
//! Built-in vocabularies. Used when the config file omits a list.

use std::collections::BTreeMap;

pub(crate) fn urgency_keywords() -> Vec<String> {
    [
        // high urgency
        "breaking", "just in", "urgent", "alert", "emergency",
        // war/conflict
        "war", "invasion", "attack", "killed", "explosion", "missile", "bombing", "troops",
        "military", "airstrike", "casualties", "ceasefire", "strikes", "bomb", "threats",
        "shooting",
        // crisis
        "crisis", "catastrophe", "disaster", "evacuate", "flee", "collapse", "crash", "dies",
        "death toll", "dead",
        // political/legal
        "sanctions", "resign", "impeach", "arrest", "protest", "coup", "election", "vote",
        "verdict", "sentenced", "convicted", "charged", "warrant", "investigation",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(crate) fn high_urgency_keywords() -> Vec<String> {
    ["breaking", "just in", "urgent", "killed", "attack", "war"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn category_scores() -> BTreeMap<String, f64> {
    [
        ("world", 0.90),
        ("europe", 0.85),
        ("politics", 0.85),
        ("uk", 0.80),
        ("us", 0.80),
        ("business", 0.65),
        ("health", 0.60),
        ("science", 0.50),
        ("technology", 0.50),
        ("education", 0.45),
        ("newsbeat", 0.40),
        ("entertainment", 0.30),
        ("sport", 0.30),
        ("sports", 0.30),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), *v))
    .collect()
}

/// Priority order matters: the first match wins.
pub(crate) fn major_topics() -> Vec<String> {
    [
        "ukraine", "russia", "putin", "zelensky", "kyiv", "moscow",
        "covid", "coronavirus", "pandemic",
        "china", "taiwan", "beijing",
        "israel", "gaza", "palestine",
        "climate", "earthquake", "hurricane",
        "trump", "biden", "election",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub(crate) fn stopwords() -> Vec<String> {
    [
        "about", "after", "again", "against", "also", "been", "before", "being", "could",
        "does", "from", "have", "here", "into", "just", "more", "most", "over", "says",
        "said", "should", "some", "than", "that", "their", "them", "then", "there", "these",
        "they", "this", "those", "under", "very", "what", "when", "where", "which", "while",
        "will", "with", "would", "your",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
