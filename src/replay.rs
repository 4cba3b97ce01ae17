// src/replay.rs
//! # Paced Replayer
//! Replays a chronologically sorted batch of articles against an accelerated
//! virtual clock. Article *i* is released once virtual time reaches its
//! publication timestamp, so the wall delay between two emissions is
//! `(pub[i+1] - pub[i]) / factor`, never negative and never early.
//!
//! The sequence is finite and not restartable: after the last article it
//! yields `Emission::EndOfStream` exactly once, then `None`. A triggered
//! shutdown ends the sequence with `None` and no end-of-stream signal.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::sleep_until;
use tracing::debug;

use crate::article::Article;
use crate::clock::SimulationClock;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Article(Article),
    EndOfStream,
}

pub struct PacedReplayer {
    queue: VecDeque<Article>,
    clock: Arc<SimulationClock>,
    shutdown: Shutdown,
    emitted: u64,
    finished: bool,
}

impl PacedReplayer {
    /// `articles` must already be range-filtered and sorted
    /// (see `article::prepare_stream`).
    pub fn new(articles: Vec<Article>, clock: Arc<SimulationClock>, shutdown: Shutdown) -> Self {
        Self {
            queue: articles.into(),
            clock,
            shutdown,
            emitted: 0,
            finished: false,
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn clock(&self) -> &Arc<SimulationClock> {
        &self.clock
    }

    /// Wait for the next scheduled article.
    pub async fn next(&mut self) -> Option<Emission> {
        if self.finished {
            return None;
        }
        if self.shutdown.is_triggered() {
            self.finished = true;
            return None;
        }

        let Some(article) = self.queue.pop_front() else {
            self.finished = true;
            debug!(target: "replay", emitted = self.emitted, "end of stream");
            return Some(Emission::EndOfStream);
        };

        let deadline = self.clock.wall_deadline(article.pub_timestamp);
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                self.finished = true;
                debug!(target: "replay", emitted = self.emitted, "replay cancelled");
                None
            }
            _ = sleep_until(deadline) => {
                self.emitted += 1;
                Some(Emission::Article(article))
            }
        }
    }
}
