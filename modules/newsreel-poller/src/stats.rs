//! Poller health counters, exposed through `/stats`. Counters are atomic;
//! the only lock guards the feed map and is never held across await.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;

#[derive(Default)]
pub struct FeedCounters {
    pub fetched: AtomicU64,
    pub not_modified: AtomicU64,
    pub errors: AtomicU64,
    pub circuit_breaks: AtomicU64,
    pub articles_emitted: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedCountersSnapshot {
    pub fetched: u64,
    pub not_modified: u64,
    pub errors: u64,
    pub circuit_breaks: u64,
    pub articles_emitted: u64,
}

#[derive(Default)]
pub struct PollerStats {
    feeds: RwLock<BTreeMap<String, Arc<FeedCounters>>>,
    pub articles_dropped: AtomicU64,
    pub articles_stored: AtomicU64,
    /// Normalizer queue depth gauge, updated on each dispatch.
    pub queue_depth: AtomicUsize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollerStatsSnapshot {
    pub feeds: BTreeMap<String, FeedCountersSnapshot>,
    pub articles_dropped: u64,
    pub articles_stored: u64,
    pub queue_depth: usize,
}

impl PollerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, feed_id: &str) -> Arc<FeedCounters> {
        if let Some(counters) = self.feeds.read().expect("stats lock").get(feed_id) {
            return counters.clone();
        }
        self.feeds
            .write()
            .expect("stats lock")
            .entry(feed_id.to_string())
            .or_default()
            .clone()
    }

    pub fn snapshot(&self) -> PollerStatsSnapshot {
        let feeds = self
            .feeds
            .read()
            .expect("stats lock")
            .iter()
            .map(|(id, c)| {
                (
                    id.clone(),
                    FeedCountersSnapshot {
                        fetched: c.fetched.load(Ordering::Relaxed),
                        not_modified: c.not_modified.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                        circuit_breaks: c.circuit_breaks.load(Ordering::Relaxed),
                        articles_emitted: c.articles_emitted.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        PollerStatsSnapshot {
            feeds,
            articles_dropped: self.articles_dropped.load(Ordering::Relaxed),
            articles_stored: self.articles_stored.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
        }
    }
}
