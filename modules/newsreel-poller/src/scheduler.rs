//! The polling scheduler: one loop selects due feeds round-robin and
//! dispatches them to a bounded fetch pool, staggered so outbound load is
//! flat across the minute instead of bursting each cycle. A slow feed
//! never blocks the loop — fetches run in spawned tasks behind a
//! semaphore.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use newsreel_common::{Config, FeedDescriptor, FeedPollState};
use newsreel_store::{Articles, FeedStates};

use crate::circuit;
use crate::fetch::{FeedFetcher, FetchOutcome, RawEntry};
use crate::normalize::{entry_article_id, Normalizer};
use crate::stats::PollerStats;

/// Default cycle length for feeds without a poll-interval hint.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
/// Bounded hand-off to the normalizer worker. When full, dispatch slows
/// instead of dropping entries.
pub const NORMALIZER_QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
struct PollContext {
    config: Arc<Config>,
    fetcher: Arc<FeedFetcher>,
    feed_states: FeedStates,
    articles: Articles,
    stats: Arc<PollerStats>,
    tx: mpsc::Sender<(RawEntry, FeedDescriptor)>,
}

pub struct Poller {
    config: Arc<Config>,
    feeds: Vec<FeedDescriptor>,
    fetcher: Arc<FeedFetcher>,
    feed_states: FeedStates,
    articles: Articles,
    normalizer: Arc<Normalizer>,
    stats: Arc<PollerStats>,
}

impl Poller {
    pub fn new(
        config: Arc<Config>,
        feeds: Vec<FeedDescriptor>,
        feed_states: FeedStates,
        articles: Articles,
        stats: Arc<PollerStats>,
    ) -> Result<Self> {
        let fetcher = Arc::new(FeedFetcher::new(config.feed_timeout)?);
        let normalizer = Arc::new(Normalizer::new(&[])?);
        Ok(Self {
            config,
            feeds,
            fetcher,
            feed_states,
            articles,
            normalizer,
            stats,
        })
    }

    /// Run until the shutdown signal flips. Feeds are re-dispatched on
    /// their individual cadence; at most `feed_poll_concurrency` starts
    /// land in any one-second window.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(feeds = self.feeds.len(), "Feed poller starting");

        let (tx, rx) = mpsc::channel::<(RawEntry, FeedDescriptor)>(NORMALIZER_QUEUE_CAPACITY);
        let worker = tokio::spawn(normalize_worker(
            rx,
            self.normalizer.clone(),
            self.articles.clone(),
            self.stats.clone(),
        ));

        let concurrency = self.config.feed_poll_concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let stagger = StdDuration::from_millis(1000 / concurrency as u64);

        let ctx = PollContext {
            config: self.config.clone(),
            fetcher: self.fetcher.clone(),
            feed_states: self.feed_states.clone(),
            articles: self.articles.clone(),
            stats: self.stats.clone(),
            tx: tx.clone(),
        };

        let mut next_due: HashMap<String, DateTime<Utc>> = self
            .feeds
            .iter()
            .map(|f| (f.feed_id.clone(), Utc::now()))
            .collect();

        'outer: loop {
            let now = Utc::now();
            let due: Vec<FeedDescriptor> = self
                .feeds
                .iter()
                .filter(|f| next_due.get(&f.feed_id).is_none_or(|t| *t <= now))
                .cloned()
                .collect();

            for feed in due {
                if sleep_or_shutdown(stagger, &mut shutdown).await {
                    break 'outer;
                }
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .expect("poller semaphore closed");
                next_due.insert(feed.feed_id.clone(), Utc::now() + poll_interval(&feed));

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    poll_feed(&ctx, &feed).await;
                    drop(permit);
                });
            }

            if sleep_or_shutdown(StdDuration::from_secs(1), &mut shutdown).await {
                break;
            }
        }

        // Let in-flight fetches land, then close the normalizer queue.
        let _all = semaphore.acquire_many(concurrency as u32).await;
        drop(ctx);
        drop(tx);
        if let Err(e) = worker.await {
            error!(error = %e, "Normalizer worker panicked");
        }
        info!("Feed poller stopped");
        Ok(())
    }
}

fn poll_interval(feed: &FeedDescriptor) -> chrono::Duration {
    chrono::Duration::seconds(
        feed.poll_interval_hint_seconds
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS) as i64,
    )
}

/// Sleep, returning early (true) if shutdown fires.
async fn sleep_or_shutdown(duration: StdDuration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

/// One feed poll: circuit check, conditional fetch, state update, and
/// hand-off of unseen entries.
async fn poll_feed(ctx: &PollContext, feed: &FeedDescriptor) {
    let now = Utc::now();
    let mut state = match ctx.feed_states.get(&feed.feed_id).await {
        Ok(Some(state)) => state,
        Ok(None) => FeedPollState::new(feed),
        Err(e) => {
            warn!(feed_id = %feed.feed_id, error = %e, "Failed to load poll state");
            return;
        }
    };

    if state.circuit_is_open(now) {
        debug!(feed_id = %feed.feed_id, until = ?state.circuit_open_until, "Circuit open, skipping");
        return;
    }

    let counters = ctx.stats.feed(&feed.feed_id);

    match ctx.fetcher.fetch(feed, &state).await {
        FetchOutcome::NotModified => {
            counters.not_modified.fetch_add(1, Ordering::Relaxed);
            state.last_polled_at = Some(now);
        }
        FetchOutcome::Fetched {
            entries,
            etag,
            last_modified,
        } => {
            counters.fetched.fetch_add(1, Ordering::Relaxed);
            state.last_etag = etag;
            state.last_modified = last_modified;
            circuit::record_success(&mut state, now);
            dispatch_entries(ctx, feed, entries, &counters).await;
        }
        FetchOutcome::ClientError { status } => {
            warn!(feed_id = %feed.feed_id, status, "Feed client error");
            record_poll_failure(ctx, &mut state, &counters, now);
        }
        FetchOutcome::ServerError { status } => {
            warn!(feed_id = %feed.feed_id, status, "Feed server error");
            record_poll_failure(ctx, &mut state, &counters, now);
        }
        FetchOutcome::NetworkError { message } => {
            warn!(feed_id = %feed.feed_id, error = %message, "Feed network error");
            record_poll_failure(ctx, &mut state, &counters, now);
        }
    }

    if let Err(e) = ctx.feed_states.put(&state).await {
        warn!(feed_id = %feed.feed_id, error = %e, "Failed to persist poll state");
    }
}

fn record_poll_failure(
    ctx: &PollContext,
    state: &mut FeedPollState,
    counters: &crate::stats::FeedCounters,
    now: DateTime<Utc>,
) {
    counters.errors.fetch_add(1, Ordering::Relaxed);
    if circuit::record_failure(
        state,
        ctx.config.circuit_breaker_threshold,
        ctx.config.circuit_breaker_cooldown,
        now,
    ) {
        counters.circuit_breaks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Forward entries the store has not seen. A full queue makes `send`
/// wait, which is the back-pressure that slows the poller down.
async fn dispatch_entries(
    ctx: &PollContext,
    feed: &FeedDescriptor,
    entries: Vec<RawEntry>,
    counters: &crate::stats::FeedCounters,
) {
    for entry in entries {
        let article_id = entry_article_id(&entry, feed);
        match ctx.articles.exists_anywhere(&article_id).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                warn!(feed_id = %feed.feed_id, error = %e, "Article existence check failed");
                continue;
            }
        }
        if ctx.tx.send((entry, feed.clone())).await.is_err() {
            return; // worker gone, shutting down
        }
        counters.articles_emitted.fetch_add(1, Ordering::Relaxed);
        ctx.stats.queue_depth.store(
            NORMALIZER_QUEUE_CAPACITY - ctx.tx.capacity(),
            Ordering::Relaxed,
        );
    }
}

/// The normalizer worker: the single consumer of the entry queue.
async fn normalize_worker(
    mut rx: mpsc::Receiver<(RawEntry, FeedDescriptor)>,
    normalizer: Arc<Normalizer>,
    articles: Articles,
    stats: Arc<PollerStats>,
) {
    while let Some((entry, feed)) = rx.recv().await {
        let now = Utc::now();
        match normalizer.normalize(&entry, &feed, now) {
            Some(article) => {
                if let Err(e) = articles.upsert(&article).await {
                    error!(article_id = %article.article_id, error = %e, "Failed to store article");
                } else {
                    stats.articles_stored.fetch_add(1, Ordering::Relaxed);
                }
            }
            None => {
                stats.articles_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    info!("Normalizer worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsreel_store::{DocumentStore, MemoryStore};

    fn test_ctx(tx: mpsc::Sender<(RawEntry, FeedDescriptor)>) -> PollContext {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::from_env().expect("default config"));
        PollContext {
            fetcher: Arc::new(FeedFetcher::new(config.feed_timeout).expect("fetcher")),
            config,
            feed_states: FeedStates::new(store.clone()),
            articles: Articles::new(store),
            stats: Arc::new(PollerStats::new()),
            tx,
        }
    }

    fn entry(n: u32) -> RawEntry {
        RawEntry {
            title: Some(format!("Entry number {n}")),
            summary: None,
            content: None,
            url: format!("https://example.com/{n}"),
            image_url: None,
            published: None,
        }
    }

    fn feed() -> FeedDescriptor {
        FeedDescriptor {
            feed_id: "test-feed".to_string(),
            feed_url: "https://example.com/rss".to_string(),
            source_id: "example".to_string(),
            category_hint: None,
            poll_interval_hint_seconds: None,
        }
    }

    #[tokio::test]
    async fn full_queue_blocks_dispatch_instead_of_dropping() {
        let (tx, mut rx) = mpsc::channel(1);
        let ctx = test_ctx(tx);
        let counters = ctx.stats.feed("test-feed");

        let dispatch = tokio::spawn({
            let ctx = ctx.clone();
            let feed = feed();
            let counters = counters.clone();
            async move {
                dispatch_entries(&ctx, &feed, vec![entry(1), entry(2)], &counters).await;
            }
        });

        // Capacity one: the first entry fills the queue, the second send
        // must wait rather than drop.
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(
            !dispatch.is_finished(),
            "dispatch must block on the full queue"
        );

        let first = rx.recv().await.expect("first entry");
        assert_eq!(first.0.url, "https://example.com/1");
        dispatch.await.expect("dispatch completes after drain");

        let second = rx.recv().await.expect("second entry");
        assert_eq!(second.0.url, "https://example.com/2");
        assert_eq!(counters.articles_emitted.load(Ordering::Relaxed), 2);
    }
}
