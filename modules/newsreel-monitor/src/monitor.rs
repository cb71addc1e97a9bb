//! The breaking-news monitor: a timer-driven scan over stories that
//! promotes high-velocity VERIFIED stories to BREAKING, queues exactly
//! one notification per breaking episode, demotes quiet BREAKING
//! stories, archives stale ones, and sweeps expired documents.
//!
//! Every status change goes through the same etag retry loop as the
//! clustering engine; each closure re-reads and re-checks, so a tick
//! racing an attach (or another replica) converges instead of clobbering.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use newsreel_common::{
    first_sentence, Config, NotificationPayload, NotificationQueueEntry, Story, StoryStatus,
};
use newsreel_store::{update_with_etag_retry, Notifications, Stories};

use crate::sweeper::Sweeper;

/// Scan cadence.
const MONITOR_INTERVAL: StdDuration = StdDuration::from_secs(120);

#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorStats {
    pub promoted: u32,
    pub demoted: u32,
    pub archived: u32,
    pub notifications_queued: u32,
    pub articles_swept: u32,
    pub stories_swept: u32,
}

impl std::fmt::Display for MonitorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "promoted={} demoted={} archived={} notifications={} swept_articles={} swept_stories={}",
            self.promoted,
            self.demoted,
            self.archived,
            self.notifications_queued,
            self.articles_swept,
            self.stories_swept
        )
    }
}

pub struct BreakingMonitor {
    config: Arc<Config>,
    stories: Stories,
    notifications: Notifications,
    sweeper: Sweeper,
}

impl BreakingMonitor {
    pub fn new(
        config: Arc<Config>,
        stories: Stories,
        notifications: Notifications,
        sweeper: Sweeper,
    ) -> Self {
        Self {
            config,
            stories,
            notifications,
            sweeper,
        }
    }

    /// Timer loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Breaking-news monitor starting");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(MONITOR_INTERVAL) => {}
            }
            match self.tick(Utc::now()).await {
                Ok(stats) => info!("Monitor tick complete. {stats}"),
                Err(e) => warn!(error = %e, "Monitor tick failed"),
            }
        }
        info!("Breaking-news monitor stopped");
        Ok(())
    }

    /// One full scan. Public so tests (and the CLI) can drive time.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<MonitorStats> {
        let mut stats = MonitorStats::default();
        self.promote_fast_movers(now, &mut stats).await?;
        self.ensure_episode_notifications(now, &mut stats).await?;
        // Archive before demoting: a story demoted this tick gets a full
        // cooldown-to-archive interval as VERIFIED, not an instant burial.
        self.archive_stale(now, &mut stats).await?;
        self.demote_quiet_breaking(now, &mut stats).await?;

        let swept = self.sweeper.sweep(now).await?;
        stats.articles_swept = swept.articles;
        stats.stories_swept = swept.stories;
        Ok(stats)
    }

    /// VERIFIED stories whose distinct-source velocity inside the breaking
    /// window clears the threshold become BREAKING, once per episode.
    async fn promote_fast_movers(
        &self,
        now: DateTime<Utc>,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        let window = self.config.breaking_window;
        let threshold = self.config.breaking_source_threshold;

        for story in self.stories.with_status(StoryStatus::Verified).await? {
            if story.sources_within(window, now) < threshold {
                continue;
            }

            let stories = self.stories.clone();
            let story_id = story.story_id.clone();
            let category = story.category;
            let promoted = update_with_etag_retry("monitor.promote", move || {
                let stories = stories.clone();
                let story_id = story_id.clone();
                async move {
                    let mut fresh = stories.get(&story_id, category).await?;
                    // Re-check under the fresh read: another replica may
                    // have promoted (or the story moved on) meanwhile.
                    if fresh.status != StoryStatus::Verified
                        || fresh.sources_within(window, now) < threshold
                    {
                        return Ok(None);
                    }
                    fresh.status = StoryStatus::Breaking;
                    if fresh.breaking_news_sent_at.is_none() {
                        fresh.breaking_news_sent_at = Some(now);
                    }
                    stories.replace(&mut fresh).await?;
                    Ok(Some(fresh))
                }
            })
            .await?;

            if let Some(fresh) = promoted {
                info!(
                    story_id = %fresh.story_id,
                    velocity = fresh.sources_within(window, now),
                    "Story promoted to BREAKING"
                );
                stats.promoted += 1;
                if self.queue_notification(&fresh, now).await? {
                    stats.notifications_queued += 1;
                }
            }
        }
        Ok(())
    }

    /// Repair pass: a BREAKING story with an episode stamp but no queue
    /// entry (crash between replace and enqueue) gets its notification.
    async fn ensure_episode_notifications(
        &self,
        now: DateTime<Utc>,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        for story in self.stories.with_status(StoryStatus::Breaking).await? {
            if story.breaking_news_sent_at.is_some() && self.queue_notification(&story, now).await? {
                stats.notifications_queued += 1;
            }
        }
        Ok(())
    }

    /// Enqueue at most once per (story, episode). Returns true when a new
    /// entry was written.
    async fn queue_notification(&self, story: &Story, now: DateTime<Utc>) -> Result<bool> {
        let Some(episode_start) = story.breaking_news_sent_at else {
            return Ok(false);
        };
        let episode_id = episode_start.to_rfc3339();
        if self
            .notifications
            .exists(&story.story_id, &episode_id)
            .await?
        {
            return Ok(false);
        }

        let entry = NotificationQueueEntry {
            story_id: story.story_id.clone(),
            episode_id,
            queued_at: now,
            delivered_at: None,
            payload: NotificationPayload {
                title: story.title.clone(),
                category: story.category,
                source_count: story.verification_level,
                summary_snippet: story
                    .summary
                    .as_ref()
                    .map(|s| first_sentence(&s.text).to_string()),
            },
        };
        self.notifications.enqueue(&entry).await?;
        info!(story_id = %story.story_id, "Breaking notification queued");
        Ok(true)
    }

    /// BREAKING stories quiet for the cooldown drop back to VERIFIED and
    /// their episode ends, so a later surge can notify again.
    async fn demote_quiet_breaking(
        &self,
        now: DateTime<Utc>,
        stats: &mut MonitorStats,
    ) -> Result<()> {
        let cooldown = self.config.breaking_cooldown;
        for story in self.stories.with_status(StoryStatus::Breaking).await? {
            if now - story.last_updated < cooldown {
                continue;
            }

            let stories = self.stories.clone();
            let story_id = story.story_id.clone();
            let category = story.category;
            let demoted = update_with_etag_retry("monitor.demote", move || {
                let stories = stories.clone();
                let story_id = story_id.clone();
                async move {
                    let mut fresh = stories.get(&story_id, category).await?;
                    if fresh.status != StoryStatus::Breaking || now - fresh.last_updated < cooldown
                    {
                        return Ok(false);
                    }
                    fresh.status = StoryStatus::Verified;
                    fresh.breaking_news_sent_at = None;
                    stories.replace(&mut fresh).await?;
                    Ok(true)
                }
            })
            .await?;

            if demoted {
                info!(story_id = %story.story_id, "Breaking story demoted to VERIFIED");
                stats.demoted += 1;
            }
        }
        Ok(())
    }

    /// VERIFIED stories untouched for the archive age are retired.
    async fn archive_stale(&self, now: DateTime<Utc>, stats: &mut MonitorStats) -> Result<()> {
        let age = self.config.archive_age;
        for story in self.stories.with_status(StoryStatus::Verified).await? {
            if now - story.last_updated < age {
                continue;
            }

            let stories = self.stories.clone();
            let story_id = story.story_id.clone();
            let category = story.category;
            let archived = update_with_etag_retry("monitor.archive", move || {
                let stories = stories.clone();
                let story_id = story_id.clone();
                async move {
                    let mut fresh = stories.get(&story_id, category).await?;
                    if fresh.status != StoryStatus::Verified || now - fresh.last_updated < age {
                        return Ok(false);
                    }
                    fresh.status = StoryStatus::Archived;
                    stories.replace(&mut fresh).await?;
                    Ok(true)
                }
            })
            .await?;

            if archived {
                info!(story_id = %story.story_id, "Story archived");
                stats.archived += 1;
            }
        }
        Ok(())
    }
}
