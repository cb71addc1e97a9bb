//! Retention sweeper. The backing store may have no native TTL; this
//! keeps the retention invariants regardless: articles disappear 30 days
//! after publication, stories 90 days after their last update.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use newsreel_common::Config;
use newsreel_store::{Articles, Stories};

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub articles: u32,
    pub stories: u32,
}

pub struct Sweeper {
    config: Arc<Config>,
    articles: Articles,
    stories: Stories,
}

impl Sweeper {
    pub fn new(config: Arc<Config>, articles: Articles, stories: Stories) -> Self {
        Self {
            config,
            articles,
            stories,
        }
    }

    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let mut stats = SweepStats::default();

        let article_cutoff = now - self.config.article_ttl;
        for article in self.articles.published_before(article_cutoff).await? {
            debug!(article_id = %article.article_id, "Sweeping expired article");
            self.articles.delete(&article).await?;
            stats.articles += 1;
        }

        let story_cutoff = now - self.config.story_retention;
        for story in self.stories.updated_before(story_cutoff).await? {
            debug!(story_id = %story.story_id, "Sweeping expired story");
            self.stories.delete(&story).await?;
            stats.stories += 1;
        }

        if stats.articles > 0 || stats.stories > 0 {
            info!(
                articles = stats.articles,
                stories = stats.stories,
                "Retention sweep complete"
            );
        }
        Ok(stats)
    }
}
