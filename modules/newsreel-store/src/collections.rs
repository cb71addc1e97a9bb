//! Typed collection handles. Serialization to and from `serde_json::Value`
//! happens here, so the rest of the pipeline only sees domain structs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use newsreel_common::{
    Article, Category, CostLogEntry, FeedPollState, NewsreelError, NotificationQueueEntry, Story,
    StoryStatus, StorySummary,
};

use crate::names;
use crate::store::{DocumentStore, QueryFilter};

fn to_value<T: serde::Serialize>(doc: &T) -> Result<Value, NewsreelError> {
    serde_json::to_value(doc).map_err(|e| NewsreelError::Validation(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, NewsreelError> {
    serde_json::from_value(value).map_err(|e| NewsreelError::Validation(e.to_string()))
}

// --- Articles ---

#[derive(Clone)]
pub struct Articles {
    store: Arc<dyn DocumentStore>,
}

impl Articles {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Cross-partition existence check. The poller's dedup gate cannot
    /// assume it knows the stored day-bucket for undated entries.
    pub async fn exists_anywhere(&self, article_id: &str) -> Result<bool, NewsreelError> {
        let docs = self
            .store
            .query(
                names::ARTICLES,
                QueryFilter::default()
                    .field_equals("article_id", article_id)
                    .with_limit(1),
            )
            .await?;
        Ok(!docs.is_empty())
    }

    pub async fn get_anywhere(&self, article_id: &str) -> Result<Option<Article>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::ARTICLES,
                QueryFilter::default()
                    .field_equals("article_id", article_id)
                    .with_limit(1),
            )
            .await?;
        docs.into_iter().next().map(from_value).transpose()
    }

    pub async fn upsert(&self, article: &Article) -> Result<(), NewsreelError> {
        self.store
            .upsert(
                names::ARTICLES,
                &article.article_id,
                to_value(article)?,
                &article.partition_key(),
            )
            .await?;
        Ok(())
    }

    /// Clustered articles sharing a fingerprint. Cross-partition; the
    /// caller narrows by story recency.
    pub async fn clustered_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Vec<Article>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::ARTICLES,
                QueryFilter::default()
                    .field_equals("fingerprint", fingerprint)
                    .field_exists("cluster_id"),
            )
            .await?;
        docs.into_iter().map(from_value).collect()
    }

    pub async fn published_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Article>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::ARTICLES,
                QueryFilter::default().older_than("published_at", cutoff),
            )
            .await?;
        docs.into_iter().map(from_value).collect()
    }

    pub async fn delete(&self, article: &Article) -> Result<(), NewsreelError> {
        self.store
            .delete(names::ARTICLES, &article.article_id, &article.partition_key())
            .await
    }
}

// --- Stories ---

#[derive(Clone)]
pub struct Stories {
    store: Arc<dyn DocumentStore>,
}

impl Stories {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, story_id: &str, category: Category) -> Result<Story, NewsreelError> {
        let (doc, etag) = self
            .store
            .read(names::STORIES, story_id, &category.to_string())
            .await?;
        let mut story: Story = from_value(doc)?;
        story.etag = etag;
        Ok(story)
    }

    /// First write of a new story. Fills in the server-issued etag.
    pub async fn create(&self, story: &mut Story) -> Result<(), NewsreelError> {
        story
            .validate()
            .map_err(NewsreelError::Validation)?;
        let etag = self
            .store
            .upsert(
                names::STORIES,
                &story.story_id.clone(),
                to_value(story)?,
                &story.partition_key(),
            )
            .await?;
        story.etag = etag;
        Ok(())
    }

    /// Etag-guarded replace. On success the handle's etag advances; on
    /// `Conflict` the caller re-reads and re-applies.
    pub async fn replace(&self, story: &mut Story) -> Result<(), NewsreelError> {
        story
            .validate()
            .map_err(NewsreelError::Validation)?;
        let if_match = story.etag.clone();
        let etag = self
            .store
            .replace(
                names::STORIES,
                &story.story_id.clone(),
                to_value(story)?,
                &story.partition_key(),
                &if_match,
            )
            .await?;
        story.etag = etag;
        Ok(())
    }

    /// Stories in a category touched since `since`, newest first, bounded.
    pub async fn recent_in_category(
        &self,
        category: Category,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Story>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::STORIES,
                QueryFilter::default()
                    .field_equals("category", category.to_string())
                    .updated_since("last_updated", since),
            )
            .await?;
        let mut stories: Vec<Story> = docs
            .into_iter()
            .map(from_value)
            .collect::<Result<_, _>>()?;
        // The store gives no ordering guarantee; sort here.
        stories.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        stories.truncate(limit);
        Ok(stories)
    }

    pub async fn with_status(&self, status: StoryStatus) -> Result<Vec<Story>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::STORIES,
                QueryFilter::default().field_equals("status", status.to_string()),
            )
            .await?;
        docs.into_iter().map(from_value).collect()
    }

    pub async fn updated_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Story>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::STORIES,
                QueryFilter::default().older_than("last_updated", cutoff),
            )
            .await?;
        docs.into_iter().map(from_value).collect()
    }

    pub async fn delete(&self, story: &Story) -> Result<(), NewsreelError> {
        self.store
            .delete(names::STORIES, &story.story_id, &story.partition_key())
            .await
    }
}

// --- Feed poll state ---

#[derive(Clone)]
pub struct FeedStates {
    store: Arc<dyn DocumentStore>,
}

impl FeedStates {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, feed_id: &str) -> Result<Option<FeedPollState>, NewsreelError> {
        match self.store.read(names::FEED_POLL_STATES, feed_id, feed_id).await {
            Ok((doc, _)) => Ok(Some(from_value(doc)?)),
            Err(NewsreelError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Single-writer per feed, so a plain upsert is safe here.
    pub async fn put(&self, state: &FeedPollState) -> Result<(), NewsreelError> {
        self.store
            .upsert(
                names::FEED_POLL_STATES,
                &state.feed_id,
                to_value(state)?,
                &state.feed_id,
            )
            .await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<FeedPollState>, NewsreelError> {
        let docs = self
            .store
            .query(names::FEED_POLL_STATES, QueryFilter::default())
            .await?;
        docs.into_iter().map(from_value).collect()
    }
}

// --- Notifications ---

#[derive(Clone)]
pub struct Notifications {
    store: Arc<dyn DocumentStore>,
}

impl Notifications {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn entry_id(story_id: &str, episode_id: &str) -> String {
        format!("{story_id}:{episode_id}")
    }

    /// Whether a notification already exists for this story's episode.
    pub async fn exists(&self, story_id: &str, episode_id: &str) -> Result<bool, NewsreelError> {
        match self
            .store
            .read(
                names::NOTIFICATIONS,
                &Self::entry_id(story_id, episode_id),
                story_id,
            )
            .await
        {
            Ok(_) => Ok(true),
            Err(NewsreelError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn enqueue(&self, entry: &NotificationQueueEntry) -> Result<(), NewsreelError> {
        self.store
            .upsert(
                names::NOTIFICATIONS,
                &Self::entry_id(&entry.story_id, &entry.episode_id),
                to_value(entry)?,
                &entry.story_id,
            )
            .await?;
        Ok(())
    }

    pub async fn for_story(&self, story_id: &str) -> Result<Vec<NotificationQueueEntry>, NewsreelError> {
        let docs = self
            .store
            .query(
                names::NOTIFICATIONS,
                QueryFilter::default().field_equals("story_id", story_id),
            )
            .await?;
        docs.into_iter().map(from_value).collect()
    }
}

// --- Dead letters ---

#[derive(Clone)]
pub struct DeadLetters {
    store: Arc<dyn DocumentStore>,
}

impl DeadLetters {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Record a poison document and move on. Failures here are logged and
    /// swallowed — dead-lettering must never take down the consumer too.
    pub async fn record(&self, consumer: &str, reason: &str, payload: Value) {
        let id = format!("{consumer}-{}", Uuid::new_v4());
        let entry = serde_json::json!({
            "consumer": consumer,
            "reason": reason,
            "recorded_at": Utc::now().to_rfc3339(),
            "payload": payload,
        });
        if let Err(e) = self
            .store
            .upsert(names::DEAD_LETTERS, &id, entry, consumer)
            .await
        {
            tracing::error!(consumer, error = %e, "Failed to record dead letter");
        }
    }
}

// --- Cost log ---

#[derive(Clone)]
pub struct CostLog {
    store: Arc<dyn DocumentStore>,
}

impl CostLog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: &CostLogEntry) -> Result<(), NewsreelError> {
        let id = format!("{}-{}", entry.story_id, Uuid::new_v4());
        self.store
            .upsert(names::COST_LOG, &id, to_value(entry)?, &entry.story_id)
            .await?;
        Ok(())
    }
}

// --- Summary audit log ---

#[derive(Clone)]
pub struct SummaryAudit {
    store: Arc<dyn DocumentStore>,
}

impl SummaryAudit {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Append a superseded summary version. Keyed by version, so re-runs
    /// after a crash overwrite rather than duplicate.
    pub async fn append(&self, story_id: &str, summary: &StorySummary) -> Result<(), NewsreelError> {
        let id = format!("{story_id}-v{}", summary.version);
        let entry = serde_json::json!({
            "story_id": story_id,
            "summary": to_value(summary)?,
        });
        self.store
            .upsert(names::SUMMARY_AUDIT, &id, entry, story_id)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::TimeZone;
    use newsreel_common::{Entity, EntityKind};

    fn handles() -> (Articles, Stories) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        (Articles::new(store.clone()), Stories::new(store))
    }

    fn sample_article() -> Article {
        let published = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        Article {
            article_id: "abc123".to_string(),
            source_id: "bbc".to_string(),
            title: "Hostages released to Red Cross".to_string(),
            description: "Seven hostages were transferred.".to_string(),
            content: Some("Full body".to_string()),
            article_url: "https://bbc.example/a".to_string(),
            image_url: None,
            published_at: published,
            ingested_at: published,
            category: Category::World,
            entities: vec![Entity::new("Red Cross", EntityKind::Org)],
            fingerprint: "0badf00d".to_string(),
            cluster_id: None,
        }
    }

    #[tokio::test]
    async fn article_round_trips_through_the_store() {
        let (articles, _) = handles();
        let original = sample_article();
        articles.upsert(&original).await.unwrap();

        let read_back = articles
            .get_anywhere(&original.article_id)
            .await
            .unwrap()
            .expect("article present");
        assert_eq!(original, read_back);
        assert!(articles.exists_anywhere(&original.article_id).await.unwrap());
        assert!(!articles.exists_anywhere("missing").await.unwrap());
    }

    #[tokio::test]
    async fn story_create_then_get_carries_etag() {
        let (_, stories) = handles();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut story = Story::from_article(&sample_article(), now);
        stories.create(&mut story).await.unwrap();
        assert!(!story.etag.is_empty());

        let read_back = stories.get(&story.story_id, Category::World).await.unwrap();
        assert_eq!(read_back, story);

        // Stale-handle replace conflicts; the fresh handle succeeds.
        let mut stale = read_back.clone();
        let mut fresh = read_back;
        stories.replace(&mut fresh).await.unwrap();
        let err = stories.replace(&mut stale).await.unwrap_err();
        assert!(matches!(err, NewsreelError::Conflict { .. }));
    }
}
