use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Cap on the number of tags a story accumulates from article entities.
pub const STORY_TAG_CAP: usize = 24;

// --- Categories ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Politics,
    Business,
    Tech,
    Science,
    Health,
    Sports,
    Entertainment,
    World,
    Environment,
    TopStories,
    Other,
}

impl Category {
    pub const ALL: [Category; 11] = [
        Category::Politics,
        Category::Business,
        Category::Tech,
        Category::Science,
        Category::Health,
        Category::Sports,
        Category::Entertainment,
        Category::World,
        Category::Environment,
        Category::TopStories,
        Category::Other,
    ];

    /// Relative newsworthiness weight used by the importance score.
    pub fn weight(&self) -> f64 {
        match self {
            Category::Politics | Category::World | Category::TopStories => 1.0,
            Category::Business | Category::Tech | Category::Health => 0.8,
            Category::Science | Category::Environment => 0.7,
            Category::Sports | Category::Entertainment => 0.5,
            Category::Other => 0.4,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::Politics => "politics",
            Category::Business => "business",
            Category::Tech => "tech",
            Category::Science => "science",
            Category::Health => "health",
            Category::Sports => "sports",
            Category::Entertainment => "entertainment",
            Category::World => "world",
            Category::Environment => "environment",
            Category::TopStories => "top_stories",
            Category::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Category {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "politics" => Ok(Self::Politics),
            "business" => Ok(Self::Business),
            "tech" => Ok(Self::Tech),
            "science" => Ok(Self::Science),
            "health" => Ok(Self::Health),
            "sports" => Ok(Self::Sports),
            "entertainment" => Ok(Self::Entertainment),
            "world" => Ok(Self::World),
            "environment" => Ok(Self::Environment),
            "top_stories" => Ok(Self::TopStories),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown Category: {other}")),
        }
    }
}

// --- Entities ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    Person,
    Org,
    Location,
    Other,
}

/// A named entity extracted from an article. Ordering is first-seen;
/// `text` is deduped case-insensitively at extraction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(text: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

// --- Article ---

/// One publisher's rendering of an event. Immutable after ingest except
/// `cluster_id`, which the clustering engine sets when attaching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub article_id: String,
    pub source_id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub article_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub published_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub category: Category,
    pub entities: Vec<Entity>,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
}

impl Article {
    /// Day-bucket partition key, e.g. `2026-08-01`.
    pub fn partition_key(&self) -> String {
        self.published_at.format("%Y-%m-%d").to_string()
    }
}

// --- Story ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryStatus {
    Monitoring,
    Developing,
    Verified,
    Breaking,
    Archived,
}

impl StoryStatus {
    /// The allowed transition graph: forward-only, plus the two explicit
    /// demotions BREAKING→VERIFIED and VERIFIED→ARCHIVED.
    pub fn allows_transition(&self, to: StoryStatus) -> bool {
        use StoryStatus::*;
        matches!(
            (self, to),
            (Monitoring, Developing)
                | (Monitoring, Verified)
                | (Developing, Verified)
                | (Verified, Breaking)
                | (Breaking, Verified)
                | (Verified, Archived)
        )
    }

    /// Status implied by the number of distinct sources. Promotion to
    /// BREAKING is the monitor's call, never the clustering engine's.
    pub fn for_source_count(count: usize) -> StoryStatus {
        match count {
            0 | 1 => StoryStatus::Monitoring,
            2 => StoryStatus::Developing,
            _ => StoryStatus::Verified,
        }
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoryStatus::Monitoring => "MONITORING",
            StoryStatus::Developing => "DEVELOPING",
            StoryStatus::Verified => "VERIFIED",
            StoryStatus::Breaking => "BREAKING",
            StoryStatus::Archived => "ARCHIVED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MONITORING" => Ok(Self::Monitoring),
            "DEVELOPING" => Ok(Self::Developing),
            "VERIFIED" => Ok(Self::Verified),
            "BREAKING" => Ok(Self::Breaking),
            "ARCHIVED" => Ok(Self::Archived),
            other => Err(format!("unknown StoryStatus: {other}")),
        }
    }
}

/// Compact reference to a source article embedded in a story.
/// At most one entry per `source_id` per story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceArticleRef {
    pub article_id: String,
    pub source_id: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    pub url: String,
}

impl SourceArticleRef {
    pub fn from_article(article: &Article) -> Self {
        Self {
            article_id: article.article_id.clone(),
            source_id: article.source_id.clone(),
            published_at: article.published_at,
            title: article.title.clone(),
            url: article.article_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub text: String,
    pub version: u32,
    pub word_count: usize,
    pub generated_at: DateTime<Utc>,
    pub model_id: String,
    pub cost_micro_usd: u64,
}

/// An evolving multi-source cluster of articles about one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub story_id: String,
    pub title: String,
    pub category: Category,
    pub status: StoryStatus,
    pub verification_level: usize,
    pub source_articles: Vec<SourceArticleRef>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<StorySummary>,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub importance_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaking_news_sent_at: Option<DateTime<Utc>>,
    /// Opaque optimistic-concurrency token issued by the store.
    #[serde(default)]
    pub etag: String,
}

impl Story {
    /// Create a new single-source story from an unmatched article.
    pub fn from_article(article: &Article, now: DateTime<Utc>) -> Self {
        let suffix: u32 = rand::rng().random_range(0..0xff_ffff);
        let story_id = format!("{}-{suffix:06x}", now.format("%Y%m%dT%H%M%S"));

        let mut story = Self {
            story_id,
            title: article.title.clone(),
            category: article.category,
            status: StoryStatus::Monitoring,
            verification_level: 1,
            source_articles: vec![SourceArticleRef::from_article(article)],
            tags: Vec::new(),
            summary: None,
            first_seen: now,
            last_updated: now,
            importance_score: 0.0,
            breaking_news_sent_at: None,
            etag: String::new(),
        };
        story.union_tags(&article.entities);
        story.importance_score = story.compute_importance(now);
        story
    }

    /// Category partition key.
    pub fn partition_key(&self) -> String {
        self.category.to_string()
    }

    pub fn contains_source(&self, source_id: &str) -> bool {
        self.source_articles.iter().any(|r| r.source_id == source_id)
    }

    pub fn contains_article(&self, article_id: &str) -> bool {
        self.source_articles
            .iter()
            .any(|r| r.article_id == article_id)
    }

    pub fn distinct_source_count(&self) -> usize {
        let mut sources: Vec<&str> = self
            .source_articles
            .iter()
            .map(|r| r.source_id.as_str())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }

    /// Attach an article to this story. Returns true if the document
    /// changed. Idempotent: re-attaching the same article is a no-op, and a
    /// second article from an already-present source only refreshes that
    /// source's entry when it is newer.
    ///
    /// `last_updated` moves only when a new distinct source is appended.
    /// It is the activity clock behind the re-summarization trigger and
    /// the breaking cooldown, both of which are defined over distinct
    /// sources — a same-source refresh must not reset either.
    pub fn attach_article(&mut self, article: &Article, now: DateTime<Utc>) -> bool {
        if self.contains_article(&article.article_id) {
            return false;
        }

        if let Some(existing) = self
            .source_articles
            .iter_mut()
            .find(|r| r.source_id == article.source_id)
        {
            // Duplicate-source guard: never a second entry for this source.
            if article.published_at > existing.published_at {
                *existing = SourceArticleRef::from_article(article);
                return true;
            }
            return false;
        }

        self.source_articles
            .push(SourceArticleRef::from_article(article));
        self.verification_level = self.distinct_source_count();

        // More sources only ever reinforce: a breaking episode ends via
        // the monitor's cooldown, never because another source landed.
        let implied = StoryStatus::for_source_count(self.verification_level);
        if self.status != StoryStatus::Breaking && self.status.allows_transition(implied) {
            self.status = implied;
        }

        self.union_tags(&article.entities);
        self.last_updated = now;
        self.importance_score = self.compute_importance(now);
        true
    }

    /// Union entity texts into tags, preserving first-seen order, capped.
    pub fn union_tags(&mut self, entities: &[Entity]) {
        for entity in entities {
            if self.tags.len() >= STORY_TAG_CAP {
                break;
            }
            let exists = self
                .tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&entity.text));
            if !exists {
                self.tags.push(entity.text.clone());
            }
        }
    }

    /// Record a new summary, enforcing strictly-increasing versions.
    pub fn set_summary(&mut self, summary: StorySummary) -> Result<(), String> {
        if let Some(existing) = &self.summary {
            if summary.version <= existing.version {
                return Err(format!(
                    "summary version must increase: {} -> {}",
                    existing.version, summary.version
                ));
            }
        }
        self.summary = Some(summary);
        Ok(())
    }

    pub fn next_summary_version(&self) -> u32 {
        self.summary.as_ref().map(|s| s.version + 1).unwrap_or(1)
    }

    /// Distinct sources whose articles were published inside the window
    /// ending at `now`. The monitor's breaking-velocity input.
    pub fn sources_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        let mut sources: Vec<&str> = self
            .source_articles
            .iter()
            .filter(|r| r.published_at >= cutoff)
            .map(|r| r.source_id.as_str())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources.len()
    }

    /// Most recent source-article publication time.
    pub fn latest_source_at(&self) -> Option<DateTime<Utc>> {
        self.source_articles.iter().map(|r| r.published_at).max()
    }

    /// Importance 0–10 from source count, recency, and category weight.
    pub fn compute_importance(&self, now: DateTime<Utc>) -> f64 {
        let source_pts = (self.distinct_source_count() as f64 * 1.5).min(6.0);
        let age_hours = (now - self.last_updated).num_minutes() as f64 / 60.0;
        let recency_pts = if age_hours < 1.0 {
            3.0
        } else if age_hours < 6.0 {
            2.0
        } else if age_hours < 24.0 {
            1.0
        } else {
            0.0
        };
        ((source_pts + recency_pts) * self.category.weight()).clamp(0.0, 10.0)
    }

    /// Validate the cross-field invariants before persisting. A failure here
    /// is a bug upstream, not a transient condition.
    pub fn validate(&self) -> Result<(), String> {
        if self.story_id.is_empty() {
            return Err("story_id is empty".into());
        }
        if self.title.is_empty() {
            return Err("title is empty".into());
        }
        if self.source_articles.is_empty() {
            return Err("story has no source articles".into());
        }
        if self.verification_level != self.distinct_source_count() {
            return Err(format!(
                "verification_level {} != distinct sources {}",
                self.verification_level,
                self.distinct_source_count()
            ));
        }
        let mut sources: Vec<&str> = self
            .source_articles
            .iter()
            .map(|r| r.source_id.as_str())
            .collect();
        sources.sort_unstable();
        let before = sources.len();
        sources.dedup();
        if sources.len() != before {
            return Err("duplicate source_id in source_articles".into());
        }
        Ok(())
    }
}

// --- Feed polling ---

/// Static descriptor of a configured feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub feed_id: String,
    pub feed_url: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_hint_seconds: Option<u64>,
}

/// Mutable per-feed polling state. Lives in its own collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedPollState {
    pub feed_id: String,
    pub feed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_open_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_polled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_at: Option<DateTime<Utc>>,
}

impl FeedPollState {
    pub fn new(feed: &FeedDescriptor) -> Self {
        Self {
            feed_id: feed.feed_id.clone(),
            feed_url: feed.feed_url.clone(),
            ..Default::default()
        }
    }

    pub fn circuit_is_open(&self, now: DateTime<Utc>) -> bool {
        self.circuit_open_until.is_some_and(|until| until > now)
    }
}

// --- Notifications ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub category: Category,
    pub source_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_snippet: Option<String>,
}

/// One queued breaking-news notification. At most one per story per
/// breaking episode; `episode_id` is the promotion timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub story_id: String,
    pub episode_id: String,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,
    pub payload: NotificationPayload,
}

// --- Cost tracking ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryPath {
    Realtime,
    Batch,
}

impl std::fmt::Display for SummaryPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SummaryPath::Realtime => write!(f, "realtime"),
            SummaryPath::Batch => write!(f, "batch"),
        }
    }
}

/// One LLM call, for spend accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLogEntry {
    pub story_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_id: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_micro_usd: u64,
    pub path: SummaryPath,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(source: &str, title: &str) -> Article {
        let published = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        Article {
            article_id: format!("{source}-id"),
            source_id: source.to_string(),
            title: title.to_string(),
            description: String::new(),
            content: None,
            article_url: format!("https://{source}.example/a"),
            image_url: None,
            published_at: published,
            ingested_at: published,
            category: Category::World,
            entities: vec![],
            fingerprint: "deadbeef".to_string(),
            cluster_id: None,
        }
    }

    #[test]
    fn status_transition_graph() {
        use StoryStatus::*;
        assert!(Monitoring.allows_transition(Developing));
        assert!(Developing.allows_transition(Verified));
        assert!(Verified.allows_transition(Breaking));
        assert!(Breaking.allows_transition(Verified));
        assert!(Verified.allows_transition(Archived));

        assert!(!Developing.allows_transition(Monitoring));
        assert!(!Breaking.allows_transition(Archived));
        assert!(!Archived.allows_transition(Verified));
        assert!(!Monitoring.allows_transition(Breaking));
    }

    #[test]
    fn attach_second_source_promotes_to_developing() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let mut story = Story::from_article(&article("bbc", "Hostages released"), now);
        assert_eq!(story.status, StoryStatus::Monitoring);
        assert_eq!(story.verification_level, 1);

        let changed = story.attach_article(&article("reuters", "Hostages handed over"), now);
        assert!(changed);
        assert_eq!(story.status, StoryStatus::Developing);
        assert_eq!(story.verification_level, 2);
        story.validate().unwrap();
    }

    #[test]
    fn attach_same_source_never_duplicates() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let mut story = Story::from_article(&article("bbc", "First take"), now);
        let created_at = story.last_updated;

        let mut second = article("bbc", "Updated take");
        second.article_id = "bbc-id-2".to_string();
        second.published_at = now;

        let changed = story.attach_article(&second, now + chrono::Duration::minutes(10));
        // Newer article from the same source refreshes the entry in place
        // without counting as source activity.
        assert!(changed);
        assert_eq!(story.source_articles.len(), 1);
        assert_eq!(story.verification_level, 1);
        assert_eq!(story.source_articles[0].title, "Updated take");
        assert_eq!(story.last_updated, created_at);
    }

    #[test]
    fn attach_never_demotes_breaking() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let mut story = Story::from_article(&article("bbc", "Hostages released"), now);
        for source in ["reuters", "ap"] {
            story.attach_article(&article(source, "Hostages released"), now);
        }
        assert_eq!(story.status, StoryStatus::Verified);
        story.status = StoryStatus::Breaking;

        let changed = story.attach_article(&article("npr", "Hostages released"), now);
        assert!(changed);
        assert_eq!(story.verification_level, 4);
        assert_eq!(story.status, StoryStatus::Breaking);
    }

    #[test]
    fn reattach_same_article_is_noop() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
        let a = article("bbc", "First take");
        let mut story = Story::from_article(&a, now);
        let before = story.clone();
        assert!(!story.attach_article(&a, now));
        assert_eq!(story, before);
    }

    #[test]
    fn summary_versions_strictly_increase() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        let mut story = Story::from_article(&article("bbc", "T"), now);
        let summary = |version| StorySummary {
            text: "s".to_string(),
            version,
            word_count: 1,
            generated_at: now,
            model_id: "m".to_string(),
            cost_micro_usd: 10,
        };
        story.set_summary(summary(1)).unwrap();
        assert!(story.set_summary(summary(1)).is_err());
        story.set_summary(summary(2)).unwrap();
        assert_eq!(story.next_summary_version(), 3);
    }

    #[test]
    fn sources_within_window_counts_distinct() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap();
        // Founder published at 12:00; the rest at 25, 10, and 5 minutes ago.
        let mut story = Story::from_article(&article("bbc", "T"), now);
        for (source, minutes_ago) in [("reuters", 25), ("ap", 10), ("guardian", 5)] {
            let mut a = article(source, "T");
            a.published_at = now - chrono::Duration::minutes(minutes_ago);
            story.attach_article(&a, now);
        }
        assert_eq!(story.sources_within(chrono::Duration::minutes(30), now), 4);
        assert_eq!(story.sources_within(chrono::Duration::minutes(12), now), 2);
    }

    #[test]
    fn article_roundtrips_through_json() {
        let mut a = article("bbc", "Hostages released");
        a.entities = vec![
            Entity::new("Red Cross", EntityKind::Org),
            Entity::new("Gaza", EntityKind::Location),
        ];
        let json = serde_json::to_string(&a).unwrap();
        let back: Article = serde_json::from_str(&json).unwrap();
        assert_eq!(a, back);
        assert!(json.contains("\"type\":\"ORG\""));
    }

    #[test]
    fn category_and_status_parse_their_display() {
        for c in Category::ALL {
            assert_eq!(c.to_string().parse::<Category>().unwrap(), c);
        }
        for s in [
            StoryStatus::Monitoring,
            StoryStatus::Developing,
            StoryStatus::Verified,
            StoryStatus::Breaking,
            StoryStatus::Archived,
        ] {
            assert_eq!(s.to_string().parse::<StoryStatus>().unwrap(), s);
        }
    }
}
