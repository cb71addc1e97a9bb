//! Monitor tests — MOCK → FUNCTION → OUTPUT. Time is passed into
//! `tick`, so velocity windows and cooldowns are driven explicitly.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use newsreel_common::{Article, Category, Config, Entity, EntityKind, Story, StoryStatus};
use newsreel_store::{Articles, DocumentStore, MemoryStore, Notifications, Stories};

use crate::monitor::BreakingMonitor;
use crate::sweeper::Sweeper;

fn article(source: &str, published: chrono::DateTime<Utc>) -> Article {
    Article {
        article_id: format!("{source}-{}", published.timestamp()),
        source_id: source.to_string(),
        title: "Hostages released to Red Cross in Gaza".to_string(),
        description: String::new(),
        content: None,
        article_url: format!("https://{source}.example/a"),
        image_url: None,
        published_at: published,
        ingested_at: published,
        category: Category::World,
        entities: vec![Entity::new("Red Cross", EntityKind::Org)],
        fingerprint: "0badf00d".to_string(),
        cluster_id: None,
    }
}

struct Fixture {
    monitor: BreakingMonitor,
    stories: Stories,
    notifications: Notifications,
    articles: Articles,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let arc: Arc<dyn DocumentStore> = Arc::new(store);
    let config = Arc::new(Config::from_env().expect("default config"));
    let stories = Stories::new(arc.clone());
    let articles = Articles::new(arc.clone());
    let notifications = Notifications::new(arc.clone());
    let sweeper = Sweeper::new(config.clone(), articles.clone(), stories.clone());
    let monitor = BreakingMonitor::new(config, stories.clone(), notifications.clone(), sweeper);
    Fixture {
        monitor,
        stories,
        notifications,
        articles,
    }
}

/// A VERIFIED story whose sources published at the given offsets (in
/// minutes) before `now`.
async fn story_with_source_ages(
    stories: &Stories,
    now: chrono::DateTime<Utc>,
    sources: &[(&str, i64)],
) -> Story {
    let (founder_source, founder_age) = sources[0];
    let founder_at = now - Duration::minutes(founder_age);
    let mut story = Story::from_article(&article(founder_source, founder_at), founder_at);
    for (source, age) in &sources[1..] {
        let at = now - Duration::minutes(*age);
        story.attach_article(&article(source, at), at);
    }
    stories.create(&mut story).await.unwrap();
    story
}

fn test_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()
}

#[tokio::test]
async fn fast_verified_story_promotes_and_notifies_once() {
    let f = fixture();
    let now = test_now();
    // Three sources within 20 minutes, a fourth 5 minutes ago: four
    // distinct sources inside the 30-minute window.
    let story = story_with_source_ages(
        &f.stories,
        now,
        &[("bbc", 25), ("reuters", 20), ("ap", 15), ("npr", 5)],
    )
    .await;
    assert_eq!(story.status, StoryStatus::Verified);

    let stats = f.monitor.tick(now).await.unwrap();
    assert_eq!(stats.promoted, 1);
    assert_eq!(stats.notifications_queued, 1);

    let promoted = f.stories.get(&story.story_id, Category::World).await.unwrap();
    assert_eq!(promoted.status, StoryStatus::Breaking);
    assert_eq!(promoted.breaking_news_sent_at, Some(now));

    // A second tick changes nothing: same episode, one notification.
    let stats = f.monitor.tick(now + Duration::minutes(2)).await.unwrap();
    assert_eq!(stats.promoted, 0);
    assert_eq!(stats.notifications_queued, 0);
    assert_eq!(f.notifications.for_story(&story.story_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn slow_verified_story_stays_verified() {
    let f = fixture();
    let now = test_now();
    // Four sources, but spread over four hours: velocity under threshold.
    let story = story_with_source_ages(
        &f.stories,
        now,
        &[("bbc", 240), ("reuters", 180), ("ap", 120), ("npr", 60)],
    )
    .await;

    let stats = f.monitor.tick(now).await.unwrap();
    assert_eq!(stats.promoted, 0);
    let unchanged = f.stories.get(&story.story_id, Category::World).await.unwrap();
    assert_eq!(unchanged.status, StoryStatus::Verified);
    assert!(unchanged.breaking_news_sent_at.is_none());
}

#[tokio::test]
async fn quiet_breaking_story_demotes_and_can_renotify() {
    let f = fixture();
    let now = test_now();
    let story = story_with_source_ages(
        &f.stories,
        now,
        &[("bbc", 25), ("reuters", 20), ("ap", 15), ("npr", 5)],
    )
    .await;
    f.monitor.tick(now).await.unwrap();

    // Four hours and one minute of silence: demote, episode over.
    let later = now + Duration::hours(4) + Duration::minutes(1);
    let stats = f.monitor.tick(later).await.unwrap();
    assert_eq!(stats.demoted, 1);
    let demoted = f.stories.get(&story.story_id, Category::World).await.unwrap();
    assert_eq!(demoted.status, StoryStatus::Verified);
    assert!(demoted.breaking_news_sent_at.is_none());

    // A fresh burst starts a new episode with its own notification.
    let burst = later + Duration::minutes(10);
    let mut fresh = f.stories.get(&story.story_id, Category::World).await.unwrap();
    for source in ["guardian", "aljazeera", "nyt", "kff"] {
        let at = burst - Duration::minutes(3);
        fresh.attach_article(&article(source, at), at);
    }
    f.stories.replace(&mut fresh).await.unwrap();

    let stats = f.monitor.tick(burst).await.unwrap();
    assert_eq!(stats.promoted, 1);
    assert_eq!(stats.notifications_queued, 1);
    assert_eq!(f.notifications.for_story(&story.story_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn stale_verified_story_archives() {
    let f = fixture();
    let now = test_now();
    let story = story_with_source_ages(
        &f.stories,
        now,
        &[
            ("bbc", 60 * 24 * 8),
            ("reuters", 60 * 24 * 8),
            ("ap", 60 * 24 * 8),
        ],
    )
    .await;

    let stats = f.monitor.tick(now).await.unwrap();
    assert_eq!(stats.archived, 1);
    let archived = f.stories.get(&story.story_id, Category::World).await.unwrap();
    assert_eq!(archived.status, StoryStatus::Archived);
}

#[tokio::test]
async fn breaking_story_is_never_archived_by_age() {
    let f = fixture();
    let now = test_now();
    let story = story_with_source_ages(
        &f.stories,
        now,
        &[("bbc", 25), ("reuters", 20), ("ap", 15), ("npr", 5)],
    )
    .await;
    f.monitor.tick(now).await.unwrap();

    // Ten days later the story demotes (first) — archival of a BREAKING
    // story never happens directly.
    let much_later = now + Duration::days(10);
    let stats = f.monitor.tick(much_later).await.unwrap();
    assert_eq!(stats.demoted, 1);
    let current = f.stories.get(&story.story_id, Category::World).await.unwrap();
    assert_eq!(current.status, StoryStatus::Verified);

    // The following tick may then archive it through the normal path.
    let stats = f.monitor.tick(much_later + Duration::minutes(2)).await.unwrap();
    assert_eq!(stats.archived, 1);
}

#[tokio::test]
async fn sweeper_enforces_retention() {
    let f = fixture();
    let now = test_now();

    let expired = article("bbc", now - Duration::days(31));
    let live = article("reuters", now - Duration::days(2));
    f.articles.upsert(&expired).await.unwrap();
    f.articles.upsert(&live).await.unwrap();

    let old_story_at = now - Duration::days(91);
    let mut old_story = Story::from_article(&article("ap", old_story_at), old_story_at);
    f.stories.create(&mut old_story).await.unwrap();

    let stats = f.monitor.tick(now).await.unwrap();
    assert_eq!(stats.articles_swept, 1);
    assert_eq!(stats.stories_swept, 1);

    assert!(f.articles.get_anywhere(&expired.article_id).await.unwrap().is_none());
    assert!(f.articles.get_anywhere(&live.article_id).await.unwrap().is_some());
}
