//! Engine tests — MOCK → FUNCTION → OUTPUT.
//!
//! Set up an in-memory store, run the real cascade, assert what landed.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use newsreel_common::{fingerprint, Article, Category, Config, Entity, EntityKind, StoryStatus};
use newsreel_store::{Articles, DeadLetters, DocumentStore, MemoryStore, Stories};

use crate::engine::{handle_article, ClusterDeps, ClusterOutcome};

fn test_deps() -> (ClusterDeps, MemoryStore) {
    let store = MemoryStore::new();
    let arc: Arc<dyn DocumentStore> = Arc::new(store.clone());
    let deps = ClusterDeps {
        config: Arc::new(Config::from_env().expect("default config")),
        articles: Articles::new(arc.clone()),
        stories: Stories::new(arc.clone()),
        dead_letters: DeadLetters::new(arc),
    };
    (deps, store)
}

fn article(source: &str, title: &str, entities: &[(&str, EntityKind)], minute: u32) -> Article {
    let published = Utc.with_ymd_and_hms(2026, 8, 1, 12, minute, 0).unwrap();
    let entities: Vec<Entity> = entities
        .iter()
        .map(|(text, kind)| Entity::new(*text, *kind))
        .collect();
    Article {
        article_id: format!("{source}-{minute}"),
        source_id: source.to_string(),
        fingerprint: fingerprint(title, &entities),
        title: title.to_string(),
        description: String::new(),
        content: None,
        article_url: format!("https://{source}.example/{minute}"),
        image_url: None,
        published_at: published,
        ingested_at: published,
        category: Category::World,
        entities,
        cluster_id: None,
    }
}

fn gaza_entities() -> Vec<(&'static str, EntityKind)> {
    vec![
        ("Hamas", EntityKind::Org),
        ("Red Cross", EntityKind::Org),
        ("Gaza", EntityKind::Location),
    ]
}

async fn persist_and_handle(deps: &ClusterDeps, article: &Article) -> ClusterOutcome {
    deps.articles.upsert(article).await.unwrap();
    handle_article(deps, article).await.unwrap()
}

// ---------------------------------------------------------------------------
// Matching cascade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_sources_cluster_into_one_developing_story() {
    let (deps, _) = test_deps();

    let bbc = article(
        "bbc",
        "Hamas releases first group of 7 hostages to Red Cross in Gaza",
        &gaza_entities(),
        0,
    );
    let reuters = article(
        "reuters",
        "Hamas hands over seven hostages to Red Cross",
        &gaza_entities(),
        2,
    );

    let created = persist_and_handle(&deps, &bbc).await;
    let ClusterOutcome::Created { story_id } = created else {
        panic!("expected Created, got {created:?}");
    };

    let attached = persist_and_handle(&deps, &reuters).await;
    assert_eq!(
        attached,
        ClusterOutcome::Attached {
            story_id: story_id.clone()
        }
    );

    let story = deps.stories.get(&story_id, Category::World).await.unwrap();
    assert_eq!(story.verification_level, 2);
    assert_eq!(story.status, StoryStatus::Developing);
    let mut sources: Vec<&str> = story
        .source_articles
        .iter()
        .map(|r| r.source_id.as_str())
        .collect();
    sources.sort_unstable();
    assert_eq!(sources, vec!["bbc", "reuters"]);
}

#[tokio::test]
async fn redelivered_article_changes_nothing() {
    let (deps, _) = test_deps();

    let bbc = article(
        "bbc",
        "Hamas releases first group of 7 hostages to Red Cross in Gaza",
        &gaza_entities(),
        0,
    );
    let reuters = article(
        "reuters",
        "Hamas hands over seven hostages to Red Cross",
        &gaza_entities(),
        2,
    );
    persist_and_handle(&deps, &bbc).await;
    let ClusterOutcome::Attached { story_id } = persist_and_handle(&deps, &reuters).await else {
        panic!("expected attach");
    };

    let before = deps.stories.get(&story_id, Category::World).await.unwrap();

    // Re-poll delivers the same bbc article again.
    let outcome = handle_article(&deps, &bbc).await.unwrap();
    assert_eq!(
        outcome,
        ClusterOutcome::AlreadyClustered {
            story_id: story_id.clone()
        }
    );

    let after = deps.stories.get(&story_id, Category::World).await.unwrap();
    assert_eq!(before, after, "redelivery must not touch the story");
    assert_eq!(after.verification_level, 2);
}

#[tokio::test]
async fn identical_fingerprints_attach_without_fuzzy_scoring() {
    let (deps, _) = test_deps();

    let title = "Wildfire forces evacuations across northern region";
    let entities = vec![("Northern Region", EntityKind::Location)];
    let first = article("ap", title, &entities, 0);
    let second = article("npr", title, &entities, 5);
    assert_eq!(first.fingerprint, second.fingerprint);

    let ClusterOutcome::Created { story_id } = persist_and_handle(&deps, &first).await else {
        panic!("expected create");
    };
    let outcome = persist_and_handle(&deps, &second).await;
    assert_eq!(outcome, ClusterOutcome::Attached { story_id });
}

#[tokio::test]
async fn topic_conflict_keeps_stories_apart() {
    let (deps, _) = test_deps();

    // Token overlap is high enough to fuzzy-match, but one title is
    // dominated by sports keywords and the other by tech keywords.
    let sports = article(
        "espn",
        "Stadium championship match tonight: league final preview",
        &[],
        0,
    );
    let tech = article(
        "verge",
        "Stadium software app launch tonight: final preview",
        &[],
        3,
    );

    let first = persist_and_handle(&deps, &sports).await;
    let second = persist_and_handle(&deps, &tech).await;

    let (ClusterOutcome::Created { story_id: a }, ClusterOutcome::Created { story_id: b }) =
        (first, second)
    else {
        panic!("expected two separate stories");
    };
    assert_ne!(a, b);
}

#[tokio::test]
async fn conflicting_candidate_does_not_shadow_valid_match() {
    let (deps, _) = test_deps();

    // Scores 0.77 against the incoming title but is sports-dominated.
    let sports = article(
        "espn",
        "Stadium championship match tonight: league final preview",
        &[],
        0,
    );
    // Scores 0.72 — lower, but same topic and above the fuzzy threshold.
    let tech = article(
        "techdesk",
        "App launch preview scheduled tonight after delays",
        &[],
        2,
    );
    persist_and_handle(&deps, &sports).await;
    let ClusterOutcome::Created { story_id: tech_story } = persist_and_handle(&deps, &tech).await
    else {
        panic!("expected tech story to be created");
    };

    let incoming = article(
        "verge",
        "Stadium software app launch tonight: final preview",
        &[],
        5,
    );
    let outcome = persist_and_handle(&deps, &incoming).await;
    assert_eq!(
        outcome,
        ClusterOutcome::Attached {
            story_id: tech_story
        },
        "the conflicting higher scorer must be skipped, not end the cascade"
    );
}

#[tokio::test]
async fn entity_overlap_attaches_below_fuzzy_threshold() {
    let (deps, _) = test_deps();

    let mut founder_entities = gaza_entities();
    founder_entities.push(("United Nations", EntityKind::Org));
    let first = article(
        "bbc",
        "Hamas releases first group of 7 hostages to Red Cross in Gaza",
        &founder_entities,
        0,
    );
    // Scores ~0.65 against the story title — under the 0.70 fuzzy
    // threshold, over the 0.60 floor — and shares three Org entities.
    let second = article(
        "aljazeera",
        "Red Cross says hostages received in Gaza handover operation",
        &[
            ("Red Cross", EntityKind::Org),
            ("Hamas", EntityKind::Org),
            ("United Nations", EntityKind::Org),
        ],
        4,
    );

    let ClusterOutcome::Created { story_id } = persist_and_handle(&deps, &first).await else {
        panic!("expected create");
    };
    let outcome = persist_and_handle(&deps, &second).await;
    assert_eq!(outcome, ClusterOutcome::Attached { story_id });
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn parallel_attaches_all_land_without_duplicates() {
    let (deps, _) = test_deps();

    let title = "Hamas releases first group of 7 hostages to Red Cross in Gaza";
    let founder = article("bbc", title, &gaza_entities(), 0);
    let ClusterOutcome::Created { story_id } = persist_and_handle(&deps, &founder).await else {
        panic!("expected create");
    };

    let mut handles = Vec::new();
    for (i, source) in ["reuters", "ap", "npr"].iter().enumerate() {
        let deps = deps.clone();
        let a = article(source, title, &gaza_entities(), i as u32 + 1);
        handles.push(tokio::spawn(async move {
            deps.articles.upsert(&a).await.unwrap();
            handle_article(&deps, &a).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let story = deps.stories.get(&story_id, Category::World).await.unwrap();
    assert_eq!(story.verification_level, 4);
    assert_eq!(story.source_articles.len(), 4);
    assert_eq!(story.status, StoryStatus::Verified);
    story.validate().unwrap();
}

// ---------------------------------------------------------------------------
// Invariants
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_source_never_adds_second_entry() {
    let (deps, _) = test_deps();

    let title = "Hamas releases first group of 7 hostages to Red Cross in Gaza";
    let first = article("bbc", title, &gaza_entities(), 0);
    let ClusterOutcome::Created { story_id } = persist_and_handle(&deps, &first).await else {
        panic!("expected create");
    };

    // A later, different bbc article about the same event.
    let mut second = article("bbc", title, &gaza_entities(), 9);
    second.article_id = "bbc-later".to_string();
    let outcome = persist_and_handle(&deps, &second).await;
    assert_eq!(outcome, ClusterOutcome::Attached { story_id: story_id.clone() });

    let story = deps.stories.get(&story_id, Category::World).await.unwrap();
    assert_eq!(story.verification_level, 1);
    assert_eq!(story.source_articles.len(), 1);
    // The entry refreshed to the newer bbc rendering.
    assert_eq!(story.source_articles[0].article_id, "bbc-later");
}

#[tokio::test]
async fn handled_articles_carry_their_cluster_id() {
    let (deps, store) = test_deps();

    let a = article(
        "bbc",
        "Hamas releases first group of 7 hostages to Red Cross in Gaza",
        &gaza_entities(),
        0,
    );
    let ClusterOutcome::Created { story_id } = persist_and_handle(&deps, &a).await else {
        panic!("expected create");
    };

    let stored = deps
        .articles
        .get_anywhere(&a.article_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.cluster_id.as_deref(), Some(story_id.as_str()));
    assert_eq!(store.dump("dead_letters").len(), 0);
}
