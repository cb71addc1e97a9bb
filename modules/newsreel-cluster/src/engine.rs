//! The clustering engine: decide whether an article extends an existing
//! story or founds a new one.
//!
//! Matching cascade, first hit wins:
//! 1. fingerprint match against recently-updated stories
//! 2. fuzzy title match within the same category (threshold 0.70)
//! 3. entity-overlap match above a lower floor (0.60, ≥3 shared entities)
//! 4. no match → create a new MONITORING story
//!
//! Stages 2 and 3 are guarded by the topic-conflict rule. All story
//! mutations go through the etag retry loop and are idempotent under
//! re-delivery.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use newsreel_common::{Article, Config, EntityKind, NewsreelError, Story};
use newsreel_store::{update_with_etag_retry, Articles, DeadLetters, Stories};

use crate::similarity::title_similarity;
use crate::topic::topic_conflict;

/// How far back a story can have been touched and still match.
const RECENCY_WINDOW_HOURS: i64 = 48;
/// Bound on fuzzy candidates loaded per article.
const FUZZY_CANDIDATE_LIMIT: usize = 200;

#[derive(Clone)]
pub struct ClusterDeps {
    pub config: Arc<Config>,
    pub articles: Articles,
    pub stories: Stories,
    pub dead_letters: DeadLetters,
}

/// What the engine did with one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterOutcome {
    Attached { story_id: String },
    Created { story_id: String },
    /// Re-delivery of an already-clustered article; nothing changed.
    AlreadyClustered { story_id: String },
}

/// Handle one article from the change stream. Idempotent: re-delivery
/// leaves every document unchanged.
pub async fn handle_article(
    deps: &ClusterDeps,
    article: &Article,
) -> Result<ClusterOutcome, NewsreelError> {
    // The stream may replay a pre-attach snapshot; the store is the truth.
    if let Some(current) = deps.articles.get_anywhere(&article.article_id).await? {
        if let Some(story_id) = current.cluster_id {
            debug!(article_id = %article.article_id, story_id = %story_id, "Article already clustered");
            return Ok(ClusterOutcome::AlreadyClustered { story_id });
        }
    }

    if let Some(story) = fingerprint_match(deps, article).await? {
        return attach(deps, story, article).await;
    }

    if let Some(story) = fuzzy_or_entity_match(deps, article).await? {
        return attach(deps, story, article).await;
    }

    create_story(deps, article).await
}

/// Stage 1: stories recently extended by an article with this exact
/// fingerprint. Accepted only when the match is unambiguous.
async fn fingerprint_match(
    deps: &ClusterDeps,
    article: &Article,
) -> Result<Option<Story>, NewsreelError> {
    let siblings = deps
        .articles
        .clustered_by_fingerprint(&article.fingerprint)
        .await?;

    let mut story_ids: Vec<String> = siblings
        .into_iter()
        .filter(|a| a.article_id != article.article_id)
        .filter_map(|a| a.cluster_id)
        .collect();
    story_ids.sort_unstable();
    story_ids.dedup();

    let cutoff = Utc::now() - chrono::Duration::hours(RECENCY_WINDOW_HOURS);
    let mut matches = Vec::new();
    for story_id in story_ids {
        match deps.stories.get(&story_id, article.category).await {
            Ok(story) if story.last_updated >= cutoff => matches.push(story),
            Ok(_) => {}
            // A sibling may have clustered into another category's story.
            Err(NewsreelError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
    }

    if matches.len() == 1 {
        let story = matches.into_iter().next().unwrap();
        debug!(article_id = %article.article_id, story_id = %story.story_id, "Fingerprint match");
        return Ok(Some(story));
    }
    Ok(None)
}

/// Stages 2 and 3: best non-conflicting candidate in the same category,
/// accepted at the fuzzy threshold, or at the entity floor with enough
/// shared entities. Topic conflict rejects a candidate, never the whole
/// cascade — a conflicting near-duplicate must not shadow a valid match
/// scoring just below it.
async fn fuzzy_or_entity_match(
    deps: &ClusterDeps,
    article: &Article,
) -> Result<Option<Story>, NewsreelError> {
    let since = Utc::now() - chrono::Duration::hours(RECENCY_WINDOW_HOURS);
    let candidates = deps
        .stories
        .recent_in_category(article.category, since, FUZZY_CANDIDATE_LIMIT)
        .await?;

    let mut best: Option<(Story, f64)> = None;
    for candidate in candidates {
        let score = title_similarity(&article.title, &candidate.title);
        if score < deps.config.entity_match_floor {
            continue; // below both acceptance stages
        }
        if topic_conflict(&deps.config.topic_conflict_sets, &article.title, &candidate.title) {
            debug!(
                article_id = %article.article_id,
                story_id = %candidate.story_id,
                score,
                "Candidate rejected: topic conflict"
            );
            continue;
        }
        if best.as_ref().is_none_or(|(_, top)| score > *top) {
            best = Some((candidate, score));
        }
    }

    let Some((story, score)) = best else {
        return Ok(None);
    };

    if score >= deps.config.fuzzy_similarity_threshold {
        debug!(article_id = %article.article_id, story_id = %story.story_id, score, "Fuzzy title match");
        return Ok(Some(story));
    }

    // Between the entity floor and the fuzzy threshold: the shared-entity
    // check decides.
    let shared = shared_entity_weight(article, &story);
    if shared >= deps.config.entity_match_min_shared as f64 {
        debug!(
            article_id = %article.article_id,
            story_id = %story.story_id,
            score,
            shared,
            "Entity-overlap match"
        );
        return Ok(Some(story));
    }

    Ok(None)
}

/// Weighted count of distinct article entities present in the story's
/// tags: Person/Org count full, Location/Other half.
fn shared_entity_weight(article: &Article, story: &Story) -> f64 {
    let mut seen = std::collections::HashSet::new();
    article
        .entities
        .iter()
        .filter(|e| seen.insert(e.text.to_lowercase()))
        .filter(|e| {
            story
                .tags
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&e.text))
        })
        .map(|e| match e.kind {
            EntityKind::Person | EntityKind::Org => 1.0,
            EntityKind::Location | EntityKind::Other => 0.5,
        })
        .sum()
}

/// Attach through the etag retry loop: re-read, re-apply, replace. The
/// duplicate-source guard lives in `Story::attach_article`, so a lost
/// race simply re-applies as a no-op.
async fn attach(
    deps: &ClusterDeps,
    story: Story,
    article: &Article,
) -> Result<ClusterOutcome, NewsreelError> {
    let story_id = story.story_id.clone();
    let category = story.category;

    let stories = deps.stories.clone();
    let article_owned = article.clone();
    let id_for_retry = story_id.clone();
    update_with_etag_retry("cluster.attach", move || {
        let stories = stories.clone();
        let article = article_owned.clone();
        let story_id = id_for_retry.clone();
        async move {
            let mut fresh = stories.get(&story_id, category).await?;
            if fresh.attach_article(&article, Utc::now()) {
                stories.replace(&mut fresh).await?;
            }
            Ok(())
        }
    })
    .await?;

    mark_clustered(deps, article, &story_id).await?;

    info!(article_id = %article.article_id, story_id = %story_id, source = %article.source_id, "Attached article");
    Ok(ClusterOutcome::Attached { story_id })
}

async fn create_story(
    deps: &ClusterDeps,
    article: &Article,
) -> Result<ClusterOutcome, NewsreelError> {
    let mut story = Story::from_article(article, Utc::now());
    deps.stories.create(&mut story).await?;
    mark_clustered(deps, article, &story.story_id).await?;

    info!(article_id = %article.article_id, story_id = %story.story_id, "Created story");
    Ok(ClusterOutcome::Created {
        story_id: story.story_id,
    })
}

async fn mark_clustered(
    deps: &ClusterDeps,
    article: &Article,
    story_id: &str,
) -> Result<(), NewsreelError> {
    let mut clustered = article.clone();
    clustered.cluster_id = Some(story_id.to_string());
    deps.articles.upsert(&clustered).await
}
