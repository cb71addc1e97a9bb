//! Prompt assembly and output handling for story synthesis. One LLM call
//! produces both the summary body and a headline verdict; the headline
//! side answers with a rewrite or the `KEEP_CURRENT` sentinel.

use ai_client::SynthesisRequest;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use newsreel_common::{first_sentence, Article, Config, Story};

/// Sentinel the model returns when the current headline should stand.
pub const KEEP_CURRENT: &str = "KEEP_CURRENT";

/// Source articles included in a prompt, most recent first.
const PROMPT_SOURCE_CAP: usize = 10;
const SYNTHESIS_MAX_TOKENS: u32 = 1024;

/// Publishers ranked for the extractive fallback; unlisted sources rank
/// below all listed ones.
const CREDIBILITY_ORDER: &[&str] = &["reuters", "ap", "bbc", "npr", "nyt", "guardian", "aljazeera"];

/// Structured synthesis output, forced through the model's tool channel.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SynthesisOutput {
    /// Neutral 120-180 word summary of the story across all sources.
    pub summary: String,
    /// A better headline, or exactly KEEP_CURRENT if none is warranted.
    pub headline: String,
}

impl SynthesisOutput {
    pub fn keeps_headline(&self) -> bool {
        self.headline.trim() == KEEP_CURRENT || self.headline.trim().is_empty()
    }
}

/// Fixed instruction block. Stories sharing category and tags produce an
/// identical prefix, which is what makes provider-side caching effective.
fn cacheable_prefix(story: &Story) -> String {
    format!(
        "You are a news-wire editor. Synthesize one neutral summary of a \
         developing story from the source headlines provided. Rules:\n\
         - 120 to 180 words, plain prose, no bullet points.\n\
         - Attribute disputed claims to their sources.\n\
         - No speculation beyond the sources.\n\
         Also judge the current headline: propose a cleaner, editorial-tag-free \
         headline if the sources support one, otherwise answer exactly \
         {KEEP_CURRENT} for the headline field.\n\
         Category: {category}\n\
         Tags: {tags}",
        category = story.category,
        tags = story.tags.join(", "),
    )
}

/// Per-story prompt remainder: current headline plus the most recent
/// source renderings. `articles` supplies descriptions where the compact
/// refs only carry titles.
fn story_prompt(story: &Story, articles: &[Article]) -> String {
    let mut refs: Vec<_> = story.source_articles.iter().collect();
    refs.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    refs.truncate(PROMPT_SOURCE_CAP);

    let mut lines = vec![format!("Current headline: {}", story.title)];
    lines.push("Source articles, newest first:".to_string());
    for (i, r) in refs.iter().enumerate() {
        let description = articles
            .iter()
            .find(|a| a.article_id == r.article_id)
            .map(|a| a.description.as_str())
            .unwrap_or("");
        if description.is_empty() {
            lines.push(format!("{}. [{}] {}", i + 1, r.source_id, r.title));
        } else {
            lines.push(format!(
                "{}. [{}] {} — {}",
                i + 1,
                r.source_id,
                r.title,
                description
            ));
        }
    }
    lines.join("\n")
}

/// Build the full synthesis request for one story.
pub fn build_request(config: &Config, story: &Story, articles: &[Article]) -> SynthesisRequest {
    let schema = schemars::schema_for!(SynthesisOutput);
    SynthesisRequest {
        request_id: story.story_id.clone(),
        cacheable_prefix: cacheable_prefix(story),
        prompt: story_prompt(story, articles),
        model_id: config.llm_model_id.clone(),
        max_tokens: SYNTHESIS_MAX_TOKENS,
        output_schema: Some(serde_json::to_value(schema.schema).unwrap_or_default()),
        timeout: std::time::Duration::from_secs(60),
    }
}

/// Parse the model's structured output.
pub fn parse_output(text: &str) -> Result<SynthesisOutput, serde_json::Error> {
    serde_json::from_str(text)
}

/// Extractive fallback: the first sentence of the most credible source's
/// description (or title). Used when the model refuses or stays down.
pub fn extractive_fallback(story: &Story, articles: &[Article]) -> String {
    let rank = |source_id: &str| {
        CREDIBILITY_ORDER
            .iter()
            .position(|s| *s == source_id)
            .unwrap_or(CREDIBILITY_ORDER.len())
    };
    let best = story
        .source_articles
        .iter()
        .min_by_key(|r| (rank(&r.source_id), r.published_at));

    match best {
        Some(r) => {
            let description = articles
                .iter()
                .find(|a| a.article_id == r.article_id)
                .map(|a| a.description.as_str())
                .filter(|d| !d.is_empty());
            first_sentence(description.unwrap_or(&r.title)).to_string()
        }
        None => story.title.clone(),
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use newsreel_common::{Category, Entity, EntityKind, SourceArticleRef, StoryStatus};

    fn story_with_sources(sources: &[(&str, &str)]) -> Story {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap();
        Story {
            story_id: "s1".to_string(),
            title: sources[0].1.to_string(),
            category: Category::World,
            status: StoryStatus::Verified,
            verification_level: sources.len(),
            source_articles: sources
                .iter()
                .enumerate()
                .map(|(i, (source, title))| SourceArticleRef {
                    article_id: format!("{source}-a"),
                    source_id: source.to_string(),
                    published_at: now + chrono::Duration::minutes(i as i64),
                    title: title.to_string(),
                    url: format!("https://{source}.example/a"),
                })
                .collect(),
            tags: vec!["Hamas".to_string(), "Red Cross".to_string()],
            summary: None,
            first_seen: now,
            last_updated: now,
            importance_score: 5.0,
            breaking_news_sent_at: None,
            etag: String::new(),
        }
    }

    #[test]
    fn prefix_is_identical_for_same_category_and_tags() {
        let a = story_with_sources(&[("bbc", "Hostages released")]);
        let mut b = story_with_sources(&[("reuters", "A different event entirely")]);
        b.story_id = "s2".to_string();
        assert_eq!(cacheable_prefix(&a), cacheable_prefix(&b));
    }

    #[test]
    fn prompt_lists_sources_newest_first() {
        let story = story_with_sources(&[
            ("bbc", "First rendering"),
            ("reuters", "Second rendering"),
        ]);
        let prompt = story_prompt(&story, &[]);
        let reuters_pos = prompt.find("[reuters]").unwrap();
        let bbc_pos = prompt.find("[bbc]").unwrap();
        assert!(reuters_pos < bbc_pos, "newest source must come first");
        assert!(prompt.starts_with("Current headline: First rendering"));
    }

    #[test]
    fn keep_current_sentinel_detected() {
        let keeps = SynthesisOutput {
            summary: "s".to_string(),
            headline: " KEEP_CURRENT ".to_string(),
        };
        assert!(keeps.keeps_headline());
        let rewrites = SynthesisOutput {
            summary: "s".to_string(),
            headline: "Hostages freed in Gaza".to_string(),
        };
        assert!(!rewrites.keeps_headline());
    }

    #[test]
    fn fallback_prefers_credible_source_description() {
        let story = story_with_sources(&[
            ("blogspam", "Unreliable rendering of events"),
            ("reuters", "Hostages handed to Red Cross"),
        ]);
        let reuters_article = Article {
            article_id: "reuters-a".to_string(),
            source_id: "reuters".to_string(),
            title: "Hostages handed to Red Cross".to_string(),
            description: "Seven hostages were transferred on Monday. Officials expect more."
                .to_string(),
            content: None,
            article_url: "https://reuters.example/a".to_string(),
            image_url: None,
            published_at: Utc::now(),
            ingested_at: Utc::now(),
            category: Category::World,
            entities: vec![Entity::new("Red Cross", EntityKind::Org)],
            fingerprint: "00000000".to_string(),
            cluster_id: Some("s1".to_string()),
        };
        assert_eq!(
            extractive_fallback(&story, &[reuters_article]),
            "Seven hostages were transferred on Monday."
        );
    }

    #[test]
    fn parse_rejects_malformed_output() {
        assert!(parse_output("not json").is_err());
        let parsed = parse_output(r#"{"summary": "text", "headline": "KEEP_CURRENT"}"#).unwrap();
        assert!(parsed.keeps_headline());
    }
}
