use std::env;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::NewsreelError;

/// A named set of topic keywords. Two titles dominated by different sets
/// are in topic conflict and must not cluster together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicSet {
    pub name: String,
    pub keywords: Vec<String>,
}

/// Application configuration loaded from environment variables once at
/// startup and passed by reference. Missing required keys are a
/// configuration error (process exit code 1), not a panic.
#[derive(Debug, Clone)]
pub struct Config {
    // Feed polling
    pub feed_poll_concurrency: usize,
    pub feed_timeout: StdDuration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
    pub feed_config_path: Option<String>,

    // Clustering
    pub fuzzy_similarity_threshold: f64,
    pub entity_match_floor: f64,
    pub entity_match_min_shared: usize,
    pub topic_conflict_sets: Vec<TopicSet>,

    // Breaking news
    pub breaking_window: Duration,
    pub breaking_source_threshold: usize,
    pub breaking_cooldown: Duration,
    pub archive_age: Duration,

    // Summarization
    pub summarization_enabled: bool,
    pub summarization_batch_interval: StdDuration,
    pub summarization_min_gap: StdDuration,
    pub llm_concurrency: usize,
    pub llm_model_id: String,
    pub llm_api_key: String,
    pub summary_audit_log: bool,

    // Store and retention
    pub store_connection: String,
    pub article_ttl: Duration,
    pub story_retention: Duration,

    // Operational HTTP surface
    pub http_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self, NewsreelError> {
        Ok(Self {
            feed_poll_concurrency: parsed_env("FEED_POLL_CONCURRENCY", 10)?,
            feed_timeout: StdDuration::from_secs(parsed_env("FEED_TIMEOUT_SECONDS", 30)?),
            circuit_breaker_threshold: parsed_env("CIRCUIT_BREAKER_THRESHOLD", 3)?,
            circuit_breaker_cooldown: Duration::minutes(parsed_env(
                "CIRCUIT_BREAKER_COOLDOWN_MINUTES",
                30,
            )?),
            feed_config_path: env::var("FEED_CONFIG_PATH").ok(),

            fuzzy_similarity_threshold: parsed_env("FUZZY_SIMILARITY_THRESHOLD", 0.70)?,
            entity_match_floor: parsed_env("ENTITY_MATCH_FLOOR", 0.60)?,
            entity_match_min_shared: parsed_env("ENTITY_MATCH_MIN_SHARED", 3)?,
            topic_conflict_sets: topic_sets_from_env()?,

            breaking_window: Duration::minutes(parsed_env("BREAKING_WINDOW_MINUTES", 30)?),
            breaking_source_threshold: parsed_env("BREAKING_SOURCE_THRESHOLD", 4)?,
            breaking_cooldown: Duration::hours(parsed_env("BREAKING_COOLDOWN_HOURS", 4)?),
            archive_age: Duration::days(parsed_env("ARCHIVE_AGE_DAYS", 7)?),

            summarization_enabled: parsed_env("SUMMARIZATION_ENABLED", true)?,
            summarization_batch_interval: StdDuration::from_secs(
                60 * parsed_env("SUMMARIZATION_BATCH_INTERVAL_MINUTES", 10)?,
            ),
            summarization_min_gap: StdDuration::from_secs(parsed_env(
                "SUMMARIZATION_MIN_GAP_SECONDS",
                30,
            )?),
            llm_concurrency: parsed_env("LLM_CONCURRENCY", 4)?,
            llm_model_id: env::var("LLM_MODEL_ID")
                .unwrap_or_else(|_| "claude-sonnet-4-5".to_string()),
            llm_api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            summary_audit_log: parsed_env("SUMMARY_AUDIT_LOG", false)?,

            store_connection: env::var("STORE_CONNECTION").unwrap_or_else(|_| "memory".to_string()),
            article_ttl: Duration::days(parsed_env("ARTICLE_TTL_DAYS", 30)?),
            story_retention: Duration::days(parsed_env("STORY_RETENTION_DAYS", 90)?),

            http_port: parsed_env("POLLER_HTTP_PORT", 8080)?,
        })
    }

    /// Log each sensitive value by length only.
    pub fn log_redacted(&self) {
        let vars = [
            ("LLM_API_KEY", &self.llm_api_key),
            ("STORE_CONNECTION", &self.store_connection),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn parsed_env<T: FromStr>(key: &str, default: T) -> Result<T, NewsreelError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| NewsreelError::Config(format!("{key} has invalid value {raw:?}"))),
        Err(_) => Ok(default),
    }
}

/// Parse `TOPIC_CONFLICT_SETS` as a JSON object of `{name: [keywords]}`,
/// falling back to the built-in sets.
fn topic_sets_from_env() -> Result<Vec<TopicSet>, NewsreelError> {
    let raw = match env::var("TOPIC_CONFLICT_SETS") {
        Ok(raw) => raw,
        Err(_) => return Ok(default_topic_sets()),
    };
    let map: std::collections::BTreeMap<String, Vec<String>> = serde_json::from_str(&raw)
        .map_err(|e| NewsreelError::Config(format!("TOPIC_CONFLICT_SETS is not valid JSON: {e}")))?;
    Ok(map
        .into_iter()
        .map(|(name, keywords)| TopicSet {
            name,
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        })
        .collect())
}

/// Built-in conflict sets. Fully enumerated so behavior is inspectable;
/// overridable via `TOPIC_CONFLICT_SETS`.
pub fn default_topic_sets() -> Vec<TopicSet> {
    let set = |name: &str, words: &[&str]| TopicSet {
        name: name.to_string(),
        keywords: words.iter().map(|w| w.to_string()).collect(),
    };
    vec![
        set(
            "sports",
            &[
                "championship", "tournament", "season", "playoff", "coach", "league",
                "touchdown", "goal", "match", "game", "team", "player", "wins", "defeat",
                "score", "stadium", "quarterback", "striker", "innings",
            ],
        ),
        set(
            "tech",
            &[
                "iphone", "android", "software", "startup", "silicon", "chip", "app",
                "smartphone", "laptop", "cloud", "browser", "update", "feature", "device",
                "gadget", "processor", "operating",
            ],
        ),
        set(
            "politics",
            &[
                "election", "senate", "congress", "parliament", "minister", "president",
                "campaign", "ballot", "legislation", "policy", "vote", "governor",
                "candidate", "coalition",
            ],
        ),
        set(
            "entertainment",
            &[
                "movie", "film", "album", "concert", "celebrity", "premiere", "trailer",
                "actor", "actress", "singer", "festival", "box office", "streaming",
                "awards",
            ],
        ),
        set(
            "business",
            &[
                "earnings", "shares", "stock", "ipo", "merger", "acquisition", "quarterly",
                "revenue", "profit", "investor", "market cap", "dividend",
            ],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_env() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.feed_poll_concurrency, 10);
        assert_eq!(config.circuit_breaker_threshold, 3);
        assert!((config.fuzzy_similarity_threshold - 0.70).abs() < 1e-9);
        assert_eq!(config.breaking_source_threshold, 4);
        assert_eq!(config.breaking_window, Duration::minutes(30));
        assert_eq!(config.article_ttl, Duration::days(30));
        assert!(!config.topic_conflict_sets.is_empty());
    }

    #[test]
    fn default_sets_are_lowercase() {
        for set in default_topic_sets() {
            for kw in &set.keywords {
                assert_eq!(kw, &kw.to_lowercase(), "keyword {kw} in {}", set.name);
            }
        }
    }
}
