//! Feed descriptors: the built-in seed list and the optional JSON
//! override file.

use anyhow::{Context, Result};
use newsreel_common::{Category, FeedDescriptor};

/// Built-in seed list of publisher feeds used when no config file is
/// given. `source_id` is the stable publisher identifier articles carry.
pub fn default_feeds() -> Vec<FeedDescriptor> {
    let feed = |feed_id: &str, url: &str, source_id: &str, hint: Option<Category>| FeedDescriptor {
        feed_id: feed_id.to_string(),
        feed_url: url.to_string(),
        source_id: source_id.to_string(),
        category_hint: hint,
        poll_interval_hint_seconds: None,
    };
    vec![
        // Wire services
        feed("ap-top", "https://feeds.apnews.com/rss/apf-topnews", "ap", None),
        feed("reuters-top", "https://www.reuters.com/rssFeed/topNews", "reuters", None),
        // US national
        feed("npr-news", "https://feeds.npr.org/1001/rss.xml", "npr", None),
        feed(
            "nyt-home",
            "https://rss.nytimes.com/services/xml/rss/nyt/HomePage.xml",
            "nyt",
            None,
        ),
        // International
        feed("bbc-top", "https://feeds.bbci.co.uk/news/rss.xml", "bbc", None),
        feed(
            "aljazeera-all",
            "https://www.aljazeera.com/xml/rss/all.xml",
            "aljazeera",
            Some(Category::World),
        ),
        feed(
            "guardian-world",
            "https://www.theguardian.com/world/rss",
            "guardian",
            Some(Category::World),
        ),
        // Topic feeds
        feed(
            "bbc-tech",
            "https://feeds.bbci.co.uk/news/technology/rss.xml",
            "bbc",
            Some(Category::Tech),
        ),
        feed(
            "guardian-business",
            "https://www.theguardian.com/uk/business/rss",
            "guardian",
            Some(Category::Business),
        ),
        feed(
            "nature-news",
            "https://www.nature.com/nature.rss",
            "nature",
            Some(Category::Science),
        ),
        feed(
            "kff-health",
            "https://kffhealthnews.org/feed/",
            "kff",
            Some(Category::Health),
        ),
        feed(
            "grist-env",
            "https://grist.org/feed/",
            "grist",
            Some(Category::Environment),
        ),
    ]
}

/// Load descriptors from a JSON array file, or fall back to the seeds.
pub fn load(path: Option<&str>) -> Result<Vec<FeedDescriptor>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read feed config {path}"))?;
            let feeds: Vec<FeedDescriptor> = serde_json::from_str(&raw)
                .with_context(|| format!("Invalid feed config {path}"))?;
            anyhow::ensure!(!feeds.is_empty(), "Feed config {path} is empty");
            Ok(feeds)
        }
        None => Ok(default_feeds()),
    }
}
