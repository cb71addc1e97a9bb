//! Entry → Article normalization: HTML cleaning, junk rejection, entity
//! extraction, categorization, fingerprinting. Pure and synchronous;
//! persistence stays in the scheduler.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::debug;

use newsreel_common::{article_id, clean_html, fingerprint, Article, FeedDescriptor};

use crate::categorize::categorize;
use crate::entities;
use crate::fetch::RawEntry;

/// Cleaned titles shorter than this are junk (nav fragments, "Live:", …).
const MIN_TITLE_CHARS: usize = 10;

/// Titles matching any of these are advertising, not news.
const DEFAULT_DENY_PATTERNS: &[&str] = &[
    r"(?i)\bsponsored\b",
    r"(?i)\badvertorial\b",
    r"(?i)\baffiliate\b",
    r"(?i)\bpromo code\b",
    r"(?i)\bdeal of the day\b",
    r"(?i)^shop ",
    r"(?i)% off\b",
];

/// Canonical form of an entry URL for identity purposes: fragment and
/// tracking parameters stripped. Unparseable URLs pass through as-is.
pub fn canonical_url(raw: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(raw) else {
        return raw.to_string();
    };
    parsed.set_fragment(None);
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !k.starts_with("utm_") && k != "fbclid" && k != "gclid")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        parsed
            .query_pairs_mut()
            .clear()
            .extend_pairs(kept.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    parsed.to_string()
}

/// Deterministic article id for one entry. Undated entries hash without a
/// timestamp so the same URL keeps one identity across re-polls; their
/// `published_at` falls back to ingest time separately.
pub fn entry_article_id(entry: &RawEntry, feed: &FeedDescriptor) -> String {
    let stamp = entry
        .published
        .map(|p| p.to_rfc3339())
        .unwrap_or_default();
    article_id(&feed.source_id, &canonical_url(&entry.url), &stamp)
}

pub struct Normalizer {
    deny_patterns: Vec<Regex>,
}

impl Normalizer {
    pub fn new(extra_deny_patterns: &[String]) -> Result<Self> {
        let mut deny_patterns = Vec::new();
        for pattern in DEFAULT_DENY_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(extra_deny_patterns.iter().cloned())
        {
            deny_patterns.push(Regex::new(&pattern)?);
        }
        Ok(Self { deny_patterns })
    }

    /// Normalize one feed entry. `None` means the entry was junk; callers
    /// count it but nothing is stored.
    pub fn normalize(
        &self,
        entry: &RawEntry,
        feed: &FeedDescriptor,
        now: DateTime<Utc>,
    ) -> Option<Article> {
        let title = clean_html(entry.title.as_deref()?);
        if title.chars().count() < MIN_TITLE_CHARS {
            debug!(feed_id = %feed.feed_id, title = %title, "Dropping entry: title too short");
            return None;
        }
        if let Some(pattern) = self.deny_patterns.iter().find(|p| p.is_match(&title)) {
            debug!(feed_id = %feed.feed_id, title = %title, pattern = pattern.as_str(), "Dropping entry: deny pattern");
            return None;
        }

        let description = entry
            .summary
            .as_deref()
            .map(clean_html)
            .unwrap_or_default();
        let content = entry
            .content
            .as_deref()
            .map(clean_html)
            .filter(|c| !c.is_empty());

        let published_at = entry.published.unwrap_or(now);
        let extracted = entities::extract(&format!("{title} {description}"));
        let category = categorize(&title, &description, feed.category_hint);

        Some(Article {
            article_id: entry_article_id(entry, feed),
            source_id: feed.source_id.clone(),
            fingerprint: fingerprint(&title, &extracted),
            title,
            description,
            content,
            article_url: entry.url.clone(),
            image_url: entry.image_url.clone(),
            published_at,
            ingested_at: now,
            category,
            entities: extracted,
            cluster_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn feed() -> FeedDescriptor {
        FeedDescriptor {
            feed_id: "bbc-top".to_string(),
            feed_url: "https://feeds.bbci.co.uk/news/rss.xml".to_string(),
            source_id: "bbc".to_string(),
            category_hint: None,
            poll_interval_hint_seconds: None,
        }
    }

    fn entry(title: &str) -> RawEntry {
        RawEntry {
            title: Some(title.to_string()),
            summary: Some("<p>Seven hostages were handed to the <b>Red Cross</b>.</p>".to_string()),
            content: None,
            url: "https://bbc.co.uk/news/world-1".to_string(),
            image_url: None,
            published: Some(Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).unwrap()),
        }
    }

    #[test]
    fn builds_article_with_cleaned_fields() {
        let normalizer = Normalizer::new(&[]).unwrap();
        let now = Utc::now();
        let article = normalizer
            .normalize(
                &entry("Hamas releases first group of <b>7 hostages</b> to Red Cross in Gaza"),
                &feed(),
                now,
            )
            .unwrap();

        assert_eq!(
            article.title,
            "Hamas releases first group of 7 hostages to Red Cross in Gaza"
        );
        assert!(!article.description.contains('<'));
        assert_eq!(article.source_id, "bbc");
        assert_eq!(article.fingerprint.len(), 8);
        assert!(article.entities.iter().any(|e| e.text == "Red Cross"));
        assert!(article.cluster_id.is_none());
    }

    #[test]
    fn article_id_is_deterministic_for_repolls() {
        let normalizer = Normalizer::new(&[]).unwrap();
        let e = entry("Hamas releases first group of 7 hostages");
        let a = normalizer.normalize(&e, &feed(), Utc::now()).unwrap();
        let b = normalizer.normalize(&e, &feed(), Utc::now()).unwrap();
        assert_eq!(a.article_id, b.article_id);
    }

    #[test]
    fn short_titles_are_dropped() {
        let normalizer = Normalizer::new(&[]).unwrap();
        assert!(normalizer
            .normalize(&entry("Live now"), &feed(), Utc::now())
            .is_none());
    }

    #[test]
    fn deny_patterns_drop_advertorials() {
        let normalizer = Normalizer::new(&[]).unwrap();
        assert!(normalizer
            .normalize(
                &entry("Sponsored: the ten best mattresses this year"),
                &feed(),
                Utc::now()
            )
            .is_none());

        let custom = Normalizer::new(&["(?i)horoscope".to_string()]).unwrap();
        assert!(custom
            .normalize(&entry("Your weekly horoscope revealed"), &feed(), Utc::now())
            .is_none());
    }

    #[test]
    fn missing_title_is_dropped() {
        let normalizer = Normalizer::new(&[]).unwrap();
        let mut e = entry("ignored");
        e.title = None;
        assert!(normalizer.normalize(&e, &feed(), Utc::now()).is_none());
    }
}
