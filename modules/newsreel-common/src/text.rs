//! Text utilities shared across the pipeline: HTML cleaning, title
//! normalization, and the deterministic article/story fingerprints.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{Entity, EntityKind};

/// Keyword count folded into a fingerprint. Changing this (or the entity
/// cap below) changes every stored fingerprint — a breaking schema change.
pub const FINGERPRINT_KEYWORDS: usize = 6;
/// Entity texts folded into a fingerprint, Person/Org before Location.
pub const FINGERPRINT_ENTITIES: usize = 3;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static NUMERIC_ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&#(x?[0-9a-fA-F]+);").expect("numeric entity regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have",
    "he", "her", "his", "i", "in", "is", "it", "its", "more", "new", "not", "of", "on",
    "or", "our", "out", "say", "says", "she", "that", "the", "their", "they", "this",
    "to", "up", "was", "were", "will", "with", "you",
];

/// Strip tags, decode HTML entities, collapse whitespace, trim.
pub fn clean_html(raw: &str) -> String {
    let without_tags = TAG_RE.replace_all(raw, " ");
    let decoded = decode_entities(&without_tags);
    collapse_whitespace(&decoded)
}

/// Decode the named entities feeds actually emit, plus numeric references.
pub fn decode_entities(text: &str) -> String {
    let mut out = text.to_string();
    for (name, replacement) in [
        ("&amp;", "&"),
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&apos;", "'"),
        ("&nbsp;", " "),
        ("&ndash;", "\u{2013}"),
        ("&mdash;", "\u{2014}"),
        ("&lsquo;", "\u{2018}"),
        ("&rsquo;", "\u{2019}"),
        ("&ldquo;", "\u{201C}"),
        ("&rdquo;", "\u{201D}"),
        ("&hellip;", "\u{2026}"),
    ] {
        out = out.replace(name, replacement);
    }
    NUMERIC_ENTITY_RE
        .replace_all(&out, |caps: &regex::Captures| {
            let body = &caps[1];
            let code = if let Some(hex) = body.strip_prefix('x') {
                u32::from_str_radix(hex, 16).ok()
            } else {
                body.parse().ok()
            };
            code.and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Normalize a title for comparison: lowercase, punctuation stripped,
/// whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let cleaned: String = lowered
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    collapse_whitespace(&cleaned)
}

/// Non-stopword tokens of a normalized title, in first-seen order.
pub fn title_tokens(title: &str) -> Vec<String> {
    let normalized = normalize_title(title);
    let mut seen = std::collections::HashSet::new();
    normalized
        .split_whitespace()
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// The `k` most distinctive title keywords in canonical (sorted) order.
/// Distinctiveness is longest-first; the tie-break and final ordering are
/// both lexicographic, so the output is fully deterministic.
pub fn title_keywords(title: &str, k: usize) -> Vec<String> {
    let mut tokens = title_tokens(title);
    tokens.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    tokens.truncate(k);
    tokens.sort();
    tokens
}

/// Deterministic content hash (FNV-1a). Stable across process restarts —
/// `DefaultHasher` is not (HashDoS randomization).
pub fn fnv1a64(content: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in content.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Clustering fingerprint: top keywords plus up to three entity texts,
/// Person/Org preferred over Location, rendered as 8 hex chars.
pub fn fingerprint(title: &str, entities: &[Entity]) -> String {
    let keywords = title_keywords(title, FINGERPRINT_KEYWORDS);

    let mut ranked: Vec<&Entity> = entities.iter().collect();
    ranked.sort_by_key(|e| match e.kind {
        EntityKind::Person | EntityKind::Org => 0,
        EntityKind::Location => 1,
        EntityKind::Other => 2,
    });
    let entity_texts: Vec<String> = ranked
        .iter()
        .take(FINGERPRINT_ENTITIES)
        .map(|e| e.text.to_lowercase())
        .collect();

    let material = format!("{}|{}", keywords.join(" "), entity_texts.join(","));
    let hash = fnv1a64(&material);
    format!("{:08x}", (hash >> 32) as u32 ^ hash as u32)
}

/// Deterministic article id from the identity triple.
pub fn article_id(source_id: &str, canonical_url: &str, published_at: &str) -> String {
    format!(
        "{:016x}",
        fnv1a64(&format!("{source_id}|{canonical_url}|{published_at}"))
    )
}

/// First sentence of a text, for the extractive summary fallback.
pub fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    for (idx, c) in trimmed.char_indices() {
        if matches!(c, '.' | '!' | '?') {
            let end = idx + c.len_utf8();
            if trimmed[end..].starts_with(char::is_whitespace) || trimmed[end..].is_empty() {
                return &trimmed[..end];
            }
        }
    }
    trimmed
}
