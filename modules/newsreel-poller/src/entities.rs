//! Rule + dictionary entity extraction. Deliberately lightweight: the
//! clustering engine only needs stable, deterministic entities, not NER
//! accuracy. Recognizes curated person/org aliases, a small location
//! gazetteer, and capitalized multi-word spans.

use newsreel_common::{Entity, EntityKind};

/// Curated aliases. Matched case-insensitively on word boundaries;
/// extend here rather than special-casing downstream.
const ALIASES: &[(&str, EntityKind)] = &[
    ("United Nations", EntityKind::Org),
    ("White House", EntityKind::Org),
    ("Red Cross", EntityKind::Org),
    ("Hamas", EntityKind::Org),
    ("NATO", EntityKind::Org),
    ("European Union", EntityKind::Org),
    ("World Health Organization", EntityKind::Org),
    ("Federal Reserve", EntityKind::Org),
    ("Supreme Court", EntityKind::Org),
    ("Pentagon", EntityKind::Org),
    ("Kremlin", EntityKind::Org),
    ("Wall Street", EntityKind::Org),
    ("OpenAI", EntityKind::Org),
    ("Apple", EntityKind::Org),
    ("Google", EntityKind::Org),
    ("Microsoft", EntityKind::Org),
    ("Amazon", EntityKind::Org),
    ("Tesla", EntityKind::Org),
    ("Boeing", EntityKind::Org),
    ("Pope Francis", EntityKind::Person),
    ("King Charles", EntityKind::Person),
];

const LOCATIONS: &[&str] = &[
    "Gaza", "Israel", "Ukraine", "Russia", "China", "Taiwan", "Iran", "India",
    "Europe", "America", "Washington", "London", "Paris", "Berlin", "Moscow",
    "Beijing", "Tokyo", "Brussels", "California", "Texas", "New York",
    "Middle East", "United States", "United Kingdom",
];

/// Suffixes that mark a capitalized span as an organization.
const ORG_SUFFIXES: &[&str] = &["Inc", "Corp", "Ltd", "Group", "Bank", "University", "Agency"];

#[derive(Debug)]
struct Candidate {
    start: usize,
    len: usize,
    text: String,
    kind: EntityKind,
}

/// Extract entities from cleaned text. Output order is first occurrence;
/// identical texts (case-insensitive) are deduped keeping the first.
pub fn extract(text: &str) -> Vec<Entity> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut candidates: Vec<Candidate> = Vec::new();

    alias_candidates(&words, &mut candidates);
    span_candidates(&words, &mut candidates);

    // Position order, longest span first on ties so "World Health
    // Organization" beats "World Health".
    candidates.sort_by(|a, b| a.start.cmp(&b.start).then(b.len.cmp(&a.len)));

    let mut seen = std::collections::HashSet::new();
    let mut taken_through = 0usize;
    let mut entities = Vec::new();
    for candidate in candidates {
        if candidate.start < taken_through {
            continue; // overlaps an already-accepted span
        }
        if seen.insert(candidate.text.to_lowercase()) {
            entities.push(Entity::new(candidate.text.clone(), candidate.kind));
        }
        taken_through = candidate.start + candidate.len;
    }
    entities
}

fn alias_candidates(words: &[&str], out: &mut Vec<Candidate>) {
    for (alias, kind) in ALIASES {
        push_dictionary_matches(words, alias, *kind, out);
    }
    for location in LOCATIONS {
        push_dictionary_matches(words, location, EntityKind::Location, out);
    }
}

fn push_dictionary_matches(words: &[&str], phrase: &str, kind: EntityKind, out: &mut Vec<Candidate>) {
    let phrase_words: Vec<&str> = phrase.split_whitespace().collect();
    if phrase_words.is_empty() {
        return;
    }
    for start in 0..words.len().saturating_sub(phrase_words.len() - 1) {
        let matches = phrase_words
            .iter()
            .enumerate()
            .all(|(i, pw)| clean_word(words[start + i]).eq_ignore_ascii_case(pw));
        if matches {
            out.push(Candidate {
                start,
                len: phrase_words.len(),
                text: phrase.to_string(),
                kind,
            });
        }
    }
}

/// Runs of two or more capitalized words that are not pure sentence-start
/// artifacts. Classified Org by suffix, Location by gazetteer, else Other.
fn span_candidates(words: &[&str], out: &mut Vec<Candidate>) {
    let mut i = 0;
    while i < words.len() {
        if !is_capitalized(words[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < words.len() && is_capitalized(words[i]) {
            i += 1;
        }
        let len = i - start;
        if len < 2 {
            continue;
        }
        let text = words[start..i]
            .iter()
            .map(|w| clean_word(w))
            .collect::<Vec<_>>()
            .join(" ");
        let kind = classify_span(&text);
        out.push(Candidate {
            start,
            len,
            text,
            kind,
        });
    }
}

fn classify_span(text: &str) -> EntityKind {
    if ORG_SUFFIXES
        .iter()
        .any(|suffix| text.split_whitespace().next_back() == Some(*suffix))
    {
        return EntityKind::Org;
    }
    if LOCATIONS.iter().any(|l| l.eq_ignore_ascii_case(text)) {
        return EntityKind::Location;
    }
    EntityKind::Other
}

fn is_capitalized(word: &str) -> bool {
    let cleaned = clean_word(word);
    let mut chars = cleaned.chars();
    match chars.next() {
        Some(first) => first.is_uppercase() && cleaned.chars().any(|c| c.is_alphabetic()),
        None => false,
    }
}

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}
