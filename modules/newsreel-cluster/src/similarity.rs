//! Title similarity for the fuzzy clustering stage. A token-set ratio:
//! both titles are normalized and tokenized, and the score is the best
//! character-bigram Dice coefficient among the sorted intersection string
//! and the two full sorted-token strings. Subset-style paraphrases
//! ("Hamas hands over seven hostages to Red Cross" against a longer
//! rendering of the same event) score high; disjoint titles score near
//! zero. Normalized to [0, 1], symmetric, order-independent, and fully
//! deterministic.

use std::collections::BTreeSet;

use newsreel_common::normalize_title;

/// Similarity of two titles in [0, 1].
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: BTreeSet<String> = tokens(a);
    let tokens_b: BTreeSet<String> = tokens(b);
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let intersection: Vec<&str> = tokens_a
        .intersection(&tokens_b)
        .map(String::as_str)
        .collect();
    let rest_a: Vec<&str> = tokens_a.difference(&tokens_b).map(String::as_str).collect();
    let rest_b: Vec<&str> = tokens_b.difference(&tokens_a).map(String::as_str).collect();

    // BTreeSet iteration is sorted, so these strings are canonical.
    let both = intersection.join(" ");
    let full_a = join_parts(&intersection, &rest_a);
    let full_b = join_parts(&intersection, &rest_b);

    bigram_dice(&both, &full_a)
        .max(bigram_dice(&both, &full_b))
        .max(bigram_dice(&full_a, &full_b))
}

fn tokens(title: &str) -> BTreeSet<String> {
    normalize_title(title)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn join_parts(head: &[&str], tail: &[&str]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(head.len() + tail.len());
    parts.extend_from_slice(head);
    parts.extend_from_slice(tail);
    parts.join(" ")
}

fn bigram_dice(a: &str, b: &str) -> f64 {
    let ba = bigrams(a);
    let bb = bigrams(b);
    if ba.is_empty() && bb.is_empty() {
        return 0.0;
    }
    2.0 * ba.intersection(&bb).count() as f64 / (ba.len() + bb.len()) as f64
}

fn bigrams(s: &str) -> BTreeSet<(char, char)> {
    let chars: Vec<char> = s.chars().filter(|c| !c.is_whitespace()).collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_titles_score_one() {
        let t = "Hamas releases first group of 7 hostages to Red Cross in Gaza";
        assert!((title_similarity(t, t) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn paraphrases_clear_the_fuzzy_threshold() {
        let score = title_similarity(
            "Hamas releases first group of 7 hostages to Red Cross in Gaza",
            "Hamas hands over seven hostages to Red Cross",
        );
        assert!(score >= 0.70, "expected >= 0.70, got {score}");
    }

    #[test]
    fn unrelated_titles_score_low() {
        let score = title_similarity(
            "Company X unveils new iPhone feature",
            "Team Y wins championship with amazing play",
        );
        assert!(score < 0.60, "expected < 0.60, got {score}");
    }

    #[test]
    fn symmetric_and_order_independent() {
        let a = "Red Cross receives hostages in Gaza";
        let b = "Hostages in Gaza received by Red Cross";
        assert!((title_similarity(a, b) - title_similarity(b, a)).abs() < 1e-12);
        // Pure token reordering is a perfect match.
        let c = "Gaza in hostages receives Cross Red";
        assert!((title_similarity(a, c) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn empty_titles_score_zero() {
        assert_eq!(title_similarity("", "anything"), 0.0);
        assert_eq!(title_similarity("...", "anything"), 0.0);
    }

    #[test]
    fn bounded_in_unit_interval() {
        let pairs = [
            ("a", "b"),
            ("one two three", "three two one"),
            ("Breaking: markets fall", "Markets fall sharply"),
            ("x", "very long and completely different headline text"),
        ];
        for (a, b) in pairs {
            let s = title_similarity(a, b);
            assert!((0.0..=1.0).contains(&s), "{s} out of range for {a:?}/{b:?}");
        }
    }
}
