//! Rule-based categorization. Keyword hits over title + description, with
//! title hits counted double; ties break on a fixed category order so the
//! result is deterministic. Falls back to the feed's hint, then
//! `top_stories`.

use newsreel_common::Category;

const RULES: &[(Category, &[&str])] = &[
    (
        Category::Politics,
        &[
            "election", "senate", "congress", "parliament", "minister", "president",
            "campaign", "ballot", "legislation", "governor", "vote", "policy", "coalition",
        ],
    ),
    (
        Category::Business,
        &[
            "earnings", "shares", "stock", "market", "ipo", "merger", "acquisition",
            "revenue", "profit", "inflation", "economy", "bank", "trade", "tariff",
        ],
    ),
    (
        Category::Tech,
        &[
            "iphone", "android", "software", "startup", "chip", "artificial intelligence", "app",
            "smartphone", "cyber", "cloud", "robot", "silicon", "algorithm",
        ],
    ),
    (
        Category::Science,
        &[
            "research", "study", "telescope", "physics", "nasa", "spacecraft", "genome",
            "quantum", "fossil", "experiment", "scientists",
        ],
    ),
    (
        Category::Health,
        &[
            "health", "vaccine", "hospital", "virus", "outbreak", "cancer", "drug",
            "patients", "disease", "fda", "mental health",
        ],
    ),
    (
        Category::Sports,
        &[
            "championship", "tournament", "playoff", "coach", "league", "match",
            "olympic", "goal", "touchdown", "stadium", "season", "wins title",
        ],
    ),
    (
        Category::Entertainment,
        &[
            "movie", "film", "album", "concert", "celebrity", "premiere", "box office",
            "actor", "actress", "singer", "festival", "streaming",
        ],
    ),
    (
        Category::Environment,
        &[
            "climate", "wildfire", "emissions", "drought", "hurricane", "flood",
            "renewable", "pollution", "conservation", "warming",
        ],
    ),
    (
        Category::World,
        &[
            "war", "ceasefire", "hostage", "treaty", "border", "refugee", "sanctions",
            "diplomat", "military", "embassy", "united nations",
        ],
    ),
];

/// Categorize one entry. `hint` is the feed descriptor's category hint.
pub fn categorize(title: &str, description: &str, hint: Option<Category>) -> Category {
    let title_lower = title.to_lowercase();
    let description_lower = description.to_lowercase();

    let mut best: Option<(Category, usize)> = None;
    for (category, keywords) in RULES {
        let score: usize = keywords
            .iter()
            .map(|kw| {
                let mut hits = 0;
                if title_lower.contains(kw) {
                    hits += 2;
                }
                if description_lower.contains(kw) {
                    hits += 1;
                }
                hits
            })
            .sum();
        if score > 0 && best.map_or(true, |(_, s)| score > s) {
            best = Some((*category, score));
        }
    }

    match best {
        Some((category, _)) => category,
        None => hint.unwrap_or(Category::TopStories),
    }
}
