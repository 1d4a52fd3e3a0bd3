use once_cell::sync::Lazy;
use regex::Regex;

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s*(\d+(?:\.\d{2})?)").expect("price regex must compile"));

static FREE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfree\b").expect("free regex must compile"));

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "music",
        &["concert", "live music", "band", "dj", "tour", "jazz", "orchestra", "symphony"],
    ),
    ("comedy", &["comedy", "stand-up", "standup", "improv", "comedian"]),
    ("theatre", &["theatre", "theater", "musical", "play", "opera", "ballet"]),
    ("art", &["exhibition", "gallery", "museum", "art show", "installation"]),
    ("family", &["family", "kids", "children", "all ages"]),
    ("festival", &["festival", "fest", "fair", "carnival"]),
    ("film", &["film", "screening", "cinema", "movie"]),
    ("nightlife", &["club", "party", "nightlife", "rave"]),
    ("sports", &["game", "match", "tournament", "race"]),
];

/// Pulls a display price out of free text: `"$25"`, `"Free"`, or nothing.
pub fn extract_price(text: &str) -> Option<String> {
    if let Some(caps) = PRICE_RE.captures(text) {
        return caps.get(1).map(|amount| format!("${}", amount.as_str()));
    }
    if FREE_RE.is_match(text) {
        return Some("Free".to_string());
    }
    None
}

/// Configured categories first, then keyword matches over title and
/// description. Order is kept and duplicates are dropped.
pub fn infer_categories(title: &str, description: Option<&str>, base: &[String]) -> Vec<String> {
    let mut categories: Vec<String> = Vec::new();
    for category in base {
        push_unique(&mut categories, category.trim().to_ascii_lowercase());
    }

    let haystack = format!("{} {}", title, description.unwrap_or_default()).to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|keyword| contains_word(&haystack, keyword)) {
            push_unique(&mut categories, category.to_string());
        }
    }

    categories
}

fn push_unique(categories: &mut Vec<String>, value: String) {
    if !value.is_empty() && !categories.contains(&value) {
        categories.push(value);
    }
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
