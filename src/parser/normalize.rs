use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(1[89]\d{2}|20\d{2})\b").unwrap());
static TITLE_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+?)\s*\((?:[^()]*?\s)?(1[89]\d{2}|20\d{2})(?:[^()]*)\)").unwrap()
});

pub const MAX_CAST: usize = 15;

/// Trim and collapse internal whitespace runs to a single space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collapse each entry, drop empties and repeats, keep first-seen order.
pub fn dedupe_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| collapse_whitespace(&s))
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

pub fn cap_cast(mut cast: Vec<String>) -> Vec<String> {
    cast.truncate(MAX_CAST);
    cast
}

/// Accept a decimal in [0, 10], normalized to one decimal place.
/// `"8.8/10"` is accepted; anything else out of range or unparseable is dropped.
pub fn validate_rating(raw: &str) -> Option<String> {
    let head = raw.split('/').next().unwrap_or("").trim().replace(',', ".");
    let value: f64 = head.parse().ok()?;
    if !value.is_finite() || !(0.0..=10.0).contains(&value) {
        return None;
    }
    Some(format!("{:.1}", value))
}

/// First plausible 4-digit release year in `s`.
pub fn find_year(s: &str) -> Option<String> {
    YEAR_RE.captures(s).map(|c| c[1].to_string())
}

/// Split `"Inception (2010) - IMDb"` or `"Chernobyl (TV Mini Series 2019)"`
/// into title and year. Without a parenthesized year only a trailing
/// `" - IMDb"` is removed.
pub fn split_title_year(s: &str) -> (String, Option<String>) {
    let s = collapse_whitespace(s);
    if let Some(c) = TITLE_YEAR_RE.captures(&s) {
        return (c[1].trim().to_string(), Some(c[2].to_string()));
    }
    let title = s.strip_suffix(" - IMDb").unwrap_or(&s);
    (title.trim().to_string(), None)
}

pub fn validate_year(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        Some(trimmed.to_string())
    } else {
        None
    }
}
