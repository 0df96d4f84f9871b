use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

static LD_SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script\s*>"#)
        .unwrap()
});

const TITLE_TYPES: &[&str] = &["Movie", "TVSeries", "TVMovie", "TVEpisode", "VideoGame", "CreativeWork"];

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v).iter(),
            OneOrMany::Many(v) => v.iter(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LdPerson {
    #[serde(rename = "@type", default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LdRating {
    #[serde(rename = "ratingValue", default)]
    pub rating_value: Value,
}

/// The schema.org block embedded in title pages.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LdMovie {
    #[serde(rename = "@type")]
    pub kind: OneOrMany<String>,
    pub name: String,
    #[serde(rename = "datePublished")]
    pub date_published: String,
    #[serde(rename = "aggregateRating")]
    pub aggregate_rating: Option<LdRating>,
    pub genre: OneOrMany<String>,
    pub director: OneOrMany<LdPerson>,
    pub creator: OneOrMany<LdPerson>,
    pub actor: OneOrMany<LdPerson>,
    #[serde(rename = "contentRating")]
    pub content_rating: String,
    pub description: String,
}

impl LdMovie {
    pub fn is_title(&self) -> bool {
        self.kind.iter().any(|k| TITLE_TYPES.contains(&k.as_str()))
    }

    pub fn rating(&self) -> Option<String> {
        match &self.aggregate_rating.as_ref()?.rating_value {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

/// People only: `creator` also lists production companies.
pub fn person_names(people: &OneOrMany<LdPerson>) -> Vec<String> {
    people
        .iter()
        .filter(|p| p.kind.is_empty() || p.kind == "Person")
        .map(|p| p.name.clone())
        .collect()
}

/// First title-typed JSON-LD object on the page. Malformed blocks are skipped.
pub fn parse_movie(html: &str) -> Option<LdMovie> {
    LD_SCRIPT_RE
        .captures_iter(html)
        .filter_map(|c| serde_json::from_str::<Value>(c[1].trim()).ok())
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .filter_map(|v| serde_json::from_value::<LdMovie>(v).ok())
        .find(LdMovie::is_title)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_movie_block() {
        let html = r#"<script type="application/ld+json">{"@type":"Movie","name":"Heat",
            "datePublished":"1995-12-15","aggregateRating":{"ratingValue":8.3},
            "genre":"Crime","director":[{"@type":"Person","name":"Michael Mann"}],
            "creator":[{"@type":"Organization","name":"Warner"},{"@type":"Person","name":"Michael Mann"}]}</script>"#;
        let m = parse_movie(html).unwrap();
        assert_eq!(m.name, "Heat");
        assert_eq!(m.rating().as_deref(), Some("8.3"));
        assert_eq!(m.genre.iter().cloned().collect::<Vec<_>>(), vec!["Crime".to_string()]);
        assert_eq!(person_names(&m.creator), vec!["Michael Mann".to_string()]);
    }

    #[test]
    fn skips_non_title_and_malformed_blocks() {
        let html = r#"<script type="application/ld+json">{ broken</script>
            <script type="application/ld+json">{"@type":"Organization","name":"IMDb"}</script>"#;
        assert!(parse_movie(html).is_none());
    }
}
