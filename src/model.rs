use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized movie data, the unit of cache storage.
///
/// Optional scalar fields use the empty string for "absent" so the persisted
/// document always carries every key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovieRecord {
    pub title: String,
    pub year: String,
    pub rating: String,
    pub genres: Vec<String>,
    pub directors: Vec<String>,
    pub writers: Vec<String>,
    pub cast: Vec<String>,
    pub certificate: String,
    pub description: String,
}

impl MovieRecord {
    /// Cache key: `"{title} ({year})"`, degrading to `"{title} ()"`.
    pub fn key(&self) -> String {
        record_key(&self.title, &self.year)
    }

    /// Placeholder written by older versions of the cache for missing values.
    const LEGACY_MISSING: &'static str = "N/A";

    /// Read legacy `"N/A"` placeholders as empty.
    pub fn scrub_placeholders(mut self) -> Self {
        for field in [
            &mut self.year,
            &mut self.rating,
            &mut self.certificate,
            &mut self.description,
        ] {
            if field.trim() == Self::LEGACY_MISSING {
                field.clear();
            }
        }
        for list in [
            &mut self.genres,
            &mut self.directors,
            &mut self.writers,
            &mut self.cast,
        ] {
            list.retain(|v| v.trim() != Self::LEGACY_MISSING && !v.trim().is_empty());
        }
        self
    }
}

pub fn record_key(title: &str, year: &str) -> String {
    format!("{} ({})", title, year)
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

fn join_or_na(items: &[String]) -> String {
    if items.is_empty() {
        "N/A".to_string()
    } else {
        items.join(", ")
    }
}

impl fmt::Display for MovieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title:       {} ({})", self.title, or_na(&self.year))?;
        writeln!(f, "Rating:      {}", or_na(&self.rating))?;
        writeln!(f, "Certificate: {}", or_na(&self.certificate))?;
        writeln!(f, "Genres:      {}", join_or_na(&self.genres))?;
        writeln!(f, "Directors:   {}", join_or_na(&self.directors))?;
        writeln!(f, "Writers:     {}", join_or_na(&self.writers))?;
        writeln!(f, "Cast:        {}", join_or_na(&self.cast))?;
        write!(f, "\nPlot: {}", or_na(&self.description))
    }
}

/// A remote search hit. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub label: String,
    pub year: String,
    /// Source-internal title id (e.g. `tt1375666`) or a full URL.
    pub reference: String,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.year.is_empty() {
            write!(f, "{} [{}]", self.label, self.reference)
        } else {
            write!(f, "{} ({}) [{}]", self.label, self.year, self.reference)
        }
    }
}
