use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use reqwest::Url;
use tracing::{debug, info, warn};

use crate::error::SearchError;
use crate::fetch::PageFetcher;
use crate::model::Candidate;
use crate::parser::html::{find_all, find_first, Element, Selector};
use crate::parser::normalize::split_title_year;

static TITLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/title/(tt\d+)").unwrap());
static LIST_NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s*").unwrap());
static NO_RESULTS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)no\s+(?:results|titles)\s+found").unwrap());
static YEAR_NODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r">\s*(1[89]\d{2}|20\d{2})(?:\s*[–-]\s*(?:\d{4})?)?\s*<").unwrap()
});

pub const MAX_CANDIDATES: usize = 10;
/// How far past a result link the year lookup may scan.
const YEAR_WINDOW: usize = 1_500;

/// Title search against the remote source.
pub struct CandidateSearch {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl CandidateSearch {
    pub fn new(fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn search_url(&self, query: &str) -> Result<String, SearchError> {
        let url = Url::parse_with_params(
            &format!("{}/find/", self.base_url),
            &[("q", query), ("s", "tt")],
        )
        .map_err(|e| SearchError::Unavailable(format!("bad search URL: {}", e)))?;
        Ok(url.into())
    }

    /// Detail page for a candidate reference; full URLs pass through.
    pub fn detail_url(&self, reference: &str) -> String {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            reference.to_string()
        } else {
            format!("{}/title/{}/", self.base_url, reference)
        }
    }

    /// Up to [`MAX_CANDIDATES`] hits in the source's own order.
    /// An empty list means "no matches", not a failure. A page that is not
    /// a results page at all is `Unavailable`.
    pub async fn search(&self, query: &str) -> Result<Vec<Candidate>, SearchError> {
        let url = self.search_url(query)?;
        info!("Searching for {:?}", query);
        let html = self.fetcher.fetch(&url).await?;
        if html.trim().is_empty() {
            return Err(SearchError::Unavailable("the results page was empty".into()));
        }
        if !looks_like_results_page(&html) {
            warn!("Response for {:?} is not a results page", query);
            return Err(SearchError::Unavailable(
                "the response was not a search results page".into(),
            ));
        }
        let candidates = parse_results(&html);
        info!("Found {} candidates for {:?}", candidates.len(), query);
        Ok(candidates)
    }
}

/// Parse a results page. Prefers the dedicated result-title hooks and falls
/// back to any link into a title page.
pub fn parse_results(html: &str) -> Vec<Candidate> {
    let mut anchors = find_all(html, &Selector::testid("find-result-title-link").on("a"));
    let fallback = anchors.is_empty();
    if fallback {
        debug!("No result-title links; falling back to /title/ links");
        anchors = find_all(html, &Selector::attr_contains("href", "/title/tt").on("a"));
    }

    let refs: Vec<Option<String>> = anchors.iter().map(reference_of).collect();
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for (i, anchor) in anchors.iter().enumerate() {
        if candidates.len() == MAX_CANDIDATES {
            break;
        }
        let Some(reference) = refs[i].clone() else { continue };
        let mut text = anchor.text();
        // only the legacy list layout numbers its rows
        if fallback {
            text = LIST_NUMBER_RE.replace(&text, "").into_owned();
        }
        if text.is_empty() || seen.contains(&reference) {
            continue;
        }
        seen.insert(reference.clone());

        let (label, year) = split_title_year(&text);
        let next_start = refs[i + 1..]
            .iter()
            .zip(&anchors[i + 1..])
            .find(|(r, _)| r.as_deref() != Some(reference.as_str()))
            .map_or(html.len(), |(_, a)| a.start);
        let year = year
            .or_else(|| year_between(html, anchor, next_start))
            .unwrap_or_default();

        candidates.push(Candidate {
            label,
            year,
            reference,
        });
    }
    candidates
}

/// Search markup of either layout, or the source's own "no results" notice.
/// Block pages and captchas match none of these.
pub fn looks_like_results_page(html: &str) -> bool {
    const HOOKS: &[Selector] = &[
        Selector::attr_contains("data-testid", "find-results-section"),
        Selector::testid("find-result-title-link"),
        Selector::attr_contains("class", "findHeader"),
        Selector::attr_contains("class", "findList"),
        Selector::attr_contains("class", "findResult"),
    ];
    HOOKS.iter().any(|sel| find_first(html, sel).is_some())
        || find_all(html, &Selector::attr_eq("rel", "canonical").on("link"))
            .iter()
            .any(|l| l.attr("href").is_some_and(|h| h.contains("/find")))
        || find_first(html, &Selector::tag("title"))
            .is_some_and(|t| t.text().to_lowercase().starts_with("find"))
        || NO_RESULTS_RE.is_match(html)
}

fn reference_of(anchor: &Element<'_>) -> Option<String> {
    let href = anchor.attr("href")?;
    TITLE_ID_RE.captures(href).map(|c| c[1].to_string())
}

/// First year-only text node after `anchor` and before the next result.
fn year_between(html: &str, anchor: &Element<'_>, next_start: usize) -> Option<String> {
    let from = anchor.end;
    let mut to = next_start.min(from + YEAR_WINDOW).min(html.len());
    if to <= from {
        return None;
    }
    while !html.is_char_boundary(to) {
        to -= 1;
    }
    // close-tag end offsets always fall on a char boundary
    YEAR_NODE_RE
        .captures(&html[from..to])
        .map(|c| c[1].to_string())
}

// ── Tests ──
