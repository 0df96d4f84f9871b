use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, ExtractionError, ResolveError, StoreError};
use crate::fetch::PageFetcher;
use crate::model::{record_key, Candidate, MovieRecord};
use crate::parser;
use crate::parser::normalize::{collapse_whitespace, split_title_year, validate_year};
use crate::search::CandidateSearch;
use crate::store::RecordStore;

static BRACKETED_YEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?)\s*[(\[]\s*(1[89]\d{2}|20\d{2})\s*[)\]]$").unwrap()
});
static BARE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s+(1[89]\d{2}|20\d{2})$").unwrap());

/// Where a resolution is in its lifecycle. Only logged; callers observe
/// the outcome through [`Lookup`] and [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    CacheLookup,
    CandidateFetch,
    Disambiguation,
    DetailFetch,
    Extraction,
    Persist,
    Found,
    Error(ErrorKind),
}

fn enter(state: State) {
    debug!(?state, "resolver");
}

fn fail(e: ResolveError) -> ResolveError {
    enter(State::Error(e.kind()));
    e
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Remote,
}

#[derive(Debug)]
pub struct Resolution {
    pub record: MovieRecord,
    pub source: Source,
    /// Set when the record resolved but could not be written to disk.
    pub persist_warning: Option<StoreError>,
}

/// Result of the first phase: a cache hit, or a list the user must pick from.
#[derive(Debug)]
pub enum Lookup {
    Found(Resolution),
    Choose(PendingChoice),
}

/// A search that is waiting on a selection. Dropping it abandons the
/// resolution with nothing written.
#[derive(Debug)]
pub struct PendingChoice {
    query: String,
    candidates: Vec<Candidate>,
}

impl PendingChoice {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }
}

/// Picks one candidate by index, or `None` to cancel.
pub trait Disambiguator {
    fn choose(&self, candidates: &[Candidate]) -> Option<usize>;
}

/// Always picks the same index. Out of range counts as a cancel.
pub struct FixedChoice(pub usize);

impl Disambiguator for FixedChoice {
    fn choose(&self, _candidates: &[Candidate]) -> Option<usize> {
        Some(self.0)
    }
}

impl<F> Disambiguator for F
where
    F: Fn(&[Candidate]) -> Option<usize>,
{
    fn choose(&self, candidates: &[Candidate]) -> Option<usize> {
        self(candidates)
    }
}

/// A query split into the cache key parts it can match.
#[derive(Debug, PartialEq, Eq)]
struct Query {
    /// Whole normalized query.
    text: String,
    title: String,
    year: Option<String>,
}

impl Query {
    fn parse(raw: &str) -> Self {
        let text = collapse_whitespace(raw);
        let captures = BRACKETED_YEAR_RE
            .captures(&text)
            .or_else(|| BARE_YEAR_RE.captures(&text))
            .filter(|c| !c[1].trim().is_empty());
        match captures {
            Some(c) => Query {
                title: c[1].trim().to_string(),
                year: Some(c[2].to_string()),
                text: text.clone(),
            },
            None => Query {
                title: text.clone(),
                year: None,
                text,
            },
        }
    }
}

/// Cache lookup only. Tries the exact `"title (year)"` key, the
/// `"query ()"` key, then a title match.
pub fn cache_lookup(store: &RecordStore, query: &str) -> Option<MovieRecord> {
    let q = Query::parse(query);
    if q.text.is_empty() {
        return None;
    }
    q.year
        .as_deref()
        .and_then(|year| store.get(&record_key(&q.title, year)))
        .or_else(|| store.get(&record_key(&q.text, "")))
        .or_else(|| store.find_by_title(&q.text))
}

/// Turns a free-text movie name into a [`MovieRecord`]: cache first, then
/// remote search, selection, detail fetch, extraction and write-back.
pub struct Resolver {
    store: Arc<RecordStore>,
    search: CandidateSearch,
    fetcher: Arc<dyn PageFetcher>,
}

impl Resolver {
    pub fn new(store: Arc<RecordStore>, fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            store,
            search: CandidateSearch::new(Arc::clone(&fetcher), base_url),
            fetcher,
        }
    }

    /// Remote candidates for `query`, bypassing the cache.
    pub async fn candidates(&self, query: &str) -> Result<Vec<Candidate>, ResolveError> {
        let text = collapse_whitespace(query);
        if text.is_empty() {
            return Err(fail(ResolveError::EmptyQuery));
        }
        enter(State::CandidateFetch);
        self.search
            .search(&text)
            .await
            .map_err(|e| fail(e.into()))
    }

    /// First phase: answer from the cache or return the candidates to pick from.
    pub async fn begin(&self, query: &str) -> Result<Lookup, ResolveError> {
        let text = collapse_whitespace(query);
        if text.is_empty() {
            return Err(fail(ResolveError::EmptyQuery));
        }

        enter(State::CacheLookup);
        if let Some(record) = cache_lookup(&self.store, &text) {
            enter(State::Found);
            info!("Cache hit for {:?}: {}", text, record.key());
            return Ok(Lookup::Found(Resolution {
                record,
                source: Source::Cache,
                persist_warning: None,
            }));
        }

        let candidates = self.candidates(&text).await?;
        if candidates.is_empty() {
            return Err(fail(ResolveError::NotFound { query: text }));
        }

        enter(State::Disambiguation);
        Ok(Lookup::Choose(PendingChoice {
            query: text,
            candidates,
        }))
    }

    /// Second phase: fetch the chosen candidate, extract and persist it.
    /// `None` or an out-of-range index cancels.
    pub async fn complete(
        &self,
        pending: PendingChoice,
        choice: Option<usize>,
    ) -> Result<Resolution, ResolveError> {
        let Some(index) = choice else {
            info!("Selection for {:?} cancelled", pending.query);
            return Err(fail(ResolveError::Cancelled));
        };
        let Some(candidate) = pending.candidates.get(index) else {
            warn!(
                "Selection {} out of range for {} candidates",
                index,
                pending.candidates.len()
            );
            return Err(fail(ResolveError::Cancelled));
        };

        let record = self.fetch_details(candidate).await?;

        enter(State::Persist);
        let persist_warning = match self.store.put(record.clone()) {
            Ok(()) => None,
            Err(e) => {
                warn!("{}; the record is kept for this session only", e);
                Some(e)
            }
        };

        Ok(Resolution {
            record,
            source: Source::Remote,
            persist_warning,
        })
    }

    /// Both phases, with `chooser` answering the selection.
    pub async fn resolve(
        &self,
        query: &str,
        chooser: &dyn Disambiguator,
    ) -> Result<Resolution, ResolveError> {
        match self.begin(query).await? {
            Lookup::Found(resolution) => Ok(resolution),
            Lookup::Choose(pending) => {
                let choice = chooser.choose(pending.candidates());
                self.complete(pending, choice).await
            }
        }
    }

    async fn fetch_details(&self, candidate: &Candidate) -> Result<MovieRecord, ResolveError> {
        enter(State::DetailFetch);
        let url = self.search.detail_url(&candidate.reference);
        info!("Fetching details for {} from {}", candidate, url);
        let html = self.fetcher.fetch(&url).await.map_err(|e| fail(e.into()))?;

        enter(State::Extraction);
        let mut record = parser::extract(&html).map_err(|e| fail(e.into()))?;
        backfill(&mut record, candidate);
        if record.title.is_empty() {
            return Err(fail(ExtractionError::MissingTitle.into()));
        }
        Ok(record)
    }
}

/// Fill title and year from the search hit when the page had neither.
fn backfill(record: &mut MovieRecord, candidate: &Candidate) {
    if record.title.is_empty() {
        record.title = split_title_year(&candidate.label).0;
    }
    if record.year.is_empty() {
        record.year = validate_year(&candidate.year).unwrap_or_default();
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticFetcher;

    const BASE: &str = "https://www.imdb.com";
    const INCEPTION_URL: &str = "https://www.imdb.com/title/tt1375666/";

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    fn search_url(query: &str) -> String {
        CandidateSearch::new(Arc::new(StaticFetcher::new()), BASE)
            .search_url(query)
            .unwrap()
    }

    fn inception_fetcher() -> StaticFetcher {
        StaticFetcher::new()
            .with_page(&search_url("Inception"), fixture("search_inception"))
            .with_page(INCEPTION_URL, fixture("inception"))
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<RecordStore>,
        fetcher: Arc<StaticFetcher>,
        resolver: Resolver,
    }

    fn harness(fetcher: StaticFetcher) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("all_movies.json")));
        let fetcher = Arc::new(fetcher);
        let resolver = Resolver::new(Arc::clone(&store), fetcher.clone(), BASE);
        Harness {
            _dir: dir,
            store,
            fetcher,
            resolver,
        }
    }

    fn never_called(_: &[Candidate]) -> Option<usize> {
        panic!("cache hit should not ask for a selection");
    }

    #[tokio::test]
    async fn remote_resolution_then_cache_hit() {
        let h = harness(inception_fetcher());

        let first = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap();
        assert_eq!(first.source, Source::Remote);
        assert!(first.persist_warning.is_none());
        assert_eq!(first.record.title, "Inception");
        assert_eq!(first.record.year, "2010");
        assert_eq!(first.record.rating, "8.8");
        assert_eq!(h.store.get("Inception (2010)"), Some(first.record.clone()));
        assert_eq!(h.fetcher.calls(), 2);
        assert_eq!(h.fetcher.requested()[1], INCEPTION_URL);

        let again = h.resolver.resolve("Inception", &never_called).await.unwrap();
        assert_eq!(again.source, Source::Cache);
        assert_eq!(again.record, first.record);
        assert_eq!(h.fetcher.calls(), 2);

        // the write reached disk
        let reopened = RecordStore::open(h.store.path());
        assert_eq!(reopened.get("Inception (2010)"), Some(first.record));
    }

    #[tokio::test]
    async fn cache_hits_are_idempotent() {
        let h = harness(StaticFetcher::new());
        let record = MovieRecord {
            title: "Heat".into(),
            year: "1995".into(),
            rating: "8.3".into(),
            ..Default::default()
        };
        h.store.put(record.clone()).unwrap();

        for query in ["Heat", "  heat ", "Heat (1995)", "Heat [1995]", "Heat 1995"] {
            let r = h.resolver.resolve(query, &never_called).await.unwrap();
            assert_eq!(r.source, Source::Cache, "query {:?}", query);
            assert_eq!(r.record, record);
        }
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn explicit_year_does_not_match_other_years() {
        let h = harness(StaticFetcher::new());
        h.store
            .put(MovieRecord {
                title: "Dune".into(),
                year: "2021".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(cache_lookup(&h.store, "Dune (1984)").is_none());
        assert!(cache_lookup(&h.store, "Dune (2021)").is_some());
    }

    #[tokio::test]
    async fn two_phase_selection() {
        let h = harness(inception_fetcher());
        let Lookup::Choose(pending) = h.resolver.begin("Inception").await.unwrap() else {
            panic!("expected a selection");
        };
        assert_eq!(pending.query(), "Inception");
        assert_eq!(pending.candidates().len(), 10);
        assert_eq!(
            pending.candidates()[0],
            Candidate {
                label: "Inception".into(),
                year: "2010".into(),
                reference: "tt1375666".into(),
            }
        );

        let r = h.resolver.complete(pending, Some(0)).await.unwrap();
        assert_eq!(r.record.key(), "Inception (2010)");
    }

    #[tokio::test]
    async fn zero_candidates_is_not_found() {
        let fetcher = StaticFetcher::new().with_page(
            &search_url("Zzyzx Qwerty"),
            "<html><body><p>No results found for \"Zzyzx Qwerty\"</p></body></html>",
        );
        let h = harness(fetcher);
        let err = h.resolver.resolve("Zzyzx Qwerty", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(h.store.is_empty());
        assert!(!h.store.path().exists());
    }

    #[tokio::test]
    async fn cancel_and_out_of_range_write_nothing() {
        let h = harness(inception_fetcher());

        let cancel = |_: &[Candidate]| -> Option<usize> { None };
        let err = h.resolver.resolve("Inception", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let err = h.resolver.resolve("Inception", &FixedChoice(99)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        assert!(h.store.is_empty());
        // only the two searches; no detail page was requested
        assert_eq!(h.fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn unreachable_search_is_search_unavailable() {
        let h = harness(StaticFetcher::new());
        let err = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SearchUnavailable);
    }

    #[tokio::test]
    async fn blocked_search_page_is_search_unavailable() {
        let fetcher = StaticFetcher::new().with_page(
            &search_url("Inception"),
            "<h1>Access Denied</h1><p>Request blocked.</p>",
        );
        let h = harness(fetcher);
        let err = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SearchUnavailable);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn detail_fetch_failure() {
        let fetcher =
            StaticFetcher::new().with_page(&search_url("Inception"), fixture("search_inception"));
        let h = harness(fetcher);
        let err = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn blocked_detail_page_is_extraction_failure() {
        let fetcher = StaticFetcher::new()
            .with_page(&search_url("Inception"), fixture("search_inception"))
            .with_page(INCEPTION_URL, "<html><body><h1>Access denied</h1></body></html>");
        let h = harness(fetcher);
        let err = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn title_and_year_fall_back_to_candidate() {
        let fetcher = StaticFetcher::new()
            .with_page(&search_url("Inception"), fixture("search_inception"))
            .with_page(
                INCEPTION_URL,
                r#"<html><head><meta property="og:type" content="video.movie"></head><body></body></html>"#,
            );
        let h = harness(fetcher);
        let r = h.resolver.resolve("Inception", &FixedChoice(0)).await.unwrap();
        assert_eq!(r.record.title, "Inception");
        assert_eq!(r.record.year, "2010");
        assert!(r.record.rating.is_empty());
        assert!(h.store.get("Inception (2010)").is_some());
    }

    #[tokio::test]
    async fn unwritable_cache_still_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("missing").join("all_movies.json")));
        let fetcher = Arc::new(inception_fetcher());
        let resolver = Resolver::new(Arc::clone(&store), fetcher, BASE);

        let r = resolver.resolve("Inception", &FixedChoice(0)).await.unwrap();
        assert!(matches!(r.persist_warning, Some(StoreError::Persistence { .. })));
        assert_eq!(store.get("Inception (2010)"), Some(r.record));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let h = harness(StaticFetcher::new());
        let err = h.resolver.resolve("   ", &FixedChoice(0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyQuery);
        assert_eq!(h.fetcher.calls(), 0);
    }

    #[test]
    fn query_parsing() {
        let q = Query::parse("  Blade   Runner (1982) ");
        assert_eq!(q.text, "Blade Runner (1982)");
        assert_eq!(q.title, "Blade Runner");
        assert_eq!(q.year.as_deref(), Some("1982"));

        let q = Query::parse("Blade Runner 2049");
        assert_eq!(q.title, "Blade Runner");
        assert_eq!(q.year.as_deref(), Some("2049"));

        let q = Query::parse("1917");
        assert_eq!(q.title, "1917");
        assert_eq!(q.year, None);
    }
}
