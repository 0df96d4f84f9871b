use std::cell::OnceCell;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::html::{self, find_all, find_first, meta_content, Selector};
use super::ld::{self, LdMovie};
use super::normalize::{find_year, split_title_year};

static RATING_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)IMDb RATING\s*(\d{1,2}(?:\.\d+)?)\s*/\s*10").unwrap()
});
static DIRECTOR_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*Directors?\s*<").unwrap());
static WRITER_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s*Writers?\s*<").unwrap());

const NAME_LINK: Selector = Selector::attr_contains("href", "/name/nm").on("a");
const CREDIT_LABEL: Selector = Selector::attr_contains("class", "ipc-metadata-list-item__label");
/// How far past a credit label the proximity scan may look for names.
const LABEL_WINDOW: usize = 2_000;

/// A fetched detail page plus the lazily derived views strategies share.
pub struct Page<'a> {
    pub html: &'a str,
    pub ld: Option<LdMovie>,
    text: OnceCell<String>,
}

impl<'a> Page<'a> {
    pub fn new(html: &'a str) -> Self {
        Self {
            html,
            ld: ld::parse_movie(html),
            text: OnceCell::new(),
        }
    }

    /// Whole-page visible text, computed on first use.
    pub fn text(&self) -> &str {
        self.text.get_or_init(|| html::html_to_text(self.html))
    }

    /// Whether anything on the page marks it as a title details page.
    pub fn looks_like_detail_page(&self) -> bool {
        self.ld.is_some()
            || find_first(self.html, &Selector::testid("hero-title-block__title")).is_some()
            || find_first(self.html, &Selector::testid("hero__pageTitle")).is_some()
            || meta_content(self.html, "og:type").is_some_and(|t| t.starts_with("video"))
            || find_all(self.html, &Selector::attr_eq("rel", "canonical").on("link"))
                .iter()
                .any(|l| l.attr("href").is_some_and(|h| h.contains("/title/tt")))
    }
}

/// Named extraction method; `None` or a blank value means "try the next one".
pub type Strategy<T> = (&'static str, fn(&Page<'_>) -> Option<T>);

pub trait Blank {
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Blank for Vec<String> {
    fn is_blank(&self) -> bool {
        self.iter().all(|s| s.trim().is_empty())
    }
}

/// Evaluate `strategies` in order and keep the first non-blank result.
pub fn select<T: Blank>(page: &Page<'_>, field: &str, strategies: &[Strategy<T>]) -> Option<T> {
    for (i, (name, strategy)) in strategies.iter().enumerate() {
        if let Some(value) = strategy(page).filter(|v| !v.is_blank()) {
            if i > 0 {
                debug!(field, strategy = *name, "primary markup missing, used fallback");
            }
            return Some(value);
        }
    }
    debug!(field, "no extraction strategy matched");
    None
}

fn text_of(page: &Page<'_>, sel: Selector) -> Option<String> {
    find_first(page.html, &sel).map(|e| e.text())
}

fn texts_of(html: &str, sel: Selector) -> Vec<String> {
    find_all(html, &sel).iter().map(|e| e.text()).collect()
}

fn ld_field(page: &Page<'_>, get: fn(&LdMovie) -> &String) -> Option<String> {
    page.ld.as_ref().map(|m| get(m).clone())
}

// ── title ──

pub const TITLE: &[Strategy<String>] = &[
    ("hero-title-block", |p| text_of(p, Selector::testid("hero-title-block__title"))),
    ("hero-page-title", |p| text_of(p, Selector::testid("hero__pageTitle"))),
    ("og-title", |p| meta_content(p.html, "og:title").map(|t| split_title_year(&t).0)),
    ("ld-name", |p| ld_field(p, |m| &m.name)),
    ("title-tag", |p| text_of(p, Selector::tag("title")).map(|t| split_title_year(&t).0)),
];

// ── year ──

pub const YEAR: &[Strategy<String>] = &[
    ("release-date", |p| {
        text_of(p, Selector::testid("title-details-releasedate")).and_then(|t| find_year(&t))
    }),
    ("release-info-link", |p| {
        find_all(p.html, &Selector::attr_contains("href", "/releaseinfo").on("a"))
            .iter()
            .find_map(|a| find_year(&a.text()))
    }),
    ("ld-date-published", |p| ld_field(p, |m| &m.date_published).and_then(|d| find_year(&d))),
    ("title-tag", |p| {
        meta_content(p.html, "og:title")
            .or_else(|| text_of(p, Selector::tag("title")))
            .and_then(|t| split_title_year(&t).1)
    }),
];

// ── rating ──

pub const RATING: &[Strategy<String>] = &[
    ("hero-rating", |p| {
        text_of(p, Selector::testid("hero-rating-bar__aggregate-rating__score"))
            .map(|t| t.split('/').next().unwrap_or("").trim().to_string())
    }),
    ("rating-score-class", |p| {
        text_of(p, Selector::attr_contains("class", "AggregateRatingButton__RatingScore"))
    }),
    ("ld-aggregate-rating", |p| p.ld.as_ref().and_then(LdMovie::rating)),
    ("rating-text", |p| RATING_TEXT_RE.captures(p.text()).map(|c| c[1].to_string())),
];

// ── genres ──

pub const GENRES: &[Strategy<Vec<String>>] = &[
    ("genre-chips", |p| {
        find_first(p.html, &Selector::testid("genres"))
            .map(|g| texts_of(g.inner, Selector::attr_contains("class", "ipc-chip__text")))
    }),
    ("genre-links", |p| Some(texts_of(p.html, Selector::attr_contains("href", "?genres=").on("a")))),
    ("interest-links", |p| Some(texts_of(p.html, Selector::attr_contains("href", "/interest/in").on("a")))),
    ("ld-genre", |p| p.ld.as_ref().map(|m| m.genre.iter().cloned().collect())),
];

// ── credits ──

/// Names from the first principal-credit row whose label starts with `label`.
fn principal_credit(page: &Page<'_>, label: &str) -> Option<Vec<String>> {
    find_all(page.html, &Selector::testid("title-pc-principal-credit"))
        .into_iter()
        .find(|item| {
            item.find(&CREDIT_LABEL)
                .is_some_and(|l| l.text().starts_with(label))
        })
        .map(|item| texts_of(item.inner, NAME_LINK))
}

/// Names linked shortly after a bare credit label such as `>Directors<`.
fn names_after_label(page: &Page<'_>, label: &Regex) -> Option<Vec<String>> {
    let m = label.find(page.html)?;
    let rest = &page.html[m.end()..];
    let mut window = rest.len().min(LABEL_WINDOW);
    while !rest.is_char_boundary(window) {
        window -= 1;
    }
    let scope = &rest[..window];
    let scope = scope.find("</li>").map_or(scope, |end| &scope[..end]);
    Some(texts_of(scope, NAME_LINK))
}

pub const DIRECTORS: &[Strategy<Vec<String>>] = &[
    ("principal-credit", |p| principal_credit(p, "Director")),
    ("label-proximity", |p| names_after_label(p, &DIRECTOR_LABEL_RE)),
    ("ld-director", |p| p.ld.as_ref().map(|m| ld::person_names(&m.director))),
];

pub const WRITERS: &[Strategy<Vec<String>>] = &[
    ("principal-credit", |p| principal_credit(p, "Writer")),
    ("label-proximity", |p| names_after_label(p, &WRITER_LABEL_RE)),
    ("ld-creator", |p| p.ld.as_ref().map(|m| ld::person_names(&m.creator))),
];

pub const CAST: &[Strategy<Vec<String>>] = &[
    ("cast-items", |p| Some(texts_of(p.html, Selector::testid("title-cast-item__actor")))),
    ("cast-section-links", |p| {
        find_first(p.html, &Selector::testid("title-cast")).map(|s| texts_of(s.inner, NAME_LINK))
    }),
    ("principal-stars", |p| principal_credit(p, "Star")),
    ("ld-actor", |p| p.ld.as_ref().map(|m| ld::person_names(&m.actor))),
];

// ── certificate ──

pub const CERTIFICATE: &[Strategy<String>] = &[
    ("certificate-details", |p| {
        text_of(p, Selector::testid("title-details-certificate"))
            .map(|t| t.strip_prefix("Certificate").unwrap_or(&t).trim().to_string())
    }),
    ("certificate-link", |p| {
        text_of(p, Selector::attr_contains("href", "/parentalguide/certificates").on("a"))
    }),
    ("ld-content-rating", |p| ld_field(p, |m| &m.content_rating)),
];

// ── description ──

pub const DESCRIPTION: &[Strategy<String>] = &[
    ("plot-l", |p| text_of(p, Selector::testid("plot-l"))),
    ("plot-xl", |p| text_of(p, Selector::testid("plot-xl"))),
    ("plot-xs_to_m", |p| text_of(p, Selector::testid("plot-xs_to_m"))),
    ("og-description", |p| meta_content(p.html, "og:description")),
    ("meta-description", |p| meta_content(p.html, "description")),
    ("ld-description", |p| ld_field(p, |m| &m.description)),
];

// ── Tests ──
