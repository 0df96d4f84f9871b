pub mod fields;
pub mod html;
pub mod ld;
pub mod normalize;

use crate::error::ExtractionError;
use crate::model::MovieRecord;
use fields::{select, Page, Strategy};
use normalize::{cap_cast, collapse_whitespace, dedupe_list, validate_rating, validate_year};

/// Detail page HTML → normalized record.
///
/// Each field runs its own strategy list, so markup drift on one field only
/// empties that field. The title may come back empty; callers that know the
/// candidate label fill it in.
pub fn extract(content: &str) -> Result<MovieRecord, ExtractionError> {
    if content.trim().is_empty() {
        return Err(ExtractionError::EmptyPage);
    }
    let page = Page::new(content);
    if !page.looks_like_detail_page() {
        return Err(ExtractionError::NotADetailPage);
    }

    let year = scalar(&page, "year", fields::YEAR);
    let rating = scalar(&page, "rating", fields::RATING);

    Ok(MovieRecord {
        title: scalar(&page, "title", fields::TITLE),
        year: validate_year(&year).unwrap_or_default(),
        rating: validate_rating(&rating).unwrap_or_default(),
        genres: list(&page, "genres", fields::GENRES),
        directors: list(&page, "directors", fields::DIRECTORS),
        writers: list(&page, "writers", fields::WRITERS),
        cast: cap_cast(list(&page, "cast", fields::CAST)),
        certificate: scalar(&page, "certificate", fields::CERTIFICATE),
        description: scalar(&page, "description", fields::DESCRIPTION),
    })
}

fn scalar(page: &Page<'_>, field: &str, strategies: &[Strategy<String>]) -> String {
    select(page, field, strategies)
        .map(|v| clean(&v))
        .unwrap_or_default()
}

fn list(page: &Page<'_>, field: &str, strategies: &[Strategy<Vec<String>>]) -> Vec<String> {
    select(page, field, strategies)
        .map(|v| dedupe_list(v.iter().map(|s| clean(s)).collect()))
        .unwrap_or_default()
}

/// Values from JSON-LD and meta tags may still carry entities.
fn clean(s: &str) -> String {
    collapse_whitespace(&html::decode_entities(s))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn inception_primary_markup() {
        let r = extract(&fixture("inception")).unwrap();
        assert_eq!(r.title, "Inception");
        assert_eq!(r.year, "2010");
        assert_eq!(r.rating, "8.8");
        assert_eq!(r.genres, vec!["Action", "Adventure", "Sci-Fi"]);
        assert_eq!(r.directors, vec!["Christopher Nolan"]);
        assert_eq!(r.writers, vec!["Christopher Nolan"]);
        assert_eq!(r.certificate, "PG-13");
        assert!(r.description.starts_with("A thief who steals corporate secrets"));
        assert_eq!(r.cast.first().map(String::as_str), Some("Leonardo DiCaprio"));
        assert!(r.cast.contains(&"Elliot Page".to_string()));
    }

    #[test]
    fn cast_is_deduplicated_and_capped() {
        let r = extract(&fixture("inception")).unwrap();
        assert_eq!(r.cast.len(), normalize::MAX_CAST);
        let mut sorted = r.cast.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), r.cast.len());
    }

    #[test]
    fn secondary_markup_fills_missing_primary() {
        let r = extract(&fixture("heat_fallback")).unwrap();
        assert_eq!(r.title, "Heat");
        assert_eq!(r.year, "1995");
        assert_eq!(r.rating, "8.3");
        assert_eq!(r.genres, vec!["Action", "Crime", "Drama"]);
        assert_eq!(r.directors, vec!["Michael Mann"]);
        assert_eq!(r.writers, vec!["Michael Mann"]);
        assert_eq!(r.cast, vec!["Al Pacino", "Robert De Niro", "Val Kilmer"]);
        assert_eq!(r.certificate, "R");
        assert_eq!(r.description, "A group of high-end professional thieves start to feel the heat from the LAPD.");
    }

    #[test]
    fn structured_data_is_last_resort() {
        let r = extract(&fixture("ld_only")).unwrap();
        assert_eq!(r.title, "Léon: The Professional");
        assert_eq!(r.year, "1994");
        assert_eq!(r.rating, "8.5");
        assert_eq!(r.genres, vec!["Action", "Crime", "Drama"]);
        assert_eq!(r.directors, vec!["Luc Besson"]);
        assert_eq!(r.writers, vec!["Luc Besson"]);
        assert_eq!(r.cast, vec!["Jean Reno", "Gary Oldman", "Natalie Portman"]);
        assert_eq!(r.certificate, "R");
        assert_eq!(r.description, "12-year-old Mathilda is reluctantly taken in by Léon.");
    }

    #[test]
    fn out_of_range_rating_is_dropped() {
        let html = r#"<html><head><meta property="og:type" content="video.movie"></head><body>
            <h1 data-testid="hero-title-block__title">Broken Rating</h1>
            <span data-testid="hero-rating-bar__aggregate-rating__score"><span>15.0</span><span>/10</span></span>
            </body></html>"#;
        let r = extract(html).unwrap();
        assert_eq!(r.title, "Broken Rating");
        assert!(r.rating.is_empty());
    }

    #[test]
    fn missing_fields_stay_empty() {
        let html = r#"<meta property="og:type" content="video.movie"><h1 data-testid="hero__pageTitle">Sparse</h1>"#;
        let r = extract(html).unwrap();
        assert_eq!(r.title, "Sparse");
        assert!(r.year.is_empty());
        assert!(r.genres.is_empty());
        assert!(r.cast.is_empty());
        assert!(r.description.is_empty());
    }

    #[test]
    fn empty_and_foreign_pages_fail() {
        assert!(matches!(extract("  \n "), Err(ExtractionError::EmptyPage)));
        assert!(matches!(
            extract("<html><body><h1>Service Unavailable</h1></body></html>"),
            Err(ExtractionError::NotADetailPage)
        ));
    }
}
