//! Article extraction from alert email HTML.
//!
//! An alert body lists articles as title anchors carrying a fixed class,
//! each followed by an author line and a snippet block. Extraction is a pure
//! function of the HTML: the same body always yields the same records, and a
//! malformed article is reported next to the good ones instead of failing
//! the whole email.

pub mod dom;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::ExtractError;
use crate::pipeline::types::ArticleRecord;

/// Class on the anchor holding an article's title and link.
pub const TITLE_MARKER: &str = "gse_alrt_title";

/// Class on the block holding an article's abstract snippet.
pub const SNIPPET_MARKER: &str = "gse_alrt_sni";

/// Host whose links wrap the real destination in a `url` query parameter.
const REDIRECTOR_HOST: &str = "scholar.google.com";

/// Glyphs the alert template puts around author lists.
const AUTHOR_SEPARATORS: &[&str] = &["\u{2010} ", "\u{2026}"];

/// Elements that may enclose a title anchor.
const CONTAINER_TAGS: &[&str] = &["h3", "div"];

/// An article that could not be built, with its position among the anchors.
#[derive(Debug)]
pub struct SkippedArticle {
    pub position: usize,
    pub error: ExtractError,
}

/// Outcome of extracting one email body.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Records in document order.
    pub articles: Vec<ArticleRecord>,
    pub skipped: Vec<SkippedArticle>,
}

impl Extraction {
    /// Number of title anchors found.
    pub fn anchors(&self) -> usize {
        self.articles.len() + self.skipped.len()
    }
}

/// Parses alert HTML into article records.
#[derive(Debug)]
pub struct ArticleExtractor {
    title: Selector,
    snippet_class: String,
}

impl ArticleExtractor {
    /// Extractor for the standard alert template.
    pub fn new() -> Result<Self, ExtractError> {
        Self::with_markers(TITLE_MARKER, SNIPPET_MARKER)
    }

    /// Extractor for a template using other marker classes.
    pub fn with_markers(title_class: &str, snippet_class: &str) -> Result<Self, ExtractError> {
        let css = format!("a.{title_class}");
        let title = Selector::parse(&css).map_err(|e| ExtractError::InvalidSelector {
            selector: css.clone(),
            reason: format!("{e:?}"),
        })?;
        Ok(Self {
            title,
            snippet_class: snippet_class.to_string(),
        })
    }

    /// Extract every article in `html`, in document order.
    ///
    /// A body without title anchors yields an empty extraction.
    pub fn extract(&self, html: &str) -> Extraction {
        let document = Html::parse_document(html);
        let mut extraction = Extraction::default();

        for (position, anchor) in document.select(&self.title).enumerate() {
            match self.extract_one(&document, anchor) {
                Ok(article) => extraction.articles.push(article),
                Err(error) => extraction.skipped.push(SkippedArticle { position, error }),
            }
        }

        extraction
    }

    fn extract_one<'a>(
        &self,
        document: &'a Html,
        anchor: ElementRef<'a>,
    ) -> Result<ArticleRecord, ExtractError> {
        let href = anchor.value().attr("href").ok_or(ExtractError::MissingHref)?;
        let url = strip_scheme(&unwrap_redirect(href));

        let title = dom::normalized_text(anchor);
        if title.is_empty() {
            return Err(ExtractError::EmptyTitle);
        }

        // A bare anchor has no author line; the snippet scan starts at it.
        let container = dom::find_ancestor(anchor, CONTAINER_TAGS);
        let author_line = container.and_then(|c| dom::next_sibling_named(c, "div"));
        let authors = author_line
            .filter(|line| !dom::has_descendant_named(*line, "a"))
            .map(|line| clean_authors(&dom::normalized_text(line)))
            .unwrap_or_default();

        let scan_from = author_line.or(container).unwrap_or(anchor);
        let abstract_text = dom::find_following(document, scan_from, |el| {
            el.value().name() == "div" && dom::has_class(el, &self.snippet_class)
        })
        .map(dom::normalized_text)
        .unwrap_or_default();

        Ok(ArticleRecord {
            title,
            url,
            authors,
            abstract_text,
        })
    }
}

/// Resolve a redirector link to its destination; other links pass through.
pub fn unwrap_redirect(href: &str) -> String {
    if !href.contains(REDIRECTOR_HOST) {
        return href.to_string();
    }
    Url::parse(href)
        .ok()
        .and_then(|parsed| {
            parsed
                .query_pairs()
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        })
        .unwrap_or_else(|| href.to_string())
}

/// Drop a leading `https://` or `http://`.
pub fn strip_scheme(url: &str) -> String {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
        .to_string()
}

fn clean_authors(line: &str) -> String {
    let mut cleaned = line.to_string();
    for glyph in AUTHOR_SEPARATORS {
        cleaned = cleaned.replace(glyph, "");
    }
    dom::collapse_whitespace(&cleaned)
}
