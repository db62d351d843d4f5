use crate::models::{Source, TransactionType};
use serde::{Deserialize, Serialize};
use url::Url;

/// One paginated newest-first index to walk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfig {
    /// First page of the index
    pub url: String,
    /// Sale or rent, copied onto every listing found through this index
    #[serde(default, alias = "type")]
    pub transaction_type: TransactionType,
}

impl IndexConfig {
    pub fn new(url: impl Into<String>, transaction_type: TransactionType) -> Self {
        Self {
            url: url.into(),
            transaction_type,
        }
    }
}

/// A listing found on an index page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub listing_ref: String,
    pub url: String,
}

/// How a site encodes the page number in its index URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `?page=N`, appended on first use
    Query(&'static str),
    /// `/page-N` path suffix before the query string
    PathSegment(&'static str),
}

/// Ephemeral position within an index walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexCursor {
    pub url: Url,
    pub page: u32,
}

impl IndexCursor {
    pub fn start(url: Url) -> Self {
        Self { url, page: 1 }
    }

    /// Cursor for the following page
    pub fn advance(&self, pagination: Pagination) -> Self {
        let page = self.page + 1;
        Self {
            url: page_url(&self.url, pagination, page),
            page,
        }
    }
}

/// Rewrite (or add) the page number in an index URL.
pub fn page_url(current: &Url, pagination: Pagination, page: u32) -> Url {
    let mut next = current.clone();
    match pagination {
        Pagination::Query(param) => {
            let kept: Vec<(String, String)> = current
                .query_pairs()
                .filter(|(key, _)| *key != param)
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            next.query_pairs_mut()
                .clear()
                .extend_pairs(kept.iter().map(|(k, v)| (&**k, &**v)))
                .append_pair(param, &page.to_string());
        }
        Pagination::PathSegment(prefix) => {
            let mut segments: Vec<String> = current
                .path_segments()
                .map(|segments| segments.filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default();
            let is_page_segment = segments.last().is_some_and(|last| {
                last.strip_prefix(prefix)
                    .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            });
            if is_page_segment {
                segments.pop();
            }
            segments.push(format!("{prefix}{page}"));
            if let Ok(mut path) = next.path_segments_mut() {
                path.clear().extend(&segments);
            }
        }
    }
    next
}

/// Description of an element to click, evaluated inside the rendered page.
///
/// Candidates come from `selectors` and from every element of the listed `tags`.
/// A candidate is clicked only when every rule below holds.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ElementMatch {
    pub selectors: Vec<String>,
    pub tags: Vec<String>,
    /// Lowercase phrases; the element text must contain one (ignored when empty)
    pub phrases: Vec<String>,
    /// Lowercase phrases that disqualify an element
    pub exclude: Vec<String>,
    /// Upper bound on the element text length when phrases are checked
    pub max_text_len: usize,
    /// Only elements whose top edge sits above this fraction of the page height
    pub max_vertical_fraction: Option<f64>,
    /// Whether `<a href>` elements with a real target may be clicked
    pub allow_links: bool,
}

impl ElementMatch {
    pub fn selectors(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            max_text_len: 80,
            ..Default::default()
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_phrases(mut self, phrases: &[&str]) -> Self {
        self.phrases = phrases.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn excluding(mut self, phrases: &[&str]) -> Self {
        self.exclude = phrases.iter().map(|s| s.to_lowercase()).collect();
        self
    }

    pub fn max_text_len(mut self, len: usize) -> Self {
        self.max_text_len = len;
        self
    }

    pub fn upper_fraction(mut self, fraction: f64) -> Self {
        self.max_vertical_fraction = Some(fraction);
        self
    }

    pub fn allow_links(mut self) -> Self {
        self.allow_links = true;
        self
    }
}

/// Static description of one site family. Everything site-specific the
/// generic walker and extractor need lives here.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub source: Source,
    /// Registrable domain; the site and all its subdomains route here
    pub host: &'static str,
    /// CSS selector for listing anchors on index pages
    pub listing_anchor: &'static str,
    /// Regex with one capture group: the listing ref inside an href
    pub listing_ref_pattern: &'static str,
    /// Regex with one capture group: the listing ref inside page text
    pub page_ref_pattern: Option<&'static str>,
    /// Regex with one capture group: the agency's own reference
    pub agency_ref_pattern: Option<&'static str>,
    pub pagination: Pagination,
    pub cookie_selectors: &'static [&'static str],
    /// Substrings every listing photo URL carries
    pub image_markers: &'static [&'static str],
    pub max_images: Option<usize>,
    /// Href substrings of links to an agency profile
    pub agency_link_markers: &'static [&'static str],
    /// Lowercase phrases on the "reveal phone" control
    pub phone_phrases: &'static [&'static str],
    pub phone_selectors: &'static [&'static str],
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn query_page_appended_then_rewritten() {
        let first = url("https://www.athome.lu/vente?sort=date_desc");
        let second = page_url(&first, Pagination::Query("page"), 2);
        assert_eq!(second.as_str(), "https://www.athome.lu/vente?sort=date_desc&page=2");
        let third = page_url(&second, Pagination::Query("page"), 3);
        assert_eq!(third.as_str(), "https://www.athome.lu/vente?sort=date_desc&page=3");
    }

    #[test]
    fn query_page_without_existing_query() {
        assert_eq!(
            page_url(&url("https://www.immotop.lu/vente/"), Pagination::Query("pag"), 2).as_str(),
            "https://www.immotop.lu/vente/?pag=2"
        );
    }

    #[test]
    fn query_param_name_is_exact() {
        assert_eq!(
            page_url(&url("https://x.lu/a?page_size=20"), Pagination::Query("page"), 2).as_str(),
            "https://x.lu/a?page_size=20&page=2"
        );
    }

    #[test]
    fn page_parameter_lands_in_query_not_fragment() {
        let next = page_url(
            &url("https://www.athome.lu/vente?sort=date_desc#results"),
            Pagination::Query("page"),
            2,
        );
        assert_eq!(next.as_str(), "https://www.athome.lu/vente?sort=date_desc&page=2#results");
        assert_eq!(next.fragment(), Some("results"));
    }

    #[test]
    fn path_segment_pagination() {
        let first = url("https://x.lu/vente?sort=new");
        let second = page_url(&first, Pagination::PathSegment("page-"), 2);
        assert_eq!(second.as_str(), "https://x.lu/vente/page-2?sort=new");
        assert_eq!(
            page_url(&second, Pagination::PathSegment("page-"), 3).as_str(),
            "https://x.lu/vente/page-3?sort=new"
        );
    }

    #[test]
    fn cursor_advances_page_counter() {
        let cursor = IndexCursor::start(url("https://x.lu/a"));
        let next = cursor.advance(Pagination::Query("page"));
        assert_eq!(next.page, 2);
        assert_eq!(next.url.as_str(), "https://x.lu/a?page=2");
    }
}
