use crate::scrapers::types::{ElementMatch, IndexEntry, SiteProfile};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use scraper::Html;
use std::time::Duration;
use url::Url;

/// Rendering capability: one browser tab driven by a single index walk.
///
/// Implementations must bound every wait; none of these calls may block
/// indefinitely.
#[async_trait]
pub trait PageSession: Send {
    /// Navigate to `url` and return the rendered DOM
    async fn render(&mut self, url: &str) -> Result<String>;

    /// Current DOM of the loaded page
    async fn snapshot(&mut self) -> Result<String>;

    /// Wait until `selector` matches, up to `timeout`. `false` on timeout.
    async fn wait_for(&mut self, selector: &str, timeout: Duration) -> Result<bool>;

    async fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Click the first element satisfying `target`. `false` when none did.
    async fn click(&mut self, target: &ElementMatch) -> Result<bool>;

    /// Release the tab. Called exactly once, on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Opens independent sessions, one per concurrently walked index
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageSession>>;
}

/// A site family: the generic walker and extractor plus its profile.
///
/// Adapters stay thin; hooks have defaults and are overridden only where a site
/// really differs.
pub trait SiteAdapter: Send + Sync {
    fn profile(&self) -> &SiteProfile;

    /// Compiled `listing_ref_pattern`
    fn listing_ref_regex(&self) -> &Regex;

    /// Compiled `page_ref_pattern`
    fn page_ref_regex(&self) -> Option<&Regex> {
        None
    }

    /// Compiled `agency_ref_pattern`
    fn agency_ref_regex(&self) -> Option<&Regex> {
        None
    }

    /// Name of the scraper source
    fn source_name(&self) -> &'static str {
        self.profile().source.as_str()
    }

    /// Whether this adapter owns `url`: its host is the site or a subdomain
    fn handles(&self, url: &str) -> bool {
        let host = self.profile().host;
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
            .is_some_and(|h| h == host || h.strip_suffix(host).is_some_and(|sub| sub.ends_with('.')))
    }

    fn listing_ref_from_url(&self, url: &str) -> Option<String> {
        self.listing_ref_regex()
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Resolve a possibly relative href against the page it appeared on.
    /// `None` for unparsable or non-HTTP targets.
    fn resolve_url(&self, page: &Url, href: &str) -> Option<Url> {
        page.join(href.trim())
            .ok()
            .filter(|u| u.scheme() == "http" || u.scheme() == "https")
    }

    /// Listing anchors on an index page, in document order, de-duplicated
    fn index_entries(&self, document: &Html, page: &Url) -> Vec<IndexEntry> {
        let mut entries: Vec<IndexEntry> = Vec::new();
        let Ok(selector) = scraper::Selector::parse("a[href]") else {
            return entries;
        };
        for anchor in document.select(&selector) {
            let Some(url) = anchor.value().attr("href").and_then(|href| self.resolve_url(page, href)) else {
                continue;
            };
            let Some(listing_ref) = self.listing_ref_from_url(url.path()) else {
                continue;
            };
            if entries.iter().any(|e| e.listing_ref == listing_ref) {
                continue;
            }
            entries.push(IndexEntry {
                listing_ref,
                url: url.to_string(),
            });
        }
        entries
    }

    /// Site-specific location hint, tried after the breadcrumb
    fn location_hint(&self, _document: &Html) -> Option<String> {
        None
    }
}
