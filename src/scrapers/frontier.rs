use crate::scrapers::extractor::dismiss_cookies;
use crate::scrapers::traits::{PageSession, SiteAdapter};
use crate::scrapers::types::{IndexCursor, IndexEntry};
use anyhow::{Context, Result};
use scraper::Html;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    FetchingPage,
    Done,
}

/// Newest-first walk over one paginated index.
///
/// Pages are fetched lazily, one per `next_page` call, so a caller that stops
/// early never renders the pages it did not need.
pub struct FrontierWalker<'a> {
    adapter: &'a dyn SiteAdapter,
    cursor: IndexCursor,
    state: WalkState,
    seen: HashSet<String>,
    max_pages: u32,
    anchor_wait: Duration,
    settle: Duration,
}

impl<'a> FrontierWalker<'a> {
    pub fn new(
        adapter: &'a dyn SiteAdapter,
        index_url: &str,
        max_pages: u32,
        anchor_wait: Duration,
        settle: Duration,
    ) -> Result<Self> {
        let start = Url::parse(index_url).with_context(|| format!("Invalid index URL {index_url}"))?;
        let state = if max_pages == 0 {
            WalkState::Done
        } else {
            WalkState::FetchingPage
        };
        Ok(Self {
            adapter,
            cursor: IndexCursor::start(start),
            state,
            seen: HashSet::new(),
            max_pages,
            anchor_wait,
            settle,
        })
    }

    /// Current page number (1-based)
    pub fn page(&self) -> u32 {
        self.cursor.page
    }

    pub fn is_done(&self) -> bool {
        self.state == WalkState::Done
    }

    /// Entries first seen on the next index page, in page order.
    /// `None` once the walk is over.
    pub async fn next_page(&mut self, session: &mut dyn PageSession) -> Option<Vec<IndexEntry>> {
        if self.state == WalkState::Done {
            return None;
        }
        let profile = self.adapter.profile();
        let page = self.cursor.page;
        info!(page, url = %self.cursor.url, "Index page");

        if let Err(e) = session.render(self.cursor.url.as_str()).await {
            warn!(page, url = %self.cursor.url, error = %e, "Index page failed to render, stopping walk");
            self.state = WalkState::Done;
            return None;
        }
        if page == 1 {
            dismiss_cookies(session, profile).await;
        }

        match session.wait_for(profile.listing_anchor, self.anchor_wait).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(page, "No listing links on index page, stopping walk");
                self.state = WalkState::Done;
                return None;
            }
            Err(e) => {
                warn!(page, error = %e, "Waiting for listing links failed, stopping walk");
                self.state = WalkState::Done;
                return None;
            }
        }

        if let Err(e) = session.scroll_to_bottom().await {
            debug!(page, error = %e, "Scroll failed");
        }
        tokio::time::sleep(self.settle).await;

        let dom = match session.snapshot().await {
            Ok(dom) => dom,
            Err(e) => {
                warn!(page, error = %e, "Index snapshot failed, stopping walk");
                self.state = WalkState::Done;
                return None;
            }
        };
        let entries = {
            let document = Html::parse_document(&dom);
            self.adapter.index_entries(&document, &self.cursor.url)
        };

        let fresh: Vec<IndexEntry> = entries
            .into_iter()
            .filter(|entry| self.seen.insert(entry.listing_ref.clone()))
            .collect();
        info!(page, new = fresh.len(), total = self.seen.len(), "Index page parsed");

        if fresh.is_empty() || page >= self.max_pages {
            self.state = WalkState::Done;
        } else {
            self.cursor = self.cursor.advance(profile.pagination);
        }

        if fresh.is_empty() {
            None
        } else {
            Some(fresh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::athome::AthomeAdapter;
    use crate::scrapers::fake::FakeSession;

    const INDEX: &str = "https://www.athome.lu/vente?sort=date_desc";

    fn index_page(ids: &[u32]) -> String {
        let anchors: String = ids
            .iter()
            .map(|id| format!(r#"<a href="/vente/appartement/id-{id}.html">{id}</a>"#))
            .collect();
        format!("<html><body>{anchors}</body></html>")
    }

    fn walker(adapter: &AthomeAdapter, max_pages: u32) -> FrontierWalker<'_> {
        FrontierWalker::new(adapter, INDEX, max_pages, Duration::from_millis(1), Duration::from_millis(1)).unwrap()
    }

    fn refs(entries: &[IndexEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.listing_ref.as_str()).collect()
    }

    #[tokio::test]
    async fn walks_pages_until_bound() {
        let adapter = AthomeAdapter::new().unwrap();
        let p1 = index_page(&[9, 8, 7]);
        let p2 = index_page(&[7, 6, 5]);
        let mut session = FakeSession::new()
            .with_page(INDEX, &[&p1])
            .with_page(&format!("{INDEX}&page=2"), &[&p2]);
        let mut walk = walker(&adapter, 2);

        let first = walk.next_page(&mut session).await.unwrap();
        assert_eq!(refs(&first), ["9", "8", "7"]);
        let second = walk.next_page(&mut session).await.unwrap();
        assert_eq!(refs(&second), ["6", "5"]);
        assert!(walk.is_done());
        assert!(walk.next_page(&mut session).await.is_none());
    }

    #[tokio::test]
    async fn page_without_new_ids_ends_walk() {
        let adapter = AthomeAdapter::new().unwrap();
        let p1 = index_page(&[3, 2]);
        let mut session = FakeSession::new()
            .with_page(INDEX, &[&p1])
            .with_page(&format!("{INDEX}&page=2"), &[&p1]);
        let mut walk = walker(&adapter, 5);

        assert!(walk.next_page(&mut session).await.is_some());
        assert!(walk.next_page(&mut session).await.is_none());
        assert!(walk.is_done());
    }

    #[tokio::test]
    async fn missing_anchors_end_walk() {
        let adapter = AthomeAdapter::new().unwrap();
        let mut session = FakeSession::new().with_page(INDEX, &["<html><body>Maintenance</body></html>"]);
        let mut walk = walker(&adapter, 3);

        assert!(walk.next_page(&mut session).await.is_none());
        assert!(walk.is_done());
    }

    #[tokio::test]
    async fn render_failure_ends_walk() {
        let adapter = AthomeAdapter::new().unwrap();
        let mut session = FakeSession::new();
        let mut walk = walker(&adapter, 3);

        assert!(walk.next_page(&mut session).await.is_none());
        assert!(walk.is_done());
    }
    #[tokio::test]
    async fn fragment_index_paginates_in_query() {
        let adapter = AthomeAdapter::new().unwrap();
        let index = "https://www.athome.lu/vente?sort=date_desc#results";
        let mut session = FakeSession::new()
            .with_page(index, &[&index_page(&[9, 8])])
            .with_page("https://www.athome.lu/vente?sort=date_desc&page=2#results", &[&index_page(&[7])]);
        let mut walk =
            FrontierWalker::new(&adapter, index, 2, Duration::from_millis(1), Duration::from_millis(1)).unwrap();

        assert_eq!(refs(&walk.next_page(&mut session).await.unwrap()), ["9", "8"]);
        assert_eq!(refs(&walk.next_page(&mut session).await.unwrap()), ["7"]);
    }

    #[tokio::test]
    async fn relative_hrefs_resolve_against_index_page() {
        let adapter = AthomeAdapter::new().unwrap();
        let index = "https://www.athome.lu/vente/appartement/?sort=date_desc";
        let page = r#"<html><body><a href="./id-5.html">5</a><a href="../maison/id-6.html">6</a></body></html>"#;
        let mut session = FakeSession::new().with_page(index, &[page]);
        let mut walk =
            FrontierWalker::new(&adapter, index, 1, Duration::from_millis(1), Duration::from_millis(1)).unwrap();

        let entries = walk.next_page(&mut session).await.unwrap();
        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://www.athome.lu/vente/appartement/id-5.html",
                "https://www.athome.lu/vente/maison/id-6.html",
            ]
        );
    }

    #[test]
    fn invalid_index_url_is_rejected() {
        let adapter = AthomeAdapter::new().unwrap();
        assert!(FrontierWalker::new(&adapter, "not a url", 1, Duration::ZERO, Duration::ZERO).is_err());
    }
}
