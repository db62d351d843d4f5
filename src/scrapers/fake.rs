//! Scripted in-memory page session for tests.
//!
//! Each URL maps to a list of DOM stages. `render` loads stage 0 and every
//! successful click moves to the next stage, which is enough to model
//! "reveal phone" and "expand description" interactions.

use crate::scrapers::traits::{PageSession, SessionFactory};
use crate::scrapers::types::ElementMatch;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub type SessionLog = Arc<Mutex<Vec<String>>>;

#[derive(Clone, Default)]
pub struct FakeSession {
    pages: HashMap<String, Vec<String>>,
    current: Option<(String, usize)>,
    log: SessionLog,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: &str, stages: &[&str]) -> Self {
        self.pages
            .insert(url.to_string(), stages.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn log(&self) -> SessionLog {
        self.log.clone()
    }

    fn record(&self, line: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(line);
        }
    }

    fn current_dom(&self) -> Result<String> {
        let (url, stage) = self.current.as_ref().ok_or_else(|| anyhow!("no page loaded"))?;
        self.pages
            .get(url)
            .and_then(|stages| stages.get(*stage))
            .cloned()
            .ok_or_else(|| anyhow!("no stage {stage} for {url}"))
    }
}

/// Whether the DOM contains an element satisfying `target`, mirroring the
/// rules the browser-side click script applies (vertical position excepted).
pub fn matches_element(dom: &str, target: &ElementMatch) -> bool {
    let document = Html::parse_document(dom);
    let mut candidates: Vec<ElementRef<'_>> = Vec::new();
    for css in target.selectors.iter().chain(target.tags.iter()) {
        if let Ok(selector) = Selector::parse(css) {
            candidates.extend(document.select(&selector));
        }
    }
    candidates.into_iter().any(|el| {
        let text = el.text().collect::<String>().trim().to_lowercase();
        if !target.allow_links && el.value().name() == "a" {
            let href = el.value().attr("href").unwrap_or("").trim();
            if !href.is_empty() && href != "#" && !href.starts_with("javascript") {
                return false;
            }
        }
        if target.exclude.iter().any(|p| text.contains(p.as_str())) {
            return false;
        }
        if target.phrases.is_empty() {
            return true;
        }
        !text.is_empty()
            && text.chars().count() <= target.max_text_len
            && target.phrases.iter().any(|p| text.contains(p.as_str()))
    })
}

#[async_trait]
impl PageSession for FakeSession {
    async fn render(&mut self, url: &str) -> Result<String> {
        self.record(format!("render {url}"));
        if !self.pages.contains_key(url) {
            return Err(anyhow!("no page scripted for {url}"));
        }
        self.current = Some((url.to_string(), 0));
        self.current_dom()
    }

    async fn snapshot(&mut self) -> Result<String> {
        self.current_dom()
    }

    async fn wait_for(&mut self, selector: &str, _timeout: Duration) -> Result<bool> {
        let dom = self.current_dom()?;
        let selector = Selector::parse(selector).map_err(|e| anyhow!("bad selector: {e:?}"))?;
        let found = Html::parse_document(&dom).select(&selector).next().is_some();
        Ok(found)
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.record("scroll".to_string());
        Ok(())
    }

    async fn click(&mut self, target: &ElementMatch) -> Result<bool> {
        let dom = self.current_dom()?;
        if !matches_element(&dom, target) {
            return Ok(false);
        }
        self.record(format!("clicked {:?}", target.phrases));
        if let Some((url, stage)) = self.current.as_mut() {
            let last = self.pages.get(url.as_str()).map_or(0, |s| s.len().saturating_sub(1));
            *stage = (*stage + 1).min(last);
        }
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        self.record("close".to_string());
        Ok(())
    }
}

/// Hands out clones of one scripted session
pub struct FakeFactory {
    pub session: FakeSession,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self) -> Result<Box<dyn PageSession>> {
        Ok(Box::new(self.session.clone()))
    }
}
