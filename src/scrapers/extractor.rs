use crate::models::{ListingRecord, PhoneSource, TransactionType};
use crate::parsers::{clean_text, extract_phone_number, normalize_phone_digits};
use crate::scrapers::characteristics::{visible_text, CharacteristicScanner};
use crate::scrapers::traits::{PageSession, SiteAdapter};
use crate::scrapers::types::{ElementMatch, IndexEntry, SiteProfile};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Controls that expand a truncated description
const EXPAND_SELECTORS: &[&str] = &[
    "button[data-testid*='show-more']",
    "button[data-testid*='read-more']",
    "button[data-action*='expand']",
    "button[class*='show-more']",
    "button[class*='read-more']",
    "button[class*='voir-tout']",
    "button[class*='expand']",
    "button[aria-expanded='false']",
];

const EXPAND_PHRASES: &[&str] = &[
    "voir tout",
    "voir plus",
    "see all",
    "see more",
    "read more",
    "mehr anzeigen",
    "afficher tout",
    "afficher la suite",
    "lire la suite",
    "show more",
    "tout afficher",
];

/// Promo and navigation phrases that must never be clicked
const NAVIGATION_PHRASES: &[&str] = &[
    "en savoir plus",
    "learn more",
    "mehr erfahren",
    "go for it",
    "j'y vais",
    "get in touch",
    "request a quote",
    "demander",
    "demandez",
    "kontakt",
    "contact",
    "financer",
    "assurer",
    "publier",
    "estimer",
    "louer",
    "acheter",
    "vendre",
];

/// Only controls in the upper part of the page belong to the listing itself
const UPPER_PAGE_FRACTION: f64 = 0.7;
const EXPAND_MAX_TEXT_LEN: usize = 30;

const PHONE_TAGS: &[&str] = &["button", "a", "span", "div"];
const TEL_READ_ATTEMPTS: usize = 3;
const TEL_READ_INTERVAL: Duration = Duration::from_millis(200);

/// Breadcrumb entries that are navigation, not places
const BREADCRUMB_SKIP: &[&str] = &[
    "accueil",
    "acheter",
    "louer",
    "vente",
    "location",
    "home",
    "buy",
    "rent",
    "sell",
    "appartement",
    "maison",
    "apartment",
    "house",
    "startseite",
    "kaufen",
    "mieten",
    "wohnung",
    "haus",
];

const BREADCRUMB_PROMO_WORDS: &[&str] = &[
    "savoir", "learn", "mehr", "voir", "see", "read", "lire", "demander", "request", "j'y vais",
    "go for",
];

const MIN_DESCRIPTION_BLOCK: usize = 120;
const MAX_DESCRIPTION_BLOCK: usize = 8000;

/// Bounded waits used while rendering a detail page
#[derive(Debug, Clone)]
pub struct ExtractTimings {
    /// How long to wait for the title heading
    pub title_wait: Duration,
    /// Extra delay when the heading never showed up
    pub title_fallback_delay: Duration,
    /// Pause after an expand click
    pub settle: Duration,
    /// Pause after a phone reveal click
    pub click_settle: Duration,
}

impl Default for ExtractTimings {
    fn default() -> Self {
        Self {
            title_wait: Duration::from_secs(5),
            title_fallback_delay: Duration::from_millis(2000),
            settle: Duration::from_millis(300),
            click_settle: Duration::from_millis(500),
        }
    }
}

struct Selectors {
    h1: Selector,
    title: Selector,
    og_title: Selector,
    breadcrumb: Selector,
    headings: Selector,
    text_blocks: Selector,
    containers: Selector,
    links: Selector,
    name_tags: Selector,
    images: Selector,
    json_ld: Selector,
    tel_links: Selector,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {css}: {e:?}"))
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            h1: selector("h1")?,
            title: selector("title")?,
            og_title: selector("meta[property='og:title']")?,
            breadcrumb: selector("ol li, ol li a, nav[aria-label] a, .breadcrumb a, .breadcrumb span")?,
            headings: selector("h2, h3, h4")?,
            text_blocks: selector("p, div")?,
            containers: selector("section, div, aside")?,
            links: selector("a[href]")?,
            name_tags: selector("strong, b, h3, h4")?,
            images: selector("img")?,
            json_ld: selector("script[type='application/ld+json']")?,
            tel_links: selector("a[href^='tel:']")?,
        })
    }
}

struct Patterns {
    title_verb: Regex,
    title_split: Regex,
    title_place: Regex,
    description_heading: Regex,
    description_stop: Regex,
    agency_heading: Regex,
    agency_label: Regex,
    agent_name: Regex,
    company_suffix: Regex,
    ref_prefix: Regex,
}

impl Patterns {
    fn new() -> Result<Self> {
        let compile = |pattern: &str| Regex::new(pattern).with_context(|| format!("Invalid pattern {pattern}"));
        Ok(Self {
            title_verb: compile(
                r"(?i)^(?:acheter|louer|buy|rent|sell|vente|location|vendre|kaufen|mieten)\s+",
            )?,
            title_split: compile(r"\s*[|–]\s*")?,
            title_place: compile(r"(?:^|\s)(?:à|in|im|en)\s+(\p{Lu}[\p{L}\-]*)")?,
            description_heading: compile(r"(?i)^(?:description|beschreibung)$")?,
            description_stop: compile(
                r"(?i)demander plus d.infos|ask for more|mehr informationen|r[eé]f\s+(?:athome|agence)|ref\s+agency",
            )?,
            agency_heading: compile(
                r"(?i)published by|publiée par|veröffentlicht von|annonce publiée|annonceur|advertiser",
            )?,
            agency_label: compile(r"(?i)published|publiée|contact|annonce|listing|téléphone|phone")?,
            agent_name: compile(r"\p{Lu}\p{Ll}+\s+\p{Lu}")?,
            company_suffix: compile(
                r"([A-Z][A-Z0-9&'\-\. ]*\s(?:SARL|SÀRL|SA|SPRL|SAS|LTD|GMBH|IMMOBILIER|IMMO|REAL ESTATE))\b",
            )?,
            ref_prefix: compile(r"(?i)^r[ée]f")?,
        })
    }
}

/// Generic detail-page extractor shared by every site adapter.
pub struct DetailExtractor {
    selectors: Selectors,
    patterns: Patterns,
    characteristics: CharacteristicScanner,
    timings: ExtractTimings,
}

impl DetailExtractor {
    pub fn new(timings: ExtractTimings) -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new()?,
            patterns: Patterns::new()?,
            characteristics: CharacteristicScanner::new()?,
            timings,
        })
    }

    /// Render one detail page and turn it into a record.
    ///
    /// Missing fields stay `None`. Errors are per-listing: the caller logs
    /// them and moves on.
    pub async fn extract(
        &self,
        session: &mut dyn PageSession,
        adapter: &dyn SiteAdapter,
        entry: &IndexEntry,
        transaction_type: TransactionType,
    ) -> Result<ListingRecord> {
        let profile = adapter.profile();
        session
            .render(&entry.url)
            .await
            .with_context(|| format!("Failed to render {}", entry.url))?;
        dismiss_cookies(session, profile).await;

        match session.wait_for("h1", self.timings.title_wait).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(url = %entry.url, "Title did not appear, waiting a little longer");
                tokio::time::sleep(self.timings.title_fallback_delay).await;
            }
            Err(e) => {
                warn!(url = %entry.url, error = %e, "Title wait failed, using fixed delay");
                tokio::time::sleep(self.timings.title_fallback_delay).await;
            }
        }

        match session.click(&expand_match()).await {
            Ok(true) => {
                debug!(url = %entry.url, "Description expanded");
                tokio::time::sleep(self.timings.settle).await;
            }
            Ok(false) => {}
            Err(e) => debug!(url = %entry.url, error = %e, "Expand click failed"),
        }

        let dom = session.snapshot().await?;
        let mut record = {
            let document = Html::parse_document(&dom);
            self.parse_document(&document, adapter, &entry.url, transaction_type)
        };
        if record.listing_ref.is_empty() {
            record.listing_ref = entry.listing_ref.clone();
        }

        if record.phone_number.is_none() {
            if let Some(phone) = self.reveal_phone(session, profile).await {
                record.phone_number = Some(phone);
                record.phone_source = Some(PhoneSource::Button);
            }
        }

        info!(
            listing_ref = %record.listing_ref,
            price = ?record.headline_price(),
            location = record.location.as_deref().unwrap_or("?"),
            phone = record.phone_number.as_deref().unwrap_or("-"),
            images = record.image_urls.len(),
            "Extracted listing"
        );
        Ok(record)
    }

    /// Every field that can be read from a static DOM, in fallback order.
    pub fn parse_document(
        &self,
        document: &Html,
        adapter: &dyn SiteAdapter,
        url: &str,
        transaction_type: TransactionType,
    ) -> ListingRecord {
        let profile = adapter.profile();
        let page_text = visible_text(document.root_element());

        let mut record = ListingRecord::new(
            adapter
                .listing_ref_from_url(url)
                .or_else(|| capture(adapter.page_ref_regex(), &page_text))
                .unwrap_or_default(),
        );
        record.source = Some(profile.source);
        record.transaction_type = transaction_type;
        record.listing_url = Some(url.to_string());
        record.agency_ref = capture(adapter.agency_ref_regex(), &page_text);

        record.title = self.title(document);
        record.location = self
            .breadcrumb_location(document)
            .or_else(|| adapter.location_hint(document))
            .or_else(|| record.title.as_deref().and_then(|t| self.title_location(t)));
        record.description = self.description(document);

        if let Some(phone) = record.description.as_deref().and_then(extract_phone_number) {
            record.phone_number = Some(phone);
            record.phone_source = Some(PhoneSource::Description);
        }

        self.characteristics.scan(document, &mut record);
        let page = Url::parse(url).ok();
        self.agency(document, adapter, page.as_ref(), &mut record);
        record.image_urls = self.image_urls(document, profile);
        record
    }

    fn title(&self, document: &Html) -> Option<String> {
        if let Some(h1) = document.select(&self.selectors.h1).next() {
            let text = visible_text(h1);
            if !text.is_empty() {
                return Some(text);
            }
        }

        let from_title_tag = document.select(&self.selectors.title).next().and_then(|t| {
            let text = clean_text(&t.text().collect::<String>());
            let head = self.patterns.title_split.split(&text).next()?.to_string();
            let stripped = clean_text(&self.patterns.title_verb.replace(&head, ""));
            (!stripped.is_empty()).then_some(stripped)
        });
        if from_title_tag.is_some() {
            debug!("Title taken from <title>");
            return from_title_tag;
        }

        document
            .select(&self.selectors.og_title)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(clean_text)
            .filter(|t| !t.is_empty())
    }

    /// Last breadcrumb entry that names a place
    fn breadcrumb_location(&self, document: &Html) -> Option<String> {
        let crumbs: Vec<String> = document
            .select(&self.selectors.breadcrumb)
            .map(visible_text)
            .collect();
        crumbs.into_iter().rev().find(|text| {
            let lower = text.to_lowercase();
            text.chars().count() > 2
                && !BREADCRUMB_SKIP.contains(&lower.as_str())
                && !self.patterns.ref_prefix.is_match(text)
                && !BREADCRUMB_PROMO_WORDS.iter().any(|w| lower.contains(w))
        })
    }

    /// "Appartement 3 chambres à Schuttrange" → "Schuttrange"
    fn title_location(&self, title: &str) -> Option<String> {
        self.patterns
            .title_place
            .captures(title)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn description(&self, document: &Html) -> Option<String> {
        let heading = document
            .select(&self.selectors.headings)
            .find(|h| self.patterns.description_heading.is_match(&visible_text(*h)));

        if let Some(heading) = heading {
            let mut parts = Vec::new();
            for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
                if matches!(sibling.value().name(), "h2" | "h3" | "h4") {
                    break;
                }
                let text = visible_text(sibling);
                if self.patterns.description_stop.is_match(&text) {
                    break;
                }
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            if !parts.is_empty() {
                return Some(clean_text(&parts.join("\n")));
            }
        }

        debug!("No description heading, falling back to largest text block");
        document
            .select(&self.selectors.text_blocks)
            .filter(|block| {
                !block.ancestors().filter_map(ElementRef::wrap).any(|a| {
                    matches!(a.value().name(), "nav" | "header" | "footer")
                })
            })
            .map(visible_text)
            .filter(|text| {
                let len = text.chars().count();
                len > MIN_DESCRIPTION_BLOCK
                    && len < MAX_DESCRIPTION_BLOCK
                    && !text.contains("window.")
                    && !text.contains("AT_HOME_APP")
            })
            .max_by_key(|text| text.chars().count())
    }

    fn agency(&self, document: &Html, adapter: &dyn SiteAdapter, page: Option<&Url>, record: &mut ListingRecord) {
        let profile = adapter.profile();

        // The innermost block carrying the "published by" heading
        let section = document
            .select(&self.selectors.containers)
            .map(|el| (el, visible_text(el)))
            .filter(|(_, text)| self.patterns.agency_heading.is_match(text))
            .min_by_key(|(_, text)| text.chars().count())
            .map(|(el, _)| el);

        if let Some(section) = section {
            let profile_link = section.select(&self.selectors.links).find(|a| {
                a.value()
                    .attr("href")
                    .is_some_and(|href| profile.agency_link_markers.iter().any(|m| href.contains(m)))
            });
            if let Some(link) = profile_link {
                let name = visible_text(link);
                if !name.is_empty() {
                    record.agency_name = Some(name);
                }
                record.agency_url = link
                    .value()
                    .attr("href")
                    .zip(page)
                    .and_then(|(href, page)| adapter.resolve_url(page, href))
                    .map(String::from);
            }

            if record.agency_name.is_none() {
                record.agency_name = section
                    .select(&self.selectors.name_tags)
                    .map(visible_text)
                    .find(|text| {
                        let len = text.chars().count();
                        len > 3 && len < 100 && !self.patterns.agency_label.is_match(text)
                    });
            }

            let images: Vec<ElementRef<'_>> = section.select(&self.selectors.images).collect();
            if let Some(src) = images.first().and_then(|logo| logo.value().attr("src")) {
                if !src.is_empty() && !src.starts_with("data:") {
                    record.agency_logo_url = page
                        .and_then(|page| adapter.resolve_url(page, src))
                        .map(String::from);
                }
            }
            record.agent_name = images.iter().skip(1).find_map(|img| {
                let alt = img.value().attr("alt")?.trim();
                let len = alt.chars().count();
                (len > 3 && len < 60 && self.patterns.agent_name.is_match(alt)).then(|| alt.to_string())
            });
        }

        if record.agency_name.is_none() {
            record.agency_name = document
                .select(&self.selectors.json_ld)
                .find_map(|script| structured_seller(&script.text().collect::<String>()));
            if record.agency_name.is_some() {
                debug!("Agency taken from structured data");
            }
        }

        if record.agency_name.is_none() {
            record.agency_name = document
                .select(&self.selectors.images)
                .filter(|img| {
                    img.value()
                        .attr("src")
                        .is_some_and(|src| src.to_lowercase().contains("logo"))
                })
                .filter_map(|img| img.parent().and_then(ElementRef::wrap))
                .find_map(|parent| {
                    let text = visible_text(parent);
                    let name = self.patterns.company_suffix.captures(&text)?.get(1)?.as_str().trim();
                    (name.chars().count() < 60).then(|| name.to_string())
                });
        }
    }

    /// Photo URLs under the site's CDN markers, de-duplicated, in page order
    fn image_urls(&self, document: &Html, profile: &SiteProfile) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for img in document.select(&self.selectors.images) {
            let found = ["src", "data-src", "data-lazy-src", "data-original"]
                .iter()
                .filter_map(|attr| img.value().attr(attr))
                .map(str::trim)
                .find(|src| {
                    !src.is_empty()
                        && !src.starts_with("data:")
                        && profile.image_markers.iter().all(|m| src.contains(m))
                });
            if let Some(src) = found {
                if !urls.iter().any(|u| u == src) {
                    urls.push(src.to_string());
                }
            }
        }
        if let Some(max) = profile.max_images {
            urls.truncate(max);
        }
        urls
    }

    /// Click a "show number" control and read the revealed `tel:` link.
    async fn reveal_phone(&self, session: &mut dyn PageSession, profile: &SiteProfile) -> Option<String> {
        if let Some(phone) = self.read_tel_link(session).await {
            return Some(phone);
        }

        let by_selector = ElementMatch::selectors(profile.phone_selectors)
            .excluding(NAVIGATION_PHRASES)
            .upper_fraction(UPPER_PAGE_FRACTION);
        let by_text = ElementMatch::selectors(&[])
            .with_tags(PHONE_TAGS)
            .with_phrases(profile.phone_phrases)
            .excluding(NAVIGATION_PHRASES)
            .upper_fraction(UPPER_PAGE_FRACTION);

        for target in [by_selector, by_text] {
            match session.click(&target).await {
                Ok(true) => {
                    tokio::time::sleep(self.timings.click_settle).await;
                    if let Some(phone) = self.read_tel_link(session).await {
                        return Some(phone);
                    }
                }
                Ok(false) => {}
                Err(e) => debug!(error = %e, "Phone reveal click failed"),
            }
        }
        None
    }

    async fn read_tel_link(&self, session: &mut dyn PageSession) -> Option<String> {
        for attempt in 0..TEL_READ_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(TEL_READ_INTERVAL).await;
            }
            let dom = match session.snapshot().await {
                Ok(dom) => dom,
                Err(e) => {
                    debug!(error = %e, "Snapshot failed while reading tel link");
                    return None;
                }
            };
            let phone = {
                let document = Html::parse_document(&dom);
                document
                    .select(&self.selectors.tel_links)
                    .filter_map(|a| a.value().attr("href"))
                    .find_map(|href| normalize_phone_digits(href.trim_start_matches("tel:")))
            };
            if phone.is_some() {
                return phone;
            }
        }
        None
    }
}

/// Consent banners hide the page; clicking them is best effort.
pub async fn dismiss_cookies(session: &mut dyn PageSession, profile: &SiteProfile) {
    let consent = ElementMatch::selectors(profile.cookie_selectors);
    match session.click(&consent).await {
        Ok(true) => debug!("Cookie banner dismissed"),
        Ok(false) => {}
        Err(e) => debug!(error = %e, "Cookie dismissal failed"),
    }
}

fn expand_match() -> ElementMatch {
    ElementMatch::selectors(EXPAND_SELECTORS)
        .with_tags(&["button"])
        .with_phrases(EXPAND_PHRASES)
        .excluding(NAVIGATION_PHRASES)
        .max_text_len(EXPAND_MAX_TEXT_LEN)
        .upper_fraction(UPPER_PAGE_FRACTION)
}

fn capture(pattern: Option<&Regex>, text: &str) -> Option<String> {
    pattern?
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Seller or provider name from a JSON-LD block
fn structured_seller(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw.trim()).ok()?;
    let nodes = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    nodes.iter().find_map(|node| {
        ["seller", "provider"].iter().find_map(|key| {
            node.get(key)?
                .get("name")?
                .as_str()
                .map(clean_text)
                .filter(|name| !name.is_empty())
        })
    })
}
