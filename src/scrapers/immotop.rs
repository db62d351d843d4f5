use crate::models::Source;
use crate::parsers::clean_text;
use crate::scrapers::traits::SiteAdapter;
use crate::scrapers::types::{Pagination, SiteProfile};
use anyhow::{Context, Result};
use regex::Regex;
use scraper::{Html, Selector};

const AGENCY_REF_PATTERN: &str = r"(?i)r[ée]f[ée]rence\s*:\s*(\S+)";

const PROFILE: SiteProfile = SiteProfile {
    source: Source::Immotop,
    host: "immotop.lu",
    listing_anchor: "a[href*='/annonces/']",
    listing_ref_pattern: r"/annonces/(\d+)",
    page_ref_pattern: None,
    agency_ref_pattern: Some(AGENCY_REF_PATTERN),
    pagination: Pagination::Query("pag"),
    cookie_selectors: &[
        "button#didomi-notice-agree-button",
        "[id*='onetrust-accept']",
        "button[aria-label*='accepter' i]",
    ],
    image_markers: &["pic.immotop.lu"],
    max_images: Some(20),
    agency_link_markers: &["/agences-immobilieres/"],
    phone_phrases: &["afficher le téléphone", "show phone", "voir le téléphone"],
    phone_selectors: &["[data-testid*='phone']", "[class*='phone']"],
};

/// Longest subtitle accepted as a location
const MAX_SUBTITLE_LEN: usize = 100;

/// immotop.lu: `/annonces/<ref>/` listings, `?pag=N` index pagination
pub struct ImmotopAdapter {
    listing_ref: Regex,
    agency_ref: Regex,
    heading_sibling: Selector,
}

impl ImmotopAdapter {
    pub fn new() -> Result<Self> {
        let listing_ref = Regex::new(PROFILE.listing_ref_pattern)
            .context("Invalid immotop listing ref pattern")?;
        let agency_ref =
            Regex::new(AGENCY_REF_PATTERN).context("Invalid immotop agency ref pattern")?;
        let heading_sibling = Selector::parse("h1 + *")
            .map_err(|e| anyhow::anyhow!("Invalid immotop subtitle selector: {e:?}"))?;
        Ok(Self {
            listing_ref,
            agency_ref,
            heading_sibling,
        })
    }
}

impl SiteAdapter for ImmotopAdapter {
    fn profile(&self) -> &SiteProfile {
        &PROFILE
    }

    fn listing_ref_regex(&self) -> &Regex {
        &self.listing_ref
    }

    fn agency_ref_regex(&self) -> Option<&Regex> {
        Some(&self.agency_ref)
    }

    /// immotop prints the town right under the heading
    fn location_hint(&self, document: &Html) -> Option<String> {
        let subtitle = document.select(&self.heading_sibling).next()?;
        let text = clean_text(&subtitle.text().collect::<Vec<_>>().join(" "));
        (!text.is_empty() && text.chars().count() < MAX_SUBTITLE_LEN).then_some(text)
    }
}
