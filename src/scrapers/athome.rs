use crate::models::Source;
use crate::scrapers::traits::SiteAdapter;
use crate::scrapers::types::{Pagination, SiteProfile};
use anyhow::{Context, Result};
use regex::Regex;

const PAGE_REF_PATTERN: &str = r"(?i)r[ée]f\.?\s+(?:athome)?\s*:?\s*(\d{5,})";
const AGENCY_REF_PATTERN: &str =
    r"(?i)(?:r[ée]f\.?\s+agence|agency\s+ref(?:erence)?)\s*:?\s*([A-Za-z0-9][A-Za-z0-9\-_/.]*)";

const PROFILE: SiteProfile = SiteProfile {
    source: Source::Athome,
    host: "athome.lu",
    listing_anchor: "a[href*='/id-']",
    listing_ref_pattern: r"/id-(\d+)\.html",
    page_ref_pattern: Some(PAGE_REF_PATTERN),
    agency_ref_pattern: Some(AGENCY_REF_PATTERN),
    pagination: Pagination::Query("page"),
    cookie_selectors: &[
        "button#didomi-notice-agree-button",
        "#didomi-notice-agree-button",
        "[id*='onetrust-accept']",
        "button[aria-label*='accept' i]",
        "button[aria-label*='accepter' i]",
    ],
    image_markers: &["static.athome.eu", "/annonces"],
    max_images: None,
    agency_link_markers: &["/agence", "/realestate-agency", "/immobilier"],
    phone_phrases: &[
        "show phone number",
        "afficher le numéro",
        "voir les coordonnées",
        "voir le numéro",
        "afficher numéro",
        "numéro de téléphone",
        "show phone",
        "voir coordonnées",
        "telefonnummer anzeigen",
    ],
    phone_selectors: &[
        "[data-testid*='phone']",
        "[data-action*='phone']",
        "[aria-label*='numéro' i]",
        "[aria-label*='number' i]",
        "[class*='reveal-phone']",
        "[class*='show-phone']",
    ],
};

/// atHome.lu: `/id-<ref>.html` listings, `?page=N` index pagination
pub struct AthomeAdapter {
    listing_ref: Regex,
    page_ref: Regex,
    agency_ref: Regex,
}

impl AthomeAdapter {
    pub fn new() -> Result<Self> {
        Ok(Self {
            listing_ref: Regex::new(PROFILE.listing_ref_pattern)
                .context("Invalid athome listing ref pattern")?,
            page_ref: Regex::new(PAGE_REF_PATTERN).context("Invalid athome page ref pattern")?,
            agency_ref: Regex::new(AGENCY_REF_PATTERN).context("Invalid athome agency ref pattern")?,
        })
    }
}

impl SiteAdapter for AthomeAdapter {
    fn profile(&self) -> &SiteProfile {
        &PROFILE
    }

    fn listing_ref_regex(&self) -> &Regex {
        &self.listing_ref
    }

    fn page_ref_regex(&self) -> Option<&Regex> {
        Some(&self.page_ref)
    }

    fn agency_ref_regex(&self) -> Option<&Regex> {
        Some(&self.agency_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn ref_from_detail_url() {
        let adapter = AthomeAdapter::new().unwrap();
        assert_eq!(
            adapter.listing_ref_from_url("https://www.athome.lu/vente/appartement/luxembourg/id-8983182.html"),
            Some("8983182".to_string())
        );
        assert_eq!(adapter.listing_ref_from_url("https://www.athome.lu/vente"), None);
    }

    #[test]
    fn index_entries_are_ordered_and_unique() {
        let adapter = AthomeAdapter::new().unwrap();
        let html = Html::parse_document(
            r#"<html><body>
            <a href="/vente/appartement/id-300.html">A</a>
            <a href="/vente/appartement/id-300.html"><img></a>
            <a href="https://www.athome.lu/vente/maison/id-200.html">B</a>
            <a href="/vente/agence/xyz">agency</a>
            <a href="/location/studio/id-100.html">C</a>
            </body></html>"#,
        );
        let page = url::Url::parse("https://www.athome.lu/vente?sort=date_desc").unwrap();
        let entries = adapter.index_entries(&html, &page);
        let refs: Vec<_> = entries.iter().map(|e| e.listing_ref.as_str()).collect();
        assert_eq!(refs, ["300", "200", "100"]);
        assert_eq!(entries[0].url, "https://www.athome.lu/vente/appartement/id-300.html");
    }

    #[test]
    fn page_and_agency_refs() {
        let adapter = AthomeAdapter::new().unwrap();
        let text = "Réf atHome 8983182 Réf agence : VE-1234";
        let page_ref = adapter.page_ref_regex().unwrap().captures(text).unwrap();
        assert_eq!(&page_ref[1], "8983182");
        let agency_ref = adapter.agency_ref_regex().unwrap().captures(text).unwrap();
        assert_eq!(&agency_ref[1], "VE-1234");
    }

    #[test]
    fn handles_only_its_host() {
        let adapter = AthomeAdapter::new().unwrap();
        assert!(adapter.handles("https://www.athome.lu/location?sort=date_desc"));
        assert!(!adapter.handles("https://www.immotop.lu/vente/"));
        assert!(adapter.handles("https://athome.lu/vente"));
        assert!(!adapter.handles("https://www.immotop.lu/vente/?from=www.athome.lu"));
        assert!(!adapter.handles("https://notathome.lu/vente"));
    }
}
