use crate::harvest::probe::TitleProbe;
use crate::images::ImageFetcher;
use crate::models::ListingRecord;
use crate::scrapers::types::{IndexConfig, IndexEntry};
use crate::scrapers::{DetailExtractor, FrontierWalker, PageSession, SiteAdapter};
use crate::store::{ListingStore, UpsertOutcome};
use anyhow::{Context, Result};
use serde::Serialize;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-index outcome counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub stopped_early: u64,
}

impl RunCounters {
    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Skipped => self.skipped += 1,
        }
    }
}

impl AddAssign for RunCounters {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.stopped_early += other.stopped_early;
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub max_pages: u32,
    /// Consecutive unchanged known listings that end the walk
    pub stop_after_known: u32,
    pub anchor_wait: Duration,
    pub settle: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_pages: 2,
            stop_after_known: 1,
            anchor_wait: Duration::from_secs(20),
            settle: Duration::from_millis(300),
        }
    }
}

/// What to do with one index entry
#[derive(Debug, Clone, PartialEq, Eq)]
enum Decision {
    New,
    Changed,
    Unchanged,
}

/// Incremental catch-up over one newest-first index.
///
/// Precondition: the index is sorted strictly newest-first and a settled
/// listing keeps its title. Under that ordering the first known listing whose
/// title is unchanged proves every older entry was captured by an earlier run,
/// so the walk stops there. A site that re-orders or backfills older listings
/// near the top breaks the precondition and those listings are silently
/// missed; raise `stop_after_known` to tolerate short gaps at the cost of extra
/// title probes.
pub struct CatchUpController {
    store: Arc<dyn ListingStore>,
    probe: Arc<dyn TitleProbe>,
    extractor: Arc<DetailExtractor>,
    images: Option<Arc<ImageFetcher>>,
    settings: ControllerSettings,
    cancel: CancellationToken,
}

impl CatchUpController {
    pub fn new(
        store: Arc<dyn ListingStore>,
        probe: Arc<dyn TitleProbe>,
        extractor: Arc<DetailExtractor>,
        images: Option<Arc<ImageFetcher>>,
        settings: ControllerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            probe,
            extractor,
            images,
            settings,
            cancel,
        }
    }

    /// Walk `index` page by page, writing new and changed listings in order.
    ///
    /// Extraction failures are per-listing and counted as skipped; store
    /// errors abort the index.
    pub async fn run_index(
        &self,
        session: &mut dyn PageSession,
        adapter: &dyn SiteAdapter,
        index: &IndexConfig,
    ) -> Result<RunCounters> {
        let mut counters = RunCounters::default();
        let mut known_streak = 0u32;
        let mut walker = FrontierWalker::new(
            adapter,
            &index.url,
            self.settings.max_pages,
            self.settings.anchor_wait,
            self.settings.settle,
        )?;
        info!(index = %index.url, source = adapter.source_name(), kind = %index.transaction_type.as_str(), "Index run started");

        'walk: while let Some(entries) = walker.next_page(session).await {
            for entry in entries {
                if self.cancel.is_cancelled() {
                    info!(index = %index.url, "Shutdown requested, leaving index");
                    break 'walk;
                }

                let stored = self
                    .store
                    .get(&entry.listing_ref)
                    .await
                    .with_context(|| format!("Failed to look up {}", entry.listing_ref))?;
                match self.decide(&entry, stored.as_ref()).await {
                    Decision::Unchanged => {
                        known_streak += 1;
                        debug!(listing_ref = %entry.listing_ref, streak = known_streak, "Known listing unchanged");
                        if known_streak >= self.settings.stop_after_known {
                            info!(
                                index = %index.url,
                                listing_ref = %entry.listing_ref,
                                page = walker.page(),
                                "Reached already-captured listings, stopping early"
                            );
                            counters.stopped_early += 1;
                            break 'walk;
                        }
                    }
                    decision => {
                        known_streak = 0;
                        let is_update = decision == Decision::Changed;
                        let Some(record) = self.capture(session, adapter, &entry, index).await else {
                            counters.skipped += 1;
                            continue;
                        };
                        let outcome = self
                            .store
                            .upsert(record, is_update)
                            .await
                            .with_context(|| format!("Failed to store {}", entry.listing_ref))?;
                        info!(listing_ref = %entry.listing_ref, %outcome, "Listing stored");
                        counters.record(outcome);
                    }
                }
            }
        }

        info!(
            index = %index.url,
            inserted = counters.inserted,
            updated = counters.updated,
            skipped = counters.skipped,
            stopped_early = counters.stopped_early,
            "Index run finished"
        );
        Ok(counters)
    }

    async fn decide(&self, entry: &IndexEntry, stored: Option<&ListingRecord>) -> Decision {
        let Some(stored) = stored else {
            return Decision::New;
        };
        match self.probe.current_title(&entry.url).await {
            Some(current) if stored.title.as_deref() != Some(current.as_str()) => {
                info!(
                    listing_ref = %entry.listing_ref,
                    old = stored.title.as_deref().unwrap_or(""),
                    new = %current,
                    "Title changed"
                );
                Decision::Changed
            }
            _ => Decision::Unchanged,
        }
    }

    /// Full extraction plus optional photos. `None` when the page could not
    /// be extracted.
    async fn capture(
        &self,
        session: &mut dyn PageSession,
        adapter: &dyn SiteAdapter,
        entry: &IndexEntry,
        index: &IndexConfig,
    ) -> Option<ListingRecord> {
        let mut record = match self
            .extractor
            .extract(session, adapter, entry, index.transaction_type)
            .await
        {
            Ok(record) => record,
            Err(e) => {
                warn!(listing_ref = %entry.listing_ref, url = %entry.url, error = %e, "Extraction failed, skipping listing");
                return None;
            }
        };

        if let Some(images) = &self.images {
            if !record.image_urls.is_empty() {
                match images.fetch_all(&record.listing_ref, &record.image_urls).await {
                    Ok(saved) => record.images_dir = Some(saved.dir.display().to_string()),
                    Err(e) => warn!(listing_ref = %record.listing_ref, error = %e, "Image download failed"),
                }
            }
        }
        Some(record)
    }
}
