use crate::config::Config;
use crate::harvest::controller::{CatchUpController, ControllerSettings, RunCounters};
use crate::harvest::probe::{HttpTitleProbe, TitleProbe};
use crate::images::ImageFetcher;
use crate::scrapers::types::IndexConfig;
use crate::scrapers::{adapter_for, site_adapters, DetailExtractor, PageSession, SessionFactory, SiteAdapter};
use crate::store::{ListingStore, StoreError};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Run entrypoint: every configured index, concurrently, one session each.
pub struct Harvester {
    store: Arc<dyn ListingStore>,
    factory: Arc<dyn SessionFactory>,
    adapters: Vec<Arc<dyn SiteAdapter>>,
    probe: Arc<dyn TitleProbe>,
    extractor: Arc<DetailExtractor>,
    images: Arc<ImageFetcher>,
    settings: ControllerSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    cancel: CancellationToken,
}

/// Whether a failed run came from the store. The store is shared by every
/// index and cycle, so such a failure ends scheduled harvesting.
pub fn is_store_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.downcast_ref::<StoreError>().is_some())
}

/// One index ready to walk
struct IndexJob {
    index: IndexConfig,
    adapter: Arc<dyn SiteAdapter>,
    guard: OwnedMutexGuard<()>,
}

impl Harvester {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ListingStore>,
        factory: Arc<dyn SessionFactory>,
        adapters: Vec<Arc<dyn SiteAdapter>>,
        probe: Arc<dyn TitleProbe>,
        extractor: Arc<DetailExtractor>,
        images: Arc<ImageFetcher>,
        settings: ControllerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            factory,
            adapters,
            probe,
            extractor,
            images,
            settings,
            locks: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Wire the production parts from configuration
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ListingStore>,
        factory: Arc<dyn SessionFactory>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let timeouts = &config.timeouts;
        let user_agent = &config.browser.user_agent;
        let settings = ControllerSettings {
            max_pages: config.harvest.max_pages,
            stop_after_known: config.harvest.stop_after_known,
            anchor_wait: timeouts.index_wait(),
            settle: timeouts.settle(),
        };
        Ok(Self::new(
            store,
            factory,
            site_adapters()?,
            Arc::new(HttpTitleProbe::new(timeouts.http_timeout(), user_agent)?),
            Arc::new(DetailExtractor::new(timeouts.extract_timings())?),
            Arc::new(ImageFetcher::new(
                &config.harvest.images_root,
                timeouts.image_timeout(),
                user_agent,
            )?),
            settings,
            cancel,
        ))
    }

    /// Walk `indices` and return the summed counts.
    ///
    /// An index whose previous run is still going is skipped. Unknown hosts
    /// and session setup failures abort before any listing is processed; a
    /// store failure in one index cancels the others.
    pub async fn run(&self, indices: &[IndexConfig], max_pages: u32, save_images: bool) -> Result<RunCounters> {
        let mut resolved = Vec::with_capacity(indices.len());
        for index in indices {
            resolved.push((index.clone(), adapter_for(&self.adapters, &index.url)?));
        }

        let mut jobs = Vec::new();
        for (index, adapter) in resolved {
            match self.index_lock(&index.url).try_lock_owned() {
                Ok(guard) => jobs.push(IndexJob { index, adapter, guard }),
                Err(_) => info!(index = %index.url, "Previous run of this index still active, skipping"),
            }
        }
        if jobs.is_empty() {
            return Ok(RunCounters::default());
        }

        let sessions = self.open_sessions(jobs.len()).await?;

        let run_cancel = self.cancel.child_token();
        let controller = Arc::new(CatchUpController::new(
            Arc::clone(&self.store),
            Arc::clone(&self.probe),
            Arc::clone(&self.extractor),
            save_images.then(|| Arc::clone(&self.images)),
            ControllerSettings {
                max_pages,
                ..self.settings.clone()
            },
            run_cancel.clone(),
        ));

        let mut tasks = JoinSet::new();
        for (job, mut session) in jobs.into_iter().zip(sessions) {
            let controller = Arc::clone(&controller);
            let cancel = run_cancel.clone();
            tasks.spawn(async move {
                let IndexJob { index, adapter, guard } = job;
                let result = controller.run_index(session.as_mut(), adapter.as_ref(), &index).await;
                if let Err(e) = session.close().await {
                    warn!(index = %index.url, error = %e, "Failed to close session");
                }
                drop(guard);
                if result.is_err() {
                    cancel.cancel();
                }
                (index.url, result)
            });
        }

        let mut totals = RunCounters::default();
        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(counters))) => totals += counters,
                Ok((url, Err(e))) => {
                    error!(index = %url, error = %e, "Index run failed");
                    failure.get_or_insert(e);
                }
                Err(e) => {
                    error!(error = %e, "Index task panicked");
                    run_cancel.cancel();
                    failure.get_or_insert(anyhow!("Index task failed: {e}"));
                }
            }
        }

        info!(
            inserted = totals.inserted,
            updated = totals.updated,
            skipped = totals.skipped,
            stopped_early = totals.stopped_early,
            "Run finished"
        );
        match self.store.stats().await {
            Ok(stats) => info!(
                backend = self.store.backend_name(),
                total = stats.total,
                sale = stats.sale,
                rent = stats.rent,
                with_phone = stats.with_phone,
                title_changed = stats.title_changed,
                "Store statistics"
            ),
            Err(e) => warn!(error = %e, "Failed to read store statistics"),
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(totals),
        }
    }

    fn index_lock(&self, url: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(url.to_string()).or_default())
    }

    /// One session per job, all or nothing
    async fn open_sessions(&self, count: usize) -> Result<Vec<Box<dyn PageSession>>> {
        let mut sessions: Vec<Box<dyn PageSession>> = Vec::with_capacity(count);
        for _ in 0..count {
            match self.factory.open().await {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    for session in sessions.iter_mut() {
                        if let Err(close_err) = session.close().await {
                            warn!(error = %close_err, "Failed to close session");
                        }
                    }
                    return Err(e.context("Failed to open browser session"));
                }
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::controller::tests::{
        detail_page, detail_url, index_page, quick_settings, quick_timings, FixedProbe, INDEX,
    };
    use crate::models::TransactionType;
    use crate::scrapers::fake::{FakeFactory, FakeSession};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::time::Duration;

    const RENT_INDEX: &str = "https://www.athome.lu/location/?sort=date_desc";

    fn harvester(store: &SqliteStore, factory: Arc<dyn SessionFactory>) -> Harvester {
        let images = std::env::temp_dir().join("listing-harvest-runner-images");
        Harvester::new(
            Arc::new(store.clone()),
            factory,
            site_adapters().unwrap(),
            Arc::new(FixedProbe::default()),
            Arc::new(DetailExtractor::new(quick_timings()).unwrap()),
            Arc::new(ImageFetcher::new(images, Duration::from_secs(1), "test").unwrap()),
            quick_settings(1),
            CancellationToken::new(),
        )
    }

    fn scripted() -> FakeSession {
        FakeSession::new()
            .with_page(INDEX, &[&index_page(&[1, 2])])
            .with_page(RENT_INDEX, &[&index_page(&[3])])
            .with_page(&detail_url(1), &[&detail_page(1, "Maison")])
            .with_page(&detail_url(2), &[&detail_page(2, "Duplex")])
            .with_page(&detail_url(3), &[&detail_page(3, "Studio")])
    }

    fn closes(session: &FakeSession) -> usize {
        session.log().lock().unwrap().iter().filter(|l| *l == "close").count()
    }

    #[tokio::test]
    async fn runs_independent_indices_and_sums_counts() {
        let session = scripted();
        let store = SqliteStore::open_in_memory().unwrap();
        let harvester = harvester(&store, Arc::new(FakeFactory { session: session.clone() }));
        let indices = [
            IndexConfig::new(INDEX, TransactionType::Sale),
            IndexConfig::new(RENT_INDEX, TransactionType::Rent),
        ];

        let totals = harvester.run(&indices, 1, false).await.unwrap();

        assert_eq!(totals.inserted, 3);
        assert_eq!(closes(&session), 2);
        let studio = store.get("3").await.unwrap().unwrap();
        assert_eq!(studio.transaction_type, TransactionType::Rent);

        let again = harvester.run(&indices, 1, false).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.stopped_early, 2);
    }

    #[tokio::test]
    async fn busy_index_is_skipped() {
        let session = scripted();
        let store = SqliteStore::open_in_memory().unwrap();
        let harvester = harvester(&store, Arc::new(FakeFactory { session: session.clone() }));
        let _held = harvester.index_lock(INDEX).try_lock_owned().unwrap();

        let totals = harvester
            .run(&[IndexConfig::new(INDEX, TransactionType::Sale)], 1, false)
            .await
            .unwrap();

        assert_eq!(totals, RunCounters::default());
        assert!(session.log().lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_host_aborts_before_rendering() {
        let session = scripted();
        let store = SqliteStore::open_in_memory().unwrap();
        let harvester = harvester(&store, Arc::new(FakeFactory { session: session.clone() }));
        let indices = [
            IndexConfig::new(INDEX, TransactionType::Sale),
            IndexConfig::new("https://listings.example.com/new", TransactionType::Sale),
        ];

        assert!(harvester.run(&indices, 1, false).await.is_err());
        assert!(session.log().lock().unwrap().is_empty());
    }

    /// Opens one session, then fails
    struct FlakyFactory {
        session: FakeSession,
        opened: Mutex<usize>,
    }

    #[async_trait]
    impl SessionFactory for FlakyFactory {
        async fn open(&self) -> Result<Box<dyn PageSession>> {
            let mut opened = self.opened.lock().unwrap();
            if *opened > 0 {
                return Err(anyhow!("browser went away"));
            }
            *opened += 1;
            Ok(Box::new(self.session.clone()))
        }
    }

    #[tokio::test]
    async fn session_setup_failure_is_fatal_and_releases_opened_sessions() {
        let session = scripted();
        let store = SqliteStore::open_in_memory().unwrap();
        let factory = FlakyFactory {
            session: session.clone(),
            opened: Mutex::new(0),
        };
        let harvester = harvester(&store, Arc::new(factory));
        let indices = [
            IndexConfig::new(INDEX, TransactionType::Sale),
            IndexConfig::new(RENT_INDEX, TransactionType::Rent),
        ];

        assert!(harvester.run(&indices, 1, false).await.is_err());
        assert_eq!(closes(&session), 1);
        assert!(store.get("1").await.unwrap().is_none());
    }
    /// Every call fails as if the database had gone away
    struct UnreachableStore;

    #[async_trait]
    impl ListingStore for UnreachableStore {
        fn backend_name(&self) -> &'static str {
            "unreachable"
        }

        async fn get(&self, _listing_ref: &str) -> Result<Option<crate::models::ListingRecord>, StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused")))
        }

        async fn insert_if_absent(&self, _record: &crate::models::ListingRecord) -> Result<bool, StoreError> {
            Err(StoreError::Poisoned)
        }

        async fn replace(&self, _record: &crate::models::ListingRecord) -> Result<(), StoreError> {
            Err(StoreError::Poisoned)
        }

        async fn stats(&self) -> Result<crate::store::StoreStats, StoreError> {
            Err(StoreError::Poisoned)
        }
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_such() {
        let session = scripted();
        let mut harvester = harvester(
            &SqliteStore::open_in_memory().unwrap(),
            Arc::new(FakeFactory { session: session.clone() }),
        );
        harvester.store = Arc::new(UnreachableStore);

        let err = harvester
            .run(&[IndexConfig::new(INDEX, TransactionType::Sale)], 1, false)
            .await
            .unwrap_err();

        assert!(is_store_failure(&err));
        assert_eq!(closes(&session), 1);
    }

    #[tokio::test]
    async fn setup_errors_are_not_store_failures() {
        let store = SqliteStore::open_in_memory().unwrap();
        let harvester = harvester(&store, Arc::new(FakeFactory { session: scripted() }));

        let err = harvester
            .run(&[IndexConfig::new("https://listings.example.com/new", TransactionType::Sale)], 1, false)
            .await
            .unwrap_err();

        assert!(!is_store_failure(&err));
    }
}
