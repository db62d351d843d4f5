//! Versioned listing store.
//!
//! One contract, two backends: an embedded SQLite file and a remote MongoDB
//! collection. Callers only see [`ListingStore`]; the backend is picked once
//! at startup by [`open_store`].

pub mod mongo;
pub mod sqlite;

pub use mongo::MongoStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::models::{ListingRecord, TitleChange};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("BSON encoding error: {0}")]
    BsonEncode(#[from] mongodb::bson::ser::Error),
    #[error("BSON decoding error: {0}")]
    BsonDecode(#[from] mongodb::bson::de::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Nothing written: duplicate insert or missing ref
    Skipped,
}

impl fmt::Display for UpsertOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpsertOutcome::Inserted => "INSERTED",
            UpsertOutcome::Updated => "UPDATED",
            UpsertOutcome::Skipped => "SKIPPED",
        })
    }
}

/// Totals logged at the end of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub sale: u64,
    pub rent: u64,
    pub with_phone: u64,
    pub title_changed: u64,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn get(&self, listing_ref: &str) -> Result<Option<ListingRecord>, StoreError>;

    /// Write `record` unless a row with the same ref exists.
    /// Returns `false` when the ref was already taken.
    async fn insert_if_absent(&self, record: &ListingRecord) -> Result<bool, StoreError>;

    /// Overwrite the stored record with the same ref.
    async fn replace(&self, record: &ListingRecord) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<StoreStats, StoreError>;

    /// Idempotent write.
    ///
    /// Inserts set both timestamps and start an empty title history; a ref that
    /// already exists is left alone and reported as `Skipped`. Updates carry
    /// `first_seen` forward, append the superseded title on change and overlay
    /// only the fields present in `record`. Updating an unknown ref inserts it.
    ///
    /// Writes for different refs may run concurrently, and so may racing
    /// inserts of one ref. An update is a separate `get` then `replace`, so two
    /// concurrent updates of the same ref may lose one history entry; callers
    /// serialise same-ref updates if they need every entry.
    async fn upsert(&self, record: ListingRecord, is_update: bool) -> Result<UpsertOutcome, StoreError> {
        if record.listing_ref.trim().is_empty() {
            warn!("Skipping listing without listing_ref");
            return Ok(UpsertOutcome::Skipped);
        }
        let now = Utc::now();

        if is_update {
            if let Some(existing) = self.get(&record.listing_ref).await? {
                let merged = prepare_update(existing, record, now);
                self.replace(&merged).await?;
                return Ok(UpsertOutcome::Updated);
            }
            debug!(listing_ref = %record.listing_ref, "Update of unknown ref, inserting instead");
        }

        let fresh = prepare_insert(record, now);
        if self.insert_if_absent(&fresh).await? {
            Ok(UpsertOutcome::Inserted)
        } else {
            Ok(UpsertOutcome::Skipped)
        }
    }
}

/// Stamp a brand new record
pub fn prepare_insert(mut record: ListingRecord, now: DateTime<Utc>) -> ListingRecord {
    record.first_seen = Some(now);
    record.last_updated = Some(now);
    record.title_history.clear();
    record
}

/// Merge a re-extracted record into the stored one.
pub fn prepare_update(existing: ListingRecord, incoming: ListingRecord, now: DateTime<Utc>) -> ListingRecord {
    let mut merged = existing;

    if let (Some(old), Some(new)) = (merged.title.as_deref(), incoming.title.as_deref()) {
        if !old.is_empty() && old != new {
            merged.title_history.push(TitleChange {
                previous_title: old.to_string(),
                changed_at: now,
            });
        }
    }

    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(
                if incoming.$field.is_some() {
                    merged.$field = incoming.$field;
                }
            )*
        };
    }

    overlay!(
        agency_ref, source, listing_url, title, location, description,
        sale_price, rent_price, monthly_charges, deposit, commission, availability,
        surface_m2, floor, rooms, bedrooms, year_of_construction,
        fitted_kitchen, open_kitchen, shower_rooms, bathrooms, separate_toilets, furnished,
        balcony, balcony_m2, terrace_m2, garden, parking_spaces,
        energy_class, thermal_insulation_class,
        gas_heating, electric_heating, heat_pump, district_heating,
        pellet_heating, oil_heating, solar_heating,
        basement, laundry_room, elevator, storage, pets_allowed,
        agency_name, agency_url, agent_name, agency_logo_url,
        images_dir,
    );

    // The phone and its provenance travel together
    if incoming.phone_number.is_some() {
        merged.phone_number = incoming.phone_number;
        merged.phone_source = incoming.phone_source;
    }
    if !incoming.image_urls.is_empty() {
        merged.image_urls = incoming.image_urls;
    }
    merged.transaction_type = incoming.transaction_type;

    let first_seen = merged.first_seen.unwrap_or(now);
    merged.first_seen = Some(first_seen);
    merged.last_updated = Some(now.max(first_seen));
    merged
}

/// Open the configured backend. Failing to reach it is fatal for the run.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn ListingStore>> {
    let store: Arc<dyn ListingStore> = match config.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteStore::open(&config.sqlite_path)
                .await
                .with_context(|| format!("Failed to open SQLite store at {:?}", config.sqlite_path))?,
        ),
        StoreBackend::Mongo => {
            let uri = config
                .mongo_uri
                .as_deref()
                .context("MongoDB backend selected but no mongo_uri / MONGO_URI configured")?;
            Arc::new(
                MongoStore::connect(uri, &config.mongo_database, &config.mongo_collection)
                    .await
                    .context("Failed to connect to MongoDB")?,
            )
        }
    };
    info!(backend = store.backend_name(), "Store ready");
    Ok(store)
}
