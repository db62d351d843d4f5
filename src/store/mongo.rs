use crate::models::ListingRecord;
use crate::store::{ListingStore, StoreError, StoreStats};
use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::info;

const DUPLICATE_KEY: i32 = 11000;

/// Secondary indexes besides the unique `listing_ref`
const INDEXED_FIELDS: &[&str] = &["source", "transaction_type", "first_seen", "last_updated"];

/// Remote document backend: one MongoDB collection keyed by `listing_ref`.
#[derive(Clone)]
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    /// Connect, ping and make sure the indexes exist.
    pub async fn connect(uri: &str, database: &str, collection: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        client.database("admin").run_command(doc! { "ping": 1 }, None).await?;
        let collection = client.database(database).collection::<Document>(collection);

        let unique = IndexModel::builder()
            .keys(doc! { "listing_ref": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(unique, None).await?;
        for field in INDEXED_FIELDS {
            let mut keys = Document::new();
            keys.insert(*field, 1);
            collection
                .create_index(IndexModel::builder().keys(keys).build(), None)
                .await?;
        }

        info!(database, collection = collection.name(), "MongoDB store connected");
        Ok(Self { collection })
    }

    async fn count(&self, filter: Document) -> Result<u64, StoreError> {
        Ok(self.collection.count_documents(filter, None).await?)
    }
}

/// Record as stored in the collection
pub fn record_to_document(record: &ListingRecord) -> Result<Document, StoreError> {
    Ok(bson::to_document(record)?)
}

/// Record read back from the collection; the driver's `_id` is dropped.
pub fn record_from_document(mut document: Document) -> Result<ListingRecord, StoreError> {
    document.remove("_id");
    Ok(bson::from_document(document)?)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY
    )
}

#[async_trait]
impl ListingStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongo"
    }

    async fn get(&self, listing_ref: &str) -> Result<Option<ListingRecord>, StoreError> {
        match self.collection.find_one(doc! { "listing_ref": listing_ref }, None).await? {
            Some(document) => Ok(Some(record_from_document(document)?)),
            None => Ok(None),
        }
    }

    async fn insert_if_absent(&self, record: &ListingRecord) -> Result<bool, StoreError> {
        let document = record_to_document(record)?;
        match self.collection.insert_one(document, None).await {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn replace(&self, record: &ListingRecord) -> Result<(), StoreError> {
        let document = record_to_document(record)?;
        let options = ReplaceOptions::builder().upsert(true).build();
        self.collection
            .replace_one(doc! { "listing_ref": record.listing_ref.as_str() }, document, options)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        Ok(StoreStats {
            total: self.count(doc! {}).await?,
            sale: self
                .count(doc! { "transaction_type": { "$in": ["sale", "buy"] } })
                .await?,
            rent: self.count(doc! { "transaction_type": "rent" }).await?,
            with_phone: self.count(doc! { "phone_number": { "$ne": null } }).await?,
            title_changed: self.count(doc! { "title_history.0": { "$exists": true } }).await?,
        })
    }
}
