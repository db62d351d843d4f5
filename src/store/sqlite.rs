use crate::models::ListingRecord;
use crate::store::{ListingStore, StoreError, StoreStats};
use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, ToSql};
use serde_json::{Map, Number};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const TABLE: &str = "listings";

/// Column name and SQL type, in table order
const COLUMNS: &[(&str, &str)] = &[
    ("listing_ref", "TEXT PRIMARY KEY"),
    ("agency_ref", "TEXT"),
    ("transaction_type", "TEXT"),
    ("listing_url", "TEXT"),
    ("source", "TEXT"),
    ("title", "TEXT"),
    ("location", "TEXT"),
    ("description", "TEXT"),
    ("sale_price", "REAL"),
    ("rent_price", "REAL"),
    ("monthly_charges", "REAL"),
    ("deposit", "REAL"),
    ("commission", "TEXT"),
    ("availability", "TEXT"),
    ("surface_m2", "REAL"),
    ("floor", "INTEGER"),
    ("rooms", "INTEGER"),
    ("bedrooms", "INTEGER"),
    ("year_of_construction", "INTEGER"),
    ("fitted_kitchen", "INTEGER"),
    ("open_kitchen", "INTEGER"),
    ("shower_rooms", "INTEGER"),
    ("bathrooms", "INTEGER"),
    ("separate_toilets", "INTEGER"),
    ("furnished", "INTEGER"),
    ("balcony", "INTEGER"),
    ("balcony_m2", "REAL"),
    ("terrace_m2", "REAL"),
    ("garden", "INTEGER"),
    ("parking_spaces", "INTEGER"),
    ("energy_class", "TEXT"),
    ("thermal_insulation_class", "TEXT"),
    ("gas_heating", "INTEGER"),
    ("electric_heating", "INTEGER"),
    ("heat_pump", "INTEGER"),
    ("district_heating", "INTEGER"),
    ("pellet_heating", "INTEGER"),
    ("oil_heating", "INTEGER"),
    ("solar_heating", "INTEGER"),
    ("basement", "INTEGER"),
    ("laundry_room", "INTEGER"),
    ("elevator", "INTEGER"),
    ("storage", "INTEGER"),
    ("pets_allowed", "INTEGER"),
    ("phone_number", "TEXT"),
    ("phone_source", "TEXT"),
    ("agency_name", "TEXT"),
    ("agency_url", "TEXT"),
    ("agent_name", "TEXT"),
    ("agency_logo_url", "TEXT"),
    ("image_urls", "TEXT"),
    ("images_dir", "TEXT"),
    ("first_seen", "TEXT"),
    ("last_updated", "TEXT"),
    ("title_history", "TEXT"),
];

/// Ordered lists kept as JSON text
const JSON_COLUMNS: &[&str] = &["image_urls", "title_history"];

const INDEXES: &[(&str, &str)] = &[
    ("idx_listings_first_seen", "first_seen"),
    ("idx_listings_transaction_type", "transaction_type"),
    ("idx_listings_location", "location"),
];

/// Embedded relational backend: one SQLite file, one `listings` table.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let conn = Connection::open(&path)?;
            conn.busy_timeout(Duration::from_secs(5))?;
            create_schema(&conn)?;
            info!(path = %path.display(), "SQLite store opened");
            Ok(conn)
        })
        .await??;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        create_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await?
    }
}

fn create_schema(conn: &Connection) -> Result<(), StoreError> {
    let cols: Vec<String> = COLUMNS.iter().map(|(name, ty)| format!("{name} {ty}")).collect();
    conn.execute(
        &format!("CREATE TABLE IF NOT EXISTS {TABLE} ({})", cols.join(", ")),
        [],
    )?;
    for (index, column) in INDEXES {
        conn.execute(
            &format!("CREATE INDEX IF NOT EXISTS {index} ON {TABLE} ({column})"),
            [],
        )?;
    }
    Ok(())
}

/// Record as (column, SQL value) pairs in table order
fn to_row(record: &ListingRecord) -> Result<Vec<(&'static str, Value)>, StoreError> {
    let serde_json::Value::Object(fields) = serde_json::to_value(record)? else {
        return Ok(Vec::new());
    };
    let mut row = Vec::with_capacity(COLUMNS.len());
    for (column, _) in COLUMNS {
        let value = match fields.get(*column) {
            None | Some(serde_json::Value::Null) => Value::Null,
            Some(serde_json::Value::Bool(flag)) => Value::Integer(i64::from(*flag)),
            Some(serde_json::Value::Number(n)) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => n.as_f64().map_or(Value::Null, Value::Real),
            },
            Some(serde_json::Value::String(s)) => Value::Text(s.clone()),
            Some(nested) => Value::Text(serde_json::to_string(nested)?),
        };
        row.push((*column, value));
    }
    Ok(row)
}

fn from_row(row: &rusqlite::Row<'_>) -> Result<ListingRecord, StoreError> {
    let mut fields = Map::new();
    for (i, (column, _)) in COLUMNS.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null | ValueRef::Blob(_) => serde_json::Value::Null,
            ValueRef::Integer(n) => serde_json::Value::Number(n.into()),
            ValueRef::Real(f) => Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number),
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes).into_owned();
                if JSON_COLUMNS.contains(column) {
                    if text.trim().is_empty() {
                        serde_json::Value::Null
                    } else {
                        serde_json::from_str(&text)?
                    }
                } else {
                    serde_json::Value::String(text)
                }
            }
        };
        if !value.is_null() {
            fields.insert(column.to_string(), value);
        }
    }
    Ok(serde_json::from_value(serde_json::Value::Object(fields))?)
}

fn select_sql() -> String {
    let names: Vec<&str> = COLUMNS.iter().map(|(name, _)| *name).collect();
    format!("SELECT {} FROM {TABLE} WHERE listing_ref = ?1", names.join(", "))
}

fn count(conn: &Connection, filter: &str) -> Result<u64, StoreError> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE} {filter}"), [], |r| r.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

#[async_trait]
impl ListingStore for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, listing_ref: &str) -> Result<Option<ListingRecord>, StoreError> {
        let listing_ref = listing_ref.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select_sql())?;
            let mut rows = stmt.query([&listing_ref])?;
            match rows.next()? {
                Some(row) => Ok(Some(from_row(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn insert_if_absent(&self, record: &ListingRecord) -> Result<bool, StoreError> {
        let row = to_row(record)?;
        self.with_conn(move |conn| {
            let cols: Vec<&str> = row.iter().map(|(k, _)| *k).collect();
            let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "INSERT OR IGNORE INTO {TABLE} ({}) VALUES ({})",
                cols.join(", "),
                placeholders.join(", ")
            );
            let params: Vec<&dyn ToSql> = row.iter().map(|(_, v)| v as &dyn ToSql).collect();
            let changed = conn.execute(&sql, params.as_slice())?;
            Ok(changed > 0)
        })
        .await
    }

    async fn replace(&self, record: &ListingRecord) -> Result<(), StoreError> {
        let row = to_row(record)?;
        let listing_ref = Value::Text(record.listing_ref.clone());
        self.with_conn(move |conn| {
            let data: Vec<&(&str, Value)> = row.iter().filter(|(k, _)| *k != "listing_ref").collect();
            let sets: Vec<String> = data
                .iter()
                .enumerate()
                .map(|(i, (k, _))| format!("{k} = ?{}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE {TABLE} SET {} WHERE listing_ref = ?{}",
                sets.join(", "),
                data.len() + 1
            );
            let mut params: Vec<&dyn ToSql> = data.iter().map(|(_, v)| v as &dyn ToSql).collect();
            params.push(&listing_ref);
            conn.execute(&sql, params.as_slice())?;
            Ok(())
        })
        .await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        self.with_conn(|conn| {
            Ok(StoreStats {
                total: count(conn, "")?,
                sale: count(conn, "WHERE transaction_type IN ('sale', 'buy')")?,
                rent: count(conn, "WHERE transaction_type = 'rent'")?,
                with_phone: count(conn, "WHERE phone_number IS NOT NULL")?,
                title_changed: count(
                    conn,
                    "WHERE title_history IS NOT NULL AND title_history NOT IN ('', '[]')",
                )?,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TransactionType, TitleChange};
    use crate::store::UpsertOutcome;
    use chrono::Utc;

    #[tokio::test]
    async fn booleans_and_lists_at_rest() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = ListingRecord::new("100");
        record.elevator = Some(true);
        record.garden = Some(false);
        record.image_urls = vec!["a.jpg".to_string(), "b.jpg".to_string()];
        store.upsert(record, false).await.unwrap();

        let (elevator, garden, basement, images, history): (i64, i64, Option<i64>, String, String) = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT elevator, garden, basement, image_urls, title_history FROM listings",
                    [],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                )?)
            })
            .await
            .unwrap();
        assert_eq!((elevator, garden, basement), (1, 0, None));
        assert_eq!(images, r#"["a.jpg","b.jpg"]"#);
        assert_eq!(history, "[]");
    }

    #[tokio::test]
    async fn reads_rows_written_by_older_runs() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO listings (listing_ref, transaction_type, title, title_history, elevator)
                     VALUES ('9', 'buy', 'Studio', '[{\"title\":\"Old\",\"changed_at\":\"2024-05-01T10:00:00+00:00\"}]', 1)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let record = store.get("9").await.unwrap().unwrap();
        assert_eq!(record.transaction_type, TransactionType::Sale);
        assert_eq!(record.elevator, Some(true));
        assert_eq!(record.title_history.len(), 1);
        assert_eq!(record.title_history[0].previous_title, "Old");
    }

    #[tokio::test]
    async fn stats_count_by_kind() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut sale = ListingRecord::new("1");
        sale.phone_number = Some("621123456".to_string());
        sale.title = Some("A".to_string());
        let mut rent = ListingRecord::new("2");
        rent.transaction_type = TransactionType::Rent;
        store.upsert(sale, false).await.unwrap();
        store.upsert(rent, false).await.unwrap();

        let mut renamed = ListingRecord::new("1");
        renamed.title = Some("B".to_string());
        assert_eq!(store.upsert(renamed, true).await.unwrap(), UpsertOutcome::Updated);

        let stats = store.stats().await.unwrap();
        assert_eq!(
            stats,
            StoreStats {
                total: 2,
                sale: 1,
                rent: 1,
                with_phone: 1,
                title_changed: 1,
            }
        );
    }

    #[tokio::test]
    async fn update_of_unknown_ref_inserts() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = store.upsert(ListingRecord::new("55"), true).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        let stored = store.get("55").await.unwrap().unwrap();
        assert!(stored.first_seen.is_some());
        assert_eq!(stored.title_history, Vec::<TitleChange>::new());
        assert!(stored.last_updated.unwrap() <= Utc::now());
    }

    #[tokio::test]
    async fn empty_ref_is_skipped() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.upsert(ListingRecord::new(""), false).await.unwrap(),
            UpsertOutcome::Skipped
        );
        assert_eq!(store.stats().await.unwrap().total, 0);
    }
}
