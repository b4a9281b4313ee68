//! SQLite adapter.
//!
//! Records are stored as JSON text in a single `records` table keyed by
//! `(collection, id)`; the implicit rowid keeps insertion order. Queries load
//! the collection and run through the engine's evaluator, so ordering and
//! filter semantics match every other adapter.

use super::{apply_patch, ensure_id, report, ImportMode, ProgressFn, RecordPatch, StorageAdapter};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use folio_engine::{CollectionName, QueryFilter, Record, RecordId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// Type alias for the database pool.
pub type Pool = SqlitePool;

/// A stored record row from the database.
#[derive(Debug)]
struct StoredRecord {
    id: String,
    data: Json<Record>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            id: row.try_get("id")?,
            data: row.try_get("data")?,
        })
    }
}

impl StoredRecord {
    /// The stored payload, with the row id as its identifier.
    fn into_record(self) -> Record {
        let Json(record) = self.data;
        record.with_id(self.id)
    }
}

/// Embedded-database adapter.
#[derive(Debug, Clone)]
pub struct SqliteAdapter {
    pool: Pool,
}

impl SqliteAdapter {
    /// Connect to `database_url` and run the embedded migrations.
    ///
    /// The database file is created if missing. `sqlite::memory:` gives a
    /// private in-memory database held by a single connection.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn from_pool(pool: Pool) -> Result<Self> {
        tracing::debug!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn fetch(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        let row = sqlx::query_as::<_, StoredRecord>(
            "SELECT id, data FROM records WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredRecord::into_record))
    }
}

/// Map a unique-key violation to a constraint error.
fn duplicate(err: sqlx::Error, collection: &str, id: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Constraint(format!(
            "duplicate id '{}' in collection '{}'",
            id, collection
        )),
        _ => StoreError::Database(err),
    }
}

fn record_id(record: &Record) -> Result<&str> {
    record
        .id()
        .ok_or_else(|| StoreError::Backend("record has no id".into()))
}

const INSERT: &str = "INSERT INTO records (collection, id, data) VALUES (?, ?, ?)";
const UPSERT: &str = "INSERT INTO records (collection, id, data) VALUES (?, ?, ?) \
     ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data";
const UPDATE: &str = "UPDATE records SET data = ? WHERE collection = ? AND id = ?";
const DELETE: &str = "DELETE FROM records WHERE collection = ? AND id = ?";

#[async_trait]
impl StorageAdapter for SqliteAdapter {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Record>> {
        self.fetch(collection, id).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Record>> {
        let rows = sqlx::query_as::<_, StoredRecord>(
            "SELECT id, data FROM records WHERE collection = ? ORDER BY rowid",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredRecord::into_record).collect())
    }

    async fn insert(&self, collection: &str, record: Record) -> Result<Record> {
        let record = ensure_id(record);
        let id = record_id(&record)?;
        sqlx::query(INSERT)
            .bind(collection)
            .bind(id)
            .bind(Json(&record))
            .execute(&self.pool)
            .await
            .map_err(|e| duplicate(e, collection, id))?;
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record> {
        let stored = self
            .fetch(collection, id)
            .await?
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        let updated = apply_patch(stored, &patch);
        sqlx::query(UPDATE)
            .bind(Json(&updated))
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(updated)
    }

    async fn upsert(&self, collection: &str, record: Record) -> Result<Record> {
        let record = ensure_id(record);
        let id = record_id(&record)?;
        let stored = match self.fetch(collection, id).await? {
            Some(existing) => apply_patch(existing, &record),
            None => record.clone(),
        };
        sqlx::query(UPSERT)
            .bind(collection)
            .bind(id)
            .bind(Json(&stored))
            .execute(&self.pool)
            .await?;
        Ok(stored)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        let result = sqlx::query(DELETE)
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self, collection: &str, filters: &[QueryFilter]) -> Result<usize> {
        if filters.is_empty() {
            let count: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
                    .bind(collection)
                    .fetch_one(&self.pool)
                    .await?;
            return Ok(usize::try_from(count).unwrap_or_default());
        }
        let records = self.get_all(collection).await?;
        Ok(records
            .iter()
            .filter(|r| folio_engine::query::matches_all(r, filters))
            .count())
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        records: Vec<Record>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let total = records.len();
        let mut stored = Vec::with_capacity(total);
        let mut tx = self.pool.begin().await?;
        for record in records.into_iter().map(ensure_id) {
            let id = record_id(&record)?;
            sqlx::query(INSERT)
                .bind(collection)
                .bind(id)
                .bind(Json(&record))
                .execute(&mut *tx)
                .await
                .map_err(|e| duplicate(e, collection, id))?;
            stored.push(record);
            report(progress, stored.len(), total);
        }
        tx.commit().await?;
        Ok(stored)
    }

    async fn bulk_update(
        &self,
        collection: &str,
        updates: Vec<RecordPatch>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<Record>> {
        let total = updates.len();
        let mut updated = Vec::with_capacity(total);
        let mut tx = self.pool.begin().await?;
        for RecordPatch { id, patch } in updates {
            let row = sqlx::query_as::<_, StoredRecord>(
                "SELECT id, data FROM records WHERE collection = ? AND id = ?",
            )
            .bind(collection)
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(collection, id.as_str()))?;
            let record = apply_patch(row.into_record(), &patch);
            sqlx::query(UPDATE)
                .bind(Json(&record))
                .bind(collection)
                .bind(&id)
                .execute(&mut *tx)
                .await?;
            updated.push(record);
            report(progress, updated.len(), total);
        }
        tx.commit().await?;
        Ok(updated)
    }

    async fn bulk_remove(
        &self,
        collection: &str,
        ids: Vec<RecordId>,
        progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let total = ids.len();
        let mut removed = 0;
        let mut tx = self.pool.begin().await?;
        for (done, id) in ids.iter().enumerate() {
            let result = sqlx::query(DELETE)
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                removed += 1;
            }
            report(progress, done + 1, total);
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn import(
        &self,
        collection: &str,
        records: Vec<Record>,
        mode: ImportMode,
    ) -> Result<usize> {
        let count = records.len();
        let mut tx = self.pool.begin().await?;
        if mode == ImportMode::Replace {
            sqlx::query("DELETE FROM records WHERE collection = ?")
                .bind(collection)
                .execute(&mut *tx)
                .await?;
        }
        for record in records.into_iter().map(ensure_id) {
            let id = record_id(&record)?;
            let existing = sqlx::query_as::<_, StoredRecord>(
                "SELECT id, data FROM records WHERE collection = ? AND id = ?",
            )
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
            let stored = match existing {
                Some(row) => apply_patch(row.into_record(), &record),
                None => record.clone(),
            };
            sqlx::query(UPSERT)
                .bind(collection)
                .bind(id)
                .bind(Json(&stored))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(count)
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        let names = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT collection FROM records ORDER BY collection",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn destroy(&self) -> Result<()> {
        sqlx::query("DELETE FROM records")
            .execute(&self.pool)
            .await?;
        tracing::info!("Destroyed sqlite record storage");
        Ok(())
    }
}
