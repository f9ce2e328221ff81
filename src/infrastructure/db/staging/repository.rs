use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, warn};

use crate::domain::error::{AppError, Result};
use crate::domain::sheet::RawSheet;
use crate::domain::staging::{CollectionName, StagedCollection, StagingStats};
use crate::infrastructure::db::StagingStore;
use crate::infrastructure::storage::ensure_sqlite_parent;

use super::connection::{connect_staging_pool, init_staging_db};

pub struct StagingRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct StagedCollectionEntity {
    name: String,
    file_name: String,
    checksum: String,
    headers_json: String,
    header_row: i64,
    row_count: i64,
    staged_at: DateTime<Utc>,
}

impl StagedCollectionEntity {
    fn to_domain(&self) -> Result<StagedCollection> {
        Ok(StagedCollection {
            name: self.name.parse()?,
            file_name: self.file_name.clone(),
            checksum: self.checksum.clone(),
            row_count: self.row_count,
            staged_at: self.staged_at,
        })
    }
}

const COLLECTION_COLUMNS: &str =
    "name, file_name, checksum, headers_json, header_row, row_count, staged_at";

impl StagingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the staging database and apply its schema.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        ensure_sqlite_parent(database_url)?;
        let pool = connect_staging_pool(database_url, max_connections).await?;
        init_staging_db(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_entity(&self, name: &CollectionName) -> Result<Option<StagedCollectionEntity>> {
        let sql = format!(
            "SELECT {} FROM staged_collections WHERE name = ?",
            COLLECTION_COLUMNS
        );
        sqlx::query_as::<_, StagedCollectionEntity>(&sql)
            .bind(name.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to fetch collection: {}", e)))
    }
}

#[async_trait]
impl StagingStore for StagingRepository {
    async fn replace_collection(
        &self,
        collection: &StagedCollection,
        sheet: &RawSheet,
    ) -> Result<u64> {
        let name = collection.name.to_string();
        let headers_json = serde_json::to_string(&sheet.headers)
            .map_err(|e| AppError::Internal(format!("Failed to encode headers: {}", e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query("DELETE FROM staged_rows WHERE collection = ?")
            .bind(&name)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to clear staged rows: {}", e)))?;

        sqlx::query(
            "INSERT INTO staged_collections (name, data_kind, record_date, source_system, file_name, checksum, headers_json, header_row, row_count, staged_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                file_name = excluded.file_name,
                checksum = excluded.checksum,
                headers_json = excluded.headers_json,
                header_row = excluded.header_row,
                row_count = excluded.row_count,
                staged_at = excluded.staged_at",
        )
        .bind(&name)
        .bind(collection.data_kind().as_str())
        .bind(collection.record_date().format("%Y-%m-%d").to_string())
        .bind(collection.source_system().as_str())
        .bind(&collection.file_name)
        .bind(&collection.checksum)
        .bind(&headers_json)
        .bind(sheet.header_row as i64)
        .bind(sheet.len() as i64)
        .bind(collection.staged_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to upsert collection: {}", e)))?;

        let mut written: u64 = 0;
        for (index, row) in sheet.rows.iter().enumerate() {
            let values_json = serde_json::to_string(row)
                .map_err(|e| AppError::Internal(format!("Failed to encode row: {}", e)))?;
            let res = sqlx::query(
                "INSERT INTO staged_rows (collection, row_index, values_json) VALUES (?, ?, ?)",
            )
            .bind(&name)
            .bind(index as i64)
            .bind(values_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert staged row: {}", e)))?;
            written += res.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        debug!(collection = %name, rows = written, "Staged collection replaced");
        Ok(written)
    }

    async fn list_collections(&self) -> Result<Vec<StagedCollection>> {
        let sql = format!(
            "SELECT {} FROM staged_collections ORDER BY name ASC",
            COLLECTION_COLUMNS
        );
        let entities = sqlx::query_as::<_, StagedCollectionEntity>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to list collections: {}", e)))?;

        let mut collections = Vec::with_capacity(entities.len());
        for entity in entities {
            match entity.to_domain() {
                Ok(collection) => collections.push(collection),
                Err(e) => warn!(collection = %entity.name, "Skipping unreadable collection: {}", e),
            }
        }
        Ok(collections)
    }

    async fn load_collection(&self, name: &CollectionName) -> Result<(StagedCollection, RawSheet)> {
        let entity = self
            .fetch_entity(name)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Staged collection {} not found", name)))?;

        let headers: Vec<String> = serde_json::from_str(&entity.headers_json).map_err(|e| {
            AppError::ParseError(format!("Corrupt headers for collection {}: {}", name, e))
        })?;

        let values: Vec<String> = sqlx::query_scalar(
            "SELECT values_json FROM staged_rows WHERE collection = ? ORDER BY row_index ASC",
        )
        .bind(name.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to load staged rows: {}", e)))?;

        let mut rows = Vec::with_capacity(values.len());
        for raw in values {
            let row: Vec<String> = serde_json::from_str(&raw).map_err(|e| {
                AppError::ParseError(format!("Corrupt row in collection {}: {}", name, e))
            })?;
            rows.push(row);
        }

        let sheet = RawSheet {
            headers,
            rows,
            header_row: entity.header_row.max(0) as usize,
        };
        Ok((entity.to_domain()?, sheet))
    }

    async fn drop_collection(&self, name: &CollectionName) -> Result<bool> {
        let key = name.to_string();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query("DELETE FROM staged_rows WHERE collection = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete staged rows: {}", e)))?;
        let res = sqlx::query("DELETE FROM staged_collections WHERE name = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to delete collection: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        Ok(res.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query("DELETE FROM staged_rows")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to clear staged rows: {}", e)))?;
        let res = sqlx::query("DELETE FROM staged_collections")
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to clear collections: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit transaction: {}", e)))?;

        Ok(res.rows_affected())
    }

    async fn stats(&self) -> Result<StagingStats> {
        let by_collection: Vec<(String, i64)> =
            sqlx::query_as("SELECT name, row_count FROM staged_collections ORDER BY name ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to read staging stats: {}", e))
                })?;

        Ok(StagingStats {
            collections: by_collection.len() as i64,
            rows: by_collection.iter().map(|(_, rows)| rows).sum(),
            by_collection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::custodian::{DataKind, SourceSystem};
    use chrono::NaiveDate;

    async fn memory_repo() -> StagingRepository {
        StagingRepository::connect("sqlite::memory:", 1).await.unwrap()
    }

    fn collection(source: SourceSystem, rows: i64) -> StagedCollection {
        StagedCollection {
            name: CollectionName::new(
                DataKind::Custody,
                NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                source,
            ),
            file_name: format!("{}_holding_30062024.csv", source.slug()),
            checksum: "abc".to_string(),
            row_count: rows,
            staged_at: Utc::now(),
        }
    }

    fn sheet(rows: &[[&str; 2]]) -> RawSheet {
        RawSheet {
            headers: vec!["Client Code".to_string(), "ISIN".to_string()],
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
            header_row: 2,
        }
    }

    #[tokio::test]
    async fn test_replace_and_load_round_trip() {
        let repo = memory_repo().await;
        let meta = collection(SourceSystem::Hdfc, 2);
        let data = sheet(&[["C1", "INE002A01018"], ["C2", "INE009A01021"]]);

        let written = repo.replace_collection(&meta, &data).await.unwrap();
        assert_eq!(written, 2);

        let (loaded_meta, loaded) = repo.load_collection(&meta.name).await.unwrap();
        assert_eq!(loaded_meta.name, meta.name);
        assert_eq!(loaded_meta.row_count, 2);
        assert_eq!(loaded, data);
    }

    #[tokio::test]
    async fn test_replace_overwrites_previous_rows() {
        let repo = memory_repo().await;
        let meta = collection(SourceSystem::Axis, 2);
        repo.replace_collection(&meta, &sheet(&[["C1", "X"], ["C2", "Y"]]))
            .await
            .unwrap();
        repo.replace_collection(&meta, &sheet(&[["C3", "Z"]]))
            .await
            .unwrap();

        let (_, loaded) = repo.load_collection(&meta.name).await.unwrap();
        assert_eq!(loaded.rows, vec![vec!["C3".to_string(), "Z".to_string()]]);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.collections, 1);
        assert_eq!(stats.rows, 1);
    }

    #[tokio::test]
    async fn test_drop_and_clear() {
        let repo = memory_repo().await;
        let hdfc = collection(SourceSystem::Hdfc, 1);
        let kotak = collection(SourceSystem::Kotak, 1);
        repo.replace_collection(&hdfc, &sheet(&[["C1", "X"]])).await.unwrap();
        repo.replace_collection(&kotak, &sheet(&[["C1", "X"]])).await.unwrap();

        assert!(repo.drop_collection(&hdfc.name).await.unwrap());
        assert!(!repo.drop_collection(&hdfc.name).await.unwrap());
        assert!(matches!(
            repo.load_collection(&hdfc.name).await,
            Err(AppError::NotFound(_))
        ));

        let names: Vec<_> = repo
            .list_collections()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name.to_string())
            .collect();
        assert_eq!(names, vec!["custody.2024-06-30.kotak"]);

        assert_eq!(repo.clear().await.unwrap(), 1);
        assert!(repo.list_collections().await.unwrap().is_empty());
    }
}
