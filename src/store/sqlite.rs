use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{check_lengths, matches_filter, rank, MetadataFilter, Store, StoredEntry};
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{Metadata, ScoredUnit, Unit};

/// A named collection persisted in SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    collection: String,
}

impl SqliteStore {
    /// Open the collection, registering its name if it is new. Opening
    /// never writes units, so a fresh collection has a count of zero.
    pub async fn open(pool: SqlitePool, collection: &str) -> Result<Self> {
        sqlx::query("INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)")
            .bind(collection)
            .bind(chrono::Utc::now().timestamp())
            .execute(&pool)
            .await?;
        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    /// Names of every registered collection.
    pub async fn list_collections(pool: &SqlitePool) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT name FROM collections ORDER BY name")
            .fetch_all(pool)
            .await?;
        Ok(names)
    }

    async fn load_rows(&self) -> Result<Vec<(String, Unit, Vec<f32>)>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding, dims FROM units \
             WHERE collection = ? ORDER BY rowid",
        )
        .bind(&self.collection)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.get("id");
                let text: String = row.get("text");
                let metadata_json: String = row.get("metadata_json");
                let blob: Vec<u8> = row.get("embedding");
                let dims: i64 = row.get("dims");

                let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| {
                    RagError::IndexCorrupt(format!("unit {} has unreadable metadata: {}", id, e))
                })?;
                let vector = blob_to_vec(&blob);
                if vector.len() as i64 != dims || blob.len() % 4 != 0 {
                    return Err(RagError::IndexCorrupt(format!(
                        "unit {} embedding has {} bytes, expected {} dims",
                        id,
                        blob.len(),
                        dims
                    )));
                }
                Ok((id, Unit::new(text, metadata), vector))
            })
            .collect()
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM units WHERE collection = ?")
            .bind(&self.collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn add(&self, units: &[Unit], vectors: &[Vec<f32>]) -> Result<Vec<String>> {
        check_lengths(units, vectors)?;
        let now = chrono::Utc::now().timestamp();
        let mut ids = Vec::with_capacity(units.len());

        let mut tx = self.pool.begin().await?;
        for (unit, vector) in units.iter().zip(vectors) {
            let id = Uuid::new_v4().to_string();
            let metadata_json = serde_json::to_string(&unit.metadata)
                .map_err(|e| RagError::json("encoding unit metadata", e))?;
            sqlx::query(
                "INSERT INTO units (id, collection, text, metadata_json, embedding, dims, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&id)
            .bind(&self.collection)
            .bind(&unit.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(vector))
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(id);
        }
        tx.commit().await?;

        Ok(ids)
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>> {
        Ok(self
            .load_rows()
            .await?
            .into_iter()
            .filter(|(_, unit, _)| matches_filter(unit, filter))
            .map(|(id, unit, _)| StoredEntry { id, unit })
            .collect())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredUnit>> {
        let rows = self.load_rows().await?;
        Ok(rank(
            rows.iter()
                .map(|(id, unit, v)| (id.clone(), unit.clone(), v.as_slice())),
            vector,
            k,
        ))
    }

    async fn clear(&self) -> Result<usize> {
        let result = sqlx::query("DELETE FROM units WHERE collection = ?")
            .bind(&self.collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store(dir: &std::path::Path, name: &str) -> SqliteStore {
        let pool = crate::db::connect(&dir.join("store.sqlite")).await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        SqliteStore::open(pool, name).await.unwrap()
    }

    fn page(text: &str, page: u64) -> Unit {
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!("pdf"));
        meta.insert("page".into(), json!(page));
        Unit::new(text, meta)
    }

    #[tokio::test]
    async fn test_fresh_collection_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), "docs").await;
        assert_eq!(s.count().await.unwrap(), 0);
        assert!(s.get(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_get_query() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), "docs").await;
        let ids = s
            .add(
                &[page("alpha", 1), page("beta", 2)],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(s.count().await.unwrap(), 2);

        let entries = s.get(None).await.unwrap();
        assert_eq!(entries[0].unit.text, "alpha");
        assert_eq!(entries[1].unit.metadata.get("page"), Some(&json!(2)));

        let mut filter = MetadataFilter::new();
        filter.insert("page".into(), json!(2));
        let filtered = s.get(Some(&filter)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, ids[1]);

        let hits = s.query(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.text, "beta");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_collections_are_isolated_and_persist() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let a = store(tmp.path(), "a").await;
            a.add(&[page("kept", 1)], &[vec![1.0]]).await.unwrap();
        }
        let a = store(tmp.path(), "a").await;
        let b = store(tmp.path(), "b").await;
        assert_eq!(a.count().await.unwrap(), 1);
        assert_eq!(b.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), "docs").await;
        s.add(&[page("x", 1), page("y", 2)], &[vec![1.0], vec![1.0]])
            .await
            .unwrap();
        assert_eq!(s.clear().await.unwrap(), 2);
        assert_eq!(s.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mismatched_vectors_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), "docs").await;
        assert!(s.add(&[page("x", 1)], &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_corrupt_metadata_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path(), "docs").await;
        s.add(&[page("x", 1)], &[vec![1.0]]).await.unwrap();
        sqlx::query("UPDATE units SET metadata_json = 'not json'")
            .execute(&s.pool)
            .await
            .unwrap();
        let err = s.get(None).await.unwrap_err();
        assert!(matches!(err, RagError::IndexCorrupt(_)));
    }
}
