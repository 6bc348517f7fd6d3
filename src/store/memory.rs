use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{check_lengths, matches_filter, rank, MetadataFilter, Store, StoredEntry};
use crate::error::Result;
use crate::models::{ScoredUnit, Unit};

struct Entry {
    id: String,
    unit: Unit,
    vector: Vec<f32>,
}

/// A collection held in process memory. Lost on exit.
pub struct InMemoryStore {
    name: String,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }

    async fn add(&self, units: &[Unit], vectors: &[Vec<f32>]) -> Result<Vec<String>> {
        check_lengths(units, vectors)?;
        let mut entries = self.entries.write().await;
        let mut ids = Vec::with_capacity(units.len());
        for (unit, vector) in units.iter().zip(vectors) {
            let id = Uuid::new_v4().to_string();
            entries.push(Entry {
                id: id.clone(),
                unit: unit.clone(),
                vector: vector.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>> {
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|e| matches_filter(&e.unit, filter))
            .map(|e| StoredEntry {
                id: e.id.clone(),
                unit: e.unit.clone(),
            })
            .collect())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredUnit>> {
        let entries = self.entries.read().await;
        Ok(rank(
            entries
                .iter()
                .map(|e| (e.id.clone(), e.unit.clone(), e.vector.as_slice())),
            vector,
            k,
        ))
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
