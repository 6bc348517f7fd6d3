//! Vector storage for embedded units.
//!
//! A [`Store`] is one named collection. [`SqliteStore`] persists it in the
//! SQLite database so it survives restarts at the same path and name;
//! [`InMemoryStore`] holds it in process memory.
//!
//! Queries score every stored vector against the query with
//! [`relevance_score`] over cosine similarity and return the best `k`,
//! ties broken by insertion order.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::{cosine_similarity, relevance_score};
use crate::error::{RagError, Result};
use crate::models::{Metadata, ScoredUnit, Unit};

/// A stored unit with its identifier.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEntry {
    pub id: String,
    pub unit: Unit,
}

/// Equality filter over metadata: every key must be present with the
/// given value.
pub type MetadataFilter = Metadata;

#[async_trait]
pub trait Store: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Number of entries in the collection.
    async fn count(&self) -> Result<usize>;

    /// Append units with their vectors; returns the generated ids.
    async fn add(&self, units: &[Unit], vectors: &[Vec<f32>]) -> Result<Vec<String>>;

    /// Entries in insertion order, optionally filtered by metadata.
    async fn get(&self, filter: Option<&MetadataFilter>) -> Result<Vec<StoredEntry>>;

    /// The `k` entries most relevant to `vector`, best first.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredUnit>>;

    /// Remove every entry; returns how many were removed.
    async fn clear(&self) -> Result<usize>;
}

pub(crate) fn check_lengths(units: &[Unit], vectors: &[Vec<f32>]) -> Result<()> {
    if units.len() != vectors.len() {
        return Err(RagError::Embedding(format!(
            "{} vectors for {} units",
            vectors.len(),
            units.len()
        )));
    }
    Ok(())
}

pub(crate) fn matches_filter(unit: &Unit, filter: Option<&MetadataFilter>) -> bool {
    filter.map_or(true, |f| {
        f.iter().all(|(k, v)| unit.metadata.get(k) == Some(v))
    })
}

/// Score candidates against `query` and keep the top `k`.
pub(crate) fn rank<'a, I>(candidates: I, query: &[f32], k: usize) -> Vec<ScoredUnit>
where
    I: IntoIterator<Item = (String, Unit, &'a [f32])>,
{
    let mut scored: Vec<ScoredUnit> = candidates
        .into_iter()
        .map(|(id, unit, vector)| ScoredUnit {
            id,
            unit,
            score: relevance_score(cosine_similarity(query, vector)),
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}
