//! Query-time retrieval: top-`k` similarity search with a score threshold.

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::context::marker;
use crate::error::Result;
use crate::index::IndexManager;
use crate::models::RetrievalResult;

/// Similarity search policy over an [`IndexManager`].
///
/// Queries are embedded with the manager's own provider, so build and
/// query always share one embedding space.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<IndexManager>,
    k: usize,
    score_threshold: f32,
}

impl Retriever {
    pub fn new(index: Arc<IndexManager>, config: &RetrievalConfig) -> Self {
        Self {
            index,
            k: config.k,
            score_threshold: config.score_threshold,
        }
    }

    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    /// At most `k` units scoring strictly above the threshold, best first.
    /// Opens (or builds) the index on first use.
    pub async fn retrieve(&self, query: &str) -> Result<RetrievalResult> {
        if self.k == 0 {
            return Ok(Vec::new());
        }
        let handle = self.index.open_or_build().await?;
        let vector = self.index.embedder().embed_query(query).await?;
        let hits = handle.query(&vector, self.k).await?;

        let results: RetrievalResult = hits
            .into_iter()
            .filter(|hit| hit.score > self.score_threshold)
            .collect();
        tracing::debug!(k = self.k, kept = results.len(), "retrieved");
        Ok(results)
    }
}

/// Print results the way `docchat search` shows them.
pub fn print_results(results: &RetrievalResult) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, hit) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} {}",
            i + 1,
            hit.score,
            hit.unit.source().unwrap_or("-"),
            marker(&hit.unit)
        );
        if let Some(file) = hit.unit.meta_str("file") {
            println!("    file: {}", file);
        }
        if let Some(url) = hit.unit.meta_str("issue_url") {
            println!("    url: {}", url);
        }
        let excerpt: String = hit.unit.text.chars().take(200).collect();
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    id: {}", hit.id);
        println!();
    }
}
