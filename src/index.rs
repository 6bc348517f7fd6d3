//! Index lifecycle: open the persisted collection, or build it when empty.
//!
//! [`IndexManager`] owns the only handle to the collection. The first call
//! to [`IndexManager::open_or_build`] opens the collection by name; if it
//! holds zero entries the configured seed sources are ingested. The handle
//! is then cached for the lifetime of the manager.
//!
//! The cache slot is a `tokio::sync::Mutex` held across the whole
//! open-or-build step, so concurrent first callers wait for one build
//! instead of racing into two. [`IndexManager::build`] holds it only while
//! opening the collection; embedding and writing happen after it is released.
//!
//! An empty collection is treated as "never built". A collection emptied
//! with [`IndexManager::clear`] is therefore rebuilt from the seeds on the
//! next `open_or_build`.

use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::error::Result;
use crate::extract::FileKind;
use crate::ledger::UploadLedger;
use crate::models::Unit;
use crate::normalize::{Document, Normalizer};
use crate::store::{InMemoryStore, SqliteStore, Store};

/// Shared handle to an open collection.
pub type IndexHandle = Arc<dyn Store>;

/// Where collections live.
#[derive(Clone)]
pub enum Backend {
    Sqlite(SqlitePool),
    /// A single in-process collection.
    Memory(Arc<InMemoryStore>),
}

/// Outcome of a build or ingest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub documents: usize,
    pub units: usize,
    pub ids: Vec<String>,
}

impl BuildReport {
    fn absorb(&mut self, other: BuildReport) {
        self.documents += other.documents;
        self.units += other.units;
        self.ids.extend(other.ids);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub collection: String,
    pub entries: usize,
    pub open: bool,
    pub embedding_model: String,
}

pub struct IndexManager {
    backend: Backend,
    collection: String,
    embedder: Arc<dyn EmbeddingProvider>,
    normalizer: Normalizer,
    batch_size: usize,
    seed_paths: Vec<PathBuf>,
    ledger: Option<Arc<UploadLedger>>,
    handle: Mutex<Option<IndexHandle>>,
}

impl IndexManager {
    pub fn new(
        backend: Backend,
        collection: impl Into<String>,
        embedder: Arc<dyn EmbeddingProvider>,
        normalizer: Normalizer,
    ) -> Self {
        Self {
            backend,
            collection: collection.into(),
            embedder,
            normalizer,
            batch_size: 64,
            seed_paths: Vec::new(),
            ledger: None,
            handle: Mutex::new(None),
        }
    }

    /// Manager over the SQLite database and collection named in `config`.
    pub async fn from_config(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        ledger: Option<Arc<UploadLedger>>,
    ) -> Result<Self> {
        let pool = crate::db::connect(&config.db.path).await?;
        crate::migrate::run_migrations(&pool).await?;

        let mut manager = Self::new(
            Backend::Sqlite(pool),
            config.index.collection.clone(),
            embedder,
            config.normalizer(),
        )
        .with_batch_size(config.embedding.batch_size)
        .with_seed_paths(config.index.seed_paths.clone());
        manager.ledger = ledger;
        Ok(manager)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_seed_paths(mut self, seed_paths: Vec<PathBuf>) -> Self {
        self.seed_paths = seed_paths;
        self
    }

    /// Pending uploads in this ledger are ingested by the seed build.
    pub fn with_ledger(mut self, ledger: Arc<UploadLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The embedding provider used for both building and querying.
    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    async fn open_store(&self) -> Result<IndexHandle> {
        match &self.backend {
            Backend::Sqlite(pool) => {
                let store = SqliteStore::open(pool.clone(), &self.collection).await?;
                Ok(Arc::new(store))
            }
            Backend::Memory(store) => {
                let handle: IndexHandle = store.clone();
                Ok(handle)
            }
        }
    }

    /// Return the cached handle, or open the collection and build it from
    /// the seed sources if it is empty.
    pub async fn open_or_build(&self) -> Result<IndexHandle> {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }

        let store = self.open_store().await?;
        let existing = store.count().await?;
        if existing == 0 {
            info!(collection = %self.collection, "collection is empty, building");
            self.seed_build(&store).await?;
        } else {
            info!(collection = %self.collection, entries = existing, "opened collection");
        }

        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Normalize, chunk, embed, and append `documents` to the collection.
    /// Existing entries are kept; call [`clear`](Self::clear) first for a
    /// clean rebuild.
    ///
    /// The cache lock is released before any document is embedded, so
    /// queries keep running while a large ingest is in flight.
    pub async fn build(&self, documents: &[Document]) -> Result<(IndexHandle, BuildReport)> {
        let store = self.cached_or_open().await?;

        let mut report = BuildReport::default();
        for doc in documents {
            report.absorb(self.write_document(&store, doc).await?);
        }
        Ok((store, report))
    }

    async fn cached_or_open(&self) -> Result<IndexHandle> {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }
        let store = self.open_store().await?;
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Ingest every document found in `path` (PDF, text, or issue JSON).
    pub async fn ingest_path(&self, path: &Path) -> Result<BuildReport> {
        let documents = Document::from_path(path)?;
        Ok(self.build(&documents).await?.1)
    }

    /// Ingest one uploaded file and flag it as indexed in the ledger.
    pub async fn ingest_upload(&self, ledger: &UploadLedger, id: &str) -> Result<BuildReport> {
        let entry = ledger.get(id).await?;
        let report = self.ingest_path(&entry.filepath).await?;
        ledger.mark_indexed(id, true).await?;
        info!(id, file = %entry.filename, units = report.units, "upload indexed");
        Ok(report)
    }

    /// Remove every entry and forget the cached handle.
    pub async fn clear(&self) -> Result<usize> {
        let mut slot = self.handle.lock().await;
        let store = match slot.take() {
            Some(handle) => handle,
            None => self.open_store().await?,
        };
        let removed = store.clear().await?;
        info!(collection = %self.collection, removed, "collection cleared");
        Ok(removed)
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let cached = self.handle.lock().await.clone();
        let open = cached.is_some();
        let store = match cached {
            Some(handle) => handle,
            None => self.open_store().await?,
        };
        Ok(IndexStatus {
            collection: self.collection.clone(),
            entries: store.count().await?,
            open,
            embedding_model: self.embedder.model_name().to_string(),
        })
    }

    async fn seed_build(&self, store: &IndexHandle) -> Result<BuildReport> {
        let mut documents = Vec::new();
        for path in &self.seed_paths {
            documents.extend(seed_documents(path)?);
        }

        let pending = match &self.ledger {
            Some(ledger) => ledger.pending().await?,
            None => Vec::new(),
        };
        // Uploads that cannot be read or normalized stay pending and are skipped.
        let mut uploads = Vec::new();
        for entry in pending {
            match self.prepare_path(&entry.filepath) {
                Ok(prepared) => uploads.push((entry, prepared)),
                Err(err) => warn!(
                    id = %entry.id,
                    file = %entry.filename,
                    error = %err,
                    "skipping upload that cannot be normalized"
                ),
            }
        }

        if documents.is_empty() && uploads.is_empty() {
            warn!(collection = %self.collection, "no seed sources configured; index stays empty");
            return Ok(BuildReport::default());
        }

        let mut report = BuildReport::default();
        for doc in &documents {
            report.absorb(self.write_document(store, doc).await?);
        }

        for (entry, prepared) in uploads {
            for (label, units) in prepared {
                report.absorb(self.write_units(store, &label, units).await?);
            }
            if let Some(ledger) = &self.ledger {
                ledger.mark_indexed(&entry.id, true).await?;
            }
        }

        info!(
            collection = %self.collection,
            documents = report.documents,
            units = report.units,
            "seed build complete"
        );
        Ok(report)
    }

    /// Every document in `path`, labelled and normalized into units.
    fn prepare_path(&self, path: &Path) -> Result<Vec<(String, Vec<Unit>)>> {
        Document::from_path(path)?
            .iter()
            .map(|doc| Ok((doc.describe(), self.normalizer.prepare_units(doc)?)))
            .collect()
    }

    async fn write_document(&self, store: &IndexHandle, doc: &Document) -> Result<BuildReport> {
        let units = self.normalizer.prepare_units(doc)?;
        self.write_units(store, &doc.describe(), units).await
    }

    async fn write_units(
        &self,
        store: &IndexHandle,
        label: &str,
        units: Vec<Unit>,
    ) -> Result<BuildReport> {
        if units.is_empty() {
            warn!(document = %label, "document produced no units");
            return Ok(BuildReport {
                documents: 1,
                ..BuildReport::default()
            });
        }

        let texts: Vec<String> = units.iter().map(|u| u.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await?;
        let ids = store.add(&units, &vectors).await?;
        debug!(document = %label, units = ids.len(), "document indexed");

        Ok(BuildReport {
            documents: 1,
            units: ids.len(),
            ids,
        })
    }
}

/// Documents under a seed path. Directories are walked recursively and
/// files of unknown type are skipped; an explicit file must be supported.
fn seed_documents(path: &Path) -> Result<Vec<Document>> {
    if !path.is_dir() {
        return Document::from_path(path);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(error = %err, "skipping unreadable seed entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            let known = FileKind::from_path(p).is_some();
            if !known {
                debug!(path = %p.display(), "skipping unsupported seed file");
            }
            known
        })
        .collect();
    files.sort();

    let mut documents = Vec::new();
    for file in files {
        documents.extend(Document::from_path(&file)?);
    }
    Ok(documents)
}
