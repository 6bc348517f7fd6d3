//! Upload ledger: uploaded files on disk plus a JSON list of
//! `{id, filename, filepath, isIndexed}` records.
//!
//! Every read-modify-write of the ledger file happens under one async mutex,
//! so concurrent uploads never lose entries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::extract::FileKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub filename: String,
    pub filepath: PathBuf,
    #[serde(rename = "isIndexed")]
    pub is_indexed: bool,
}

pub struct UploadLedger {
    dir: PathBuf,
    path: PathBuf,
    lock: Mutex<()>,
}

impl UploadLedger {
    /// Open the ledger, creating the upload directory and an empty `[]`
    /// ledger file if they are missing.
    pub fn open(dir: &Path, ledger_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| RagError::io(format!("creating {}", dir.display()), e))?;
        if let Some(parent) = ledger_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::io(format!("creating {}", parent.display()), e))?;
        }
        if !ledger_path.exists() {
            std::fs::write(ledger_path, "[]")
                .map_err(|e| RagError::io(format!("creating {}", ledger_path.display()), e))?;
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            path: ledger_path.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    /// Store `bytes` as `filename` in the upload directory and record it.
    ///
    /// # Errors
    ///
    /// - [`RagError::AlreadyExists`] if a file with that name is already stored.
    /// - [`RagError::Validation`] if `filename` is empty, has path components,
    ///   or is not a PDF, text, or issue JSON file.
    pub async fn save_upload(&self, filename: &str, bytes: &[u8]) -> Result<LedgerEntry> {
        let name = sanitize_filename(filename)?;
        let _guard = self.lock.lock().await;

        let filepath = self.dir.join(&name);
        if filepath.exists() {
            return Err(RagError::AlreadyExists(name));
        }
        std::fs::write(&filepath, bytes)
            .map_err(|e| RagError::io(format!("writing {}", filepath.display()), e))?;

        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            filename: name,
            filepath,
            is_indexed: false,
        };
        let recorded = self.load().and_then(|mut entries| {
            entries.push(entry.clone());
            self.store(&entries)
        });
        if let Err(err) = recorded {
            // No file may outlive a failed ledger write.
            if let Err(e) = std::fs::remove_file(&entry.filepath) {
                tracing::warn!(file = %entry.filepath.display(), error = %e, "could not remove unrecorded upload");
            }
            return Err(err);
        }

        tracing::info!(id = %entry.id, file = %entry.filename, "upload recorded");
        Ok(entry)
    }

    pub async fn list(&self) -> Result<Vec<LedgerEntry>> {
        let _guard = self.lock.lock().await;
        self.load()
    }

    pub async fn get(&self, id: &str) -> Result<LedgerEntry> {
        self.list()
            .await?
            .into_iter()
            .find(|e| e.id == id)
            .ok_or_else(|| RagError::NotFound(format!("upload {}", id)))
    }

    /// Entries not yet ingested into the index.
    pub async fn pending(&self) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|e| !e.is_indexed)
            .collect())
    }

    /// Set the `isIndexed` flag of one entry.
    pub async fn mark_indexed(&self, id: &str, flag: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load()?;
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| RagError::NotFound(format!("upload {}", id)))?;
        entry.is_indexed = flag;
        self.store(&entries)
    }

    fn load(&self) -> Result<Vec<LedgerEntry>> {
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| RagError::io(format!("reading {}", self.path.display()), e))?;
        serde_json::from_str(&content)
            .map_err(|e| RagError::json(format!("parsing {}", self.path.display()), e))
    }

    fn store(&self, entries: &[LedgerEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| RagError::json("encoding ledger", e))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .map_err(|e| RagError::io(format!("writing {}", tmp.display()), e))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| RagError::io(format!("replacing {}", self.path.display()), e))
    }
}

fn sanitize_filename(filename: &str) -> Result<String> {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");
    if name.trim().is_empty() || name != filename {
        return Err(RagError::Validation(format!(
            "invalid upload file name: {:?}",
            filename
        )));
    }
    if FileKind::from_path(Path::new(name)).is_none() {
        return Err(RagError::Validation(format!(
            "unsupported upload type: {} (expected .pdf, .txt, .md, or .json)",
            name
        )));
    }
    Ok(name.to_string())
}
