//! Document normalization: source artifacts to ordered [`Unit`]s.
//!
//! A [`Document`] is built from external input (a file path or an issue
//! record), consumed once by a [`Normalizer`], and discarded. Page-shaped
//! documents (PDF, plain text) yield one unit per page which is then passed
//! through the generic chunk profile; issue records are already chunked
//! field by field by [`IssueNormalizer`].

use serde_json::json;
use std::path::{Path, PathBuf};

use crate::chunk::{split_units, ChunkProfile};
use crate::error::{RagError, Result};
use crate::extract::{extract_pdf_pages, extract_text_file, FileKind};
use crate::issue::{load_issue_file, IssueNormalizer, IssueRecord};
use crate::models::{Metadata, Unit, META_PAGE, META_SOURCE};

/// Anything that can be turned into an ordered sequence of units.
pub trait UnitSource {
    /// Units in source order, before page-level chunking.
    fn produce_units(&self, normalizer: &Normalizer) -> Result<Vec<Unit>>;
}

/// A source artifact awaiting normalization.
#[derive(Debug, Clone)]
pub enum Document {
    Pdf { path: PathBuf },
    Text { path: PathBuf },
    Issue(IssueRecord),
}

impl Document {
    /// Documents contained in a file, chosen by extension. A `.json` file
    /// may hold one issue record or an array of them.
    pub fn from_path(path: &Path) -> Result<Vec<Document>> {
        match FileKind::from_path(path) {
            Some(FileKind::Pdf) => Ok(vec![Document::Pdf {
                path: path.to_path_buf(),
            }]),
            Some(FileKind::Text) => Ok(vec![Document::Text {
                path: path.to_path_buf(),
            }]),
            Some(FileKind::IssueJson) => Ok(load_issue_file(path)?
                .into_iter()
                .map(Document::Issue)
                .collect()),
            None => Err(RagError::Extract {
                path: path.to_path_buf(),
                message: "unsupported file type".into(),
            }),
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            Document::Pdf { path } | Document::Text { path } => path.display().to_string(),
            Document::Issue(issue) => issue.key.clone(),
        }
    }

    fn is_paged(&self) -> bool {
        !matches!(self, Document::Issue(_))
    }
}

impl UnitSource for Document {
    fn produce_units(&self, normalizer: &Normalizer) -> Result<Vec<Unit>> {
        match self {
            Document::Pdf { path } => {
                let pages = extract_pdf_pages(path)?;
                Ok(pages
                    .into_iter()
                    .enumerate()
                    .map(|(i, text)| Unit::new(text, page_metadata("pdf", i + 1, path)))
                    .collect())
            }
            Document::Text { path } => {
                let text = extract_text_file(path)?;
                Ok(vec![Unit::new(text, page_metadata("text", 1, path))])
            }
            Document::Issue(issue) => normalizer.issues.units(issue),
        }
    }
}

fn page_metadata(source: &str, page: usize, path: &Path) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(META_SOURCE.into(), json!(source));
    meta.insert(META_PAGE.into(), json!(page));
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        meta.insert("file".into(), json!(name));
    }
    meta
}

/// Chunking configuration for every document kind.
#[derive(Debug, Clone)]
pub struct Normalizer {
    /// Profile applied to PDF and text pages.
    pub page_profile: ChunkProfile,
    pub issues: IssueNormalizer,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            page_profile: ChunkProfile::generic(),
            issues: IssueNormalizer::default(),
        }
    }
}

impl Normalizer {
    pub fn new(page_profile: ChunkProfile, issues: IssueNormalizer) -> Self {
        Self {
            page_profile,
            issues,
        }
    }

    /// Normalize and chunk a document into index-ready units.
    pub fn prepare_units(&self, doc: &Document) -> Result<Vec<Unit>> {
        let units = doc.produce_units(self)?;
        if doc.is_paged() {
            Ok(split_units(&units, &self.page_profile))
        } else {
            Ok(units)
        }
    }
}
