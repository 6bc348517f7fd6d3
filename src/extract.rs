//! Page-level text extraction for source files.
//!
//! PDFs are read page by page with `pdf-extract`; plain text files are read
//! as a single page. Extraction never chunks: callers get the raw page text.

use std::path::Path;

use crate::error::{RagError, Result};

/// Kind of source file, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Text,
    IssueJson,
}

impl FileKind {
    /// Classifies a path by extension (case-insensitive). Unknown
    /// extensions yield `None`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(FileKind::Pdf),
            "txt" | "md" | "markdown" => Some(FileKind::Text),
            "json" => Some(FileKind::IssueJson),
            _ => None,
        }
    }
}

/// Read a PDF and return one string per page, in page order.
///
/// # Errors
///
/// - [`RagError::NotFound`] if `path` does not exist.
/// - [`RagError::Extract`] if the file is not a readable PDF.
pub fn extract_pdf_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = read_source(path)?;
    pdf_pages_from_bytes(&bytes).map_err(|message| RagError::Extract {
        path: path.to_path_buf(),
        message,
    })
}

/// Extract page texts from an in-memory PDF.
pub fn pdf_pages_from_bytes(bytes: &[u8]) -> std::result::Result<Vec<String>, String> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| e.to_string())
}

/// Read a UTF-8 text file.
pub fn extract_text_file(path: &Path) -> Result<String> {
    let bytes = read_source(path)?;
    String::from_utf8(bytes).map_err(|e| RagError::Extract {
        path: path.to_path_buf(),
        message: format!("not valid UTF-8: {}", e),
    })
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(RagError::NotFound(format!(
            "source document: {}",
            path.display()
        )));
    }
    std::fs::read(path).map_err(|e| RagError::io(format!("reading {}", path.display()), e))
}
