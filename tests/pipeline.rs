//! End-to-end library tests: PDF seeding, persistence across reopen,
//! upload ingestion, and retrieval policy over the SQLite backend.

use std::path::Path;
use std::sync::Arc;

use docchat::config::RetrievalConfig;
use docchat::context::{assemble, marker};
use docchat::embedding::HashProvider;
use docchat::index::{Backend, IndexManager};
use docchat::issue::IssueRecord;
use docchat::ledger::UploadLedger;
use docchat::normalize::{Document, Normalizer, UnitSource};
use docchat::retrieve::Retriever;
use docchat::store::SqliteStore;
use tempfile::TempDir;

/// A PDF with one Helvetica text line per page.
fn minimal_pdf_with_pages(pages: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut offsets = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    let kids: Vec<String> = (0..pages.len())
        .map(|i| format!("{} 0 R", 4 + 2 * i))
        .collect();

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            pages.len()
        )
        .as_bytes(),
    );
    offsets.push(out.len());
    out.extend_from_slice(
        b"3 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );

    for (i, text) in pages.iter().enumerate() {
        let page_id = 4 + 2 * i;
        let content_id = page_id + 1;
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 3 0 R >> >> >> endobj\n",
                page_id, content_id
            )
            .as_bytes(),
        );
        let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", text);
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
                content_id,
                stream.len(),
                stream
            )
            .as_bytes(),
        );
    }

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            xref_start
        )
        .as_bytes(),
    );
    out
}

/// Exactly `len` characters of repeated `word`s, ending on a letter.
fn page_text(word: &str, len: usize) -> String {
    let mut text = String::new();
    while text.len() < len {
        text.push_str(word);
        text.push(' ');
    }
    text.truncate(len - 1);
    text.push('x');
    text
}

async fn sqlite_manager(db_path: &Path, collection: &str) -> IndexManager {
    let pool = docchat::db::connect(db_path).await.unwrap();
    docchat::migrate::run_migrations(&pool).await.unwrap();
    IndexManager::new(
        Backend::Sqlite(pool),
        collection,
        Arc::new(HashProvider::new(256)),
        Normalizer::default(),
    )
}

fn retriever(manager: IndexManager, k: usize) -> Retriever {
    Retriever::new(
        Arc::new(manager),
        &RetrievalConfig {
            k,
            score_threshold: 0.2,
        },
    )
}

fn issue(key: &str, title: &str, description: &str) -> IssueRecord {
    IssueRecord {
        key: key.into(),
        title: title.into(),
        issue_type: "Bug".into(),
        status: "Open".into(),
        description: Some(description.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_seed_build_from_pdf_pages() {
    let tmp = TempDir::new().unwrap();
    let seeds = tmp.path().join("seeds");
    std::fs::create_dir_all(&seeds).unwrap();
    std::fs::write(
        seeds.join("report.pdf"),
        minimal_pdf_with_pages(&[
            "alpha beta gamma",
            "quarterly revenue forecast",
            "delta epsilon zeta",
        ]),
    )
    .unwrap();
    // Skipped: unknown extension.
    std::fs::write(seeds.join("logo.png"), b"not an image").unwrap();

    let manager = sqlite_manager(&tmp.path().join("db.sqlite"), "reports")
        .await
        .with_seed_paths(vec![seeds]);
    let handle = manager.open_or_build().await.unwrap();
    assert_eq!(handle.count().await.unwrap(), 3);

    let retriever = retriever(manager, 5);
    let results = retriever.retrieve("quarterly revenue forecast").await.unwrap();
    assert_eq!(results.len(), 1, "only the matching page clears the threshold");
    let top = &results[0].unit;
    assert_eq!(top.source(), Some("pdf"));
    assert_eq!(marker(top), "[p2]");
    assert_eq!(top.meta_str("file"), Some("report.pdf"));
    assert!(top.text.contains("quarterly revenue forecast"));
}

#[test]
fn test_three_page_pdf_keeps_one_unit_per_page() {
    let tmp = TempDir::new().unwrap();
    let pages = [
        page_text("alpha", 400),
        page_text("bravo", 400),
        page_text("charlie", 400),
    ];
    let path = tmp.path().join("handbook.pdf");
    std::fs::write(
        &path,
        minimal_pdf_with_pages(&[&pages[0], &pages[1], &pages[2]]),
    )
    .unwrap();

    let doc = Document::Pdf { path };
    let normalizer = Normalizer::default();
    let raw = doc.produce_units(&normalizer).unwrap();
    assert_eq!(raw.len(), 3);

    let units = normalizer.prepare_units(&doc).unwrap();
    assert_eq!(units.len(), 3);
    for (i, (unit, page)) in units.iter().zip(pages.iter()).enumerate() {
        assert_eq!(page.chars().count(), 400);
        assert_eq!(&unit.text, page, "page {} was altered by chunking", i + 1);
        assert_eq!(unit.metadata.get("page"), Some(&serde_json::json!(i + 1)));
        assert_eq!(unit.source(), Some("pdf"));
    }
}

#[tokio::test]
async fn test_collection_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db.sqlite");

    {
        let manager = sqlite_manager(&db_path, "tracker").await;
        let (_, report) = manager
            .build(&[
                Document::Issue(issue("PROJ-1", "Login fails", "login page returns 500")),
                Document::Issue(issue("PROJ-2", "Export hangs", "export of large reports hangs")),
            ])
            .await
            .unwrap();
        assert_eq!(report.documents, 2);
        assert_eq!(report.units, 4);
    }

    let manager = sqlite_manager(&db_path, "tracker").await;
    let status = manager.status().await.unwrap();
    assert_eq!(status.entries, 4);
    assert!(!status.open);

    let retriever = retriever(manager, 5);
    let results = retriever.retrieve("export large reports").await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].unit.meta_str("issue_key"), Some("PROJ-2"));

    // Reopen did not rebuild or duplicate.
    assert_eq!(retriever.index().status().await.unwrap().entries, 4);
}

#[tokio::test]
async fn test_collections_are_isolated() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db.sqlite");

    let first = sqlite_manager(&db_path, "first").await;
    first
        .build(&[Document::Issue(issue("A-1", "Crash", "crash on start"))])
        .await
        .unwrap();
    let second = sqlite_manager(&db_path, "second").await;
    assert_eq!(second.status().await.unwrap().entries, 0);

    let pool = docchat::db::connect(&db_path).await.unwrap();
    let names = SqliteStore::list_collections(&pool).await.unwrap();
    assert!(names.contains(&"first".to_string()));
    assert!(names.contains(&"second".to_string()));
}

#[tokio::test]
async fn test_seed_build_ingests_pending_uploads() {
    let tmp = TempDir::new().unwrap();
    let uploads = tmp.path().join("uploads");
    let ledger = Arc::new(
        UploadLedger::open(&uploads, &uploads.join("files_metadata.json")).unwrap(),
    );
    let entry = ledger
        .save_upload("notes.txt", b"Deployment runbook for the payments service.")
        .await
        .unwrap();
    assert!(!entry.is_indexed);

    let manager = sqlite_manager(&tmp.path().join("db.sqlite"), "docs")
        .await
        .with_ledger(Arc::clone(&ledger));
    let handle = manager.open_or_build().await.unwrap();
    assert_eq!(handle.count().await.unwrap(), 1);

    assert!(ledger.get(&entry.id).await.unwrap().is_indexed);
    assert!(ledger.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_ingest_upload_then_retrieve_context() {
    let tmp = TempDir::new().unwrap();
    let uploads = tmp.path().join("uploads");
    let ledger = UploadLedger::open(&uploads, &uploads.join("files_metadata.json")).unwrap();
    let entry = ledger
        .save_upload(
            "runbook.md",
            b"Rotate the payments service credentials every ninety days.",
        )
        .await
        .unwrap();

    let manager = sqlite_manager(&tmp.path().join("db.sqlite"), "docs").await;
    let report = manager.ingest_upload(&ledger, &entry.id).await.unwrap();
    assert_eq!(report.units, 1);
    assert!(ledger.get(&entry.id).await.unwrap().is_indexed);

    let retriever = retriever(manager, 3);
    let results = retriever
        .retrieve("rotate payments credentials")
        .await
        .unwrap();
    let context = assemble(results.iter().map(|r| &r.unit));
    assert!(context.contains("ninety days"));
}

#[tokio::test]
async fn test_k_limits_results() {
    let tmp = TempDir::new().unwrap();
    let manager = sqlite_manager(&tmp.path().join("db.sqlite"), "tracker").await;
    manager
        .build(&[
            Document::Issue(issue("PROJ-1", "Export hangs", "export hangs on reports")),
            Document::Issue(issue("PROJ-2", "Export slow", "export slow on reports")),
            Document::Issue(issue("PROJ-3", "Export fails", "export fails on reports")),
        ])
        .await
        .unwrap();

    let retriever = retriever(manager, 2);
    let results = retriever.retrieve("export reports").await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].score >= results[1].score);
}

#[tokio::test]
async fn test_clear_then_reopen_is_empty_without_seeds() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db.sqlite");
    let manager = sqlite_manager(&db_path, "tracker").await;
    manager
        .build(&[Document::Issue(issue("PROJ-1", "Crash", "crash on start"))])
        .await
        .unwrap();
    assert_eq!(manager.clear().await.unwrap(), 2);

    let reopened = sqlite_manager(&db_path, "tracker").await;
    let handle = reopened.open_or_build().await.unwrap();
    assert_eq!(handle.count().await.unwrap(), 0);
}
