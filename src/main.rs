//! # docchat CLI
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat init` | Write a default config (if missing) and create the database |
//! | `docchat ingest pdf\|text\|issue <path>` | Chunk, embed, and index a document |
//! | `docchat ingest upload <id>` | Index a previously uploaded file |
//! | `docchat index build\|status\|clear` | Manage the collection |
//! | `docchat search "<query>"` | Show the units retrieval returns |
//! | `docchat ask "<question>"` | Answer a question from the index |
//! | `docchat chunk <file>` | Preview normalization and chunking |
//! | `docchat files list\|upload` | Inspect or add to the upload ledger |
//! | `docchat serve` | Start the HTTP API |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use docchat::config::{self, Config};
use docchat::context::marker;
use docchat::index::BuildReport;
use docchat::issue::load_issue_file;
use docchat::normalize::Document;
use docchat::retrieve::print_results;
use docchat::server::{self, AppState};
use docchat::{db, logging, migrate};

/// docchat: chat over your documents and issue tracker exports.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "docchat: retrieval-augmented chat over PDFs, text, and issue records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file if none exists, then create the
    /// database schema and upload ledger. Safe to run repeatedly.
    Init,

    /// Add documents to the index.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Build, inspect, or clear the collection.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Print the units retrieved for a query, with scores.
    Search {
        query: String,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question using retrieved context.
    Ask { question: String },

    /// Show how a file is normalized and chunked, without indexing it.
    Chunk {
        path: PathBuf,
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Manage uploaded files.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IngestSource {
    /// A PDF file, one unit per page before chunking.
    Pdf { path: PathBuf },
    /// A plain text or Markdown file.
    Text { path: PathBuf },
    /// A JSON file holding one issue record or an array of them.
    Issue { path: PathBuf },
    /// An uploaded file, by ledger id. Marks it indexed.
    Upload { id: String },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Open the collection, building it from the seed sources if empty.
    Build {
        /// Clear the collection first.
        #[arg(long)]
        fresh: bool,
    },
    /// Show the entry count and embedding model.
    Status,
    /// Remove every entry from the collection.
    Clear,
}

#[derive(Subcommand)]
enum FilesAction {
    /// List ledger entries.
    List,
    /// Copy a local file into the upload directory and record it.
    Upload { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require a config file
    match &cli.command {
        Commands::Init => {
            return run_init(&cli.config).await;
        }
        Commands::Chunk { path, json } => {
            let cfg = if cli.config.exists() {
                config::load_config(&cli.config)?
            } else {
                Config::minimal()
            };
            logging::init(&cfg.logging.level);
            return run_chunk(&cfg, path, *json);
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.level);

    match cli.command {
        Commands::Ingest { source } => {
            let state = AppState::from_config(&cfg).await?;
            let report = match source {
                IngestSource::Pdf { path } => {
                    state.index.build(&[Document::Pdf { path }]).await?.1
                }
                IngestSource::Text { path } => {
                    state.index.build(&[Document::Text { path }]).await?.1
                }
                IngestSource::Issue { path } => {
                    let docs: Vec<Document> = load_issue_file(&path)?
                        .into_iter()
                        .map(Document::Issue)
                        .collect();
                    state.index.build(&docs).await?.1
                }
                IngestSource::Upload { id } => {
                    state.index.ingest_upload(&state.ledger, &id).await?
                }
            };
            print_report(state.index.collection(), &report);
        }
        Commands::Index { action } => {
            let state = AppState::from_config(&cfg).await?;
            match action {
                IndexAction::Build { fresh } => {
                    if fresh {
                        let removed = state.index.clear().await?;
                        println!("Cleared {} entries.", removed);
                    }
                    let handle = state.index.open_or_build().await?;
                    println!(
                        "Collection '{}' has {} entries.",
                        state.index.collection(),
                        handle.count().await?
                    );
                }
                IndexAction::Status => {
                    let status = state.index.status().await?;
                    println!("collection: {}", status.collection);
                    println!("entries: {}", status.entries);
                    println!("embedding model: {}", status.embedding_model);
                }
                IndexAction::Clear => {
                    let removed = state.index.clear().await?;
                    println!(
                        "Cleared {} entries from '{}'.",
                        removed,
                        state.index.collection()
                    );
                }
            }
        }
        Commands::Search { query, json } => {
            let state = AppState::from_config(&cfg).await?;
            let results = state.chat.retriever().retrieve(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }
        Commands::Ask { question } => {
            let state = AppState::from_config(&cfg).await?;
            let answer = state.chat.rag_answer(&question, &[]).await?;
            println!("{}", answer.reply);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for hit in &answer.sources {
                    println!("  {} [{:.2}]", marker(&hit.unit), hit.score);
                }
            }
        }
        Commands::Files { action } => {
            let state = AppState::from_config(&cfg).await?;
            match action {
                FilesAction::List => {
                    let entries = state.ledger.list().await?;
                    if entries.is_empty() {
                        println!("No uploaded files.");
                    }
                    for e in entries {
                        let flag = if e.is_indexed { "indexed" } else { "pending" };
                        println!("{}  {}  ({})", e.id, e.filename, flag);
                    }
                }
                FilesAction::Upload { path } => {
                    let filename = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .with_context(|| format!("Not a file path: {}", path.display()))?;
                    let bytes = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    let entry = state.ledger.save_upload(filename, &bytes).await?;
                    println!("Uploaded {} as {}", entry.filename, entry.id);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Init | Commands::Chunk { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

async fn run_init(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(config_path, config::CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote default config to {}", config_path.display());
    }

    let cfg = config::load_config(config_path)?;
    logging::init(&cfg.logging.level);

    let pool = db::connect(&cfg.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    docchat::ledger::UploadLedger::open(&cfg.uploads.dir, &cfg.uploads.ledger)?;

    println!("Database initialized successfully.");
    Ok(())
}

fn run_chunk(cfg: &Config, path: &Path, json: bool) -> anyhow::Result<()> {
    let normalizer = cfg.normalizer();
    let mut units = Vec::new();
    for doc in Document::from_path(path)? {
        units.extend(normalizer.prepare_units(&doc)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }

    for (i, unit) in units.iter().enumerate() {
        let start = unit
            .start_index()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}. {} start={} chars={}",
            i + 1,
            marker(unit),
            start,
            unit.text.chars().count()
        );
        let excerpt: String = unit.text.chars().take(120).collect();
        println!("    \"{}\"", excerpt.replace('\n', " ").trim());
    }
    println!("{} units", units.len());
    Ok(())
}

fn print_report(collection: &str, report: &BuildReport) {
    println!(
        "Indexed {} units from {} documents into '{}'.",
        report.units, report.documents, collection
    );
}
