//! # docchat
//!
//! Retrieval-augmented chat over local documents and issue tracker exports.
//!
//! Documents (PDFs, plain text, issue records) are normalized into
//! metadata-carrying units, chunked, embedded, and stored in a persistent
//! vector collection. Questions are answered by retrieving the most relevant
//! units, assembling them into a context block, and asking a chat model.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Documents  │──▶│  Normalize   │──▶│  Store   │
//! │ PDF/Text/   │   │ Chunk+Embed  │   │ SQLite / │
//! │ Issues      │   └──────────────┘   │ memory   │
//! └─────────────┘                      └────┬─────┘
//!                                           │ retrieve
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!                 ┌──────────┐        ┌──────────┐
//!                 │   CLI    │        │   HTTP   │
//!                 │(docchat) │        │  /api/*  │
//!                 └──────────┘        └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat init                         # config, database, upload ledger
//! docchat ingest pdf ./manual.pdf      # index a document
//! docchat ingest issue ./issues.json   # index tracker records
//! docchat search "export hangs"
//! docchat ask "why does export hang?"
//! docchat serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Library error type |
//! | [`extract`] | PDF and text extraction |
//! | [`issue`] | Issue records and field-aware units |
//! | [`normalize`] | Documents to units |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Chat model abstraction |
//! | [`store`] | Vector collection backends |
//! | [`index`] | Collection lifecycle and ingestion |
//! | [`retrieve`] | Top-k retrieval with score threshold |
//! | [`context`] | Context assembly |
//! | [`chat`] | History formatting and RAG answers |
//! | [`ledger`] | Upload ledger |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | Tracing subscriber setup |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod issue;
pub mod ledger;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod normalize;
mod remote;
pub mod retrieve;
pub mod server;
pub mod store;
