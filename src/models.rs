//! Core data models used throughout docchat.
//!
//! These types represent the retrievable units, retrieval results, and chat
//! messages that flow through the indexing and answering pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Metadata attached to a [`Unit`]: string keys mapped to scalar or list
/// values. Ordered so that serialization is byte-stable.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key holding the origin kind (`"pdf"`, `"text"`, `"issue-tracker"`).
pub const META_SOURCE: &str = "source";
/// Metadata key holding the character offset of a chunk within its parent text.
pub const META_START_INDEX: &str = "start_index";
/// Metadata key holding the 1-based page number of PDF-derived units.
pub const META_PAGE: &str = "page";
/// Metadata key holding the issue section a unit was derived from.
pub const META_SECTION: &str = "section";
/// Metadata key holding the issue key of issue-derived units.
pub const META_ISSUE_KEY: &str = "issue_key";

/// The atomic retrievable item: a piece of text plus provenance metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub text: String,
    pub metadata: Metadata,
}

impl Unit {
    pub fn new(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }

    /// Returns the metadata value for `key` as a string, if it is one.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Returns the `source` metadata value, if present.
    pub fn source(&self) -> Option<&str> {
        self.meta_str(META_SOURCE)
    }

    /// Returns the `start_index` metadata value, if present.
    pub fn start_index(&self) -> Option<usize> {
        self.metadata
            .get(META_START_INDEX)
            .and_then(Value::as_u64)
            .map(|v| v as usize)
    }
}

/// A unit together with its relevance score for one query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredUnit {
    /// Store-assigned identifier of the entry.
    pub id: String,
    pub unit: Unit,
    /// Relevance in `[0, 1]`; higher is more relevant.
    pub score: f32,
}

/// Ranked retrieval output, best match first.
pub type RetrievalResult = Vec<ScoredUnit>;

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parses a wire role name. `"ai"` is accepted as an alias for the
    /// assistant; unknown roles yield `None`.
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "system" => Some(Role::System),
            "user" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single message sent to the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
