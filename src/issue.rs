//! Issue-tracker records and their normalization into units.
//!
//! An issue becomes three groups of [`Unit`]s:
//!
//! | Group | Text | Chunked |
//! |-------|------|---------|
//! | header | fixed-format summary (key, title, type/status/priority, assignee/labels, components) | never |
//! | fields | description, steps, expected, actual, acceptance criteria | structured-field profile |
//! | comments | comment body | only when longer than the comment threshold |
//!
//! Missing or blank optional fields are skipped; a record without `key`,
//! `title`, `type`, or `status` is rejected with [`RagError::Validation`].
//!
//! Records arrive either already flattened (the [`IssueRecord`] JSON shape)
//! or as raw tracker payloads with a nested `fields` object, which
//! [`IssueRecord::from_tracker_json`] maps.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use crate::chunk::{split_text, ChunkProfile};
use crate::error::{RagError, Result};
use crate::models::{Metadata, Unit, META_ISSUE_KEY, META_SECTION, META_SOURCE};

/// `source` metadata value for every issue-derived unit.
pub const ISSUE_SOURCE: &str = "issue-tracker";

/// Comment bodies up to this many characters are stored verbatim.
pub const DEFAULT_COMMENT_MAX_CHARS: usize = 1800;

/// A structured issue. Only `key`, `title`, `issue_type`, and `status` are
/// required; everything else defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueRecord {
    pub key: String,
    pub url: Option<String>,
    pub project: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub status: String,
    pub priority: Option<String>,
    pub assignee: Option<String>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub sprint: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub description: Option<String>,
    pub steps_to_reproduce: Option<String>,
    pub expected_result: Option<String>,
    pub actual_result: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub comments: Vec<IssueComment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IssueComment {
    pub id: String,
    pub author: Option<String>,
    pub created: Option<String>,
    pub body: String,
}

impl IssueRecord {
    /// Check that the structurally required fields are present.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("key", &self.key),
            ("title", &self.title),
            ("type", &self.issue_type),
            ("status", &self.status),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                let who = if self.key.trim().is_empty() {
                    "issue".to_string()
                } else {
                    self.key.clone()
                };
                return Err(RagError::Validation(format!(
                    "{}: missing required field `{}`",
                    who, name
                )));
            }
        }
        Ok(())
    }

    /// Project key, falling back to the key prefix (`PROJ` for `PROJ-123`).
    pub fn project_key(&self) -> String {
        match &self.project {
            Some(p) if !p.trim().is_empty() => p.clone(),
            _ => self
                .key
                .split_once('-')
                .map(|(prefix, _)| prefix.to_string())
                .unwrap_or_else(|| self.key.clone()),
        }
    }

    /// Browse URL for the issue: the record's own URL, else
    /// `{browse_base}/{key}` when a base is configured.
    pub fn issue_url(&self, browse_base: Option<&str>) -> Option<String> {
        match &self.url {
            Some(u) if !u.trim().is_empty() => Some(u.clone()),
            _ => browse_base.map(|base| format!("{}/{}", base.trim_end_matches('/'), self.key)),
        }
    }

    /// Parse either a flattened record or a raw tracker payload.
    pub fn from_json(value: &Value) -> Result<Self> {
        let record = if value.get("fields").is_some_and(Value::is_object) {
            Self::from_tracker_json(value)?
        } else {
            serde_json::from_value(value.clone())
                .map_err(|e| RagError::Validation(format!("malformed issue record: {}", e)))?
        };
        record.validate()?;
        Ok(record)
    }

    /// Map a raw tracker REST payload (`{ key, fields: { summary, … } }`).
    pub fn from_tracker_json(value: &Value) -> Result<Self> {
        let fields = value
            .get("fields")
            .ok_or_else(|| RagError::Validation("tracker payload has no `fields`".into()))?;

        let text_at = |v: &Value, path: &[&str]| -> Option<String> {
            let mut cur = v;
            for p in path {
                cur = cur.get(*p)?;
            }
            cur.as_str().map(str::to_string)
        };
        let names = |v: Option<&Value>, key: Option<&str>| -> Vec<String> {
            v.and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| match key {
                            Some(k) => item.get(k).and_then(Value::as_str),
                            None => item.as_str(),
                        })
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        let comments = fields
            .get("comment")
            .and_then(|c| c.get("comments"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(|c| IssueComment {
                        id: scalar_to_string(c.get("id")).unwrap_or_default(),
                        author: text_at(c, &["author", "displayName"]),
                        created: text_at(c, &["created"]),
                        body: c.get("body").map(flatten_rich_text).unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let description = fields
            .get("description")
            .map(flatten_rich_text)
            .filter(|d| !d.trim().is_empty());

        Ok(IssueRecord {
            key: text_at(value, &["key"]).unwrap_or_default(),
            url: None,
            project: text_at(fields, &["project", "key"]),
            title: text_at(fields, &["summary"]).unwrap_or_default(),
            issue_type: text_at(fields, &["issuetype", "name"]).unwrap_or_default(),
            status: text_at(fields, &["status", "name"]).unwrap_or_default(),
            priority: text_at(fields, &["priority", "name"]),
            assignee: text_at(fields, &["assignee", "displayName"]),
            labels: names(fields.get("labels"), None),
            components: names(fields.get("components"), Some("name")),
            sprint: None,
            created: text_at(fields, &["created"]),
            updated: text_at(fields, &["updated"]),
            description,
            steps_to_reproduce: None,
            expected_result: None,
            actual_result: None,
            acceptance_criteria: None,
            comments,
        })
    }
}

fn scalar_to_string(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Flatten a plain string or a rich-text document tree (`{type, content,
/// text}` nodes) into plain text.
pub fn flatten_rich_text(value: &Value) -> String {
    let mut out = String::new();
    flatten_node(value, &mut out);
    out.trim().to_string()
}

fn flatten_node(node: &Value, out: &mut String) {
    match node {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => items.iter().for_each(|n| flatten_node(n, out)),
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str).unwrap_or("");
            match kind {
                "text" => {
                    if let Some(t) = map.get("text").and_then(Value::as_str) {
                        out.push_str(t);
                    }
                }
                "hardBreak" => out.push('\n'),
                "listItem" => out.push_str("- "),
                _ => {}
            }
            if let Some(children) = map.get("content") {
                flatten_node(children, out);
            }
            match kind {
                "paragraph" | "heading" | "codeBlock" | "blockquote" => {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                "bulletList" | "orderedList" | "table" => out.push('\n'),
                _ => {}
            }
        }
        _ => {}
    }
}

/// Load one issue or an array of issues from a JSON file.
pub fn load_issue_file(path: &Path) -> Result<Vec<IssueRecord>> {
    if !path.exists() {
        return Err(RagError::NotFound(format!("issue file: {}", path.display())));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::io(format!("reading {}", path.display()), e))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| RagError::json(format!("parsing {}", path.display()), e))?;
    match &value {
        Value::Array(items) => items.iter().map(IssueRecord::from_json).collect(),
        _ => Ok(vec![IssueRecord::from_json(&value)?]),
    }
}

/// Chunking policy for issue records.
#[derive(Debug, Clone)]
pub struct IssueNormalizer {
    /// Profile for structured text fields.
    pub field_profile: ChunkProfile,
    /// Comment bodies at or under this many characters stay whole.
    pub comment_max_chars: usize,
    /// Base URL used to derive `issue_url` when a record has none.
    pub browse_url: Option<String>,
}

impl Default for IssueNormalizer {
    fn default() -> Self {
        Self {
            field_profile: ChunkProfile::structured_field(),
            comment_max_chars: DEFAULT_COMMENT_MAX_CHARS,
            browse_url: None,
        }
    }
}

impl IssueNormalizer {
    /// Profile for long comments: the field separators, capped at the
    /// comment threshold so an over-threshold body always splits.
    pub fn comment_profile(&self) -> ChunkProfile {
        let size = self.field_profile.chunk_size.min(self.comment_max_chars);
        let overlap = self.field_profile.chunk_overlap.min(size.saturating_sub(1));
        self.field_profile.clone().with_size(size, overlap)
    }

    /// Produce header, field, and comment units for one issue, in that order.
    pub fn units(&self, issue: &IssueRecord) -> Result<Vec<Unit>> {
        issue.validate()?;
        let url = issue.issue_url(self.browse_url.as_deref());

        let mut units = vec![self.header_unit(issue, url.as_deref())];
        units.extend(self.field_units(issue, url.as_deref()));
        units.extend(self.comment_units(issue, url.as_deref()));
        Ok(units)
    }

    fn header_unit(&self, issue: &IssueRecord, url: Option<&str>) -> Unit {
        let text = header_text(issue);
        let mut meta = base_metadata(issue, "header", url);
        meta.insert("project".into(), json!(issue.project_key()));
        meta.insert("title".into(), json!(issue.title));
        meta.insert("type".into(), json!(issue.issue_type));
        meta.insert("status".into(), json!(issue.status));
        insert_opt(&mut meta, "priority", issue.priority.as_deref());
        insert_opt(&mut meta, "assignee", issue.assignee.as_deref());
        insert_opt(&mut meta, "sprint", issue.sprint.as_deref());
        insert_opt(&mut meta, "created_at", issue.created.as_deref());
        insert_opt(&mut meta, "updated_at", issue.updated.as_deref());
        meta.insert("labels".into(), json!(issue.labels));
        meta.insert("components".into(), json!(issue.components));
        Unit::new(text, meta)
    }

    fn field_units(&self, issue: &IssueRecord, url: Option<&str>) -> Vec<Unit> {
        let sections = [
            ("description", &issue.description),
            ("steps", &issue.steps_to_reproduce),
            ("expected", &issue.expected_result),
            ("actual", &issue.actual_result),
            ("acceptance_criteria", &issue.acceptance_criteria),
        ];

        let mut units = Vec::new();
        for (section, text) in sections {
            let Some(text) = text.as_deref() else {
                continue;
            };
            let mut meta = base_metadata(issue, section, url);
            meta.insert("project".into(), json!(issue.project_key()));
            meta.insert("title".into(), json!(issue.title));
            meta.insert("type".into(), json!(issue.issue_type));
            meta.insert("status".into(), json!(issue.status));
            units.extend(split_text(text, &meta, &self.field_profile));
        }
        units
    }

    fn comment_units(&self, issue: &IssueRecord, url: Option<&str>) -> Vec<Unit> {
        let profile = self.comment_profile();
        let mut units = Vec::new();
        for comment in &issue.comments {
            if comment.body.trim().is_empty() {
                continue;
            }
            let mut meta = base_metadata(issue, "comment", url);
            meta.insert("comment_id".into(), json!(comment.id));
            insert_opt(&mut meta, "author", comment.author.as_deref());
            insert_opt(&mut meta, "created_at", comment.created.as_deref());

            if comment.body.chars().count() <= self.comment_max_chars {
                units.push(Unit::new(comment.body.clone(), meta));
            } else {
                units.extend(split_text(&comment.body, &meta, &profile));
            }
        }
        units
    }
}

/// Fixed-format header block. Missing optional values render as `-`.
pub fn header_text(issue: &IssueRecord) -> String {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    format!(
        "[{}] {}\nType: {} | Status: {} | Priority: {}\nAssignee: {} | Labels: {}\nComponents: {}\n",
        issue.key,
        issue.title,
        issue.issue_type,
        issue.status,
        or_dash(&issue.priority),
        or_dash(&issue.assignee),
        issue.labels.join(", "),
        issue.components.join(", "),
    )
}

fn base_metadata(issue: &IssueRecord, section: &str, url: Option<&str>) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(META_SOURCE.into(), json!(ISSUE_SOURCE));
    meta.insert(META_SECTION.into(), json!(section));
    meta.insert(META_ISSUE_KEY.into(), json!(issue.key));
    insert_opt(&mut meta, "issue_url", url);
    meta
}

fn insert_opt(meta: &mut Metadata, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        meta.insert(key.to_string(), json!(v));
    }
}
