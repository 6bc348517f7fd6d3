//! Prompt context from retrieval results.

use serde_json::Value;

use crate::issue::ISSUE_SOURCE;
use crate::models::{Unit, META_ISSUE_KEY, META_PAGE, META_SECTION};

/// Join result texts in ranked order, each prefixed with its provenance
/// marker, separated by a blank line. No results yield `""`.
pub fn assemble<'a, I>(results: I) -> String
where
    I: IntoIterator<Item = &'a Unit>,
{
    results
        .into_iter()
        .map(|unit| format!("{} {}", marker(unit), unit.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `[p3]` for paged sources, `[PROJ-1 comment]` for issue units,
/// `[<source>]` otherwise.
pub fn marker(unit: &Unit) -> String {
    if unit.source() == Some(ISSUE_SOURCE) {
        let key = unit.meta_str(META_ISSUE_KEY).unwrap_or("?");
        return match unit.meta_str(META_SECTION) {
            Some(section) => format!("[{} {}]", key, section),
            None => format!("[{}]", key),
        };
    }
    match unit.metadata.get(META_PAGE) {
        Some(Value::Number(n)) => format!("[p{}]", n),
        Some(Value::String(s)) => format!("[p{}]", s),
        _ => match unit.source() {
            Some(source) => format!("[{}]", source),
            None => "[p?]".to_string(),
        },
    }
}
