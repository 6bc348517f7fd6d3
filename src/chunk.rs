//! Recursive separator-priority text chunker.
//!
//! Splits text into overlapping [`Unit`]s no longer than a configured
//! `chunk_size` (measured in characters). Separators are tried from most to
//! least preferred; a piece that is still too long is re-split with the next
//! separator, and the empty separator forces a hard character split.
//!
//! # Algorithm
//!
//! 1. Trim the input. Blank input produces no chunks.
//! 2. Walk an explicit stack of `(range, separator index)` pieces. Pieces
//!    that fit become *atoms*; oversized pieces are split on the first
//!    separator (from their index onward) that occurs in them and the parts
//!    are pushed back. Separator whitespace stays with the preceding part;
//!    list markers open the following one.
//! 3. Merge atoms left to right into windows of at most `chunk_size`
//!    characters. When a window is emitted, atoms are dropped from its front
//!    until at most `chunk_overlap` characters remain; those carry over into
//!    the next chunk.
//!
//! Atoms tile the trimmed input, so every chunk is an exact slice of the
//! original text and its `start_index` is the character offset of that slice.
//!
//! # Example
//!
//! ```rust
//! use docchat::chunk::{split_text, ChunkProfile};
//! use docchat::models::Metadata;
//!
//! let units = split_text("Hello world.\n\nSecond paragraph.", &Metadata::new(), &ChunkProfile::generic());
//! assert_eq!(units.len(), 1);
//! assert_eq!(units[0].start_index(), Some(0));
//! ```

use serde_json::Value;
use std::collections::VecDeque;

use crate::models::{Metadata, Unit, META_START_INDEX};

/// Size, overlap, and separator priority for one chunking policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkProfile {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Maximum number of characters shared by adjacent chunks.
    pub chunk_overlap: usize,
    /// Separators, most preferred first. `""` means "split anywhere".
    pub separators: Vec<String>,
}

impl ChunkProfile {
    pub fn new(chunk_size: usize, chunk_overlap: usize, separators: &[&str]) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: separators.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Profile for PDF pages and plain text: 1000 chars, 200 overlap.
    pub fn generic() -> Self {
        Self::new(1000, 200, &["\n\n", "\n", " ", ""])
    }

    /// Profile for structured issue fields: 2000 chars, 200 overlap, and
    /// list markers ranked above plain line breaks so list items stay whole.
    pub fn structured_field() -> Self {
        Self::new(2000, 200, &["\n\n", "\n- ", "\n* ", "\n", " ", ""])
    }

    /// Returns the same separators with a different size and overlap.
    pub fn with_size(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size;
        self.chunk_overlap = chunk_overlap;
        self
    }
}

/// A contiguous slice of the input that will not be split further.
#[derive(Debug, Clone, Copy)]
struct Atom {
    byte_start: usize,
    byte_end: usize,
    char_start: usize,
    char_len: usize,
}

/// Split `text` into chunks, copying `metadata` onto each and adding
/// `start_index`.
///
/// # Guarantees
///
/// - Blank input yields an empty vector.
/// - Each chunk is at most `chunk_size` characters unless no separator in
///   the profile can break it.
/// - `start_index` values are non-decreasing.
/// - Splitting the same input twice yields identical output.
pub fn split_text(text: &str, metadata: &Metadata, profile: &ChunkProfile) -> Vec<Unit> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let byte_start = text.len() - text.trim_start().len();
    let byte_end = byte_start + trimmed.len();
    let char_start = text[..byte_start].chars().count();

    let atoms = split_atoms(text, byte_start, byte_end, char_start, profile);
    merge_atoms(text, &atoms, metadata, profile)
}

/// Split every unit's text, carrying each parent's metadata onto its chunks.
pub fn split_units(units: &[Unit], profile: &ChunkProfile) -> Vec<Unit> {
    units
        .iter()
        .flat_map(|u| split_text(&u.text, &u.metadata, profile))
        .collect()
}

fn split_atoms(
    text: &str,
    start: usize,
    end: usize,
    char_start: usize,
    profile: &ChunkProfile,
) -> Vec<Atom> {
    let mut atoms = Vec::new();
    let mut char_pos = char_start;
    // Parts are pushed in reverse so pops come out in text order.
    let mut stack: Vec<(usize, usize, usize)> = vec![(start, end, 0)];

    while let Some((s, e, sep_idx)) = stack.pop() {
        let piece = &text[s..e];
        let len = piece.chars().count();

        if len <= profile.chunk_size {
            atoms.push(Atom {
                byte_start: s,
                byte_end: e,
                char_start: char_pos,
                char_len: len,
            });
            char_pos += len;
            continue;
        }

        let chosen = profile
            .separators
            .iter()
            .enumerate()
            .skip(sep_idx)
            .find(|(_, sep)| sep.is_empty() || piece.contains(sep.as_str()));

        match chosen {
            None => {
                // Separator list exhausted: keep the oversized piece whole.
                atoms.push(Atom {
                    byte_start: s,
                    byte_end: e,
                    char_start: char_pos,
                    char_len: len,
                });
                char_pos += len;
            }
            Some((_, sep)) if sep.is_empty() => {
                for (offset, ch) in piece.char_indices() {
                    atoms.push(Atom {
                        byte_start: s + offset,
                        byte_end: s + offset + ch.len_utf8(),
                        char_start: char_pos,
                        char_len: 1,
                    });
                    char_pos += 1;
                }
            }
            Some((idx, sep)) => {
                for (ps, pe) in split_keep_separator(piece, sep).into_iter().rev() {
                    stack.push((s + ps, s + pe, idx + 1));
                }
            }
        }
    }

    atoms
}

/// Split on every occurrence of `sep`. The separator's leading whitespace
/// stays at the end of the part before it and the rest (e.g. a `- ` list
/// marker) starts the next part. Returned ranges tile `piece`.
fn split_keep_separator(piece: &str, sep: &str) -> Vec<(usize, usize)> {
    let marker_at = sep
        .find(|c: char| !c.is_whitespace())
        .unwrap_or(sep.len());
    let mut parts = Vec::new();
    let mut last = 0;
    for (pos, _) in piece.match_indices(sep) {
        let cut = pos + marker_at;
        if cut > last {
            parts.push((last, cut));
            last = cut;
        }
    }
    if last < piece.len() {
        parts.push((last, piece.len()));
    }
    parts
}

fn merge_atoms(
    text: &str,
    atoms: &[Atom],
    metadata: &Metadata,
    profile: &ChunkProfile,
) -> Vec<Unit> {
    let mut units = Vec::new();
    let mut window: VecDeque<Atom> = VecDeque::new();
    let mut total = 0usize;

    for atom in atoms {
        if total + atom.char_len > profile.chunk_size && !window.is_empty() {
            emit(text, &window, metadata, &mut units);
            while total > profile.chunk_overlap
                || (total + atom.char_len > profile.chunk_size && total > 0)
            {
                match window.pop_front() {
                    Some(front) => total -= front.char_len,
                    None => break,
                }
            }
        }
        window.push_back(*atom);
        total += atom.char_len;
    }

    if !window.is_empty() {
        emit(text, &window, metadata, &mut units);
    }

    units
}

fn emit(text: &str, window: &VecDeque<Atom>, metadata: &Metadata, out: &mut Vec<Unit>) {
    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return;
    };
    let slice = &text[first.byte_start..last.byte_end];
    if slice.trim().is_empty() {
        return;
    }
    let mut meta = metadata.clone();
    meta.insert(
        META_START_INDEX.to_string(),
        Value::from(first.char_start as u64),
    );
    out.push(Unit::new(slice, meta));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{:03}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Rebuild the source from chunks by skipping each chunk's overlap with
    /// the previous one.
    fn reconstruct(units: &[Unit]) -> String {
        let mut out = String::new();
        let mut prev_end = 0usize;
        for (i, u) in units.iter().enumerate() {
            let start = u.start_index().unwrap();
            let len = u.text.chars().count();
            if i == 0 {
                out.push_str(&u.text);
            } else {
                let skip = prev_end.saturating_sub(start);
                out.extend(u.text.chars().skip(skip));
            }
            prev_end = start + len;
        }
        out
    }

    #[test]
    fn test_short_text_single_chunk() {
        let units = split_text("Hello, world!", &Metadata::new(), &ChunkProfile::generic());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "Hello, world!");
        assert_eq!(units[0].start_index(), Some(0));
    }

    #[test]
    fn test_short_text_is_trimmed() {
        let units = split_text("  padded text \n", &Metadata::new(), &ChunkProfile::generic());
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].text, "padded text");
        assert_eq!(units[0].start_index(), Some(2));
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert!(split_text("", &Metadata::new(), &ChunkProfile::generic()).is_empty());
        assert!(split_text(" \n\n\t ", &Metadata::new(), &ChunkProfile::generic()).is_empty());
    }

    #[test]
    fn test_chunks_respect_size_limit() {
        let text = words(400);
        let profile = ChunkProfile::new(100, 20, &["\n\n", "\n", " ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert!(units.len() > 1);
        for u in &units {
            assert!(u.text.chars().count() <= 100, "chunk too long: {}", u.text.len());
        }
    }

    #[test]
    fn test_reconstruction_is_lossless() {
        let text = format!(
            "{}\n\n{}\nline two\n\n{}",
            words(60),
            words(30),
            "x".repeat(350)
        );
        let profile = ChunkProfile::new(120, 30, &["\n\n", "\n", " ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert_eq!(reconstruct(&units), text);
    }

    #[test]
    fn test_adjacent_chunks_overlap_within_limit() {
        let text = words(200);
        let profile = ChunkProfile::new(100, 20, &[" ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        for pair in units.windows(2) {
            let prev_end = pair[0].start_index().unwrap() + pair[0].text.chars().count();
            let next_start = pair[1].start_index().unwrap();
            assert!(next_start < prev_end, "expected overlap between chunks");
            assert!(prev_end - next_start <= 20);
        }
    }

    #[test]
    fn test_start_index_monotonic() {
        let text = words(500);
        let units = split_text(&text, &Metadata::new(), &ChunkProfile::generic());
        let starts: Vec<usize> = units.iter().map(|u| u.start_index().unwrap()).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(starts[0], 0);
    }

    #[test]
    fn test_paragraph_separator_preferred() {
        let p1 = "a".repeat(60);
        let p2 = "b".repeat(60);
        let text = format!("{}\n\n{}", p1, p2);
        let profile = ChunkProfile::new(100, 20, &["\n\n", "\n", " ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].text.trim_end(), p1);
        assert_eq!(units[1].text, p2);
        assert_eq!(units[1].start_index(), Some(62));
    }

    #[test]
    fn test_hard_split_without_separators() {
        let text = "z".repeat(250);
        let profile = ChunkProfile::new(100, 20, &["\n\n", "\n", " ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        let starts: Vec<usize> = units.iter().map(|u| u.start_index().unwrap()).collect();
        assert_eq!(starts, vec![0, 80, 160]);
        assert!(units.iter().all(|u| u.text.chars().count() <= 100));
    }

    #[test]
    fn test_unsplittable_token_kept_whole_when_no_empty_separator() {
        let text = format!("short {}", "q".repeat(150));
        let profile = ChunkProfile::new(100, 10, &[" "]);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert!(units.iter().any(|u| u.text.chars().count() == 150));
    }

    #[test]
    fn test_list_items_kept_intact() {
        let item = |n: usize| format!("- item {} {}", n, "detail ".repeat(8).trim_end());
        let text = (0..12).map(item).collect::<Vec<_>>().join("\n");
        let profile = ChunkProfile::structured_field().with_size(200, 20);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert!(units.len() > 1);
        for u in &units[1..] {
            assert!(u.text.starts_with("- item"), "chunk split inside list item: {:?}", u.text);
        }
    }

    #[test]
    fn test_multibyte_utf8_offsets() {
        let text = "┌──┐ ".repeat(60);
        let profile = ChunkProfile::new(50, 10, &[" ", ""]);
        let units = split_text(&text, &Metadata::new(), &profile);
        assert!(units.len() > 1);
        for u in &units {
            assert!(u.text.chars().count() <= 50);
        }
        assert_eq!(reconstruct(&units), text.trim());
    }

    #[test]
    fn test_metadata_propagated() {
        let mut meta = Metadata::new();
        meta.insert("source".into(), json!("pdf"));
        meta.insert("page".into(), json!(3));
        let units = split_text(&words(400), &meta, &ChunkProfile::generic());
        for u in &units {
            assert_eq!(u.metadata.get("source"), Some(&json!("pdf")));
            assert_eq!(u.metadata.get("page"), Some(&json!(3)));
            assert!(u.start_index().is_some());
        }
    }

    #[test]
    fn test_deterministic() {
        let text = format!("{}\n\n{}", words(150), words(150));
        let a = split_text(&text, &Metadata::new(), &ChunkProfile::generic());
        let b = split_text(&text, &Metadata::new(), &ChunkProfile::generic());
        assert_eq!(a, b);
    }

    #[test]
    fn test_split_units_keeps_parent_order() {
        let mut m1 = Metadata::new();
        m1.insert("page".into(), json!(1));
        let mut m2 = Metadata::new();
        m2.insert("page".into(), json!(2));
        let units = vec![Unit::new("first page", m1), Unit::new("second page", m2)];
        let out = split_units(&units, &ChunkProfile::generic());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metadata.get("page"), Some(&json!(1)));
        assert_eq!(out[1].metadata.get("page"), Some(&json!(2)));
    }
}
