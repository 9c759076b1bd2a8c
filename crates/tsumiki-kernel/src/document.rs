//! The host document boundary.
//!
//! The ledger never computes coordinate deltas itself. It asks the document to
//! create anchors, resolve them to current coordinates, and release them. Any
//! host editor can implement [`Document`]; [`TextDocument`] is the in-memory
//! implementation used by the bundled binary and by tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tsumiki_types::{AnchorId, AnchorResolver, DocumentId, StaticSpan};

/// Column value meaning "end of line" when creating anchors.
pub const END_OF_LINE: u32 = u32::MAX;

/// A live text buffer with an anchor table.
///
/// Columns are byte offsets into the line.
pub trait Document: AnchorResolver {
    fn id(&self) -> DocumentId;

    /// Backing file, if the document corresponds to one.
    fn path(&self) -> Option<&Path>;

    /// Display name for messages.
    fn name(&self) -> String {
        match self.path() {
            Some(path) => path.display().to_string(),
            None => format!("[document {}]", self.id()),
        }
    }

    fn line_count(&self) -> u32;

    /// Text of one line without its terminator.
    fn line(&self, line: u32) -> Option<String>;

    /// Track `(line, column)` from now on. Out-of-range coordinates are clamped;
    /// [`END_OF_LINE`] places the anchor after the last byte of the line.
    fn create_anchor(&mut self, line: u32, column: u32) -> AnchorId;

    /// Stop tracking an anchor. Releasing an unknown anchor is a no-op.
    fn release_anchor(&mut self, anchor: AnchorId);

    /// Full contents, lines joined by `\n`.
    fn contents(&self) -> String {
        (0..self.line_count())
            .filter_map(|n| self.line(n))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Text covered by `span`.
    fn text_in(&self, span: &StaticSpan) -> String {
        let (begin, end) = (span.begin, span.end);
        if begin.line == end.line {
            let line = self.line(begin.line).unwrap_or_default();
            return slice_columns(&line, begin.column, end.column).to_string();
        }

        let mut parts = Vec::new();
        let first = self.line(begin.line).unwrap_or_default();
        parts.push(slice_columns(&first, begin.column, END_OF_LINE).to_string());
        for n in begin.line + 1..end.line {
            parts.push(self.line(n).unwrap_or_default());
        }
        let last = self.line(end.line).unwrap_or_default();
        parts.push(slice_columns(&last, 0, end.column).to_string());
        parts.join("\n")
    }
}

/// Byte-column slice clamped to the line and to char boundaries.
pub fn slice_columns(line: &str, from: u32, to: u32) -> &str {
    let from = floor_boundary(line, from as usize);
    let to = floor_boundary(line, to as usize).max(from);
    &line[from..to]
}

fn floor_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

// ============================================================================
// Anchor table
// ============================================================================

/// Anchors keyed by handle, transformed on every edit.
///
/// Anchors have right gravity: text inserted exactly at an anchor pushes it
/// forward. Anchors inside a deleted range collapse to the deletion start.
#[derive(Debug, Default)]
pub struct AnchorTable {
    anchors: HashMap<AnchorId, (u32, u32)>,
    next_id: u64,
}

impl AnchorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, line: u32, column: u32) -> AnchorId {
        let id = AnchorId::new(self.next_id);
        self.next_id += 1;
        self.anchors.insert(id, (line, column));
        id
    }

    pub fn remove(&mut self, anchor: AnchorId) -> bool {
        self.anchors.remove(&anchor).is_some()
    }

    pub fn get(&self, anchor: AnchorId) -> Option<(u32, u32)> {
        self.anchors.get(&anchor).copied()
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Shift anchors after inserting `text` at `(line, column)`.
    pub fn transform_insert(&mut self, line: u32, column: u32, text: &str) {
        let newlines = text.matches('\n').count() as u32;
        let tail_len = text.rsplit('\n').next().unwrap_or("").len() as u32;

        for pos in self.anchors.values_mut() {
            let (l, c) = *pos;
            if l == line && c >= column {
                *pos = if newlines == 0 {
                    (l, c + tail_len)
                } else {
                    (l + newlines, c - column + tail_len)
                };
            } else if l > line {
                *pos = (l + newlines, c);
            }
        }
    }

    /// Shift anchors after deleting `[begin, end)`.
    pub fn transform_delete(&mut self, begin: (u32, u32), end: (u32, u32)) {
        let removed_lines = end.0 - begin.0;

        for pos in self.anchors.values_mut() {
            let p = *pos;
            if p <= begin {
                continue;
            }
            *pos = if p < end {
                begin
            } else if p.0 == end.0 {
                (begin.0, begin.1 + (p.1 - end.1))
            } else {
                (p.0 - removed_lines, p.1)
            };
        }
    }
}

// ============================================================================
// In-memory document
// ============================================================================

/// A plain in-memory document.
#[derive(Debug)]
pub struct TextDocument {
    id: DocumentId,
    path: Option<PathBuf>,
    lines: Vec<String>,
    anchors: AnchorTable,
}

impl TextDocument {
    pub fn from_text(id: DocumentId, text: &str) -> Self {
        Self {
            id,
            path: None,
            lines: split_lines(text),
            anchors: AnchorTable::new(),
        }
    }

    /// Read a file into a document bound to that path.
    pub fn open(id: DocumentId, path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)?;
        let mut doc = Self::from_text(id, &text);
        doc.path = Some(path);
        Ok(doc)
    }

    /// Number of anchors still tracked.
    pub fn anchor_count(&self) -> usize {
        self.anchors.len()
    }

    /// Insert `text` at `(line, column)`, clamped to the document.
    pub fn insert(&mut self, line: u32, column: u32, text: &str) {
        let (line, column) = self.clamp(line, column);
        let current = &self.lines[line as usize];
        let (head, tail) = current.split_at(column as usize);
        let combined = format!("{head}{text}{tail}");

        let replacement = split_lines(&combined);
        self.lines
            .splice(line as usize..=line as usize, replacement);
        self.anchors.transform_insert(line, column, text);
    }

    /// Delete the text in `[begin, end)`, clamped to the document.
    pub fn delete(&mut self, begin: (u32, u32), end: (u32, u32)) {
        let begin = self.clamp(begin.0, begin.1);
        let end = self.clamp(end.0, end.1);
        if end <= begin {
            return;
        }

        let head = self.lines[begin.0 as usize][..begin.1 as usize].to_string();
        let tail = self.lines[end.0 as usize][end.1 as usize..].to_string();
        self.lines
            .splice(begin.0 as usize..=end.0 as usize, [format!("{head}{tail}")]);
        self.anchors.transform_delete(begin, end);
    }

    /// Replace the whole contents. Anchors are kept where they were, clamped.
    pub fn set_text(&mut self, text: &str) {
        self.lines = split_lines(text);
        let clamped: Vec<_> = self
            .anchors
            .anchors
            .iter()
            .map(|(id, &(l, c))| (*id, self.clamp(l, c)))
            .collect();
        for (id, pos) in clamped {
            self.anchors.anchors.insert(id, pos);
        }
    }

    fn clamp(&self, line: u32, column: u32) -> (u32, u32) {
        let last = self.lines.len().saturating_sub(1) as u32;
        let line = line.min(last);
        let text = &self.lines[line as usize];
        (line, floor_boundary(text, column as usize) as u32)
    }
}

impl AnchorResolver for TextDocument {
    fn resolve_anchor(&self, anchor: AnchorId) -> Option<(u32, u32)> {
        self.anchors.get(anchor)
    }
}

impl Document for TextDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn line_count(&self) -> u32 {
        self.lines.len() as u32
    }

    fn line(&self, line: u32) -> Option<String> {
        self.lines.get(line as usize).cloned()
    }

    fn create_anchor(&mut self, line: u32, column: u32) -> AnchorId {
        let (line, column) = self.clamp(line, column);
        self.anchors.insert(line, column)
    }

    fn release_anchor(&mut self, anchor: AnchorId) {
        self.anchors.remove(anchor);
    }
}

/// Split into lines; always at least one (possibly empty) line.
fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
