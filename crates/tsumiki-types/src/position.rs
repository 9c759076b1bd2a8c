//! Positions and spans inside a mutable document.
//!
//! A [`Position`] is a plain coordinate snapshot. A [`LivePosition`] is a
//! handle into the document's anchor table; its coordinates move with edits
//! and are recomputed on every read through an [`AnchorResolver`].
//!
//! [`Span`] is built from two live positions and is what the execution ledger
//! uses as a map key. Its equality and hash come from the anchor handles, so a
//! span keeps its identity while the text around it is edited.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::ids::{AnchorId, DocumentId};

/// A 0-based `(line, column)` coordinate inside one document.
///
/// Positions order lexicographically by `(line, column)`. Positions belonging
/// to different documents are unordered (`partial_cmp` returns `None`).
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Position {
    pub document: DocumentId,
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(document: DocumentId, line: u32, column: u32) -> Self {
        Self {
            document,
            line,
            column,
        }
    }

    /// Compare coordinates only, ignoring the document.
    pub fn cmp_coords(&self, other: &Position) -> Ordering {
        (self.line, self.column).cmp(&(other.line, other.column))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.document != other.document {
            return None;
        }
        Some(self.cmp_coords(other))
    }
}

/// Resolves anchor handles to their current coordinates.
///
/// Implemented by the host document. Returns `None` for anchors that were
/// released (or never existed); callers must treat that as "gone" rather than
/// reuse stale coordinates.
pub trait AnchorResolver {
    fn resolve_anchor(&self, anchor: AnchorId) -> Option<(u32, u32)>;
}

/// A position tracked by the document's anchor table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct LivePosition {
    pub document: DocumentId,
    pub anchor: AnchorId,
}

impl LivePosition {
    pub fn new(document: DocumentId, anchor: AnchorId) -> Self {
        Self { document, anchor }
    }

    /// Current coordinates, or `None` if the anchor was released.
    pub fn resolve<R: AnchorResolver + ?Sized>(&self, resolver: &R) -> Option<Position> {
        resolver
            .resolve_anchor(self.anchor)
            .map(|(line, column)| Position::new(self.document, line, column))
    }
}

/// Half-open coordinate range `[begin, end)` inside one document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticSpan {
    pub begin: Position,
    pub end: Position,
}

impl StaticSpan {
    /// Build a span; both ends must belong to the same document.
    pub fn new(begin: Position, end: Position) -> Self {
        debug_assert_eq!(begin.document, end.document);
        Self { begin, end }
    }

    pub fn document(&self) -> DocumentId {
        self.begin.document
    }

    /// `begin <= pos < end`. The end is exclusive.
    pub fn contains(&self, pos: &Position) -> bool {
        if pos.document != self.begin.document {
            return false;
        }
        self.begin.cmp_coords(pos) != Ordering::Greater && pos.cmp_coords(&self.end) == Ordering::Less
    }

    /// True when begin and end are on the same line.
    pub fn is_single_line(&self) -> bool {
        self.begin.line == self.end.line
    }
}

/// A tracked code region: two live anchors, compared by identity.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct Span {
    pub begin: LivePosition,
    pub end: LivePosition,
}

impl Span {
    pub fn new(begin: LivePosition, end: LivePosition) -> Self {
        debug_assert_eq!(begin.document, end.document);
        Self { begin, end }
    }

    pub fn document(&self) -> DocumentId {
        self.begin.document
    }

    /// Both anchors owned by this span, for release on deletion.
    pub fn anchors(&self) -> [AnchorId; 2] {
        [self.begin.anchor, self.end.anchor]
    }

    /// Snapshot the current coordinates. `None` once either anchor is gone.
    pub fn resolve<R: AnchorResolver + ?Sized>(&self, resolver: &R) -> Option<StaticSpan> {
        Some(StaticSpan::new(
            self.begin.resolve(resolver)?,
            self.end.resolve(resolver)?,
        ))
    }

    /// Whether `pos` currently lies inside the span.
    pub fn contains<R: AnchorResolver + ?Sized>(&self, resolver: &R, pos: &Position) -> bool {
        self.resolve(resolver).is_some_and(|s| s.contains(pos))
    }
}

/// Serialized coordinate, as written in persisted sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub lineno: u32,
    pub colno: u32,
}

impl From<Position> for PositionRecord {
    fn from(p: Position) -> Self {
        Self {
            lineno: p.line,
            colno: p.column,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
