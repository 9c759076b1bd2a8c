//! Persisted session schema.
//!
//! ```json
//! {
//!   "version": 1,
//!   "kernel": "python3",
//!   "content_checksum": "…",
//!   "cells": [
//!     {
//!       "span": {"begin": {"lineno": 0, "colno": 0}, "end": {"lineno": 0, "colno": 3}},
//!       "execution_count": 1,
//!       "status": 2,
//!       "success": true,
//!       "chunks": [{"data": {"text/plain": "2"}, "metadata": {}}]
//!     }
//!   ]
//! }
//! ```
//!
//! Only the schema lives here; building and applying it against a document is
//! the ledger's job.

use serde::{Deserialize, Serialize};

use crate::chunk::RawBundle;
use crate::output::OutputStatus;
use crate::position::PositionRecord;

/// The only format version this crate reads and writes.
pub const SESSION_FORMAT_VERSION: u32 = 1;

/// A whole persisted session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub version: u32,
    /// Kernel name to relaunch on load.
    pub kernel: String,
    /// Hash of the document contents at save time.
    pub content_checksum: String,
    pub cells: Vec<CellRecord>,
}

/// Coordinates of a persisted span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub begin: PositionRecord,
    pub end: PositionRecord,
}

/// One persisted cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub span: SpanRecord,
    /// `null` when the kernel never echoed the input.
    pub execution_count: Option<u32>,
    pub status: OutputStatus,
    pub success: bool,
    pub chunks: Vec<RawBundle>,
}

impl SessionFile {
    pub fn new(kernel: impl Into<String>, content_checksum: impl Into<String>) -> Self {
        Self {
            version: SESSION_FORMAT_VERSION,
            kernel: kernel.into(),
            content_checksum: content_checksum.into(),
            cells: Vec::new(),
        }
    }

    pub fn is_supported_version(&self) -> bool {
        self.version == SESSION_FORMAT_VERSION
    }
}

// ============================================================================
// Tests
// ============================================================================
