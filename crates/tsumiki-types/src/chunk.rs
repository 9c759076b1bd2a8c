//! Output chunks: the closed set of things an execution can produce.
//!
//! A chunk is one unit of rendered execution output. The variant set is
//! closed ([`ChunkKind`]) and each chunk may carry the raw Jupyter-style
//! `(data, metadata)` bundle it was built from. The raw bundle is what gets
//! persisted; chunks synthesized locally (stream text, errors, debug markers)
//! carry none and are skipped on save.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mimetype → payload mapping, as sent by the kernel.
pub type MimeBundle = Map<String, Value>;

/// The raw bundle a chunk was derived from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBundle {
    pub data: MimeBundle,
    pub metadata: Map<String, Value>,
}

impl RawBundle {
    pub fn new(data: MimeBundle, metadata: Map<String, Value>) -> Self {
        Self { data, metadata }
    }

    /// Mimetypes present in the bundle, in the order the kernel sent them.
    pub fn mimetypes(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}

/// A rasterized image materialized on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageChunk {
    /// Temp file holding the PNG.
    pub path: PathBuf,
    /// Hex hash of the decoded pixel data; stable identity for canvas reuse.
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
}

/// What a chunk is.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkKind {
    /// Text shown verbatim (escape sequences are stripped at render time).
    Text(String),
    /// A kernel-reported error.
    Error {
        name: String,
        message: String,
        traceback: Vec<String>,
    },
    /// The kernel aborted the execution without an error message.
    Aborted,
    Image(ImageChunk),
    /// Debug listing of the mimetypes received for one result.
    MimetypeDebug(Vec<String>),
    /// No renderable representation was found among these mimetypes.
    Bad(Vec<String>),
}

impl ChunkKind {
    /// Textual form of every non-image variant.
    ///
    /// Returns `None` for images, which are placed on a canvas instead.
    pub fn display_text(&self) -> Option<String> {
        match self {
            ChunkKind::Text(text) => Some(text.clone()),
            ChunkKind::Error {
                name,
                message,
                traceback,
            } => {
                let mut lines = vec![format!("[Error] {name}: {message}"), "Traceback:".to_string()];
                lines.extend(traceback.iter().cloned());
                Some(lines.join("\n") + "\n")
            }
            ChunkKind::Aborted => Some("<Kernel aborted with no error message.>\n".to_string()),
            ChunkKind::Image(_) => None,
            ChunkKind::MimetypeDebug(mimetypes) => {
                Some(format!("[DEBUG] Received mimetypes: {mimetypes:?}\n"))
            }
            ChunkKind::Bad(mimetypes) => {
                Some(format!("<No usable MIMEtype! Received mimetypes {mimetypes:?}>\n"))
            }
        }
    }

    /// True for the variants that mark the execution as failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, ChunkKind::Error { .. } | ChunkKind::Aborted)
    }
}

/// One unit of output, optionally carrying the bundle it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputChunk {
    pub kind: ChunkKind,
    pub raw: Option<RawBundle>,
}

impl OutputChunk {
    /// A chunk with no raw bundle (not persisted).
    pub fn synthesized(kind: ChunkKind) -> Self {
        Self { kind, raw: None }
    }

    /// A chunk derived from a kernel bundle (persisted on save).
    pub fn from_bundle(kind: ChunkKind, raw: RawBundle) -> Self {
        Self {
            kind,
            raw: Some(raw),
        }
    }

    /// Verbatim text, as received on a stream.
    pub fn text(text: impl Into<String>) -> Self {
        Self::synthesized(ChunkKind::Text(text.into()))
    }

    /// Text followed by a newline, the form used for `text/plain` results.
    pub fn text_line(text: impl AsRef<str>) -> Self {
        Self::synthesized(ChunkKind::Text(format!("{}\n", text.as_ref())))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>, traceback: Vec<String>) -> Self {
        Self::synthesized(ChunkKind::Error {
            name: name.into(),
            message: message.into(),
            traceback,
        })
    }

    pub fn aborted() -> Self {
        Self::synthesized(ChunkKind::Aborted)
    }

    /// Attach (or replace) the raw bundle.
    pub fn with_raw(mut self, raw: RawBundle) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Whether this chunk is written to persisted sessions.
    pub fn is_persistent(&self) -> bool {
        self.raw.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
