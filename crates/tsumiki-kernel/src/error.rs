//! Error types for kernel sessions, the ledger, and session persistence.
//!
//! The split follows who the error is for:
//!
//! - [`KernelError`]: transport and process failures talking to a kernel.
//! - [`LedgerError`]: user-facing failures of an operation on a document
//!   (no session, no cell under the cursor, …). These abort the operation
//!   before any state is touched.
//! - [`LoadError`]: malformed or mismatched persisted sessions.

use std::path::PathBuf;

use thiserror::Error;
use tsumiki_types::DocumentId;

/// Failures talking to a kernel process or channel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Code was submitted before the kernel confirmed readiness.
    #[error("kernel is not ready yet")]
    NotReady,

    /// No kernel with this name is configured.
    #[error("unknown kernel: '{0}'")]
    UnknownKernel(String),

    #[error("failed to spawn kernel '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The channel to the kernel is gone.
    #[error("kernel channel closed")]
    ChannelClosed,

    #[error("failed to signal kernel process: {0}")]
    Signal(String),

    #[error("bad connection file {path}: {reason}")]
    ConnectionFile { path: PathBuf, reason: String },

    #[error("bad kernelspec {path}: {reason}")]
    KernelSpecFile { path: PathBuf, reason: String },

    #[error("unsupported signature scheme: '{0}'")]
    SignatureScheme(String),

    /// Kernels attached through a connection file belong to someone else.
    #[error("kernel '{0}' was attached through a connection file and cannot be restarted")]
    CannotRestart(String),

    #[error("kernel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persisted-session problems.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read session file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed session file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("bad version: {0}")]
    BadVersion(u32),

    /// The document changed since the save; saved coordinates can't be trusted.
    #[error("document contents' checksum does not match")]
    ChecksumMismatch,

    #[error("saved span {line}:{column} is outside the document")]
    SpanOutOfRange { line: u32, column: u32 },
}

/// User-facing failures of ledger and registry operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no session for document {0}; initialize one with a kernel name first")]
    NoSession(DocumentId),

    #[error("a session is already initialized for document {0}")]
    AlreadyInitialized(DocumentId),

    #[error("not in a cell")]
    NotInCell,

    #[error("this kind of selection is not supported: '{0}'")]
    UnsupportedSelection(String),

    #[error("document does not correspond to a file")]
    NoFile,

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("error while doing session I/O: {0}")]
    Load(#[from] LoadError),

    #[error("failed to encode session: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to write session file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for ledger and registry operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
