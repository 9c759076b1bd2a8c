//! Shared data model for tsumiki.
//!
//! Pure leaf crate: positions and spans, output chunks, execution outputs,
//! kernel state, and the persisted session schema. No I/O happens here.
//!
//! # Key Types
//!
//! |------------------|-------------------------------------------------|
//! | Type             | Purpose                                         |
//! |------------------|-------------------------------------------------|
//! | [`Position`]     | Static `(document, line, column)` snapshot      |
//! | [`Span`]         | Tracked region, two anchors, identity-compared  |
//! | [`StaticSpan`]   | Resolved coordinates of a span                  |
//! | [`Output`]       | One execution's status + chunks                 |
//! | [`OutputChunk`]  | Text, error, aborted, image, debug, bad         |
//! | [`KernelState`]  | Starting / Idle / Busy                          |
//! | [`SessionFile`]  | Persisted session (version 1)                   |
//! |------------------|-------------------------------------------------|

pub mod chunk;
pub mod ids;
pub mod kernel;
pub mod output;
pub mod persist;
pub mod position;

pub use chunk::{ChunkKind, ImageChunk, MimeBundle, OutputChunk, RawBundle};
pub use ids::{AnchorId, DocumentId, MessageId, SessionId};
pub use kernel::KernelState;
pub use output::{Output, OutputStatus, StatusError};
pub use persist::{CellRecord, SESSION_FORMAT_VERSION, SessionFile, SpanRecord};
pub use position::{AnchorResolver, LivePosition, Position, PositionRecord, Span, StaticSpan};
