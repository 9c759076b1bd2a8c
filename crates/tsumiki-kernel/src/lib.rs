//! # tsumiki-kernel
//!
//! Run code from a live document against an interactive kernel and keep the
//! results attached to the cells that produced them.
//!
//! ```text
//! Registry ── DocumentId ──▶ Ledger ──▶ Session ──▶ KernelTransport
//!    │                         │            │     (jupyter / process / channel)
//!    │                         │            └── MimeResolver + TempFiles
//!    │                         └── IndexMap<Span, Output>, FIFO queue
//!    └── Canvas (none / kitty / ueberzug)
//! ```
//!
//! The host drives everything from one thread: it calls `tick` on a timer,
//! `update_view` when the cursor moves, and the evaluate operations on user
//! commands. Only the transports' socket and pipe tasks run in the
//! background, feeding a channel that `tick` drains without blocking.

pub mod canvas;
pub mod clipboard;
pub mod config;
pub mod document;
pub mod error;
pub mod files;
pub mod jupyter;
pub mod launcher;
pub mod ledger;
pub mod message;
pub mod mime;
pub mod registry;
pub mod render;
pub mod session;
pub mod transport;

pub use canvas::{Canvas, CanvasError, KittyCanvas, NoCanvas, PlacementId, UeberzugCanvas, canvas_for_provider};
pub use clipboard::{ClipboardSink, SystemClipboard};
pub use config::{ConfigError, EnterOutputBehavior, KernelSpec, Options, RendererSpec, Renderers};
pub use document::{AnchorTable, Document, END_OF_LINE, TextDocument};
pub use error::{KernelError, LedgerError, LoadError, Result};
pub use files::TempFiles;
pub use launcher::{KernelLauncher, SystemLauncher};
pub use ledger::{EnterAction, Highlight, Ledger, LineRange, SelectionKind, TickOutcome, View, content_checksum};
pub use mime::{MimeResolver, RenderError};
pub use registry::{Registry, default_save_file, read_session_file};
pub use render::{OutputWindow, RenderContext, WindowGeometry, layout_output};
pub use session::Session;
pub use transport::{
    ChannelPeer, ChannelTransport, JupyterTransport, KernelTransport, ProcessTransport, channel_pair,
};
