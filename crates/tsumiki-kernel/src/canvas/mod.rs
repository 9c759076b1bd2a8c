//! Image compositing backends.
//!
//! A canvas receives image placements in terminal cells. `clear` and
//! `add_image` only queue work; `present` flushes it, so a redraw that puts
//! the same image back in the same spot causes no flicker.
//!
//! Providers, selected by the `image_provider` option:
//!
//! | name       | backend                                         |
//! |------------|-------------------------------------------------|
//! | `none`     | [`NoCanvas`]: images are laid out but not drawn |
//! | `kitty`    | [`KittyCanvas`]: kitty graphics protocol        |
//! | `ueberzug` | [`UeberzugCanvas`]: `ueberzug layer` child      |

mod kitty;
mod ueberzug;

pub use kitty::KittyCanvas;
pub use ueberzug::UeberzugCanvas;

use std::collections::BTreeSet;
use std::path::Path;

/// Backend-assigned handle for one placed image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlacementId(pub u32);

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("unknown image provider: '{0}'")]
    UnknownProvider(String),
    #[error("failed to start image backend: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("image backend I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An image compositing surface.
pub trait Canvas {
    /// Called once before first use.
    fn init(&mut self) -> Result<(), CanvasError>;

    /// Called once after last use.
    fn deinit(&mut self);

    /// Mark every image currently shown for removal at the next `present`.
    fn clear(&mut self);

    /// Queue an image at cell `(x, y)` spanning `width` x `height` cells.
    /// `identifier` is the image's content hash.
    fn add_image(
        &mut self,
        path: &Path,
        identifier: &str,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Option<PlacementId>;

    /// Apply queued changes.
    fn present(&mut self) -> Result<(), CanvasError>;
}

/// The `none` provider.
#[derive(Debug, Default)]
pub struct NoCanvas;

impl Canvas for NoCanvas {
    fn init(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn clear(&mut self) {}

    fn add_image(&mut self, _: &Path, _: &str, _: u32, _: u32, _: u32, _: u32) -> Option<PlacementId> {
        None
    }

    fn present(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }
}

/// Build the canvas for a provider name.
pub fn canvas_for_provider(name: &str) -> Result<Box<dyn Canvas>, CanvasError> {
    match name {
        "none" => Ok(Box::new(NoCanvas)),
        "kitty" => Ok(Box::new(KittyCanvas::stdout())),
        "ueberzug" => Ok(Box::new(UeberzugCanvas::spawn()?)),
        other => Err(CanvasError::UnknownProvider(other.to_string())),
    }
}

/// Pending show/hide bookkeeping shared by the drawing backends.
#[derive(Debug, Default)]
pub(crate) struct Visibility {
    visible: BTreeSet<String>,
    to_show: BTreeSet<String>,
    to_hide: BTreeSet<String>,
}

/// What `present` has to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Changes {
    pub hide: Vec<String>,
    pub show: Vec<String>,
}

impl Visibility {
    pub fn show(&mut self, identifier: &str) {
        self.to_show.insert(identifier.to_string());
    }

    pub fn clear(&mut self) {
        self.to_hide.append(&mut self.visible);
    }

    /// Commit pending changes. Images both hidden and re-shown in the same
    /// frame are left alone.
    pub fn take_changes(&mut self) -> Changes {
        let hide = self.to_hide.difference(&self.to_show).cloned().collect();
        let show = self.to_show.difference(&self.to_hide).cloned().collect();
        self.visible.append(&mut self.to_show);
        self.to_hide.clear();
        Changes { hide, show }
    }

    pub fn visible(&self) -> impl Iterator<Item = &String> {
        self.visible.iter()
    }
}

/// Whether escape sequences must be wrapped for tmux passthrough.
pub(crate) fn inside_tmux() -> bool {
    let var = |name| std::env::var(name).unwrap_or_default();
    !var("TMUX").is_empty() || var("TERM_PROGRAM").contains("tmux") || var("TERM").contains("tmux")
}

// ============================================================================
// Tests
// ============================================================================
