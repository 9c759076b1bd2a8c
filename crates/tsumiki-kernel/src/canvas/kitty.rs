//! Kitty graphics protocol backend.
//!
//! Images are transmitted as PNG (`f=100`) in base64 chunks of at most 4096
//! bytes, placed at the cursor, and deleted by id. Inside tmux every escape is
//! wrapped in a DCS passthrough.

use std::collections::HashMap;
use std::io::{Stdout, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crossterm::cursor::{MoveTo, RestorePosition, SavePosition};
use crossterm::queue;
use tracing::{debug, warn};

use super::{Canvas, CanvasError, PlacementId, Visibility, inside_tmux};

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone)]
struct KittyImage {
    id: u32,
    path: PathBuf,
    col: u32,
    row: u32,
    width: u32,
    height: u32,
}

/// Draws images with kitty graphics escapes written to `W`.
pub struct KittyCanvas<W: Write = Stdout> {
    out: W,
    tmux: bool,
    images: HashMap<String, KittyImage>,
    visibility: Visibility,
    next_id: u32,
}

impl KittyCanvas<Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout(), inside_tmux())
    }
}

impl<W: Write> KittyCanvas<W> {
    pub fn new(out: W, tmux: bool) -> Self {
        Self {
            out,
            tmux,
            images: HashMap::new(),
            visibility: Visibility::default(),
            // Kitty treats id 0 as "no id".
            next_id: 1,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn show(&mut self, image: &KittyImage) -> Result<(), CanvasError> {
        let data = std::fs::read(&image.path)?;
        let encoded = STANDARD.encode(data);
        let col = u16::try_from(image.col).unwrap_or(u16::MAX);
        let row = u16::try_from(image.row).unwrap_or(u16::MAX);

        queue!(self.out, SavePosition, MoveTo(col, row))?;
        let mut first = format!(
            "a=T,i={},f=100,c={},r={},C=1,z=10,q=2",
            image.id, image.width, image.height
        );
        let mut chunks = encoded.as_bytes().chunks(CHUNK_SIZE).peekable();
        while let Some(chunk) = chunks.next() {
            let more = u8::from(chunks.peek().is_some());
            let control = if first.is_empty() {
                format!("m={more}")
            } else {
                format!("{},m={more}", std::mem::take(&mut first))
            };
            self.out
                .write_all(&serialize_command(&control, Some(chunk), self.tmux))?;
        }
        queue!(self.out, RestorePosition)?;
        Ok(())
    }

    fn hide(&mut self, id: u32) -> Result<(), CanvasError> {
        let control = format!("a=d,d=i,i={id},q=2");
        self.out
            .write_all(&serialize_command(&control, None, self.tmux))?;
        Ok(())
    }
}

/// One graphics escape: `ESC _ G <control> [; payload] ESC \`.
fn serialize_command(control: &str, payload: Option<&[u8]>, tmux: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(control.len() + payload.map_or(0, <[u8]>::len) + 8);
    out.extend_from_slice(b"\x1b_G");
    out.extend_from_slice(control.as_bytes());
    if let Some(payload) = payload {
        out.push(b';');
        out.extend_from_slice(payload);
    }
    out.extend_from_slice(b"\x1b\\");

    if !tmux {
        return out;
    }
    let mut wrapped = b"\x1bPtmux;".to_vec();
    for byte in out {
        if byte == 0x1b {
            wrapped.push(0x1b);
        }
        wrapped.push(byte);
    }
    wrapped.extend_from_slice(b"\x1b\\");
    wrapped
}

impl<W: Write> Canvas for KittyCanvas<W> {
    fn init(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }

    fn deinit(&mut self) {
        let ids: Vec<u32> = self
            .visibility
            .visible()
            .filter_map(|key| self.images.get(key).map(|i| i.id))
            .collect();
        for id in ids {
            if let Err(e) = self.hide(id) {
                warn!(error = %e, "failed to remove kitty image");
            }
        }
        let _ = self.out.flush();
    }

    fn clear(&mut self) {
        self.visibility.clear();
    }

    fn add_image(
        &mut self,
        path: &Path,
        identifier: &str,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Option<PlacementId> {
        if width == 0 || height == 0 {
            return None;
        }
        let key = format!("{identifier}-{x}-{y}-{width}-{height}");
        let next_id = &mut self.next_id;
        let image = self.images.entry(key.clone()).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            KittyImage {
                id,
                path: path.to_path_buf(),
                col: x,
                row: y,
                width,
                height,
            }
        });
        image.path = path.to_path_buf();
        let id = image.id;
        self.visibility.show(&key);
        Some(PlacementId(id))
    }

    fn present(&mut self) -> Result<(), CanvasError> {
        let changes = self.visibility.take_changes();
        for key in &changes.hide {
            if let Some(id) = self.images.get(key).map(|i| i.id) {
                self.hide(id)?;
            }
        }
        for key in &changes.show {
            if let Some(image) = self.images.get(key).cloned() {
                debug!(id = image.id, path = %image.path.display(), "showing kitty image");
                self.show(&image)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
