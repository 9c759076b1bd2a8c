//! `ueberzug layer` backend: one JSON command per line on the child's stdin.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use serde_json::json;
use tracing::{info, warn};

use super::{Canvas, CanvasError, PlacementId, Visibility};

#[derive(Debug, Clone)]
struct Placement {
    index: u32,
    path: PathBuf,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// Draws images through an `ueberzug layer --parser json` process.
pub struct UeberzugCanvas<W: Write = ChildStdin> {
    out: W,
    child: Option<Child>,
    placements: HashMap<String, Placement>,
    visibility: Visibility,
}

impl UeberzugCanvas<ChildStdin> {
    /// Start the `ueberzug` child process.
    pub fn spawn() -> Result<Self, CanvasError> {
        let mut child = Command::new("ueberzug")
            .args(["layer", "--parser", "json", "--silent"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(CanvasError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| {
            CanvasError::Spawn(std::io::Error::other("ueberzug stdin unavailable"))
        })?;
        info!(pid = child.id(), "ueberzug started");
        let mut canvas = Self::with_writer(stdin);
        canvas.child = Some(child);
        Ok(canvas)
    }
}

impl<W: Write> UeberzugCanvas<W> {
    pub fn with_writer(out: W) -> Self {
        Self {
            out,
            child: None,
            placements: HashMap::new(),
            visibility: Visibility::default(),
        }
    }

    fn command(&mut self, command: serde_json::Value) -> Result<(), CanvasError> {
        writeln!(self.out, "{command}")?;
        Ok(())
    }
}

impl<W: Write> Canvas for UeberzugCanvas<W> {
    fn init(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }

    fn deinit(&mut self) {
        let visible: Vec<String> = self.visibility.visible().cloned().collect();
        for identifier in visible {
            let _ = self.command(json!({"action": "remove", "identifier": identifier}));
        }
        let _ = self.out.flush();
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                warn!(error = %e, "failed to stop ueberzug");
            }
            let _ = child.wait();
        }
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
        let key = format!("{identifier}-{}-{x}-{y}-{width}-{height}", std::process::id());
        let index = self.placements.len() as u32;
        let placement = self.placements.entry(key.clone()).or_insert_with(|| Placement {
            index,
            path: path.to_path_buf(),
            x,
            y,
            width,
            height,
        });
        placement.path = path.to_path_buf();
        let index = placement.index;
        self.visibility.show(&key);
        Some(PlacementId(index))
    }

    fn present(&mut self) -> Result<(), CanvasError> {
        let changes = self.visibility.take_changes();
        for identifier in changes.hide {
            self.command(json!({"action": "remove", "identifier": identifier}))?;
        }
        for identifier in changes.show {
            let Some(p) = self.placements.get(&identifier).cloned() else {
                continue;
            };
            self.command(json!({
                "action": "add",
                "identifier": identifier,
                "path": p.path,
                "x": p.x,
                "y": p.y,
                "width": p.width,
                "height": p.height,
                "scaler": "fit_contain",
            }))?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Drop for UeberzugCanvas<W> {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
