//! Laying out output chunks into a bounded window.
//!
//! Text chunks are cleaned of escape sequences and optionally wrapped. Image
//! chunks are handed to the canvas and reserve blank lines below the anchor,
//! sized from the image's pixel dimensions and the terminal's cell size.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use tsumiki_types::{ChunkKind, ImageChunk, Output, OutputChunk};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::canvas::Canvas;
use crate::config::Options;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("valid ANSI regex")
});

/// Remove ANSI escape sequences.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Region available for output, in cells: `x, y` of the top-left corner,
/// `width` and `height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Shape {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The host window showing the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowGeometry {
    /// Screen column of the window's left edge.
    pub col: u32,
    /// First document line visible in the window (0-based).
    pub top_line: u32,
    pub width: u32,
    pub height: u32,
}

/// Rendering inputs that don't change per chunk.
#[derive(Clone, Debug)]
pub struct RenderContext {
    pub wrap_output: bool,
    pub borders: bool,
    /// Pixel size of one terminal cell, when the terminal reports it.
    pub cell_pixels: Option<(u32, u32)>,
}

impl RenderContext {
    pub fn new(options: &Options, cell_pixels: Option<(u32, u32)>) -> Self {
        Self {
            wrap_output: options.wrap_output,
            borders: options.output_window_borders,
            cell_pixels,
        }
    }

    /// Like [`new`](Self::new), asking the terminal for its cell size.
    pub fn detect(options: &Options) -> Self {
        Self::new(options, cell_pixel_size())
    }
}

/// Pixel size of a terminal cell, from the terminal's reported window size.
pub fn cell_pixel_size() -> Option<(u32, u32)> {
    let size = crossterm::terminal::window_size().ok()?;
    if size.width == 0 || size.height == 0 || size.columns == 0 || size.rows == 0 {
        return None;
    }
    Some((
        (u32::from(size.width) / u32::from(size.columns)).max(1),
        (u32::from(size.height) / u32::from(size.rows)).max(1),
    ))
}

/// Render one chunk starting `lineno` lines into the output area.
///
/// Returns the text to show; for images this is blank lines reserving the
/// space the canvas draws into.
pub fn render_chunk(
    chunk: &OutputChunk,
    lineno: u32,
    shape: Shape,
    canvas: &mut dyn Canvas,
    ctx: &RenderContext,
) -> String {
    match &chunk.kind {
        ChunkKind::Image(image) => {
            let nlines = image_lines(image, lineno, shape, ctx.cell_pixels);
            canvas.add_image(
                &image.path,
                &image.content_hash,
                shape.x,
                shape.y + lineno + 1,
                shape.width,
                nlines,
            );
            "\n".repeat(nlines as usize)
        }
        other => {
            let text = strip_ansi(&other.display_text().unwrap_or_default()).replace("\r\n", "\n");
            if ctx.wrap_output {
                text.split('\n')
                    .map(|line| wrap_line(line, shape.width as usize).join("\n"))
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                text
            }
        }
    }
}

/// Lines an image occupies: as many as fit below the anchor, shrunk to keep
/// the aspect ratio within the available width.
pub fn image_lines(image: &ImageChunk, lineno: u32, shape: Shape, cell_pixels: Option<(u32, u32)>) -> u32 {
    let max_lines = (i64::from(shape.height) - i64::from(shape.y) - i64::from(lineno) - 1).max(0) as u32;
    if image.width == 0 || image.height == 0 {
        return 0;
    }

    let Some((xpixels, ypixels)) = cell_pixels else {
        return max_lines / 3;
    };
    let (xpixels, ypixels) = (xpixels.max(1), ypixels.max(1));
    let cols = f64::from(image.width) / f64::from(xpixels);
    let rows = f64::from(image.height) / f64::from(ypixels);

    let lines = if (cols / rows) * f64::from(max_lines) <= f64::from(shape.width) {
        max_lines
    } else {
        ((rows / cols) * f64::from(shape.width)).floor() as u32
    };
    lines.min(image.height / ypixels)
}

/// Greedy wrap by display width.
///
/// Whitespace inside a line is kept as is, leading indentation included;
/// only the whitespace at a break disappears. Tabs expand to 8 columns.
/// Words wider than `width` are split. A blank line wraps to nothing.
pub fn wrap_line(line: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![line.to_string()];
    }

    let line = expand_tabs(line);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0;

    for (blank, piece) in pieces(&line) {
        let piece_width = piece.width();
        if blank {
            if current.is_empty() && !lines.is_empty() {
                continue;
            }
            if current_width + piece_width > width {
                flush(&mut lines, &mut current, &mut current_width);
            } else {
                current.push_str(piece);
                current_width += piece_width;
            }
            continue;
        }

        if current_width + piece_width > width {
            flush(&mut lines, &mut current, &mut current_width);
        }
        if piece_width <= width {
            current.push_str(piece);
            current_width += piece_width;
            continue;
        }
        for c in piece.chars() {
            let w = c.width().unwrap_or(0);
            if current_width + w > width && current_width > 0 {
                flush(&mut lines, &mut current, &mut current_width);
            }
            current.push(c);
            current_width += w;
        }
    }
    flush(&mut lines, &mut current, &mut current_width);
    lines
}

const TAB_WIDTH: usize = 8;

fn expand_tabs(line: &str) -> Cow<'_, str> {
    if !line.contains('\t') {
        return Cow::Borrowed(line);
    }
    let mut out = String::with_capacity(line.len() + TAB_WIDTH);
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let n = TAB_WIDTH - column % TAB_WIDTH;
            out.extend(std::iter::repeat_n(' ', n));
            column += n;
        } else {
            out.push(c);
            column += c.width().unwrap_or(0);
        }
    }
    Cow::Owned(out)
}

/// Alternating runs of whitespace and non-whitespace, tagged `true` for
/// whitespace.
fn pieces(line: &str) -> impl Iterator<Item = (bool, &str)> {
    let mut rest = line;
    std::iter::from_fn(move || {
        let blank = rest.chars().next()?.is_whitespace();
        let end = rest
            .find(|c: char| c.is_whitespace() != blank)
            .unwrap_or(rest.len());
        let (piece, tail) = rest.split_at(end);
        rest = tail;
        Some((blank, piece))
    })
}

/// Finish the line being built, without its trailing whitespace.
fn flush(lines: &mut Vec<String>, current: &mut String, current_width: &mut usize) {
    let line = std::mem::take(current);
    *current_width = 0;
    let line = line.trim_end();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
}

/// A laid-out output window, ready for the host to draw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputWindow {
    pub header: String,
    pub lines: Vec<String>,
    /// Row inside the host window where the output window starts.
    pub row: u32,
    pub width: u32,
    /// Rows including the header.
    pub height: u32,
    pub border: bool,
}

/// Lay out `output` below the line `anchor_line` of the host window.
///
/// Images are queued on `canvas` whether or not the window fits. Returns
/// `None` when the anchor is too low for the window to open.
pub fn layout_output(
    output: &Output,
    anchor_line: u32,
    window: &WindowGeometry,
    canvas: &mut dyn Canvas,
    ctx: &RenderContext,
) -> Option<OutputWindow> {
    let row = (anchor_line + 1).saturating_sub(window.top_line);
    let mut height = window.height;
    if ctx.borders {
        height = height.saturating_sub(2);
    }
    let shape = Shape {
        x: window.col,
        y: row,
        width: window.width,
        height,
    };

    let mut text = String::new();
    let mut lineno = 0;
    for chunk in output.chunks() {
        let rendered = render_chunk(chunk, lineno, shape, canvas, ctx);
        lineno += rendered.matches('\n').count() as u32;
        text.push_str(&rendered);
    }

    let lines: Vec<String> = if output.chunks().is_empty() {
        Vec::new()
    } else {
        text.trim_end()
            .split('\n')
            .filter_map(|line| line.rsplit('\r').next())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    };

    if row >= height {
        return None;
    }
    Some(OutputWindow {
        header: output.header_text(),
        height: (height - row).min(lines.len() as u32 + 1),
        lines,
        row,
        width: window.width,
        border: ctx.borders,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{CanvasError, NoCanvas, PlacementId};
    use std::path::{Path, PathBuf};

    #[derive(Default)]
    struct RecordingCanvas {
        placed: Vec<(String, u32, u32, u32, u32)>,
    }

    impl Canvas for RecordingCanvas {
        fn init(&mut self) -> Result<(), CanvasError> {
            Ok(())
        }
        fn deinit(&mut self) {}
        fn clear(&mut self) {}
        fn add_image(&mut self, _: &Path, id: &str, x: u32, y: u32, w: u32, h: u32) -> Option<PlacementId> {
            self.placed.push((id.to_string(), x, y, w, h));
            Some(PlacementId(self.placed.len() as u32))
        }
        fn present(&mut self) -> Result<(), CanvasError> {
            Ok(())
        }
    }

    fn ctx(wrap: bool, borders: bool, cell_pixels: Option<(u32, u32)>) -> RenderContext {
        RenderContext {
            wrap_output: wrap,
            borders,
            cell_pixels,
        }
    }

    fn window(height: u32) -> WindowGeometry {
        WindowGeometry {
            col: 0,
            top_line: 0,
            width: 40,
            height,
        }
    }

    fn image(width: u32, height: u32) -> OutputChunk {
        OutputChunk::synthesized(ChunkKind::Image(ImageChunk {
            path: PathBuf::from("/tmp/img.png"),
            content_hash: "cafe".into(),
            width,
            height,
        }))
    }

    #[test]
    fn test_strip_ansi_removes_color_codes() {
        assert_eq!(strip_ansi("\x1b[0;31mValueError\x1b[0m: bad"), "ValueError: bad");
    }

    #[test]
    fn test_text_chunk_cleanup() {
        let chunk = OutputChunk::text("a\r\n\x1b[1mb\x1b[0m\n");
        let out = render_chunk(&chunk, 0, Shape { x: 0, y: 0, width: 80, height: 20 }, &mut NoCanvas, &ctx(false, true, None));
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_wrap_line() {
        assert_eq!(wrap_line("the quick brown fox", 9), vec!["the quick", "brown fox"]);
        assert_eq!(wrap_line("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert!(wrap_line("", 10).is_empty());
        assert_eq!(wrap_line("日本語テキスト", 6), vec!["日本語", "テキス", "ト"]);
    }

    #[test]
    fn test_wrap_line_keeps_indentation_and_spacing() {
        assert_eq!(wrap_line("    indented   a  b", 40), vec!["    indented   a  b"]);
        assert_eq!(
            wrap_line("    def f(x):  return x", 16),
            vec!["    def f(x):", "return x"]
        );
        assert_eq!(wrap_line("\tx", 20), vec!["        x"]);
        assert!(wrap_line("    ", 10).is_empty());
    }

    #[test]
    fn test_image_lines_without_cell_size_uses_a_third() {
        let shape = Shape { x: 0, y: 5, width: 80, height: 40 };
        let ChunkKind::Image(img) = image(100, 100).kind else { unreachable!() };
        // max = 40 - 5 - 0 - 1 = 34
        assert_eq!(image_lines(&img, 0, shape, None), 11);
        assert_eq!(image_lines(&img, 40, shape, None), 0);
    }

    #[test]
    fn test_image_lines_preserves_aspect_ratio() {
        let shape = Shape { x: 0, y: 0, width: 20, height: 51 };
        // 400x400 px with 10x20 px cells = 40 cols x 20 rows: too wide for
        // 20 columns, so height shrinks to 20 * (20 / 40) = 10.
        let ChunkKind::Image(img) = image(400, 400).kind else { unreachable!() };
        assert_eq!(image_lines(&img, 0, shape, Some((10, 20))), 10);

        // A tall narrow image is capped by its own height in rows.
        let ChunkKind::Image(img) = image(10, 100).kind else { unreachable!() };
        assert_eq!(image_lines(&img, 0, shape, Some((10, 20))), 5);
    }

    #[test]
    fn test_image_lines_tolerates_zero_cell_size() {
        let shape = Shape { x: 0, y: 0, width: 20, height: 51 };
        let ChunkKind::Image(img) = image(10, 100).kind else { unreachable!() };
        // Treated as 1x1 px cells: 10 cols x 100 rows, capped at 50 lines.
        assert_eq!(image_lines(&img, 0, shape, Some((0, 0))), 50);
    }

    #[test]
    fn test_image_is_placed_below_anchor_line() {
        let mut out = Output::new();
        out.push_chunk(OutputChunk::text("caption\n"));
        out.push_chunk(image(100, 100));

        let mut canvas = RecordingCanvas::default();
        let win = layout_output(&out, 2, &window(20), &mut canvas, &ctx(false, false, None)).unwrap();

        assert_eq!(win.row, 3);
        assert_eq!(canvas.placed.len(), 1);
        let (id, x, y, w, h) = canvas.placed[0].clone();
        assert_eq!(id, "cafe");
        // One line of text precedes the image.
        assert_eq!((x, y, w), (0, 3 + 1 + 1, 40));
        assert_eq!(h, (20 - 3 - 1 - 1) / 3);
        // Trailing blank image lines are trimmed from the text.
        assert_eq!(win.lines, vec!["caption"]);
    }

    #[test]
    fn test_layout_header_and_carriage_returns() {
        let mut out = Output::new();
        out.advance_on_input(3).unwrap();
        out.push_chunk(OutputChunk::text("10%\r50%\r100%\n\n"));
        out.push_chunk(OutputChunk::text_line("done"));
        out.finish();

        let win = layout_output(&out, 0, &window(30), &mut NoCanvas, &ctx(false, true, None)).unwrap();
        assert_eq!(win.header, "Out[3]: ✓ Done");
        assert_eq!(win.lines, vec!["100%", "done"]);
        assert_eq!(win.height, 3);
        assert!(win.border);
    }

    #[test]
    fn test_layout_clips_height_and_refuses_low_anchor() {
        let mut out = Output::new();
        for i in 0..50 {
            out.push_chunk(OutputChunk::text_line(i.to_string()));
        }
        let win = layout_output(&out, 4, &window(12), &mut NoCanvas, &ctx(false, true, None)).unwrap();
        // 12 - 2 border rows = 10, starting at row 5.
        assert_eq!(win.height, 5);

        assert!(layout_output(&out, 9, &window(12), &mut NoCanvas, &ctx(false, true, None)).is_none());
    }

    #[test]
    fn test_empty_output_has_only_header() {
        let out = Output::new();
        let win = layout_output(&out, 0, &window(10), &mut NoCanvas, &ctx(false, false, None)).unwrap();
        assert!(win.lines.is_empty());
        assert_eq!(win.height, 1);
        assert_eq!(win.header, "Out[...]: * On Hold");
    }

    #[test]
    fn test_wrap_output_wraps_to_window_width() {
        let mut out = Output::new();
        out.push_chunk(OutputChunk::text_line("aaaa bbbb cccc"));
        let narrow = WindowGeometry { col: 0, top_line: 0, width: 9, height: 20 };
        let win = layout_output(&out, 0, &narrow, &mut NoCanvas, &ctx(true, false, None)).unwrap();
        assert_eq!(win.lines, vec!["aaaa bbbb", "cccc"]);
    }
}
