//! Mimetype resolution: turning a result bundle into one output chunk.
//!
//! Tiers are tried in priority order and the first one that produces a chunk
//! wins:
//!
//! 1. `image/png` (base64 payload)
//! 2. `image/svg+xml` (external renderer)
//! 3. `application/vnd.plotly.v1+json` (external renderer)
//! 4. `text/latex` (external renderer)
//! 5. `text/plain`
//!
//! A tier whose renderer is unconfigured, missing, or failing falls through to
//! the next one. When nothing applies the chunk is [`ChunkKind::Bad`].

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::{debug, warn};
use tsumiki_types::{ChunkKind, ImageChunk, MimeBundle, OutputChunk, RawBundle};

use crate::config::{RendererSpec, Renderers};
use crate::files::TempFiles;

pub const IMAGE_PNG: &str = "image/png";
pub const IMAGE_SVG: &str = "image/svg+xml";
pub const PLOTLY_JSON: &str = "application/vnd.plotly.v1+json";
pub const TEXT_LATEX: &str = "text/latex";
pub const TEXT_PLAIN: &str = "text/plain";

const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Why one tier could not produce a chunk.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("renderer '{0}' is not installed")]
    NotInstalled(String),
    #[error("renderer '{program}' did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
    #[error("renderer '{program}' failed with {status}")]
    Failed {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Builds chunks from bundles, materializing images into session temp files.
#[derive(Clone, Debug, Default)]
pub struct MimeResolver {
    renderers: Renderers,
}

impl MimeResolver {
    pub fn new(renderers: Renderers) -> Self {
        Self { renderers }
    }

    /// Resolve `raw` into a chunk that carries the bundle.
    pub fn resolve(&self, files: &mut TempFiles, raw: RawBundle) -> OutputChunk {
        let kind = self.resolve_kind(files, &raw.data);
        OutputChunk::from_bundle(kind, raw)
    }

    fn resolve_kind(&self, files: &mut TempFiles, data: &MimeBundle) -> ChunkKind {
        if let Some(payload) = data.get(IMAGE_PNG) {
            match decode_png(files, payload) {
                Ok(image) => return ChunkKind::Image(image),
                Err(e) => warn!(error = %e, "could not use image/png payload"),
            }
        }

        let external = [
            (IMAGE_SVG, &self.renderers.svg, ".svg"),
            (PLOTLY_JSON, &self.renderers.plotly, ".json"),
            (TEXT_LATEX, &self.renderers.latex, ".tex"),
        ];
        for (mimetype, renderer, suffix) in external {
            let Some(payload) = data.get(mimetype) else {
                continue;
            };
            let Some(renderer) = renderer else {
                debug!(mimetype, "no renderer configured, skipping");
                continue;
            };
            match render_external(files, renderer, suffix, payload) {
                Ok(image) => return ChunkKind::Image(image),
                Err(RenderError::NotInstalled(program)) => {
                    debug!(mimetype, %program, "renderer not installed, skipping");
                }
                Err(e) => warn!(mimetype, error = %e, "renderer failed, falling through"),
            }
        }

        if let Some(payload) = data.get(TEXT_PLAIN) {
            return ChunkKind::Text(format!("{}\n", payload_text(payload)));
        }

        ChunkKind::Bad(data.keys().cloned().collect())
    }
}

/// Text of a payload. Multiline payloads may arrive as a list of strings.
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        Value::Array(parts) if parts.iter().all(Value::is_string) => {
            parts.iter().filter_map(Value::as_str).collect()
        }
        other => other.to_string(),
    }
}

fn decode_png(files: &mut TempFiles, payload: &Value) -> Result<ImageChunk, RenderError> {
    let encoded: String = payload_text(payload)
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = STANDARD.decode(encoded)?;
    let path = files.alloc(".png")?;
    std::fs::write(&path, &bytes)?;
    image_chunk(path)
}

fn render_external(
    files: &mut TempFiles,
    renderer: &RendererSpec,
    suffix: &str,
    payload: &Value,
) -> Result<ImageChunk, RenderError> {
    let input = files.alloc(suffix)?;
    std::fs::write(&input, payload_text(payload))?;
    let output = files.alloc(".png")?;

    let mut child = Command::new(&renderer.program)
        .args(renderer.expand_args(&input, &output))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RenderError::NotInstalled(renderer.program.clone()),
            _ => RenderError::Io(e),
        })?;

    let deadline = Instant::now() + renderer.timeout();
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                debug!(error = %e, "renderer exited before it could be killed");
            }
            child.wait()?;
            return Err(RenderError::TimedOut {
                program: renderer.program.clone(),
                timeout: renderer.timeout(),
            });
        }
        std::thread::sleep(RENDER_POLL_INTERVAL);
    };
    if !status.success() {
        return Err(RenderError::Failed {
            program: renderer.program.clone(),
            status,
        });
    }
    image_chunk(output)
}

/// Decode an image file into a chunk. The hash covers decoded pixels, so two
/// encodings of the same picture share an identity.
pub fn image_chunk(path: PathBuf) -> Result<ImageChunk, RenderError> {
    let image = image::open(&path)?;
    Ok(ImageChunk {
        content_hash: pixel_hash(image.as_bytes()),
        width: image.width(),
        height: image.height(),
        path,
    })
}

fn pixel_hash(pixels: &[u8]) -> String {
    hex::encode(blake3::hash(pixels).as_bytes())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};
    use std::io::Cursor;

    fn bundle(data: Value) -> RawBundle {
        RawBundle::new(data.as_object().unwrap().clone(), Map::new())
    }

    fn png_base64(width: u32, height: u32) -> String {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 10, 10, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        STANDARD.encode(bytes)
    }

    fn no_renderers() -> MimeResolver {
        MimeResolver::new(Renderers {
            svg: None,
            plotly: None,
            latex: None,
        })
    }

    #[test]
    fn test_png_wins_over_text() {
        let mut files = TempFiles::new();
        let raw = bundle(json!({"text/plain": "<Figure>", "image/png": png_base64(4, 2)}));
        let chunk = no_renderers().resolve(&mut files, raw.clone());

        let ChunkKind::Image(image) = &chunk.kind else {
            panic!("expected image, got {:?}", chunk.kind);
        };
        assert_eq!((image.width, image.height), (4, 2));
        assert!(image.path.exists());
        assert_eq!(image.path.extension().unwrap(), "png");
        assert!(files.contains(&image.path));
        assert_eq!(chunk.raw, Some(raw));
    }

    #[test]
    fn test_same_pixels_share_hash() {
        let mut files = TempFiles::new();
        let resolver = no_renderers();
        let a = resolver.resolve(&mut files, bundle(json!({"image/png": png_base64(3, 3)})));
        let b = resolver.resolve(&mut files, bundle(json!({"image/png": png_base64(3, 3)})));
        let c = resolver.resolve(&mut files, bundle(json!({"image/png": png_base64(3, 4)})));

        let hash = |c: &OutputChunk| match &c.kind {
            ChunkKind::Image(i) => i.content_hash.clone(),
            other => panic!("expected image, got {other:?}"),
        };
        assert_eq!(hash(&a), hash(&b));
        assert_ne!(hash(&a), hash(&c));
    }

    #[test]
    fn test_bad_png_falls_through_to_text() {
        let mut files = TempFiles::new();
        let raw = bundle(json!({"image/png": "!!!not base64", "text/plain": "fallback"}));
        let chunk = no_renderers().resolve(&mut files, raw);
        assert_eq!(chunk.kind, ChunkKind::Text("fallback\n".into()));
    }

    #[test]
    fn test_plain_text_gets_trailing_newline() {
        let mut files = TempFiles::new();
        let chunk = no_renderers().resolve(&mut files, bundle(json!({"text/plain": "2"})));
        assert_eq!(chunk.kind, ChunkKind::Text("2\n".into()));
        assert!(chunk.is_persistent());
    }

    #[test]
    fn test_unconfigured_and_missing_renderers_fall_through() {
        let mut files = TempFiles::new();
        let raw = bundle(json!({"image/svg+xml": "<svg/>", "text/plain": "svg fallback"}));
        let chunk = no_renderers().resolve(&mut files, raw.clone());
        assert_eq!(chunk.kind, ChunkKind::Text("svg fallback\n".into()));

        let missing = MimeResolver::new(Renderers {
            svg: Some(RendererSpec::new("/nonexistent/svg-renderer", &["{input}", "{output}"])),
            plotly: None,
            latex: None,
        });
        let chunk = missing.resolve(&mut files, raw);
        assert_eq!(chunk.kind, ChunkKind::Text("svg fallback\n".into()));
    }

    #[test]
    fn test_nothing_usable_is_bad() {
        let mut files = TempFiles::new();
        let chunk = no_renderers().resolve(&mut files, bundle(json!({"application/x-thing": 1})));
        assert_eq!(chunk.kind, ChunkKind::Bad(vec!["application/x-thing".into()]));
    }

    #[test]
    fn test_list_payload_is_joined() {
        assert_eq!(payload_text(&json!(["a\n", "b"])), "a\nb");
        assert_eq!(payload_text(&json!({"k": 1})), "{\"k\":1}");
    }

    #[cfg(unix)]
    #[test]
    fn test_external_renderer_produces_image() {
        let mut files = TempFiles::new();
        // The "renderer" decodes a base64 PNG smuggled in the latex payload.
        let resolver = MimeResolver::new(Renderers {
            svg: None,
            plotly: None,
            latex: Some(RendererSpec::new(
                "sh",
                &["-c", "base64 -d \"$0\" > \"$1\"", "{input}", "{output}"],
            )),
        });
        let raw = bundle(json!({"text/latex": png_base64(5, 7), "text/plain": "x"}));
        let chunk = resolver.resolve(&mut files, raw);
        let ChunkKind::Image(image) = chunk.kind else {
            panic!("expected image");
        };
        assert_eq!((image.width, image.height), (5, 7));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_renderer_falls_through() {
        let mut files = TempFiles::new();
        let resolver = MimeResolver::new(Renderers {
            svg: Some(RendererSpec::new("false", &[])),
            plotly: None,
            latex: None,
        });
        let chunk = resolver.resolve(&mut files, bundle(json!({"image/svg+xml": "<svg/>"})));
        assert_eq!(chunk.kind, ChunkKind::Bad(vec!["image/svg+xml".into()]));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_renderer_is_killed_and_falls_through() {
        let mut files = TempFiles::new();
        let resolver = MimeResolver::new(Renderers {
            svg: Some(RendererSpec::new("sleep", &["10"]).with_timeout(Duration::from_millis(100))),
            plotly: None,
            latex: None,
        });
        let started = Instant::now();
        let raw = bundle(json!({"image/svg+xml": "<svg/>", "text/plain": "slow"}));
        let chunk = resolver.resolve(&mut files, raw);
        assert_eq!(chunk.kind, ChunkKind::Text("slow\n".into()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
