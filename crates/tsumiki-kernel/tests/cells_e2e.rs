//! End-to-end tests through the public registry API.
//!
//! # Tiers
//!
//! - **Tier 1:** scripted kernels over [`ChannelTransport`]: the host flow of
//!   init → evaluate → tick → view, with edits moving cells around.
//! - **Tier 2:** a real child-process kernel (unix only), a shell script that
//!   speaks just enough of the protocol to answer `1+1`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine as _;
use serde_json::json;
use tsumiki_kernel::{
    Canvas, CanvasError, ChannelPeer, Document, KernelError, KernelLauncher, KernelTransport, NoCanvas,
    Options, PlacementId, RenderContext, Registry, TextDocument, WindowGeometry, channel_pair,
};
use tsumiki_types::{ChunkKind, DocumentId, OutputStatus};

// ============================================================================
// Shared test setup
// ============================================================================

#[derive(Clone, Default)]
struct ChannelLauncher(Arc<Mutex<Vec<ChannelPeer>>>);

impl ChannelLauncher {
    /// Run `f` against the kernel side of launch number `index`.
    fn with_peer<T>(&self, index: usize, f: impl FnOnce(&mut ChannelPeer) -> T) -> T {
        f(&mut self.0.lock().unwrap()[index])
    }
}

impl KernelLauncher for ChannelLauncher {
    fn available_kernels(&self) -> Vec<String> {
        vec!["python3".to_string()]
    }

    fn launch(&self, _name: &str) -> Result<Box<dyn KernelTransport>, KernelError> {
        let (transport, peer) = channel_pair();
        peer.set_ready(true);
        self.0.lock().unwrap().push(peer);
        Ok(Box::new(transport))
    }
}

/// Records every placement; `present` is a no-op.
#[derive(Clone, Default)]
struct RecordingCanvas(Arc<Mutex<Vec<(PathBuf, String)>>>);

impl Canvas for RecordingCanvas {
    fn init(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }

    fn deinit(&mut self) {}

    fn clear(&mut self) {}

    fn add_image(&mut self, path: &Path, identifier: &str, _: u32, _: u32, _: u32, _: u32) -> Option<PlacementId> {
        let mut placed = self.0.lock().unwrap();
        placed.push((path.to_path_buf(), identifier.to_string()));
        Some(PlacementId(placed.len() as u32))
    }

    fn present(&mut self) -> Result<(), CanvasError> {
        Ok(())
    }
}

fn window() -> WindowGeometry {
    WindowGeometry {
        col: 0,
        top_line: 0,
        width: 60,
        height: 20,
    }
}

fn setup(canvas: Box<dyn Canvas>) -> (Registry, ChannelLauncher) {
    let launcher = ChannelLauncher::default();
    let registry = Registry::new(Options::default(), Box::new(launcher.clone()), canvas);
    (registry, launcher)
}

fn png_base64() -> String {
    let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([255, 0, 0, 255]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    base64::engine::general_purpose::STANDARD.encode(bytes.into_inner())
}

// ============================================================================
// Tier 1: scripted kernels
// ============================================================================

#[test]
fn test_value_error_cell_follows_edits() {
    let (mut registry, launcher) = setup(Box::new(NoCanvas));
    let mut doc = TextDocument::from_text(DocumentId::new(1), "import os\nraise ValueError('x')");
    let ledger = registry.init(doc.id(), "python3").unwrap();
    ledger.tick();
    let span = ledger.evaluate(&mut doc, (1, 0), (1, 21)).unwrap();

    launcher.with_peer(0, |peer| {
        peer.push_message("status", json!({"execution_state": "busy"}));
        peer.push_message("execute_input", json!({"execution_count": 3}));
        peer.push_message(
            "error",
            json!({"ename": "ValueError", "evalue": "x", "traceback": ["\u{1b}[0;31mValueError\u{1b}[0m: x"]}),
        );
        peer.push_message("status", json!({"execution_state": "idle"}));
    });
    let outcomes = registry.tick_all();
    assert!(outcomes[0].1.did_work);

    // Two lines inserted above the cell push it down.
    doc.insert(0, 0, "# header\n\n");
    let ledger = registry.get(doc.id()).unwrap();
    assert_eq!(ledger.select(&doc, (1, 0)), None);
    assert_eq!(ledger.select(&doc, (3, 5)), Some(span));

    let ctx = RenderContext::new(registry.options(), None);
    let view = registry.update_view(&doc, (3, 5), &window(), &ctx).unwrap();
    let win = view.window.unwrap();
    assert_eq!(win.header, "Out[3]: ✗ Failed");
    assert_eq!(win.row, 4);
    assert_eq!(win.lines[0], "[Error] ValueError: x");
    assert_eq!(win.lines[2], "ValueError: x");

    let out = registry.get(doc.id()).unwrap().output(&span).unwrap();
    assert!(!out.success);
    assert!(matches!(&out.chunks()[0].kind, ChunkKind::Error { name, .. } if name == "ValueError"));
}

#[test]
fn test_deferred_clear_replaces_progress_output() {
    let (mut registry, launcher) = setup(Box::new(NoCanvas));
    let mut doc = TextDocument::from_text(DocumentId::new(1), "for i in range(3): ...");
    let ledger = registry.init(doc.id(), "python3").unwrap();
    ledger.tick();
    let span = ledger.evaluate(&mut doc, (0, 0), (0, 22)).unwrap();

    launcher.with_peer(0, |peer| {
        peer.push_message("execute_input", json!({"execution_count": 1}));
        peer.push_message("stream", json!({"name": "stdout", "text": "step 1\n"}));
        peer.push_message("clear_output", json!({"wait": true}));
    });
    registry.tick_all();
    let out = registry.get(doc.id()).unwrap().output(&span).unwrap();
    assert_eq!(out.chunks().len(), 1);
    assert!(out.pending_clear());

    launcher.with_peer(0, |peer| {
        peer.push_message("stream", json!({"name": "stdout", "text": "step 2\n"}));
        peer.push_message("status", json!({"execution_state": "idle"}));
    });
    registry.tick_all();
    let out = registry.get(doc.id()).unwrap().output(&span).unwrap();
    assert_eq!(out.status(), OutputStatus::Done);
    assert_eq!(out.chunks().len(), 1);
    assert_eq!(out.chunks()[0].kind, ChunkKind::Text("step 2\n".into()));
}

#[test]
fn test_png_result_is_placed_and_cleaned_up() {
    let canvas = RecordingCanvas::default();
    let (mut registry, launcher) = setup(Box::new(canvas.clone()));
    let mut doc = TextDocument::from_text(DocumentId::new(1), "plot()");
    let ledger = registry.init(doc.id(), "python3").unwrap();
    ledger.tick();
    let span = ledger.evaluate(&mut doc, (0, 0), (0, 6)).unwrap();

    launcher.with_peer(0, |peer| {
        peer.push_message("execute_input", json!({"execution_count": 1}));
        peer.push_message(
            "display_data",
            json!({"data": {"image/png": png_base64(), "text/plain": "<Figure>"}, "metadata": {}}),
        );
        peer.push_message("status", json!({"execution_state": "idle"}));
    });
    registry.tick_all();

    let out = registry.get(doc.id()).unwrap().output(&span).unwrap();
    let ChunkKind::Image(image) = &out.chunks()[0].kind else {
        panic!("expected an image chunk, got {:?}", out.chunks()[0].kind);
    };
    assert_eq!((image.width, image.height), (4, 2));
    let path = image.path.clone();
    let hash = image.content_hash.clone();
    assert!(path.exists());

    let ctx = RenderContext::new(registry.options(), None);
    registry.update_view(&doc, (0, 0), &window(), &ctx).unwrap();
    assert_eq!(canvas.0.lock().unwrap()[0], (path.clone(), hash));

    registry.deinit(&mut doc).unwrap();
    assert!(!path.exists());
    assert_eq!(doc.anchor_count(), 0);
}

#[test]
fn test_documents_have_independent_sessions() {
    let (mut registry, launcher) = setup(Box::new(NoCanvas));
    let mut a = TextDocument::from_text(DocumentId::new(1), "1");
    let mut b = TextDocument::from_text(DocumentId::new(2), "2");
    registry.init(a.id(), "python3").unwrap().tick();
    registry.init(b.id(), "python3").unwrap().tick();
    assert_eq!(launcher.0.lock().unwrap().len(), 2);

    registry.get_mut(a.id()).unwrap().evaluate(&mut a, (0, 0), (0, 1)).unwrap();
    registry.get_mut(b.id()).unwrap().evaluate(&mut b, (0, 0), (0, 1)).unwrap();
    assert_eq!(launcher.with_peer(0, |p| p.sent())[0]["content"]["code"], "1");
    assert_eq!(launcher.with_peer(1, |p| p.sent())[0]["content"]["code"], "2");

    registry.deinit(&mut a).unwrap();
    assert!(launcher.with_peer(0, |p| p.is_shut_down()));
    assert!(!launcher.with_peer(1, |p| p.is_shut_down()));
    assert!(registry.get(b.id()).is_ok());
}

// ============================================================================
// Tier 2: process kernel
// ============================================================================

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_process_kernel_answers_one_plus_one() {
    use std::time::Duration;
    use tsumiki_kernel::KernelSpec;

    let script = r#"
while read line; do
  case "$line" in
    *kernel_info_request*)
      echo '{"msg_type":"kernel_info_reply","content":{}}' ;;
    *execute_request*)
      n=$((n+1))
      echo '{"msg_type":"status","content":{"execution_state":"busy"}}'
      echo "{\"msg_type\":\"execute_input\",\"content\":{\"execution_count\":$n}}"
      echo '{"msg_type":"execute_result","content":{"data":{"text/plain":"2"},"metadata":{}}}'
      echo '{"msg_type":"status","content":{"execution_state":"idle"}}' ;;
  esac
done
"#;
    let mut options = Options::default();
    options.kernels.insert(
        "sh".to_string(),
        KernelSpec {
            argv: vec!["sh".into(), "-c".into(), script.into()],
            ..Default::default()
        },
    );
    let mut registry = Registry::from_options(options, tokio::runtime::Handle::current()).unwrap();
    assert_eq!(registry.available_kernels(), vec!["sh"]);

    let mut doc = TextDocument::from_text(DocumentId::new(1), "1+1");
    registry.init(doc.id(), "sh").unwrap();

    let mut ready = false;
    for _ in 0..200 {
        if registry.tick_all()[0].1.became_ready {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(ready, "kernel never became ready");

    let span = registry
        .get_mut(doc.id())
        .unwrap()
        .evaluate(&mut doc, (0, 0), (0, 3))
        .unwrap();

    let mut done = false;
    for _ in 0..200 {
        registry.tick_all();
        if registry.get(doc.id()).unwrap().output(&span).unwrap().is_done() {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(done, "execution never finished");

    let out = registry.get(doc.id()).unwrap().output(&span).unwrap();
    assert_eq!(out.execution_count, Some(1));
    assert!(out.success);
    assert_eq!(out.chunks()[0].kind, ChunkKind::Text("2\n".into()));

    registry.deinit(&mut doc).unwrap();
}
