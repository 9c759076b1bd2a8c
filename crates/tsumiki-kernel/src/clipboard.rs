//! Copying results to the system clipboard.

use tracing::warn;

/// Destination for copied results.
pub trait ClipboardSink {
    fn copy(&mut self, text: &str);
}

/// The system clipboard, opened on first use. Failures are logged.
#[derive(Default)]
pub struct SystemClipboard(Option<arboard::Clipboard>);

impl ClipboardSink for SystemClipboard {
    fn copy(&mut self, text: &str) {
        if self.0.is_none() {
            match arboard::Clipboard::new() {
                Ok(clipboard) => self.0 = Some(clipboard),
                Err(e) => {
                    warn!("Clipboard unavailable: {e}");
                    return;
                }
            }
        }
        if let Some(clipboard) = self.0.as_mut()
            && let Err(e) = clipboard.set_text(text)
        {
            warn!("Copy failed: {e}");
        }
    }
}
