//! Document → ledger registry.
//!
//! The registry owns everything shared between documents: the options read
//! at startup, the kernel launcher and the canvas. Each initialized document
//! gets its own [`Ledger`] and kernel session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::runtime::Handle;
use tracing::{info, warn};
use tsumiki_types::{DocumentId, SessionFile};

use crate::canvas::{Canvas, CanvasError, canvas_for_provider};
use crate::config::Options;
use crate::document::Document;
use crate::error::{LedgerError, LoadError, Result};
use crate::launcher::{KernelLauncher, SystemLauncher};
use crate::ledger::{Ledger, TickOutcome, View};
use crate::render::{RenderContext, WindowGeometry};
use crate::session::Session;

pub struct Registry {
    options: Options,
    launcher: Box<dyn KernelLauncher>,
    canvas: Box<dyn Canvas>,
    ledgers: HashMap<DocumentId, Ledger>,
}

impl Registry {
    pub fn new(options: Options, launcher: Box<dyn KernelLauncher>, canvas: Box<dyn Canvas>) -> Self {
        Self {
            options,
            launcher,
            canvas,
            ledgers: HashMap::new(),
        }
    }

    /// Kernels from `options.kernels` and installed Jupyter kernelspecs, and
    /// the configured image provider, initialized.
    pub fn from_options(options: Options, runtime: Handle) -> std::result::Result<Self, CanvasError> {
        let mut canvas = canvas_for_provider(&options.image_provider)?;
        canvas.init()?;
        let launcher = SystemLauncher::new(options.kernels.clone(), runtime);
        Ok(Self::new(options, Box::new(launcher), canvas))
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn available_kernels(&self) -> Vec<String> {
        self.launcher.available_kernels()
    }

    pub fn is_initialized(&self, doc: DocumentId) -> bool {
        self.ledgers.contains_key(&doc)
    }

    pub fn get(&self, doc: DocumentId) -> Result<&Ledger> {
        self.ledgers.get(&doc).ok_or(LedgerError::NoSession(doc))
    }

    pub fn get_mut(&mut self, doc: DocumentId) -> Result<&mut Ledger> {
        self.ledgers.get_mut(&doc).ok_or(LedgerError::NoSession(doc))
    }

    /// Start `kernel` for `doc`.
    pub fn init(&mut self, doc: DocumentId, kernel: &str) -> Result<&mut Ledger> {
        if self.ledgers.contains_key(&doc) {
            return Err(LedgerError::AlreadyInitialized(doc));
        }
        let transport = self.launcher.launch(kernel)?;
        let session = Session::new(kernel, transport, &self.options);
        info!(document = %doc, kernel, "session initialized");
        let ledger = Ledger::new(session, &self.options);
        Ok(self.ledgers.entry(doc).or_insert(ledger))
    }

    /// Tear down the session of `doc`.
    pub fn deinit(&mut self, doc: &mut dyn Document) -> Result<()> {
        let mut ledger = self
            .ledgers
            .remove(&doc.id())
            .ok_or(LedgerError::NoSession(doc.id()))?;
        ledger.teardown(doc);
        self.canvas.clear();
        if let Err(e) = self.canvas.present() {
            warn!("Failed to clear images: {e}");
        }
        info!(document = %doc.id(), "session torn down");
        Ok(())
    }

    /// Stop every kernel and release the canvas. Anchors are left to the
    /// documents, which are going away too.
    pub fn teardown_all(&mut self) {
        for (doc, mut ledger) in self.ledgers.drain() {
            info!(document = %doc, "shutting down session");
            ledger.session_mut().shutdown();
        }
        self.canvas.deinit();
    }

    /// Tick every session.
    pub fn tick_all(&mut self) -> Vec<(DocumentId, TickOutcome)> {
        self.ledgers
            .iter_mut()
            .map(|(doc, ledger)| (*doc, ledger.tick()))
            .collect()
    }

    /// Recompute the view of `doc`, drawing images on the shared canvas.
    pub fn update_view(
        &mut self,
        doc: &dyn Document,
        cursor: (u32, u32),
        window: &WindowGeometry,
        ctx: &RenderContext,
    ) -> Result<View> {
        let ledger = self
            .ledgers
            .get_mut(&doc.id())
            .ok_or(LedgerError::NoSession(doc.id()))?;
        Ok(ledger.update_view(doc, cursor, window, self.canvas.as_mut(), ctx))
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Write the session of `doc` to `path`, or to its default save file.
    pub fn save(&self, doc: &dyn Document, path: Option<&Path>) -> Result<PathBuf> {
        let ledger = self.get(doc.id())?;
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_save_file(&self.options.save_path, doc)?,
        };
        let file = ledger.save(doc);
        let json = serde_json::to_string(&file).map_err(LedgerError::Encode)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, json).map_err(|source| LedgerError::Write {
            path: path.clone(),
            source,
        })?;
        info!(document = %doc.id(), path = %path.display(), cells = file.cells.len(), "session saved");
        Ok(path)
    }

    /// Start a session for `doc` from a saved file.
    ///
    /// On any failure after the kernel was launched the new session is torn
    /// down again, leaving `doc` uninitialized.
    pub fn load(&mut self, doc: &mut dyn Document, path: Option<&Path>) -> Result<PathBuf> {
        let id = doc.id();
        if self.ledgers.contains_key(&id) {
            return Err(LedgerError::AlreadyInitialized(id));
        }
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_save_file(&self.options.save_path, doc)?,
        };
        let file = read_session_file(&path)?;

        let ledger = self.init(id, &file.kernel)?;
        if let Err(e) = ledger.load(doc, &file) {
            if let Some(mut ledger) = self.ledgers.remove(&id) {
                ledger.teardown(doc);
            }
            return Err(e.into());
        }
        info!(document = %id, path = %path.display(), "session loaded");
        Ok(path)
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

/// Read and version-check a saved session.
pub fn read_session_file(path: &Path) -> std::result::Result<SessionFile, LoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: SessionFile = serde_json::from_str(&text)?;
    if !file.is_supported_version() {
        return Err(LoadError::BadVersion(file.version));
    }
    Ok(file)
}

/// `<save_path>/<mangled document path>.json`, where `%` becomes `%%` and
/// `/` becomes `%`.
pub fn default_save_file(save_path: &Path, doc: &dyn Document) -> Result<PathBuf> {
    let path = doc.path().ok_or(LedgerError::NoFile)?;
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mangled = absolute
        .to_string_lossy()
        .replace('%', "%%")
        .replace('/', "%");
    Ok(save_path.join(format!("{mangled}.json")))
}

// ============================================================================
// Tests
// ============================================================================
