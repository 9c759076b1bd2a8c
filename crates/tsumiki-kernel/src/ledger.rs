//! Per-document execution ledger.
//!
//! The ledger maps cells (anchored spans of the document) to their outputs
//! and serializes executions: every submission is queued, exactly one is
//! current at a time, and the next is promoted only once the current output
//! is done. Kernel messages are drained into the current output on `tick`.
//!
//! Every submission keeps its place in the queue until the kernel is done
//! with it. Re-running or deleting a cell whose execution is still queued or
//! in flight detaches the old output instead of dropping it, so the messages
//! the kernel still sends for it don't land in the next cell.

use std::collections::VecDeque;

use indexmap::IndexMap;
use tracing::{debug, info, warn};
use tsumiki_types::{
    CellRecord, LivePosition, Output, OutputChunk, Position, PositionRecord, SessionFile, Span, SpanRecord,
    StaticSpan,
};

use crate::canvas::Canvas;
use crate::config::{EnterOutputBehavior, Options};
use crate::document::{Document, END_OF_LINE};
use crate::error::{LedgerError, LoadError, Result};
use crate::render::{OutputWindow, RenderContext, WindowGeometry, layout_output};
use crate::session::Session;

/// Hex `blake3` of the document contents.
pub fn content_checksum(doc: &dyn Document) -> String {
    hex::encode(blake3::hash(doc.contents().as_bytes()).as_bytes())
}

// ============================================================================
// Selections
// ============================================================================

/// How an operator-style selection maps to a span.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SelectionKind {
    /// Whole lines, first to last.
    Line,
    /// From the first selected character through the last one.
    Char,
}

impl SelectionKind {
    /// Parse a host selection kind. Block selections and anything else are
    /// rejected.
    pub fn parse(kind: &str) -> Result<Self> {
        kind.parse()
            .map_err(|_| LedgerError::UnsupportedSelection(kind.to_string()))
    }

    /// Raw `[begin, end)` coordinates for a selection whose endpoints are
    /// both inclusive. Columns are clamped to their line.
    pub fn region(self, doc: &dyn Document, first: (u32, u32), last: (u32, u32)) -> ((u32, u32), (u32, u32)) {
        match self {
            SelectionKind::Line => ((first.0, 0), (last.0, END_OF_LINE)),
            SelectionKind::Char => {
                let len = |line: u32| doc.line(line).map_or(0, |l| l.len() as u32);
                let begin = first.1.min(len(first.0).saturating_sub(1));
                let end = last.1.saturating_add(1).min(len(last.0));
                ((first.0, begin), (last.0, end))
            }
        }
    }
}

// ============================================================================
// View
// ============================================================================

/// One highlighted stretch of a line. `end: None` runs to the end of the line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineRange {
    pub line: u32,
    pub start: u32,
    pub end: Option<u32>,
}

/// Highlight of the selected cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Highlight {
    pub group: String,
    pub span: StaticSpan,
    pub ranges: Vec<LineRange>,
}

impl Highlight {
    fn new(group: &str, span: StaticSpan) -> Self {
        let (begin, end) = (span.begin, span.end);
        let ranges = if span.is_single_line() {
            vec![LineRange { line: begin.line, start: begin.column, end: Some(end.column) }]
        } else {
            let mut ranges = vec![LineRange { line: begin.line, start: begin.column, end: None }];
            ranges.extend((begin.line + 1..end.line).map(|line| LineRange { line, start: 0, end: None }));
            ranges.push(LineRange { line: end.line, start: 0, end: Some(end.column) });
            ranges
        };
        Self {
            group: group.to_string(),
            span,
            ranges,
        }
    }
}

/// What the host should draw for a document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct View {
    pub selected: Option<Span>,
    pub highlight: Option<Highlight>,
    pub window: Option<OutputWindow>,
}

/// Result of [`Ledger::tick`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Something changed; the view should be refreshed.
    pub did_work: bool,
    /// The kernel just finished starting.
    pub became_ready: bool,
}

/// What the host should do for an "enter output" request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnterAction {
    /// Nothing to enter.
    Nothing,
    /// The window was asked to open; redraw before entering.
    Opened,
    /// Move focus into the output window.
    Enter,
}

// ============================================================================
// Ledger
// ============================================================================

/// A submitted execution.
#[derive(Debug)]
enum Slot {
    Cell(Span),
    /// Output of a cell that was re-run or deleted while still pending.
    Detached(Output),
}

/// Cells, outputs and the execution queue of one document.
pub struct Ledger {
    session: Session,
    outputs: IndexMap<Span, Output>,
    queue: VecDeque<Slot>,
    current: Option<Slot>,
    selected: Option<Span>,
    should_open_window: bool,
    refresh: bool,
    automatically_open_output: bool,
    enter_output_behavior: EnterOutputBehavior,
    highlight_group: String,
}

impl Ledger {
    pub fn new(session: Session, options: &Options) -> Self {
        Self {
            session,
            outputs: IndexMap::new(),
            queue: VecDeque::new(),
            current: None,
            selected: None,
            should_open_window: false,
            refresh: false,
            automatically_open_output: options.automatically_open_output,
            enter_output_behavior: options.enter_output_behavior,
            highlight_group: options.cell_highlight_group.clone(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Cells in insertion order; a re-run cell is last.
    pub fn cells(&self) -> impl Iterator<Item = (&Span, &Output)> {
        self.outputs.iter()
    }

    pub fn output(&self, span: &Span) -> Option<&Output> {
        self.outputs.get(span)
    }

    /// The cell currently executing, if it is still attached.
    pub fn current(&self) -> Option<Span> {
        match &self.current {
            Some(Slot::Cell(span)) => Some(*span),
            _ => None,
        }
    }

    /// Cells waiting behind the current one, in submission order.
    pub fn queued(&self) -> Vec<Span> {
        self.queue
            .iter()
            .filter_map(|slot| match slot {
                Slot::Cell(span) => Some(*span),
                Slot::Detached(_) => None,
            })
            .collect()
    }

    /// Submissions queued behind the current one, detached ones included.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn selected(&self) -> Option<Span> {
        self.selected
    }

    pub fn should_open_window(&self) -> bool {
        self.should_open_window
    }

    /// Whether a refresh was requested since the last view update.
    pub fn needs_refresh(&self) -> bool {
        self.refresh
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Submit `code` as the contents of `span`.
    ///
    /// Fails with `NotReady` before touching anything while the kernel is
    /// still starting.
    pub fn run(&mut self, code: &str, span: Span) -> Result<()> {
        self.session.submit(code)?;

        self.detach(&span);
        self.outputs.insert(span, Output::new());
        self.queue.push_back(Slot::Cell(span));
        self.promote();

        self.selected = Some(span);
        self.should_open_window = true;
        self.refresh = true;
        Ok(())
    }

    /// Evaluate the text in `[begin, end)` as a new cell.
    pub fn evaluate(&mut self, doc: &mut dyn Document, begin: (u32, u32), end: (u32, u32)) -> Result<Span> {
        let span = new_span(doc, begin, end);
        let code = span.resolve(&*doc).map(|s| doc.text_in(&s)).unwrap_or_default();
        if let Err(e) = self.run(&code, span) {
            release_span(doc, &span);
            return Err(e);
        }
        Ok(span)
    }

    /// Evaluate an operator-style selection of `kind`.
    pub fn evaluate_selection(
        &mut self,
        doc: &mut dyn Document,
        kind: &str,
        first: (u32, u32),
        last: (u32, u32),
    ) -> Result<Span> {
        let (begin, end) = SelectionKind::parse(kind)?.region(doc, first, last);
        self.evaluate(doc, begin, end)
    }

    /// Evaluate `expr`, attaching its output to the start of the document.
    pub fn evaluate_expr(&mut self, doc: &mut dyn Document, expr: &str) -> Result<Span> {
        let span = new_span(doc, (0, 0), (0, 0));
        if let Err(e) = self.run(expr, span) {
            release_span(doc, &span);
            return Err(e);
        }
        Ok(span)
    }

    /// Re-run the cell under `cursor` with its current text.
    pub fn reevaluate(&mut self, doc: &mut dyn Document, cursor: (u32, u32)) -> Result<Span> {
        let span = self.select(doc, cursor).ok_or(LedgerError::NotInCell)?;
        let code = span.resolve(&*doc).map(|s| doc.text_in(&s)).unwrap_or_default();
        self.run(&code, span)?;
        Ok(span)
    }

    /// Register whole lines `first..=last` as a cell without running it.
    pub fn define_cell(&mut self, doc: &mut dyn Document, first_line: u32, last_line: u32) -> Span {
        let span = new_span(doc, (first_line, 0), (last_line, END_OF_LINE));
        self.outputs.insert(span, Output::new());
        self.refresh = true;
        span
    }

    /// Promote the next submission when nothing is in flight, then drain
    /// kernel messages into it.
    pub fn tick(&mut self) -> TickOutcome {
        let was_ready = self.session.is_ready();
        self.promote();

        let Self {
            session,
            outputs,
            current,
            ..
        } = self;
        let output = match current {
            Some(Slot::Cell(span)) => outputs.get_mut(&*span),
            Some(Slot::Detached(output)) => Some(output),
            None => None,
        };
        let did_work = session.drain(output);

        let became_ready = !was_ready && self.session.is_ready();
        if became_ready {
            info!(kernel = %self.session.kernel_name(), "Kernel '{}' is ready.", self.session.kernel_name());
        }
        if did_work {
            self.refresh = true;
        }
        TickOutcome { did_work, became_ready }
    }

    fn current_done(&self) -> bool {
        match &self.current {
            None => true,
            Some(Slot::Cell(span)) => self.outputs.get(span).is_none_or(Output::is_done),
            Some(Slot::Detached(output)) => output.is_done(),
        }
    }

    fn promote(&mut self) {
        if self.current_done()
            && let Some(next) = self.queue.pop_front()
        {
            if let Slot::Cell(span) = &next {
                debug!(?span, "promoting cell");
            }
            self.current = Some(next);
        }
    }

    /// Remove the output of `span`, keeping its submission in line if the
    /// kernel still owes messages for it.
    fn detach(&mut self, span: &Span) {
        let Some(old) = self.outputs.shift_remove(span) else {
            return;
        };
        let is_current = matches!(&self.current, Some(Slot::Cell(s)) if s == span);
        if old.is_done() {
            // The kernel owes nothing more for a finished execution.
            if is_current {
                self.current = None;
            }
            return;
        }
        if is_current {
            self.current = Some(Slot::Detached(old));
        } else if let Some(slot) = self
            .queue
            .iter_mut()
            .find(|slot| matches!(slot, Slot::Cell(s) if s == span))
        {
            *slot = Slot::Detached(old);
        }
    }

    // ------------------------------------------------------------------------
    // Cells
    // ------------------------------------------------------------------------

    /// The most recently (re)created cell containing `pos`.
    pub fn select(&self, doc: &dyn Document, pos: (u32, u32)) -> Option<Span> {
        let pos = Position::new(doc.id(), pos.0, pos.1);
        self.outputs
            .keys()
            .rev()
            .find(|span| span.contains(doc, &pos))
            .copied()
    }

    /// Forget `span` and its output.
    pub fn delete(&mut self, doc: &mut dyn Document, span: &Span) {
        if !self.outputs.contains_key(span) {
            return;
        }
        self.detach(span);
        release_span(doc, span);
        if self.selected.as_ref() == Some(span) {
            self.selected = None;
        }
        self.refresh = true;
    }

    /// Delete the cell under `cursor`, if any.
    pub fn delete_at(&mut self, doc: &mut dyn Document, cursor: (u32, u32)) -> Option<Span> {
        let span = self.select(doc, cursor)?;
        self.delete(doc, &span);
        Some(span)
    }

    fn clear(&mut self, doc: &mut dyn Document) {
        for span in self.outputs.keys() {
            release_span(doc, span);
        }
        self.outputs.clear();
        self.queue.clear();
        self.current = None;
        self.selected = None;
        self.should_open_window = false;
        self.refresh = true;
    }

    // ------------------------------------------------------------------------
    // Kernel control
    // ------------------------------------------------------------------------

    pub fn interrupt(&mut self) -> Result<()> {
        self.session.interrupt()?;
        Ok(())
    }

    /// Restart the kernel. Pending executions die with the old kernel and
    /// their outputs are marked aborted; with `delete_outputs` every cell
    /// goes too.
    pub fn restart(&mut self, doc: &mut dyn Document, delete_outputs: bool) -> Result<()> {
        self.session.ensure_restartable()?;
        if delete_outputs {
            self.clear(doc);
        } else {
            self.abort_pending();
        }
        self.session.restart()?;
        Ok(())
    }

    fn abort_pending(&mut self) {
        let slots = self.current.take().into_iter().chain(self.queue.drain(..));
        for slot in slots.collect::<Vec<_>>() {
            if let Slot::Cell(span) = slot
                && let Some(output) = self.outputs.get_mut(&span)
                && !output.is_done()
            {
                output.push_chunk(OutputChunk::aborted());
                output.finish();
            }
        }
        self.refresh = true;
    }

    /// Release every anchor and stop the kernel.
    pub fn teardown(&mut self, doc: &mut dyn Document) {
        self.clear(doc);
        self.session.shutdown();
    }

    // ------------------------------------------------------------------------
    // Interface
    // ------------------------------------------------------------------------

    fn reselect(&mut self, doc: &dyn Document, cursor: (u32, u32)) {
        let selected = self.select(doc, cursor);
        if self.automatically_open_output {
            self.should_open_window = true;
        } else if self.selected != selected {
            self.should_open_window = false;
        }
        self.selected = selected;
    }

    /// Track a cursor move. Returns whether the view must be redrawn.
    pub fn on_cursor_moved(&mut self, doc: &dyn Document, cursor: (u32, u32), scrolled: bool) -> bool {
        let selected = self.select(doc, cursor);
        if selected.is_some() && selected == self.selected {
            return scrolled && self.should_open_window;
        }
        self.reselect(doc, cursor);
        self.refresh = true;
        true
    }

    /// Ask for the output window of the selected cell to open.
    pub fn show_output(&mut self) {
        self.should_open_window = true;
        self.refresh = true;
    }

    /// Handle a request to focus the output window.
    pub fn enter_output(&mut self) -> EnterAction {
        if self.selected.is_none() {
            return EnterAction::Nothing;
        }
        match self.enter_output_behavior {
            EnterOutputBehavior::OpenThenEnter if !self.should_open_window => {
                self.show_output();
                EnterAction::Opened
            }
            EnterOutputBehavior::OpenAndEnter if !self.should_open_window => {
                self.show_output();
                EnterAction::Enter
            }
            EnterOutputBehavior::NoOpen if !self.should_open_window => EnterAction::Nothing,
            _ => EnterAction::Enter,
        }
    }

    /// Recompute what the host should draw with the cursor at `cursor`.
    pub fn update_view(
        &mut self,
        doc: &dyn Document,
        cursor: (u32, u32),
        window: &WindowGeometry,
        canvas: &mut dyn Canvas,
        ctx: &RenderContext,
    ) -> View {
        canvas.clear();
        self.refresh = false;
        self.reselect(doc, cursor);

        let mut view = View {
            selected: self.selected,
            ..View::default()
        };
        if let Some(span) = self.selected
            && let Some(resolved) = span.resolve(doc)
        {
            view.highlight = Some(Highlight::new(&self.highlight_group, resolved));
            if self.should_open_window
                && let Some(output) = self.outputs.get(&span)
            {
                view.window = layout_output(output, resolved.end.line, window, canvas, ctx);
            }
        }

        if let Err(e) = canvas.present() {
            warn!("Failed to present images: {e}");
        }
        view
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Snapshot every resolvable cell.
    pub fn save(&self, doc: &dyn Document) -> SessionFile {
        let mut file = SessionFile::new(self.session.kernel_name(), content_checksum(doc));
        for (span, output) in &self.outputs {
            let Some(resolved) = span.resolve(doc) else {
                continue;
            };
            file.cells.push(CellRecord {
                span: SpanRecord {
                    begin: PositionRecord::from(resolved.begin),
                    end: PositionRecord::from(resolved.end),
                },
                execution_count: output.execution_count,
                status: output.status(),
                success: output.success,
                chunks: output
                    .chunks()
                    .iter()
                    .filter(|c| c.is_persistent())
                    .filter_map(|c| c.raw.clone())
                    .collect(),
            });
        }
        file
    }

    /// Recreate the cells of `file` on `doc`. Restored outputs are stale.
    ///
    /// Nothing is added unless the whole file applies.
    pub fn load(&mut self, doc: &mut dyn Document, file: &SessionFile) -> std::result::Result<(), LoadError> {
        if !file.is_supported_version() {
            return Err(LoadError::BadVersion(file.version));
        }
        if content_checksum(doc) != file.content_checksum {
            return Err(LoadError::ChecksumMismatch);
        }
        for cell in &file.cells {
            for p in [cell.span.begin, cell.span.end] {
                let in_range = doc
                    .line(p.lineno)
                    .is_some_and(|line| p.colno as usize <= line.len());
                if !in_range {
                    return Err(LoadError::SpanOutOfRange { line: p.lineno, column: p.colno });
                }
            }
        }

        for cell in &file.cells {
            let span = new_span(
                doc,
                (cell.span.begin.lineno, cell.span.begin.colno),
                (cell.span.end.lineno, cell.span.end.colno),
            );
            let chunks = cell
                .chunks
                .iter()
                .map(|raw| self.session.resolve_bundle(raw.clone()))
                .collect();
            let output = Output::restored(cell.execution_count, cell.status, cell.success, chunks);
            self.outputs.insert(span, output);
        }
        info!(cells = file.cells.len(), "restored session");
        self.refresh = true;
        Ok(())
    }
}

fn new_span(doc: &mut dyn Document, begin: (u32, u32), end: (u32, u32)) -> Span {
    let id = doc.id();
    let begin = doc.create_anchor(begin.0, begin.1);
    let end = doc.create_anchor(end.0, end.1);
    Span::new(LivePosition::new(id, begin), LivePosition::new(id, end))
}

fn release_span(doc: &mut dyn Document, span: &Span) {
    for anchor in span.anchors() {
        doc.release_anchor(anchor);
    }
}

// ============================================================================
// Tests
// ============================================================================
