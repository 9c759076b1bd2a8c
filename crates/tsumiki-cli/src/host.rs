//! The host side of a tsumiki session: one document, one cursor, and a
//! terminal to print views on.

use anyhow::Result;
use tracing::{debug, info};
use tsumiki_kernel::{Document, EnterAction, Registry, RenderContext, TextDocument, View, WindowGeometry};

use crate::command::{Command, unescape};

#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Host {
    registry: Registry,
    doc: TextDocument,
    cursor: (u32, u32),
    ctx: RenderContext,
}

impl Host {
    pub fn new(registry: Registry, doc: TextDocument) -> Self {
        let ctx = RenderContext::detect(registry.options());
        Self {
            registry,
            doc,
            cursor: (0, 0),
            ctx,
        }
    }

    /// Parse and run one input line, reporting failures on stderr.
    pub fn handle_line(&mut self, line: &str) -> Flow {
        let command = match Command::parse_line(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Flow::Continue,
            Err(e) => {
                eprint!("{e}");
                return Flow::Continue;
            }
        };
        match self.run(command) {
            Ok(flow) => flow,
            Err(e) => {
                eprintln!("[tsumiki] {e}");
                Flow::Continue
            }
        }
    }

    pub fn run(&mut self, command: Command) -> Result<Flow> {
        debug!(?command, "running command");
        let id = self.doc.id();
        match command {
            Command::Init { kernel } => {
                self.registry.init(id, &kernel)?;
                println!("Starting kernel '{kernel}'...");
            }
            Command::Kernels => {
                for name in self.registry.available_kernels() {
                    println!("{name}");
                }
            }
            Command::Eval { first, last, kind } => {
                let last = last.unwrap_or(first);
                let ledger = self.registry.get_mut(id)?;
                ledger.evaluate_selection(&mut self.doc, &kind, first.coords(), last.coords())?;
                self.cursor = first.coords();
            }
            Command::Expr { code } => {
                let ledger = self.registry.get_mut(id)?;
                ledger.evaluate_expr(&mut self.doc, &code.join(" "))?;
                self.cursor = (0, 0);
            }
            Command::Rerun => {
                self.registry.get_mut(id)?.reevaluate(&mut self.doc, self.cursor)?;
            }
            Command::Define { first, last } => {
                self.registry
                    .get_mut(id)?
                    .define_cell(&mut self.doc, first.line, last.line);
            }
            Command::Goto { at } => {
                self.cursor = at.coords();
                if let Ok(ledger) = self.registry.get_mut(id)
                    && !ledger.on_cursor_moved(&self.doc, self.cursor, false)
                {
                    return Ok(Flow::Continue);
                }
            }
            Command::Insert { at, text } => {
                self.doc.insert(at.line, at.column, &unescape(&text));
                self.print_document();
            }
            Command::Delete => {
                if self.registry.get_mut(id)?.delete_at(&mut self.doc, self.cursor).is_none() {
                    println!("No cell under the cursor.");
                }
            }
            Command::Show => self.registry.get_mut(id)?.show_output(),
            Command::Enter => match self.registry.get_mut(id)?.enter_output() {
                EnterAction::Nothing => println!("No output window to enter."),
                EnterAction::Opened => {}
                EnterAction::Enter => {
                    self.redraw();
                    println!("(output window focused)");
                    return Ok(Flow::Continue);
                }
            },
            Command::Interrupt => self.registry.get_mut(id)?.interrupt()?,
            Command::Restart { delete_outputs } => {
                self.registry
                    .get_mut(id)?
                    .restart(&mut self.doc, delete_outputs)?;
            }
            Command::Save { path } => {
                let path = self.registry.save(&self.doc, path.as_deref())?;
                println!("Saved to {}", path.display());
            }
            Command::Load { path } => {
                let path = self.registry.load(&mut self.doc, path.as_deref())?;
                println!("Loaded {}", path.display());
            }
            Command::Deinit => self.registry.deinit(&mut self.doc)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        self.redraw();
        Ok(Flow::Continue)
    }

    /// Tick every session, redrawing when something changed.
    pub fn tick(&mut self) {
        let mut redraw = false;
        for (doc, outcome) in self.registry.tick_all() {
            if outcome.became_ready && doc == self.doc.id() {
                println!("Kernel is ready.");
            }
            redraw |= outcome.did_work && doc == self.doc.id();
        }
        if redraw {
            self.redraw();
        }
    }

    pub fn shutdown(&mut self) {
        info!("shutting down");
        self.registry.teardown_all();
    }

    fn redraw(&mut self) {
        if !self.registry.is_initialized(self.doc.id()) {
            return;
        }
        match self
            .registry
            .update_view(&self.doc, self.cursor, &window_geometry(), &self.ctx)
        {
            Ok(view) => print_view(&self.doc, &view),
            Err(e) => eprintln!("[tsumiki] {e}"),
        }
    }

    fn print_document(&self) {
        for n in 0..self.doc.line_count() {
            println!("{:>4} {}", n + 1, self.doc.line(n).unwrap_or_default());
        }
    }
}

/// The whole terminal, as if the document were shown from its first line.
fn window_geometry() -> WindowGeometry {
    let (width, height) = crossterm::terminal::size().unwrap_or((80, 24));
    WindowGeometry {
        col: 0,
        top_line: 0,
        width: u32::from(width),
        height: u32::from(height),
    }
}

fn print_view(doc: &TextDocument, view: &View) {
    let Some(highlight) = &view.highlight else {
        return;
    };
    let (begin, end) = (highlight.span.begin, highlight.span.end);
    println!(
        "── cell {}:{}–{}:{} ──",
        begin.line + 1,
        begin.column + 1,
        end.line + 1,
        end.column + 1
    );
    for range in &highlight.ranges {
        let text = doc.line(range.line).unwrap_or_default();
        let end = range.end.map_or(text.len(), |e| (e as usize).min(text.len()));
        let start = (range.start as usize).min(end);
        println!("{:>4} {}", range.line + 1, text.get(start..end).unwrap_or(&text));
    }

    if let Some(window) = &view.window {
        let bar = if window.border { "│ " } else { "" };
        println!("{bar}{}", window.header);
        for line in window.lines.iter().take(window.height.saturating_sub(1) as usize) {
            println!("{bar}{line}");
        }
    }
}
