//! tsumiki: evaluate cells of a source file against an interactive kernel.
//!
//! Usage:
//!   tsumiki notebook.py --kernel python3
//!
//! Then type commands on stdin (`eval 1 3`, `goto 2`, `show`, `save`, ...).
//! Kernel messages are drained every 500ms; views are printed on stdout and
//! logs go to stderr (`RUST_LOG=tsumiki_kernel=debug` for protocol traces).

mod command;
mod host;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};
use tsumiki_kernel::{Options, Registry, TextDocument};
use tsumiki_types::DocumentId;

use crate::command::Command;
use crate::host::{Flow, Host};

const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Evaluate cells of a file against an interactive kernel.
#[derive(Parser, Debug)]
#[command(name = "tsumiki")]
#[command(about = "Run cells of a source file in an interactive kernel")]
struct Args {
    /// File to open
    file: PathBuf,

    /// Kernel to start right away
    #[arg(short, long)]
    kernel: Option<String>,

    /// Restore the session saved for this file
    #[arg(long, conflicts_with = "kernel")]
    load: bool,

    /// Options file (RON); defaults to <config dir>/tsumiki/config.ron
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the views
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let options = match &args.config {
        Some(path) => Options::load(path)?,
        None => Options::load_default()?,
    };
    let registry = Registry::from_options(options, tokio::runtime::Handle::current())?;
    let doc = TextDocument::open(DocumentId::new(1), &args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;

    let mut host = Host::new(registry, doc);
    if let Some(kernel) = args.kernel {
        host.run(Command::Init { kernel })?;
    } else if args.load {
        host.run(Command::Load { path: None })?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if host.handle_line(&line) == Flow::Quit {
                    break;
                }
            }
            _ = ticker.tick() => host.tick(),
        }
    }

    host.shutdown();
    Ok(())
}
