//! One execution's result aggregate.
//!
//! An [`Output`] is created in `Hold` when code is submitted, moves to
//! `Running` when the kernel echoes the input, and ends in `Done`. Status never
//! moves backwards; re-running a cell builds a fresh `Output` instead of
//! reusing the old one.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::chunk::OutputChunk;

/// Lifecycle of one execution.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString,
    Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
#[strum(serialize_all = "snake_case")]
pub enum OutputStatus {
    /// Submitted, waiting for the kernel to pick it up.
    #[default]
    Hold,
    Running,
    Done,
}

impl OutputStatus {
    /// Numeric code used by the persisted session format.
    pub fn code(self) -> u8 {
        match self {
            OutputStatus::Hold => 0,
            OutputStatus::Running => 1,
            OutputStatus::Done => 2,
        }
    }
}

impl From<OutputStatus> for u8 {
    fn from(status: OutputStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for OutputStatus {
    type Error = StatusError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(OutputStatus::Hold),
            1 => Ok(OutputStatus::Running),
            2 => Ok(OutputStatus::Done),
            other => Err(StatusError::UnknownCode(other)),
        }
    }
}

/// Status transitions that violate the forward-only lifecycle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    /// An `execute_input` arrived for an output that already finished.
    #[error("execute_input received for an output that is already done")]
    InputAfterDone,

    #[error("unknown output status code {0}")]
    UnknownCode(u8),
}

/// The result aggregate of one execution.
#[derive(Clone, Debug, PartialEq)]
pub struct Output {
    /// Kernel-assigned counter, unknown until the kernel echoes the input.
    pub execution_count: Option<u32>,
    status: OutputStatus,
    /// False once any error or abort chunk was appended.
    pub success: bool,
    chunks: Vec<OutputChunk>,
    /// Loaded from a persisted session rather than produced by this kernel.
    pub stale: bool,
    /// A `clear_output(wait=true)` is waiting for the next chunk.
    pending_clear: bool,
}

impl Output {
    /// A fresh, held output.
    pub fn new() -> Self {
        Self {
            execution_count: None,
            status: OutputStatus::Hold,
            success: true,
            chunks: Vec::new(),
            stale: false,
            pending_clear: false,
        }
    }

    /// Rebuild an output from persisted state. Always marked stale.
    pub fn restored(
        execution_count: Option<u32>,
        status: OutputStatus,
        success: bool,
        chunks: Vec<OutputChunk>,
    ) -> Self {
        Self {
            execution_count,
            status,
            success,
            chunks,
            stale: true,
            pending_clear: false,
        }
    }

    pub fn status(&self) -> OutputStatus {
        self.status
    }

    pub fn is_done(&self) -> bool {
        self.status == OutputStatus::Done
    }

    pub fn chunks(&self) -> &[OutputChunk] {
        &self.chunks
    }

    pub fn pending_clear(&self) -> bool {
        self.pending_clear
    }

    /// Apply an `execute_input` echo: Hold→Running, Running→Done.
    pub fn advance_on_input(&mut self, execution_count: u32) -> Result<(), StatusError> {
        if self.status == OutputStatus::Done {
            return Err(StatusError::InputAfterDone);
        }
        self.execution_count = Some(execution_count);
        self.status = match self.status {
            OutputStatus::Hold => OutputStatus::Running,
            _ => OutputStatus::Done,
        };
        Ok(())
    }

    /// Mark the execution finished. Idempotent.
    pub fn finish(&mut self) {
        self.status = OutputStatus::Done;
    }

    /// Append a chunk, applying a deferred clear first.
    pub fn push_chunk(&mut self, chunk: OutputChunk) {
        if self.pending_clear {
            self.chunks.clear();
            self.pending_clear = false;
        }
        if chunk.kind.is_failure() {
            self.success = false;
        }
        self.chunks.push(chunk);
    }

    /// Handle `clear_output`. With `wait` the clear is deferred until the next
    /// chunk arrives; without it the chunks go now and any deferred clear is
    /// dropped.
    pub fn clear(&mut self, wait: bool) {
        if wait {
            self.pending_clear = true;
        } else {
            self.chunks.clear();
            self.pending_clear = false;
        }
    }

    /// Header line shown above the output, e.g. `Out[3]: ✓ Done`.
    pub fn header_text(&self) -> String {
        let count = match self.execution_count {
            Some(n) => n.to_string(),
            None => "...".to_string(),
        };
        let status = match self.status {
            OutputStatus::Hold => "* On Hold",
            OutputStatus::Running => "... Running",
            OutputStatus::Done if self.success => "✓ Done",
            OutputStatus::Done => "✗ Failed",
        };
        let old = if self.stale { "[OLD] " } else { "" };
        format!("{old}Out[{count}]: {status}")
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
