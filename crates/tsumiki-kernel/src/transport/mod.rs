//! Kernel transports.
//!
//! A transport moves JSON messages between a [`Session`](crate::session::Session)
//! and a kernel. The inbound side is always a queue filled by someone else
//! (a background task, or a test) and drained with non-blocking reads, so the
//! session never waits on the kernel.
//!
//! - [`ChannelTransport`]: in-process channels, paired with a [`ChannelPeer`]
//!   that plays the kernel. Used by tests and embedders.
//! - [`ProcessTransport`]: a child process speaking newline-delimited JSON on
//!   stdin/stdout.
//! - [`JupyterTransport`]: a Jupyter kernel over ZeroMQ, either launched from
//!   a kernelspec or attached through an existing connection file.

mod channel;
mod jupyter;
mod process;

pub use channel::{ChannelPeer, ChannelTransport, channel_pair};
pub use jupyter::JupyterTransport;
pub use process::ProcessTransport;

use serde_json::Value;

use crate::error::KernelError;

/// Non-blocking message channel to one kernel.
pub trait KernelTransport: Send {
    /// Whether the kernel has confirmed it is ready. Never blocks.
    fn poll_ready(&mut self) -> bool;

    /// Next queued inbound message, if any. Never blocks.
    fn try_recv(&mut self) -> Option<Value>;

    /// Queue an outbound message.
    fn send(&mut self, message: Value) -> Result<(), KernelError>;

    /// Ask the kernel to interrupt the running execution.
    fn interrupt(&mut self) -> Result<(), KernelError>;

    /// Whether [`restart`](Self::restart) can succeed at all.
    fn can_restart(&self) -> bool {
        true
    }

    /// Relaunch the kernel. Readiness must be confirmed again afterwards.
    fn restart(&mut self) -> Result<(), KernelError>;

    /// Stop the kernel. Safe to call more than once.
    fn shutdown(&mut self);
}

/// Send SIGINT to a kernel process.
#[cfg(unix)]
pub(crate) fn send_sigint(raw: u32) -> Result<(), KernelError> {
    use rustix::process::{Pid, Signal, kill_process};

    let pid = i32::try_from(raw)
        .ok()
        .and_then(Pid::from_raw)
        .ok_or_else(|| KernelError::Signal(format!("invalid pid {raw}")))?;
    kill_process(pid, Signal::Int).map_err(|e| KernelError::Signal(e.to_string()))
}

#[cfg(not(unix))]
pub(crate) fn send_sigint(_raw: u32) -> Result<(), KernelError> {
    Err(KernelError::Signal(
        "interrupting kernels by signal is only supported on unix".to_string(),
    ))
}
