//! In-process transport backed by unbounded mpsc channels.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::KernelTransport;
use crate::error::KernelError;

#[derive(Debug, Default)]
struct Shared {
    ready: AtomicBool,
    interrupts: AtomicUsize,
    restarts: AtomicUsize,
    fixed: AtomicBool,
    shut_down: AtomicBool,
}

/// Session side of an in-process kernel channel.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<Value>,
    outbound: mpsc::UnboundedSender<Value>,
    shared: Arc<Shared>,
}

/// Kernel side: push messages, inspect what the session sent.
pub struct ChannelPeer {
    inbound: mpsc::UnboundedSender<Value>,
    outbound: mpsc::UnboundedReceiver<Value>,
    shared: Arc<Shared>,
}

/// Build a connected transport/peer pair. The transport starts not ready.
pub fn channel_pair() -> (ChannelTransport, ChannelPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        ChannelTransport {
            inbound: in_rx,
            outbound: out_tx,
            shared: shared.clone(),
        },
        ChannelPeer {
            inbound: in_tx,
            outbound: out_rx,
            shared,
        },
    )
}

impl KernelTransport for ChannelTransport {
    fn poll_ready(&mut self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    fn try_recv(&mut self) -> Option<Value> {
        self.inbound.try_recv().ok()
    }

    fn send(&mut self, message: Value) -> Result<(), KernelError> {
        self.outbound
            .send(message)
            .map_err(|_| KernelError::ChannelClosed)
    }

    fn interrupt(&mut self) -> Result<(), KernelError> {
        self.shared.interrupts.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn can_restart(&self) -> bool {
        !self.shared.fixed.load(Ordering::Acquire)
    }

    fn restart(&mut self) -> Result<(), KernelError> {
        if !self.can_restart() {
            return Err(KernelError::CannotRestart("channel".to_string()));
        }
        self.shared.restarts.fetch_add(1, Ordering::AcqRel);
        self.shared.ready.store(false, Ordering::Release);
        while self.inbound.try_recv().is_ok() {}
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shared.shut_down.store(true, Ordering::Release);
    }
}

impl ChannelPeer {
    /// Confirm (or revoke) readiness.
    pub fn set_ready(&self, ready: bool) {
        self.shared.ready.store(ready, Ordering::Release);
    }

    /// Make the transport refuse restarts, like an attached kernel.
    pub fn refuse_restart(&self) {
        self.shared.fixed.store(true, Ordering::Release);
    }

    /// Queue a raw inbound message.
    pub fn push(&self, message: Value) {
        // A dropped transport just means nobody will read it.
        let _ = self.inbound.send(message);
    }

    /// Queue a `{msg_type, content}` message.
    pub fn push_message(&self, msg_type: &str, content: Value) {
        self.push(json!({ "msg_type": msg_type, "content": content }));
    }

    /// Messages the session sent since the last call.
    pub fn sent(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            out.push(message);
        }
        out
    }

    pub fn interrupts(&self) -> usize {
        self.shared.interrupts.load(Ordering::Acquire)
    }

    pub fn restarts(&self) -> usize {
        self.shared.restarts.load(Ordering::Acquire)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }
}

// ============================================================================
// Tests
// ============================================================================
