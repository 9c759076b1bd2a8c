//! Kernel session: the non-blocking protocol state machine.
//!
//! A session owns one kernel transport and classifies its inbound messages
//! into mutations of the output currently executing. Nothing here waits:
//! readiness is polled and messages are drained only while some are queued.
//!
//! # State transitions
//!
//! ```text
//!   Starting ──(transport ready)──▶ Idle ◀──(status: idle)── Busy
//!      ▲                              └──(status: busy)──────▶ ┘
//!      └─────────────── restart ───────────────────────────────
//! ```

use tracing::{debug, error, info, warn};
use tsumiki_types::{ChunkKind, KernelState, Output, OutputChunk, RawBundle, SessionId};

use crate::clipboard::{ClipboardSink, SystemClipboard};
use crate::config::Options;
use crate::error::KernelError;
use crate::files::TempFiles;
use crate::message::{
    self, ClearOutput, ErrorContent, ExecuteInput, ExecuteReply, KernelMessage, MessageKind, MimeContent,
    Status, Stream,
};
use crate::mime::{MimeResolver, TEXT_PLAIN, payload_text};
use crate::render::strip_ansi;
use crate::transport::KernelTransport;

/// One conversation with one kernel.
pub struct Session {
    state: KernelState,
    kernel_name: String,
    id: SessionId,
    transport: Box<dyn KernelTransport>,
    files: TempFiles,
    mime: MimeResolver,
    show_mimetype_debug: bool,
    copy_output: bool,
    clipboard: Box<dyn ClipboardSink>,
}

impl Session {
    /// Wrap a freshly launched transport. The session starts in `Starting`.
    pub fn new(kernel_name: impl Into<String>, transport: Box<dyn KernelTransport>, options: &Options) -> Self {
        Self {
            state: KernelState::Starting,
            kernel_name: kernel_name.into(),
            id: SessionId::new(),
            transport,
            files: TempFiles::new(),
            mime: MimeResolver::new(options.renderers.clone()),
            show_mimetype_debug: options.show_mimetype_debug,
            copy_output: options.copy_output,
            clipboard: Box::new(SystemClipboard::default()),
        }
    }

    /// Replace the clipboard used by `copy_output`.
    pub fn with_clipboard(mut self, clipboard: Box<dyn ClipboardSink>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn kernel_name(&self) -> &str {
        &self.kernel_name
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn temp_files(&self) -> &TempFiles {
        &self.files
    }

    /// Send `code` for execution without waiting for any reply.
    pub fn submit(&mut self, code: &str) -> Result<(), KernelError> {
        if !self.is_ready() {
            return Err(KernelError::NotReady);
        }
        debug!(kernel = %self.kernel_name, bytes = code.len(), "submitting code");
        self.transport.send(message::execute_request(self.id, code))
    }

    /// Process whatever the kernel has sent so far.
    ///
    /// Polls readiness while `Starting`. With an output, pops and classifies
    /// queued messages until the queue is empty or the output is done.
    /// Returns whether anything changed.
    pub fn drain(&mut self, output: Option<&mut Output>) -> bool {
        let mut did_work = false;

        if !self.is_ready() {
            if !self.transport.poll_ready() {
                return false;
            }
            self.state = KernelState::Idle;
            did_work = true;
        }

        let Some(output) = output else {
            return did_work;
        };

        while !output.is_done() {
            let Some(value) = self.transport.try_recv() else {
                break;
            };
            let Some(message) = KernelMessage::from_wire(&value) else {
                debug!("skipping kernel message without msg_type or content");
                continue;
            };
            did_work |= self.classify(output, message);
        }
        did_work
    }

    fn classify(&mut self, output: &mut Output, message: KernelMessage) -> bool {
        let Some(kind) = message.kind() else {
            debug!(msg_type = %message.msg_type, "ignoring kernel message");
            return false;
        };
        debug!(msg_type = %message.msg_type, "classifying kernel message");

        match kind {
            MessageKind::ExecuteInput => {
                let Some(content) = message.parse::<ExecuteInput>() else {
                    return malformed(&message);
                };
                match output.advance_on_input(content.execution_count) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(
                            kernel = %self.kernel_name,
                            execution_count = content.execution_count,
                            "protocol violation: {e}"
                        );
                        false
                    }
                }
            }
            MessageKind::Status => {
                let Some(content) = message.parse::<Status>() else {
                    return malformed(&message);
                };
                match content.execution_state.as_str() {
                    "idle" => {
                        self.state = KernelState::Idle;
                        output.finish();
                        true
                    }
                    "busy" => {
                        self.state = KernelState::Busy;
                        true
                    }
                    _ => false,
                }
            }
            MessageKind::ExecuteResult | MessageKind::DisplayData => {
                let Some(content) = message.parse::<MimeContent>() else {
                    return malformed(&message);
                };
                let raw = content.into_raw();
                if kind == MessageKind::ExecuteResult
                    && let Some(text) = raw.data.get(TEXT_PLAIN)
                {
                    let text = payload_text(text);
                    self.copy(&text);
                }
                self.append_bundle(output, raw);
                true
            }
            MessageKind::Error => {
                let Some(content) = message.parse::<ErrorContent>() else {
                    return malformed(&message);
                };
                let cleaned: Vec<String> = content.traceback.iter().map(|l| clean_text(l)).collect();
                self.copy(&cleaned.join("\n\n"));
                output.push_chunk(OutputChunk::error(content.ename, content.evalue, content.traceback));
                true
            }
            MessageKind::ExecuteReply => {
                let Some(content) = message.parse::<ExecuteReply>() else {
                    return malformed(&message);
                };
                if content.status == "aborted" {
                    output.push_chunk(OutputChunk::aborted());
                    true
                } else {
                    false
                }
            }
            MessageKind::Stream => {
                let Some(content) = message.parse::<Stream>() else {
                    return malformed(&message);
                };
                self.copy(&content.text);
                output.push_chunk(OutputChunk::text(content.text));
                true
            }
            MessageKind::ClearOutput => {
                let Some(content) = message.parse::<ClearOutput>() else {
                    return malformed(&message);
                };
                output.clear(content.wait);
                true
            }
            // Consumed by transports; never affects an output.
            MessageKind::KernelInfoReply => false,
        }
    }

    fn append_bundle(&mut self, output: &mut Output, raw: RawBundle) {
        if self.show_mimetype_debug {
            output.push_chunk(OutputChunk::synthesized(ChunkKind::MimetypeDebug(raw.mimetypes())));
        }
        let chunk = self.mime.resolve(&mut self.files, raw);
        output.push_chunk(chunk);
    }

    fn copy(&mut self, text: &str) {
        if self.copy_output {
            self.clipboard.copy(text);
        }
    }

    /// Build a chunk from a persisted bundle, materializing images as needed.
    pub fn resolve_bundle(&mut self, raw: RawBundle) -> OutputChunk {
        self.mime.resolve(&mut self.files, raw)
    }

    /// Ask the kernel to interrupt the running execution.
    pub fn interrupt(&mut self) -> Result<(), KernelError> {
        info!(kernel = %self.kernel_name, "interrupting kernel");
        self.transport.interrupt()
    }

    /// Relaunch the kernel; the session goes back to `Starting`.
    /// Fails without touching any state when the transport cannot restart.
    pub fn ensure_restartable(&self) -> Result<(), KernelError> {
        if self.transport.can_restart() {
            Ok(())
        } else {
            Err(KernelError::CannotRestart(self.kernel_name.clone()))
        }
    }

    pub fn restart(&mut self) -> Result<(), KernelError> {
        self.ensure_restartable()?;
        info!(kernel = %self.kernel_name, "restarting kernel");
        self.state = KernelState::Starting;
        self.transport.restart()
    }

    /// Stop the kernel and delete every temp file. Safe to repeat.
    pub fn shutdown(&mut self) {
        self.transport.shutdown();
        self.files.cleanup();
    }
}

fn malformed(message: &KernelMessage) -> bool {
    warn!(msg_type = %message.msg_type, "skipping kernel message with malformed content");
    false
}

fn clean_text(text: &str) -> String {
    strip_ansi(text).replace("\r\n", "\n")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChannelPeer, channel_pair};
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tsumiki_types::OutputStatus;

    #[derive(Clone, Default)]
    struct RecordingClipboard(Arc<Mutex<Vec<String>>>);

    impl ClipboardSink for RecordingClipboard {
        fn copy(&mut self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn session_with(options: &Options) -> (Session, ChannelPeer) {
        let (transport, peer) = channel_pair();
        (Session::new("python3", Box::new(transport), options), peer)
    }

    fn ready_session() -> (Session, ChannelPeer) {
        let (mut session, peer) = session_with(&Options::default());
        peer.set_ready(true);
        assert!(session.drain(None));
        (session, peer)
    }

    #[test]
    fn test_submit_before_ready_is_rejected() {
        let (mut session, mut peer) = session_with(&Options::default());
        assert_eq!(session.state(), KernelState::Starting);
        assert!(matches!(session.submit("1+1"), Err(KernelError::NotReady)));
        assert!(peer.sent().is_empty());

        assert!(!session.drain(None));
        peer.set_ready(true);
        assert!(session.drain(None));
        assert_eq!(session.state(), KernelState::Idle);
        assert!(!session.drain(None));

        session.submit("1+1").unwrap();
        let sent = peer.sent();
        assert_eq!(sent[0]["content"]["code"], "1+1");
    }

    #[test]
    fn test_one_plus_one_scenario() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        session.submit("1+1").unwrap();

        peer.push_message("status", json!({"execution_state": "busy"}));
        peer.push_message("execute_input", json!({"execution_count": 1, "code": "1+1"}));
        peer.push_message("execute_result", json!({"data": {"text/plain": "2"}, "metadata": {}, "execution_count": 1}));
        peer.push_message("status", json!({"execution_state": "idle"}));

        assert!(session.drain(Some(&mut out)));
        assert_eq!(out.execution_count, Some(1));
        assert_eq!(out.status(), OutputStatus::Done);
        assert!(out.success);
        assert_eq!(out.chunks().len(), 1);
        assert_eq!(out.chunks()[0].kind, ChunkKind::Text("2\n".into()));
        assert!(out.chunks()[0].is_persistent());
        assert_eq!(session.state(), KernelState::Idle);
    }

    #[test]
    fn test_value_error_scenario() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        peer.push_message("execute_input", json!({"execution_count": 2}));
        peer.push_message(
            "error",
            json!({"ename": "ValueError", "evalue": "bad", "traceback": ["\u{1b}[31mline1\u{1b}[0m", "line2"]}),
        );
        peer.push_message("status", json!({"execution_state": "idle"}));

        session.drain(Some(&mut out));
        assert!(!out.success);
        assert!(out.is_done());
        assert_eq!(out.header_text(), "Out[2]: ✗ Failed");
        let ChunkKind::Error { name, message, traceback } = &out.chunks()[0].kind else {
            panic!("expected error chunk");
        };
        assert_eq!((name.as_str(), message.as_str()), ("ValueError", "bad"));
        assert_eq!(traceback.len(), 2);
    }

    #[test]
    fn test_drain_stops_at_done_and_leaves_rest_queued() {
        let (mut session, peer) = ready_session();
        let mut first = Output::new();
        peer.push_message("status", json!({"execution_state": "idle"}));
        peer.push_message("stream", json!({"name": "stdout", "text": "for the next one"}));

        session.drain(Some(&mut first));
        assert!(first.is_done());
        assert!(first.chunks().is_empty());

        // A done output reads nothing at all.
        assert!(!session.drain(Some(&mut first)));

        let mut second = Output::new();
        assert!(session.drain(Some(&mut second)));
        assert_eq!(second.chunks()[0].kind, ChunkKind::Text("for the next one".into()));
    }

    #[test]
    fn test_drain_with_empty_queue_does_nothing() {
        let (mut session, _peer) = ready_session();
        let mut out = Output::new();
        assert!(!session.drain(Some(&mut out)));
        assert_eq!(out, Output::new());
    }

    #[test]
    fn test_second_execute_input_finishes_output() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        peer.push_message("execute_input", json!({"execution_count": 1}));
        peer.push_message("execute_input", json!({"execution_count": 2}));
        peer.push_message("stream", json!({"name": "stdout", "text": "late"}));

        session.drain(Some(&mut out));
        assert!(out.is_done());
        assert_eq!(out.execution_count, Some(2));
        assert!(out.chunks().is_empty());
    }

    #[test]
    fn test_malformed_and_ignored_messages_are_skipped() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        peer.push(json!({"content": {"text": "no type"}}));
        peer.push_message("execute_input", json!({"execution_count": "x"}));
        peer.push_message("update_display_data", json!({"data": {}}));
        peer.push_message("comm_open", json!({}));
        peer.push_message("status", json!({"execution_state": "starting"}));
        peer.push_message("execute_reply", json!({"status": "ok"}));

        assert!(!session.drain(Some(&mut out)));
        assert_eq!(out.status(), OutputStatus::Hold);
        assert!(out.chunks().is_empty());
    }

    #[test]
    fn test_aborted_reply_marks_failure() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        peer.push_message("execute_reply", json!({"status": "aborted"}));
        assert!(session.drain(Some(&mut out)));
        assert!(!out.success);
        assert_eq!(out.chunks()[0].kind, ChunkKind::Aborted);
    }

    #[test]
    fn test_busy_status_and_clear_output() {
        let (mut session, peer) = ready_session();
        let mut out = Output::new();
        peer.push_message("status", json!({"execution_state": "busy"}));
        peer.push_message("stream", json!({"name": "stdout", "text": "1"}));
        peer.push_message("clear_output", json!({"wait": true}));
        session.drain(Some(&mut out));
        assert_eq!(session.state(), KernelState::Busy);
        assert_eq!(out.chunks().len(), 1);
        assert!(out.pending_clear());

        peer.push_message("stream", json!({"name": "stdout", "text": "2"}));
        peer.push_message("clear_output", json!({"wait": false}));
        peer.push_message("stream", json!({"name": "stdout", "text": "3"}));
        session.drain(Some(&mut out));
        assert_eq!(out.chunks().len(), 1);
        assert_eq!(out.chunks()[0].kind, ChunkKind::Text("3".into()));
    }

    #[test]
    fn test_mimetype_debug_precedes_result() {
        let options = Options {
            show_mimetype_debug: true,
            ..Options::default()
        };
        let (mut session, peer) = session_with(&options);
        peer.set_ready(true);
        let mut out = Output::new();
        peer.push_message("display_data", json!({"data": {"text/html": "<b>x</b>", "text/plain": "x"}}));
        session.drain(Some(&mut out));

        assert_eq!(out.chunks().len(), 2);
        assert_eq!(
            out.chunks()[0].kind,
            ChunkKind::MimetypeDebug(vec!["text/html".into(), "text/plain".into()])
        );
        assert!(!out.chunks()[0].is_persistent());
        assert_eq!(out.chunks()[1].kind, ChunkKind::Text("x\n".into()));
    }

    #[test]
    fn test_copy_output_copies_textual_results() {
        let options = Options {
            copy_output: true,
            ..Options::default()
        };
        let clipboard = RecordingClipboard::default();
        let (session, peer) = session_with(&options);
        let mut session = session.with_clipboard(Box::new(clipboard.clone()));
        peer.set_ready(true);

        let mut out = Output::new();
        peer.push_message("stream", json!({"name": "stdout", "text": "hello\n"}));
        peer.push_message("execute_result", json!({"data": {"text/plain": "42"}}));
        peer.push_message("display_data", json!({"data": {"text/plain": "not copied"}}));
        peer.push_message("error", json!({"ename": "E", "evalue": "v", "traceback": ["\u{1b}[1ma\u{1b}[0m", "b\r\n"]}));
        session.drain(Some(&mut out));

        let copied = clipboard.0.lock().unwrap().clone();
        assert_eq!(copied, vec!["hello\n", "42", "a\n\nb\n"]);
    }

    #[test]
    fn test_restart_interrupt_and_shutdown() {
        let (mut session, peer) = ready_session();
        session.interrupt().unwrap();
        assert_eq!(peer.interrupts(), 1);

        session.restart().unwrap();
        assert_eq!(session.state(), KernelState::Starting);
        assert!(matches!(session.submit("x"), Err(KernelError::NotReady)));
        assert_eq!(peer.restarts(), 1);

        session.shutdown();
        session.shutdown();
        assert!(peer.is_shut_down());
    }

    #[test]
    fn test_shutdown_removes_materialized_images() {
        let (mut session, _peer) = ready_session();
        let raw = RawBundle::new(
            json!({"image/png": "aGVsbG8="}).as_object().unwrap().clone(),
            Default::default(),
        );
        // Decoding fails after the file was allocated; it is still owned.
        let chunk = session.resolve_bundle(raw);
        assert!(matches!(chunk.kind, ChunkKind::Bad(_)));
        let paths = session.temp_files().paths().to_vec();
        assert!(!paths.is_empty());

        session.shutdown();
        assert!(paths.iter().all(|p| !p.exists()));
    }
}
