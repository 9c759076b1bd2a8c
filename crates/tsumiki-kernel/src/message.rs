//! Jupyter-shaped kernel messages.
//!
//! Inbound messages are kept as `(msg_type, content)` pairs and their content
//! is parsed lazily into the typed structs below when the session classifies
//! them. A message without a `msg_type` or `content` never becomes a
//! [`KernelMessage`].

use serde::Deserialize;
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use tsumiki_types::{MessageId, MimeBundle, RawBundle, SessionId};

/// Protocol version written into outbound headers.
pub const PROTOCOL_VERSION: &str = "5.3";

/// Inbound message types the session acts on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    ExecuteInput,
    Status,
    ExecuteResult,
    DisplayData,
    Error,
    ExecuteReply,
    Stream,
    ClearOutput,
    KernelInfoReply,
}

/// One inbound message, reduced to what classification needs.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelMessage {
    pub msg_type: String,
    pub content: Value,
}

impl KernelMessage {
    pub fn new(msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            content,
        }
    }

    /// Extract from a wire value.
    ///
    /// `msg_type` is read from the top level, falling back to the header.
    /// Returns `None` when either field is missing.
    pub fn from_wire(value: &Value) -> Option<Self> {
        let msg_type = value
            .get("msg_type")
            .or_else(|| value.get("header").and_then(|h| h.get("msg_type")))
            .and_then(Value::as_str)?;
        let content = value.get("content")?;
        Some(Self::new(msg_type, content.clone()))
    }

    /// Known kind, or `None` for types the session ignores.
    pub fn kind(&self) -> Option<MessageKind> {
        self.msg_type.parse().ok()
    }

    /// Parse the content as `T`. Malformed content yields `None`.
    pub fn parse<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        serde_json::from_value(self.content.clone()).ok()
    }
}

// ============================================================================
// Content shapes
// ============================================================================

#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteInput {
    pub execution_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Status {
    pub execution_state: String,
}

/// Content of `execute_result` and `display_data`.
#[derive(Clone, Debug, Deserialize)]
pub struct MimeContent {
    pub data: MimeBundle,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MimeContent {
    pub fn into_raw(self) -> RawBundle {
        RawBundle::new(self.data, self.metadata)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorContent {
    pub ename: String,
    pub evalue: String,
    #[serde(default)]
    pub traceback: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExecuteReply {
    pub status: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Stream {
    pub text: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClearOutput {
    #[serde(default)]
    pub wait: bool,
}

// ============================================================================
// Outbound
// ============================================================================

fn header(session: SessionId, msg_type: &str) -> Value {
    json!({
        "msg_id": MessageId::new().to_hex(),
        "session": session.to_hex(),
        "username": "tsumiki",
        "msg_type": msg_type,
        "version": PROTOCOL_VERSION,
    })
}

fn request(session: SessionId, msg_type: &str, content: Value) -> Value {
    json!({
        "header": header(session, msg_type),
        "parent_header": {},
        "metadata": {},
        "msg_type": msg_type,
        "content": content,
    })
}

/// `execute_request` for `code`.
pub fn execute_request(session: SessionId, code: &str) -> Value {
    request(
        session,
        "execute_request",
        json!({
            "code": code,
            "silent": false,
            "store_history": true,
            "user_expressions": {},
            "allow_stdin": false,
            "stop_on_error": true,
        }),
    )
}

pub fn kernel_info_request(session: SessionId) -> Value {
    request(session, "kernel_info_request", json!({}))
}

pub fn shutdown_request(session: SessionId, restart: bool) -> Value {
    request(session, "shutdown_request", json!({ "restart": restart }))
}

/// Sent on the control channel to kernels whose spec asks for message interrupts.
pub fn interrupt_request(session: SessionId) -> Value {
    request(session, "interrupt_request", json!({}))
}

// ============================================================================
// Tests
// ============================================================================
