//! Typed identifiers for documents, anchors, sessions and messages.
//!
//! Two families live here:
//!
//! - Host-assigned integer handles (`DocumentId`, `AnchorId`). The host editor
//!   owns these numbers; tsumiki only ever passes them back.
//! - Kernel-protocol identifiers (`SessionId`, `MessageId`) wrapping UUIDv4,
//!   generated on our side of the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A document (editor buffer) handle, assigned by the host.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(u32);

/// An anchor handle inside a document's anchor table.
///
/// Anchors are opaque: their coordinates are only ever obtained by asking the
/// document to resolve them, because the document moves them on every edit.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchorId(u64);

/// A kernel protocol session identifier (UUIDv4).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

/// A kernel protocol message identifier (UUIDv4).
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(uuid::Uuid);

// ── Integer handles ─────────────────────────────────────────────────────────

macro_rules! impl_handle {
    ($T:ident, $inner:ty, $name:literal) => {
        impl $T {
            /// Wrap a raw host value.
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// The raw host value.
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $T {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.0)
            }
        }
    };
}

impl_handle!(DocumentId, u32, "DocumentId");
impl_handle!(AnchorId, u64, "AnchorId");

// ── Protocol identifiers ────────────────────────────────────────────────────

macro_rules! impl_protocol_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Create a new random ID (UUIDv4).
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// 32-character hex string (no hyphens), the form used on the wire.
            pub fn to_hex(&self) -> String {
                self.0.as_simple().to_string()
            }

            /// First 8 hex characters, for logs only.
            pub fn short(&self) -> String {
                self.to_hex()[..8].to_string()
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $name, self.short())
            }
        }
    };
}

impl_protocol_id!(SessionId, "SessionId");
impl_protocol_id!(MessageId, "MessageId");

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_roundtrip_raw_values() {
        let doc = DocumentId::new(7);
        assert_eq!(doc.get(), 7);
        assert_eq!(doc.to_string(), "7");
        assert_eq!(format!("{doc:?}"), "DocumentId(7)");

        let anchor: AnchorId = 42u64.into();
        assert_eq!(anchor.get(), 42);
    }

    #[test]
    fn test_protocol_ids_are_unique_hex() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_hex().len(), 32);
        assert!(a.to_hex().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn test_handles_serialize_transparently() {
        let json = serde_json::to_string(&DocumentId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: AnchorId = serde_json::from_str("11").unwrap();
        assert_eq!(back, AnchorId::new(11));
    }
}
