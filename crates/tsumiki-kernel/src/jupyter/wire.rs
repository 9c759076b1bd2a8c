//! Jupyter wire framing and message signing.
//!
//! A message on a ZeroMQ socket is a list of frames:
//!
//! ```text
//! [routing ids...] <IDS|MSG> signature header parent_header metadata content [buffers...]
//! ```
//!
//! The signature is the hex HMAC of the four JSON frames, keyed with the
//! connection file's key. An empty key disables signing.

use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use thiserror::Error;

use crate::error::KernelError;

/// Separates routing identities from the message proper.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

const PARTS: [&str; 4] = ["header", "parent_header", "metadata", "content"];

#[derive(Debug, Error)]
pub enum WireError {
    #[error("missing <IDS|MSG> delimiter")]
    NoDelimiter,

    #[error("expected 5 frames after the delimiter, got {0}")]
    Truncated(usize),

    #[error("signature mismatch")]
    BadSignature,

    #[error("malformed {part}: {source}")]
    Json {
        part: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies messages for one connection.
#[derive(Clone)]
pub struct Signer {
    key: Option<Vec<u8>>,
}

impl Signer {
    pub fn new(scheme: &str, key: &str) -> Result<Self, KernelError> {
        if key.is_empty() {
            return Ok(Self { key: None });
        }
        if scheme != "hmac-sha256" {
            return Err(KernelError::SignatureScheme(scheme.to_string()));
        }
        Ok(Self {
            key: Some(key.as_bytes().to_vec()),
        })
    }

    fn mac(&self, parts: &[&[u8]]) -> Option<HmacSha256> {
        let key = self.key.as_ref()?;
        // HMAC accepts keys of any length.
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        for part in parts {
            mac.update(part);
        }
        Some(mac)
    }

    /// Hex signature of `parts`, empty when signing is off.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        self.mac(parts)
            .map(|mac| hex::encode(mac.finalize().into_bytes()))
            .unwrap_or_default()
    }

    pub fn verify(&self, parts: &[&[u8]], signature: &[u8]) -> bool {
        let Some(mac) = self.mac(parts) else {
            return true;
        };
        hex::decode(signature).is_ok_and(|sig| mac.verify_slice(&sig).is_ok())
    }
}

/// Frames for a message built by [`crate::message`]. Missing parts are sent
/// as empty objects.
pub fn encode(signer: &Signer, message: &Value) -> Vec<Bytes> {
    let parts: Vec<Vec<u8>> = PARTS
        .iter()
        .map(|name| {
            let part = message.get(*name).cloned().unwrap_or_else(|| json!({}));
            part.to_string().into_bytes()
        })
        .collect();
    let refs: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    let signature = signer.sign(&refs);

    let mut frames = Vec::with_capacity(2 + parts.len());
    frames.push(Bytes::from_static(DELIMITER));
    frames.push(Bytes::from(signature.into_bytes()));
    frames.extend(parts.into_iter().map(Bytes::from));
    frames
}

/// Parse and verify frames into `{header, parent_header, metadata, content,
/// msg_type}`. Routing ids and buffers are dropped.
pub fn decode<B: AsRef<[u8]>>(signer: &Signer, frames: &[B]) -> Result<Value, WireError> {
    let start = frames
        .iter()
        .position(|f| f.as_ref() == DELIMITER)
        .ok_or(WireError::NoDelimiter)?;
    let rest = &frames[start + 1..];
    if rest.len() < 5 {
        return Err(WireError::Truncated(rest.len()));
    }

    let signature = rest[0].as_ref();
    let parts: Vec<&[u8]> = rest[1..5].iter().map(AsRef::as_ref).collect();
    if !signer.verify(&parts, signature) {
        return Err(WireError::BadSignature);
    }

    let mut message = serde_json::Map::new();
    for (&name, part) in PARTS.iter().zip(&parts) {
        let value: Value =
            serde_json::from_slice(part).map_err(|source| WireError::Json { part: name, source })?;
        message.insert(name.to_string(), value);
    }
    if let Some(msg_type) = message.get("header").and_then(|h| h.get("msg_type")).cloned() {
        message.insert("msg_type".to_string(), msg_type);
    }
    Ok(Value::Object(message))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message;
    use tsumiki_types::SessionId;

    #[test]
    fn test_signature_matches_hmac_sha256() {
        let signer = Signer::new("hmac-sha256", "key").unwrap();
        // Split across parts the way the four JSON frames are fed in.
        let sig = signer.sign(&[
            "The quick brown ".as_bytes(),
            "fox jumps over ".as_bytes(),
            "the lazy dog".as_bytes(),
        ]);
        assert_eq!(
            sig,
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_empty_key_disables_signing() {
        let signer = Signer::new("hmac-md5", "").unwrap();
        let parts = ["anything".as_bytes()];
        assert_eq!(signer.sign(&parts), "");
        assert!(signer.verify(&parts, b""));
    }

    #[test]
    fn test_unknown_scheme_is_rejected() {
        assert!(matches!(
            Signer::new("hmac-md5", "secret"),
            Err(KernelError::SignatureScheme(s)) if s == "hmac-md5"
        ));
    }

    #[test]
    fn test_encoded_request_decodes_with_msg_type() {
        let signer = Signer::new("hmac-sha256", "secret").unwrap();
        let request = message::execute_request(SessionId::new(), "print(1)");
        let mut frames = encode(&signer, &request);
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0].as_ref(), DELIMITER);

        // A router on the far side sees its peer identity first.
        frames.insert(0, Bytes::from_static(b"peer-id"));
        let decoded = decode(&signer, &frames).unwrap();
        assert_eq!(decoded["msg_type"], "execute_request");
        assert_eq!(decoded["content"]["code"], "print(1)");
        assert_eq!(decoded["parent_header"], json!({}));
    }

    #[test]
    fn test_tampered_or_foreign_messages_are_rejected() {
        let signer = Signer::new("hmac-sha256", "secret").unwrap();
        let request = message::kernel_info_request(SessionId::new());

        let mut frames = encode(&signer, &request);
        frames[5] = Bytes::from_static(br#"{"evil": true}"#);
        assert!(matches!(decode(&signer, &frames), Err(WireError::BadSignature)));

        let other = Signer::new("hmac-sha256", "other").unwrap();
        let frames = encode(&other, &request);
        assert!(matches!(decode(&signer, &frames), Err(WireError::BadSignature)));
    }

    #[test]
    fn test_malformed_framing() {
        let signer = Signer::new("hmac-sha256", "").unwrap();
        let no_delim: [&[u8]; 2] = [b"a", b"b"];
        assert!(matches!(decode(&signer, &no_delim), Err(WireError::NoDelimiter)));

        let short: [&[u8]; 3] = [DELIMITER, b"", b"{}"];
        assert!(matches!(decode(&signer, &short), Err(WireError::Truncated(2))));

        let bad_json: [&[u8]; 6] = [DELIMITER, b"", b"{}", b"{}", b"{}", b"nope"];
        assert!(matches!(
            decode(&signer, &bad_json),
            Err(WireError::Json { part: "content", .. })
        ));
    }
}
