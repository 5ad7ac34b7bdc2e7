//! Opaque pagination cursors.
//!
//! A cursor is the URL-safe base64 encoding of a JSON tuple: a
//! query-fingerprint checksum, a direction byte, the order-by column
//! values of the row, and the primary-key tiebreaker `(kind, id)`.
//! Decoding verifies the checksum so a cursor minted by one query shape
//! cannot be replayed against another.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{GraphError, Result};

/// How many hex chars of the query fingerprint the cursor carries.
const CHECKSUM_LEN: usize = 8;

/// Pagination direction recorded in the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorDirection {
    Forward,
    Backward,
}

impl CursorDirection {
    fn as_byte(self) -> u8 {
        match self {
            CursorDirection::Forward => b'f',
            CursorDirection::Backward => b'b',
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'f' => Some(CursorDirection::Forward),
            b'b' => Some(CursorDirection::Backward),
            _ => None,
        }
    }
}

/// Decoded cursor contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub direction: CursorDirection,
    /// Order-by column values, in order-by declaration order
    pub values: Vec<JsonValue>,
    pub pk_kind: String,
    pub pk_id: String,
}

#[derive(Serialize, Deserialize)]
struct Payload {
    c: String,
    d: u8,
    v: Vec<JsonValue>,
    k: String,
    i: String,
}

/// Encode a cursor for the given query fingerprint.
pub fn encode(fingerprint: &str, cursor: &Cursor) -> String {
    let payload = Payload {
        c: checksum(fingerprint),
        d: cursor.direction.as_byte(),
        v: cursor.values.clone(),
        k: cursor.pk_kind.clone(),
        i: cursor.pk_id.clone(),
    };
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode and verify a cursor against the expected query fingerprint.
pub fn decode(fingerprint: &str, token: &str) -> Result<Cursor> {
    let invalid = |msg: &str| GraphError::Validation {
        kind: "Cursor".to_string(),
        fields: Vec::new(),
        message: msg.to_string(),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| invalid("cursor is not valid base64"))?;
    let payload: Payload =
        serde_json::from_slice(&bytes).map_err(|_| invalid("cursor payload is malformed"))?;

    if payload.c != checksum(fingerprint) {
        return Err(invalid("cursor does not belong to this query"));
    }
    let direction = CursorDirection::from_byte(payload.d)
        .ok_or_else(|| invalid("cursor direction byte is invalid"))?;

    Ok(Cursor {
        direction,
        values: payload.v,
        pk_kind: payload.k,
        pk_id: payload.i,
    })
}

fn checksum(fingerprint: &str) -> String {
    fingerprint.chars().take(CHECKSUM_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Cursor {
        Cursor {
            direction: CursorDirection::Forward,
            values: vec![json!(300), json!("Widget")],
            pk_kind: "Product".into(),
            pk_id: "p3".into(),
        }
    }

    #[test]
    fn test_round_trip() {
        let fp = "deadbeefcafebabe";
        let token = encode(fp, &sample());
        let back = decode(fp, &token).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_opaque_url_safe() {
        let token = encode("deadbeefcafebabe", &sample());
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_fingerprint_mismatch_rejected() {
        let token = encode("deadbeefcafebabe", &sample());
        let err = decode("0123456789abcdef", &token).unwrap_err();
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(decode("deadbeefcafebabe", "!!!not-base64!!!").is_err());
        let noise = URL_SAFE_NO_PAD.encode(b"{\"nope\":true}");
        assert!(decode("deadbeefcafebabe", &noise).is_err());
    }
}
