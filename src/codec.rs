//! Decoding of the stream invocation envelope.
//!
//! Invocations deliver a batch of stream records whose payloads are
//! base64-encoded JSON shot events. The codec is the only component that
//! sees the encoded form; everything downstream works on [`ShotEvent`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

/// Errors raised while decoding a raw stream record.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The envelope was not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The decoded bytes were not UTF-8 text.
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The decoded text was not a well-formed shot event.
    #[error("malformed shot event: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Batched invocation event delivered by the hosting runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationEvent {
    /// Stream records in arrival order.
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

/// One record of the invocation batch.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamRecord {
    pub kinesis: RecordPayload,
}

/// Stream-level payload carrying the encoded event.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordPayload {
    /// Base64-encoded shot event.
    pub data: String,
}

/// A decoded shot occurrence. Immutable once decoded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShotEvent {
    pub shot: Shot,
    pub shot_id: i64,
}

/// Numeric attributes of a single shot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Shot {
    pub distance_to_goal: f64,
    pub angle_to_goal: f64,
}

/// Decode one base64-encoded shot event.
///
/// Unknown fields in the payload are ignored so producers can add
/// attributes without breaking older consumers.
pub fn decode(encoded: &str) -> Result<ShotEvent, DecodeError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    let text = String::from_utf8(bytes)?;
    let event = serde_json::from_str(&text)?;
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    // {"shot": {"distance_to_goal": 5.1, "angle_to_goal": 1.2}, "shot_id": 123}
    const VALID_B64: &str =
        "eyJzaG90IjogeyJkaXN0YW5jZV90b19nb2FsIjogNS4xLCAiYW5nbGVfdG9fZ29hbCI6IDEuMn0sICJzaG90X2lkIjogMTIzfQ==";

    #[test]
    fn test_decode_valid_event() {
        let event = decode(VALID_B64).unwrap();

        assert_eq!(event.shot_id, 123);
        assert_eq!(event.shot.distance_to_goal, 5.1);
        assert_eq!(event.shot.angle_to_goal, 1.2);
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let padded = format!("{}\n", VALID_B64);
        let event = decode(&padded).unwrap();

        assert_eq!(event.shot_id, 123);
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode("!!! not base64 !!!").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        // "not json at all"
        let err = decode("bm90IGpzb24gYXQgYWxs").unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)));
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        // {"shot": {"distance_to_goal": 5.1}, "shot_id": 123}
        let err = decode("eyJzaG90IjogeyJkaXN0YW5jZV90b19nb2FsIjogNS4xfSwgInNob3RfaWQiOiAxMjN9")
            .unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)));
    }

    #[test]
    fn test_invocation_envelope_shape() {
        let event: InvocationEvent = serde_json::from_value(serde_json::json!({
            "Records": [{"kinesis": {"data": VALID_B64}}]
        }))
        .unwrap();

        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].kinesis.data, VALID_B64);
    }

    #[test]
    fn test_empty_envelope_has_no_records() {
        let event: InvocationEvent = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(event.records.is_empty());
    }
}
