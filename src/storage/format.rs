//! On-disk interaction format
//!
//! Each storage file holds a JSON array of [`Interaction`]s in recorded
//! order. Bodies are kept as base64 of the exact bytes exchanged; the
//! optional `plaintext_body` fields are diagnostic only and are never
//! consulted during replay.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One persisted request/response exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Request as received from the client
    pub request: RecordedRequest,
    /// Response as received from the upstream
    pub response: RecordedResponse,
}

/// Stored request
///
/// Only the response is needed for replay, so every request field may be
/// missing from hand-written fixtures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedRequest {
    /// HTTP method
    #[serde(default)]
    pub method: String,
    /// Request path (no query)
    #[serde(default)]
    pub path: String,
    /// Original request target including the query string
    #[serde(default)]
    pub url: String,
    /// Headers after redaction
    #[serde(default)]
    pub headers: Headers,
    /// Raw body bytes
    #[serde(default)]
    pub body: StoredBody,
    /// Decoded text of the body, if requested and present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_body: Option<String>,
}

/// Stored response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedResponse {
    /// HTTP status code
    pub status: u16,
    /// Headers after redaction
    #[serde(default)]
    pub headers: Headers,
    /// Body bytes exactly as received, compression included
    #[serde(default)]
    pub body: StoredBody,
    /// Decompressed, UTF-8 decoded body, if requested and present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plaintext_body: Option<String>,
}

/// Header map as stored: lowercase name to one or more values
///
/// Values are text. A value carrying non-UTF-8 bytes (obs-text) is stored
/// with those bytes replaced by U+FFFD, so it does not replay byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, HeaderValues>);

/// Values of a single stored header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    /// The common case
    Single(String),
    /// Repeated header (e.g. `set-cookie`)
    Multiple(Vec<String>),
}

impl Headers {
    /// Create an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, turning the entry into a list on repetition
    pub fn append(&mut self, name: &str, value: String) {
        let name = name.to_ascii_lowercase();
        match self.0.remove(&name) {
            None => {
                self.0.insert(name, HeaderValues::Single(value));
            }
            Some(HeaderValues::Single(first)) => {
                self.0.insert(name, HeaderValues::Multiple(vec![first, value]));
            }
            Some(HeaderValues::Multiple(mut values)) => {
                values.push(value);
                self.0.insert(name, HeaderValues::Multiple(values));
            }
        }
    }

    /// First value of a header (case-insensitive lookup)
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        match self.0.get(&name.to_ascii_lowercase())? {
            HeaderValues::Single(value) => Some(value),
            HeaderValues::Multiple(values) => values.first().map(String::as_str),
        }
    }

    /// Every `(name, value)` pair, repeated headers flattened
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(name, values)| {
            let values: Vec<&str> = match values {
                HeaderValues::Single(value) => vec![value.as_str()],
                HeaderValues::Multiple(values) => values.iter().map(String::as_str).collect(),
            };
            values.into_iter().map(move |value| (name.as_str(), value))
        })
    }

    /// Number of distinct header names
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no headers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Body bytes in their storage encoding
///
/// Written as a single base64 string. Older fixtures stored the body as an
/// array of base64 chunks; both forms are accepted on read. Decoding is
/// deferred so that a bad body surfaces as a replay error for that one
/// interaction instead of making the whole file unreadable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredBody {
    /// Base64 of the full body
    Encoded(String),
    /// Legacy: base64 of each streamed chunk, in order
    Chunks(Vec<String>),
}

impl Default for StoredBody {
    fn default() -> Self {
        Self::Encoded(String::new())
    }
}

impl StoredBody {
    /// Encode raw bytes for storage
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::Encoded(STANDARD.encode(bytes))
    }

    /// Decode back to the exact stored bytes
    ///
    /// # Errors
    ///
    /// Returns error if any part is not valid base64
    pub fn decode(&self) -> Result<Bytes, base64::DecodeError> {
        match self {
            Self::Encoded(encoded) => STANDARD.decode(encoded).map(Bytes::from),
            Self::Chunks(chunks) => {
                let mut body = Vec::new();
                for chunk in chunks {
                    STANDARD.decode_vec(chunk, &mut body)?;
                }
                Ok(Bytes::from(body))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_headers_repeat() {
        let mut headers = Headers::new();
        headers.append("Set-Cookie", "a=1".to_string());
        headers.append("set-cookie", "b=2".to_string());
        headers.append("Content-Type", "text/plain".to_string());

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));

        let pairs: Vec<_> = headers.iter().collect();
        assert_eq!(
            pairs,
            vec![
                ("content-type", "text/plain"),
                ("set-cookie", "a=1"),
                ("set-cookie", "b=2"),
            ]
        );
    }

    #[test]
    fn test_headers_json_shape() {
        let mut headers = Headers::new();
        headers.append("authorization", "[REDACTED]".to_string());
        headers.append("accept", "a".to_string());
        headers.append("accept", "b".to_string());

        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"accept": ["a", "b"], "authorization": "[REDACTED]"})
        );
    }

    #[test]
    fn test_legacy_chunked_body() {
        let body: StoredBody = serde_json::from_str(r#"["aGVsbG8g", "d29ybGQ="]"#).unwrap();
        assert_eq!(body.decode().unwrap(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn test_invalid_body_fails_on_decode_only() {
        let body: StoredBody = serde_json::from_str(r#""not base64!""#).unwrap();
        assert!(body.decode().is_err());
    }

    #[test]
    fn test_minimal_fixture_parses() {
        let json = r#"[{
            "request": {"method": "GET", "path": "/get", "url": "/get"},
            "response": {"status": 204}
        }]"#;

        let interactions: Vec<Interaction> = serde_json::from_str(json).unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].response.status, 204);
        assert!(interactions[0].response.body.decode().unwrap().is_empty());
    }

    #[test]
    fn test_fixture_without_request_target() {
        let json = r#"[{
            "request": {"headers": {"accept": "*/*"}},
            "response": {"status": 200, "body": "b2s="}
        }]"#;

        let interactions: Vec<Interaction> = serde_json::from_str(json).unwrap();
        assert_eq!(interactions[0].request.url, "");
        assert_eq!(interactions[0].request.method, "");
        assert_eq!(
            interactions[0].response.body.decode().unwrap(),
            Bytes::from_static(b"ok")
        );
    }

    proptest! {
        #[test]
        fn prop_body_bytes_survive_storage(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let stored = StoredBody::from_bytes(&bytes);
            let json = serde_json::to_string(&stored).unwrap();
            let parsed: StoredBody = serde_json::from_str(&json).unwrap();
            let decoded = parsed.decode().unwrap();
            prop_assert_eq!(decoded.as_ref(), bytes.as_slice());
        }
    }
}
