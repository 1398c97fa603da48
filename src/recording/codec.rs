//! Conversion between live exchanges and stored interactions

use std::collections::HashSet;
use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use hyper::header::{HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, StatusCode, Uri};
use tracing::debug;

use crate::storage::{Headers, Interaction, RecordedRequest, RecordedResponse, StoredBody};
use crate::{Result, TapedeckError};

/// Value stored in place of a redacted header
pub const REDACTED: &str = "[REDACTED]";

/// Stored in place of a plaintext body that could not be decoded
pub const PLAINTEXT_UNAVAILABLE: &str = "<<unable to decode body as text>>";

/// Request half of a live exchange, captured before forwarding
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    /// HTTP method
    pub method: Method,
    /// Request target as received (path and query)
    pub uri: Uri,
    /// Headers as received
    pub headers: HeaderMap,
    /// Full request body
    pub body: Bytes,
}

/// Response rebuilt from a stored interaction
#[derive(Debug, Clone)]
pub struct ReplayedResponse {
    /// Status code
    pub status: StatusCode,
    /// Headers minus framing headers
    pub headers: HeaderMap,
    /// Exact stored body bytes
    pub body: Bytes,
}

/// Builds interactions from exchanges and responses from interactions
#[derive(Debug, Clone, Default)]
pub struct InteractionCodec {
    redact: HashSet<String>,
    include_plaintext: bool,
}

impl InteractionCodec {
    /// Create a codec
    ///
    /// `redact` names are matched case-insensitively.
    #[must_use]
    pub fn new<I, S>(redact: I, include_plaintext: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            redact: redact
                .into_iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
            include_plaintext,
        }
    }

    /// Build the storable record of a completed exchange
    ///
    /// The response body is kept exactly as received; only the optional
    /// plaintext copy is decompressed.
    #[must_use]
    pub fn build_from_exchange(
        &self,
        request: &CapturedRequest,
        status: StatusCode,
        response_headers: &HeaderMap,
        response_body: &[u8],
    ) -> Interaction {
        let url = request
            .uri
            .path_and_query()
            .map_or_else(|| request.uri.path().to_string(), ToString::to_string);

        Interaction {
            request: RecordedRequest {
                method: request.method.to_string(),
                path: request.uri.path().to_string(),
                url,
                headers: self.redact_headers(&request.headers),
                body: StoredBody::from_bytes(&request.body),
                plaintext_body: self.plaintext(&request.headers, &request.body),
            },
            response: RecordedResponse {
                status: status.as_u16(),
                headers: self.redact_headers(response_headers),
                body: StoredBody::from_bytes(response_body),
                plaintext_body: self.plaintext(response_headers, response_body),
            },
        }
    }

    /// Copy headers for storage, replacing redacted values
    ///
    /// Non-UTF-8 bytes in values are replaced; see [`Headers`].
    #[must_use]
    pub fn redact_headers(&self, headers: &HeaderMap) -> Headers {
        let mut stored = Headers::new();
        for (name, value) in headers {
            let value = if self.redact.contains(name.as_str()) {
                REDACTED.to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            stored.append(name.as_str(), value);
        }
        stored
    }

    fn plaintext(&self, headers: &HeaderMap, body: &[u8]) -> Option<String> {
        if !self.include_plaintext || body.is_empty() {
            return None;
        }

        let encoding = headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        Some(decode_plaintext(body, encoding).unwrap_or_else(|| PLAINTEXT_UNAVAILABLE.to_string()))
    }

    /// Rebuild the response to send for a stored interaction
    ///
    /// `content-length` and `transfer-encoding` are dropped; the server
    /// frames the body itself. Nothing is recompressed: the stored bytes
    /// already match any stored `content-encoding`.
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::MalformedStorage`] if the status, a header
    /// or the body cannot be decoded
    pub fn reconstruct_response(
        interaction: &Interaction,
        location: &str,
        index: usize,
    ) -> Result<ReplayedResponse> {
        let malformed = |reason: String| TapedeckError::MalformedStorage {
            location: location.to_string(),
            index,
            reason,
        };

        let status = StatusCode::from_u16(interaction.response.status)
            .map_err(|e| malformed(format!("status {}: {e}", interaction.response.status)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in interaction.response.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| malformed(format!("header name '{name}': {e}")))?;
            if name == CONTENT_LENGTH || name == TRANSFER_ENCODING {
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| malformed(format!("header '{name}': {e}")))?;
            headers.append(name, value);
        }

        let body = interaction
            .response
            .body
            .decode()
            .map_err(|e| malformed(format!("body: {e}")))?;

        Ok(ReplayedResponse {
            status,
            headers,
            body,
        })
    }
}

/// Decompress per `content-encoding`, then decode as UTF-8
///
/// Encodings are undone last-applied first. Unknown encodings pass through
/// unchanged. Returns `None` if decompression or UTF-8 decoding fails.
#[must_use]
pub fn decode_plaintext(body: &[u8], content_encoding: &str) -> Option<String> {
    let mut data = body.to_vec();

    for encoding in content_encoding.rsplit(',').map(str::trim) {
        data = match encoding.to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => read_all(GzDecoder::new(data.as_slice()))?,
            "deflate" => inflate(&data)?,
            "" | "identity" => data,
            other => {
                debug!("Leaving unknown content-encoding '{}' as is", other);
                data
            }
        };
    }

    String::from_utf8(data).ok()
}

/// HTTP `deflate` is zlib-wrapped, but some servers send raw deflate.
fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    read_all(ZlibDecoder::new(data)).or_else(|| read_all(DeflateDecoder::new(data)))
}

fn read_all(mut reader: impl Read) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn request(headers: &[(&str, &str)], body: &'static [u8]) -> CapturedRequest {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        CapturedRequest {
            method: Method::POST,
            uri: Uri::from_static("/search?q=rust"),
            headers: map,
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_obs_text_header_stored_lossy() {
        let codec = InteractionCodec::new(Vec::<String>::new(), false);
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-name"),
            HeaderValue::from_bytes(b"caf\xe9").unwrap(),
        );

        let stored = codec.redact_headers(&headers);
        assert_eq!(stored.get("x-name"), Some("caf\u{FFFD}"));
    }

    #[test]
    fn test_redaction_is_case_insensitive() {
        let codec = InteractionCodec::new(["Authorization", "x-api-key"], false);
        let req = request(
            &[
                ("authorization", "Bearer secret"),
                ("X-Api-Key", "k"),
                ("accept", "application/json"),
            ],
            b"",
        );

        let stored = codec.redact_headers(&req.headers);
        assert_eq!(stored.get("authorization"), Some(REDACTED));
        assert_eq!(stored.get("x-api-key"), Some(REDACTED));
        assert_eq!(stored.get("accept"), Some("application/json"));
    }

    #[test]
    fn test_build_from_exchange() {
        let codec = InteractionCodec::new(["authorization"], true);
        let req = request(&[("authorization", "Bearer secret")], b"{\"q\":1}");
        let mut response_headers = HeaderMap::new();
        response_headers.insert(CONTENT_LENGTH, HeaderValue::from_static("16"));

        let interaction = codec.build_from_exchange(
            &req,
            StatusCode::OK,
            &response_headers,
            b"{\"message\":\"ok\"}",
        );

        assert_eq!(interaction.request.method, "POST");
        assert_eq!(interaction.request.path, "/search");
        assert_eq!(interaction.request.url, "/search?q=rust");
        assert_eq!(interaction.request.headers.get("authorization"), Some(REDACTED));
        assert_eq!(interaction.request.plaintext_body.as_deref(), Some("{\"q\":1}"));
        assert_eq!(interaction.response.status, 200);
        assert_eq!(
            interaction.response.plaintext_body.as_deref(),
            Some("{\"message\":\"ok\"}")
        );
    }

    #[test]
    fn test_plaintext_disabled() {
        let codec = InteractionCodec::new(Vec::<String>::new(), false);
        let interaction =
            codec.build_from_exchange(&request(&[], b"body"), StatusCode::OK, &HeaderMap::new(), b"x");

        assert!(interaction.request.plaintext_body.is_none());
        assert!(interaction.response.plaintext_body.is_none());
    }

    #[test]
    fn test_gzip_body_stored_raw() {
        let codec = InteractionCodec::new(Vec::<String>::new(), true);
        let compressed = gzip(b"hello world");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let interaction =
            codec.build_from_exchange(&request(&[], b""), StatusCode::OK, &headers, &compressed);

        assert_eq!(interaction.response.body, StoredBody::from_bytes(&compressed));
        assert_eq!(interaction.response.headers.get("content-encoding"), Some("gzip"));
        assert_eq!(interaction.response.plaintext_body.as_deref(), Some("hello world"));
    }

    #[test]
    fn test_undecodable_body_gets_placeholder() {
        let codec = InteractionCodec::new(Vec::<String>::new(), true);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));

        let interaction = codec.build_from_exchange(
            &request(&[], b""),
            StatusCode::OK,
            &headers,
            b"definitely not gzip",
        );

        assert_eq!(
            interaction.response.plaintext_body.as_deref(),
            Some(PLAINTEXT_UNAVAILABLE)
        );
        assert_eq!(
            interaction.response.body.decode().unwrap(),
            Bytes::from_static(b"definitely not gzip")
        );
    }

    #[test]
    fn test_decode_plaintext_variants() {
        let mut zlib = ZlibEncoder::new(Vec::new(), Compression::default());
        zlib.write_all(b"deflated").unwrap();
        let zlib = zlib.finish().unwrap();

        assert_eq!(decode_plaintext(&zlib, "deflate").as_deref(), Some("deflated"));
        assert_eq!(decode_plaintext(b"plain", "").as_deref(), Some("plain"));
        assert_eq!(decode_plaintext(b"plain", "br").as_deref(), Some("plain"));
        assert_eq!(decode_plaintext(&[0xff, 0xfe, 0x00], ""), None);

        let double = gzip(&gzip(b"twice"));
        assert_eq!(decode_plaintext(&double, "gzip, gzip").as_deref(), Some("twice"));
    }

    #[test]
    fn test_reconstruct_strips_framing_headers() {
        let codec = InteractionCodec::new(Vec::<String>::new(), false);
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("3"));
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let interaction =
            codec.build_from_exchange(&request(&[], b""), StatusCode::CREATED, &headers, &[0, 159, 255]);
        let replayed = InteractionCodec::reconstruct_response(&interaction, "_search.json", 0).unwrap();

        assert_eq!(replayed.status, StatusCode::CREATED);
        assert!(replayed.headers.get(CONTENT_LENGTH).is_none());
        assert!(replayed.headers.get(TRANSFER_ENCODING).is_none());
        assert_eq!(replayed.headers.get("x-trace").unwrap(), "abc");
        assert_eq!(replayed.headers.get_all("set-cookie").iter().count(), 2);
        assert_eq!(replayed.body.as_ref(), &[0, 159, 255]);
    }

    #[test]
    fn test_reconstruct_malformed_body() {
        let codec = InteractionCodec::new(Vec::<String>::new(), false);
        let mut interaction =
            codec.build_from_exchange(&request(&[], b""), StatusCode::OK, &HeaderMap::new(), b"");
        interaction.response.body = StoredBody::Encoded("%%%".to_string());

        let err = InteractionCodec::reconstruct_response(&interaction, "_search.json", 3).unwrap_err();
        match err {
            TapedeckError::MalformedStorage { location, index, .. } => {
                assert_eq!(location, "_search.json");
                assert_eq!(index, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
