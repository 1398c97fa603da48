//! HTTP body types and response helpers

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use tokio::sync::mpsc;

use crate::{Result, TapedeckError};

/// Body of every response the proxy sends
pub type ProxyBody = BoxBody<Bytes, TapedeckError>;

/// Response body fed chunk by chunk from another task
///
/// Ends when the sending side is dropped. An `Err` item aborts the response.
pub struct ChannelBody {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl ChannelBody {
    /// Wrap the receiving half of a chunk channel
    #[must_use]
    pub fn new(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        Self { rx }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = TapedeckError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Self::Error>>> {
        self.rx
            .poll_recv(cx)
            .map(|chunk| chunk.map(|chunk| chunk.map(Frame::data)))
    }
}

/// Box a complete body
#[must_use]
pub fn full(body: impl Into<Bytes>) -> ProxyBody {
    Full::new(body.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

/// Plain-text response
///
/// # Panics
///
/// Panics if response builder fails (should never happen with valid inputs)
#[must_use]
pub fn text_response(status: StatusCode, body: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"))
        .body(full(body.to_string()))
        .expect("Failed to build response")
}

/// JSON response
///
/// # Panics
///
/// Panics if response builder fails (should never happen with valid inputs)
#[must_use]
pub fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
        .body(full(body.to_string()))
        .expect("Failed to build response")
}

/// Status code a request-scoped failure is reported with
#[must_use]
pub fn error_status(error: &TapedeckError) -> StatusCode {
    match error {
        TapedeckError::Upstream(_) => StatusCode::BAD_GATEWAY,
        TapedeckError::DataTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        TapedeckError::InvalidSequenceName(_) | TapedeckError::InvalidFormat(_) => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create an error response
#[must_use]
pub fn error_response(error: &TapedeckError) -> Response<ProxyBody> {
    text_response(error_status(error), &format!("Tapedeck error: {error}"))
}

/// Read a request body, refusing more than `max_size` bytes
///
/// # Errors
///
/// Returns error if body is too large or read fails
pub async fn read_body<B>(body: B, max_size: usize) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limited = http_body_util::Limited::new(body, max_size);
    match limited.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<http_body_util::LengthLimitError>() => Err(TapedeckError::DataTooLarge {
            size: max_size.saturating_add(1),
            limit: max_size,
        }),
        Err(e) => Err(TapedeckError::InvalidFormat(format!(
            "Failed to read body: {e}"
        ))),
    }
}
