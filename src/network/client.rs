//! Forwarding requests to the upstream

use std::time::Duration;

use async_trait::async_trait;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{HeaderName, HOST};
use hyper::{HeaderMap, Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::{Result, TapedeckError};

/// Streamed upstream response body
pub type UpstreamBody = UnsyncBoxBody<Bytes, TapedeckError>;

/// Headers that describe a single connection and are never passed along
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Sends a request to the upstream and hands back a streamed response
///
/// The request URI is in origin form (path and query); implementations
/// decide where it goes. The future resolves as soon as the response head
/// is available.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Forward one request
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::Upstream`] if no response head was received
    async fn forward(&self, request: Request<Full<Bytes>>) -> Result<Response<UpstreamBody>>;
}

/// Plain-HTTP forwarder backed by a pooled hyper client
pub struct HttpClient {
    client: Client<HttpConnector, Full<Bytes>>,
    target_host: String,
    target_port: u16,
}

impl HttpClient {
    /// Create a new HTTP client for one upstream
    #[must_use]
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build_http();

        Self {
            client,
            target_host: target_host.into(),
            target_port,
        }
    }

    fn target_uri(&self, uri: &Uri) -> Result<Uri> {
        build_uri(&self.target_host, self.target_port, uri)
    }
}

#[async_trait]
impl Forwarder for HttpClient {
    async fn forward(&self, request: Request<Full<Bytes>>) -> Result<Response<UpstreamBody>> {
        let (mut parts, body) = request.into_parts();
        let uri = self.target_uri(&parts.uri)?;

        debug!("Forwarding {} to {}", parts.method, uri);

        parts.uri = uri;
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(HOST);

        let response = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| {
                warn!("Upstream request failed: {e}");
                TapedeckError::Upstream(e.to_string())
            })?;

        Ok(response.map(|body| {
            body.map_err(|e| TapedeckError::Upstream(format!("Failed to read response body: {e}")))
                .boxed_unsync()
        }))
    }
}

/// Remove connection-scoped headers, including any named in `connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(hyper::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Build the absolute upstream URI for an origin-form request target
fn build_uri(host: &str, port: u16, uri: &Uri) -> Result<Uri> {
    let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let uri = format!("http://{host}:{port}{path_and_query}");

    uri.parse::<Uri>()
        .map_err(|e| TapedeckError::InvalidFormat(format!("Invalid URI '{uri}': {e}")))
}
