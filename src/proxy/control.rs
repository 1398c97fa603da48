//! Control endpoints under `/__tapedeck/`

use hyper::body::{Body, Bytes};
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::Mode;
use crate::network::{self, ProxyBody};

use super::http::HttpProxy;

/// Path prefix reserved for control requests
pub const CONTROL_PREFIX: &str = "/__tapedeck/";

const SEQUENCE_PATH: &str = "/__tapedeck/sequence";
const STATS_PATH: &str = "/__tapedeck/stats";

/// Control bodies are tiny JSON documents
const MAX_CONTROL_BODY: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ActivateRequest {
    name: String,
    #[serde(default)]
    mode: Option<Mode>,
}

/// Check if a request path targets the control surface
#[must_use]
pub fn is_control_path(path: &str) -> bool {
    path.starts_with(CONTROL_PREFIX)
}

/// Serve a control request
///
/// `GET /__tapedeck/sequence` reports the active sequence,
/// `POST /__tapedeck/sequence` activates one and
/// `GET /__tapedeck/stats` reports replay and writer counters.
pub async fn handle<B>(proxy: &HttpProxy, request: Request<B>) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, SEQUENCE_PATH) => {
            let state = proxy.current().await;
            network::json_response(StatusCode::OK, &json!(state))
        }
        (Method::POST, SEQUENCE_PATH) => activate(proxy, request.into_body()).await,
        (Method::GET, STATS_PATH) => {
            let replay = proxy.replay_stats();
            let writer = proxy.writer_stats();
            network::json_response(
                StatusCode::OK,
                &json!({
                    "replay": {
                        "served": replay.served,
                        "missing": replay.missing,
                        "exhausted": replay.exhausted,
                    },
                    "writer": {
                        "written": writer.written,
                        "failed": writer.failed,
                        "pending": writer.pending,
                        "queue_full": writer.queue_full,
                    },
                }),
            )
        }
        (_, SEQUENCE_PATH | STATS_PATH) => {
            network::text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
        _ => network::text_response(StatusCode::NOT_FOUND, "Unknown control endpoint"),
    }
}

async fn activate<B>(proxy: &HttpProxy, body: B) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match network::read_body(body, MAX_CONTROL_BODY).await {
        Ok(body) => body,
        Err(e) => return network::error_response(&e),
    };

    let request: ActivateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejected activation request: {}", e);
            return network::text_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid activation request: {e}"),
            );
        }
    };

    match proxy.activate(&request.name, request.mode).await {
        Ok(state) => {
            info!("Control: sequence '{}' active ({})", state.name, state.mode);
            network::json_response(StatusCode::OK, &json!(state))
        }
        Err(e) => {
            warn!("Activation of '{}' failed: {}", request.name, e);
            network::error_response(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::network::{Forwarder, UpstreamBody};
    use crate::{Result, TapedeckError};
    use async_trait::async_trait;
    use http_body_util::{BodyExt, Full};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NoUpstream;

    #[async_trait]
    impl Forwarder for NoUpstream {
        async fn forward(&self, _request: Request<Full<Bytes>>) -> Result<Response<UpstreamBody>> {
            Err(TapedeckError::Upstream("no upstream in tests".to_string()))
        }
    }

    async fn proxy(temp_dir: &TempDir) -> HttpProxy {
        let mut config = Config::new(Mode::Replay);
        config.recording_dir = temp_dir.path().to_path_buf();
        HttpProxy::with_forwarder(&config, Arc::new(NoUpstream))
            .await
            .unwrap()
    }

    fn request(method: Method, path: &str, body: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn json_body(response: Response<ProxyBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_is_control_path() {
        assert!(is_control_path("/__tapedeck/sequence"));
        assert!(!is_control_path("/__tapedeck"));
        assert!(!is_control_path("/api/__tapedeck/sequence"));
    }

    #[tokio::test]
    async fn test_activate_with_override() {
        let temp_dir = TempDir::new().unwrap();
        let proxy = proxy(&temp_dir).await;

        let response = handle(
            &proxy,
            request(
                Method::POST,
                SEQUENCE_PATH,
                r#"{"name":"checkout","mode":"record"}"#,
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"name": "checkout", "mode": "record"})
        );

        let response = handle(&proxy, request(Method::GET, SEQUENCE_PATH, "")).await;
        assert_eq!(
            json_body(response).await,
            json!({"name": "checkout", "mode": "record"})
        );
    }

    #[tokio::test]
    async fn test_activate_defaults_mode() {
        let temp_dir = TempDir::new().unwrap();
        let proxy = proxy(&temp_dir).await;

        let response = handle(
            &proxy,
            request(Method::POST, SEQUENCE_PATH, r#"{"name":"login"}"#),
        )
        .await;
        assert_eq!(
            json_body(response).await,
            json!({"name": "login", "mode": "replay"})
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let temp_dir = TempDir::new().unwrap();
        let proxy = proxy(&temp_dir).await;

        let response = handle(&proxy, request(Method::POST, SEQUENCE_PATH, "not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle(
            &proxy,
            request(Method::POST, SEQUENCE_PATH, r#"{"name":"../escape"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(proxy.current().await.name, "default");

        let response = handle(&proxy, request(Method::DELETE, SEQUENCE_PATH, "")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = handle(&proxy, request(Method::GET, "/__tapedeck/other", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let proxy = proxy(&temp_dir).await;

        proxy
            .handle(request(Method::GET, "/not-recorded", ""))
            .await;
        let response = handle(&proxy, request(Method::GET, STATS_PATH, "")).await;
        let body = json_body(response).await;

        assert_eq!(body["replay"]["missing"], 1);
        assert_eq!(body["writer"]["written"], 0);
    }
}
