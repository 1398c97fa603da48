//! HTTP proxy with recording and replay

use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use tracing::{debug, info, warn};

use crate::config::{Config, Mode};
use crate::network::{self, Forwarder, HttpClient, ProxyBody};
use crate::recording::{CapturedRequest, InteractionCodec, RecordingEngine};
use crate::replay::{ReplayEngine, ReplayStats};
use crate::session::{SequenceController, SessionState};
use crate::storage::{RecordStore, WriterStats};
use crate::{Result, TapedeckError};

use super::control;

/// How a proxied request ended
///
/// Every request ends in exactly one of these; the router returns as soon
/// as one is produced.
pub enum Outcome {
    /// Served from storage; the upstream was not contacted
    Replayed(Response<ProxyBody>),
    /// Forwarded upstream and streaming back while being recorded
    Recorded(Response<ProxyBody>),
    /// Request-scoped failure, reported to the client
    Failed(TapedeckError),
}

impl Outcome {
    /// Response to send to the client
    #[must_use]
    pub fn into_response(self) -> Response<ProxyBody> {
        match self {
            Outcome::Replayed(response) | Outcome::Recorded(response) => response,
            Outcome::Failed(error) => network::error_response(&error),
        }
    }
}

/// Routes each request to replay or record according to the active sequence
pub struct HttpProxy {
    controller: SequenceController,
    store: Arc<RecordStore>,
    replay: Arc<ReplayEngine>,
    recording: Arc<RecordingEngine>,
    forwarder: Arc<dyn Forwarder>,
    max_request_size: usize,
}

impl HttpProxy {
    /// Create a proxy forwarding to the configured upstream over HTTP
    ///
    /// # Errors
    ///
    /// Returns error if the initial sequence cannot be activated
    pub async fn from_config(config: &Config) -> Result<Self> {
        let forwarder = Arc::new(HttpClient::new(
            config.endpoint.target_host.clone(),
            config.endpoint.target_port,
        ));
        Self::with_forwarder(config, forwarder).await
    }

    /// Create a proxy with a custom forwarding collaborator
    ///
    /// Activates `config.sequence` in `config.mode` before returning.
    ///
    /// # Errors
    ///
    /// Returns error if the recording directory cannot be created or the
    /// initial sequence cannot be activated
    pub async fn with_forwarder(config: &Config, forwarder: Arc<dyn Forwarder>) -> Result<Self> {
        tokio::fs::create_dir_all(&config.recording_dir).await?;

        let store = Arc::new(RecordStore::new(
            config.recording_dir.clone(),
            config.limits.write_queue_capacity,
        ));
        let replay = Arc::new(ReplayEngine::new(Arc::clone(&store)));
        let codec = InteractionCodec::new(
            &config.recording.redact_headers,
            config.recording.include_plaintext,
        );
        let recording = Arc::new(RecordingEngine::new(
            Arc::clone(&store),
            codec,
            config.limits.max_response_size,
        ));
        let controller = SequenceController::new(
            &config.sequence,
            None,
            config.mode,
            Arc::clone(&store),
            Arc::clone(&replay),
        )
        .await?;

        Ok(Self {
            controller,
            store,
            replay,
            recording,
            forwarder,
            max_request_size: config.limits.max_request_size,
        })
    }

    /// Handle any inbound request, control requests included
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if control::is_control_path(request.uri().path()) {
            return control::handle(self, request).await;
        }

        self.route(request).await.into_response()
    }

    /// Replay or record one request under the active sequence
    pub async fn route<B>(&self, request: Request<B>) -> Outcome
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let state = self.controller.current().await;

        match state.mode {
            Mode::Replay => {
                debug!(
                    "Replay mode: {} {} in '{}'",
                    request.method(),
                    request.uri(),
                    state.name
                );
                let path = request.uri().path().to_string();
                drop(request);
                self.replay(&state, &path).await
            }
            Mode::Record => self.record(&state, request).await,
        }
    }

    async fn replay(&self, state: &SessionState, path: &str) -> Outcome {
        let replayed = match self.replay.next_interaction(&state.name, path).await {
            Ok(replayed) => replayed,
            Err(e) => return Outcome::Failed(e),
        };

        let response = match InteractionCodec::reconstruct_response(
            &replayed.interaction,
            &replayed.location,
            replayed.index,
        ) {
            Ok(response) => response,
            Err(e) => {
                warn!("Cannot replay {} in '{}': {}", path, state.name, e);
                return Outcome::Failed(e);
            }
        };

        let mut builder = Response::builder().status(response.status);
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers;
        }
        match builder.body(network::full(response.body)) {
            Ok(response) => Outcome::Replayed(response),
            Err(e) => Outcome::Failed(TapedeckError::Other(format!(
                "Failed to build replayed response: {e}"
            ))),
        }
    }

    async fn record<B>(&self, state: &SessionState, request: Request<B>) -> Outcome
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = request.into_parts();
        debug!("Record mode: {} {} in '{}'", parts.method, parts.uri, state.name);

        let body = match network::read_body(body, self.max_request_size).await {
            Ok(body) => body,
            Err(e) => return Outcome::Failed(e),
        };

        let captured = CapturedRequest {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            body: body.clone(),
        };

        let upstream = match self
            .forwarder
            .forward(Request::from_parts(parts, Full::new(body)))
            .await
        {
            Ok(response) => response,
            Err(e) => return Outcome::Failed(e),
        };

        let (mut head, upstream_body) = upstream.into_parts();
        let recorded_headers = head.headers.clone();
        network::strip_hop_by_hop(&mut head.headers);

        let body = self.recording.record_stream(
            state.name.clone(),
            state.epoch,
            captured,
            head.status,
            recorded_headers,
            upstream_body,
        );

        Outcome::Recorded(Response::from_parts(head, body.boxed()))
    }

    /// Activate a sequence; see [`SequenceController::activate`]
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or clearing fails
    pub async fn activate(&self, name: &str, override_mode: Option<Mode>) -> Result<SessionState> {
        self.controller.activate(name, override_mode).await
    }

    /// Active sequence and mode
    pub async fn current(&self) -> SessionState {
        self.controller.current().await
    }

    /// Wait until every recorded interaction is on disk
    pub async fn stop(&self) {
        info!("Draining write pipeline");
        self.store.drain().await;
        info!("Write pipeline drained");
    }

    /// Replay statistics
    #[must_use]
    pub fn replay_stats(&self) -> ReplayStats {
        self.replay.stats()
    }

    /// Write pipeline statistics
    #[must_use]
    pub fn writer_stats(&self) -> WriterStats {
        self.store.writer_stats()
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }
}
