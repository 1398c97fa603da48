//! Recording engine: tee an upstream response to the client and to storage

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::{HeaderMap, StatusCode};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::network::{ChannelBody, UpstreamBody};
use crate::storage::{RecordStore, StorageKey};

use super::codec::{CapturedRequest, InteractionCodec};

/// Chunks buffered between the upstream reader and the client
const STREAM_BUFFER_CHUNKS: usize = 16;

/// Streams recorded exchanges to clients and persists them once complete
pub struct RecordingEngine {
    store: Arc<RecordStore>,
    codec: InteractionCodec,
    max_response_size: usize,
}

impl RecordingEngine {
    /// Create a new recording engine
    #[must_use]
    pub fn new(store: Arc<RecordStore>, codec: InteractionCodec, max_response_size: usize) -> Self {
        Self {
            store,
            codec,
            max_response_size,
        }
    }

    /// Codec used to build interactions
    #[must_use]
    pub fn codec(&self) -> &InteractionCodec {
        &self.codec
    }

    /// Start streaming an upstream body to the client
    ///
    /// Each chunk is passed on as soon as it arrives and kept for storage.
    /// The interaction is appended to the store only after the upstream body
    /// ended and every chunk reached the client's body; an upstream error or
    /// a client that goes away leaves nothing recorded. The append happens
    /// before the client body ends, so a client that has read the whole
    /// response can rely on the interaction being queued for persistence.
    /// `epoch` is the sequence's store epoch when the request arrived; if the
    /// sequence is cleared before the body ends, the interaction is dropped.
    pub fn record_stream(
        self: &Arc<Self>,
        sequence: String,
        epoch: u64,
        request: CapturedRequest,
        status: StatusCode,
        headers: HeaderMap,
        mut upstream: UpstreamBody,
    ) -> ChannelBody {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER_CHUNKS);
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let mut recorded = Some(BytesMut::new());

            while let Some(frame) = upstream.frame().await {
                let data = match frame {
                    Ok(frame) => match frame.into_data() {
                        Ok(data) => data,
                        Err(_) => continue, // trailers
                    },
                    Err(e) => {
                        warn!("Upstream body failed for {}: {}", request.uri, e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                if let Some(buffer) = recorded.as_mut() {
                    if buffer.len() + data.len() > engine.max_response_size {
                        warn!(
                            "Response for {} exceeds {} bytes; streaming without recording",
                            request.uri, engine.max_response_size
                        );
                        recorded = None;
                    } else {
                        buffer.extend_from_slice(&data);
                    }
                }

                if tx.send(Ok(data)).await.is_err() {
                    debug!("Client went away during {}; not recording", request.uri);
                    return;
                }
            }

            if let Some(body) = recorded {
                engine
                    .persist(&sequence, epoch, &request, status, &headers, body.freeze())
                    .await;
            }
        });

        ChannelBody::new(rx)
    }

    /// Build the interaction and append it to the store
    ///
    /// Persistence failures are logged; the client response is unaffected.
    pub async fn persist(
        &self,
        sequence: &str,
        epoch: u64,
        request: &CapturedRequest,
        status: StatusCode,
        headers: &HeaderMap,
        body: Bytes,
    ) {
        let key = StorageKey::from_path(request.uri.path());
        let interaction = self
            .codec
            .build_from_exchange(request, status, headers, &body);

        match self
            .store
            .append_in_epoch(sequence, epoch, &key, interaction)
            .await
        {
            Ok(true) => debug!(
                "Recorded {} {} -> {} ({} in '{}')",
                request.method, request.uri, status, key, sequence
            ),
            Ok(false) => {}
            Err(e) => error!(
                "Failed to record {} {} in '{}': {}",
                request.method, request.uri, sequence, e
            ),
        }
    }
}
