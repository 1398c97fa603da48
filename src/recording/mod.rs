//! Recording engine for capturing HTTP traffic

mod codec;
mod engine;

pub use codec::{
    decode_plaintext, CapturedRequest, InteractionCodec, ReplayedResponse, PLAINTEXT_UNAVAILABLE,
    REDACTED,
};
pub use engine::RecordingEngine;
