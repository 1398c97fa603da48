//! Replay engine for serving recorded HTTP traffic

mod cursor;
mod engine;

pub use cursor::ReplayCursors;
pub use engine::{ReplayEngine, ReplayStats, ReplayedInteraction};
