//! Replay engine for serving recorded interactions in order

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::storage::{Generation, Interaction, RecordStore, StorageKey};
use crate::{Result, TapedeckError};

use super::cursor::ReplayCursors;

/// An interaction chosen for replay
#[derive(Debug, Clone)]
pub struct ReplayedInteraction {
    /// The stored exchange
    pub interaction: Interaction,
    /// Its position in the storage file
    pub index: usize,
    /// Storage file name it came from
    pub location: String,
    /// Naming generation that satisfied the lookup
    pub generation: Generation,
}

/// Serves stored interactions per location, first recorded first
pub struct ReplayEngine {
    store: Arc<RecordStore>,
    cursors: ReplayCursors,
    served: AtomicUsize,
    missing: AtomicUsize,
    exhausted: AtomicUsize,
}

impl ReplayEngine {
    /// Create a new replay engine
    #[must_use]
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            cursors: ReplayCursors::new(),
            served: AtomicUsize::new(0),
            missing: AtomicUsize::new(0),
            exhausted: AtomicUsize::new(0),
        }
    }

    /// Pick the next interaction for `path` in `sequence`
    ///
    /// Storage is read from disk on every call.
    ///
    /// # Errors
    ///
    /// Returns [`TapedeckError::NoRecording`] if nothing is stored for the
    /// path and [`TapedeckError::Exhausted`] once every stored interaction
    /// has been served
    pub async fn next_interaction(&self, sequence: &str, path: &str) -> Result<ReplayedInteraction> {
        let key = StorageKey::from_path(path);
        let resolution = self.store.load(sequence, &key).await;

        let Some(generation) = resolution.generation() else {
            self.missing.fetch_add(1, Ordering::Relaxed);
            warn!("No recording for {} in sequence '{}'", path, sequence);
            return Err(TapedeckError::NoRecording {
                sequence: sequence.to_string(),
                path: path.to_string(),
            });
        };
        let mut interactions = resolution.into_interactions().unwrap_or_default();

        let Some(index) = self.cursors.claim(sequence, &key, interactions.len()) else {
            self.exhausted.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Sequence '{}' exhausted for {} ({} recorded)",
                sequence,
                path,
                interactions.len()
            );
            return Err(TapedeckError::Exhausted {
                sequence: sequence.to_string(),
                path: path.to_string(),
                recorded: interactions.len(),
            });
        };

        self.served.fetch_add(1, Ordering::Relaxed);
        let location = key.file_name(generation);
        debug!(
            "Replaying {} #{} from {} in '{}'",
            path, index, location, sequence
        );

        Ok(ReplayedInteraction {
            interaction: interactions.swap_remove(index),
            index,
            location,
            generation,
        })
    }

    /// Forget every cursor of a sequence
    pub fn reset(&self, sequence: &str) {
        self.cursors.reset(sequence);
    }

    /// Current cursor for a path
    #[must_use]
    pub fn cursor(&self, sequence: &str, path: &str) -> usize {
        self.cursors.get(sequence, &StorageKey::from_path(path))
    }

    /// Replay statistics
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            served: self.served.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Replay statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Interactions served
    pub served: usize,
    /// Requests with no recording
    pub missing: usize,
    /// Requests past the end of their recording
    pub exhausted: usize,
}
