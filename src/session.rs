//! Active sequence and its effective mode

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::Mode;
use crate::replay::ReplayEngine;
use crate::storage::RecordStore;
use crate::{Result, TapedeckError};

/// What the router consults on every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Active sequence name
    pub name: String,
    /// Mode resolved when the sequence was activated
    pub mode: Mode,
    /// Store epoch of the sequence at activation; recordings carry it
    #[serde(skip)]
    pub epoch: u64,
}

/// Owns the session state; every change goes through [`activate`]
///
/// [`activate`]: SequenceController::activate
pub struct SequenceController {
    default_mode: Mode,
    state: RwLock<SessionState>,
    store: Arc<RecordStore>,
    replay: Arc<ReplayEngine>,
}

impl SequenceController {
    /// Create the controller and activate the initial sequence
    ///
    /// The initial activation has the same side effects as any other,
    /// including clearing the sequence when the effective mode is record.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or clearing fails
    pub async fn new(
        initial: &str,
        override_mode: Option<Mode>,
        default_mode: Mode,
        store: Arc<RecordStore>,
        replay: Arc<ReplayEngine>,
    ) -> Result<Self> {
        validate_sequence_name(initial)?;

        let controller = Self {
            default_mode,
            state: RwLock::new(SessionState {
                name: initial.to_string(),
                mode: override_mode.unwrap_or(default_mode),
                epoch: 0,
            }),
            store,
            replay,
        };
        controller.activate(initial, override_mode).await?;

        Ok(controller)
    }

    /// Make `name` the active sequence
    ///
    /// The effective mode is `override_mode`, or the process default when
    /// absent. In record mode every stored interaction of the sequence is
    /// deleted before this returns; in replay mode queued writes are flushed
    /// so earlier recordings are visible. Requests wait for activation to
    /// finish before reading the new state.
    ///
    /// # Errors
    ///
    /// Returns error if the name is invalid or clearing fails; the previous
    /// state is kept in that case
    pub async fn activate(&self, name: &str, override_mode: Option<Mode>) -> Result<SessionState> {
        validate_sequence_name(name)?;
        let mode = override_mode.unwrap_or(self.default_mode);

        let mut state = self.state.write().await;

        match mode {
            Mode::Record => self.store.clear(name).await?,
            Mode::Replay => self.store.drain().await,
        }
        self.replay.reset(name);

        *state = SessionState {
            name: name.to_string(),
            mode,
            epoch: self.store.epoch(name).await,
        };
        info!("Activated sequence '{}' in {} mode", name, mode);

        Ok(state.clone())
    }

    /// Snapshot of the active sequence and mode
    pub async fn current(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Process-wide default mode
    #[must_use]
    pub fn default_mode(&self) -> Mode {
        self.default_mode
    }
}

/// Validate a sequence name
///
/// Sequence names are used as directory names under the recording dir.
///
/// # Errors
///
/// Returns error if the name is empty, too long, or could escape the
/// recording directory
pub fn validate_sequence_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TapedeckError::InvalidSequenceName(
            "Sequence name cannot be empty".to_string(),
        ));
    }

    if name.len() > 255 {
        return Err(TapedeckError::InvalidSequenceName(format!(
            "Sequence name too long: {} > 255",
            name.len()
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(TapedeckError::InvalidSequenceName(
            "Sequence name cannot contain path separators".to_string(),
        ));
    }

    if name.starts_with('.') {
        return Err(TapedeckError::InvalidSequenceName(
            "Sequence name cannot start with dot".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TapedeckError::InvalidSequenceName(
            "Sequence name cannot contain null bytes".to_string(),
        ));
    }

    if name.contains("..") {
        return Err(TapedeckError::InvalidSequenceName(
            "Sequence name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}
