//! Record store: in-memory interaction lists backed by the write pipeline

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::format::Interaction;
use super::key::{Generation, StorageKey};
use super::reader::{self, Resolution};
use super::writer::{WriteJob, WritePipeline, WriterStats};
use crate::Result;

/// Sequence name to storage key to interactions, in recorded order
type SequenceMap = HashMap<String, HashMap<StorageKey, Vec<Interaction>>>;

#[derive(Default)]
struct Memory {
    sequences: SequenceMap,
    /// Bumped by every clear; absent means zero
    epochs: HashMap<String, u64>,
}

impl Memory {
    fn epoch(&self, sequence: &str) -> u64 {
        self.epochs.get(sequence).copied().unwrap_or(0)
    }
}

/// Authoritative store of recorded interactions
///
/// Appends go to memory first and are persisted asynchronously; lookups for
/// replay always go to disk because fixtures may have been placed there by
/// hand before the run.
pub struct RecordStore {
    base: PathBuf,
    memory: Mutex<Memory>,
    writer: WritePipeline,
}

impl RecordStore {
    /// Create a store rooted at `base`
    ///
    /// Must be called from within a Tokio runtime (starts the writer task).
    #[must_use]
    pub fn new(base: PathBuf, write_queue_capacity: usize) -> Self {
        Self {
            base,
            memory: Mutex::new(Memory::default()),
            writer: WritePipeline::spawn(write_queue_capacity),
        }
    }

    /// Root directory of all sequences
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding one sequence
    #[must_use]
    pub fn sequence_dir(&self, sequence: &str) -> PathBuf {
        self.base.join(sequence)
    }

    /// File written for a location in a sequence
    #[must_use]
    pub fn location_path(&self, sequence: &str, key: &StorageKey) -> PathBuf {
        self.sequence_dir(sequence)
            .join(key.file_name(Generation::Current))
    }

    /// Append an interaction and queue a write of the updated list
    ///
    /// Exactly one write job is queued per call. The memory lock is held
    /// until the job is queued so that jobs for one file are queued in the
    /// same order their snapshots were taken. When the write queue is full
    /// the caller waits for the writer, and so does every other append.
    ///
    /// # Errors
    ///
    /// Returns error if the write pipeline has shut down
    pub async fn append(
        &self,
        sequence: &str,
        key: &StorageKey,
        interaction: Interaction,
    ) -> Result<()> {
        let mut memory = self.memory.lock().await;
        self.push_and_enqueue(&mut memory, sequence, key, interaction)
            .await
    }

    /// Append only if the sequence has not been cleared since `epoch`
    ///
    /// `epoch` is the value [`epoch`](Self::epoch) returned when the
    /// recording started. Returns `false` and stores nothing when a clear
    /// happened in between.
    ///
    /// # Errors
    ///
    /// Returns error if the write pipeline has shut down
    pub async fn append_in_epoch(
        &self,
        sequence: &str,
        epoch: u64,
        key: &StorageKey,
        interaction: Interaction,
    ) -> Result<bool> {
        let mut memory = self.memory.lock().await;

        let current = memory.epoch(sequence);
        if current != epoch {
            info!(
                "Dropping interaction for {} in '{}': sequence was cleared (epoch {} != {})",
                key, sequence, epoch, current
            );
            return Ok(false);
        }

        self.push_and_enqueue(&mut memory, sequence, key, interaction)
            .await?;
        Ok(true)
    }

    async fn push_and_enqueue(
        &self,
        memory: &mut Memory,
        sequence: &str,
        key: &StorageKey,
        interaction: Interaction,
    ) -> Result<()> {
        let list = memory
            .sequences
            .entry(sequence.to_string())
            .or_default()
            .entry(key.clone())
            .or_default();
        list.push(interaction);

        let job = WriteJob {
            path: self.location_path(sequence, key),
            interactions: list.clone(),
        };
        debug!(
            "Queued write of {} interaction(s) for {} in '{}'",
            job.interactions.len(),
            key,
            sequence
        );

        self.writer.enqueue(job).await
    }

    /// Number of times a sequence has been cleared
    pub async fn epoch(&self, sequence: &str) -> u64 {
        self.memory.lock().await.epoch(sequence)
    }

    /// Resolve the stored interactions for a location from disk
    pub async fn load(&self, sequence: &str, key: &StorageKey) -> Resolution {
        reader::resolve(&self.sequence_dir(sequence), key).await
    }

    /// Number of interactions appended in memory for a location
    pub async fn recorded_count(&self, sequence: &str, key: &StorageKey) -> usize {
        self.memory
            .lock()
            .await
            .sequences
            .get(sequence)
            .and_then(|locations| locations.get(key))
            .map_or(0, Vec::len)
    }

    /// Drop every interaction of a sequence, in memory and on disk
    ///
    /// Writes already queued are flushed first so none of them can recreate
    /// a file after the directory is gone. The sequence's epoch is bumped so
    /// recordings started before the clear are discarded when they finish.
    /// A missing directory is success.
    ///
    /// # Errors
    ///
    /// Returns error if the directory exists but cannot be removed
    pub async fn clear(&self, sequence: &str) -> Result<()> {
        let mut memory = self.memory.lock().await;
        memory.sequences.remove(sequence);
        *memory.epochs.entry(sequence.to_string()).or_insert(0) += 1;

        self.writer.drain().await;

        let dir = self.sequence_dir(sequence);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!("Cleared sequence '{}' ({})", sequence, dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Sequence '{}' had nothing on disk", sequence);
            }
            Err(e) => return Err(e.into()),
        }

        drop(memory);
        Ok(())
    }

    /// Wait for every queued write to reach disk
    pub async fn drain(&self) {
        self.writer.drain().await;
    }

    /// Whether the write pipeline has nothing queued or in flight
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.writer.is_idle()
    }

    /// Write pipeline statistics
    #[must_use]
    pub fn writer_stats(&self) -> WriterStats {
        self.writer.stats()
    }
}
