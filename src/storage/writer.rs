//! Serialized write pipeline for recording files
//!
//! A single background task owns every write. Jobs are taken from a bounded
//! FIFO queue one at a time, so at most one file write is ever in flight and
//! jobs land on disk in enqueue order. Each job carries the complete list
//! for its file, which makes a stale job harmless: a later job for the same
//! file is processed after it and overwrites it.
//!
//! A full queue is backpressure: [`WritePipeline::enqueue`] waits for the
//! writer, and since the record store holds its lock across the enqueue,
//! other appends wait too. Client responses are already streamed by then,
//! so only the recording tasks stall.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, warn};

use super::format::Interaction;
use crate::{Result, TapedeckError};

/// Full replacement content for one storage file
#[derive(Debug, Clone)]
pub struct WriteJob {
    /// Target file
    pub path: PathBuf,
    /// Complete ordered list to write
    pub interactions: Vec<Interaction>,
}

/// Writer statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Jobs written successfully
    pub written: usize,
    /// Jobs that failed (logged and dropped)
    pub failed: usize,
    /// Jobs enqueued but not yet finished
    pub pending: usize,
    /// Enqueues that found the queue full and had to wait
    pub queue_full: usize,
}

#[derive(Default)]
struct PipelineState {
    /// Enqueued jobs not yet finished, the active one included
    pending: AtomicUsize,
    writing: AtomicBool,
    written: AtomicUsize,
    failed: AtomicUsize,
    queue_full: AtomicUsize,
    idle: Notify,
}

/// Handle to the single-writer pipeline
pub struct WritePipeline {
    tx: mpsc::Sender<WriteJob>,
    state: Arc<PipelineState>,
}

impl WritePipeline {
    /// Start the writer task
    ///
    /// Must be called from within a Tokio runtime. The task exits once every
    /// handle has been dropped and the queue is empty.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0
    #[must_use]
    pub fn spawn(capacity: usize) -> Self {
        assert!(capacity > 0, "write queue capacity must be > 0");

        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(PipelineState::default());
        tokio::spawn(run_writer(rx, Arc::clone(&state)));

        Self { tx, state }
    }

    /// Queue a job behind every job already queued
    ///
    /// Waits only for queue capacity, never for the write itself. A full
    /// queue is logged once per waiting job.
    ///
    /// # Errors
    ///
    /// Returns error if the writer task is gone
    pub async fn enqueue(&self, job: WriteJob) -> Result<()> {
        self.state.pending.fetch_add(1, Ordering::SeqCst);

        let sent = match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                self.state.queue_full.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Write queue full ({} pending); waiting for disk writes before queuing {}",
                    self.state.pending.load(Ordering::SeqCst),
                    job.path.display()
                );
                self.tx.send(job).await.map_err(|_| ())
            }
            Err(TrySendError::Closed(_)) => Err(()),
        };

        if sent.is_err() {
            self.finish_one();
            return Err(TapedeckError::PipelineClosed);
        }

        Ok(())
    }

    /// Wait until the queue is empty and no write is in flight
    pub async fn drain(&self) {
        loop {
            let idle = self.state.idle.notified();
            if self.is_idle() {
                return;
            }
            idle.await;
        }
    }

    /// Queue empty and writer inactive
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state.pending.load(Ordering::SeqCst) == 0 && !self.state.writing.load(Ordering::SeqCst)
    }

    /// Current statistics
    #[must_use]
    pub fn stats(&self) -> WriterStats {
        WriterStats {
            written: self.state.written.load(Ordering::Relaxed),
            failed: self.state.failed.load(Ordering::Relaxed),
            pending: self.state.pending.load(Ordering::SeqCst),
            queue_full: self.state.queue_full.load(Ordering::Relaxed),
        }
    }

    fn finish_one(&self) {
        finish_one(&self.state);
    }
}

fn finish_one(state: &PipelineState) {
    if state.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        state.idle.notify_waiters();
    }
}

async fn run_writer(mut rx: mpsc::Receiver<WriteJob>, state: Arc<PipelineState>) {
    while let Some(job) = rx.recv().await {
        state.writing.store(true, Ordering::SeqCst);

        match write_job(&job).await {
            Ok(()) => {
                state.written.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Wrote {} interaction(s) to {}",
                    job.interactions.len(),
                    job.path.display()
                );
            }
            Err(e) => {
                state.failed.fetch_add(1, Ordering::Relaxed);
                error!("Failed to persist {}: {}", job.path.display(), e);
            }
        }

        state.writing.store(false, Ordering::SeqCst);
        finish_one(&state);
    }

    debug!("Write pipeline stopped");
}

/// Overwrite the job's file with its full list
///
/// Content goes to a sibling temp file first and is renamed into place, so a
/// concurrent reader sees either the old or the new list, never a partial one.
async fn write_job(job: &WriteJob) -> Result<()> {
    if let Some(parent) = job.path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let data = serde_json::to_vec_pretty(&job.interactions)?;
    let temp_path = temp_path(&job.path);
    tokio::fs::write(&temp_path, &data).await?;
    tokio::fs::rename(&temp_path, &job.path).await?;

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(ToOwned::to_owned).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
