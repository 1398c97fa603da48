//! Recording file reader

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::format::Interaction;
use super::key::{Generation, StorageKey};
use crate::Result;

/// Outcome of looking up the recordings for one location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Found in the current-generation file
    Current(Vec<Interaction>),
    /// Current file absent or empty; found in the legacy file
    Legacy(Vec<Interaction>),
    /// Neither file yielded any interaction
    NotFound,
}

impl Resolution {
    /// Which generation satisfied the lookup
    #[must_use]
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Resolution::Current(_) => Some(Generation::Current),
            Resolution::Legacy(_) => Some(Generation::Legacy),
            Resolution::NotFound => None,
        }
    }

    /// Take the interactions, if any
    #[must_use]
    pub fn into_interactions(self) -> Option<Vec<Interaction>> {
        match self {
            Resolution::Current(list) | Resolution::Legacy(list) => Some(list),
            Resolution::NotFound => None,
        }
    }
}

/// Resolve the interactions stored for `key` inside `sequence_dir`
///
/// Tries the current-generation file first and falls back to the legacy
/// file when the current one is missing or holds no interactions.
pub async fn resolve(sequence_dir: &Path, key: &StorageKey) -> Resolution {
    let current = sequence_dir.join(key.file_name(Generation::Current));
    let interactions = read_interactions(&current).await;
    if !interactions.is_empty() {
        return Resolution::Current(interactions);
    }

    let legacy = sequence_dir.join(key.file_name(Generation::Legacy));
    let interactions = read_interactions(&legacy).await;
    if !interactions.is_empty() {
        debug!("Using legacy recording {}", legacy.display());
        return Resolution::Legacy(interactions);
    }

    Resolution::NotFound
}

/// Read one storage file, failing open
///
/// A missing file, an unreadable file and a file that is not a JSON array of
/// interactions all come back as an empty list. Only the last two are logged.
pub async fn read_interactions(path: &Path) -> Vec<Interaction> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!("Failed to read recording {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    match serde_json::from_slice(&data) {
        Ok(interactions) => interactions,
        Err(e) => {
            warn!("Ignoring unparseable recording {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Summary of one sequence directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInventory {
    /// Sequence (directory) name
    pub name: String,
    /// Storage files in the sequence, sorted by file name
    pub files: Vec<FileInventory>,
}

/// Summary of one storage file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInventory {
    /// Location on disk
    pub path: PathBuf,
    /// Storage key the file belongs to
    pub key: StorageKey,
    /// Naming generation of the file
    pub generation: Generation,
    /// Number of readable interactions
    pub interactions: usize,
}

/// List every sequence under `base` and the interactions it holds
///
/// # Errors
///
/// Returns error if `base` or one of its sequence directories cannot be listed
pub async fn inventory(base: &Path) -> Result<Vec<SequenceInventory>> {
    let mut sequences = Vec::new();
    let mut entries = tokio::fs::read_dir(base).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        let mut files = Vec::new();
        let mut sequence_entries = tokio::fs::read_dir(entry.path()).await?;
        while let Some(file) = sequence_entries.next_entry().await? {
            let file_name = file.file_name().to_string_lossy().into_owned();
            let Some((key, generation)) = StorageKey::from_file_name(&file_name) else {
                continue;
            };
            let path = file.path();
            let interactions = read_interactions(&path).await.len();
            files.push(FileInventory {
                path,
                key,
                generation,
                interactions,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        sequences.push(SequenceInventory { name, files });
    }

    sequences.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sequences)
}
