//! Per-location replay cursors

use dashmap::DashMap;

use crate::storage::StorageKey;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CursorKey {
    sequence: String,
    key: StorageKey,
}

/// How many interactions have been served per `(sequence, location)`
///
/// Cursors start at 0, only ever move forward by one, and go back to 0
/// only when their sequence is reset.
#[derive(Default)]
pub struct ReplayCursors {
    cursors: DashMap<CursorKey, usize>,
}

impl ReplayCursors {
    /// Create an empty cursor set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current cursor value
    #[must_use]
    pub fn get(&self, sequence: &str, key: &StorageKey) -> usize {
        self.cursors
            .get(&CursorKey {
                sequence: sequence.to_string(),
                key: key.clone(),
            })
            .map_or(0, |cursor| *cursor)
    }

    /// Claim the next index below `available`, advancing the cursor
    ///
    /// The check and the increment happen under the entry's lock, so two
    /// concurrent claims can never return the same index. Returns `None`
    /// once the cursor has reached `available`.
    pub fn claim(&self, sequence: &str, key: &StorageKey, available: usize) -> Option<usize> {
        let mut cursor = self
            .cursors
            .entry(CursorKey {
                sequence: sequence.to_string(),
                key: key.clone(),
            })
            .or_insert(0);

        if *cursor >= available {
            return None;
        }

        let index = *cursor;
        *cursor += 1;
        Some(index)
    }

    /// Drop every cursor of a sequence
    pub fn reset(&self, sequence: &str) {
        self.cursors.retain(|cursor, _| cursor.sequence != sequence);
    }
}
