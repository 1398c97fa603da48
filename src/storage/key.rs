//! Request path to storage identifier mapping

use std::fmt;

/// File suffix written by this version
pub const CURRENT_SUFFIX: &str = ".json";

/// File suffix of the previous naming generation (read-only fallback)
pub const LEGACY_SUFFIX: &str = ".recording";

/// Naming generation of a storage file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    /// Preferred generation; the only one ever written
    Current,
    /// Older generation, consulted only when the current file is absent or empty
    Legacy,
}

impl Generation {
    /// File suffix for this generation
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Generation::Current => CURRENT_SUFFIX,
            Generation::Legacy => LEGACY_SUFFIX,
        }
    }
}

/// Sanitized identifier derived from a request path
///
/// The leading slash is dropped, every character outside `[A-Za-z0-9_.-]`
/// becomes `_`, and the result is prefixed with `_`. Distinct paths may
/// collide (`/a/b` and `/a_b`); that is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorageKey(String);

impl StorageKey {
    /// Derive the storage key for a request path
    ///
    /// Anything after `?` is ignored so that a full request target can be
    /// passed as well.
    #[must_use]
    pub fn from_path(path: &str) -> Self {
        let path = path.split_once('?').map_or(path, |(path, _)| path);
        let trimmed = path.strip_prefix('/').unwrap_or(path);

        let mut key = String::with_capacity(trimmed.len() + 1);
        key.push('_');
        key.extend(trimmed.chars().map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        }));

        Self(key)
    }

    /// Rebuild a key from a file name of either generation
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<(Self, Generation)> {
        if let Some(stem) = name.strip_suffix(CURRENT_SUFFIX) {
            return Some((Self(stem.to_string()), Generation::Current));
        }
        name.strip_suffix(LEGACY_SUFFIX)
            .map(|stem| (Self(stem.to_string()), Generation::Legacy))
    }

    /// The bare identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name for the given naming generation
    #[must_use]
    pub fn file_name(&self, generation: Generation) -> String {
        format!("{}{}", self.0, generation.suffix())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
