use crate::core::artifacts::{read_json, write_json_atomic};
use crate::core::error::StorageError;
use crate::core::models::LocationCode;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Location codes that answered "not found". Only grows: there is no way to
/// remove an entry once recorded.
#[derive(Debug, Clone)]
pub struct FailureCache {
    path: PathBuf,
    codes: BTreeSet<LocationCode>,
    dirty: bool,
}

impl FailureCache {
    /// Loads the cache from `path`. A missing or unreadable file yields an
    /// empty cache.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let codes = if path.exists() {
            match read_json::<Vec<String>>(&path) {
                Ok(raw) => raw
                    .iter()
                    .filter_map(|c| LocationCode::parse(c).ok())
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable failed codes file");
                    BTreeSet::new()
                }
            }
        } else {
            BTreeSet::new()
        };

        tracing::info!(count = codes.len(), ?path, "Loaded previously failed codes");

        Self {
            path,
            codes,
            dirty: false,
        }
    }

    pub fn contains(&self, code: &LocationCode) -> bool {
        self.codes.contains(code)
    }

    /// Returns true if the code was not already recorded.
    pub fn insert(&mut self, code: LocationCode) -> bool {
        let added = self.codes.insert(code);
        self.dirty |= added;
        added
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Overwrites the file atomically with the full, sorted set.
    pub fn flush(&mut self) -> Result<(), StorageError> {
        let codes: Vec<&str> = self.codes.iter().map(|c| c.as_str()).collect();
        write_json_atomic(&self.path, &codes)?;
        self.dirty = false;
        tracing::debug!(path = ?self.path, count = codes.len(), "Flushed failed codes");
        Ok(())
    }
}
