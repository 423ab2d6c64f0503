use crate::core::error::StorageError;
use crate::core::models::{extract_uln, LocationCode, ResolvedLocations};
use chrono::{DateTime, Timelike, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const FAILED_CODES_FILE: &str = "failed_codes.json";
pub const PARSED_CSV_FILE: &str = "parsed.csv";

/// Formats a request time the way status artifact names carry it:
/// `2024-05-01T12:30:45.1234Z` (four fractional digits, UTC).
pub fn format_request_time(at: DateTime<Utc>) -> String {
    let ten_thousandths = at.nanosecond() % 1_000_000_000 / 100_000;
    format!("{}.{:04}Z", at.format("%Y-%m-%dT%H:%M:%S"), ten_thousandths)
}

/// Serializes `value` next to `path` and renames it into place, so readers
/// never see a partial file at the canonical path.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let content = serde_json::to_string_pretty(value).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, content).map_err(write_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(write_err(e));
    }

    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let content = std::fs::read_to_string(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&content).map_err(|source| StorageError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// On-disk layout of the raw JSON payloads:
///
/// ```text
/// {data_dir}/failed_codes.json
/// {data_dir}/{CODE}/{CODE}.json                  location payload, permanent
/// {data_dir}/{CODE}/{ULN}-{request_time}.json    status payload, consumed by the parser
/// {data_dir}/{CODE}/parsed.csv
/// ```
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    data_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn location_dir(&self, code: &LocationCode) -> PathBuf {
        self.data_dir.join(code.as_str())
    }

    pub fn location_path(&self, code: &LocationCode) -> PathBuf {
        self.location_dir(code).join(format!("{code}.json"))
    }

    pub fn status_path(&self, code: &LocationCode, uln: &str, request_time: &str) -> PathBuf {
        self.location_dir(code)
            .join(format!("{uln}-{request_time}.json"))
    }

    pub fn failed_codes_path(&self) -> PathBuf {
        self.data_dir.join(FAILED_CODES_FILE)
    }

    pub fn parsed_csv_path(&self, code: &LocationCode) -> PathBuf {
        self.location_dir(code).join(PARSED_CSV_FILE)
    }

    pub fn has_location(&self, code: &LocationCode) -> bool {
        self.location_path(code).exists()
    }

    pub fn save_location(
        &self,
        code: &LocationCode,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StorageError> {
        let path = self.location_path(code);
        write_json_atomic(&path, payload)?;
        tracing::debug!(?path, "Saved location payload");
        Ok(path)
    }

    pub fn load_location(&self, code: &LocationCode) -> Result<serde_json::Value, StorageError> {
        read_json(&self.location_path(code))
    }

    pub fn save_status(
        &self,
        code: &LocationCode,
        uln: &str,
        request_time: &str,
        payload: &serde_json::Value,
    ) -> Result<PathBuf, StorageError> {
        let path = self.status_path(code, uln, request_time);
        write_json_atomic(&path, payload)?;
        tracing::debug!(?path, "Saved status payload");
        Ok(path)
    }

    /// Status artifacts currently on disk for `uln`, sorted by file name
    /// (and therefore by request time).
    pub fn status_files(&self, code: &LocationCode, uln: &str) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.location_dir(code);
        let entries = std::fs::read_dir(&dir).map_err(|source| StorageError::Read {
            path: dir.clone(),
            source,
        })?;

        let prefix = format!("{uln}-");
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".json"))
            })
            .collect();

        files.sort();
        Ok(files)
    }

    /// Rebuilds the resolved map from location payloads already on disk.
    /// Unreadable payloads or payloads without a ULN are ignored.
    pub fn existing_locations(&self, codes: &[LocationCode]) -> ResolvedLocations {
        let mut resolved = ResolvedLocations::new();

        for code in codes {
            if !self.has_location(code) {
                continue;
            }

            match self.load_location(code) {
                Ok(payload) => match extract_uln(&payload) {
                    Some(uln) => {
                        resolved.insert(code.clone(), uln);
                    }
                    None => tracing::warn!(%code, "Cached location payload has no ULN"),
                },
                Err(e) => tracing::warn!(%code, error = %e, "Failed to read cached location payload"),
            }
        }

        resolved
    }
}
