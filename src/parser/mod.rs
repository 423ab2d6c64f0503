mod records;

use crate::core::artifacts::{read_json, ArtifactStore};
use crate::core::models::LocationCode;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::Path;

use records::{extract_request_time, records_from_status, sort_records, LocationInfo, MachineRecord};

pub use records::MachineStatus;

/// What a single parse-and-cleanup pass did for one location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseReport {
    pub status_files: usize,
    pub rows: usize,
    pub removed: usize,
    pub statuses: BTreeMap<MachineStatus, usize>,
}

/// Consumes accumulated status payloads for one location. Implementations
/// must only touch that location's directory and must be a no-op when no
/// status payloads are waiting.
pub trait StatusParser: Send + Sync {
    fn parse_and_cleanup(&self, code: &LocationCode, store: &ArtifactStore) -> Result<ParseReport>;
}

/// Appends rows to `{CODE}/parsed.csv` and deletes the status payloads they
/// came from. The location payload is never deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvStatusParser;

impl CsvStatusParser {
    pub fn new() -> Self {
        Self
    }

    fn append_csv(path: &Path, records: &[MachineRecord]) -> Result<()> {
        let write_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);

        for record in records {
            writer.serialize(record)?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }
}

impl StatusParser for CsvStatusParser {
    fn parse_and_cleanup(&self, code: &LocationCode, store: &ArtifactStore) -> Result<ParseReport> {
        let location_payload = store
            .load_location(code)
            .with_context(|| format!("Failed to load location data for {code}"))?;
        let location = LocationInfo::from_payload(&location_payload)
            .map_err(|e| anyhow::anyhow!("Invalid location data for {code}: {e}"))?;

        let files = store.status_files(code, &location.uln)?;
        let mut report = ParseReport {
            status_files: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            return Ok(report);
        }

        let mut records = Vec::new();
        let mut consumed = Vec::with_capacity(files.len());

        for path in files {
            let Some(request_time) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(extract_request_time)
                .map(str::to_string)
            else {
                tracing::warn!(?path, "Could not extract request time from file name");
                continue;
            };

            match read_json::<Value>(&path) {
                Ok(status) => {
                    records.extend(records_from_status(&location, &status, &request_time));
                    consumed.push(path);
                }
                Err(e) => tracing::warn!(%code, error = %e, "Skipping unreadable status payload"),
            }
        }

        if !records.is_empty() {
            sort_records(&mut records);
            let csv_path = store.parsed_csv_path(code);
            Self::append_csv(&csv_path, &records)?;
            tracing::info!(%code, rows = records.len(), path = ?csv_path, "Parsed status records");
        } else {
            tracing::warn!(%code, "No records found in status payloads");
        }

        for record in &records {
            *report.statuses.entry(record.status).or_default() += 1;
        }
        report.rows = records.len();

        for path in consumed {
            match std::fs::remove_file(&path) {
                Ok(()) => report.removed += 1,
                Err(e) => tracing::warn!(?path, error = %e, "Failed to remove status payload"),
            }
        }

        if report.removed > 0 {
            tracing::debug!(%code, removed = report.removed, "Cleaned up status payloads");
        }

        Ok(report)
    }
}
