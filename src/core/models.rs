use crate::core::error::CodeError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]+)(\d+)$").expect("static regex"))
}

/// External code identifying one pollable location, e.g. `W000123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationCode(String);

impl LocationCode {
    pub fn parse(raw: &str) -> Result<Self, CodeError> {
        let upper = raw.trim().to_uppercase();
        if code_pattern().is_match(&upper) {
            Ok(Self(upper))
        } else {
            Err(CodeError::InvalidFormat(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits the code into its letter prefix, numeric value and digit width.
    pub fn parts(&self) -> (&str, u64, usize) {
        let split = self
            .0
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(self.0.len());
        let (prefix, digits) = self.0.split_at(split);
        (prefix, digits.parse().unwrap_or(0), digits.len())
    }
}

impl fmt::Display for LocationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates every code between `start` and `end` inclusive, padded to the
/// digit width of `start`.
pub fn code_range(start: &str, end: &str) -> Result<Vec<LocationCode>, CodeError> {
    let start = LocationCode::parse(start)?;
    let end = LocationCode::parse(end)?;

    let (start_prefix, start_num, width) = start.parts();
    let (end_prefix, end_num, _) = end.parts();

    if start_prefix != end_prefix {
        return Err(CodeError::PrefixMismatch {
            start: start_prefix.to_string(),
            end: end_prefix.to_string(),
        });
    }

    if start_num > end_num {
        return Err(CodeError::ReversedRange {
            start: start_num,
            end: end_num,
        });
    }

    Ok((start_num..=end_num)
        .map(|n| LocationCode(format!("{start_prefix}{n:0width$}")))
        .collect())
}

/// Keeps the valid codes, warning about the rest. Duplicates are dropped,
/// first occurrence wins.
pub fn validate_codes<S: AsRef<str>>(raw: &[S]) -> Vec<LocationCode> {
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    for item in raw {
        match LocationCode::parse(item.as_ref()) {
            Ok(code) => {
                if seen.insert(code.clone()) {
                    codes.push(code);
                }
            }
            Err(e) => tracing::warn!(code = item.as_ref(), error = %e, "Skipping invalid location code"),
        }
    }

    codes
}

/// Parses a codes file: one code per line, `#` comments and blank lines
/// ignored, invalid lines skipped with a warning.
pub fn parse_codes_file(content: &str) -> Vec<LocationCode> {
    let mut seen = HashSet::new();
    let mut codes = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match LocationCode::parse(line) {
            Ok(code) => {
                if seen.insert(code.clone()) {
                    codes.push(code);
                }
            }
            Err(e) => {
                tracing::warn!(line = idx + 1, value = line, error = %e, "Invalid location code")
            }
        }
    }

    codes
}

/// A location code mapped to its internal identifier (the ULN).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedLocation {
    pub code: LocationCode,
    pub uln: String,
}

/// Insertion-ordered map of resolved locations. Entries are never replaced.
#[derive(Debug, Clone, Default)]
pub struct ResolvedLocations {
    entries: Vec<ResolvedLocation>,
    index: HashSet<LocationCode>,
}

impl ResolvedLocations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the code was already resolved; the first mapping
    /// is kept.
    pub fn insert(&mut self, code: LocationCode, uln: String) -> bool {
        if !self.index.insert(code.clone()) {
            return false;
        }
        self.entries.push(ResolvedLocation { code, uln });
        true
    }

    pub fn extend(&mut self, other: ResolvedLocations) {
        for entry in other.entries {
            self.insert(entry.code, entry.uln);
        }
    }

    pub fn contains(&self, code: &LocationCode) -> bool {
        self.index.contains(code)
    }

    #[cfg(test)]
    pub fn get(&self, code: &LocationCode) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| &e.code == code)
            .map(|e| e.uln.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &ResolvedLocation> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[ResolvedLocation] {
        &self.entries
    }
}

/// Pulls the ULN out of a location payload (`location.uln`), trimmed. The
/// ULN ends up in artifact file names, so anything but ASCII letters and
/// digits is rejected.
pub fn extract_uln(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("location")?
        .get("uln")?
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string)
}
