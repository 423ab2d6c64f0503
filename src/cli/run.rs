use crate::core::artifacts::ArtifactStore;
use crate::core::error::CodeError;
use crate::core::models::{code_range, parse_codes_file, validate_codes, LocationCode};
use crate::core::settings::Settings;
use crate::daemon::{Pipeline, Schedule};
use crate::parser::CsvStatusParser;
use crate::providers::WashApiClient;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the location codes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeSource {
    Range { start: String, end: String },
    File(PathBuf),
    List(Vec<String>),
}

impl CodeSource {
    pub fn load(&self) -> Result<Vec<LocationCode>> {
        let codes = match self {
            CodeSource::Range { start, end } => code_range(start, end)?,
            CodeSource::File(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read codes file: {}", path.display()))?;
                parse_codes_file(&content)
            }
            CodeSource::List(raw) => validate_codes(raw.as_slice()),
        };

        if codes.is_empty() {
            return Err(CodeError::Empty.into());
        }
        Ok(codes)
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub interval_minutes: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(self, settings: &mut Settings) {
        if let Some(interval) = self.interval_minutes {
            settings.schedule.interval_minutes = interval;
        }
        if let Some(max) = self.max_concurrent {
            settings.schedule.max_concurrent = max;
        }
        if let Some(dir) = self.data_dir {
            settings.paths.data_dir = dir;
        }
        if let Some(dir) = self.log_dir {
            settings.paths.log_dir = dir;
        }
    }
}

pub fn load_settings(config: Option<&Path>, overrides: Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config)?;
    overrides.apply(&mut settings);
    settings.validate()?;
    Ok(settings)
}

pub async fn run(codes: Vec<LocationCode>, settings: Settings) -> Result<()> {
    let data_dir = &settings.paths.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

    let schedule = Schedule::from_settings(&settings);
    tracing::info!(
        codes = codes.len(),
        interval_minutes = settings.schedule.interval_minutes,
        max_concurrent = settings.schedule.max_concurrent,
        data_dir = %data_dir.display(),
        "Starting washwatch"
    );

    let api = Arc::new(WashApiClient::new(&settings.http)?);
    let pipeline = Pipeline::new(
        api,
        ArtifactStore::new(data_dir),
        Arc::new(CsvStatusParser::new()),
        schedule,
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received interrupt, stopping after the current batch");
                on_signal.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for interrupt"),
        }
    });

    match pipeline.run(&codes, &cancel).await? {
        Some(summary) => tracing::info!(
            cycles = summary.cycles,
            successes = summary.successes,
            failures = summary.failures,
            overruns = summary.overruns,
            "Stopped"
        ),
        None => tracing::info!("Stopped without polling"),
    }

    Ok(())
}
