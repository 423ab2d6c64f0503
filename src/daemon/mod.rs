pub mod executor;
pub mod polling;
pub mod resolution;

use crate::core::artifacts::ArtifactStore;
use crate::core::clock::CycleClock;
use crate::core::error::PhaseError;
use crate::core::failures::FailureCache;
use crate::core::models::LocationCode;
use crate::core::planner::{self, BatchPlan};
use crate::core::settings::Settings;
use crate::parser::StatusParser;
use crate::providers::LocationApi;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use polling::{PollingPhase, PollingSummary};
use resolution::ResolutionPhase;

/// Timing knobs shared by both phases.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    pub interval: Duration,
    pub min_batch: usize,
    pub max_batch: usize,
    pub request_timeout: Duration,
}

impl Schedule {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: settings.schedule.interval(),
            min_batch: settings.schedule.min_batch,
            max_batch: settings.schedule.max_concurrent,
            request_timeout: settings.http.request_timeout(),
        }
    }

    pub fn plan(&self, total_items: usize) -> BatchPlan {
        planner::plan(total_items, self.interval, self.min_batch, self.max_batch)
    }

    /// `max_concurrent` doubles as the rate ceiling and is not checked
    /// against the interval. When the slot per batch is shorter than a
    /// request may take, the interval can't be honored; say so instead of
    /// changing the plan.
    pub(crate) fn warn_if_unattainable(&self, phase: &str, total_items: usize, plan: &BatchPlan) {
        if plan.num_batches(total_items) > 1 && plan.delay < self.request_timeout {
            tracing::warn!(
                phase,
                total_items,
                batch_size = plan.batch_size,
                delay_secs = plan.delay.as_secs_f64(),
                timeout_secs = self.request_timeout.as_secs_f64(),
                "Batch delay is shorter than the request timeout; slow batches will stretch the interval"
            );
        }
    }
}

/// Sleeps for `duration` unless `cancel` fires first. Returns false when
/// cancelled.
pub(crate) async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// The two-phase pipeline: resolve codes once, then poll statuses until
/// cancelled.
pub struct Pipeline {
    api: Arc<dyn LocationApi>,
    store: ArtifactStore,
    parser: Arc<dyn StatusParser>,
    schedule: Schedule,
    clock: CycleClock,
}

impl Pipeline {
    pub fn new(
        api: Arc<dyn LocationApi>,
        store: ArtifactStore,
        parser: Arc<dyn StatusParser>,
        schedule: Schedule,
    ) -> Self {
        Self {
            api,
            store,
            parser,
            schedule,
            clock: CycleClock::new(),
        }
    }

    pub fn resolution(&self) -> ResolutionPhase {
        ResolutionPhase::new(
            Arc::clone(&self.api),
            self.store.clone(),
            self.schedule,
            self.clock,
        )
    }

    pub fn polling(&self) -> PollingPhase {
        PollingPhase::new(
            Arc::clone(&self.api),
            self.store.clone(),
            Arc::clone(&self.parser),
            self.schedule,
            self.clock,
        )
    }

    pub async fn run(
        &self,
        codes: &[LocationCode],
        cancel: &CancellationToken,
    ) -> Result<Option<PollingSummary>, PhaseError> {
        tracing::info!(
            api = self.api.name(),
            codes = codes.len(),
            data_dir = %self.store.data_dir().display(),
            "Starting pipeline"
        );

        let mut failures = FailureCache::load(self.store.failed_codes_path());

        let active: Vec<LocationCode> = codes
            .iter()
            .filter(|c| !failures.contains(c))
            .cloned()
            .collect();
        tracing::info!(active = active.len(), total = codes.len(), "Filtered previously failed codes");

        let mut resolved = self.store.existing_locations(&active);
        tracing::info!(cached = resolved.len(), "Found existing locations with cached data");

        let needs_resolution = active.iter().filter(|c| !resolved.contains(c)).count();
        let phase_start = self.clock.now();

        if needs_resolution > 0 {
            let report = self
                .resolution()
                .resolve(&active, &mut failures, &resolved, cancel)
                .await?;
            let cancelled = report.cancelled;
            resolved.extend(report.resolved);

            if cancelled {
                tracing::info!("Stopped during resolution phase");
                return Ok(None);
            }
        }

        if resolved.is_empty() {
            tracing::warn!("No valid locations found for machine status polling");
            return Ok(None);
        }

        if needs_resolution > 0 {
            let elapsed = self.clock.elapsed_since(phase_start);
            let remaining = self.schedule.interval.saturating_sub(elapsed);
            if !remaining.is_zero() {
                tracing::info!(
                    wait_secs = remaining.as_secs_f64(),
                    "Waiting before starting continuous status polling"
                );
                if !sleep_or_cancel(remaining, cancel).await {
                    tracing::info!("Stopped before status polling started");
                    return Ok(None);
                }
            }
        }

        let summary = self.polling().run(&resolved, cancel).await?;
        Ok(Some(summary))
    }
}
