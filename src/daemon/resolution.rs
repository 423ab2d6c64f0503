use crate::core::artifacts::ArtifactStore;
use crate::core::clock::{batch_cooldown, CycleClock};
use crate::core::error::PhaseError;
use crate::core::failures::FailureCache;
use crate::core::models::{extract_uln, LocationCode, ResolvedLocations};
use crate::daemon::executor::{execute_batch, Outcome};
use crate::daemon::{sleep_or_cancel, Schedule};
use crate::providers::LocationApi;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct ResolutionReport {
    /// Newly resolved locations, including ones recovered from payloads
    /// already on disk.
    pub resolved: ResolvedLocations,
    pub requested: usize,
    pub not_found: usize,
    pub transient: usize,
    pub cancelled: bool,
}

/// One-shot mapping of location codes to ULNs.
pub struct ResolutionPhase {
    api: Arc<dyn LocationApi>,
    store: ArtifactStore,
    schedule: Schedule,
    clock: CycleClock,
}

impl ResolutionPhase {
    pub fn new(
        api: Arc<dyn LocationApi>,
        store: ArtifactStore,
        schedule: Schedule,
        clock: CycleClock,
    ) -> Self {
        Self {
            api,
            store,
            schedule,
            clock,
        }
    }

    /// Resolves every code not already failed, resolved, or persisted.
    /// Not-found codes go into `failures`, which is flushed once at the end.
    pub async fn resolve(
        &self,
        codes: &[LocationCode],
        failures: &mut FailureCache,
        already_resolved: &ResolvedLocations,
        cancel: &CancellationToken,
    ) -> Result<ResolutionReport, PhaseError> {
        let mut report = ResolutionReport::default();

        let candidates: Vec<&LocationCode> = codes
            .iter()
            .filter(|c| !failures.contains(c) && !already_resolved.contains(c))
            .collect();

        // A payload on disk means an earlier run resolved the code even if
        // it never made it into the caller's map.
        let (persisted, pending): (Vec<&LocationCode>, Vec<&LocationCode>) = candidates
            .into_iter()
            .partition(|c| self.store.has_location(c));

        if !persisted.is_empty() {
            let persisted: Vec<LocationCode> = persisted.into_iter().cloned().collect();
            report.resolved = self.store.existing_locations(&persisted);
        }

        let pending: Vec<LocationCode> = pending.into_iter().cloned().collect();
        let plan = self.schedule.plan(pending.len());
        if plan.is_empty() {
            tracing::info!("No location codes need resolution");
            return Ok(report);
        }

        let total_batches = plan.num_batches(pending.len());
        tracing::info!(
            codes = pending.len(),
            batch_size = plan.batch_size,
            delay_secs = plan.delay.as_secs_f64(),
            total_batches,
            rate = pending.len() as f64 / self.schedule.interval.as_secs_f64(),
            "Phase 1: resolving location codes"
        );
        self.schedule
            .warn_if_unattainable("resolution", pending.len(), &plan);

        for (idx, batch) in pending.chunks(plan.batch_size).enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let batch_num = idx + 1;
            let batch_start = self.clock.now();
            tracing::info!(
                batch = batch_num,
                total_batches,
                codes = batch.len(),
                "Processing location batch"
            );

            let api = Arc::clone(&self.api);
            let mut outcomes = execute_batch(batch, self.schedule.request_timeout, move |code| {
                let api = Arc::clone(&api);
                async move { api.fetch_location(code.as_str()).await }
            })
            .await?;
            report.requested += batch.len();
            tracing::debug!(
                batch = batch_num,
                succeeded = outcomes.success_count(),
                total = batch.len(),
                "Location batch returned"
            );

            for code in batch {
                match outcomes.take(code) {
                    Some(Outcome::Success(payload)) => {
                        let Some(uln) = extract_uln(&payload) else {
                            tracing::error!(%code, "No ULN found in location data");
                            report.transient += 1;
                            continue;
                        };

                        match self.store.save_location(code, &payload) {
                            Ok(_) => {
                                tracing::info!(%code, %uln, "Saved location data");
                                report.resolved.insert(code.clone(), uln);
                            }
                            Err(e) => {
                                tracing::error!(%code, error = %e, "Failed to save location data");
                                report.transient += 1;
                            }
                        }
                    }
                    Some(Outcome::NotFound) => {
                        tracing::warn!(%code, "Location not found (404), adding to failed codes");
                        failures.insert(code.clone());
                        report.not_found += 1;
                    }
                    Some(Outcome::Transient(cause)) => {
                        tracing::warn!(%code, %cause, "Failed to get location data");
                        report.transient += 1;
                    }
                    None => {
                        tracing::error!(%code, "No outcome recorded for location request");
                        report.transient += 1;
                    }
                }
            }

            if batch_num < total_batches {
                let wait = batch_cooldown(plan.delay, self.clock.elapsed_since(batch_start));
                if !wait.is_zero() {
                    tracing::debug!(wait_secs = wait.as_secs_f64(), "Waiting before next location batch");
                }
                if !sleep_or_cancel(wait, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
        }

        if failures.is_dirty() {
            if let Err(e) = failures.flush() {
                tracing::error!(error = %e, "Failed to save failed codes");
            }
        }

        tracing::info!(
            requested = report.requested,
            resolved = report.resolved.len(),
            not_found = report.not_found,
            transient = report.transient,
            total_failed = failures.len(),
            "Phase 1 complete"
        );

        Ok(report)
    }
}
