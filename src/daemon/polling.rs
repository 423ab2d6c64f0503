use crate::core::artifacts::{format_request_time, ArtifactStore};
use crate::core::clock::{batch_cooldown, cycle_cooldown, Cooldown, CycleClock};
use crate::core::error::PhaseError;
use crate::core::models::{ResolvedLocation, ResolvedLocations};
use crate::daemon::executor::{execute_batch, Outcome};
use crate::daemon::{sleep_or_cancel, Schedule};
use crate::parser::StatusParser;
use crate::providers::LocationApi;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    /// Shared by every status artifact written during the cycle.
    pub request_time: String,
    pub successes: u64,
    pub failures: u64,
    pub elapsed: Duration,
    /// Stop was requested during a batch cooldown; later batches were skipped.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollingSummary {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub overruns: u64,
}

/// Continuous status polling over the resolved locations.
pub struct PollingPhase {
    api: Arc<dyn LocationApi>,
    store: ArtifactStore,
    parser: Arc<dyn StatusParser>,
    schedule: Schedule,
    clock: CycleClock,
}

impl PollingPhase {
    pub fn new(
        api: Arc<dyn LocationApi>,
        store: ArtifactStore,
        parser: Arc<dyn StatusParser>,
        schedule: Schedule,
        clock: CycleClock,
    ) -> Self {
        Self {
            api,
            store,
            parser,
            schedule,
            clock,
        }
    }

    /// Polls until `cancel` fires. Cancellation is observed at batch and
    /// cycle cooldowns, so an in-flight batch always completes.
    pub async fn run(
        &self,
        locations: &ResolvedLocations,
        cancel: &CancellationToken,
    ) -> Result<PollingSummary, PhaseError> {
        let mut summary = PollingSummary::default();

        tracing::info!(
            locations = locations.len(),
            interval_secs = self.schedule.interval.as_secs_f64(),
            "Phase 2: starting continuous status polling"
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let report = self.run_cycle(summary.cycles + 1, locations, cancel).await?;

            summary.cycles += 1;
            summary.successes += report.successes;
            summary.failures += report.failures;

            if report.cancelled {
                break;
            }

            let elapsed = report.elapsed;
            let cooldown = cycle_cooldown(self.schedule.interval, elapsed);
            match cooldown {
                Cooldown::Sleep(wait) => {
                    tracing::info!(
                        cycle = report.cycle,
                        request_time = %report.request_time,
                        elapsed_secs = elapsed.as_secs_f64(),
                        wait_secs = wait.as_secs_f64(),
                        "Cycle complete, waiting for next cycle"
                    );
                }
                Cooldown::Overrun(by) => {
                    summary.overruns += 1;
                    tracing::warn!(
                        cycle = report.cycle,
                        elapsed_secs = elapsed.as_secs_f64(),
                        overrun_secs = by.as_secs_f64(),
                        "Cycle overran the interval, starting next cycle immediately"
                    );
                }
            }

            if !sleep_or_cancel(cooldown.sleep_duration(), cancel).await {
                break;
            }
        }

        tracing::info!(
            cycles = summary.cycles,
            successes = summary.successes,
            failures = summary.failures,
            overruns = summary.overruns,
            "Status polling stopped"
        );

        Ok(summary)
    }

    /// One full pass over `locations`.
    pub async fn run_cycle(
        &self,
        cycle: u64,
        locations: &ResolvedLocations,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, PhaseError> {
        let cycle_start = self.clock.now();
        let request_time = format_request_time(chrono::Utc::now());
        let mut report = CycleReport {
            cycle,
            request_time,
            successes: 0,
            failures: 0,
            elapsed: Duration::ZERO,
            cancelled: false,
        };

        let entries = locations.as_slice();
        let plan = self.schedule.plan(entries.len());
        if plan.is_empty() {
            return Ok(report);
        }

        let total_batches = plan.num_batches(entries.len());
        tracing::info!(
            cycle,
            locations = entries.len(),
            batch_size = plan.batch_size,
            delay_secs = plan.delay.as_secs_f64(),
            total_batches,
            "Starting polling cycle"
        );
        if cycle == 1 {
            self.schedule
                .warn_if_unattainable("polling", entries.len(), &plan);
        }

        for (idx, batch) in entries.chunks(plan.batch_size).enumerate() {
            let batch_num = idx + 1;
            let batch_start = self.clock.now();

            let api = Arc::clone(&self.api);
            let mut outcomes = execute_batch(batch, self.schedule.request_timeout, move |loc| {
                let api = Arc::clone(&api);
                async move { api.fetch_machine_status(&loc.uln).await }
            })
            .await?;

            let mut batch_successes = 0u64;
            for location in batch {
                if self.handle_outcome(location, outcomes.take(location), &report.request_time) {
                    batch_successes += 1;
                } else {
                    report.failures += 1;
                }
            }
            report.successes += batch_successes;

            tracing::info!(
                cycle,
                batch = batch_num,
                total_batches,
                successes = batch_successes,
                total = batch.len(),
                "Polling batch complete"
            );

            if batch_num < total_batches {
                let wait = batch_cooldown(plan.delay, self.clock.elapsed_since(batch_start));
                if !sleep_or_cancel(wait, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
        }

        report.elapsed = self.clock.elapsed_since(cycle_start);
        Ok(report)
    }

    /// Persists and parses one status payload. Returns whether the status was
    /// saved.
    fn handle_outcome(
        &self,
        location: &ResolvedLocation,
        outcome: Option<Outcome<serde_json::Value>>,
        request_time: &str,
    ) -> bool {
        let code = &location.code;
        let payload = match outcome {
            Some(Outcome::Success(payload)) => payload,
            Some(Outcome::NotFound) => {
                tracing::warn!(%code, uln = %location.uln, "Machine status not found");
                return false;
            }
            Some(Outcome::Transient(cause)) => {
                tracing::warn!(%code, uln = %location.uln, %cause, "Failed to get machine status");
                return false;
            }
            None => {
                tracing::error!(%code, "No outcome recorded for status request");
                return false;
            }
        };

        if let Err(e) = self
            .store
            .save_status(code, &location.uln, request_time, &payload)
        {
            tracing::error!(%code, error = %e, "Failed to save machine status");
            return false;
        }

        match self.parser.parse_and_cleanup(code, &self.store) {
            Ok(parsed) => {
                tracing::debug!(%code, rows = parsed.rows, removed = parsed.removed, "Parsed status");
            }
            Err(e) => tracing::error!(%code, error = %e, "Failed to parse status data"),
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FetchError;
    use crate::core::models::LocationCode;
    use crate::daemon::testing::{location_payload, FakeApi};
    use crate::parser::{CsvStatusParser, ParseReport};
    use std::io::Write;
    use std::sync::Mutex;

    fn code(s: &str) -> LocationCode {
        LocationCode::parse(s).unwrap()
    }

    fn schedule(interval_secs: u64, max_batch: usize) -> Schedule {
        Schedule {
            interval: Duration::from_secs(interval_secs),
            min_batch: 1,
            max_batch,
            request_timeout: Duration::from_secs(100),
        }
    }

    fn seed(store: &ArtifactStore, entries: &[(&str, &str)]) -> ResolvedLocations {
        let mut resolved = ResolvedLocations::new();
        for (c, uln) in entries {
            store.save_location(&code(c), &location_payload(uln)).unwrap();
            resolved.insert(code(c), uln.to_string());
        }
        resolved
    }

    /// Records the status artifacts present when the parser is invoked,
    /// leaving them in place.
    #[derive(Default)]
    struct RecordingParser {
        seen: Mutex<Vec<String>>,
    }

    impl StatusParser for RecordingParser {
        fn parse_and_cleanup(
            &self,
            code: &LocationCode,
            store: &ArtifactStore,
        ) -> anyhow::Result<ParseReport> {
            let mut seen = self.seen.lock().unwrap();
            for entry in std::fs::read_dir(store.location_dir(code))? {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if name != format!("{code}.json") {
                    seen.push(name);
                }
            }
            Ok(ParseReport::default())
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_stamps_one_request_time_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1"), ("W2", "U2"), ("W3", "U3")]);
        let parser = Arc::new(RecordingParser::default());

        let phase = PollingPhase::new(
            Arc::new(FakeApi::new()),
            store,
            parser.clone(),
            schedule(60, 1),
            CycleClock::new(),
        );

        let start = tokio::time::Instant::now();
        let report = phase
            .run_cycle(1, &resolved, &CancellationToken::new())
            .await
            .unwrap();

        // three batches of one, 20s apart, no wait after the last
        assert_eq!(start.elapsed(), Duration::from_secs(40));
        assert_eq!(report.successes, 3);

        let seen = parser.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                format!("U1-{}.json", report.request_time),
                format!("U2-{}.json", report.request_time),
                format!("U3-{}.json", report.request_time),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1"), ("W2", "U2"), ("W3", "U3")]);
        let api = Arc::new(
            FakeApi::new()
                .with_status_error("U1", FetchError::transient("HTTP 502"))
                .with_status_error("U2", FetchError::NotFound),
        );

        let phase = PollingPhase::new(
            api.clone(),
            store.clone(),
            Arc::new(CsvStatusParser::new()),
            schedule(60, 10),
            CycleClock::new(),
        );

        let report = phase
            .run_cycle(1, &resolved, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(api.status_calls(), 3);
        assert_eq!(report.successes, 1);
        assert_eq!(report.failures, 2);
        assert!(!store.parsed_csv_path(&code("W1")).exists());
        assert!(store.parsed_csv_path(&code("W3")).exists());
        assert!(store.status_files(&code("W3"), "U3").unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_write_failure_counts_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1"), ("W2", "U2")]);

        // W1's directory becomes a plain file, so its status can't be written
        std::fs::remove_dir_all(store.location_dir(&code("W1"))).unwrap();
        std::fs::write(store.location_dir(&code("W1")), b"").unwrap();

        let api = Arc::new(FakeApi::new());
        let phase = PollingPhase::new(
            api.clone(),
            store.clone(),
            Arc::new(CsvStatusParser::new()),
            schedule(60, 10),
            CycleClock::new(),
        );

        let report = phase
            .run_cycle(1, &resolved, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(api.status_calls(), 2);
        assert_eq!(report.successes, 1);
        assert_eq!(report.failures, 1);
        assert!(store.parsed_csv_path(&code("W2")).exists());
        assert!(store.location_dir(&code("W1")).is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycles_align_to_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1")]);
        let api = Arc::new(FakeApi::new().with_latency(Duration::from_secs(10)));

        let phase = PollingPhase::new(
            api.clone(),
            store,
            Arc::new(CsvStatusParser::new()),
            schedule(60, 10),
            CycleClock::new(),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(170)).await;
            stopper.cancel();
        });

        let start = tokio::time::Instant::now();
        let summary = phase.run(&resolved, &cancel).await.unwrap();

        // cycles start at 0s, 60s and 120s; the stop lands in the third cooldown
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.successes, 3);
        assert_eq!(summary.overruns, 0);
        assert_eq!(start.elapsed(), Duration::from_secs(170));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_cooldown_and_logs_warning() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1")]);
        let api = Arc::new(FakeApi::new().with_latency(Duration::from_secs(70)));

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let phase = PollingPhase::new(
            api.clone(),
            store,
            Arc::new(CsvStatusParser::new()),
            schedule(60, 10),
            CycleClock::new(),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(100)).await;
            stopper.cancel();
        });

        let start = tokio::time::Instant::now();
        let summary = phase.run(&resolved, &cancel).await.unwrap();

        // the second cycle starts right at 70s and its batch completes before stopping
        assert_eq!(start.elapsed(), Duration::from_secs(140));
        assert_eq!(summary.cycles, 2);
        assert_eq!(summary.overruns, 2);
        assert_eq!(api.status_calls(), 2);
        assert!(logs.contents().contains("Cycle overran the interval"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_batch_cooldown_ends_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let resolved = seed(&store, &[("W1", "U1"), ("W2", "U2"), ("W3", "U3")]);
        let api = Arc::new(FakeApi::new());

        let phase = PollingPhase::new(
            api.clone(),
            store,
            Arc::new(CsvStatusParser::new()),
            schedule(60, 1),
            CycleClock::new(),
        );

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            stopper.cancel();
        });

        let summary = phase.run(&resolved, &cancel).await.unwrap();
        assert_eq!(summary.cycles, 1);
        assert_eq!(api.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_locations_is_noop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::new());
        let phase = PollingPhase::new(
            api.clone(),
            ArtifactStore::new(dir.path()),
            Arc::new(CsvStatusParser::new()),
            schedule(60, 10),
            CycleClock::new(),
        );

        let report = phase
            .run_cycle(1, &ResolvedLocations::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.successes, 0);
        assert_eq!(api.status_calls(), 0);
    }
}
