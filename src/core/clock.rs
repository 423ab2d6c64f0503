use std::time::Duration;
use tokio::time::Instant;

/// Monotonic time source shared by both phases. Backed by tokio's clock so
/// that paused-time tests drive it deterministically.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleClock;

impl CycleClock {
    pub fn new() -> Self {
        Self
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn elapsed_since(&self, start: Instant) -> Duration {
        self.now().saturating_duration_since(start)
    }
}

/// What to do once a cycle has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cooldown {
    /// Sleep this long to land on the next interval boundary.
    Sleep(Duration),
    /// The cycle overran the interval by this much; start the next one now.
    Overrun(Duration),
}

impl Cooldown {
    pub fn sleep_duration(&self) -> Duration {
        match self {
            Cooldown::Sleep(d) => *d,
            Cooldown::Overrun(_) => Duration::ZERO,
        }
    }
}

/// Remaining wait after a batch that should have taken `planned`.
pub fn batch_cooldown(planned: Duration, elapsed: Duration) -> Duration {
    planned.saturating_sub(elapsed)
}

/// Remaining wait after a cycle. There is no catch-up: an overrun simply
/// yields a zero sleep.
pub fn cycle_cooldown(interval: Duration, elapsed: Duration) -> Cooldown {
    if elapsed < interval {
        Cooldown::Sleep(interval - elapsed)
    } else {
        Cooldown::Overrun(elapsed - interval)
    }
}
