//! Periodic scan job and the state it reports.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Where the manager loop is in its schedule lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScheduleState {
    /// Interval is 0 or the loop has not read settings yet.
    Unconfigured,
    Scheduled { minutes: u64 },
    /// The interval changed and the job is being rebuilt.
    Reconfiguring,
}

impl std::fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconfigured => write!(f, "unconfigured"),
            Self::Scheduled { minutes } => write!(f, "scheduled every {} min", minutes),
            Self::Reconfiguring => write!(f, "reconfiguring"),
        }
    }
}

/// A job that becomes due every `every`. The next run is measured from when
/// the previous run finished, so a slow scan never queues up a second firing.
#[derive(Debug, Clone)]
pub struct PeriodicJob {
    every: Duration,
    next_run: Instant,
}

impl PeriodicJob {
    pub fn new(every: Duration) -> Self {
        Self::starting_at(every, Instant::now())
    }

    pub fn starting_at(every: Duration, now: Instant) -> Self {
        Self {
            every,
            next_run: next_after(now, every),
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_run
    }

    /// Record that the job just finished at `now`.
    pub fn mark_ran(&mut self, now: Instant) {
        self.next_run = next_after(now, self.every);
    }
}

fn next_after(now: Instant, every: Duration) -> Instant {
    now.checked_add(every)
        .or_else(|| now.checked_add(Duration::from_secs(100 * 365 * 24 * 60 * 60)))
        .unwrap_or(now)
}
