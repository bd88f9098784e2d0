//! Library scanner manager loop.
//!
//! The outer loop reads the scan interval and registers a [PeriodicJob] for
//! it. The inner loop ticks about once a second: it services manual triggers,
//! runs the job when due and breaks out when the interval changes so the job
//! is rebuilt. Scans run inline, so two passes never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::driver::{ScanReport, scan_library_path};
use super::schedule::{PeriodicJob, ScheduleState};
use super::worker::pause;
use super::{SERVICE_NAME, ScannerContext, ScannerStatus};

fn job_period(minute: Duration, minutes: u64) -> Duration {
    minute.saturating_mul(u32::try_from(minutes).unwrap_or(u32::MAX))
}

pub(crate) async fn run_manager_loop(
    ctx: Arc<ScannerContext>,
    status: Arc<ScannerStatus>,
    cancel: CancellationToken,
) {
    info!(service = SERVICE_NAME, "Starting library scanner manager loop");
    let mut first_run = true;

    'outer: while !cancel.is_cancelled() {
        if !pause(&cancel, ctx.timings.tick).await {
            break;
        }

        let settings = ctx.settings.snapshot();
        let interval = settings.schedule_full_scan_minutes;
        if interval == 0 {
            status.set_schedule(ScheduleState::Unconfigured);
            if ctx.queues.take_trigger().is_some() {
                info!(service = SERVICE_NAME, "Manual library scan requested");
                run_pass(&ctx, &status, &cancel).await;
            }
            continue;
        }

        info!(
            service = SERVICE_NAME,
            interval_minutes = interval,
            "Setting library scanner schedule"
        );
        let mut job = PeriodicJob::new(job_period(ctx.timings.minute, interval));
        status.set_schedule(ScheduleState::Scheduled { minutes: interval });

        if first_run && settings.run_full_scan_on_start {
            info!(service = SERVICE_NAME, "Running library scan on start");
            run_pass(&ctx, &status, &cancel).await;
            job.mark_ran(Instant::now());
        }
        first_run = false;

        loop {
            if !pause(&cancel, ctx.timings.tick).await {
                break 'outer;
            }

            if ctx.queues.take_trigger().is_some() {
                info!(service = SERVICE_NAME, "Manual library scan requested");
                run_pass(&ctx, &status, &cancel).await;
                break;
            }

            if !ctx.settings.snapshot().enable_library_scanner {
                continue;
            }

            if job.is_due(Instant::now()) {
                run_pass(&ctx, &status, &cancel).await;
                job.mark_ran(Instant::now());
            }

            if ctx.settings.snapshot().schedule_full_scan_minutes != interval {
                info!(service = SERVICE_NAME, "Resetting library scanner schedule");
                status.set_schedule(ScheduleState::Reconfiguring);
                break;
            }
        }
        debug!(service = SERVICE_NAME, "Cleared library scanner schedule");
    }

    status.set_schedule(ScheduleState::Unconfigured);
    info!(service = SERVICE_NAME, "Leaving library scanner manager loop");
}

async fn run_pass(ctx: &ScannerContext, status: &ScannerStatus, cancel: &CancellationToken) {
    status.begin_pass();
    let reports = run_scan_pass(ctx, cancel).await;
    status.end_pass(reports);
}

/// One full pass over every configured library, one library at a time.
///
/// Nothing is scanned if the system check fails. Libraries that cannot be
/// loaded are skipped, as are remote-only libraries and those with the
/// scanner disabled.
pub async fn run_scan_pass(ctx: &ScannerContext, cancel: &CancellationToken) -> Vec<ScanReport> {
    let mut reports = Vec::new();

    if !ctx.validator.is_valid().await {
        warn!(
            service = SERVICE_NAME,
            "Skipping library scanner due to invalid system configuration"
        );
        return reports;
    }

    let ids = match ctx.libraries.library_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            error!(service = SERVICE_NAME, error = %e, "Unable to list libraries");
            return reports;
        }
    };
    if ids.is_empty() {
        info!(service = SERVICE_NAME, "No libraries are configured to run a library scan");
        return reports;
    }

    for id in ids {
        if cancel.is_cancelled() {
            break;
        }
        let library = match ctx.libraries.get_library(id).await {
            Ok(library) => library,
            Err(e) => {
                error!(library_id = %id, error = %e, "Unable to fetch library config");
                continue;
            }
        };
        if library.enable_remote_only {
            debug!(library_id = %id, "Library receives remote files only, not scanning");
            continue;
        }
        if !library.enable_scanner {
            continue;
        }

        info!(
            library_id = %id,
            library = %library.name,
            path = %library.path.display(),
            "Running full library scan"
        );
        reports.push(scan_library_path(ctx, &library, cancel).await);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_period_scales_minutes() {
        assert_eq!(
            job_period(Duration::from_secs(60), 15),
            Duration::from_secs(900)
        );
        assert_eq!(
            job_period(Duration::from_millis(10), 3),
            Duration::from_millis(30)
        );
        assert_eq!(
            job_period(Duration::from_secs(60), u64::MAX),
            Duration::from_secs(60 * u64::from(u32::MAX))
        );
    }
}
