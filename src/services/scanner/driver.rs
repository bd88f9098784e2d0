//! Scanning a single library path.
//!
//! The walk runs on the blocking pool and feeds the to-test queue while the
//! driver loop drains status events and accepted files. A scan is complete
//! only after several consecutive polls where the walk has finished, every
//! discovered file has a published verdict and all three queues are empty.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flume::Sender;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ScannerContext;
use super::completion::CompletionDetector;
use super::pool::FileTesterPool;
use super::progress::ProgressTracker;
use super::walker::{LibraryWalker, WalkOptions};
use super::worker::{ScanTally, WorkerContext, pause};
use crate::services::events::{SCAN_COMPLETE_EVENT, ScanCompleteData};
use crate::services::library::Library;
use crate::services::queues::{CandidateFile, ScanQueues, ScheduledTask};

/// How a library scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed,
    Aborted,
    /// The library path did not exist; nothing was started.
    PathMissing,
}

/// Summary of one library scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub library_id: Uuid,
    pub library_name: String,
    pub library_path: PathBuf,
    pub outcome: ScanOutcome,
    pub files_discovered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub workers: usize,
    /// Workers that missed the join deadline and were left running.
    pub abandoned_workers: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl ScanReport {
    fn path_missing(library: &Library, started_at: DateTime<Utc>) -> Self {
        Self {
            library_id: library.id,
            library_name: library.name.clone(),
            library_path: library.path.clone(),
            outcome: ScanOutcome::PathMissing,
            files_discovered: 0,
            accepted: 0,
            rejected: 0,
            workers: 0,
            abandoned_workers: 0,
            started_at,
            finished_at: Utc::now(),
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct WalkState {
    discovered: AtomicUsize,
    finished: AtomicBool,
}

/// Marks the walk finished even if the walker panics.
struct FinishOnDrop(Arc<WalkState>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finished.store(true, Ordering::SeqCst);
    }
}

fn spawn_walk(
    walker: Arc<dyn LibraryWalker>,
    root: PathBuf,
    library_id: Uuid,
    options: WalkOptions,
    to_test: Sender<CandidateFile>,
    state: Arc<WalkState>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let _finish = FinishOnDrop(state.clone());
        walker.walk(&root, options, &mut |path| {
            if cancel.is_cancelled() {
                return ControlFlow::Break(());
            }
            // Count before sending so the total never trails the queue.
            state.discovered.fetch_add(1, Ordering::SeqCst);
            if to_test.send(CandidateFile { path, library_id }).is_err() {
                state.discovered.fetch_sub(1, Ordering::SeqCst);
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        });
    })
}

/// Scan one library and forward every accepted file to the outbound task
/// queue. Returns once the scan completes or `cancel` fires.
pub async fn scan_library_path(
    ctx: &ScannerContext,
    library: &Library,
    cancel: &CancellationToken,
) -> ScanReport {
    let started_at = Utc::now();
    let clock = Instant::now();

    if !tokio::fs::try_exists(&library.path).await.unwrap_or(false) {
        warn!(
            library_id = %library.id,
            path = %library.path.display(),
            "Library path does not exist"
        );
        return ScanReport::path_missing(library, started_at);
    }

    let settings = ctx.settings.snapshot();
    if settings.debugging {
        debug!(library_id = %library.id, path = %library.path.display(), "Scanning directory");
    }

    let queues = ScanQueues::new();
    let tally = Arc::new(ScanTally::default());
    let pool = FileTesterPool::spawn(
        settings.concurrent_file_testers,
        WorkerContext {
            input: queues.to_test.rx.clone(),
            output: queues.to_process.tx.clone(),
            status: queues.status.tx.clone(),
            library_id: library.id,
            tester: ctx.tester.clone(),
            tally: tally.clone(),
            poll_interval: ctx.timings.worker_poll,
        },
        cancel,
    );
    let workers = pool.len();

    let mut progress = ProgressTracker::new(&ctx.frontend, &ctx.progress_tx, library);
    progress.show(format!("Scanning directory - '{}'", library.path.display()));

    let walk = Arc::new(WalkState::default());
    let walk_handle = spawn_walk(
        ctx.walker.clone(),
        library.path.clone(),
        library.id,
        WalkOptions {
            follow_symlinks: settings.follow_symlinks,
            debugging: settings.debugging,
        },
        queues.to_test.tx.clone(),
        walk.clone(),
        cancel.clone(),
    );

    let task_tx = ctx.queues.task_sender();
    let mut detector = CompletionDetector::new(ctx.timings.completion_polls);

    let outcome = loop {
        if cancel.is_cancelled() {
            break ScanOutcome::Aborted;
        }

        let walk_finished = walk.finished.load(Ordering::SeqCst);
        let discovered = walk.discovered.load(Ordering::SeqCst);
        // Verdicts are published before they are counted, so read the
        // count before looking at the queues.
        let idle = walk_finished && tally.resolved() >= discovered && queues.all_empty();

        if idle {
            progress.show("100%".to_string());
            if detector.observe(true) {
                break ScanOutcome::Completed;
            }
            if !pause(cancel, ctx.timings.settle_wait).await {
                break ScanOutcome::Aborted;
            }
            continue;
        }
        detector.observe(false);

        // Status first so the message tracks the newest file.
        if let Ok(event) = queues.status.rx.try_recv() {
            progress.set_current_file(event.path);
            progress.refresh(queues.to_test.len(), discovered, walk_finished, tally.resolved());
            continue;
        }
        if let Ok(accepted) = queues.to_process.rx.try_recv() {
            debug!(
                library_id = %accepted.library_id,
                path = %accepted.path.display(),
                priority_score = accepted.priority_score,
                "Queueing file for processing"
            );
            if let Err(e) = task_tx.send(ScheduledTask {
                pathname: accepted.path,
                library_id: accepted.library_id,
                priority_score: accepted.priority_score,
            }) {
                warn!(
                    library_id = %e.0.library_id,
                    path = %e.0.pathname.display(),
                    "Task queue closed, dropping scheduled file"
                );
            }
            continue;
        }

        if !queues.to_test.is_empty() {
            progress.refresh(queues.to_test.len(), discovered, walk_finished, tally.resolved());
        }
        if !pause(cancel, ctx.timings.drain_wait).await {
            break ScanOutcome::Aborted;
        }
    };

    pool.stop_all();
    match tokio::time::timeout(ctx.timings.join_timeout, walk_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(library_id = %library.id, error = %e, "Library walk task failed"),
        Err(_) => warn!(library_id = %library.id, "Library walk did not stop in time, abandoning it"),
    }
    let abandoned_workers = pool.join_all(ctx.timings.join_timeout).await;

    let files_discovered = walk.discovered.load(Ordering::SeqCst);
    let report = ScanReport {
        library_id: library.id,
        library_name: library.name.clone(),
        library_path: library.path.clone(),
        outcome,
        files_discovered,
        accepted: tally.accepted(),
        rejected: tally.rejected(),
        workers,
        abandoned_workers,
        started_at,
        finished_at: Utc::now(),
        duration: clock.elapsed(),
    };

    match outcome {
        ScanOutcome::Completed => {
            info!(
                library_id = %library.id,
                library = %library.name,
                files = report.files_discovered,
                accepted = report.accepted,
                duration_secs = report.duration.as_secs_f64(),
                "Library scan completed"
            );
            progress.finish(files_discovered, tally.resolved());
            record_completion(ctx, library, &report).await;
        }
        _ => {
            warn!(
                library_id = %library.id,
                library = %library.name,
                files = report.files_discovered,
                duration_secs = report.duration.as_secs_f64(),
                "Library scan aborted"
            );
            record_abort(ctx, &report);
        }
    }

    progress.clear();
    report
}

/// Aborted scans only report their duration; the last-scan record and the
/// completion hook are reserved for finished scans.
fn record_abort(ctx: &ScannerContext, report: &ScanReport) {
    let fields = serde_json::json!({
        "library_id": report.library_id,
        "library_name": report.library_name,
        "library_path": report.library_path.display().to_string(),
        "outcome": report.outcome,
        "scan_duration": report.duration.as_secs_f64(),
        "files_discovered": report.files_discovered,
    });
    ctx.telemetry.metric("library_scan_aborted", &fields);
}

async fn record_completion(ctx: &ScannerContext, library: &Library, report: &ScanReport) {
    let data = ScanCompleteData {
        library_id: library.id,
        library_name: library.name.clone(),
        library_path: library.path.display().to_string(),
        scan_start_time: report.started_at,
        scan_end_time: report.finished_at,
        scan_duration: report.duration.as_secs_f64(),
        files_scanned_count: report.files_discovered,
    };
    let fields = match serde_json::to_value(&data) {
        Ok(fields) => fields,
        Err(e) => {
            warn!(library_id = %library.id, error = %e, "Failed to encode scan completion data");
            return;
        }
    };

    ctx.telemetry.metric("library_scan_completed", &fields);
    ctx.telemetry
        .data("last_library_scan", &library.id.to_string(), &fields);

    if let Err(e) = ctx.events.run_event_plugins(SCAN_COMPLETE_EVENT, fields).await {
        warn!(library_id = %library.id, error = %e, "scan_complete plugins failed");
    }
}
