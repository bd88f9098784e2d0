//! Integration tests for the library scan pipeline
//!
//! These tests drive real scans over temporary directories:
//! - Single library scans (empty, mixed, missing path)
//! - Verdict accounting across pool sizes
//! - Cancellation while a slow walk is in progress
//! - The manager loop: triggers, schedule changes and shutdown

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use library_scanner::config::{ScannerSettings, SharedSettings};
use library_scanner::services::scanner::{
    LIBRARY_SCAN_PROGRESS, LibraryWalker, ScheduleState, WalkOptions, run_scan_pass,
    scan_library_path,
};
use library_scanner::services::{
    DataQueues, EventHook, FileTestError, FileTester, FrontendMessageEvent, FrontendMessages,
    HealthStatus, Library, LibraryScannerService, MemoryLibraryStore, SCAN_COMPLETE_EVENT,
    ScanOutcome, ScannerContext, ScannerTimings, ScheduledTask, Service, TelemetrySink,
    TestVerdict, TriggerRequest,
};

// ============================================================================
// Test collaborators
// ============================================================================

/// Accepts files whose name is in the score table; rejects everything else
/// without touching the filesystem.
struct ScoreTable(HashMap<String, i64>);

impl ScoreTable {
    fn new(entries: &[(&str, i64)]) -> Self {
        Self(entries.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }
}

#[async_trait]
impl FileTester for ScoreTable {
    async fn test(&self, path: &Path, _: Uuid) -> Result<TestVerdict, FileTestError> {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        Ok(match self.0.get(name) {
            Some(score) => TestVerdict::Accept {
                priority_score: *score,
            },
            None => TestVerdict::Reject,
        })
    }
}

/// Accepts files whose numeric stem is even.
struct EvenFiles;

#[async_trait]
impl FileTester for EvenFiles {
    async fn test(&self, path: &Path, _: Uuid) -> Result<TestVerdict, FileTestError> {
        let n: i64 = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        if n % 2 == 0 {
            Ok(TestVerdict::Accept { priority_score: n })
        } else {
            Ok(TestVerdict::Reject)
        }
    }
}

/// Yields synthetic paths with a delay between each one.
struct SlowWalker {
    files: usize,
    delay: Duration,
    visited: Arc<AtomicUsize>,
}

impl LibraryWalker for SlowWalker {
    fn walk(
        &self,
        root: &Path,
        _: WalkOptions,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) {
        for i in 0..self.files {
            std::thread::sleep(self.delay);
            self.visited.fetch_add(1, Ordering::SeqCst);
            if visit(root.join(format!("{i}.mkv"))).is_break() {
                return;
            }
        }
    }
}

/// Counts scans in flight: a scan enters when its walk starts and leaves when
/// the completion hook runs.
#[derive(Default)]
struct InFlight {
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
}

impl LibraryWalker for InFlight {
    fn walk(
        &self,
        root: &Path,
        _: WalkOptions,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        for i in 0..3 {
            std::thread::sleep(Duration::from_millis(5));
            if visit(root.join(format!("{i}.mkv"))).is_break() {
                return;
            }
        }
    }
}

#[async_trait]
impl EventHook for InFlight {
    async fn run_event_plugins(&self, _: &str, _: JsonValue) -> Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingEvents(Mutex<Vec<(String, JsonValue)>>);

impl RecordingEvents {
    fn recorded(&self) -> Vec<(String, JsonValue)> {
        self.0.lock().clone()
    }
}

#[async_trait]
impl EventHook for RecordingEvents {
    async fn run_event_plugins(&self, plugin_type: &str, data: JsonValue) -> Result<()> {
        self.0.lock().push((plugin_type.to_string(), data));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTelemetry {
    metrics: Mutex<Vec<String>>,
    data: Mutex<Vec<(String, String)>>,
}

impl TelemetrySink for RecordingTelemetry {
    fn metric(&self, name: &str, _: &JsonValue) {
        self.metrics.lock().push(name.to_string());
    }

    fn data(&self, name: &str, search_key: &str, _: &JsonValue) {
        self.data
            .lock()
            .push((name.to_string(), search_key.to_string()));
    }
}

fn fast_timings() -> ScannerTimings {
    ScannerTimings {
        tick: Duration::from_millis(20),
        drain_wait: Duration::from_millis(2),
        settle_wait: Duration::from_millis(10),
        worker_poll: Duration::from_millis(10),
        join_timeout: Duration::from_millis(500),
        completion_polls: 5,
        minute: Duration::from_millis(50),
    }
}

struct Harness {
    ctx: Arc<ScannerContext>,
    settings: SharedSettings,
    queues: DataQueues,
    frontend: Arc<FrontendMessages>,
    events: Arc<RecordingEvents>,
    telemetry: Arc<RecordingTelemetry>,
}

impl Harness {
    fn new(
        libraries: Vec<Library>,
        settings: ScannerSettings,
        tester: Arc<dyn FileTester>,
        walker: Option<Arc<dyn LibraryWalker>>,
    ) -> Self {
        let settings = SharedSettings::new(settings);
        let queues = DataQueues::new();
        let frontend = Arc::new(FrontendMessages::default());
        let events = Arc::new(RecordingEvents::default());
        let telemetry = Arc::new(RecordingTelemetry::default());

        let mut builder = ScannerContext::builder(
            Arc::new(settings.clone()),
            Arc::new(MemoryLibraryStore::new(libraries)),
            queues.clone(),
        )
        .file_tester(tester)
        .events(events.clone())
        .telemetry(telemetry.clone())
        .frontend(frontend.clone())
        .timings(fast_timings());
        if let Some(walker) = walker {
            builder = builder.walker(walker);
        }

        Self {
            ctx: builder.build(),
            settings,
            queues,
            frontend,
            events,
            telemetry,
        }
    }

    fn drain_tasks(&self) -> Vec<ScheduledTask> {
        self.queues.scheduled_tasks().drain().collect()
    }
}

fn touch(dir: &Path, names: &[&str]) {
    for name in names {
        std::fs::write(dir.join(name), b"media").unwrap();
    }
}

async fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Single library scans
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_empty_library_completes_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let library = Library::new("Empty", dir.path());
    let h = Harness::new(
        vec![library.clone()],
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[])),
        None,
    );

    let report = scan_library_path(&h.ctx, &library, &CancellationToken::new()).await;

    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.files_discovered, 0);
    assert!(h.drain_tasks().is_empty());

    let events = h.events.recorded();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, SCAN_COMPLETE_EVENT);
    assert_eq!(events[0].1["files_scanned_count"], 0);
    assert_eq!(events[0].1["library_id"], library.id.to_string());
    assert_eq!(events[0].1["library_name"], "Empty");

    assert_eq!(*h.telemetry.metrics.lock(), vec!["library_scan_completed"]);
    assert_eq!(
        *h.telemetry.data.lock(),
        vec![("last_library_scan".to_string(), library.id.to_string())]
    );
    assert!(h.frontend.get(LIBRARY_SCAN_PROGRESS).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_library_queues_accepted_files() {
    let dir = tempfile::tempdir().unwrap();
    touch(dir.path(), &["a.mkv", "b.mkv", "c.txt"]);
    let library = Library::new("Mixed", dir.path());
    let h = Harness::new(
        vec![library.clone()],
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[("a.mkv", 5), ("b.mkv", 1)])),
        None,
    );
    let mut frontend_rx = h.frontend.subscribe();

    let report = scan_library_path(&h.ctx, &library, &CancellationToken::new()).await;

    assert_eq!(report.outcome, ScanOutcome::Completed);
    assert_eq!(report.files_discovered, 3);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected, 1);

    let mut tasks = h.drain_tasks();
    tasks.sort_by_key(|t| t.priority_score);
    assert_eq!(
        tasks,
        vec![
            ScheduledTask {
                pathname: dir.path().join("b.mkv"),
                library_id: library.id,
                priority_score: 1,
            },
            ScheduledTask {
                pathname: dir.path().join("a.mkv"),
                library_id: library.id,
                priority_score: 5,
            },
        ]
    );

    let mut updates = Vec::new();
    let mut removed = false;
    while let Ok(event) = frontend_rx.try_recv() {
        match event {
            FrontendMessageEvent::Updated(message) => {
                assert!(!removed, "update after removal: {}", message.message);
                updates.push(message.message);
            }
            FrontendMessageEvent::Removed { id } => {
                assert_eq!(id, LIBRARY_SCAN_PROGRESS);
                removed = true;
            }
        }
    }
    assert!(removed);
    assert!(updates[0].starts_with("Scanning directory - '"));
    assert_eq!(updates.last().map(String::as_str), Some("100%"));
    let done_at = updates.iter().position(|m| m == "100%").unwrap();
    assert!(updates[done_at..].iter().all(|m| !m.contains("Testing")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_path_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let library = Library::new("Gone", dir.path().join("does-not-exist"));
    let h = Harness::new(
        vec![library.clone()],
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[])),
        None,
    );
    let mut frontend_rx = h.frontend.subscribe();

    let report = scan_library_path(&h.ctx, &library, &CancellationToken::new()).await;

    assert_eq!(report.outcome, ScanOutcome::PathMissing);
    assert_eq!(report.workers, 0);
    assert!(frontend_rx.try_recv().is_err());
    assert!(h.events.recorded().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_candidate_gets_one_verdict_for_any_pool_size() {
    let dir = tempfile::tempdir().unwrap();
    let names: Vec<String> = (0..40).map(|i| format!("{i}.mkv")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    touch(dir.path(), &refs);
    let library = Library::new("Many", dir.path());
    let h = Harness::new(
        vec![library.clone()],
        ScannerSettings::default(),
        Arc::new(EvenFiles),
        None,
    );

    for workers in [1usize, 2, 4, 8] {
        h.settings.update(|s| s.concurrent_file_testers = workers);

        let report = scan_library_path(&h.ctx, &library, &CancellationToken::new()).await;
        let tasks = h.drain_tasks();

        assert_eq!(report.workers, workers);
        assert_eq!(report.files_discovered, 40);
        assert_eq!(report.accepted + report.rejected, 40);
        assert_eq!(report.accepted, 20);
        assert_eq!(tasks.len(), 20);
        assert!(tasks.iter().all(|t| t.priority_score % 2 == 0));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_during_slow_walk_returns_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let library = Library::new("Slow", dir.path());
    let visited = Arc::new(AtomicUsize::new(0));
    let h = Harness::new(
        vec![library.clone()],
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[])),
        Some(Arc::new(SlowWalker {
            files: 1000,
            delay: Duration::from_millis(20),
            visited: visited.clone(),
        })),
    );

    let cancel = CancellationToken::new();
    let scan = {
        let ctx = h.ctx.clone();
        let library = library.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { scan_library_path(&ctx, &library, &cancel).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    let cancelled_at = Instant::now();
    cancel.cancel();
    let report = tokio::time::timeout(Duration::from_secs(2), scan)
        .await
        .expect("scan should stop after abort")
        .unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_millis(500));
    assert_eq!(report.outcome, ScanOutcome::Aborted);
    assert_eq!(report.abandoned_workers, 0);
    assert!(visited.load(Ordering::SeqCst) < 1000);
    assert!(h.events.recorded().is_empty());
    assert_eq!(*h.telemetry.metrics.lock(), vec!["library_scan_aborted"]);
    assert!(h.telemetry.data.lock().is_empty());
    assert!(h.frontend.get(LIBRARY_SCAN_PROGRESS).is_none());
}

// ============================================================================
// Scan passes
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pass_skips_remote_only_and_disabled_libraries() {
    let remote_dir = tempfile::tempdir().unwrap();
    let disabled_dir = tempfile::tempdir().unwrap();
    let normal_dir = tempfile::tempdir().unwrap();
    touch(remote_dir.path(), &["remote.mkv"]);
    touch(disabled_dir.path(), &["disabled.mkv"]);
    touch(normal_dir.path(), &["normal.mkv"]);

    let remote = Library {
        enable_remote_only: true,
        ..Library::new("Remote", remote_dir.path())
    };
    let disabled = Library {
        enable_scanner: false,
        ..Library::new("Disabled", disabled_dir.path())
    };
    let normal = Library::new("Normal", normal_dir.path());

    let h = Harness::new(
        vec![remote, disabled, normal.clone()],
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[
            ("remote.mkv", 1),
            ("disabled.mkv", 1),
            ("normal.mkv", 1),
        ])),
        None,
    );

    let reports = run_scan_pass(&h.ctx, &CancellationToken::new()).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].library_id, normal.id);
    let tasks = h.drain_tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].pathname, normal_dir.path().join("normal.mkv"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pass_with_no_libraries_does_nothing() {
    let h = Harness::new(
        Vec::new(),
        ScannerSettings::default(),
        Arc::new(ScoreTable::new(&[])),
        None,
    );

    assert!(run_scan_pass(&h.ctx, &CancellationToken::new()).await.is_empty());
    assert!(h.events.recorded().is_empty());
}

// ============================================================================
// Manager loop
// ============================================================================

fn scanner_with_empty_library(
    settings: ScannerSettings,
) -> (LibraryScannerService, Harness, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::new(
        vec![Library::new("Empty", dir.path())],
        settings,
        Arc::new(ScoreTable::new(&[])),
        None,
    );
    (LibraryScannerService::new(h.ctx.clone()), h, dir)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_triggers_run_one_pass() {
    let (scanner, _h, _dir) = scanner_with_empty_library(ScannerSettings {
        schedule_full_scan_minutes: 0,
        ..ScannerSettings::default()
    });

    assert_eq!(scanner.scan_now(), TriggerRequest::Queued);
    assert_eq!(scanner.scan_now(), TriggerRequest::Dropped);

    scanner.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || scanner.completed_passes() >= 1).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(scanner.completed_passes(), 1);

    scanner.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disabled_scanner_only_runs_on_trigger() {
    let (scanner, _h, _dir) = scanner_with_empty_library(ScannerSettings {
        enable_library_scanner: false,
        schedule_full_scan_minutes: 1,
        ..ScannerSettings::default()
    });
    scanner.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(scanner.completed_passes(), 0);

    assert_eq!(scanner.scan_now(), TriggerRequest::Queued);
    assert!(wait_until(Duration::from_secs(3), || scanner.completed_passes() == 1).await);

    scanner.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interval_changes_rebuild_the_schedule() {
    let (scanner, h, _dir) = scanner_with_empty_library(ScannerSettings {
        enable_library_scanner: true,
        schedule_full_scan_minutes: 1,
        ..ScannerSettings::default()
    });
    scanner.start().await.unwrap();

    assert!(wait_until(Duration::from_secs(3), || scanner.completed_passes() >= 2).await);

    // Interval 0 disables automatic firings.
    h.settings.update(|s| s.schedule_full_scan_minutes = 0);
    assert!(
        wait_until(Duration::from_secs(3), || {
            scanner.schedule_state() == ScheduleState::Unconfigured
        })
        .await
    );
    let passes = scanner.completed_passes();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(scanner.completed_passes(), passes);

    h.settings.update(|s| s.schedule_full_scan_minutes = 2);
    assert!(
        wait_until(Duration::from_secs(3), || {
            scanner.schedule_state() == ScheduleState::Scheduled { minutes: 2 }
        })
        .await
    );
    assert!(wait_until(Duration::from_secs(3), || scanner.completed_passes() > passes).await);

    scanner.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interval_zero_does_not_cancel_running_scan() {
    let dir = tempfile::tempdir().unwrap();
    let visited = Arc::new(AtomicUsize::new(0));
    let h = Harness::new(
        vec![Library::new("Slow", dir.path())],
        ScannerSettings {
            enable_library_scanner: true,
            run_full_scan_on_start: true,
            schedule_full_scan_minutes: 60,
            ..ScannerSettings::default()
        },
        Arc::new(ScoreTable::new(&[])),
        Some(Arc::new(SlowWalker {
            files: 15,
            delay: Duration::from_millis(20),
            visited: visited.clone(),
        })),
    );
    let scanner = LibraryScannerService::new(h.ctx.clone());
    scanner.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || scanner.is_scanning()).await);

    h.settings.update(|s| s.schedule_full_scan_minutes = 0);

    assert!(wait_until(Duration::from_secs(5), || scanner.completed_passes() >= 1).await);
    let reports = scanner.last_reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].outcome, ScanOutcome::Completed);
    assert_eq!(reports[0].files_discovered, 15);
    assert_eq!(visited.load(Ordering::SeqCst), 15);
    assert!(
        wait_until(Duration::from_secs(3), || {
            scanner.schedule_state() == ScheduleState::Unconfigured
        })
        .await
    );

    scanner.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interval_changes_never_overlap_scans() {
    let dir = tempfile::tempdir().unwrap();
    let in_flight = Arc::new(InFlight::default());
    let settings = SharedSettings::new(ScannerSettings {
        enable_library_scanner: true,
        run_full_scan_on_start: true,
        schedule_full_scan_minutes: 1,
        ..ScannerSettings::default()
    });
    let ctx = ScannerContext::builder(
        Arc::new(settings.clone()),
        Arc::new(MemoryLibraryStore::new(vec![Library::new("Busy", dir.path())])),
        DataQueues::new(),
    )
    .file_tester(Arc::new(ScoreTable::new(&[])))
    .walker(in_flight.clone())
    .events(in_flight.clone())
    .timings(fast_timings())
    .build();
    let scanner = LibraryScannerService::new(ctx);
    scanner.start().await.unwrap();

    for minutes in [2, 1, 3, 1] {
        assert!(wait_until(Duration::from_secs(3), || scanner.is_scanning()).await);
        settings.update(|s| s.schedule_full_scan_minutes = minutes);
        tokio::time::sleep(Duration::from_millis(60)).await;
    }
    assert!(
        wait_until(Duration::from_secs(3), || {
            in_flight.completed.load(Ordering::SeqCst) >= 4
        })
        .await
    );

    scanner.stop().await.unwrap();
    assert_eq!(in_flight.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_aborts_running_scan() {
    let dir = tempfile::tempdir().unwrap();
    let visited = Arc::new(AtomicUsize::new(0));
    let h = Harness::new(
        vec![Library::new("Slow", dir.path())],
        ScannerSettings {
            run_full_scan_on_start: true,
            schedule_full_scan_minutes: 60,
            ..ScannerSettings::default()
        },
        Arc::new(ScoreTable::new(&[])),
        Some(Arc::new(SlowWalker {
            files: 1000,
            delay: Duration::from_millis(20),
            visited: visited.clone(),
        })),
    );
    let scanner = LibraryScannerService::new(h.ctx.clone());

    assert_matches!(
        scanner.health().await.unwrap().status,
        HealthStatus::Degraded
    );
    scanner.start().await.unwrap();
    assert!(wait_until(Duration::from_secs(3), || scanner.is_scanning()).await);

    let health = scanner.health().await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert!(health.message.unwrap().contains("scan in progress"));

    let stopping = Instant::now();
    scanner.stop().await.unwrap();
    assert!(stopping.elapsed() < Duration::from_secs(1));

    assert!(!scanner.is_scanning());
    assert_eq!(scanner.schedule_state(), ScheduleState::Unconfigured);
    assert_eq!(scanner.completed_passes(), 1);
    assert_eq!(scanner.last_reports()[0].outcome, ScanOutcome::Aborted);
    assert!(visited.load(Ordering::SeqCst) < 1000);

    // A second stop is a no-op.
    scanner.stop().await.unwrap();
}
