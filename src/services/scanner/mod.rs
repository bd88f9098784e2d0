//! Library scanner service
//!
//! Periodically walks every configured library, tests each discovered file on
//! a pool of workers and pushes accepted files onto the outbound task queue.
//!
//! Collaborators are injected through [ScannerContext]: settings, library
//! configuration, the file classifier, the walker and the telemetry and
//! plugin sinks. The manager loop lives in [supervisor], single-library scans
//! in [driver].

pub mod completion;
pub mod driver;
pub mod pool;
pub mod progress;
pub mod schedule;
pub mod supervisor;
pub mod walker;
pub mod worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SettingsStore;
use crate::services::events::{EventHook, LoggingEventHook};
use crate::services::file_tester::{ExtensionFileTester, FileTester};
use crate::services::library::{Library, LibraryStore, PermissiveValidator, SystemValidator};
use crate::services::manager::{HealthStatus, Service, ServiceHealth};
use crate::services::notifications::FrontendMessages;
use crate::services::queues::{DataQueues, TriggerRequest};
use crate::services::telemetry::{TelemetrySink, TracingTelemetry};

pub use completion::CompletionDetector;
pub use driver::{ScanOutcome, ScanReport, scan_library_path};
pub use progress::{LIBRARY_SCAN_PROGRESS, ScanProgress};
pub use schedule::{PeriodicJob, ScheduleState};
pub use supervisor::run_scan_pass;
pub use walker::{LibraryWalker, WalkDirWalker, WalkOptions};
pub use worker::ScanTally;

/// Name the scanner registers under with the services manager.
pub const SERVICE_NAME: &str = "library_scanner";

/// Poll cadences and timeouts used by the scanner.
#[derive(Debug, Clone)]
pub struct ScannerTimings {
    /// Manager loop tick.
    pub tick: Duration,
    /// Driver wait when there is nothing to drain.
    pub drain_wait: Duration,
    /// Driver wait between idle observations.
    pub settle_wait: Duration,
    /// Longest a worker blocks waiting for a candidate.
    pub worker_poll: Duration,
    /// Per-worker join deadline at scan teardown.
    pub join_timeout: Duration,
    /// Consecutive idle observations before a scan is complete.
    pub completion_polls: u32,
    /// Length of one schedule minute.
    pub minute: Duration,
}

impl Default for ScannerTimings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            drain_wait: Duration::from_millis(100),
            settle_wait: Duration::from_secs(1),
            worker_poll: Duration::from_millis(100),
            join_timeout: Duration::from_secs(2),
            completion_polls: 5,
            minute: Duration::from_secs(60),
        }
    }
}

/// Shared collaborators for the scanner.
pub struct ScannerContext {
    pub(crate) settings: Arc<dyn SettingsStore>,
    pub(crate) libraries: Arc<dyn LibraryStore>,
    pub(crate) validator: Arc<dyn SystemValidator>,
    pub(crate) tester: Arc<dyn FileTester>,
    pub(crate) walker: Arc<dyn LibraryWalker>,
    pub(crate) telemetry: Arc<dyn TelemetrySink>,
    pub(crate) events: Arc<dyn EventHook>,
    pub(crate) frontend: Arc<FrontendMessages>,
    pub(crate) queues: DataQueues,
    pub(crate) timings: ScannerTimings,
    pub(crate) progress_tx: broadcast::Sender<ScanProgress>,
}

impl ScannerContext {
    pub fn builder(
        settings: Arc<dyn SettingsStore>,
        libraries: Arc<dyn LibraryStore>,
        queues: DataQueues,
    ) -> ScannerContextBuilder {
        ScannerContextBuilder {
            settings,
            libraries,
            queues,
            validator: None,
            tester: None,
            walker: None,
            telemetry: None,
            events: None,
            frontend: None,
            timings: ScannerTimings::default(),
        }
    }

    pub fn queues(&self) -> &DataQueues {
        &self.queues
    }

    pub fn frontend(&self) -> &Arc<FrontendMessages> {
        &self.frontend
    }

    pub fn timings(&self) -> &ScannerTimings {
        &self.timings
    }

    /// Subscribe to scan progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress_tx.subscribe()
    }
}

/// Builder for [ScannerContext]. Unset collaborators fall back to the
/// extension classifier, the walkdir walker, tracing telemetry, a logging
/// event hook and a validator that accepts everything.
pub struct ScannerContextBuilder {
    settings: Arc<dyn SettingsStore>,
    libraries: Arc<dyn LibraryStore>,
    queues: DataQueues,
    validator: Option<Arc<dyn SystemValidator>>,
    tester: Option<Arc<dyn FileTester>>,
    walker: Option<Arc<dyn LibraryWalker>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    events: Option<Arc<dyn EventHook>>,
    frontend: Option<Arc<FrontendMessages>>,
    timings: ScannerTimings,
}

impl ScannerContextBuilder {
    pub fn validator(mut self, validator: Arc<dyn SystemValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn file_tester(mut self, tester: Arc<dyn FileTester>) -> Self {
        self.tester = Some(tester);
        self
    }

    pub fn walker(mut self, walker: Arc<dyn LibraryWalker>) -> Self {
        self.walker = Some(walker);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventHook>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn frontend(mut self, frontend: Arc<FrontendMessages>) -> Self {
        self.frontend = Some(frontend);
        self
    }

    pub fn timings(mut self, timings: ScannerTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn build(self) -> Arc<ScannerContext> {
        let (progress_tx, _) = broadcast::channel(256);
        Arc::new(ScannerContext {
            settings: self.settings,
            libraries: self.libraries,
            validator: self
                .validator
                .unwrap_or_else(|| Arc::new(PermissiveValidator)),
            tester: self.tester.unwrap_or_else(|| Arc::new(ExtensionFileTester)),
            walker: self.walker.unwrap_or_else(|| Arc::new(WalkDirWalker)),
            telemetry: self.telemetry.unwrap_or_else(|| Arc::new(TracingTelemetry)),
            events: self.events.unwrap_or_else(|| Arc::new(LoggingEventHook)),
            frontend: self.frontend.unwrap_or_default(),
            queues: self.queues,
            timings: self.timings,
            progress_tx,
        })
    }
}

/// State the manager loop publishes for health checks.
#[derive(Debug)]
pub(crate) struct ScannerStatus {
    schedule: RwLock<ScheduleState>,
    scanning: AtomicBool,
    passes: AtomicU64,
    last_reports: RwLock<Vec<ScanReport>>,
}

impl ScannerStatus {
    fn new() -> Self {
        Self {
            schedule: RwLock::new(ScheduleState::Unconfigured),
            scanning: AtomicBool::new(false),
            passes: AtomicU64::new(0),
            last_reports: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn set_schedule(&self, state: ScheduleState) {
        *self.schedule.write() = state;
    }

    pub(crate) fn begin_pass(&self) {
        self.scanning.store(true, Ordering::SeqCst);
    }

    pub(crate) fn end_pass(&self, reports: Vec<ScanReport>) {
        *self.last_reports.write() = reports;
        self.passes.fetch_add(1, Ordering::SeqCst);
        self.scanning.store(false, Ordering::SeqCst);
    }
}

struct ScannerRuntime {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Long-running library scanner: owns the manager loop task.
pub struct LibraryScannerService {
    ctx: Arc<ScannerContext>,
    status: Arc<ScannerStatus>,
    runtime: Mutex<Option<ScannerRuntime>>,
}

impl LibraryScannerService {
    /// Create the service. Nothing runs until [Service::start] is called.
    pub fn new(ctx: Arc<ScannerContext>) -> Self {
        Self {
            ctx,
            status: Arc::new(ScannerStatus::new()),
            runtime: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<ScannerContext> {
        &self.ctx
    }

    /// Queue a full scan pass. Dropped if one is already pending.
    pub fn scan_now(&self) -> TriggerRequest {
        let request = self.ctx.queues.request_library_scan();
        if request == TriggerRequest::Dropped {
            info!(service = SERVICE_NAME, "Library scan already pending, request dropped");
        }
        request
    }

    /// Scan one library immediately, outside the schedule. Stopping the
    /// service aborts it.
    pub async fn scan_library(&self, library: &Library) -> ScanReport {
        let cancel = self.child_token().await;
        scan_library_path(&self.ctx, library, &cancel).await
    }

    /// Subscribe to scan progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.ctx.subscribe()
    }

    pub fn schedule_state(&self) -> ScheduleState {
        *self.status.schedule.read()
    }

    pub fn is_scanning(&self) -> bool {
        self.status.scanning.load(Ordering::SeqCst)
    }

    /// Scan passes finished since the service was created.
    pub fn completed_passes(&self) -> u64 {
        self.status.passes.load(Ordering::SeqCst)
    }

    /// Reports from the most recent finished pass.
    pub fn last_reports(&self) -> Vec<ScanReport> {
        self.status.last_reports.read().clone()
    }

    async fn child_token(&self) -> CancellationToken {
        match self.runtime.lock().await.as_ref() {
            Some(runtime) => runtime.cancel.child_token(),
            None => CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Service for LibraryScannerService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn start(&self) -> Result<()> {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            return Ok(());
        }
        info!(service = SERVICE_NAME, "Library scanner starting");
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervisor::run_manager_loop(
            self.ctx.clone(),
            self.status.clone(),
            cancel.clone(),
        ));
        *runtime = Some(ScannerRuntime { cancel, handle });
        info!(service = SERVICE_NAME, "Library scanner started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let previous = self.runtime.lock().await.take();
        if let Some(runtime) = previous {
            info!(service = SERVICE_NAME, "Library scanner stopping");
            runtime.cancel.cancel();
            if let Err(e) = runtime.handle.await {
                warn!(service = SERVICE_NAME, error = %e, "Library scanner loop ended abnormally");
            }
            info!(service = SERVICE_NAME, "Library scanner stopped");
        }
        Ok(())
    }

    async fn health(&self) -> Result<ServiceHealth> {
        if self.runtime.lock().await.is_none() {
            return Ok(ServiceHealth::degraded("library scanner not started"));
        }
        let mut message = self.schedule_state().to_string();
        if self.is_scanning() {
            message.push_str(", scan in progress");
        }
        Ok(ServiceHealth {
            status: HealthStatus::Healthy,
            message: Some(message),
        })
    }
}
