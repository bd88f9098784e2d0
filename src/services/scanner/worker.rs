//! File tester workers.
//!
//! Each worker pulls candidates from the shared to-test queue, reports the
//! file it picked up on the status queue, and forwards accepted files to the
//! to-process queue. A worker exits when the scan is aborted, or when its own
//! stop token is cancelled and the input queue has drained.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use flume::{Receiver, Sender};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::services::file_tester::{FileTester, TestVerdict};
use crate::services::queues::{AcceptedFile, CandidateFile, ProgressEvent};

/// Outcome of one timed poll.
#[derive(Debug)]
pub(crate) enum Polled<T> {
    Item(T),
    /// Nothing arrived within the poll period.
    Idle,
    Cancelled,
    /// Every sender is gone.
    Closed,
}

/// Wait up to `period` for the next item, giving up early if `cancel` fires.
pub(crate) async fn poll_next<T>(
    rx: &Receiver<T>,
    cancel: &CancellationToken,
    period: Duration,
) -> Polled<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Polled::Cancelled,
        res = tokio::time::timeout(period, rx.recv_async()) => match res {
            Ok(Ok(item)) => Polled::Item(item),
            Ok(Err(_)) => Polled::Closed,
            Err(_) => Polled::Idle,
        },
    }
}

/// Sleep for `period`. Returns `false` if `cancel` fired first.
pub(crate) async fn pause(cancel: &CancellationToken, period: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(period) => true,
    }
}

/// Per-scan verdict counters shared by all workers.
#[derive(Debug, Default)]
pub struct ScanTally {
    accepted: AtomicUsize,
    rejected: AtomicUsize,
}

impl ScanTally {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Candidates whose verdict has been fully published.
    pub fn resolved(&self) -> usize {
        self.accepted() + self.rejected()
    }
}

/// Everything a worker needs, cloned into each task.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub input: Receiver<CandidateFile>,
    pub output: Sender<AcceptedFile>,
    pub status: Sender<ProgressEvent>,
    pub library_id: Uuid,
    pub tester: Arc<dyn FileTester>,
    pub tally: Arc<ScanTally>,
    pub poll_interval: Duration,
}

pub(crate) async fn run_file_tester(
    ordinal: usize,
    ctx: WorkerContext,
    stop: CancellationToken,
    abort: CancellationToken,
) {
    debug!(worker = ordinal, library_id = %ctx.library_id, "File tester started");
    loop {
        if abort.is_cancelled() {
            break;
        }
        if stop.is_cancelled() && ctx.input.is_empty() {
            break;
        }
        match poll_next(&ctx.input, &abort, ctx.poll_interval).await {
            Polled::Item(candidate) => test_candidate(ordinal, &ctx, candidate).await,
            Polled::Idle => continue,
            Polled::Cancelled | Polled::Closed => break,
        }
    }
    debug!(worker = ordinal, library_id = %ctx.library_id, "File tester exiting");
}

async fn test_candidate(ordinal: usize, ctx: &WorkerContext, candidate: CandidateFile) {
    let _ = ctx.status.send(ProgressEvent {
        path: candidate.path.clone(),
    });

    let outcome = AssertUnwindSafe(ctx.tester.test(&candidate.path, candidate.library_id))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(TestVerdict::Accept { priority_score })) => {
            let _ = ctx.output.send(AcceptedFile {
                path: candidate.path,
                library_id: candidate.library_id,
                priority_score,
            });
            ctx.tally.accepted.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Ok(TestVerdict::Reject)) => {
            ctx.tally.rejected.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Err(e)) => {
            warn!(worker = ordinal, path = %candidate.path.display(), error = %e, "File test failed");
            ctx.tally.rejected.fetch_add(1, Ordering::SeqCst);
        }
        Err(_) => {
            error!(worker = ordinal, path = %candidate.path.display(), "File tester panicked");
            ctx.tally.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }
}
