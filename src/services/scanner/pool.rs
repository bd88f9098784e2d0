//! Worker pool owned by a single library scan.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::worker::{WorkerContext, run_file_tester};

struct WorkerHandle {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

/// Fixed set of file tester workers keyed by ordinal. Workers are never
/// restarted; the pool is built at scan start and torn down at scan end.
pub(crate) struct FileTesterPool {
    workers: BTreeMap<usize, WorkerHandle>,
}

impl FileTesterPool {
    /// Start `count` workers (at least one) all reading the same input queue.
    /// Each worker's stop token is a child of `abort`.
    pub fn spawn(count: usize, ctx: WorkerContext, abort: &CancellationToken) -> Self {
        let count = count.max(1);
        let mut workers = BTreeMap::new();
        for ordinal in 0..count {
            let stop = abort.child_token();
            let handle = tokio::spawn(run_file_tester(
                ordinal,
                ctx.clone(),
                stop.clone(),
                abort.clone(),
            ));
            workers.insert(ordinal, WorkerHandle { stop, handle });
        }
        debug!(workers = count, library_id = %ctx.library_id, "Started file testers");
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Ask every worker to finish once the input queue is drained.
    pub fn stop_all(&self) {
        for worker in self.workers.values() {
            worker.stop.cancel();
        }
    }

    /// Wait up to `timeout` for each worker. Workers still running after that
    /// are detached and left to finish on their own. Returns how many were.
    pub async fn join_all(self, timeout: Duration) -> usize {
        let mut abandoned = 0;
        for (ordinal, worker) in self.workers {
            match tokio::time::timeout(timeout, worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker = ordinal, error = %e, "File tester task failed"),
                Err(_) => {
                    warn!(
                        worker = ordinal,
                        timeout_ms = timeout.as_millis() as u64,
                        "File tester did not stop in time, abandoning it"
                    );
                    abandoned += 1;
                }
            }
        }
        abandoned
    }
}
