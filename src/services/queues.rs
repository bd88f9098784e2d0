//! Queues shared between the scanner and the rest of the application.
//!
//! [DataQueues] is built once at start-up and handed to every component that
//! needs it. It carries the manual scan trigger and the outbound task queue.
//! [ScanQueues] are created per library scan and dropped with it.

use std::path::PathBuf;

use flume::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request understood by the scanner manager loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    LibraryScan,
}

/// Result of asking for a manual scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRequest {
    Queued,
    /// A trigger was already waiting to be picked up; this one was dropped.
    Dropped,
}

/// A file accepted by the scanner, waiting for the task handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub pathname: PathBuf,
    pub library_id: Uuid,
    pub priority_score: i64,
}

/// Application wide queue registry.
#[derive(Clone)]
pub struct DataQueues {
    trigger_tx: Sender<ScanTrigger>,
    trigger_rx: Receiver<ScanTrigger>,
    task_tx: Sender<ScheduledTask>,
    task_rx: Receiver<ScheduledTask>,
}

impl DataQueues {
    pub fn new() -> Self {
        let (trigger_tx, trigger_rx) = flume::bounded(1);
        let (task_tx, task_rx) = flume::unbounded();
        Self {
            trigger_tx,
            trigger_rx,
            task_tx,
            task_rx,
        }
    }

    /// Ask the scanner to run a full pass as soon as possible. At most one
    /// request can be pending.
    pub fn request_library_scan(&self) -> TriggerRequest {
        match self.trigger_tx.try_send(ScanTrigger::LibraryScan) {
            Ok(()) => TriggerRequest::Queued,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                TriggerRequest::Dropped
            }
        }
    }

    /// Take the pending trigger, if any, without waiting.
    pub fn take_trigger(&self) -> Option<ScanTrigger> {
        self.trigger_rx.try_recv().ok()
    }

    pub fn trigger_pending(&self) -> bool {
        !self.trigger_rx.is_empty()
    }

    /// Producer side of the outbound task queue.
    pub fn task_sender(&self) -> Sender<ScheduledTask> {
        self.task_tx.clone()
    }

    /// Consumer side of the outbound task queue.
    pub fn scheduled_tasks(&self) -> Receiver<ScheduledTask> {
        self.task_rx.clone()
    }

    pub fn pending_tasks(&self) -> usize {
        self.task_rx.len()
    }
}

impl Default for DataQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// A discovered file waiting to be tested.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub library_id: Uuid,
}

/// A file a tester accepted.
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    pub path: PathBuf,
    pub library_id: Uuid,
    pub priority_score: i64,
}

/// The file a worker just picked up.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub path: PathBuf,
}

/// Both ends of an unbounded channel.
pub struct Channel<T> {
    pub tx: Sender<T>,
    pub rx: Receiver<T>,
}

impl<T> Channel<T> {
    pub fn unbounded() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Queues owned by a single library scan.
pub struct ScanQueues {
    pub to_test: Channel<CandidateFile>,
    pub to_process: Channel<AcceptedFile>,
    pub status: Channel<ProgressEvent>,
}

impl ScanQueues {
    pub fn new() -> Self {
        Self {
            to_test: Channel::unbounded(),
            to_process: Channel::unbounded(),
            status: Channel::unbounded(),
        }
    }

    pub fn all_empty(&self) -> bool {
        self.to_test.is_empty() && self.to_process.is_empty() && self.status.is_empty()
    }
}

impl Default for ScanQueues {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_trigger_is_dropped_while_pending() {
        let queues = DataQueues::new();

        assert_eq!(queues.request_library_scan(), TriggerRequest::Queued);
        assert_eq!(queues.request_library_scan(), TriggerRequest::Dropped);
        assert!(queues.trigger_pending());

        assert_eq!(queues.take_trigger(), Some(ScanTrigger::LibraryScan));
        assert_eq!(queues.take_trigger(), None);
        assert_eq!(queues.request_library_scan(), TriggerRequest::Queued);
    }

    #[test]
    fn test_clones_share_the_same_queues() {
        let queues = DataQueues::new();
        let other = queues.clone();

        other
            .task_sender()
            .send(ScheduledTask {
                pathname: PathBuf::from("/media/a.mkv"),
                library_id: Uuid::nil(),
                priority_score: 3,
            })
            .unwrap();

        assert_eq!(queues.pending_tasks(), 1);
        assert_eq!(queues.scheduled_tasks().try_recv().unwrap().priority_score, 3);
    }

    #[test]
    fn test_scan_queues_report_empty_only_when_all_are() {
        let queues = ScanQueues::new();
        assert!(queues.all_empty());

        queues
            .status
            .tx
            .send(ProgressEvent {
                path: PathBuf::from("x"),
            })
            .unwrap();
        assert!(!queues.all_empty());

        queues.status.rx.try_recv().unwrap();
        assert!(queues.all_empty());
    }
}
