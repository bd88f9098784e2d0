//! Scan progress reporting.
//!
//! The percentage shown to users is a rough indicator only. It is derived
//! from the to-test queue length and never used to decide completion.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::services::library::Library;
use crate::services::notifications::{FrontendMessage, FrontendMessages};

/// Frontend message id used for the running scan.
pub const LIBRARY_SCAN_PROGRESS: &str = "libraryScanProgress";

/// Scanner progress event
#[derive(Debug, Clone, Serialize)]
pub struct ScanProgress {
    pub library_id: Uuid,
    pub library_name: String,
    pub files_discovered: usize,
    pub files_tested: usize,
    pub current_file: Option<String>,
    pub percent_complete: Option<u8>,
    pub is_complete: bool,
}

/// `100 - floor(queued / total * 100)`, or `None` while the total is unknown
/// or zero.
pub fn percent_complete(queued: usize, total: Option<usize>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let remaining = queued.min(total) * 100 / total;
    Some((100 - remaining) as u8)
}

/// Text for the progress message while files are being tested.
pub fn progress_message(queued: usize, total: Option<usize>, current: &Path) -> String {
    if queued == 0 {
        return format!("Testing: {}", current.display());
    }
    match percent_complete(queued, total) {
        Some(pct) => format!("{}% - Testing: {}", pct, current.display()),
        None => format!("??? - Testing: {}", current.display()),
    }
}

/// Publishes progress for one library scan to the frontend and to
/// broadcast subscribers. Frontend updates are skipped when the text has
/// not changed.
pub(crate) struct ProgressTracker<'a> {
    frontend: &'a FrontendMessages,
    progress_tx: &'a broadcast::Sender<ScanProgress>,
    library_id: Uuid,
    library_name: String,
    current_file: Option<PathBuf>,
    last_message: Option<String>,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(
        frontend: &'a FrontendMessages,
        progress_tx: &'a broadcast::Sender<ScanProgress>,
        library: &Library,
    ) -> Self {
        Self {
            frontend,
            progress_tx,
            library_id: library.id,
            library_name: library.name.clone(),
            current_file: None,
            last_message: None,
        }
    }

    pub fn show(&mut self, message: String) {
        if self.last_message.as_deref() == Some(message.as_str()) {
            return;
        }
        self.frontend
            .update(FrontendMessage::status(LIBRARY_SCAN_PROGRESS, message.clone()));
        self.last_message = Some(message);
    }

    pub fn set_current_file(&mut self, path: PathBuf) {
        self.current_file = Some(path);
    }

    /// Recompute the message from the queue state and notify subscribers.
    pub fn refresh(&mut self, queued: usize, discovered: usize, walk_finished: bool, tested: usize) {
        let total = walk_finished.then_some(discovered);
        if let Some(current) = self.current_file.clone() {
            self.show(progress_message(queued, total, &current));
        }
        self.broadcast(discovered, tested, percent_complete(queued, total), false);
    }

    pub fn finish(&mut self, discovered: usize, tested: usize) {
        self.current_file = None;
        self.broadcast(discovered, tested, Some(100), true);
    }

    pub fn clear(&mut self) {
        self.frontend.remove_item(LIBRARY_SCAN_PROGRESS);
        self.last_message = None;
    }

    fn broadcast(&self, discovered: usize, tested: usize, percent: Option<u8>, is_complete: bool) {
        let _ = self.progress_tx.send(ScanProgress {
            library_id: self.library_id,
            library_name: self.library_name.clone(),
            files_discovered: discovered,
            files_tested: tested,
            current_file: self
                .current_file
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            percent_complete: percent,
            is_complete,
        });
    }
}
