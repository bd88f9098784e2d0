//! Plugin event hooks fired by the scanner.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

/// Event type fired once a library scan has finished.
pub const SCAN_COMPLETE_EVENT: &str = "events.scan_complete";

/// Payload of [SCAN_COMPLETE_EVENT].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCompleteData {
    pub library_id: Uuid,
    pub library_name: String,
    pub library_path: String,
    pub scan_start_time: DateTime<Utc>,
    pub scan_end_time: DateTime<Utc>,
    /// Seconds.
    pub scan_duration: f64,
    pub files_scanned_count: usize,
}

/// Runs every plugin registered for an event type.
#[async_trait]
pub trait EventHook: Send + Sync + 'static {
    async fn run_event_plugins(&self, plugin_type: &str, data: JsonValue) -> Result<()>;
}

/// Hook used when no plugin runner is attached; it only logs the event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventHook;

#[async_trait]
impl EventHook for LoggingEventHook {
    async fn run_event_plugins(&self, plugin_type: &str, data: JsonValue) -> Result<()> {
        debug!(plugin_type = %plugin_type, data = %data, "No plugin runner attached, event logged");
        Ok(())
    }
}
