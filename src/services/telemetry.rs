//! Metrics and telemetry records emitted by the scanner.

use serde_json::Value as JsonValue;
use tracing::info;

/// Destination for metric and data records.
///
/// `metric` records are point-in-time events. `data` records replace any
/// earlier record with the same `name` and `search_key`.
pub trait TelemetrySink: Send + Sync + 'static {
    fn metric(&self, name: &str, fields: &JsonValue);

    fn data(&self, name: &str, search_key: &str, fields: &JsonValue);
}

/// Writes telemetry as structured log lines under the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn metric(&self, name: &str, fields: &JsonValue) {
        info!(target: "telemetry", metric = %name, fields = %fields, "metric");
    }

    fn data(&self, name: &str, search_key: &str, fields: &JsonValue) {
        info!(target: "telemetry", data = %name, search_key = %search_key, fields = %fields, "data");
    }
}
