//! Background services and the collaborators they talk to

pub mod events;
pub mod file_tester;
pub mod library;
pub mod logging;
pub mod manager;
pub mod notifications;
pub mod queues;
pub mod scanner;
pub mod telemetry;

pub use events::{EventHook, LoggingEventHook, SCAN_COMPLETE_EVENT, ScanCompleteData};
pub use file_tester::{ExtensionFileTester, FileTestError, FileTester, TestVerdict};
pub use library::{
    JsonLibraryStore, Library, LibraryCountValidator, LibraryStore, LibraryStoreError,
    MemoryLibraryStore, PermissiveValidator, SystemValidator,
};
pub use manager::{HealthStatus, Service, ServiceHealth, ServicesManager};
pub use notifications::{FrontendMessage, FrontendMessageEvent, FrontendMessages, MessageType};
pub use queues::{DataQueues, ScanTrigger, ScheduledTask, TriggerRequest};
pub use scanner::{
    LibraryScannerService, ScanOutcome, ScanProgress, ScanReport, ScannerContext, ScannerTimings,
};
pub use telemetry::{TelemetrySink, TracingTelemetry};
