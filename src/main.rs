//! Librarian library scanner - service entry point
//!
//! Loads configuration, starts the scanner under the services manager and
//! runs until Ctrl-C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use flume::Receiver;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use library_scanner::cli::CliOptions;
use library_scanner::config::{Config, ScannerSettings, SharedSettings, watch_settings_file};
use library_scanner::services::logging;
use library_scanner::services::{
    DataQueues, FrontendMessages, JsonLibraryStore, LibraryCountValidator, LibraryScannerService,
    LibraryStore, PermissiveValidator, ScannerContext, ScheduledTask, ServicesManager,
    SystemValidator, TriggerRequest,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = CliOptions::from_args();
    let mut config = Config::from_env()?;
    if let Some(path) = cli.config_path.clone() {
        config = config.with_config_path(path);
    }

    logging::init(config.log_json)?;
    info!("Starting Librarian library scanner");

    let settings = ScannerSettings::load(&config.config_path)
        .context("Failed to load scanner settings")?;
    info!(
        config_path = %config.config_path.display(),
        libraries_file = %config.libraries_file.display(),
        enabled = settings.enable_library_scanner,
        interval_minutes = settings.schedule_full_scan_minutes,
        "Configuration loaded"
    );
    let settings = SharedSettings::new(settings);

    let libraries: Arc<dyn LibraryStore> = Arc::new(JsonLibraryStore::new(&config.libraries_file));
    let frontend = Arc::new(FrontendMessages::default());
    let queues = DataQueues::new();

    let validator: Arc<dyn SystemValidator> = match config.max_libraries {
        Some(max) => Arc::new(LibraryCountValidator::new(
            libraries.clone(),
            frontend.clone(),
            max,
        )),
        None => Arc::new(PermissiveValidator),
    };

    let shutdown = CancellationToken::new();
    let settings_watcher = (config.settings_reload_secs > 0).then(|| {
        tokio::spawn(watch_settings_file(
            settings.clone(),
            config.config_path.clone(),
            Duration::from_secs(config.settings_reload_secs),
            shutdown.clone(),
        ))
    });

    let ctx = ScannerContext::builder(Arc::new(settings), libraries, queues.clone())
        .validator(validator)
        .frontend(frontend)
        .build();
    let scanner = Arc::new(LibraryScannerService::new(ctx));

    // The task handler lives in another process; log what would be handed over.
    let task_logger = tokio::spawn(log_scheduled_tasks(queues.scheduled_tasks()));

    let services = ServicesManager::builder()
        .add_service(scanner.clone())
        .start()
        .await?;

    if cli.scan_now && scanner.scan_now() == TriggerRequest::Queued {
        info!("Queued library scan requested on the command line");
    }

    shutdown_signal().await;
    info!("Shutdown signal received, stopping services");
    for (name, health) in services.health_all().await {
        info!(service = %name, status = ?health.status, message = ?health.message, "Service health at shutdown");
    }

    shutdown.cancel();
    if let Some(watcher) = settings_watcher {
        if let Err(e) = watcher.await {
            warn!(error = %e, "Settings watcher task failed");
        }
    }
    services.stop_all().await?;
    task_logger.abort();
    info!("Librarian library scanner stopped");
    Ok(())
}

async fn log_scheduled_tasks(tasks: Receiver<ScheduledTask>) {
    while let Ok(task) = tasks.recv_async().await {
        info!(
            path = %task.pathname.display(),
            library_id = %task.library_id,
            priority_score = task.priority_score,
            "File queued for processing"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
