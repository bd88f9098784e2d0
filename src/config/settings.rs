//! Runtime scanner settings.
//!
//! Settings are layered: built-in defaults, then environment variables named
//! after the setting in upper case (`SCHEDULE_FULL_SCAN_MINUTES=60`), then the
//! keys present in `settings.json`. The loaded value lives behind
//! [SharedSettings] so it can be changed while the scanner is running; every
//! reader takes a fresh [snapshot](SettingsStore::snapshot).

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors raised while loading scanner settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings read by the library scanner on every cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerSettings {
    /// Allow the periodic job to fire. Manual triggers ignore this.
    pub enable_library_scanner: bool,
    /// Minutes between full scans; 0 disables the periodic job.
    pub schedule_full_scan_minutes: u64,
    pub follow_symlinks: bool,
    /// Workers started for each library scan.
    pub concurrent_file_testers: usize,
    pub run_full_scan_on_start: bool,
    pub debugging: bool,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            enable_library_scanner: false,
            schedule_full_scan_minutes: 1440,
            follow_symlinks: true,
            concurrent_file_testers: 2,
            run_full_scan_on_start: false,
            debugging: false,
        }
    }
}

impl ScannerSettings {
    /// Defaults overridden by the process environment and then by
    /// `settings.json` in `config_path` when that file exists.
    pub fn load(config_path: &Path) -> Result<Self, SettingsError> {
        let mut settings = Self::default();
        settings.apply_env(|key| env::var(key).ok())?;

        let file = config_path.join("settings.json");
        if file.exists() {
            settings.apply_file(&file)?;
            info!(path = %file.display(), "Loaded scanner settings file");
        } else {
            debug!(path = %file.display(), "No scanner settings file, using defaults");
        }
        Ok(settings)
    }

    /// Override fields from variables resolved by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ENABLE_LIBRARY_SCANNER") {
            self.enable_library_scanner = parse_bool("ENABLE_LIBRARY_SCANNER", &v)?;
        }
        if let Some(v) = lookup("SCHEDULE_FULL_SCAN_MINUTES") {
            self.schedule_full_scan_minutes = parse_number("SCHEDULE_FULL_SCAN_MINUTES", &v)?;
        }
        if let Some(v) = lookup("FOLLOW_SYMLINKS") {
            self.follow_symlinks = parse_bool("FOLLOW_SYMLINKS", &v)?;
        }
        if let Some(v) = lookup("CONCURRENT_FILE_TESTERS") {
            self.concurrent_file_testers = parse_number("CONCURRENT_FILE_TESTERS", &v)?;
        }
        if let Some(v) = lookup("RUN_FULL_SCAN_ON_START") {
            self.run_full_scan_on_start = parse_bool("RUN_FULL_SCAN_ON_START", &v)?;
        }
        if let Some(v) = lookup("DEBUGGING") {
            self.debugging = parse_bool("DEBUGGING", &v)?;
        }
        Ok(())
    }

    /// Overlay the keys present in a JSON settings file. Unknown keys belong
    /// to other parts of the application and are left alone.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let json_err = |source| SettingsError::Json {
            path: path.to_path_buf(),
            source,
        };
        let overlay: JsonValue = serde_json::from_str(&raw).map_err(json_err)?;
        let mut merged = serde_json::to_value(&*self).map_err(json_err)?;

        if let (JsonValue::Object(base), JsonValue::Object(overlay)) = (&mut merged, overlay) {
            for (key, value) in overlay {
                if base.contains_key(&key) {
                    base.insert(key, value);
                }
            }
        }
        *self = serde_json::from_value(merged).map_err(json_err)?;
        Ok(())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

/// Source of scanner settings. Implementations must return a consistent copy
/// on each call; callers never hold on to a reference.
pub trait SettingsStore: Send + Sync + 'static {
    fn snapshot(&self) -> ScannerSettings;
}

/// In-process settings that can be updated at runtime.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<ScannerSettings>>,
}

impl SharedSettings {
    pub fn new(settings: ScannerSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Mutate the settings in place. Running loops pick the change up on their
    /// next read.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ScannerSettings),
    {
        f(&mut self.inner.write());
    }

    pub fn replace(&self, settings: ScannerSettings) {
        *self.inner.write() = settings;
    }

    /// Re-run [ScannerSettings::load] and swap the result in. Returns whether
    /// anything changed. On error the current settings are kept.
    pub fn reload(&self, config_path: &Path) -> Result<bool, SettingsError> {
        let loaded = ScannerSettings::load(config_path)?;
        let mut current = self.inner.write();
        if *current == loaded {
            return Ok(false);
        }
        *current = loaded;
        Ok(true)
    }
}

/// Re-read `settings.json` every `period` until `cancel` fires, so edits made
/// while the service runs reach the scanner loop.
pub async fn watch_settings_file(
    settings: SharedSettings,
    config_path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match settings.reload(&config_path) {
            Ok(true) => {
                let current = settings.snapshot();
                info!(
                    enabled = current.enable_library_scanner,
                    interval_minutes = current.schedule_full_scan_minutes,
                    "Scanner settings reloaded"
                );
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to reload scanner settings, keeping previous values"),
        }
    }
    debug!("Settings watcher stopped");
}

impl SettingsStore for SharedSettings {
    fn snapshot(&self) -> ScannerSettings {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            ("ENABLE_LIBRARY_SCANNER", "true"),
            ("SCHEDULE_FULL_SCAN_MINUTES", "30"),
            ("CONCURRENT_FILE_TESTERS", "4"),
        ]
        .into_iter()
        .collect();

        let mut settings = ScannerSettings::default();
        settings
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(
            settings,
            ScannerSettings {
                enable_library_scanner: true,
                schedule_full_scan_minutes: 30,
                concurrent_file_testers: 4,
                ..ScannerSettings::default()
            }
        );
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut settings = ScannerSettings::default();
        let err = settings
            .apply_env(|k| (k == "FOLLOW_SYMLINKS").then(|| "sometimes".to_string()))
            .unwrap_err();
        assert_matches!(err, SettingsError::InvalidValue { key: "FOLLOW_SYMLINKS", .. });
    }

    #[test]
    fn test_file_overlays_known_keys_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"schedule_full_scan_minutes": 5, "debugging": true, "ui_port": 8888}"#,
        )
        .unwrap();

        let mut settings = ScannerSettings {
            concurrent_file_testers: 6,
            ..ScannerSettings::default()
        };
        settings.apply_file(&dir.path().join("settings.json")).unwrap();

        assert_eq!(settings.schedule_full_scan_minutes, 5);
        assert!(settings.debugging);
        assert_eq!(settings.concurrent_file_testers, 6);
    }

    #[test]
    fn test_file_parse_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = ScannerSettings::default().apply_file(&path).unwrap_err();
        assert_matches!(err, SettingsError::Json { path: p, .. } if p == path);
    }

    #[test]
    fn test_shared_settings_update_is_visible_to_snapshots() {
        let shared = SharedSettings::default();
        let before = shared.snapshot();
        shared.update(|s| s.schedule_full_scan_minutes = 0);

        assert_eq!(before.schedule_full_scan_minutes, 1440);
        assert_eq!(shared.snapshot().schedule_full_scan_minutes, 0);
    }

    #[tokio::test]
    async fn test_watcher_picks_up_file_edits() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"schedule_full_scan_minutes": 60}"#).unwrap();

        let shared = SharedSettings::new(ScannerSettings::load(dir.path()).unwrap());
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch_settings_file(
            shared.clone(),
            dir.path().to_path_buf(),
            Duration::from_millis(10),
            cancel.clone(),
        ));

        std::fs::write(&file, r#"{"schedule_full_scan_minutes": 0}"#).unwrap();
        let mut reloaded = false;
        for _ in 0..200 {
            if shared.snapshot().schedule_full_scan_minutes == 0 {
                reloaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(reloaded);

        // A broken file keeps the last good values.
        std::fs::write(&file, "{not json").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(shared.snapshot().schedule_full_scan_minutes, 0);

        cancel.cancel();
        watcher.await.unwrap();
    }
}
