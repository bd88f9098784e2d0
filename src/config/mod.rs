//! Application configuration management

pub mod settings;

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub use settings::{
    ScannerSettings, SettingsError, SettingsStore, SharedSettings, watch_settings_file,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `settings.json`
    pub config_path: PathBuf,

    /// JSON file listing the configured libraries
    pub libraries_file: PathBuf,

    /// Emit logs as JSON lines instead of the human readable format
    pub log_json: bool,

    /// Upper bound on configured libraries before scanning is refused
    pub max_libraries: Option<usize>,

    /// Seconds between re-reads of `settings.json`; 0 disables reloading
    pub settings_reload_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config_path = env::var("LIBRARIAN_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let libraries_file = env::var("LIBRARIAN_LIBRARIES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_path.join("libraries.json"));

        let max_libraries = match env::var("MAX_LIBRARY_COUNT") {
            Ok(v) => Some(v.parse().context("Invalid MAX_LIBRARY_COUNT")?),
            Err(_) => None,
        };

        let settings_reload_secs = env::var("SETTINGS_RELOAD_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .context("Invalid SETTINGS_RELOAD_SECONDS")?;

        Ok(Self {
            config_path,
            libraries_file,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
            max_libraries,
            settings_reload_secs,
        })
    }

    /// Point the config at a different settings directory. The libraries file
    /// follows unless it was set explicitly.
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        if self.libraries_file == self.config_path.join("libraries.json") {
            self.libraries_file = path.join("libraries.json");
        }
        self.config_path = path;
        self
    }

    /// Full path of the scanner settings file.
    pub fn settings_file(&self) -> PathBuf {
        self.config_path.join("settings.json")
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("librarian"))
        .unwrap_or_else(|| PathBuf::from("./data/config"))
}
