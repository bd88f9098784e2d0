//! Minimal CLI parsing for start-up overrides.

use std::env;
use std::path::PathBuf;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliOptions {
    /// Queue a full scan as soon as the scanner starts.
    pub scan_now: bool,
    pub config_path: Option<PathBuf>,
}

impl CliOptions {
    pub fn from_args() -> Self {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = CliOptions::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--scan-now" => options.scan_now = true,
                "--config-path" => {
                    if let Some(value) = args.next() {
                        options.config_path = Some(PathBuf::from(value));
                    }
                }
                _ if arg.starts_with("--config-path=") => {
                    if let Some(value) = arg.split_once('=').map(|(_, v)| v) {
                        options.config_path = Some(PathBuf::from(value));
                    }
                }
                _ => {}
            }
        }
        options
    }
}
