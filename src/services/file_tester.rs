//! File classification used by scan workers.
//!
//! A [FileTester] decides whether a discovered file needs processing and how
//! urgently. The scanner treats the score as an opaque ranking.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Media file extensions we recognize
const MEDIA_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "m4v", "mov", "wmv", "flv", "webm", "mpeg", "mpg", "ts", "m2ts", "flac",
    "mp3", "m4a", "m4b", "ogg", "opus", "wav",
];

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Outcome of testing one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestVerdict {
    Accept { priority_score: i64 },
    Reject,
}

#[derive(Debug, Error)]
pub enum FileTestError {
    #[error("failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("classifier failed for {path}: {reason}")]
    Classifier { path: PathBuf, reason: String },
}

/// Decides whether a file should be queued for processing.
#[async_trait]
pub trait FileTester: Send + Sync + 'static {
    async fn test(&self, path: &Path, library_id: Uuid) -> Result<TestVerdict, FileTestError>;
}

/// Accepts files with a known media extension. Larger files score higher.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionFileTester;

impl ExtensionFileTester {
    fn is_media(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| MEDIA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false)
    }
}

#[async_trait]
impl FileTester for ExtensionFileTester {
    async fn test(&self, path: &Path, _library_id: Uuid) -> Result<TestVerdict, FileTestError> {
        if !Self::is_media(path) {
            return Ok(TestVerdict::Reject);
        }
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| FileTestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let priority_score = i64::try_from(metadata.len() / BYTES_PER_MIB).unwrap_or(i64::MAX);
        Ok(TestVerdict::Accept { priority_score })
    }
}
