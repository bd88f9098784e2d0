//! Library configuration and the system checks run before a scan pass.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use super::notifications::{FrontendMessage, FrontendMessages};

/// Frontend message id used when the library count limit is exceeded.
pub const LIBRARY_COUNT_LIMIT_MESSAGE: &str = "libraryCountLimitExceeded";

/// A configured media library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enable_scanner: bool,
    /// Library only receives files from remote installations and is never scanned.
    #[serde(default)]
    pub enable_remote_only: bool,
}

fn default_true() -> bool {
    true
}

impl Library {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: path.into(),
            enable_scanner: true,
            enable_remote_only: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LibraryStoreError {
    #[error("library {0} not found")]
    NotFound(Uuid),

    #[error("library store unavailable: {0}")]
    Backend(String),
}

/// Read access to library configuration. Values are fetched fresh on every
/// call so edits show up on the next scan pass.
#[async_trait]
pub trait LibraryStore: Send + Sync + 'static {
    async fn library_ids(&self) -> Result<Vec<Uuid>, LibraryStoreError>;

    async fn get_library(&self, id: Uuid) -> Result<Library, LibraryStoreError>;
}

/// Libraries held in memory, ordered by insertion.
#[derive(Debug, Default)]
pub struct MemoryLibraryStore {
    libraries: RwLock<BTreeMap<usize, Library>>,
}

impl MemoryLibraryStore {
    pub fn new(libraries: impl IntoIterator<Item = Library>) -> Self {
        let store = Self::default();
        for library in libraries {
            store.insert(library);
        }
        store
    }

    /// Add a library, replacing any existing one with the same id.
    pub fn insert(&self, library: Library) {
        let mut guard = self.libraries.write();
        let existing = guard
            .iter()
            .find(|(_, l)| l.id == library.id)
            .map(|(k, _)| *k);
        let key = existing.unwrap_or_else(|| guard.keys().next_back().map_or(0, |k| k + 1));
        guard.insert(key, library);
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut guard = self.libraries.write();
        let key = guard.iter().find(|(_, l)| l.id == id).map(|(k, _)| *k);
        key.and_then(|k| guard.remove(&k)).is_some()
    }

    pub fn len(&self) -> usize {
        self.libraries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.read().is_empty()
    }
}

#[async_trait]
impl LibraryStore for MemoryLibraryStore {
    async fn library_ids(&self) -> Result<Vec<Uuid>, LibraryStoreError> {
        Ok(self.libraries.read().values().map(|l| l.id).collect())
    }

    async fn get_library(&self, id: Uuid) -> Result<Library, LibraryStoreError> {
        self.libraries
            .read()
            .values()
            .find(|l| l.id == id)
            .cloned()
            .ok_or(LibraryStoreError::NotFound(id))
    }
}

/// Libraries read from a JSON array on disk. The file is re-read on every
/// call; a missing file means no libraries.
#[derive(Debug, Clone)]
pub struct JsonLibraryStore {
    path: PathBuf,
}

impl JsonLibraryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<Vec<Library>, LibraryStoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LibraryStoreError::Backend(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        serde_json::from_str(&raw)
            .map_err(|e| LibraryStoreError::Backend(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl LibraryStore for JsonLibraryStore {
    async fn library_ids(&self) -> Result<Vec<Uuid>, LibraryStoreError> {
        Ok(self.load().await?.into_iter().map(|l| l.id).collect())
    }

    async fn get_library(&self, id: Uuid) -> Result<Library, LibraryStoreError> {
        self.load()
            .await?
            .into_iter()
            .find(|l| l.id == id)
            .ok_or(LibraryStoreError::NotFound(id))
    }
}

/// Check run before every scan pass. A failing check skips the whole pass.
#[async_trait]
pub trait SystemValidator: Send + Sync + 'static {
    async fn is_valid(&self) -> bool;
}

/// Accepts every configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

#[async_trait]
impl SystemValidator for PermissiveValidator {
    async fn is_valid(&self) -> bool {
        true
    }
}

/// Refuses to scan while more libraries are configured than allowed and
/// tells the user why through the frontend.
pub struct LibraryCountValidator {
    libraries: Arc<dyn LibraryStore>,
    messages: Arc<FrontendMessages>,
    max_libraries: usize,
}

impl LibraryCountValidator {
    pub fn new(
        libraries: Arc<dyn LibraryStore>,
        messages: Arc<FrontendMessages>,
        max_libraries: usize,
    ) -> Self {
        Self {
            libraries,
            messages,
            max_libraries,
        }
    }
}

#[async_trait]
impl SystemValidator for LibraryCountValidator {
    async fn is_valid(&self) -> bool {
        let count = match self.libraries.library_ids().await {
            Ok(ids) => ids.len(),
            Err(e) => {
                warn!(error = %e, "Unable to count libraries");
                return false;
            }
        };
        if count > self.max_libraries {
            self.messages.update(FrontendMessage::warning(
                LIBRARY_COUNT_LIMIT_MESSAGE,
                format!(
                    "{} libraries are configured but only {} are allowed",
                    count, self.max_libraries
                ),
            ));
            return false;
        }
        self.messages.remove_item(LIBRARY_COUNT_LIMIT_MESSAGE);
        true
    }
}
