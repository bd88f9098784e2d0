//! Directory traversal for library scans.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

/// Options for a single walk.
#[derive(Debug, Clone, Copy, Default)]
pub struct WalkOptions {
    pub follow_symlinks: bool,
    /// Log every directory entered.
    pub debugging: bool,
}

/// Blocking directory walker. Runs on the blocking thread pool.
///
/// `visit` is called once per regular file. Symlinks to files are always
/// visited; `follow_symlinks` only decides whether symlinked directories are
/// descended into. Returning [ControlFlow::Break] abandons the rest of the
/// walk.
pub trait LibraryWalker: Send + Sync + 'static {
    fn walk(
        &self,
        root: &Path,
        options: WalkOptions,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    );
}

/// [LibraryWalker] backed by `walkdir`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkDirWalker;

impl LibraryWalker for WalkDirWalker {
    fn walk(
        &self,
        root: &Path,
        options: WalkOptions,
        visit: &mut dyn FnMut(PathBuf) -> ControlFlow<()>,
    ) {
        for entry in WalkDir::new(root).follow_links(options.follow_symlinks) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Skipping unreadable library entry");
                    continue;
                }
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                if options.debugging {
                    debug!(path = %entry.path().display(), "Scanning directory");
                }
                continue;
            }
            let is_file = if file_type.is_symlink() {
                // Only reached when links are not followed.
                std::fs::metadata(entry.path()).is_ok_and(|meta| meta.is_file())
            } else {
                file_type.is_file()
            };
            if !is_file {
                continue;
            }
            if visit(entry.into_path()).is_break() {
                return;
            }
        }
    }
}
