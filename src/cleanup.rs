//! The cleanup engine.
//!
//! Cleanup runs without any memory of the unpack that preceded it: the kind
//! of every scratch directory, and so how to tear it down, is read back from
//! the directory name.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{Instrument, Span, debug, warn};

use crate::classify::FileKind;
use crate::error::CleanupError;
use crate::lineage;
use crate::tools::Toolbox;

pub struct CleanupEngine {
    tools: Toolbox,
    span: Span,
}

impl CleanupEngine {
    /// `span` is entered for all of the engine's work.
    pub fn new(tools: Toolbox, span: Span) -> Self {
        Self { tools, span }
    }

    /// Tear down one scratch directory.
    pub async fn cleanup_path(&self, path: &Path) -> Result<(), CleanupError> {
        self.teardown(path).instrument(self.span.clone()).await
    }

    /// Tear down the first scratch directory found for `original`.
    pub async fn cleanup_file(&self, original: &Path, tmp_root: &Path) -> Result<(), CleanupError> {
        async {
            let Some(first) = lineage::find_descendants(original, tmp_root).into_iter().next() else {
                debug!("No associated directories found for {}", original.display());
                return Ok(());
            };

            debug!("Found an associated directory for {}", original.display());
            self.teardown(&first).await
        }
        .instrument(self.span.clone())
        .await
    }

    /// Tear down every scratch directory found for `original`.
    ///
    /// Directories of nested archives go before those of the original file,
    /// since a nested image may be mounted from a file inside its ancestor.
    /// A directory that cannot be torn down does not stop the others; the
    /// first failure is returned once all of them were tried.
    pub async fn cleanup_recursive(&self, original: &Path, tmp_root: &Path) -> Result<(), CleanupError> {
        async {
            let mut dirs = lineage::find_descendants(original, tmp_root);
            if dirs.is_empty() {
                debug!("No associated directories found for {}", original.display());
                return Ok(());
            }

            debug!("Found {} associated directories for {}", dirs.len(), original.display());
            dirs.sort_by_key(|dir| !lineage::is_nested(dir));

            let mut first_error = None;
            for dir in &dirs {
                debug!("Cleaning up {}", dir.display());
                if let Err(e) = self.teardown(dir).await {
                    warn!("{e}, continuing with the remaining directories");
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn teardown(&self, path: &Path) -> Result<(), CleanupError> {
        match lineage::decode_kind(path) {
            FileKind::Tar | FileKind::Zip | FileKind::GzTar => {
                debug!("Cleaning up {} by deleting it", path.display());
                remove(path).await
            }
            FileKind::Iso => {
                debug!("Cleaning up {} by un-mounting it", path.display());
                self.tools
                    .loop_mounter
                    .unmount(path)
                    .await
                    .map_err(|source| CleanupError::Mount { path: path.to_path_buf(), source })?;
                remove(path).await
            }
            FileKind::Vmdk | FileKind::Qcow2 => self.teardown_guest(path).await,
            kind => Err(CleanupError::Unresolvable { path: path.to_path_buf(), kind }),
        }
    }

    /// Unmount every partition; the directory only goes once all of them are
    /// released.
    async fn teardown_guest(&self, path: &Path) -> Result<(), CleanupError> {
        debug!("Cleaning up {} by un-mounting all underlying partitions", path.display());

        let mut all_unmounted = true;
        for dir in top_level_dirs(path).await? {
            debug!("Un-mounting {}", dir.display());
            if let Err(e) = self.tools.guestfs.unmount_partition(&dir).await {
                warn!("Unable to unmount {}, continuing anyway: {e}", dir.display());
                all_unmounted = false;
            }
        }

        if !all_unmounted {
            warn!("Unable to un-mount all partitions of {}, leaving it in place", path.display());
            return Ok(());
        }
        remove(path).await
    }
}

async fn top_level_dirs(path: &Path) -> Result<Vec<PathBuf>, CleanupError> {
    let io_error = |source: io::Error| CleanupError::Io { path: path.to_path_buf(), source };

    let mut entries = match tokio::fs::read_dir(path).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_error(e)),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        if entry.file_type().await.map_err(io_error)?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

async fn remove(path: &Path) -> Result<(), CleanupError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CleanupError::Io { path: path.to_path_buf(), source }),
    }
}
