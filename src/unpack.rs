//! The unpack engine.
//!
//! Each [`FileKind`] maps to one strategy: archives are extracted, optical
//! images are loop-mounted, virtual disks have each partition mounted
//! through the guest filesystem tools, and directories are used in place.

use std::path::{Path, PathBuf};

use tracing::{Instrument, Span, debug, info, trace, warn};
use walkdir::WalkDir;

use crate::classify::{self, Classification, FileKind};
use crate::context::{ContextId, UnpackContext, UnpackTree};
use crate::error::UnpackError;
use crate::extract::ArchiveFormat;
use crate::lineage;
use crate::size::format_size;
use crate::tools::Toolbox;

/// Files below this size are not unpacked unless asked otherwise.
pub const DEFAULT_MIN_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Where scratch directories go unless asked otherwise.
pub const DEFAULT_TMP_ROOT: &str = "/tmp";

/// Settings for a recursive unpack.
#[derive(Debug, Clone)]
pub struct UnpackOptions {
    /// Archives smaller than this are left alone during the walk.
    pub min_size: u64,
    /// Scratch root every temporary directory is created in.
    pub tmp_root: PathBuf,
}

impl Default for UnpackOptions {
    fn default() -> Self {
        Self {
            min_size: DEFAULT_MIN_SIZE,
            tmp_root: PathBuf::from(DEFAULT_TMP_ROOT),
        }
    }
}

/// Partition names such as `/dev/sda1` become `++dev++sda1`.
pub fn partition_dir_name(partition: &str) -> String {
    partition.replace('/', "++")
}

pub struct UnpackEngine {
    tools: Toolbox,
    span: Span,
}

impl UnpackEngine {
    /// `span` is entered for all of the engine's work.
    pub fn new(tools: Toolbox, span: Span) -> Self {
        Self { tools, span }
    }

    pub async fn classify(&self, path: &Path) -> Classification {
        classify::classify(path, self.tools.sniffer.as_ref())
            .instrument(self.span.clone())
            .await
    }

    /// Unpack a single file or directory into `tmp_root`.
    pub async fn unpack(&self, classification: Classification, tmp_root: &Path) -> Result<UnpackContext, UnpackError> {
        let mut context = UnpackContext::new(classification, tmp_root, None);
        self.unpack_context(&mut context, None)
            .instrument(self.span.clone())
            .await?;
        Ok(context)
    }

    /// Unpack `root`, then every archive found inside it, until nothing new
    /// turns up.
    ///
    /// Corrupt archives found during the walk are skipped. Failure to unpack
    /// `root` itself, or to mount anything, aborts the walk.
    pub async fn unpack_recursive(&self, root: Classification, options: &UnpackOptions) -> Result<UnpackTree, UnpackError> {
        self.walk(root, options).instrument(self.span.clone()).await
    }

    async fn walk(&self, root: Classification, options: &UnpackOptions) -> Result<UnpackTree, UnpackError> {
        let mut root_context = UnpackContext::new(root, &options.tmp_root, None);
        self.unpack_context(&mut root_context, None).await?;

        let lineage_root = root_context.classification.clone();
        let mut tree = UnpackTree::new(root_context);
        let mut pending = vec![ContextId::ROOT];

        while let Some(id) = pending.pop() {
            let Some(dir) = tree[id].contents_dir().map(Path::to_path_buf) else {
                continue;
            };
            debug!("Analyzing {} for additional archives", tree.lineage_label(id));

            for path in regular_files(&dir, &options.tmp_root) {
                let classification = self.classify(&path).await;
                if !is_candidate(&classification, options.min_size) {
                    continue;
                }

                debug!("Found archive:\n{classification}");
                let mut child = UnpackContext::new(classification, &options.tmp_root, Some(id));
                match self.unpack_context(&mut child, Some(&lineage_root)).await {
                    Ok(()) => pending.push(tree.push(child)),
                    Err(e @ UnpackError::Archive { .. }) => warn!("{e}. Continuing anyway"),
                    Err(e) => return Err(e),
                }
            }
        }

        info!("Unpacked {} archive(s) from {}", tree.len(), tree.root().source_path().display());
        Ok(tree)
    }

    async fn unpack_context(&self, context: &mut UnpackContext, lineage_root: Option<&Classification>) -> Result<(), UnpackError> {
        let format = match context.kind() {
            FileKind::Tar => ArchiveFormat::Tar,
            FileKind::Zip => ArchiveFormat::Zip,
            FileKind::GzTar => ArchiveFormat::GzTar,
            FileKind::Iso => return self.mount_iso(context, lineage_root).await,
            FileKind::Vmdk | FileKind::Qcow2 => return self.mount_guest(context, lineage_root).await,
            FileKind::Dir => {
                trace!("Using directory {} in place", context.source_path().display());
                return Ok(());
            }
            other => return Err(UnpackError::Unhandled(other)),
        };

        let dir = create_temp_dir(context, lineage_root)?;
        let source = context.source_path().to_path_buf();

        if let Err(e) = self.tools.extractor.extract(&source, &dir, format).await {
            discard(context);
            return Err(UnpackError::Archive { path: source, source: e });
        }

        debug!("Extracted {} into {}", source.display(), dir.display());
        Ok(())
    }

    async fn mount_iso(&self, context: &mut UnpackContext, lineage_root: Option<&Classification>) -> Result<(), UnpackError> {
        let dir = create_temp_dir(context, lineage_root)?;
        let image = context.source_path().to_path_buf();

        if let Err(e) = self.tools.loop_mounter.mount_readonly(&image, &dir).await {
            discard(context);
            return Err(UnpackError::Mount { path: image, source: e });
        }

        debug!("Mounted {} on {}", image.display(), dir.display());
        Ok(())
    }

    /// Mount every partition of a virtual disk into its own subdirectory.
    ///
    /// A partition that fails to mount is skipped; images often carry swap
    /// or other partitions that have no filesystem to mount.
    async fn mount_guest(&self, context: &mut UnpackContext, lineage_root: Option<&Classification>) -> Result<(), UnpackError> {
        let dir = create_temp_dir(context, lineage_root)?;
        let image = context.source_path().to_path_buf();

        let partitions = match self.tools.guestfs.list_partitions(&image).await {
            Ok(partitions) => partitions,
            Err(e) => {
                discard(context);
                return Err(UnpackError::Mount { path: image, source: e });
            }
        };

        let mut mounted = 0;
        for partition in &partitions {
            let mount_point = dir.join(partition_dir_name(partition));
            if let Err(e) = tokio::fs::create_dir(&mount_point).await {
                warn!("Unable to create {} for partition {partition}: {e}", mount_point.display());
                continue;
            }

            match self.tools.guestfs.mount_partition(&image, partition, &mount_point).await {
                Ok(()) => {
                    trace!("Mounted {partition} of {} on {}", image.display(), mount_point.display());
                    mounted += 1;
                }
                Err(e) => {
                    warn!("Unable to mount partition {partition} of {}: {e}", image.display());
                    if let Err(e) = tokio::fs::remove_dir(&mount_point).await {
                        warn!("Unable to remove {}: {e}", mount_point.display());
                    }
                }
            }
        }

        debug!("Mounted {mounted} of {} partition(s) from {}", partitions.len(), image.display());
        Ok(())
    }
}

fn create_temp_dir(context: &mut UnpackContext, lineage_root: Option<&Classification>) -> Result<PathBuf, UnpackError> {
    let enclosing = context.enclosing_dir.clone();
    context
        .create_temp_dir(lineage_root)
        .map(Path::to_path_buf)
        .map_err(|source| UnpackError::TempDir { path: enclosing, source })
}

/// Drop the scratch directory of a context that failed to unpack.
fn discard(context: &mut UnpackContext) {
    if let Err(e) = context.cleanup_tmp() {
        warn!("Unable to remove scratch directory for {}: {e}", context.source_path().display());
    }
}

/// Whether a file found during the walk should be unpacked.
fn is_candidate(classification: &Classification, min_size: u64) -> bool {
    if classification.size < min_size {
        trace!("{} is too small, moving on", classification.path.display());
        return false;
    }
    if !classification.kind.is_unpackable() {
        warn!(
            "Ignoring unhandled large file: {} ({})",
            classification.path.display(),
            format_size(classification.size)
        );
        return false;
    }
    true
}

/// Every regular file below `dir`.
///
/// Below `dir` itself, the scratch root `skip` and any scratch directory are
/// not entered; their contents belong to contexts of their own.
fn regular_files(dir: &Path, skip: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.path() == skip || (entry.file_type().is_dir() && lineage::is_scratch_dir(entry.path())))
        })
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Unable to read part of {}: {e}", dir.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names_lose_their_slashes() {
        assert_eq!(partition_dir_name("/dev/sda1"), "++dev++sda1");
        assert_eq!(partition_dir_name("/dev/vg0/lv_root"), "++dev++vg0++lv_root");
        assert_eq!(partition_dir_name("btrfsvol:/dev/sda2/@"), "btrfsvol:++dev++sda2++@");
    }

    #[test]
    fn candidates_need_a_known_kind_and_enough_bytes() {
        let c = |kind, size| Classification::new("/x/f", kind, "test", size);
        assert!(is_candidate(&c(FileKind::Tar, 10), 10));
        assert!(!is_candidate(&c(FileKind::Tar, 9), 10));
        assert!(!is_candidate(&c(FileKind::Unknown, 10), 10));
        assert!(!is_candidate(&c(FileKind::Unknown, 1), 10));
    }

    #[test]
    fn walk_skips_the_scratch_root() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(scratch.join("inner")).unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/one"), b"1").unwrap();
        std::fs::write(dir.path().join("two"), b"2").unwrap();
        std::fs::write(scratch.join("inner/three"), b"3").unwrap();

        let mut files = regular_files(dir.path(), &scratch);
        files.sort();
        assert_eq!(files, vec![dir.path().join("a/b/one"), dir.path().join("two")]);
    }

    #[test]
    fn walk_enters_a_root_that_is_the_scratch_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.tar"), b"a").unwrap();
        let leftover = dir.path().join("clam_unpacker_tar_old.tar_abcdefgh");
        std::fs::create_dir(&leftover).unwrap();
        std::fs::write(leftover.join("inside"), b"x").unwrap();

        assert_eq!(regular_files(dir.path(), dir.path()), vec![dir.path().join("a.tar")]);
        assert_eq!(regular_files(&leftover, dir.path()), vec![leftover.join("inside")]);
    }
}
