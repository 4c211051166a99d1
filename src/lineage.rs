//! Lineage encoding in scratch directory names.
//!
//! Unpack and cleanup run as separate processes that share nothing but the
//! scratch root, so everything cleanup needs is written into the directory
//! name:
//!
//! ```text
//! clam_unpacker_<kind>_<name>_<random>                  the originally requested file
//! clam_unpacker_<kind>-p_<root name>_p-<name>_<random>  an archive found inside it
//! ```
//!
//! `<kind>` is [`FileKind::short_code`], `<root name>` the basename of the
//! file the lineage started from. Only basenames are kept, which is enough to
//! find every directory that belongs to a given original file.
//!
//! Names are not unique across runs. Two concurrent runs on files with the
//! same basename share their directories as far as cleanup can tell, and a
//! root name containing `_p-` (say `a_p-b`) yields nested names that also
//! read as descendants of `a`. Nothing locks the scratch root against either.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::classify::{Classification, FileKind};

/// Marker carried by every directory this crate creates.
pub const TMP_DIR_PREFIX: &str = "clam_unpacker";

/// Length of the random suffix at the end of every scratch directory name.
const RAND_LEN: usize = 8;

const NESTED_MARKER: &str = "-p_";
const PARENT_MARKER: &str = "_p-";

/// The name of a scratch directory, minus its random suffix.
pub fn dir_name_prefix(kind: FileKind, name: &str, root_name: Option<&str>) -> String {
    match root_name {
        None => format!("{TMP_DIR_PREFIX}_{kind}_{name}_"),
        Some(root) => format!("{TMP_DIR_PREFIX}_{kind}{NESTED_MARKER}{root}{PARENT_MARKER}{name}_"),
    }
}

/// Create the scratch directory for `archive` below `parent_dir`.
///
/// `root` is the classification the lineage started from, `None` when
/// `archive` is itself the requested file. The directory is made
/// world-readable so a scanner running as another user can walk it.
pub fn make_temp_dir(archive: &Classification, root: Option<&Classification>, parent_dir: &Path) -> io::Result<PathBuf> {
    let root_name = root.map(Classification::file_name);
    let prefix = dir_name_prefix(archive.kind, &archive.file_name(), root_name.as_deref());

    let dir = tempfile::Builder::new()
        .prefix(&prefix)
        .rand_bytes(RAND_LEN)
        .tempdir_in(parent_dir)?
        .keep();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755))?;
    }

    trace!("Created scratch directory {}", dir.display());
    Ok(dir)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split a scratch directory name into its kind and whatever follows the kind.
fn split_kind(name: &str) -> Option<(FileKind, &str)> {
    let rest = name.strip_prefix(TMP_DIR_PREFIX)?.strip_prefix('_')?;
    FileKind::ALL.iter().find_map(|kind| {
        let tail = rest.strip_prefix(kind.short_code())?;
        (tail.starts_with('_') || tail.starts_with(NESTED_MARKER)).then_some((*kind, tail))
    })
}

/// Recover the kind of archive a scratch directory was created for.
///
/// Anything that was not created by [`make_temp_dir`] decodes as
/// [`FileKind::Unknown`].
pub fn decode_kind(path: &Path) -> FileKind {
    split_kind(&dir_name(path))
        .map(|(kind, _)| kind)
        .unwrap_or(FileKind::Unknown)
}

/// Whether the scratch directory holds an archive found inside another one.
pub fn is_nested(path: &Path) -> bool {
    split_kind(&dir_name(path)).is_some_and(|(_, tail)| tail.starts_with(NESTED_MARKER))
}

/// Whether `path` carries the scratch directory marker at all.
pub fn is_scratch_dir(path: &Path) -> bool {
    dir_name(path).starts_with(TMP_DIR_PREFIX)
}

/// Whether a scratch directory name belongs to the lineage of `root_name`.
fn belongs_to(name: &str, root_name: &str) -> bool {
    let Some((_, tail)) = split_kind(name) else {
        return false;
    };

    if let Some(rest) = tail.strip_prefix(NESTED_MARKER) {
        return rest
            .strip_prefix(root_name)
            .is_some_and(|r| r.starts_with(PARENT_MARKER));
    }

    tail.strip_prefix('_')
        .and_then(|r| r.strip_prefix(root_name))
        .and_then(|r| r.strip_prefix('_'))
        .is_some_and(|suffix| suffix.len() == RAND_LEN)
}

/// Find every scratch directory below `search_root` that was created while
/// unpacking `original`. No matches is a normal outcome.
pub fn find_descendants(original: &Path, search_root: &Path) -> Vec<PathBuf> {
    let root_name = dir_name(original);
    if root_name.is_empty() {
        return Vec::new();
    }

    let pattern = format!(
        "{}/{TMP_DIR_PREFIX}_*_{}_*",
        glob::Pattern::escape(&search_root.to_string_lossy()),
        glob::Pattern::escape(&root_name)
    );
    trace!("Searching for scratch directories matching {pattern}");

    let Ok(paths) = glob::glob(&pattern) else {
        return Vec::new();
    };

    paths
        .filter_map(Result::ok)
        .filter(|p| belongs_to(&dir_name(p), &root_name))
        .collect()
}
