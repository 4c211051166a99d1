//! File classification.
//!
//! A [`Classification`] records what kind of file lives at a path and how big
//! it is. Everything except "directory", "missing" and "not a regular file" is
//! decided by the content sniffer's description string.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{trace, warn};

use crate::size::format_size;
use crate::tools::Sniffer;

pub const DIRECTORY_DESC: &str = "Directory";
pub const UNKNOWN_DESC: &str = "Unknown file type";
pub const DOES_NOT_EXIST_DESC: &str = "File does not exist";

/// The fixed set of file kinds the unpacker knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    // OVA files sniff as tar too
    Tar,
    Zip,
    Iso,
    Vmdk,
    GzTar,
    Qcow2,
    Dir,
    DoesNotExist,
    Unknown,
}

impl FileKind {
    pub const ALL: [FileKind; 9] = [
        FileKind::Tar,
        FileKind::Zip,
        FileKind::Iso,
        FileKind::Vmdk,
        FileKind::GzTar,
        FileKind::Qcow2,
        FileKind::Dir,
        FileKind::DoesNotExist,
        FileKind::Unknown,
    ];

    /// Stable token used when encoding lineage into scratch directory names.
    pub fn short_code(&self) -> &'static str {
        match self {
            FileKind::Tar => "tar",
            FileKind::Zip => "zip",
            FileKind::Iso => "iso",
            FileKind::Vmdk => "vmdk",
            // not "tar.gz", which would be caught by "tar" during decoding
            FileKind::GzTar => "tgz",
            FileKind::Qcow2 => "qcow2",
            FileKind::Dir => "dir",
            FileKind::DoesNotExist => "missing",
            FileKind::Unknown => "unknown",
        }
    }

    /// Map a content-sniffer description to a kind.
    pub fn from_description(desc: &str) -> FileKind {
        const PREFIXES: [(&str, FileKind); 6] = [
            ("POSIX tar archive", FileKind::Tar),
            ("Zip archive data", FileKind::Zip),
            ("ISO 9660 CD-ROM filesystem data", FileKind::Iso),
            ("VMware4 disk image", FileKind::Vmdk),
            ("gzip compressed data", FileKind::GzTar),
            ("QEMU QCOW2 Image", FileKind::Qcow2),
        ];

        PREFIXES
            .iter()
            .find(|(prefix, _)| desc.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .unwrap_or(FileKind::Unknown)
    }

    /// Whether the unpack engine has a strategy for this kind.
    pub fn is_unpackable(&self) -> bool {
        !matches!(self, FileKind::DoesNotExist | FileKind::Unknown)
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_code())
    }
}

/// What was found at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub path: PathBuf,
    pub kind: FileKind,
    pub description: String,
    pub size: u64,
}

impl Classification {
    pub fn new(path: impl Into<PathBuf>, kind: FileKind, description: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            description: description.into(),
            size,
        }
    }

    /// The final path component, used for lineage names and labels.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path: {}", self.path.display())?;
        writeln!(f, "Description: {}", self.description)?;
        writeln!(f, "Size: {}", format_size(self.size))?;
        write!(f, "Filetype: {}", self.kind)
    }
}

/// Classify whatever lives at `path`.
///
/// Never fails: missing paths, directories and special files are reported
/// through the kind, and a sniffer failure degrades to [`FileKind::Unknown`].
pub async fn classify(path: &Path, sniffer: &dyn Sniffer) -> Classification {
    // Broken symlinks count as missing
    let Ok(meta) = fs::metadata(path).await else {
        return Classification::new(path, FileKind::DoesNotExist, DOES_NOT_EXIST_DESC, 0);
    };

    if meta.is_dir() {
        return Classification::new(path, FileKind::Dir, DIRECTORY_DESC, 0);
    }

    let is_regular = fs::symlink_metadata(path)
        .await
        .map(|m| m.file_type().is_file())
        .unwrap_or(false);
    if !is_regular {
        return Classification::new(path, FileKind::Unknown, UNKNOWN_DESC, 0);
    }

    let description = match sniffer.sniff(path).await {
        Ok(desc) => desc,
        Err(e) => {
            warn!("Unable to determine the type of {}: {e}", path.display());
            UNKNOWN_DESC.to_string()
        }
    };
    let kind = FileKind::from_description(&description);
    trace!("Classified {} as {kind}", path.display());

    Classification::new(path, kind, description, meta.len())
}
