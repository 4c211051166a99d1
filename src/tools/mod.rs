//! Seams to the external programs the unpacker drives.
//!
//! Each collaborator is a trait so the engines can be exercised without root,
//! loop devices or libguestfs. [`Toolbox::system`] wires up the real
//! command-line tools.

mod system;

pub use system::{ClamdScanner, FileCommandSniffer, GuestMountTools, LoopMountTools};

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ExtractError, MountError, ToolError};
use crate::extract::{ArchiveFormat, NativeExtractor};
use crate::scan::ScanOutcome;

/// Describes file contents, the way libmagic does.
#[async_trait]
pub trait Sniffer: Send + Sync {
    async fn sniff(&self, path: &Path) -> Result<String, ToolError>;
}

/// Extracts an archive into an existing directory.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, archive: &Path, dest: &Path, format: ArchiveFormat) -> Result<(), ExtractError>;
}

/// Read-only loopback mounts for optical disc images.
#[async_trait]
pub trait LoopMounter: Send + Sync {
    async fn mount_readonly(&self, image: &Path, mount_point: &Path) -> Result<(), MountError>;

    async fn unmount(&self, mount_point: &Path) -> Result<(), MountError>;
}

/// Access to the partitions inside a virtual disk image.
#[async_trait]
pub trait GuestFs: Send + Sync {
    /// List the mountable filesystems inside `image`, e.g. `/dev/sda1`.
    async fn list_partitions(&self, image: &Path) -> Result<Vec<String>, MountError>;

    /// Mount one partition of `image` read-only onto the existing directory `dir`.
    async fn mount_partition(&self, image: &Path, partition: &str, dir: &Path) -> Result<(), MountError>;

    /// Unmount `dir`. Must succeed without doing anything if `dir` is not mounted.
    async fn unmount_partition(&self, dir: &Path) -> Result<(), MountError>;
}

/// The malware scanner.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, path: &Path, all_match: bool) -> Result<ScanOutcome, ToolError>;
}

/// The set of collaborators the unpack and cleanup engines work with.
#[derive(Clone)]
pub struct Toolbox {
    pub sniffer: Arc<dyn Sniffer>,
    pub extractor: Arc<dyn Extractor>,
    pub loop_mounter: Arc<dyn LoopMounter>,
    pub guestfs: Arc<dyn GuestFs>,
}

impl Toolbox {
    /// Collaborators backed by `file`, `mount`/`umount` and the libguestfs tools.
    pub fn system() -> Self {
        Self {
            sniffer: Arc::new(FileCommandSniffer),
            extractor: Arc::new(NativeExtractor),
            loop_mounter: Arc::new(LoopMountTools),
            guestfs: Arc::new(GuestMountTools),
        }
    }
}
