//! # unpackscan
//!
//! Recursively unpacks nested archives and disk images into a scratch
//! directory so that a malware scanner can inspect the fully expanded
//! contents, and cleans up afterwards.
//!
//! Tar, gzipped tar and zip archives are extracted in-process, ISO images
//! are loop-mounted, and VMDK/QCOW2 virtual disks have every partition
//! mounted through the libguestfs tools. Cleanup keeps no state between
//! runs: the kind of every scratch directory and the file it came from are
//! encoded in the directory name, see [`lineage`].
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use tracing::info_span;
//! use unpackscan::{CleanupEngine, Toolbox, UnpackEngine, UnpackOptions};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let options = UnpackOptions::default();
//!     let unpacker = UnpackEngine::new(Toolbox::system(), info_span!("unpack"));
//!
//!     let root = unpacker.classify(Path::new("/data/disk.vmdk")).await;
//!     let tree = unpacker.unpack_recursive(root, &options).await?;
//!     print!("{tree}");
//!
//!     let cleaner = CleanupEngine::new(Toolbox::system(), info_span!("cleanup"));
//!     cleaner.cleanup_recursive(Path::new("/data/disk.vmdk"), &options.tmp_root).await?;
//!     Ok(())
//! }
//! ```

pub mod classify;
pub mod cleanup;
pub mod cli;
pub mod context;
pub mod error;
pub mod extract;
pub mod lineage;
pub mod logging;
pub mod scan;
pub mod size;
pub mod tools;
pub mod unpack;

pub use classify::{Classification, FileKind, classify};
pub use cleanup::CleanupEngine;
pub use cli::Cli;
pub use context::{ContextId, UnpackContext, UnpackTree};
pub use error::{CleanupError, ExtractError, MountError, SizeError, ToolError, UnpackError};
pub use extract::{ArchiveFormat, NativeExtractor};
pub use scan::{ScanOptions, ScanOutcome, ScanSummary, Verdict, scan_contexts};
pub use size::{format_size, parse_size};
pub use tools::{ClamdScanner, Extractor, GuestFs, LoopMounter, Scanner, Sniffer, Toolbox};
pub use unpack::{UnpackEngine, UnpackOptions};
