//! Error types shared across the unpack and cleanup engines.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::classify::FileKind;

/// Failure while turning a human-readable size such as `2G` into bytes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    /// No unit character was found and the whole input is not a plain number.
    #[error("invalid filesize unit in {0}")]
    InvalidUnit(String),

    /// A unit character was found but the text in front of it is not a number.
    #[error("{0} is not a valid number")]
    InvalidNumber(String),

    /// The size does not fit in 64 bits.
    #[error("{0} is too large")]
    Overflow(String),
}

/// Failure reported by one of the external tools (mount helpers, guest
/// filesystem tools, the content sniffer or the scanner).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with status {code:?}: {output}")]
    Failed {
        program: String,
        code: Option<i32>,
        output: String,
    },
}

/// Mount and unmount failures are reported by the tools that perform them.
pub type MountError = ToolError;

/// Failure while extracting an archive into its scratch directory.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("an io error occurred: {0}")]
    Io(#[from] io::Error),

    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive entry {0} would be written outside the destination")]
    UnsafePath(String),

    #[error("the extraction task was cancelled")]
    Cancelled,
}

/// Errors raised while unpacking a single archive.
#[derive(Debug, Error)]
pub enum UnpackError {
    #[error("unhandled file type: {0}")]
    Unhandled(FileKind),

    #[error("could not create a scratch directory under {}", path.display())]
    TempDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to unpack {}, got the following error: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("unable to mount {}: {source}", path.display())]
    Mount {
        path: PathBuf,
        #[source]
        source: MountError,
    },
}

/// Errors raised while tearing down a scratch directory.
#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("unhandled file type {kind} for {}", path.display())]
    Unresolvable { path: PathBuf, kind: FileKind },

    #[error("unable to un-mount from {}", path.display())]
    Mount {
        path: PathBuf,
        #[source]
        source: MountError,
    },

    #[error("unable to remove {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
