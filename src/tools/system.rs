use std::ffi::OsStr;
use std::path::Path;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::trace;

use super::{GuestFs, LoopMounter, Scanner, Sniffer};
use crate::error::{MountError, ToolError};
use crate::scan::{ScanOutcome, Verdict};

/// Run `program` to completion, capturing its output.
async fn run<I, S>(program: &str, args: I) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    trace!("Running {cmd:?}");

    cmd.output().await.map_err(|source| ToolError::Spawn {
        program: program.to_string(),
        source,
    })
}

fn combined_output(output: &Output) -> String {
    format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    )
}

/// Run `program` and turn a non-zero exit into an error.
async fn run_checked<I, S>(program: &str, args: I) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args).await?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(ToolError::Failed {
            program: program.to_string(),
            code: output.status.code(),
            output: combined_output(&output),
        })
    }
}

fn non_empty_lines(bytes: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Uses `file -b` (libmagic) to describe file contents.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileCommandSniffer;

#[async_trait]
impl Sniffer for FileCommandSniffer {
    async fn sniff(&self, path: &Path) -> Result<String, ToolError> {
        let output = run_checked("file", [OsStr::new("-b"), OsStr::new("--"), path.as_os_str()]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }
}

/// Loopback mounts through `mount -o loop` and `umount`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopMountTools;

#[async_trait]
impl LoopMounter for LoopMountTools {
    async fn mount_readonly(&self, image: &Path, mount_point: &Path) -> Result<(), MountError> {
        run_checked(
            "mount",
            [
                OsStr::new("-r"),
                OsStr::new("-o"),
                OsStr::new("loop"),
                image.as_os_str(),
                mount_point.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        run_checked("umount", [mount_point]).await?;
        Ok(())
    }
}

/// Guest filesystem access through the libguestfs command-line tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct GuestMountTools;

impl GuestMountTools {
    /// Whether `dir` currently has a FUSE filesystem mounted on it.
    async fn is_fuse_mounted(dir: &Path) -> bool {
        let output = match run_checked("mount", ["-t", "fuse"]).await {
            Ok(output) => output,
            Err(e) => {
                trace!("Unable to enumerate fuse mounts: {e}");
                return false;
            }
        };

        let needle = format!(" on {} type ", dir.display());
        non_empty_lines(&output.stdout).iter().any(|m| m.contains(&needle))
    }
}

#[async_trait]
impl GuestFs for GuestMountTools {
    async fn list_partitions(&self, image: &Path) -> Result<Vec<String>, MountError> {
        let output = run_checked("virt-filesystems", [OsStr::new("-a"), image.as_os_str()]).await?;
        Ok(non_empty_lines(&output.stdout))
    }

    async fn mount_partition(&self, image: &Path, partition: &str, dir: &Path) -> Result<(), MountError> {
        run_checked(
            "guestmount",
            [
                OsStr::new("-o"),
                OsStr::new("allow_other"),
                OsStr::new("-a"),
                image.as_os_str(),
                OsStr::new("-m"),
                OsStr::new(partition),
                OsStr::new("--ro"),
                dir.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn unmount_partition(&self, dir: &Path) -> Result<(), MountError> {
        if !Self::is_fuse_mounted(dir).await {
            trace!("Partition {} is not mounted, skipping unmount", dir.display());
            return Ok(());
        }

        run_checked("guestunmount", [OsStr::new("--no-retry"), dir.as_os_str()]).await?;
        Ok(())
    }
}

/// Scans with `clamdscan`, talking to a running clamd.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClamdScanner;

impl ClamdScanner {
    pub const PROGRAM: &'static str = "clamdscan";

    /// Whether `clamdscan` can be found on `PATH`.
    pub fn is_available() -> bool {
        which::which(Self::PROGRAM).is_ok()
    }
}

#[async_trait]
impl Scanner for ClamdScanner {
    async fn scan(&self, path: &Path, all_match: bool) -> Result<ScanOutcome, ToolError> {
        let mut args = vec![OsStr::new("-m"), OsStr::new("--stdout")];
        if all_match {
            args.push(OsStr::new("--allmatch"));
        }
        args.push(path.as_os_str());

        let output = run(Self::PROGRAM, args).await?;
        let verdict = match output.status.code() {
            Some(0) => Verdict::Clean,
            Some(1) => Verdict::Match,
            _ => Verdict::Error,
        };

        Ok(ScanOutcome {
            verdict,
            output: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}
