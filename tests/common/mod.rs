#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::subscriber::DefaultGuard;
use unpackscan::{GuestFs, LoopMounter, MountError, NativeExtractor, Sniffer, ToolError, Toolbox, UnpackOptions};

/// Describes files by their extension instead of their contents.
pub struct ExtensionSniffer;

#[async_trait]
impl Sniffer for ExtensionSniffer {
    async fn sniff(&self, path: &Path) -> Result<String, ToolError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        let description = match extension {
            "tar" => "POSIX tar archive (GNU)",
            "zip" => "Zip archive data, at least v2.0 to extract",
            "tgz" => "gzip compressed data, from Unix",
            "iso" => "ISO 9660 CD-ROM filesystem data 'CDROM'",
            "vmdk" => "VMware4 disk image",
            "qcow2" => "QEMU QCOW2 Image (v3), 1073741824 bytes",
            _ => "data",
        };
        Ok(description.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Mount(PathBuf),
    Unmount(PathBuf),
    ListPartitions(PathBuf),
    MountPartition(String, PathBuf),
    UnmountPartition(PathBuf),
}

/// Stands in for both the loop mount tools and libguestfs.
///
/// A successful mount writes files into the mount point so the walk has
/// something to find.
#[derive(Default)]
pub struct FakeSystem {
    /// Files that appear inside a mounted ISO.
    pub iso_contents: Vec<(String, Vec<u8>)>,
    pub partitions: Vec<String>,
    pub fail_iso_mount: bool,
    pub fail_iso_unmount: bool,
    pub fail_list: bool,
    pub failing_partitions: Vec<String>,
    /// Names of partition directories that refuse to unmount.
    pub failing_unmounts: Vec<String>,
    /// Every call made, in order.
    pub calls: Mutex<Vec<Call>>,
}

impl FakeSystem {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn failure(program: &str) -> MountError {
    ToolError::Failed {
        program: program.to_string(),
        code: Some(32),
        output: "mount failed".to_string(),
    }
}

#[async_trait]
impl LoopMounter for FakeSystem {
    async fn mount_readonly(&self, image: &Path, mount_point: &Path) -> Result<(), MountError> {
        self.record(Call::Mount(image.to_path_buf()));
        if self.fail_iso_mount {
            return Err(failure("mount"));
        }
        for (name, data) in &self.iso_contents {
            std::fs::write(mount_point.join(name), data).unwrap();
        }
        Ok(())
    }

    async fn unmount(&self, mount_point: &Path) -> Result<(), MountError> {
        self.record(Call::Unmount(mount_point.to_path_buf()));
        if self.fail_iso_unmount {
            return Err(failure("umount"));
        }
        Ok(())
    }
}

#[async_trait]
impl GuestFs for FakeSystem {
    async fn list_partitions(&self, image: &Path) -> Result<Vec<String>, MountError> {
        self.record(Call::ListPartitions(image.to_path_buf()));
        if self.fail_list {
            return Err(failure("virt-filesystems"));
        }
        Ok(self.partitions.clone())
    }

    async fn mount_partition(&self, _image: &Path, partition: &str, dir: &Path) -> Result<(), MountError> {
        self.record(Call::MountPartition(partition.to_string(), dir.to_path_buf()));
        if self.failing_partitions.iter().any(|p| p == partition) {
            return Err(failure("guestmount"));
        }
        std::fs::write(dir.join("marker"), partition).unwrap();
        Ok(())
    }

    async fn unmount_partition(&self, dir: &Path) -> Result<(), MountError> {
        self.record(Call::UnmountPartition(dir.to_path_buf()));
        let name = dir.file_name().unwrap().to_string_lossy();
        if self.failing_unmounts.iter().any(|n| *n == name) {
            return Err(failure("guestunmount"));
        }
        Ok(())
    }
}

/// Real extraction, fake sniffing and mounting.
pub fn toolbox(system: &Arc<FakeSystem>) -> Toolbox {
    Toolbox {
        sniffer: Arc::new(ExtensionSniffer),
        extractor: Arc::new(NativeExtractor),
        loop_mounter: system.clone(),
        guestfs: system.clone(),
    }
}

pub fn options(tmp_root: &Path, min_size: u64) -> UnpackOptions {
    UnpackOptions {
        min_size,
        tmp_root: tmp_root.to_path_buf(),
    }
}

pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Bytes that no archive reader accepts.
pub fn junk() -> Vec<u8> {
    vec![b'x'; 1024]
}

/// Names of everything directly inside `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Log output collected by [`capture_warnings`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Record warnings logged on this thread until the guard is dropped.
pub fn capture_warnings() -> (DefaultGuard, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .without_time()
        .with_writer(move || writer.clone())
        .finish();
    (tracing::subscriber::set_default(subscriber), logs)
}
