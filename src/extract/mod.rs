//! In-process archive extraction.
//!
//! Tar streams go through the `tar` crate (optionally behind a gzip decoder),
//! zip archives through the `zip` crate. Both run on the blocking thread
//! pool.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tracing::{debug, trace};

use crate::error::ExtractError;
use crate::tools::Extractor;

/// Archive formats that are extracted rather than mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    GzTar,
    Zip,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::GzTar => "gztar",
            ArchiveFormat::Zip => "zip",
        })
    }
}

/// Extracts archives without shelling out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeExtractor;

#[async_trait]
impl Extractor for NativeExtractor {
    async fn extract(&self, archive: &Path, dest: &Path, format: ArchiveFormat) -> Result<(), ExtractError> {
        debug!("Extracting {} as {format} into {}", archive.display(), dest.display());

        let archive = archive.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || match format {
            ArchiveFormat::Tar => unpack_tar(&archive, &dest, false),
            ArchiveFormat::GzTar => unpack_tar(&archive, &dest, true),
            ArchiveFormat::Zip => unpack_zip(&archive, &dest),
        })
        .await
        .map_err(|_| ExtractError::Cancelled)?
    }
}

fn unpack_tar(archive: &Path, dest: &Path, gzip: bool) -> Result<(), ExtractError> {
    let file = BufReader::new(File::open(archive)?);
    let reader: Box<dyn Read> = if gzip { Box::new(GzDecoder::new(file)) } else { Box::new(file) };

    // `unpack` refuses entries that would escape `dest`
    tar::Archive::new(reader).unpack(dest)?;
    Ok(())
}

fn unpack_zip(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let mut zip = zip::ZipArchive::new(BufReader::new(File::open(archive)?))?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(ExtractError::UnsafePath(entry.name().to_string()));
        };
        let target: PathBuf = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        // reading to the end verifies the entry's CRC-32
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
        trace!("Extracted {}", target.display());
    }
    Ok(())
}
