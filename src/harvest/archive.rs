//! Zip archive detection and unpacking.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::harvest::pipeline::{safe_join, TempExtraction};
use crate::harvest::traits::ArchiveError;
use crate::traits::ArchiveHandler;

const LOCAL_HEADER: &[u8; 4] = b"PK\x03\x04";
const EMPTY_ARCHIVE: &[u8; 4] = b"PK\x05\x06";

/// Zip archives, recognized by their leading magic bytes rather than the
/// file extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchives;

impl ZipArchives {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveHandler for ZipArchives {
    fn is_archive(&self, path: &Path) -> bool {
        if !path.is_file() {
            return false;
        }
        let mut magic = [0u8; 4];
        match File::open(path).and_then(|mut f| f.read_exact(&mut magic)) {
            Ok(()) => &magic == LOCAL_HEADER || &magic == EMPTY_ARCHIVE,
            Err(_) => false,
        }
    }

    fn unpack(&self, path: &Path) -> Result<TempExtraction, ArchiveError> {
        let scratch = TempExtraction::new(path)?;
        let entries = unpack_zip_into(path, scratch.path())?;
        debug!(archive = %path.display(), entries, "Unpacked zip archive");
        Ok(scratch)
    }
}

/// Unpacks every entry of the zip at `source` below `dest`.
///
/// Returns the number of files written. Entry names that would leave `dest`
/// are rejected with [`ArchiveError::PathTraversal`].
pub fn unpack_zip_into(source: &Path, dest: &Path) -> Result<usize, ArchiveError> {
    let file = File::open(source)?;
    let mut archive = ZipArchive::new(file).map_err(zip_error)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_error)?;
        let relative = entry
            .enclosed_name()
            .ok_or_else(|| ArchiveError::PathTraversal {
                attempted: entry.name().to_string(),
            })?;
        let target: PathBuf = safe_join(dest, &relative)?;

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        written += 1;
    }

    Ok(written)
}

fn zip_error(e: zip::result::ZipError) -> ArchiveError {
    match e {
        zip::result::ZipError::Io(io) => ArchiveError::Io(io),
        zip::result::ZipError::UnsupportedArchive(what) => {
            ArchiveError::UnsupportedFormat(what.to_string())
        }
        other => ArchiveError::Corrupted(other.to_string()),
    }
}
