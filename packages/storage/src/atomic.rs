//! Atomic file replacement.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::StorageError;

/// Prefix of in-flight temporary files. Directory scans skip dot-files.
pub const TEMP_PREFIX: &str = ".tmp-";

/// The primitive that puts bytes into an open file.
///
/// Production code uses [`DirectWriter`]; tests substitute a writer that fails
/// partway to prove that a failed write is never observable.
pub trait FileWriter: Send + Sync + std::fmt::Debug {
    fn write_all(&self, file: &mut File, bytes: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DirectWriter;

impl FileWriter for DirectWriter {
    fn write_all(&self, file: &mut File, bytes: &[u8]) -> io::Result<()> {
        file.write_all(bytes)
    }
}

/// Replace `target` with `bytes` so that readers see either the old or the
/// new complete content.
///
/// The temp file lives in the target's directory so the final rename never
/// crosses filesystems. On any failure before the rename the temp file is
/// removed and `target` is untouched.
pub fn write_atomic(
    target: &Path,
    bytes: &[u8],
    writer: &dyn FileWriter,
) -> Result<(), StorageError> {
    let dir = target.parent().ok_or_else(|| {
        StorageError::InvalidConfig(format!("{} has no parent directory", target.display()))
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)?;

    writer.write_all(tmp.as_file_mut(), bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| StorageError::Io(e.error))?;

    sync_dir(dir);
    tracing::trace!("Atomically wrote {:?}", target);
    Ok(())
}

/// Flush the directory entry so the rename itself survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!("Failed to fsync directory {:?}: {}", dir, e);
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
