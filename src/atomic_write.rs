//! Crash-safe file writes.
//!
//! Every artifact write goes through `write_bytes_atomic`: temp file in the
//! target directory, fsync, then atomic rename. A reader can never observe a
//! partially written artifact.

use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;

/// Atomically write bytes to `path` (temp file + fsync + rename).
///
/// Parent directories are created on demand.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir_all(parent)
            .with_context(|| format!("Failed to create parent directory: {parent}"))?;
    }

    let temp_dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let mut temp_file = NamedTempFile::new_in(temp_dir)
        .with_context(|| format!("Failed to create temporary file in: {temp_dir}"))?;

    temp_file
        .write_all(content)
        .with_context(|| format!("Failed to write temporary file for: {path}"))?;

    temp_file
        .as_file()
        .sync_all()
        .with_context(|| format!("Failed to fsync temporary file for: {path}"))?;

    temp_file
        .persist(path.as_std_path())
        .map_err(|e| anyhow::anyhow!(e.error))
        .with_context(|| format!("Failed to atomically write file: {path}"))?;

    Ok(())
}

/// Atomically write a string (UTF-8) to `path`.
pub fn write_str_atomic(path: &Utf8Path, content: &str) -> Result<()> {
    write_bytes_atomic(path, content.as_bytes())
}

/// mkdir -p; treat `AlreadyExists` as success (removes TOCTTOU races).
pub fn ensure_dir_all<P: AsRef<std::path::Path>>(p: P) -> std::io::Result<()> {
    match fs::create_dir_all(&p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(e),
    }
}
