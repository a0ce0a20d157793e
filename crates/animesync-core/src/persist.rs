// # Atomic file persistence
//
// Shared by the file-backed watchlist, library and cache backend.
//
// - Writes go to `<path>.tmp`, are flushed, then renamed over `<path>`
// - Before the rename the current file is copied to `<path>.backup`
// - Loading falls back to the backup when the main file does not parse

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

/// Path of the temporary file used for atomic writes
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, "tmp")
}

/// Path of the last-known-good copy
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "backup")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Create the parent directory of `path` if missing
pub async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !fs::try_exists(parent).await.unwrap_or(false) {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::store_write(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `path`
///
/// With `keep_backup` the previous file is copied aside first. Any failure
/// leaves the existing file untouched and is reported as `StoreWriteFailed`.
pub async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    keep_backup: bool,
) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::store_write(format!("Failed to serialize {}: {}", path.display(), e)))?;

    ensure_parent(path).await?;

    let temp = temp_path(path);
    if let Err(e) = write_temp(&temp, &json).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }

    if keep_backup && fs::try_exists(path).await.unwrap_or(false) {
        if let Err(e) = fs::copy(path, backup_path(path)).await {
            tracing::warn!("Failed to create backup of {}: {}", path.display(), e);
        }
    }

    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(Error::store_write(format!(
            "Failed to rename {} to {}: {}",
            temp.display(),
            path.display(),
            e
        )));
    }

    tracing::trace!("Wrote {}", path.display());
    Ok(())
}

async fn write_temp(temp: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = fs::File::create(temp).await.map_err(|e| {
        Error::store_write(format!("Failed to create {}: {}", temp.display(), e))
    })?;
    file.write_all(bytes).await.map_err(|e| {
        Error::store_write(format!("Failed to write {}: {}", temp.display(), e))
    })?;
    file.flush().await.map_err(|e| {
        Error::store_write(format!("Failed to flush {}: {}", temp.display(), e))
    })?;
    Ok(())
}

/// Read and parse a JSON file
///
/// `Ok(None)` when the file does not exist, `CacheCorrupt` when it does
/// not parse.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::cache_corrupt(format!("{}: {}", path.display(), e)))
}

/// Load a JSON file, recovering from its backup when it is corrupt
///
/// If both copies are unreadable the caller gets `Ok(None)` and starts
/// fresh. A recovered backup is copied back over the main file.
pub async fn load_with_recovery<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_json(path).await {
        Ok(value) => Ok(value),
        Err(Error::CacheCorrupt(reason)) => {
            tracing::warn!("{} is corrupt ({}), trying backup", path.display(), reason);

            let backup = backup_path(path);
            match read_json::<T>(&backup).await {
                Ok(Some(value)) => {
                    if let Err(e) = fs::copy(&backup, path).await {
                        tracing::error!("Failed to restore {} from backup: {}", path.display(), e);
                    } else {
                        tracing::info!("Restored {} from backup", path.display());
                    }
                    Ok(Some(value))
                }
                Ok(None) => {
                    tracing::warn!("No backup for {}, starting empty", path.display());
                    Ok(None)
                }
                Err(e) => {
                    tracing::error!("Backup of {} unusable ({}), starting empty", path.display(), e);
                    Ok(None)
                }
            }
        }
        Err(e) => Err(e),
    }
}
