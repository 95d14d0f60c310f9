//! Timestamped backups of target files, written next to the target as
//! `{target}.backup.{timestamp}`.
//!
//! Timestamps are injected so tests can pin them. The default format sorts
//! lexicographically in chronological order, which is what restore relies on.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::core::types::BACKUP_MARKER;
use crate::error::EngineError;
use crate::io::fs::{FileSystem, stat_optional};

/// UTC timestamp such as `20261019T143005123Z`.
pub fn default_timestamp() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ").to_string()
}

/// `{target}.backup.{timestamp}`
pub fn backup_path(target: &Path, timestamp: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(BACKUP_MARKER);
    name.push(timestamp);
    PathBuf::from(name)
}

/// Copy `target` to a fresh backup path.
///
/// Returns `None` without touching anything when `target` does not exist.
#[instrument(skip_all, fields(target = %target.display()))]
pub fn create_backup(
    fs: &dyn FileSystem,
    target: &Path,
    timestamp: &dyn Fn() -> String,
) -> Result<Option<PathBuf>, EngineError> {
    if stat_optional(fs, target)?.is_none() {
        debug!("backup skipped: target absent");
        return Ok(None);
    }
    let destination = backup_path(target, &timestamp());
    fs.copy(target, &destination)
        .map_err(|err| EngineError::fs("copy", target, err))?;
    info!(backup = %destination.display(), "created backup");
    Ok(Some(destination))
}

/// Existing backups of `target`, newest first.
pub fn list_backups(fs: &dyn FileSystem, target: &Path) -> Result<Vec<PathBuf>, EngineError> {
    let (Some(dir), Some(base)) = (target.parent(), target.file_name()) else {
        return Ok(Vec::new());
    };
    let prefix = format!("{}{BACKUP_MARKER}", base.to_string_lossy());
    let names = match fs.read_dir(dir) {
        Ok(names) => names,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(EngineError::fs("read directory", dir, err)),
    };
    let mut matching: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect();
    matching.sort_by(|a, b| b.cmp(a));
    Ok(matching.into_iter().map(|name| dir.join(name)).collect())
}

/// Copy the newest backup over `target`.
///
/// Returns `false` when there is no backup (or no directory to look in).
#[instrument(skip_all, fields(target = %target.display()))]
pub fn restore_latest_backup(fs: &dyn FileSystem, target: &Path) -> Result<bool, EngineError> {
    let Some(latest) = list_backups(fs, target)?.into_iter().next() else {
        debug!("no backup to restore");
        return Ok(false);
    };
    fs.copy(&latest, target)
        .map_err(|err| EngineError::fs("copy", &latest, err))?;
    info!(backup = %latest.display(), "restored backup");
    Ok(true)
}
