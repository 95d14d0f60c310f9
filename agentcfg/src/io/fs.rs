//! Filesystem facade the executor runs against.
//!
//! [`RealFileSystem`] touches disk; [`crate::io::shadow::DryRunFileSystem`]
//! records the same calls into an overlay. The executor only ever sees
//! `&dyn FileSystem`, so real and simulated runs share one code path.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::EngineError;

/// Subset of `stat` the engine relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    /// Permission bits, where the platform has them.
    pub mode: Option<u32>,
}

/// Minimal filesystem contract. Reads of an absent path fail with
/// [`io::ErrorKind::NotFound`].
pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn write(&self, path: &Path, contents: &str) -> io::Result<()>;
    /// Recursive, like `mkdir -p`.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn stat(&self, path: &Path) -> io::Result<FileStat>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Entry names (not full paths) in `path`.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Write `contents` into a file that carries `mode` before any byte lands
    /// in it.
    fn write_with_mode(&self, path: &Path, contents: &str, mode: u32) -> io::Result<()> {
        self.write(path, contents)?;
        self.set_mode(path, mode)
    }
}

/// The host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        fs::write(path, contents)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        let meta = fs::metadata(path)?;
        Ok(FileStat {
            size: meta.len(),
            is_dir: meta.is_dir(),
            mode: mode_bits(&meta),
        })
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(path)? {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::copy(from, to).map(|_| ())
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn write_with_mode(&self, path: &Path, contents: &str, mode: u32) -> io::Result<()> {
        use std::io::Write;
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)?;
        // `mode` only applies on creation; an existing file keeps its bits.
        file.set_permissions(fs::Permissions::from_mode(mode))?;
        file.write_all(contents.as_bytes())
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(meta.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn mode_bits(_meta: &fs::Metadata) -> Option<u32> {
    None
}

/// Read a file, mapping absence to `None`.
pub fn read_optional(fs: &dyn FileSystem, path: &Path) -> Result<Option<String>, EngineError> {
    match fs.read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::fs("read", path, err)),
    }
}

/// Stat a path, mapping absence to `None`.
pub fn stat_optional(fs: &dyn FileSystem, path: &Path) -> Result<Option<FileStat>, EngineError> {
    match fs.stat(path) {
        Ok(stat) => Ok(Some(stat)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::fs("stat", path, err)),
    }
}

/// Write `contents`, creating the parent directory first when it is missing.
/// With `mode` set the file gets those permission bits before its content.
pub fn write_with_parents(
    fs: &dyn FileSystem,
    path: &Path,
    contents: &str,
    mode: Option<u32>,
) -> Result<(), EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        && stat_optional(fs, parent)?.is_none()
    {
        fs.create_dir_all(parent)
            .map_err(|err| EngineError::fs("create directory", parent, err))?;
    }
    let written = match mode {
        Some(mode) => fs.write_with_mode(path, contents, mode),
        None => fs.write(path, contents),
    };
    written.map_err(|err| EngineError::fs("write", path, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_optional_maps_missing_to_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fs = RealFileSystem;
        assert_eq!(read_optional(&fs, &temp.path().join("missing")).expect("read"), None);
        assert_eq!(stat_optional(&fs, &temp.path().join("missing")).expect("stat"), None);
    }

    #[test]
    fn write_with_parents_creates_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fs = RealFileSystem;
        let path = temp.path().join("a/b/config.json");
        write_with_parents(&fs, &path, "{}\n", None).expect("write");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "{}\n");
    }

    #[test]
    fn read_dir_lists_sorted_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("b"), "").expect("write");
        std::fs::write(temp.path().join("a"), "").expect("write");
        let names = RealFileSystem.read_dir(temp.path()).expect("read_dir");
        assert_eq!(names, vec!["a", "b"]);
    }

    #[cfg(unix)]
    #[test]
    fn set_mode_is_visible_in_stat() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("key.sh");
        std::fs::write(&path, "#!/bin/sh\n").expect("write");
        RealFileSystem.set_mode(&path, 0o700).expect("chmod");
        assert_eq!(RealFileSystem.stat(&path).expect("stat").mode, Some(0o700));
    }

    #[cfg(unix)]
    #[test]
    fn write_with_mode_tightens_new_and_existing_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let fresh = temp.path().join("fresh.sh");
        RealFileSystem
            .write_with_mode(&fresh, "secret\n", 0o700)
            .expect("write");
        assert_eq!(RealFileSystem.stat(&fresh).expect("stat").mode, Some(0o700));

        let loose = temp.path().join("loose.sh");
        std::fs::write(&loose, "old\n").expect("write");
        RealFileSystem.set_mode(&loose, 0o666).expect("chmod");
        RealFileSystem
            .write_with_mode(&loose, "secret\n", 0o600)
            .expect("write");
        assert_eq!(RealFileSystem.stat(&loose).expect("stat").mode, Some(0o600));
        assert_eq!(std::fs::read_to_string(&loose).expect("read"), "secret\n");
    }
}
