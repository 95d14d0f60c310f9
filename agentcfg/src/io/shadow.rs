//! Dry-run shadow filesystem.
//!
//! Reads fall through to the base filesystem until a path has been written
//! in this run; after that the overlay answers, so later mutations see the
//! output of earlier ones. Mutating calls never reach the base filesystem.
//! They are appended to a [`Recorder`] instead.
//!
//! Single-threaded by construction (`RefCell`): one recorder and one overlay
//! belong to exactly one run.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::core::types::{OperationKind, RecordedOperation};
use crate::io::fs::{FileStat, FileSystem};

/// Collects simulated operations in insertion order.
#[derive(Debug, Default)]
pub struct Recorder {
    ops: RefCell<Vec<RecordedOperation>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        &self,
        kind: OperationKind,
        path: &Path,
        before: Option<String>,
        after: Option<String>,
    ) {
        trace!(path = %path.display(), ?kind, "recorded dry-run operation");
        self.ops.borrow_mut().push(RecordedOperation {
            kind,
            path: path.to_path_buf(),
            before_content: before,
            after_content: after,
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
    }

    /// Return everything recorded so far and clear the recorder.
    pub fn drain(&self) -> Vec<RecordedOperation> {
        std::mem::take(&mut *self.ops.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.ops.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.borrow().is_empty()
    }
}

#[derive(Debug, Clone)]
enum Entry {
    File { content: String, mode: Option<u32> },
    Dir,
    Removed,
}

/// Overlay-backed facade over `base`.
pub struct DryRunFileSystem<'a> {
    base: &'a dyn FileSystem,
    recorder: &'a Recorder,
    overlay: RefCell<BTreeMap<PathBuf, Entry>>,
}

impl<'a> DryRunFileSystem<'a> {
    pub fn new(base: &'a dyn FileSystem, recorder: &'a Recorder) -> Self {
        Self {
            base,
            recorder,
            overlay: RefCell::new(BTreeMap::new()),
        }
    }

    fn entry(&self, path: &Path) -> Option<Entry> {
        self.overlay.borrow().get(path).cloned()
    }

    fn set(&self, path: &Path, entry: Entry) {
        self.overlay.borrow_mut().insert(path.to_path_buf(), entry);
    }

    fn read_if_present(&self, path: &Path) -> io::Result<Option<String>> {
        match self.read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn current_mode(&self, path: &Path) -> Option<u32> {
        self.stat(path).ok().and_then(|stat| stat.mode)
    }
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

impl FileSystem for DryRunFileSystem<'_> {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.entry(path) {
            Some(Entry::File { content, .. }) => Ok(content),
            Some(Entry::Dir) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                format!("{} is a directory", path.display()),
            )),
            Some(Entry::Removed) => Err(not_found(path)),
            None => self.base.read_to_string(path),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let before = self.read_if_present(path)?;
        let mode = self.current_mode(path);
        self.recorder.record(
            OperationKind::Write,
            path,
            before,
            Some(contents.to_string()),
        );
        self.set(
            path,
            Entry::File {
                content: contents.to_string(),
                mode,
            },
        );
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        let existed = self.stat(path).map(|stat| stat.is_dir).unwrap_or(false);
        self.recorder
            .record(OperationKind::Mkdir { existed }, path, None, None);
        if !existed {
            for dir in path.ancestors() {
                if dir.as_os_str().is_empty() || self.stat(dir).is_ok() {
                    break;
                }
                self.set(dir, Entry::Dir);
            }
        }
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        match self.entry(path) {
            Some(Entry::File { content, mode }) => Ok(FileStat {
                size: content.len() as u64,
                is_dir: false,
                mode,
            }),
            Some(Entry::Dir) => Ok(FileStat {
                size: 0,
                is_dir: true,
                mode: None,
            }),
            Some(Entry::Removed) => Err(not_found(path)),
            None => self.base.stat(path),
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let before = self.read_to_string(path)?;
        self.recorder
            .record(OperationKind::Delete, path, Some(before), None);
        self.set(path, Entry::Removed);
        Ok(())
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = match self.base.read_dir(path) {
            Ok(names) => names,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !matches!(self.entry(path), Some(Entry::Dir)) {
                    return Err(err);
                }
                Vec::new()
            }
            Err(err) => return Err(err),
        };
        for (child, entry) in self.overlay.borrow().iter() {
            if child.parent() != Some(path) {
                continue;
            }
            let Some(name) = child.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            match entry {
                Entry::Removed => names.retain(|existing| existing != &name),
                Entry::File { .. } | Entry::Dir => {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let content = self.read_to_string(from)?;
        let before = self.read_if_present(to)?;
        let mode = self.current_mode(from);
        self.recorder.record(
            OperationKind::Copy {
                destination: to.to_path_buf(),
            },
            from,
            before,
            Some(content.clone()),
        );
        self.set(to, Entry::File { content, mode });
        Ok(())
    }

    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()> {
        let content = self.read_to_string(path)?;
        self.recorder
            .record(OperationKind::Chmod { mode }, path, None, None);
        self.set(
            path,
            Entry::File {
                content,
                mode: Some(mode),
            },
        );
        Ok(())
    }
}
