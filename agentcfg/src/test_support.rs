//! In-memory fakes shared by unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use crate::core::types::{MutationDetails, Outcome};
use crate::error::EngineError;
use crate::executor::{ExecutionContext, MutationObserver};
use crate::io::fs::{FileStat, FileSystem};
use crate::io::process::{CommandResult, CommandRunner, EXIT_NOT_FOUND};
use crate::io::templates::TemplateRenderer;
use crate::mutation::ServiceOptions;

pub const TEST_API_KEY: &str = "sk-test";
pub const TEST_BASE_URL: &str = "https://api.example.test/v1";
pub const TEST_MODEL: &str = "Test-Model";
pub const FIXED_TIMESTAMP: &str = "20260101T000000000Z";

pub fn options(home: impl Into<PathBuf>) -> ServiceOptions {
    ServiceOptions {
        home: home.into(),
        api_key: TEST_API_KEY.to_string(),
        base_url: TEST_BASE_URL.to_string(),
        model: TEST_MODEL.to_string(),
    }
}

pub fn fixed_timestamp() -> String {
    FIXED_TIMESTAMP.to_string()
}

/// Real-mode context over `fs` with the fixed timestamp.
pub fn execution_context<'a>(
    fs: &'a dyn FileSystem,
    options: &'a ServiceOptions,
    templates: &'a dyn TemplateRenderer,
) -> ExecutionContext<'a> {
    ExecutionContext {
        fs,
        options,
        templates,
        timestamp: &fixed_timestamp,
        dry_run: false,
    }
}

#[derive(Debug, Clone)]
enum Node {
    File { content: String, mode: u32 },
    Dir,
}

/// Map-backed filesystem. Directories are explicit; writing into a missing
/// directory fails like it would on disk.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    nodes: RefCell<BTreeMap<PathBuf, Node>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file, creating its ancestors.
    pub fn insert_file(&self, path: impl AsRef<Path>, content: &str) {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            self.insert_dir(parent);
        }
        self.nodes.borrow_mut().insert(
            path.to_path_buf(),
            Node::File {
                content: content.to_string(),
                mode: 0o644,
            },
        );
    }

    pub fn insert_dir(&self, path: impl AsRef<Path>) {
        let mut nodes = self.nodes.borrow_mut();
        for ancestor in path.as_ref().ancestors() {
            if is_root(ancestor) {
                break;
            }
            nodes.entry(ancestor.to_path_buf()).or_insert(Node::Dir);
        }
    }

    pub fn contents(&self, path: impl AsRef<Path>) -> Option<String> {
        match self.nodes.borrow().get(path.as_ref()) {
            Some(Node::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        match self.nodes.borrow().get(path.as_ref()) {
            Some(Node::File { mode, .. }) => Some(*mode),
            _ => None,
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        is_root(path.as_ref()) || self.nodes.borrow().contains_key(path.as_ref())
    }

    /// Every path currently present, sorted.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.nodes.borrow().keys().cloned().collect()
    }

    fn require_parent(&self, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !is_root(parent) => match self.nodes.borrow().get(parent) {
                Some(Node::Dir) => Ok(()),
                Some(Node::File { .. }) => Err(not_a_directory(parent)),
                None => Err(not_found(parent)),
            },
            _ => Ok(()),
        }
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        match self.nodes.borrow().get(path) {
            Some(Node::File { content, .. }) => Ok(content.clone()),
            Some(Node::Dir) => Err(io::Error::new(io::ErrorKind::IsADirectory, "is a directory")),
            None => Err(not_found(path)),
        }
    }

    fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        self.require_parent(path)?;
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get_mut(path) {
            Some(Node::File { content, .. }) => *content = contents.to_string(),
            Some(Node::Dir) => {
                return Err(io::Error::new(io::ErrorKind::IsADirectory, "is a directory"));
            }
            None => {
                nodes.insert(
                    path.to_path_buf(),
                    Node::File {
                        content: contents.to_string(),
                        mode: 0o644,
                    },
                );
            }
        }
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        for ancestor in path.ancestors() {
            if let Some(Node::File { .. }) = self.nodes.borrow().get(ancestor) {
                return Err(not_a_directory(ancestor));
            }
        }
        self.insert_dir(path);
        Ok(())
    }

    fn stat(&self, path: &Path) -> io::Result<FileStat> {
        if is_root(path) {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
                mode: None,
            });
        }
        match self.nodes.borrow().get(path) {
            Some(Node::File { content, mode }) => Ok(FileStat {
                size: content.len() as u64,
                is_dir: false,
                mode: Some(*mode),
            }),
            Some(Node::Dir) => Ok(FileStat {
                size: 0,
                is_dir: true,
                mode: None,
            }),
            None => Err(not_found(path)),
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get(path) {
            Some(Node::File { .. }) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(io::Error::new(io::ErrorKind::IsADirectory, "is a directory")),
            None => Err(not_found(path)),
        }
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        if !is_root(path) && !matches!(self.nodes.borrow().get(path), Some(Node::Dir)) {
            return Err(not_found(path));
        }
        Ok(self
            .nodes
            .borrow()
            .keys()
            .filter(|candidate| candidate.parent() == Some(path))
            .filter_map(|candidate| candidate.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        let content = self.read_to_string(from)?;
        self.write(to, &content)
    }

    fn set_mode(&self, path: &Path, new_mode: u32) -> io::Result<()> {
        match self.nodes.borrow_mut().get_mut(path) {
            Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            Some(Node::Dir) => Ok(()),
            None => Err(not_found(path)),
        }
    }

    fn write_with_mode(&self, path: &Path, contents: &str, mode: u32) -> io::Result<()> {
        if !self.exists(path) {
            self.require_parent(path)?;
            self.nodes.borrow_mut().insert(
                path.to_path_buf(),
                Node::File {
                    content: String::new(),
                    mode,
                },
            );
        }
        self.set_mode(path, mode)?;
        self.write(path, contents)
    }
}

fn is_root(path: &Path) -> bool {
    path.as_os_str().is_empty() || path.parent().is_none()
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{}: no such file or directory", path.display()),
    )
}

fn not_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotADirectory,
        format!("{}: not a directory", path.display()),
    )
}

/// Runner that replays canned results in order and remembers every call as
/// `"command arg1 arg2"`.
#[derive(Debug, Default)]
pub struct ScriptedCommandRunner {
    results: RefCell<VecDeque<CommandResult>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedCommandRunner {
    pub fn new(results: Vec<CommandResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl CommandRunner for ScriptedCommandRunner {
    fn run(&self, command: &str, args: &[String]) -> Result<CommandResult, EngineError> {
        let rendered = std::iter::once(command)
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.borrow_mut().push(rendered.clone());
        self.results
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| EngineError::Command {
                command: rendered,
                message: "no scripted result left".to_string(),
            })
    }
}

pub fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandResult {
    CommandResult {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

pub fn ok(stdout: &str) -> CommandResult {
    output(stdout, "", 0)
}

/// What the system runner reports for a binary that is not on `PATH`.
pub fn missing() -> CommandResult {
    output("", "ENOENT: command not found", EXIT_NOT_FOUND)
}

/// Observer that logs `start:`, `complete:` and `error:` events by label.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub events: Vec<String>,
    pub outcomes: Vec<(MutationDetails, Outcome)>,
}

impl MutationObserver for RecordingObserver {
    fn on_start(&mut self, details: &MutationDetails) {
        self.events.push(format!("start:{}", details.label));
    }

    fn on_complete(&mut self, details: &MutationDetails, outcome: &Outcome) {
        self.events.push(format!("complete:{}", details.label));
        self.outcomes.push((details.clone(), *outcome));
    }

    fn on_error(&mut self, details: &MutationDetails, _error: &EngineError) {
        self.events.push(format!("error:{}", details.label));
    }
}
