//! Shared deterministic types for mutation outcomes and dry-run records.

use std::fmt;
use std::path::{Path, PathBuf};

/// Infix between a target path and the timestamp of one of its backups.
pub const BACKUP_MARKER: &str = ".backup.";

/// True when `candidate` is named like a backup of `target`.
pub fn is_backup_of(target: &Path, candidate: &Path) -> bool {
    let prefix = format!("{}{BACKUP_MARKER}", target.to_string_lossy());
    candidate.to_string_lossy().starts_with(&prefix)
}

/// Filesystem effect a mutation had (or would have).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Mkdir,
    Copy,
    Write,
    Delete,
    None,
}

/// Human-facing classification of a mutation result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    Create,
    Update,
    Delete,
    Backup,
    Noop,
    Permissions,
}

impl Detail {
    pub fn as_str(self) -> &'static str {
        match self {
            Detail::Create => "create",
            Detail::Update => "update",
            Detail::Delete => "delete",
            Detail::Backup => "backup",
            Detail::Noop => "noop",
            Detail::Permissions => "permissions",
        }
    }
}

/// What a single mutation did during one run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub effect: Effect,
    pub changed: bool,
    pub detail: Detail,
}

impl Outcome {
    pub fn noop() -> Self {
        Self {
            effect: Effect::None,
            changed: false,
            detail: Detail::Noop,
        }
    }

    pub fn changed(effect: Effect, detail: Detail) -> Self {
        Self {
            effect,
            changed: true,
            detail,
        }
    }
}

/// Discriminant of a [`crate::mutation::Mutation`], used in hooks and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    EnsureDirectory,
    CreateBackup,
    WriteTemplate,
    TransformFile,
    JsonMerge,
}

impl MutationKind {
    /// Kinds that write file content (as opposed to directories or backups).
    pub fn writes_content(self) -> bool {
        matches!(
            self,
            MutationKind::WriteTemplate | MutationKind::TransformFile | MutationKind::JsonMerge
        )
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationKind::EnsureDirectory => "ensure-directory",
            MutationKind::CreateBackup => "create-backup",
            MutationKind::WriteTemplate => "write-template",
            MutationKind::TransformFile => "transform-file",
            MutationKind::JsonMerge => "json-merge",
        };
        f.write_str(name)
    }
}

/// Resolved description of a mutation, handed to observer hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationDetails {
    /// Position in the manifest list (0-based).
    pub index: usize,
    pub kind: MutationKind,
    pub label: String,
    /// Target path resolved against the current options.
    pub target: PathBuf,
    /// Unix mode requested by the mutation, if any.
    pub mode: Option<u32>,
}

/// Type of a simulated filesystem call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// `existed` is true when the directory was already present.
    Mkdir { existed: bool },
    Write,
    Delete,
    /// Copy of `path` to `destination`.
    Copy { destination: PathBuf },
    Chmod { mode: u32 },
}

/// One filesystem call captured by the dry-run recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedOperation {
    pub kind: OperationKind,
    pub path: PathBuf,
    pub before_content: Option<String>,
    pub after_content: Option<String>,
    /// RFC 3339 wall-clock time of the call.
    pub timestamp: String,
}
