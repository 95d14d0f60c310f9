//! Declarative mutation descriptors and per-tool manifests.
//!
//! A [`Mutation`] is a stateless step. Its target path is resolved lazily from
//! [`ServiceOptions`] on every run, so one manifest serves any home directory,
//! key or model.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::types::{MutationDetails, MutationKind};
use crate::error::EngineError;
use crate::io::fs::FileSystem;
use crate::prerequisites::{InstallDefinition, Prerequisite};

/// Runtime inputs a manifest is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Home directory all tool config paths hang off.
    pub home: PathBuf,
    /// Provider API key. Empty for runs that do not write it (remove).
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Input handed to a [`Mutation::TransformFile`] transform.
#[derive(Clone, Copy)]
pub struct TransformContext<'a> {
    pub options: &'a ServiceOptions,
    pub target: &'a Path,
    /// The filesystem the run writes to, for transforms that depend on
    /// another file's state.
    pub fs: &'a dyn FileSystem,
}

/// Result of a transform. `content: None` means the file should not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub content: Option<String>,
    pub changed: bool,
}

impl TransformOutput {
    pub fn unchanged(content: Option<&str>) -> Self {
        Self {
            content: content.map(str::to_string),
            changed: false,
        }
    }

    pub fn write(content: String) -> Self {
        Self {
            content: Some(content),
            changed: true,
        }
    }

    pub fn delete() -> Self {
        Self {
            content: None,
            changed: true,
        }
    }
}

pub type PathFn = Box<dyn Fn(&ServiceOptions) -> PathBuf>;
pub type ValueFn = Box<dyn Fn(&ServiceOptions) -> Value>;
pub type TransformFn =
    Box<dyn Fn(Option<&str>, &TransformContext<'_>) -> Result<TransformOutput, EngineError>>;

/// One idempotent filesystem change.
pub enum Mutation {
    /// `mkdir -p` when absent.
    EnsureDirectory { label: String, path: PathFn },
    /// Timestamped copy of the target before it is changed.
    CreateBackup { label: String, target: PathFn },
    /// Render a template and write it when it differs. `mode` is applied after
    /// the write, or on its own when only the permissions are off.
    WriteTemplate {
        label: String,
        target: PathFn,
        template_id: String,
        context: ValueFn,
        mode: Option<u32>,
    },
    /// Generic read-modify-write. The transform decides `changed`.
    TransformFile {
        label: String,
        target: PathFn,
        transform: TransformFn,
    },
    /// Deep-merge a JSON object into the target (absent file = `{}`).
    JsonMerge {
        label: String,
        target: PathFn,
        value: ValueFn,
    },
}

impl Mutation {
    pub fn ensure_directory(
        label: impl Into<String>,
        path: impl Fn(&ServiceOptions) -> PathBuf + 'static,
    ) -> Self {
        Self::EnsureDirectory {
            label: label.into(),
            path: Box::new(path),
        }
    }

    pub fn create_backup(
        label: impl Into<String>,
        target: impl Fn(&ServiceOptions) -> PathBuf + 'static,
    ) -> Self {
        Self::CreateBackup {
            label: label.into(),
            target: Box::new(target),
        }
    }

    pub fn write_template(
        label: impl Into<String>,
        target: impl Fn(&ServiceOptions) -> PathBuf + 'static,
        template_id: impl Into<String>,
        context: impl Fn(&ServiceOptions) -> Value + 'static,
    ) -> Self {
        Self::WriteTemplate {
            label: label.into(),
            target: Box::new(target),
            template_id: template_id.into(),
            context: Box::new(context),
            mode: None,
        }
    }

    pub fn transform_file(
        label: impl Into<String>,
        target: impl Fn(&ServiceOptions) -> PathBuf + 'static,
        transform: impl Fn(Option<&str>, &TransformContext<'_>) -> Result<TransformOutput, EngineError>
        + 'static,
    ) -> Self {
        Self::TransformFile {
            label: label.into(),
            target: Box::new(target),
            transform: Box::new(transform),
        }
    }

    pub fn json_merge(
        label: impl Into<String>,
        target: impl Fn(&ServiceOptions) -> PathBuf + 'static,
        value: impl Fn(&ServiceOptions) -> Value + 'static,
    ) -> Self {
        Self::JsonMerge {
            label: label.into(),
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// Set the unix mode of a [`Mutation::WriteTemplate`]. Other kinds are
    /// returned unchanged.
    pub fn with_mode(self, mode: u32) -> Self {
        match self {
            Self::WriteTemplate {
                label,
                target,
                template_id,
                context,
                ..
            } => Self::WriteTemplate {
                label,
                target,
                template_id,
                context,
                mode: Some(mode),
            },
            other => other,
        }
    }

    pub fn kind(&self) -> MutationKind {
        match self {
            Self::EnsureDirectory { .. } => MutationKind::EnsureDirectory,
            Self::CreateBackup { .. } => MutationKind::CreateBackup,
            Self::WriteTemplate { .. } => MutationKind::WriteTemplate,
            Self::TransformFile { .. } => MutationKind::TransformFile,
            Self::JsonMerge { .. } => MutationKind::JsonMerge,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::EnsureDirectory { label, .. }
            | Self::CreateBackup { label, .. }
            | Self::WriteTemplate { label, .. }
            | Self::TransformFile { label, .. }
            | Self::JsonMerge { label, .. } => label,
        }
    }

    pub fn target(&self, options: &ServiceOptions) -> PathBuf {
        match self {
            Self::EnsureDirectory { path, .. } => path(options),
            Self::CreateBackup { target, .. }
            | Self::WriteTemplate { target, .. }
            | Self::TransformFile { target, .. }
            | Self::JsonMerge { target, .. } => target(options),
        }
    }

    pub fn mode(&self) -> Option<u32> {
        match self {
            Self::WriteTemplate { mode, .. } => *mode,
            _ => None,
        }
    }

    pub fn details(&self, index: usize, options: &ServiceOptions) -> MutationDetails {
        MutationDetails {
            index,
            kind: self.kind(),
            label: self.label().to_string(),
            target: self.target(options),
            mode: self.mode(),
        }
    }
}

impl std::fmt::Debug for Mutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("kind", &self.kind())
            .field("label", &self.label())
            .finish_non_exhaustive()
    }
}

/// Prerequisites grouped by the phase they gate.
#[derive(Default)]
pub struct PrerequisiteSet {
    pub before: Vec<Prerequisite>,
    pub after: Vec<Prerequisite>,
}

/// Ordered configure/remove mutations for one integrated tool.
pub struct Manifest {
    pub id: String,
    pub summary: String,
    pub prerequisites: PrerequisiteSet,
    /// How to install the tool when it is missing.
    pub install: Option<InstallDefinition>,
    pub configure: Vec<Mutation>,
    pub remove: Vec<Mutation>,
}

impl Manifest {
    /// Check structural invariants: non-empty labels, and every backup
    /// placed before the first content-writing step of its list.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(self.invalid("id must be non-empty"));
        }
        for (name, mutations) in [("configure", &self.configure), ("remove", &self.remove)] {
            let mut seen_content = false;
            for mutation in mutations {
                if mutation.label().trim().is_empty() {
                    return Err(self.invalid(format!("{name}: mutation label must be non-empty")));
                }
                match mutation.kind() {
                    MutationKind::CreateBackup if seen_content => {
                        return Err(self.invalid(format!(
                            "{name}: backup `{}` follows a content mutation",
                            mutation.label()
                        )));
                    }
                    kind if kind.writes_content() => seen_content = true,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Paths backed up by the configure list.
    pub fn backup_targets(&self, options: &ServiceOptions) -> Vec<PathBuf> {
        self.configure
            .iter()
            .filter(|mutation| mutation.kind() == MutationKind::CreateBackup)
            .map(|mutation| mutation.target(options))
            .collect()
    }

    fn invalid(&self, message: impl Into<String>) -> EngineError {
        EngineError::InvalidManifest {
            id: self.id.clone(),
            message: message.into(),
        }
    }
}

impl std::fmt::Debug for Manifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manifest")
            .field("id", &self.id)
            .field("install", &self.install)
            .field("configure", &self.configure)
            .field("remove", &self.remove)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::options;

    fn manifest(configure: Vec<Mutation>) -> Manifest {
        Manifest {
            id: "demo".to_string(),
            summary: "Demo".to_string(),
            prerequisites: PrerequisiteSet::default(),
            install: None,
            configure,
            remove: Vec::new(),
        }
    }

    #[test]
    fn backup_before_content_is_valid() {
        let manifest = manifest(vec![
            Mutation::ensure_directory("dir", |o| o.home.join(".demo")),
            Mutation::create_backup("backup", |o| o.home.join(".demo/config.json")),
            Mutation::json_merge("merge", |o| o.home.join(".demo/config.json"), |_| Value::Null),
        ]);
        manifest.validate().expect("valid");
        assert_eq!(
            manifest.backup_targets(&options("/h")),
            vec![PathBuf::from("/h/.demo/config.json")]
        );
    }

    #[test]
    fn backup_after_content_is_rejected() {
        let manifest = manifest(vec![
            Mutation::json_merge("merge", |o| o.home.join("a.json"), |_| Value::Null),
            Mutation::create_backup("backup", |o| o.home.join("a.json")),
        ]);
        let err = manifest.validate().unwrap_err();
        assert!(err.to_string().contains("follows a content mutation"));
    }

    #[test]
    fn targets_resolve_lazily_against_options() {
        let mutation = Mutation::write_template(
            "helper",
            |o| o.home.join(".claude/key.sh"),
            "api-key-helper.sh",
            |_| Value::Null,
        )
        .with_mode(0o700);
        let details = mutation.details(3, &options("/other"));
        assert_eq!(details.target, PathBuf::from("/other/.claude/key.sh"));
        assert_eq!(details.mode, Some(0o700));
        assert_eq!(details.index, 3);
        assert_eq!(details.kind, MutationKind::WriteTemplate);
    }

    #[test]
    fn debug_lists_mutation_labels() {
        let manifest = manifest(vec![Mutation::ensure_directory("dir", |o| o.home.join(".demo"))]);
        let rendered = format!("{manifest:?}");
        assert!(rendered.starts_with("Manifest { id: \"demo\""));
        assert!(rendered.contains("label: \"dir\""));
    }
}
