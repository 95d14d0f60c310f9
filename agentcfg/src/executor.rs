//! Sequential mutation executor.
//!
//! One implementation serves real and dry runs: the [`ExecutionContext`]
//! carries the filesystem, and a dry run simply hands in the shadow
//! filesystem. Mutations run strictly in manifest order and each one sees the
//! filesystem as left by the previous one. The first error aborts the run;
//! earlier mutations are not rolled back.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::document::{merge_json, parse_json_object, to_json_string};
use crate::core::types::{Detail, Effect, MutationDetails, Outcome};
use crate::error::EngineError;
use crate::io::backup::create_backup;
use crate::io::fs::{FileSystem, read_optional, stat_optional, write_with_parents};
use crate::io::templates::TemplateRenderer;
use crate::mutation::{Manifest, Mutation, ServiceOptions, TransformContext};

/// Everything a mutation needs to resolve and apply itself.
#[derive(Clone, Copy)]
pub struct ExecutionContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub options: &'a ServiceOptions,
    pub templates: &'a dyn TemplateRenderer,
    pub timestamp: &'a dyn Fn() -> String,
    pub dry_run: bool,
}

/// Hooks invoked around every mutation.
pub trait MutationObserver {
    fn on_start(&mut self, _details: &MutationDetails) {}
    fn on_complete(&mut self, _details: &MutationDetails, _outcome: &Outcome) {}
    fn on_error(&mut self, _details: &MutationDetails, _error: &EngineError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MutationObserver for NoopObserver {}

/// Resolved mutation plus what it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub details: MutationDetails,
    pub outcome: Outcome,
}

/// True when any mutation changed something.
pub fn any_changed(records: &[MutationRecord]) -> bool {
    records.iter().any(|record| record.outcome.changed)
}

pub fn run_service_configure(
    manifest: &Manifest,
    ctx: &ExecutionContext<'_>,
    observer: &mut dyn MutationObserver,
) -> Result<Vec<MutationRecord>, EngineError> {
    run_mutations(&manifest.configure, ctx, observer)
}

pub fn run_service_remove(
    manifest: &Manifest,
    ctx: &ExecutionContext<'_>,
    observer: &mut dyn MutationObserver,
) -> Result<Vec<MutationRecord>, EngineError> {
    run_mutations(&manifest.remove, ctx, observer)
}

/// Apply `mutations` in order, producing one record per mutation.
#[instrument(skip_all, fields(count = mutations.len(), dry_run = ctx.dry_run))]
pub fn run_mutations(
    mutations: &[Mutation],
    ctx: &ExecutionContext<'_>,
    observer: &mut dyn MutationObserver,
) -> Result<Vec<MutationRecord>, EngineError> {
    let mut records = Vec::with_capacity(mutations.len());
    for (index, mutation) in mutations.iter().enumerate() {
        let details = mutation.details(index, ctx.options);
        observer.on_start(&details);
        match apply(mutation, &details.target, &mutations[index + 1..], ctx) {
            Ok(outcome) => {
                debug!(
                    label = %details.label,
                    kind = %details.kind,
                    target = %details.target.display(),
                    changed = outcome.changed,
                    detail = outcome.detail.as_str(),
                    "mutation applied"
                );
                observer.on_complete(&details, &outcome);
                records.push(MutationRecord { details, outcome });
            }
            Err(err) => {
                warn!(label = %details.label, err = %err, "mutation failed");
                observer.on_error(&details, &err);
                return Err(err);
            }
        }
    }
    Ok(records)
}

fn apply(
    mutation: &Mutation,
    target: &Path,
    remaining: &[Mutation],
    ctx: &ExecutionContext<'_>,
) -> Result<Outcome, EngineError> {
    match mutation {
        Mutation::EnsureDirectory { .. } => ensure_directory(ctx.fs, target),
        Mutation::CreateBackup { .. } => backup(target, remaining, ctx),
        Mutation::WriteTemplate { .. } | Mutation::TransformFile { .. } | Mutation::JsonMerge { .. } => {
            write_content(mutation, target, ctx)
        }
    }
}

fn ensure_directory(fs: &dyn FileSystem, path: &Path) -> Result<Outcome, EngineError> {
    match stat_optional(fs, path)? {
        Some(stat) if stat.is_dir => Ok(Outcome::noop()),
        Some(_) => Err(EngineError::fs(
            "create directory",
            path,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "exists and is not a directory"),
        )),
        None => {
            fs.create_dir_all(path)
                .map_err(|err| EngineError::fs("create directory", path, err))?;
            Ok(Outcome::changed(Effect::Mkdir, Detail::Create))
        }
    }
}

/// Back up `target` only when a later mutation of this run will change it,
/// so an already-configured file is not copied again on every run.
fn backup(
    target: &Path,
    remaining: &[Mutation],
    ctx: &ExecutionContext<'_>,
) -> Result<Outcome, EngineError> {
    if stat_optional(ctx.fs, target)?.is_none() {
        return Ok(Outcome::noop());
    }
    if !will_change(target, remaining, ctx)? {
        debug!(target = %target.display(), "backup skipped: target unchanged by this run");
        return Ok(Outcome::noop());
    }
    match create_backup(ctx.fs, target, ctx.timestamp)? {
        Some(_) => Ok(Outcome::changed(Effect::Copy, Detail::Backup)),
        None => Ok(Outcome::noop()),
    }
}

fn will_change(
    target: &Path,
    remaining: &[Mutation],
    ctx: &ExecutionContext<'_>,
) -> Result<bool, EngineError> {
    let mut content = read_optional(ctx.fs, target)?;
    for mutation in remaining {
        if !mutation.kind().writes_content() || mutation.target(ctx.options) != target {
            continue;
        }
        // A planning failure will resurface on the mutation itself; back up first.
        let Ok(planned) = plan_content(mutation, target, content.as_deref(), ctx) else {
            return Ok(true);
        };
        if planned.changed {
            return Ok(true);
        }
        content = planned.content;
    }
    Ok(false)
}

/// Desired content of a content-writing mutation given the current content.
struct Planned {
    content: Option<String>,
    changed: bool,
}

fn plan_content(
    mutation: &Mutation,
    target: &Path,
    current: Option<&str>,
    ctx: &ExecutionContext<'_>,
) -> Result<Planned, EngineError> {
    let planned = match mutation {
        Mutation::WriteTemplate {
            template_id,
            context,
            ..
        } => {
            let rendered = ctx.templates.render(template_id, &context(ctx.options))?;
            Planned {
                changed: current != Some(rendered.as_str()),
                content: Some(rendered),
            }
        }
        Mutation::TransformFile { transform, .. } => {
            let output = transform(
                current,
                &TransformContext {
                    options: ctx.options,
                    target,
                    fs: ctx.fs,
                },
            )?;
            Planned {
                changed: output.changed && output.content.as_deref() != current,
                content: output.content,
            }
        }
        Mutation::JsonMerge { value, .. } => {
            let mut doc = parse_json_object(target, current)?;
            let before = doc.clone();
            let Value::Object(patch) = value(ctx.options) else {
                return Err(EngineError::transform(target, "merge value must be a JSON object"));
            };
            merge_json(&mut doc, &patch);
            if current.is_some() && doc == before {
                Planned {
                    content: current.map(str::to_string),
                    changed: false,
                }
            } else {
                Planned {
                    content: Some(to_json_string(target, &doc)?),
                    changed: true,
                }
            }
        }
        Mutation::EnsureDirectory { .. } | Mutation::CreateBackup { .. } => Planned {
            content: current.map(str::to_string),
            changed: false,
        },
    };
    Ok(planned)
}

fn write_content(
    mutation: &Mutation,
    target: &Path,
    ctx: &ExecutionContext<'_>,
) -> Result<Outcome, EngineError> {
    let current = read_optional(ctx.fs, target)?;
    let planned = plan_content(mutation, target, current.as_deref(), ctx)?;

    if !planned.changed {
        return apply_mode(ctx.fs, target, mutation.mode());
    }

    let Some(content) = planned.content else {
        if current.is_none() {
            return Ok(Outcome::noop());
        }
        ctx.fs
            .remove_file(target)
            .map_err(|err| EngineError::fs("remove", target, err))?;
        return Ok(Outcome::changed(Effect::Delete, Detail::Delete));
    };

    let mode = match mutation.mode() {
        Some(mode) if stat_optional(ctx.fs, target)?.and_then(|s| s.mode) != Some(mode) => {
            Some(mode)
        }
        _ => None,
    };
    write_with_parents(ctx.fs, target, &content, mode)?;
    let detail = if current.is_none() {
        Detail::Create
    } else {
        Detail::Update
    };
    Ok(Outcome::changed(Effect::Write, detail))
}

/// Bring the permission bits of unchanged content to `mode`, reported as a
/// permissions change.
fn apply_mode(
    fs: &dyn FileSystem,
    target: &Path,
    mode: Option<u32>,
) -> Result<Outcome, EngineError> {
    let Some(mode) = mode else {
        return Ok(Outcome::noop());
    };
    let Some(stat) = stat_optional(fs, target)? else {
        return Ok(Outcome::noop());
    };
    // No mode bits on this platform, or a file only written in the overlay.
    if stat.mode.is_none() || stat.mode == Some(mode) {
        return Ok(Outcome::noop());
    }
    fs.set_mode(target, mode)
        .map_err(|err| EngineError::fs("chmod", target, err))?;
    Ok(Outcome::changed(Effect::Write, Detail::Permissions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MutationKind;
    use crate::io::templates::BuiltinTemplates;
    use crate::mutation::TransformOutput;
    use crate::test_support::{
        MemoryFileSystem, RecordingObserver, execution_context as context, options,
    };
    use serde_json::json;
    use std::path::PathBuf;

    fn append_line(line: &'static str) -> Mutation {
        Mutation::transform_file(
            "append",
            |o| o.home.join("notes.txt"),
            move |current, _| {
                let current = current.unwrap_or_default();
                if current.lines().any(|l| l == line) {
                    return Ok(TransformOutput::unchanged(Some(current)));
                }
                Ok(TransformOutput::write(format!("{current}{line}\n")))
            },
        )
    }

    #[test]
    fn later_mutations_see_earlier_writes() {
        let fs = MemoryFileSystem::new();
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);

        let records = run_mutations(
            &[append_line("one"), append_line("two")],
            &ctx,
            &mut NoopObserver,
        )
        .expect("run");

        assert_eq!(records[0].outcome.detail, Detail::Create);
        assert_eq!(records[1].outcome.detail, Detail::Update);
        assert_eq!(fs.contents("/h/notes.txt").as_deref(), Some("one\ntwo\n"));
    }

    #[test]
    fn json_merge_is_idempotent_and_keeps_user_fields() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/app.json", "{\"theme\": \"dark\"}");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let mutations = [Mutation::json_merge(
            "merge",
            |o| o.home.join("app.json"),
            |o| json!({ "provider": { "baseURL": o.base_url } }),
        )];

        let first = run_mutations(&mutations, &ctx, &mut NoopObserver).expect("first");
        let second = run_mutations(&mutations, &ctx, &mut NoopObserver).expect("second");

        assert_eq!(first[0].outcome, Outcome::changed(Effect::Write, Detail::Update));
        assert_eq!(second[0].outcome, Outcome::noop());
        let written: Value =
            serde_json::from_str(&fs.contents("/h/app.json").expect("file")).expect("json");
        assert_eq!(
            written,
            json!({ "theme": "dark", "provider": { "baseURL": "https://api.example.test/v1" } })
        );
    }

    #[test]
    fn unparsable_json_aborts_and_reports_error() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/app.json", "{ not json");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let mutations = [
            Mutation::json_merge("merge", |o| o.home.join("app.json"), |_| json!({ "a": 1 })),
            Mutation::ensure_directory("never", |o| o.home.join("never")),
        ];
        let mut observer = RecordingObserver::default();

        let err = run_mutations(&mutations, &ctx, &mut observer).unwrap_err();

        assert!(matches!(err, EngineError::Transform { .. }));
        assert_eq!(observer.events, vec!["start:merge", "error:merge"]);
        assert_eq!(fs.contents("/h/app.json").as_deref(), Some("{ not json"));
        assert!(!fs.exists("/h/never"));
    }

    #[test]
    fn backup_only_when_a_later_step_changes_the_target() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/notes.txt", "one\n");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let mutations = [
            Mutation::create_backup("backup", |o| o.home.join("notes.txt")),
            append_line("one"),
        ];

        let records = run_mutations(&mutations, &ctx, &mut NoopObserver).expect("run");
        assert_eq!(records[0].outcome, Outcome::noop());
        assert!(!fs.exists("/h/notes.txt.backup.20260101T000000000Z"));

        let mutations = [
            Mutation::create_backup("backup", |o| o.home.join("notes.txt")),
            append_line("two"),
        ];
        let records = run_mutations(&mutations, &ctx, &mut NoopObserver).expect("run");
        assert_eq!(records[0].outcome, Outcome::changed(Effect::Copy, Detail::Backup));
        assert_eq!(
            fs.contents("/h/notes.txt.backup.20260101T000000000Z").as_deref(),
            Some("one\n")
        );
    }

    #[test]
    fn transform_returning_none_deletes_the_file() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/notes.txt", "x\n");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let delete = || {
            Mutation::transform_file(
                "delete",
                |o| o.home.join("notes.txt"),
                |current, _| {
                    Ok(match current {
                        Some(_) => TransformOutput::delete(),
                        None => TransformOutput::unchanged(None),
                    })
                },
            )
        };

        let first = run_mutations(&[delete()], &ctx, &mut NoopObserver).expect("run");
        let second = run_mutations(&[delete()], &ctx, &mut NoopObserver).expect("run");
        assert_eq!(first[0].outcome, Outcome::changed(Effect::Delete, Detail::Delete));
        assert_eq!(second[0].outcome, Outcome::noop());
        assert!(!fs.exists("/h/notes.txt"));
    }

    #[test]
    fn template_mode_drift_is_a_permissions_change() {
        let fs = MemoryFileSystem::new();
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let helper = || {
            Mutation::write_template(
                "helper",
                |o| o.home.join(".claude/key.sh"),
                crate::io::templates::API_KEY_HELPER,
                |o| json!({ "service": "claude-code", "api_key": o.api_key }),
            )
            .with_mode(0o700)
        };

        let created = run_mutations(&[helper()], &ctx, &mut NoopObserver).expect("run");
        assert_eq!(created[0].outcome, Outcome::changed(Effect::Write, Detail::Create));
        assert_eq!(fs.mode("/h/.claude/key.sh"), Some(0o700));

        fs.set_mode(Path::new("/h/.claude/key.sh"), 0o644).expect("chmod");
        let fixed = run_mutations(&[helper()], &ctx, &mut NoopObserver).expect("run");
        assert_eq!(fixed[0].outcome, Outcome::changed(Effect::Write, Detail::Permissions));
        assert_eq!(fixed[0].details.kind, MutationKind::WriteTemplate);

        let again = run_mutations(&[helper()], &ctx, &mut NoopObserver).expect("run");
        assert_eq!(again[0].outcome, Outcome::noop());
    }

    #[test]
    fn rewritten_secret_file_is_tightened_with_its_content() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/.claude/key.sh", "#!/bin/sh\nprintf '%s\\n' 'old'\n");
        fs.set_mode(Path::new("/h/.claude/key.sh"), 0o666).expect("chmod");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let helper = Mutation::write_template(
            "helper",
            |o| o.home.join(".claude/key.sh"),
            crate::io::templates::API_KEY_HELPER,
            |o| json!({ "service": "claude-code", "api_key": o.api_key }),
        )
        .with_mode(0o700);

        let records = run_mutations(&[helper], &ctx, &mut NoopObserver).expect("run");
        assert_eq!(records[0].outcome, Outcome::changed(Effect::Write, Detail::Update));
        assert_eq!(fs.mode("/h/.claude/key.sh"), Some(0o700));
        assert!(fs.contents("/h/.claude/key.sh").expect("helper").contains("'sk-test'"));
    }

    #[test]
    fn ensure_directory_over_a_file_is_an_fs_error() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/h/.codex", "oops");
        let opts = options("/h");
        let templates = BuiltinTemplates::new();
        let ctx = context(&fs, &opts, &templates);
        let err = run_mutations(
            &[Mutation::ensure_directory("dir", |o| o.home.join(".codex"))],
            &ctx,
            &mut NoopObserver,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Fs { ref path, .. } if *path == PathBuf::from("/h/.codex")));
    }
}
