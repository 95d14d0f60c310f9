//! Shell-command style rendering of mutation outcomes and dry-run operations.
//!
//! Lines look like the command that would perform the change, followed by a
//! `# comment` naming the classification:
//!
//! ```text
//! mkdir -p /home/me/.codex # create
//! cat > /home/me/.codex/config.toml # update
//! @@ -1,2 +1,2 @@
//! -model = "old"
//! +model = "new"
//! ```
//!
//! Colors come from `console`, which disables them when stdout is not a
//! terminal, so tests and piped output see plain text.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use console::style;
use regex::Regex;

use super::diff::{DiffLine, line_diff};
use super::types::{
    Detail, MutationDetails, MutationKind, OperationKind, Outcome, RecordedOperation,
    is_backup_of,
};

const NO_CHANGE: &str = "# no change";
const RESTORE: &str = "restore";

static TRAILING_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+#\s[\w ]+$").expect("trailing comment regex is valid"));

/// Render every recorded operation, in order. Updates carry their diff on the
/// lines following the command.
pub fn format_dry_run_operations(ops: &[RecordedOperation]) -> Vec<String> {
    ops.iter().map(format_operation).collect()
}

fn format_operation(op: &RecordedOperation) -> String {
    let path = op.path.display();
    match &op.kind {
        OperationKind::Mkdir { existed: true } => unchanged(&format!("mkdir -p {path}")),
        OperationKind::Mkdir { existed: false } => {
            line(style(format!("mkdir -p {path}")).cyan(), Detail::Create)
        }
        OperationKind::Write => format_write(
            &op.path,
            op.before_content.as_deref(),
            op.after_content.as_deref(),
        ),
        OperationKind::Delete => line(style(format!("rm {path}")).red(), Detail::Delete),
        OperationKind::Copy { destination } if is_backup_of(&op.path, destination) => {
            backup_line(&op.path)
        }
        OperationKind::Copy { destination } => format_restore(
            &op.path,
            destination,
            op.before_content.as_deref(),
            op.after_content.as_deref(),
        ),
        OperationKind::Chmod { mode } => chmod_line(&op.path, *mode),
    }
}

fn format_write(path: &Path, before: Option<&str>, after: Option<&str>) -> String {
    let command = format!("cat > {}", path.display());
    let after = after.unwrap_or_default();
    let Some(before) = before else {
        return line(style(command).green(), Detail::Create);
    };
    let Some(body) = diff_body(before, after) else {
        return unchanged(&command);
    };
    let mut rendered = vec![line(style(command).yellow(), Detail::Update)];
    rendered.extend(body);
    rendered.join("\n")
}

/// A backup copied back over its target. The diff shows what the target
/// loses.
fn format_restore(
    backup: &Path,
    target: &Path,
    before: Option<&str>,
    after: Option<&str>,
) -> String {
    let command = style(format!("cp {} {}", backup.display(), target.display())).yellow();
    let mut rendered = vec![tagged(command, RESTORE)];
    if let Some(before) = before {
        rendered.extend(diff_body(before, after.unwrap_or_default()).unwrap_or_default());
    }
    rendered.join("\n")
}

/// Hunk header plus `-`/`+` lines, or `None` when nothing differs.
fn diff_body(before: &str, after: &str) -> Option<Vec<String>> {
    let diff = line_diff(before, after)?;
    let mut body = vec![style(diff.hunk_header()).cyan().to_string()];
    for diff_line in &diff.lines {
        body.push(match diff_line {
            DiffLine::Removed(text) => style(format!("-{text}")).red().to_string(),
            DiffLine::Added(text) => style(format!("+{text}")).green().to_string(),
        });
    }
    Some(body)
}

/// Render the one-line summary for a completed mutation.
///
/// Returns `None` for mutations that have nothing to show, such as a backup of
/// a target that does not exist.
pub fn describe_outcome(details: &MutationDetails, outcome: &Outcome) -> Option<String> {
    let path = details.target.display();
    let rendered = match details.kind {
        MutationKind::EnsureDirectory => {
            let command = format!("mkdir -p {path}");
            if outcome.changed {
                line(style(command).cyan(), Detail::Create)
            } else {
                unchanged(&command)
            }
        }
        MutationKind::CreateBackup => {
            if !outcome.changed {
                return None;
            }
            backup_line(&details.target)
        }
        MutationKind::WriteTemplate | MutationKind::TransformFile | MutationKind::JsonMerge => {
            let command = format!("cat > {path}");
            match outcome.detail {
                Detail::Create => line(style(command).green(), Detail::Create),
                Detail::Update => line(style(command).yellow(), Detail::Update),
                Detail::Delete => line(style(format!("rm {path}")).red(), Detail::Delete),
                Detail::Permissions => chmod_line(&details.target, details.mode.unwrap_or(0o644)),
                Detail::Backup | Detail::Noop => unchanged(&command),
            }
        }
    };
    Some(rendered)
}

fn line(command: console::StyledObject<String>, detail: Detail) -> String {
    tagged(command, detail.as_str())
}

fn tagged(command: console::StyledObject<String>, label: &str) -> String {
    format!("{command} {}", style(format!("# {label}")).dim())
}

fn unchanged(command: &str) -> String {
    style(format!("{command} {NO_CHANGE}")).dim().to_string()
}

fn backup_line(path: &Path) -> String {
    let path = path.display();
    line(style(format!("cp {path} {path}.bak")).cyan(), Detail::Backup)
}

fn chmod_line(path: &Path, mode: u32) -> String {
    line(
        style(format!("chmod {mode:o} {}", path.display())).cyan(),
        Detail::Permissions,
    )
}

/// Command text of a rendered line: ANSI codes and the trailing `# comment`
/// removed. Only the first line of a multi-line entry is considered.
pub fn normalize_command(rendered: &str) -> String {
    let stripped = console::strip_ansi_codes(rendered);
    let first = stripped.lines().next().unwrap_or_default();
    TRAILING_COMMENT_RE.replace(first, "").trim().to_string()
}

/// Commands already printed by verbose hooks during a run.
#[derive(Debug, Default, Clone)]
pub struct ReportedLines {
    commands: HashSet<String>,
}

impl ReportedLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rendered: &str) {
        self.commands.insert(normalize_command(rendered));
    }

    pub fn contains(&self, rendered: &str) -> bool {
        self.commands.contains(&normalize_command(rendered))
    }

    /// Drop entries whose command was already reported. A suppressed entry
    /// still contributes its diff lines, since hooks only print the command.
    pub fn filter(&self, entries: Vec<String>) -> Vec<String> {
        let mut kept = Vec::new();
        for entry in entries {
            if !self.contains(&entry) {
                kept.push(entry);
                continue;
            }
            if let Some((_, body)) = entry.split_once('\n') {
                kept.push(body.to_string());
            }
        }
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Effect;
    use std::path::PathBuf;

    fn op(
        kind: OperationKind,
        path: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> RecordedOperation {
        RecordedOperation {
            kind,
            path: PathBuf::from(path),
            before_content: before.map(str::to_string),
            after_content: after.map(str::to_string),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn plain(lines: Vec<String>) -> Vec<String> {
        lines
            .iter()
            .map(|l| console::strip_ansi_codes(l).to_string())
            .collect()
    }

    #[test]
    fn renders_each_operation_kind() {
        let ops = vec![
            op(OperationKind::Mkdir { existed: false }, "/h/.codex", None, None),
            op(OperationKind::Mkdir { existed: true }, "/h", None, None),
            op(OperationKind::Write, "/h/a.json", None, Some("{}\n")),
            op(OperationKind::Write, "/h/b.json", Some("same\n"), Some("same\n")),
            op(OperationKind::Delete, "/h/c.sh", Some("x"), None),
            op(
                OperationKind::Copy {
                    destination: PathBuf::from("/h/a.json.backup.1"),
                },
                "/h/a.json",
                Some("{}\n"),
                Some("{}\n"),
            ),
            op(OperationKind::Chmod { mode: 0o700 }, "/h/c.sh", None, None),
        ];

        assert_eq!(
            plain(format_dry_run_operations(&ops)),
            vec![
                "mkdir -p /h/.codex # create",
                "mkdir -p /h # no change",
                "cat > /h/a.json # create",
                "cat > /h/b.json # no change",
                "rm /h/c.sh # delete",
                "cp /h/a.json /h/a.json.bak # backup",
                "chmod 700 /h/c.sh # permissions",
            ]
        );
    }

    #[test]
    fn copy_back_from_a_backup_renders_as_restore() {
        let ops = vec![op(
            OperationKind::Copy {
                destination: PathBuf::from("/h/config.toml"),
            },
            "/h/config.toml.backup.20260101T000000000Z",
            Some("model = \"mine\"\n"),
            Some("model = \"old\"\n"),
        )];
        let rendered = plain(format_dry_run_operations(&ops)).join("\n");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(
            lines[0],
            "cp /h/config.toml.backup.20260101T000000000Z /h/config.toml # restore"
        );
        assert!(lines[1].starts_with("@@"));
        assert!(lines.contains(&"-model = \"mine\""));
        assert!(lines.contains(&"+model = \"old\""));
    }

    #[test]
    fn update_includes_hunk_and_prefixed_lines() {
        let ops = vec![op(
            OperationKind::Write,
            "/h/settings.json",
            Some("{\n  \"apiKey\": \"old\"\n}\n"),
            Some("{\n  \"apiKey\": \"new\"\n}\n"),
        )];
        let rendered = plain(format_dry_run_operations(&ops)).join("\n");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "cat > /h/settings.json # update");
        assert!(lines[1].starts_with("@@"));
        assert!(lines.iter().any(|l| l.starts_with('-') && l.contains("\"old\"")));
        assert!(lines.iter().any(|l| l.starts_with('+') && l.contains("\"new\"")));
    }

    #[test]
    fn normalize_strips_ansi_and_comment() {
        let colored = "\u{1b}[33mcat > /h/x\u{1b}[0m \u{1b}[2m# update\u{1b}[0m\n@@ -1,1 +1,1 @@";
        assert_eq!(normalize_command(colored), "cat > /h/x");
        assert_eq!(normalize_command("mkdir -p /h # no change"), "mkdir -p /h");
    }

    #[test]
    fn reported_lines_suppress_command_but_keep_diff() {
        let mut reported = ReportedLines::new();
        reported.record("cat > /h/x # create");
        reported.record("mkdir -p /h # create");

        let entries = vec![
            "mkdir -p /h # create".to_string(),
            "cat > /h/x # update\n@@ -1,1 +1,1 @@\n-a\n+b".to_string(),
            "rm /h/y # delete".to_string(),
        ];
        assert_eq!(
            reported.filter(entries),
            vec!["@@ -1,1 +1,1 @@\n-a\n+b".to_string(), "rm /h/y # delete".to_string()]
        );
    }

    #[test]
    fn describe_outcome_matches_operation_format() {
        let details = MutationDetails {
            index: 0,
            kind: MutationKind::EnsureDirectory,
            label: "Create ~/.codex".to_string(),
            target: PathBuf::from("/h/.codex"),
            mode: None,
        };
        let created = describe_outcome(&details, &Outcome::changed(Effect::Mkdir, Detail::Create))
            .expect("line");
        let kept = describe_outcome(&details, &Outcome::noop()).expect("line");
        assert_eq!(console::strip_ansi_codes(&created), "mkdir -p /h/.codex # create");
        assert_eq!(console::strip_ansi_codes(&kept), "mkdir -p /h/.codex # no change");

        let backup = MutationDetails {
            kind: MutationKind::CreateBackup,
            ..details.clone()
        };
        assert_eq!(describe_outcome(&backup, &Outcome::noop()), None);

        let script = MutationDetails {
            kind: MutationKind::WriteTemplate,
            target: PathBuf::from("/h/key.sh"),
            mode: Some(0o700),
            ..details
        };
        let chmod = describe_outcome(&script, &Outcome::changed(Effect::Write, Detail::Permissions))
            .expect("line");
        assert_eq!(console::strip_ansi_codes(&chmod), "chmod 700 /h/key.sh # permissions");
    }
}
