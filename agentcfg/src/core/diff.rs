//! Line-set diff used by the dry-run preview.
//!
//! This is not a minimal edit script: every line of `before` that does not
//! appear anywhere in `after` is removed, and every line of `after` that does
//! not appear anywhere in `before` is added. Config files are small and mostly
//! key/value lines, so the result reads like a unified diff of the changed keys.

use std::collections::HashSet;

/// A single diff line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Removed(String),
    Added(String),
}

/// Diff between two versions of a text file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff {
    pub before_len: usize,
    pub after_len: usize,
    pub lines: Vec<DiffLine>,
}

impl LineDiff {
    /// `@@ -1,<before> +1,<after> @@`
    pub fn hunk_header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            start(self.before_len),
            self.before_len,
            start(self.after_len),
            self.after_len
        )
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

fn start(len: usize) -> usize {
    usize::from(len > 0)
}

/// Compute the line-set diff between `before` and `after`.
///
/// Returns `None` when the two inputs are identical.
pub fn line_diff(before: &str, after: &str) -> Option<LineDiff> {
    if before == after {
        return None;
    }
    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let before_set: HashSet<&str> = before_lines.iter().copied().collect();
    let after_set: HashSet<&str> = after_lines.iter().copied().collect();

    let mut lines = Vec::new();
    for line in &before_lines {
        if !after_set.contains(line) {
            lines.push(DiffLine::Removed((*line).to_string()));
        }
    }
    for line in &after_lines {
        if !before_set.contains(line) {
            lines.push(DiffLine::Added((*line).to_string()));
        }
    }

    Some(LineDiff {
        before_len: before_lines.len(),
        after_len: after_lines.len(),
        lines,
    })
}
