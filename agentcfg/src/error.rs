//! Error taxonomy for the mutation engine and prerequisite orchestrator.
//!
//! Reading an absent file is not an error: [`crate::io::fs::read_optional`]
//! maps it to `None`. Everything here is fatal for the current run and is
//! propagated unmodified to the CLI boundary.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A structured document could not be parsed, merged or produced.
    #[error("transform failed for {}: {message}", .path.display())]
    Transform { path: PathBuf, message: String },

    /// Permission denied, disk full, and every other filesystem failure.
    #[error("{operation} {}: {source}", .path.display())]
    Fs {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("render template {id}: {message}")]
    Template { id: String, message: String },

    /// A prerequisite check failed; captured output is kept for diagnostics.
    #[error("{}", prerequisite_message(.description, .message, .stdout, .stderr))]
    Prerequisite {
        id: String,
        description: String,
        message: String,
        stdout: String,
        stderr: String,
    },

    /// An install command exited nonzero.
    #[error("install step `{command}` exited with code {exit_code}: {}", .stderr.trim())]
    Install {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// The command runner itself failed (not a nonzero exit).
    #[error("run `{command}`: {message}")]
    Command { command: String, message: String },

    #[error("invalid manifest {id}: {message}")]
    InvalidManifest { id: String, message: String },

    #[error("unknown service `{0}`")]
    UnknownService(String),
}

impl EngineError {
    pub fn fs(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Fs {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Transform {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures raised by prerequisite checks or install steps.
    pub fn is_prerequisite(&self) -> bool {
        matches!(self, Self::Prerequisite { .. } | Self::Install { .. })
    }
}

fn prerequisite_message(description: &str, message: &str, stdout: &str, stderr: &str) -> String {
    let mut buf = format!("{description}: {message}");
    if !stdout.trim().is_empty() {
        buf.push_str("\n=== stdout ===\n");
        buf.push_str(stdout.trim_end());
    }
    if !stderr.trim().is_empty() {
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(stderr.trim_end());
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prerequisite_error_includes_captured_output() {
        let err = EngineError::Prerequisite {
            id: "codex-health".to_string(),
            description: "Codex health check".to_string(),
            message: "unexpected output".to_string(),
            stdout: "nope\n".to_string(),
            stderr: "boom\n".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Codex health check: unexpected output"));
        assert!(msg.contains("=== stdout ===\nnope"));
        assert!(msg.contains("=== stderr ===\nboom"));
        assert!(err.is_prerequisite());
    }

    #[test]
    fn fs_error_names_operation_and_path() {
        let err = EngineError::fs(
            "write",
            "/h/.codex/config.toml",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().starts_with("write /h/.codex/config.toml"));
        assert!(!err.is_prerequisite());
    }
}
