//! Subprocess execution for prerequisite checks and install steps.
//!
//! The engine only depends on [`CommandRunner`]; tests inject scripted
//! runners. [`SystemCommandRunner`] spawns real processes with a timeout and
//! bounded output capture.

use std::io::{self, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

use crate::error::EngineError;

/// Exit code reported when the binary could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the command was killed after its timeout.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// True when the result means "tool absent" rather than "tool failed".
    pub fn is_missing_binary(&self) -> bool {
        if self.exit_code == EXIT_NOT_FOUND {
            return true;
        }
        let stderr = self.stderr.to_ascii_lowercase();
        self.exit_code != 0 && (stderr.contains("enoent") || stderr.contains("not found"))
    }
}

/// Runs a command to completion.
///
/// A missing binary is reported as a result with exit code 127, not as an
/// error. Errors are reserved for failures of the runner itself.
pub trait CommandRunner {
    fn run(&self, command: &str, args: &[String]) -> Result<CommandResult, EngineError>;
}

/// Spawns real processes.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10 * 60),
            output_limit_bytes: 1_000_000,
        }
    }
}

impl CommandRunner for SystemCommandRunner {
    #[instrument(skip_all, fields(command = %command))]
    fn run(&self, command: &str, args: &[String]) -> Result<CommandResult, EngineError> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        let output = match capture(cmd, self.timeout, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                debug!(command, "binary not found");
                return Ok(CommandResult {
                    stdout: String::new(),
                    stderr: format!("ENOENT: {command}: command not found"),
                    exit_code: EXIT_NOT_FOUND,
                });
            }
            Err(err) => {
                return Err(EngineError::Command {
                    command: command.to_string(),
                    message: format!("{err:#}"),
                });
            }
        };

        let mut stderr = output.stderr.into_text(command, "stderr");
        let exit_code = if output.timed_out {
            stderr.push_str(&format!("\n[{command} timed out after {:?}]\n", self.timeout));
            EXIT_TIMED_OUT
        } else {
            output.status.code().unwrap_or(1)
        };
        let stdout = output.stdout.into_text(command, "stdout");

        Ok(CommandResult {
            stdout,
            stderr,
            exit_code,
        })
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<io::Error>())
        .any(|io_err| io_err.kind() == io::ErrorKind::NotFound)
}

/// Raw output of a finished (or killed) child.
#[derive(Debug)]
struct CapturedOutput {
    status: ExitStatus,
    stdout: Stream,
    stderr: Stream,
    timed_out: bool,
}

/// Bytes kept from one pipe, plus how many were dropped past the limit.
#[derive(Debug, Default)]
struct Stream {
    kept: Vec<u8>,
    dropped: usize,
}

impl Stream {
    /// Lossy text with a trailing `[label stream truncated N bytes]` notice.
    fn into_text(self, label: &str, name: &str) -> String {
        let mut text = String::from_utf8_lossy(&self.kept).into_owned();
        if self.dropped > 0 {
            text.push_str(&format!("\n[{label} {name} truncated {} bytes]\n", self.dropped));
        }
        text
    }
}

/// Spawn `cmd`, draining both pipes on reader threads so a chatty child
/// cannot block on a full pipe. At most `output_limit_bytes` per stream are
/// kept; the rest is counted and discarded.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
fn capture(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let stdout = join(stdout_handle).context("join stdout")?;
    let stderr = join(stderr_handle).context("join stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CapturedOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join(handle: thread::JoinHandle<Result<Stream>>) -> Result<Stream> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader thread panicked")))
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<Stream> {
    let mut stream = Stream::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            return Ok(stream);
        }
        let keep = n.min(limit.saturating_sub(stream.kept.len()));
        stream.kept.extend_from_slice(&chunk[..keep]);
        stream.dropped += n - keep;
    }
}
