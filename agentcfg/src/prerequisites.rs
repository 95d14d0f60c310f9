//! Environment checks that gate the mutation phase.
//!
//! Prerequisites are registered per [`Phase`] and run strictly in
//! registration order. The first failure aborts the phase and propagates, so a
//! failing "before" check stops the mutations and the "after" phase from ever
//! running.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::error::EngineError;
use crate::io::process::{CommandResult, CommandRunner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Before => "before",
            Phase::After => "after",
        })
    }
}

/// What a prerequisite may use while it runs.
#[derive(Clone, Copy)]
pub struct PrerequisiteContext<'a> {
    pub dry_run: bool,
    pub runner: &'a dyn CommandRunner,
}

pub type CheckFn = Box<dyn Fn(&PrerequisiteContext<'_>) -> Result<(), EngineError>>;

/// A named check or install action. Stateless across runs.
pub struct Prerequisite {
    pub id: String,
    pub description: String,
    check: CheckFn,
}

impl Prerequisite {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        check: impl Fn(&PrerequisiteContext<'_>) -> Result<(), EngineError> + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            check: Box::new(check),
        }
    }

    pub fn run(&self, ctx: &PrerequisiteContext<'_>) -> Result<(), EngineError> {
        (self.check)(ctx)
    }
}

fn failure(
    id: &str,
    description: &str,
    message: impl Into<String>,
    output: &CommandResult,
) -> EngineError {
    EngineError::Prerequisite {
        id: id.to_string(),
        description: description.to_string(),
        message: message.into(),
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    }
}

impl fmt::Debug for Prerequisite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prerequisite")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Observer for prerequisite progress.
pub trait PrerequisiteHooks {
    fn on_start(&mut self, _prerequisite: &Prerequisite) {}
    fn on_success(&mut self, _prerequisite: &Prerequisite) {}
    fn on_failure(&mut self, _prerequisite: &Prerequisite, _error: &EngineError) {}
}

/// Hooks that ignore every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl PrerequisiteHooks for NoopHooks {}

/// Prerequisites registered for one run, by phase.
#[derive(Default)]
pub struct PrerequisiteManager<'p> {
    before: Vec<&'p Prerequisite>,
    after: Vec<&'p Prerequisite>,
}

impl<'p> PrerequisiteManager<'p> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, phase: Phase, prerequisite: &'p Prerequisite) {
        match phase {
            Phase::Before => self.before.push(prerequisite),
            Phase::After => self.after.push(prerequisite),
        }
    }

    pub fn registered(&self, phase: Phase) -> &[&'p Prerequisite] {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    /// Run every prerequisite of `phase` in order, stopping at the first
    /// failure.
    #[instrument(skip_all, fields(%phase))]
    pub fn run(
        &self,
        phase: Phase,
        ctx: &PrerequisiteContext<'_>,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<(), EngineError> {
        for prerequisite in self.registered(phase) {
            debug!(id = %prerequisite.id, "running prerequisite");
            hooks.on_start(prerequisite);
            match prerequisite.run(ctx) {
                Ok(()) => hooks.on_success(prerequisite),
                Err(err) => {
                    warn!(id = %prerequisite.id, err = %err, "prerequisite failed");
                    hooks.on_failure(prerequisite, &err);
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

/// `which <binary>` must exit 0.
pub fn binary_exists_check(id: impl Into<String>, binary: impl Into<String>) -> Prerequisite {
    let id = id.into();
    let binary = binary.into();
    let description = format!("`{binary}` is on PATH");
    Prerequisite::new(id.clone(), description.clone(), move |ctx| {
        let result = ctx.runner.run("which", std::slice::from_ref(&binary))?;
        if result.success() {
            return Ok(());
        }
        Err(failure(
            &id,
            &description,
            format!("`{binary}` was not found (exit code {})", result.exit_code),
            &result,
        ))
    })
}

/// Spawn the tool with a fixed prompt and require exit 0 plus `expected` as
/// the exact (trimmed) stdout. Skipped in dry runs, since it talks to the
/// provider.
pub fn health_check(
    id: impl Into<String>,
    description: impl Into<String>,
    binary: impl Into<String>,
    args: Vec<String>,
    expected: impl Into<String>,
) -> Prerequisite {
    let id = id.into();
    let description = description.into();
    let binary = binary.into();
    let expected = expected.into();
    Prerequisite::new(id.clone(), description.clone(), move |ctx| {
        if ctx.dry_run {
            debug!(binary = %binary, "health check skipped in dry run");
            return Ok(());
        }
        let result = ctx.runner.run(&binary, &args)?;
        let message = if result.is_missing_binary() {
            format!("`{binary}` is not installed")
        } else if !result.success() {
            format!("`{binary}` exited with code {}", result.exit_code)
        } else if result.stdout.trim() != expected {
            format!("expected output `{expected}`")
        } else {
            return Ok(());
        };
        Err(failure(&id, &description, message, &result))
    })
}

/// One install command, e.g. `npm install -g @openai/codex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCommand {
    pub command: String,
    pub args: Vec<String>,
}

impl InstallCommand {
    pub fn new(command: impl Into<String>, args: &[&str]) -> Self {
        Self {
            command: command.into(),
            args: args.iter().map(|arg| (*arg).to_string()).collect(),
        }
    }
}

impl fmt::Display for InstallCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How to get a missing tool onto PATH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallDefinition {
    pub id: String,
    pub summary: String,
    /// Binary whose presence means "installed".
    pub binary: String,
    pub steps: Vec<InstallCommand>,
}

impl InstallDefinition {
    /// Id of the binary-exists check, shared with manifests' before phase.
    pub fn check_id(&self) -> String {
        format!("{}-installed", self.binary)
    }

    pub fn check(&self) -> Prerequisite {
        binary_exists_check(self.check_id(), self.binary.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed,
    /// Dry run: the check failed and the steps were only logged.
    WouldInstall,
}

/// Check, install on failure, then re-check exactly once.
#[instrument(skip_all, fields(id = %definition.id))]
pub fn run_install(
    definition: &InstallDefinition,
    ctx: &PrerequisiteContext<'_>,
) -> Result<InstallOutcome, EngineError> {
    let check = definition.check();
    let Err(first) = check.run(ctx) else {
        debug!("already installed");
        return Ok(InstallOutcome::AlreadyInstalled);
    };
    info!(reason = %first, "tool missing, installing");

    if ctx.dry_run {
        for step in &definition.steps {
            info!(command = %step, "dry run: would run install step");
        }
        return Ok(InstallOutcome::WouldInstall);
    }

    for step in &definition.steps {
        info!(command = %step, "running install step");
        let result = ctx.runner.run(&step.command, &step.args)?;
        if !result.success() {
            return Err(EngineError::Install {
                command: step.to_string(),
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
    }

    check.run(ctx)?;
    Ok(InstallOutcome::Installed)
}

/// Before-phase prerequisite that installs the tool when it is missing.
pub fn auto_install(definition: InstallDefinition) -> Prerequisite {
    Prerequisite::new(
        definition.check_id(),
        format!("{} is installed", definition.summary),
        move |ctx| run_install(&definition, ctx).map(|_| ()),
    )
}
