//! End-to-end run of one manifest: before prerequisites, mutations, after
//! prerequisites.
//!
//! Dry runs swap the filesystem for a [`DryRunFileSystem`] over the real one
//! and hand the recorded operations back in the [`PipelineReport`]. Nothing
//! else about the run changes.

use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info, instrument};

use crate::core::types::RecordedOperation;
use crate::error::EngineError;
use crate::executor::{
    ExecutionContext, MutationObserver, MutationRecord, any_changed, run_service_configure,
    run_service_remove,
};
use crate::io::backup::{default_timestamp, restore_latest_backup};
use crate::io::fs::FileSystem;
use crate::io::process::CommandRunner;
use crate::io::shadow::{DryRunFileSystem, Recorder};
use crate::io::templates::TemplateRenderer;
use crate::mutation::{Manifest, ServiceOptions};
use crate::prerequisites::{
    InstallOutcome, Phase, Prerequisite, PrerequisiteContext, PrerequisiteHooks,
    PrerequisiteManager, auto_install, run_install,
};

/// Where a pipeline run currently is. `Failed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Before,
    Mutations,
    After,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Configure,
    Remove,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Configure => "configure",
            Action::Remove => "remove",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Install the tool when the before-phase binary check fails.
    pub auto_install: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub records: Vec<MutationRecord>,
    /// Simulated filesystem calls. Always empty for real runs.
    pub operations: Vec<RecordedOperation>,
    pub dry_run: bool,
}

impl PipelineReport {
    pub fn changed(&self) -> bool {
        any_changed(&self.records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Targets that had a backup copied over them.
    pub restored: Vec<PathBuf>,
    pub operations: Vec<RecordedOperation>,
}

/// Runs manifests against one filesystem and command runner.
pub struct Pipeline<'a> {
    fs: &'a dyn FileSystem,
    runner: &'a dyn CommandRunner,
    templates: &'a dyn TemplateRenderer,
    timestamp: &'a dyn Fn() -> String,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        fs: &'a dyn FileSystem,
        runner: &'a dyn CommandRunner,
        templates: &'a dyn TemplateRenderer,
    ) -> Self {
        Self {
            fs,
            runner,
            templates,
            timestamp: &default_timestamp,
            state: PipelineState::Idle,
        }
    }

    pub fn with_timestamp(mut self, timestamp: &'a dyn Fn() -> String) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn configure(
        &mut self,
        manifest: &Manifest,
        options: &ServiceOptions,
        run: RunOptions,
        observer: &mut dyn MutationObserver,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<PipelineReport, EngineError> {
        self.run(manifest, Action::Configure, options, run, observer, hooks)
    }

    pub fn remove(
        &mut self,
        manifest: &Manifest,
        options: &ServiceOptions,
        run: RunOptions,
        observer: &mut dyn MutationObserver,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<PipelineReport, EngineError> {
        self.run(manifest, Action::Remove, options, run, observer, hooks)
    }

    /// Run `action` for `manifest`. Prerequisites only gate `configure`;
    /// removal must work even when the tool is already gone.
    #[instrument(skip_all, fields(service = %manifest.id, %action, dry_run = run.dry_run))]
    pub fn run(
        &mut self,
        manifest: &Manifest,
        action: Action,
        options: &ServiceOptions,
        run: RunOptions,
        observer: &mut dyn MutationObserver,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<PipelineReport, EngineError> {
        self.state = PipelineState::Idle;
        let result = self.execute(manifest, action, options, run, observer, hooks);
        if result.is_err() {
            self.state = PipelineState::Failed;
        }
        result
    }

    fn execute(
        &mut self,
        manifest: &Manifest,
        action: Action,
        options: &ServiceOptions,
        run: RunOptions,
        observer: &mut dyn MutationObserver,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<PipelineReport, EngineError> {
        manifest.validate()?;

        let recorder = Recorder::new();
        let shadow;
        let fs: &dyn FileSystem = if run.dry_run {
            shadow = DryRunFileSystem::new(self.fs, &recorder);
            &shadow
        } else {
            self.fs
        };

        let installer: Option<Prerequisite> = match (&manifest.install, run.auto_install) {
            (Some(definition), true) => Some(auto_install(definition.clone())),
            _ => None,
        };
        let mut manager = PrerequisiteManager::new();
        if action == Action::Configure {
            for prerequisite in &manifest.prerequisites.before {
                match &installer {
                    Some(installer) if installer.id == prerequisite.id => {
                        manager.register(Phase::Before, installer);
                    }
                    _ => manager.register(Phase::Before, prerequisite),
                }
            }
            for prerequisite in &manifest.prerequisites.after {
                manager.register(Phase::After, prerequisite);
            }
        }
        let prerequisite_ctx = PrerequisiteContext {
            dry_run: run.dry_run,
            runner: self.runner,
        };

        self.state = PipelineState::Before;
        manager.run(Phase::Before, &prerequisite_ctx, hooks)?;

        self.state = PipelineState::Mutations;
        let ctx = ExecutionContext {
            fs,
            options,
            templates: self.templates,
            timestamp: self.timestamp,
            dry_run: run.dry_run,
        };
        let records = match action {
            Action::Configure => run_service_configure(manifest, &ctx, observer)?,
            Action::Remove => run_service_remove(manifest, &ctx, observer)?,
        };

        self.state = PipelineState::After;
        manager.run(Phase::After, &prerequisite_ctx, hooks)?;

        self.state = PipelineState::Complete;
        let report = PipelineReport {
            records,
            operations: recorder.drain(),
            dry_run: run.dry_run,
        };
        info!(changed = report.changed(), "pipeline complete");
        Ok(report)
    }

    /// Copy the newest backup over every file the configure list backs up.
    #[instrument(skip_all, fields(service = %manifest.id, dry_run = dry_run))]
    pub fn restore(
        &mut self,
        manifest: &Manifest,
        options: &ServiceOptions,
        dry_run: bool,
    ) -> Result<RestoreReport, EngineError> {
        let recorder = Recorder::new();
        let shadow;
        let fs: &dyn FileSystem = if dry_run {
            shadow = DryRunFileSystem::new(self.fs, &recorder);
            &shadow
        } else {
            self.fs
        };

        let mut restored = Vec::new();
        for target in manifest.backup_targets(options) {
            if restore_latest_backup(fs, &target)? {
                restored.push(target);
            } else {
                debug!(target = %target.display(), "nothing to restore");
            }
        }
        Ok(RestoreReport {
            restored,
            operations: recorder.drain(),
        })
    }

    /// Check, install when missing, re-check.
    pub fn install(&self, manifest: &Manifest, dry_run: bool) -> Result<InstallOutcome, EngineError> {
        let Some(definition) = &manifest.install else {
            return Err(EngineError::InvalidManifest {
                id: manifest.id.clone(),
                message: "no install definition".to_string(),
            });
        };
        run_install(
            definition,
            &PrerequisiteContext {
                dry_run,
                runner: self.runner,
            },
        )
    }

    /// Run only the after-phase checks, e.g. the health check of an already
    /// configured tool.
    pub fn check(
        &mut self,
        manifest: &Manifest,
        hooks: &mut dyn PrerequisiteHooks,
    ) -> Result<(), EngineError> {
        let mut manager = PrerequisiteManager::new();
        for prerequisite in &manifest.prerequisites.after {
            manager.register(Phase::After, prerequisite);
        }
        self.state = PipelineState::After;
        let ctx = PrerequisiteContext {
            dry_run: false,
            runner: self.runner,
        };
        match manager.run(Phase::After, &ctx, hooks) {
            Ok(()) => {
                self.state = PipelineState::Complete;
                Ok(())
            }
            Err(err) => {
                self.state = PipelineState::Failed;
                Err(err)
            }
        }
    }
}
