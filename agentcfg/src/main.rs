//! `agentcfg` command line.
//!
//! Points coding agent CLIs at an alternate API provider by editing their
//! config files. Every command accepts `--dry-run`, which prints the change as
//! shell-style commands with diffs instead of writing anything.

use std::path::PathBuf;
use std::time::Duration;

use agentcfg::core::render::{ReportedLines, describe_outcome, format_dry_run_operations};
use agentcfg::core::types::{MutationDetails, Outcome, RecordedOperation};
use agentcfg::error::EngineError;
use agentcfg::executor::MutationObserver;
use agentcfg::exit_codes;
use agentcfg::io::fs::RealFileSystem;
use agentcfg::io::process::SystemCommandRunner;
use agentcfg::io::settings::{Settings, SettingsStore, TomlSettingsStore};
use agentcfg::io::templates::BuiltinTemplates;
use agentcfg::logging;
use agentcfg::mutation::ServiceOptions;
use agentcfg::pipeline::{Action, Pipeline, RunOptions};
use agentcfg::prerequisites::{InstallOutcome, Prerequisite, PrerequisiteHooks};
use agentcfg::services;
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use console::style;

const API_KEY_ENV: &str = "POE_API_KEY";

#[derive(Parser)]
#[command(
    name = "agentcfg",
    version,
    about = "Configure coding agent CLIs to use an alternate API provider"
)]
struct Cli {
    /// Print what would change without writing anything.
    #[arg(long, global = true)]
    dry_run: bool,

    /// Print every mutation and prerequisite as it runs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Home directory the tool configs live under (default: $HOME).
    #[arg(long, global = true, value_name = "DIR")]
    home: Option<PathBuf>,

    /// agentcfg settings file (default: <config dir>/agentcfg/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Point a tool at the provider.
    Configure {
        service: String,
        #[command(flatten)]
        provider: ProviderArgs,
        /// Install the tool first when it is missing.
        #[arg(long)]
        install: bool,
    },
    /// Undo `configure`, leaving hand-edited settings alone.
    Remove {
        service: String,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Install a tool with its package manager.
    Install { service: String },
    /// Ask a configured tool for a fixed answer through the provider.
    Test { service: String },
    /// Copy the newest backups back over a tool's config files.
    Restore { service: String },
    /// Store the provider API key.
    Login {
        /// API key (default: $POE_API_KEY).
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Forget the stored API key.
    Logout,
    /// List the tools agentcfg can configure.
    List,
}

#[derive(Args, Debug, Default, Clone)]
struct ProviderArgs {
    /// API key (default: stored key, then $POE_API_KEY).
    #[arg(long)]
    api_key: Option<String>,
    /// Provider base URL (default: from settings).
    #[arg(long)]
    base_url: Option<String>,
    /// Model to select (default: from settings).
    #[arg(long)]
    model: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_code(&err));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(engine) if engine.is_prerequisite() => exit_codes::PREREQUISITE_FAILED,
        Some(EngineError::UnknownService(_) | EngineError::InvalidManifest { .. }) | None => {
            exit_codes::INVALID
        }
        Some(_) => exit_codes::MUTATION_FAILED,
    }
}

/// Resolved global flags.
struct Env {
    home: PathBuf,
    store: TomlSettingsStore,
    settings: Settings,
    dry_run: bool,
    verbose: bool,
}

fn run(cli: Cli) -> Result<()> {
    let home = match cli.home {
        Some(home) => home,
        None => dirs::home_dir().context("could not determine home directory; pass --home")?,
    };
    let store = TomlSettingsStore::new(
        cli.config
            .unwrap_or_else(|| TomlSettingsStore::default_path(&home)),
    );
    let settings = store.load()?;
    let env = Env {
        home,
        store,
        settings,
        dry_run: cli.dry_run,
        verbose: cli.verbose,
    };

    match cli.command {
        Command::Configure {
            service,
            provider,
            install,
        } => cmd_mutate(&env, &service, Action::Configure, &provider, install),
        Command::Remove { service, provider } => {
            cmd_mutate(&env, &service, Action::Remove, &provider, false)
        }
        Command::Install { service } => cmd_install(&env, &service),
        Command::Test { service } => cmd_test(&env, &service),
        Command::Restore { service } => cmd_restore(&env, &service),
        Command::Login { api_key } => cmd_login(&env, api_key),
        Command::Logout => cmd_logout(&env),
        Command::List => {
            for manifest in services::all() {
                println!("{:<12} {}", manifest.id, manifest.summary);
            }
            Ok(())
        }
    }
}

fn runner(settings: &Settings) -> SystemCommandRunner {
    SystemCommandRunner {
        timeout: Duration::from_secs(settings.command_timeout_secs),
        output_limit_bytes: settings.output_limit_bytes,
    }
}

fn env_api_key() -> Option<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|key| !key.trim().is_empty())
}

/// Options for a manifest run. Configure needs a key; remove adopts whatever
/// key the config files hold, so an empty one is fine there.
fn service_options(env: &Env, provider: &ProviderArgs, action: Action) -> Result<ServiceOptions> {
    let api_key = provider
        .api_key
        .clone()
        .or_else(|| env.settings.api_key.clone())
        .or_else(env_api_key);
    let api_key = match (api_key, action) {
        (Some(key), _) => key,
        (None, Action::Remove) => String::new(),
        (None, Action::Configure) => {
            bail!("no API key: pass --api-key, run `agentcfg login`, or set {API_KEY_ENV}")
        }
    };
    Ok(ServiceOptions {
        home: env.home.clone(),
        api_key,
        base_url: provider
            .base_url
            .clone()
            .unwrap_or_else(|| env.settings.base_url.clone()),
        model: provider
            .model
            .clone()
            .unwrap_or_else(|| env.settings.model.clone()),
    })
}

fn cmd_mutate(
    env: &Env,
    service: &str,
    action: Action,
    provider: &ProviderArgs,
    install: bool,
) -> Result<()> {
    let manifest = services::find(service)?;
    let options = service_options(env, provider, action)?;
    let fs = RealFileSystem;
    let runner = runner(&env.settings);
    let templates = BuiltinTemplates::new();
    let mut pipeline = Pipeline::new(&fs, &runner, &templates);
    let mut observer = ConsoleObserver::new(env.dry_run || env.verbose);
    let mut hooks = ConsoleHooks {
        verbose: env.verbose,
    };
    let run = RunOptions {
        dry_run: env.dry_run,
        auto_install: install,
    };

    let report = pipeline
        .run(&manifest, action, &options, run, &mut observer, &mut hooks)
        .with_context(|| format!("{action} {}", manifest.id))?;

    if report.dry_run {
        print_operations(&observer.reported, &report.operations);
        println!("{}", style("Dry run: no files were changed.").dim());
    } else if !report.changed() {
        println!("{} is already up to date.", manifest.id);
    } else {
        match action {
            Action::Configure => println!("Configured {}.", manifest.id),
            Action::Remove => println!("Removed {} configuration.", manifest.id),
        }
    }
    Ok(())
}

fn cmd_install(env: &Env, service: &str) -> Result<()> {
    let manifest = services::find(service)?;
    let fs = RealFileSystem;
    let runner = runner(&env.settings);
    let templates = BuiltinTemplates::new();
    let pipeline = Pipeline::new(&fs, &runner, &templates);
    match pipeline.install(&manifest, env.dry_run)? {
        InstallOutcome::AlreadyInstalled => println!("{} is already installed.", manifest.id),
        InstallOutcome::Installed => println!("Installed {}.", manifest.id),
        InstallOutcome::WouldInstall => {
            if let Some(definition) = &manifest.install {
                for step in &definition.steps {
                    println!("{} {}", style(step).cyan(), style("# install").dim());
                }
            }
        }
    }
    Ok(())
}

fn cmd_test(env: &Env, service: &str) -> Result<()> {
    let manifest = services::find(service)?;
    if env.dry_run {
        println!("{}", style("Dry run: health checks talk to the provider; skipped.").dim());
        return Ok(());
    }
    let fs = RealFileSystem;
    let runner = runner(&env.settings);
    let templates = BuiltinTemplates::new();
    let mut pipeline = Pipeline::new(&fs, &runner, &templates);
    let mut hooks = ConsoleHooks {
        verbose: env.verbose,
    };
    pipeline.check(&manifest, &mut hooks)?;
    println!("{} is healthy.", manifest.id);
    Ok(())
}

fn cmd_restore(env: &Env, service: &str) -> Result<()> {
    let manifest = services::find(service)?;
    let options = ServiceOptions {
        home: env.home.clone(),
        api_key: String::new(),
        base_url: env.settings.base_url.clone(),
        model: env.settings.model.clone(),
    };
    let fs = RealFileSystem;
    let runner = runner(&env.settings);
    let templates = BuiltinTemplates::new();
    let mut pipeline = Pipeline::new(&fs, &runner, &templates);
    let report = pipeline.restore(&manifest, &options, env.dry_run)?;

    if env.dry_run {
        print_operations(&ReportedLines::new(), &report.operations);
        return Ok(());
    }
    if report.restored.is_empty() {
        println!("No backups found for {}.", manifest.id);
    }
    for target in &report.restored {
        println!("Restored {}", target.display());
    }
    Ok(())
}

fn cmd_login(env: &Env, api_key: Option<String>) -> Result<()> {
    let Some(api_key) = api_key.or_else(env_api_key) else {
        bail!("no API key: pass --api-key or set {API_KEY_ENV}");
    };
    if env.dry_run {
        println!("Would store API key in {}", env.store.path().display());
        return Ok(());
    }
    let settings = Settings {
        api_key: Some(api_key),
        ..env.settings.clone()
    };
    env.store.save(&settings)?;
    println!("Stored API key in {}", env.store.path().display());
    Ok(())
}

fn cmd_logout(env: &Env) -> Result<()> {
    if env.settings.api_key.is_none() {
        println!("No API key stored.");
        return Ok(());
    }
    if env.dry_run {
        println!("Would remove API key from {}", env.store.path().display());
        return Ok(());
    }
    let settings = Settings {
        api_key: None,
        ..env.settings.clone()
    };
    env.store.save(&settings)?;
    println!("Removed API key from {}", env.store.path().display());
    Ok(())
}

fn print_operations(reported: &ReportedLines, operations: &[RecordedOperation]) {
    for entry in reported.filter(format_dry_run_operations(operations)) {
        println!("{entry}");
    }
}

/// Prints one line per mutation and remembers it, so the post-run operation
/// listing does not repeat it.
struct ConsoleObserver {
    enabled: bool,
    reported: ReportedLines,
}

impl ConsoleObserver {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            reported: ReportedLines::new(),
        }
    }
}

impl MutationObserver for ConsoleObserver {
    fn on_complete(&mut self, details: &MutationDetails, outcome: &Outcome) {
        if !self.enabled {
            return;
        }
        if let Some(line) = describe_outcome(details, outcome) {
            println!("{line}");
            self.reported.record(&line);
        }
    }

    fn on_error(&mut self, details: &MutationDetails, _error: &EngineError) {
        if self.enabled {
            println!("{} {}", style("failed:").red(), details.label);
        }
    }
}

struct ConsoleHooks {
    verbose: bool,
}

impl PrerequisiteHooks for ConsoleHooks {
    fn on_start(&mut self, prerequisite: &Prerequisite) {
        if self.verbose {
            println!("{} {}", style("check").dim(), prerequisite.description);
        }
    }

    fn on_success(&mut self, prerequisite: &Prerequisite) {
        if self.verbose {
            println!("{} {}", style("ok").green(), prerequisite.description);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_configure_with_overrides() {
        let cli = Cli::parse_from([
            "agentcfg",
            "configure",
            "codex",
            "--model",
            "GPT-5",
            "--install",
            "--dry-run",
        ]);
        assert!(cli.dry_run);
        match cli.command {
            Command::Configure {
                service,
                provider,
                install,
            } => {
                assert_eq!(service, "codex");
                assert_eq!(provider.model.as_deref(), Some("GPT-5"));
                assert!(provider.api_key.is_none());
                assert!(install);
            }
            _ => panic!("expected configure"),
        }
    }

    #[test]
    fn parse_global_flags_before_subcommand() {
        let cli = Cli::parse_from(["agentcfg", "--home", "/tmp/h", "-v", "remove", "opencode"]);
        assert_eq!(cli.home, Some(PathBuf::from("/tmp/h")));
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Remove { ref service, .. } if service == "opencode"));
    }

    #[test]
    fn parse_list() {
        let cli = Cli::parse_from(["agentcfg", "list"]);
        assert!(matches!(cli.command, Command::List));
    }

    fn env(settings: Settings) -> Env {
        Env {
            home: PathBuf::from("/h"),
            store: TomlSettingsStore::new("/h/.config/agentcfg/config.toml"),
            settings,
            dry_run: false,
            verbose: false,
        }
    }

    #[test]
    fn flags_override_stored_settings() {
        let env = env(Settings {
            api_key: Some("sk-stored".to_string()),
            ..Settings::default()
        });
        let provider = ProviderArgs {
            model: Some("GPT-5".to_string()),
            ..ProviderArgs::default()
        };
        let options = service_options(&env, &provider, Action::Configure).expect("options");
        assert_eq!(options.api_key, "sk-stored");
        assert_eq!(options.model, "GPT-5");
        assert_eq!(options.base_url, Settings::default().base_url);
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        let prerequisite = anyhow::Error::new(EngineError::Install {
            command: "npm install -g x".to_string(),
            exit_code: 1,
            stdout: String::new(),
            stderr: String::new(),
        })
        .context("configure codex");
        assert_eq!(exit_code(&prerequisite), exit_codes::PREREQUISITE_FAILED);

        let unknown = anyhow::Error::new(EngineError::UnknownService("roo".to_string()));
        assert_eq!(exit_code(&unknown), exit_codes::INVALID);

        let transform = anyhow::Error::new(EngineError::transform("/h/a.json", "parse json"));
        assert_eq!(exit_code(&transform), exit_codes::MUTATION_FAILED);

        assert_eq!(exit_code(&anyhow::anyhow!("bad flag")), exit_codes::INVALID);
    }
}
