//! Persisted agentcfg settings (`<config dir>/agentcfg/config.toml`).
//!
//! Settings are read through a [`SettingsStore`] handed to the CLI at
//! startup; nothing in the engine reaches for a global config path.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.poe.com/v1";
pub const DEFAULT_MODEL: &str = "Claude-Sonnet-4.5";

/// agentcfg settings (TOML).
///
/// Edited by humans and by `agentcfg login`. Missing fields default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Provider API key stored by `agentcfg login`.
    pub api_key: Option<String>,

    /// OpenAI-compatible base URL of the provider.
    pub base_url: String,

    /// Default model written into tool configs.
    pub model: String,

    /// Kill prerequisite and install commands after this many seconds.
    pub command_timeout_secs: u64,

    /// Truncate captured command stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            command_timeout_secs: 10 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(anyhow!("base_url must be an http(s) URL"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must be non-empty"));
        }
        if self.command_timeout_secs == 0 {
            return Err(anyhow!("command_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            return Err(anyhow!("api_key must be non-empty when set"));
        }
        Ok(())
    }
}

/// Loads and saves [`Settings`].
pub trait SettingsStore {
    fn load(&self) -> Result<Settings>;
    fn save(&self, settings: &Settings) -> Result<()>;
}

/// Settings stored as a TOML file.
#[derive(Debug, Clone)]
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/agentcfg/config.toml`, falling back to `<home>/.config`.
    pub fn default_path(home: &Path) -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| home.join(".config"))
            .join("agentcfg")
            .join("config.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for TomlSettingsStore {
    /// If the file is missing, returns `Settings::default()`.
    fn load(&self) -> Result<Settings> {
        debug!(path = %self.path.display(), "loading settings");
        if !self.path.exists() {
            let settings = Settings::default();
            settings.validate()?;
            return Ok(settings);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Atomically write settings to disk (temp file + rename).
    fn save(&self, settings: &Settings) -> Result<()> {
        settings.validate()?;
        let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("settings path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    write_private(&tmp_path, contents)
        .with_context(|| format!("write temp settings {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace settings {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
const SETTINGS_MODE: u32 = 0o600;

/// Settings may hold the API key, so the file is readable by its owner only.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SETTINGS_MODE)
        .open(path)?;
    file.set_permissions(fs::Permissions::from_mode(SETTINGS_MODE))?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TomlSettingsStore::new(temp.path().join("missing.toml"));
        assert_eq!(store.load().expect("load"), Settings::default());
    }

    #[test]
    fn save_then_load_keeps_api_key() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = TomlSettingsStore::new(temp.path().join("agentcfg/config.toml"));
        let settings = Settings {
            api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        store.save(&settings).expect("save");
        assert_eq!(store.load().expect("load"), settings);
    }

    #[cfg(unix)]
    #[test]
    fn saved_settings_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let store = TomlSettingsStore::new(temp.path().join("config.toml"));
        let settings = Settings {
            api_key: Some("sk-test".to_string()),
            ..Settings::default()
        };
        store.save(&settings).expect("save");
        let mode = fs::metadata(store.path()).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "model = \"GPT-5\"\n").expect("write");
        let settings = TomlSettingsStore::new(&path).load().expect("load");
        assert_eq!(settings.model, "GPT-5");
        assert_eq!(settings.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let settings = Settings {
            base_url: "ftp://nope".to_string(),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        let settings = Settings {
            api_key: Some("  ".to_string()),
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }
}
