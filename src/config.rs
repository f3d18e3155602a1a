//! Configuration loading and validation.
//!
//! Settings come from a TOML file (default `~/.keyring-agent/config.toml`,
//! or `$KEYRING_AGENT_CONFIG`). Environment variables override file values;
//! file values override defaults. A missing file means all defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::perm::PermissionMask;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "KEYRING_AGENT_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Keyring actor settings.
    pub keyring: KeyringConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

/// Settings for one keyring actor.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// Name of the session keyring to join.
    pub name: String,

    /// Kernel key type used for stored secrets.
    pub key_type: String,

    /// Requests that may queue before callers wait for space.
    pub mailbox_capacity: usize,

    /// Name given to the actor's OS thread.
    pub thread_name: String,

    /// Permission mask applied to the keyring right after it is joined.
    pub permission: Option<PermissionMask>,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            name: default_keyring_name(),
            key_type: default_key_type(),
            mailbox_capacity: default_mailbox_capacity(),
            thread_name: default_thread_name(),
            permission: None,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines on stderr instead of human-readable output.
    pub json: bool,

    /// Directory for daily-rotated JSON log files. Disabled when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
        }
    }
}

// Default value functions for serde

fn default_keyring_name() -> String {
    "keyring-agent".to_owned()
}
fn default_key_type() -> String {
    "user".to_owned()
}
fn default_mailbox_capacity() -> usize {
    32
}
fn default_thread_name() -> String {
    "keyring-actor".to_owned()
}
fn default_log_level() -> String {
    "info".to_owned()
}

impl Config {
    /// Check values that would otherwise only fail once the actor starts.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid field.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.keyring.name.trim().is_empty(),
            "keyring.name must not be empty"
        );
        anyhow::ensure!(
            !self.keyring.key_type.trim().is_empty(),
            "keyring.key_type must not be empty"
        );
        anyhow::ensure!(
            self.keyring.mailbox_capacity > 0,
            "keyring.mailbox_capacity must be at least 1"
        );
        anyhow::ensure!(
            ![&self.keyring.name, &self.keyring.key_type, &self.keyring.thread_name]
                .iter()
                .any(|value| value.contains('\0')),
            "keyring names must not contain NUL bytes"
        );
        Ok(())
    }

    /// Apply environment variable overrides (env > file > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process env.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("KEYRING_AGENT_KEYRING") {
            self.keyring.name = v;
        }
        if let Some(v) = env("KEYRING_AGENT_MAILBOX_CAPACITY") {
            match v.parse() {
                Ok(n) => self.keyring.mailbox_capacity = n,
                Err(_) => tracing::warn!(
                    var = "KEYRING_AGENT_MAILBOX_CAPACITY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
        if let Some(v) = env("KEYRING_AGENT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("KEYRING_AGENT_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
    }
}

/// Load configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Load configuration, falling back to defaults when the file is absent.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    match std::fs::metadata(path) {
        Ok(_) => load_config(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(anyhow::anyhow!(
            "failed to stat config at {}: {e}",
            path.display()
        )),
    }
}

/// Resolve the default config directory (`~/.keyring-agent/`).
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".keyring-agent"))
}

/// Resolve the config file path, honouring [`CONFIG_PATH_ENV`].
///
/// # Errors
///
/// Returns an error if no override is set and the home directory cannot be
/// determined.
pub fn config_path(env: impl Fn(&str) -> Option<String>) -> anyhow::Result<PathBuf> {
    if let Some(p) = env(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(p));
    }
    Ok(config_dir()?.join("config.toml"))
}
