//! Configuration for the presenza binary.
//!
//! TOML file plus `PRESENZA_*` environment, credential resolution
//! (env + keyring + plaintext), and translation to the runtime types of
//! `presenza_core`. [`FileSettings`] is the settings source the monitor
//! loads its channel list from; [`StateFile`] persists the override.

mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use presenza_core::{
    ChannelConfig, CoreError, CountField, DEFAULT_RULE_NAME, INSIDE_TOTAL_FIELD, MonitorConfig,
    OverridePolicy, PollingConfig, SettingsRepository,
};

pub use store::StateFile;

/// Keyring service name; entries are `<channel id>/password`.
pub const KEYRING_SERVICE: &str = "presenza";

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "PRESENZA_CONFIG";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password configured for channel '{channel}'")]
    NoCredentials { channel: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    /// Where the active override is persisted between restarts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    #[serde(default)]
    pub polling: PollingSection,

    #[serde(default, rename = "override")]
    pub overrides: OverrideSection,

    #[serde(default)]
    pub server: ServerSection,

    /// Values channels inherit unless they set their own.
    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub channels: Vec<ChannelEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollingSection {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_stale_after_polls")]
    pub stale_after_polls: u32,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            stale_after_polls: default_stale_after_polls(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}
fn default_request_timeout_ms() -> u64 {
    3000
}
fn default_stale_after_polls() -> u32 {
    3
}
fn default_sweep_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct OverrideSection {
    #[serde(default)]
    pub policy: OverridePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Bearer token for admin endpoints (plaintext; prefer `admin_token_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    /// Environment variable holding the admin token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token_env: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            admin_token: None,
            admin_token_env: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_rule_name")]
    pub rule_name: String,
    #[serde(default = "default_count_field")]
    pub count_field: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            rule_name: default_rule_name(),
            count_field: default_count_field(),
        }
    }
}

fn default_rule_name() -> String {
    DEFAULT_RULE_NAME.into()
}
fn default_count_field() -> String {
    INSIDE_TOTAL_FIELD.into()
}

/// One `[[channels]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Device-side channel index.
    #[serde(default = "default_channel")]
    pub channel: u32,

    #[serde(default = "default_username")]
    pub username: String,

    /// Plaintext password (prefer keyring or `password_env`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_field: Option<String>,
}

fn default_port() -> u16 {
    80
}
fn default_channel() -> u32 {
    1
}
fn default_username() -> String {
    "admin".into()
}
fn default_enabled() -> bool {
    true
}

impl Config {
    pub fn channel(&self, id: &str) -> Option<&ChannelEntry> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// A starter config with two disabled example channels.
    pub fn sample() -> Self {
        let entry = |id: &str, channel: u32| ChannelEntry {
            id: id.into(),
            name: None,
            host: "192.168.1.108".into(),
            port: default_port(),
            channel,
            username: default_username(),
            password: None,
            password_env: Some(format!("PRESENZA_{}_PASSWORD", id.to_uppercase())),
            enabled: false,
            rule_name: None,
            count_field: None,
        };
        Self {
            channels: vec![entry("d4", 3), entry("d6", 5)],
            ..Self::default()
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "presenza", "presenza").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the state file.
pub fn default_state_path() -> PathBuf {
    ProjectDirs::from("com", "presenza", "presenza").map_or_else(
        || dirs_fallback().join("state.json"),
        |dirs| dirs.data_local_dir().join("state.json"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("presenza");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full config: defaults, then the TOML file at `path` (or the
/// canonical path), then `PRESENZA_*` environment variables.
///
/// Nested keys use a double underscore: `PRESENZA_POLLING__INTERVAL_MS`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("PRESENZA_").ignore(&["CONFIG"]).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(channel_id: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{channel_id}/password"))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve a channel password: `password_env`, then keyring, then plaintext.
pub fn resolve_channel_secret(entry: &ChannelEntry) -> Result<SecretString, ConfigError> {
    // 1. Env var named by the entry
    if let Some(ref env_name) = entry.password_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(keyring) = keyring_entry(&entry.id) {
        if let Ok(secret) = keyring.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = entry.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        channel: entry.id.clone(),
    })
}

/// Store a channel password in the system keyring.
pub fn store_channel_secret(channel_id: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(channel_id)?
        .set_password(password)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// The admin bearer token, if one is configured.
pub fn resolve_admin_token(server: &ServerSection) -> Option<String> {
    server
        .admin_token_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| server.admin_token.clone())
        .filter(|t| !t.is_empty())
}

// ── Translation to runtime types ────────────────────────────────────

/// Build a runtime channel config. A missing password yields an empty
/// secret, which the monitor rejects for this channel only.
pub fn to_channel_config(entry: &ChannelEntry, defaults: &Defaults) -> ChannelConfig {
    let secret = resolve_channel_secret(entry).unwrap_or_else(|e| {
        warn!(channel = %entry.id, error = %e, "no usable password");
        SecretString::from(String::new())
    });
    let count_field = entry
        .count_field
        .as_deref()
        .unwrap_or(&defaults.count_field)
        .parse::<CountField>()
        .unwrap_or_default();

    let mut cfg = ChannelConfig::new(
        entry.id.as_str(),
        entry.host.clone(),
        entry.channel,
        entry.username.clone(),
        secret,
    );
    cfg.name.clone_from(&entry.name);
    cfg.port = entry.port;
    cfg.enabled = entry.enabled;
    cfg.rule_name = entry
        .rule_name
        .clone()
        .unwrap_or_else(|| defaults.rule_name.clone());
    cfg.count_field = count_field;
    cfg
}

/// Build the monitor's runtime config, validating polling values.
pub fn to_monitor_config(cfg: &Config) -> Result<MonitorConfig, ConfigError> {
    let polling = PollingConfig {
        interval: Duration::from_millis(cfg.polling.interval_ms),
        request_timeout: Duration::from_millis(cfg.polling.request_timeout_ms),
        stale_after_polls: cfg.polling.stale_after_polls,
        sweep_interval: Duration::from_millis(cfg.polling.sweep_interval_ms),
    };
    polling.validate().map_err(|e| ConfigError::Validation {
        field: "polling".into(),
        reason: match e {
            CoreError::ConfigError { message, .. } => message,
            other => other.to_string(),
        },
    })?;

    Ok(MonitorConfig {
        polling,
        override_policy: cfg.overrides.policy,
    })
}

/// State file path from config, else the platform default.
pub fn state_path(cfg: &Config) -> PathBuf {
    cfg.state_file.clone().unwrap_or_else(default_state_path)
}

// ── Settings repository ─────────────────────────────────────────────

/// Channel settings read from a loaded [`Config`].
///
/// Credentials are resolved at [`load`](SettingsRepository::load) time,
/// once; later edits to the file need a restart.
#[derive(Debug, Clone)]
pub struct FileSettings {
    config: Config,
}

impl FileSettings {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl SettingsRepository for FileSettings {
    fn load(&self) -> Result<Vec<ChannelConfig>, CoreError> {
        Ok(self
            .config
            .channels
            .iter()
            .map(|entry| to_channel_config(entry, &self.config.defaults))
            .collect())
    }
}
