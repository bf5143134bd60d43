//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use presenza_config::ConfigError;
use presenza_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    /// Clean exit after `POST /api/admin/restart`; the supervisor restarts us.
    pub const RESTART: i32 = 75;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Device ───────────────────────────────────────────────────────
    #[error("Could not reach the device: {message}")]
    #[diagnostic(
        code(presenza::connection_failed),
        help("Check host and port in the channel config, then try: presenza probe <channel>")
    )]
    ConnectionFailed { message: String },

    #[error("Device rejected the credentials: {message}")]
    #[diagnostic(
        code(presenza::auth_failed),
        help("Update the password with: presenza config set-password <channel>")
    )]
    AuthFailed { message: String },

    #[error("Request timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(presenza::timeout),
        help("Raise [polling].request_timeout_ms or check the device's load.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("Unusable device response: {message}")]
    #[diagnostic(
        code(presenza::device_response),
        help("Check rule_name and count_field for this channel.")
    )]
    DeviceResponse { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Channel '{channel}' not found in configuration")]
    #[diagnostic(
        code(presenza::channel_not_found),
        help("Configured channels: {available}")
    )]
    ChannelNotFound { channel: String, available: String },

    #[error("Invalid configuration for {field}: {reason}")]
    #[diagnostic(code(presenza::config))]
    Config { field: String, reason: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(presenza::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(presenza::validation))]
    Validation { field: String, reason: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(presenza::internal))]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::ChannelNotFound { .. } => exit_code::NOT_FOUND,
            Self::Config { .. } | Self::ConfigExists { .. } | Self::Validation { .. } => {
                exit_code::USAGE
            }
            Self::DeviceResponse { .. } | Self::Internal(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::AuthFailure { message } => Self::AuthFailed { message },
            CoreError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CoreError::ConnectionError { message } => Self::ConnectionFailed { message },
            CoreError::ParseError { message } => Self::DeviceResponse { message },
            CoreError::InvalidInput { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::ConfigError { channel, message } => Self::Config {
                field: format!("channel '{channel}'"),
                reason: message,
            },
            other @ (CoreError::MonitorStopped | CoreError::Internal(_)) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Config { field, reason },
            ConfigError::NoCredentials { channel } => Self::Config {
                field: format!("channel '{channel}'"),
                reason: "no password (set password_env, use the keyring, or password)".into(),
            },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config {
                field: "config".into(),
                reason: other.to_string(),
            },
        }
    }
}
