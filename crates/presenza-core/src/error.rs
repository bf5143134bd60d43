// ── Core error types ──
//
// Domain-level errors from presenza-core. Per-channel device failures are
// normally folded into `ChannelReading` faults and never reach callers;
// these variants surface where a caller does need a `Result`: one-shot
// queries, override validation, configuration and monitor lifecycle.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Device errors ────────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    AuthFailure { message: String },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    #[error("Unusable device response: {message}")]
    ParseError { message: String },

    // ── Caller errors ────────────────────────────────────────────────
    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error for channel '{channel}': {message}")]
    ConfigError { channel: String, message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Presence monitor is not running")]
    MonitorStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub(crate) fn config(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigError {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<presenza_api::Error> for CoreError {
    fn from(err: presenza_api::Error) -> Self {
        use presenza_api::Error as Api;

        match err {
            Api::Authentication { message } | Api::Challenge { message } => {
                Self::AuthFailure { message }
            }
            Api::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            Api::Transport(ref e) if e.is_timeout() => Self::Timeout { timeout_ms: 0 },
            Api::Parse { message, .. } => Self::ParseError { message },
            Api::Device { status, message } => Self::ConnectionError {
                message: format!("HTTP {status}: {message}"),
            },
            Api::Transport(e) => Self::ConnectionError {
                message: e.to_string(),
            },
            Api::InvalidUrl(e) => Self::ConnectionError {
                message: format!("invalid device URL: {e}"),
            },
            Api::Tls(message) => Self::ConnectionError { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_domain_taxonomy() {
        let auth: CoreError = presenza_api::Error::Authentication {
            message: "bad password".into(),
        }
        .into();
        assert!(matches!(auth, CoreError::AuthFailure { .. }));

        let timeout: CoreError = presenza_api::Error::Timeout { timeout_ms: 3000 }.into();
        assert!(matches!(timeout, CoreError::Timeout { timeout_ms: 3000 }));

        let parse: CoreError = presenza_api::Error::Parse {
            message: "field missing".into(),
            body: String::new(),
        }
        .into();
        assert!(matches!(parse, CoreError::ParseError { .. }));

        let device: CoreError = presenza_api::Error::Device {
            status: 503,
            message: "busy".into(),
        }
        .into();
        assert_eq!(device.to_string(), "Connection error: HTTP 503: busy");
    }
}
