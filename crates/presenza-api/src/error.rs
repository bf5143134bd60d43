use thiserror::Error;

/// Top-level error type for the `presenza-api` crate.
///
/// Covers every failure mode of a single device exchange: digest
/// negotiation, transport, device-side HTTP errors and body parsing.
/// `presenza-core` folds these into per-channel reading faults.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The device rejected our credentials after the single re-challenge.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// `WWW-Authenticate` header was missing, malformed, or asked for
    /// something we do not speak (e.g. `qop=auth-int` only).
    #[error("Unusable digest challenge: {message}")]
    Challenge { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The whole exchange (probe + request + retry) exceeded its budget.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS / client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Device ──────────────────────────────────────────────────────
    /// Device answered with a non-success, non-401 status.
    #[error("Device error (HTTP {status}): {message}")]
    Device { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// Response body did not contain a usable people count.
    #[error("Parse error: {message}")]
    Parse { message: String, body: String },
}

/// Coarse failure classes a channel reading can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    Auth,
    Timeout,
    Connection,
    Parse,
}

impl Error {
    /// Returns `true` if the device refused our credentials.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. } | Self::Challenge { .. })
    }

    /// Returns `true` if this is a transient network-level error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Classify the error for reading diagnostics.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            Self::Authentication { .. } | Self::Challenge { .. } => FaultClass::Auth,
            Self::Timeout { .. } => FaultClass::Timeout,
            Self::Transport(e) if e.is_timeout() => FaultClass::Timeout,
            Self::Transport(e) if e.is_decode() || e.is_body() => FaultClass::Parse,
            Self::Parse { .. } => FaultClass::Parse,
            Self::Transport(_) | Self::InvalidUrl(_) | Self::Tls(_) | Self::Device { .. } => {
                FaultClass::Connection
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_domain_errors() {
        let auth = Error::Authentication {
            message: "nope".into(),
        };
        assert_eq!(auth.fault_class(), FaultClass::Auth);
        assert!(auth.is_auth_failure());
        assert!(!auth.is_transient());

        let timeout = Error::Timeout { timeout_ms: 3000 };
        assert_eq!(timeout.fault_class(), FaultClass::Timeout);
        assert!(timeout.is_transient());

        let parse = Error::Parse {
            message: "missing field".into(),
            body: String::new(),
        };
        assert_eq!(parse.fault_class(), FaultClass::Parse);

        let device = Error::Device {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(device.fault_class(), FaultClass::Connection);
    }
}
