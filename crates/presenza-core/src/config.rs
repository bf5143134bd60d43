// ── Runtime monitor configuration ──
//
// These types describe *what* to poll and *how often*. They carry
// credential data and timing, but never touch disk: presenza-config (or a
// test) builds them and hands them to `PresenceMonitor::start`. Once a
// monitor is running its configuration is frozen.

use std::fmt;
use std::time::Duration;

use presenza_api::{CountField, DEFAULT_RULE_NAME, DeviceEndpoint, DigestCredentials};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CoreError;
use crate::model::ChannelId;

/// Connection settings for one people-counting channel.
#[derive(Clone)]
pub struct ChannelConfig {
    pub id: ChannelId,
    /// Human-readable label (defaults to the id).
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    /// Device-side video channel index.
    pub channel: u32,
    pub username: String,
    pub secret: SecretString,
    pub enabled: bool,
    pub rule_name: String,
    pub count_field: CountField,
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("channel", &self.channel)
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .field("enabled", &self.enabled)
            .field("rule_name", &self.rule_name)
            .field("count_field", &self.count_field)
            .finish()
    }
}

impl ChannelConfig {
    /// A channel with default port, rule and count field.
    pub fn new(
        id: impl Into<ChannelId>,
        host: impl Into<String>,
        channel: u32,
        username: impl Into<String>,
        secret: SecretString,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            host: host.into(),
            port: 80,
            channel,
            username: username.into(),
            secret,
            enabled: true,
            rule_name: DEFAULT_RULE_NAME.to_owned(),
            count_field: CountField::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    /// Check that the channel can be polled at all.
    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |message: &str| Err(CoreError::config(self.id.as_str(), message));

        if self.id.as_str().trim().is_empty() {
            return fail("channel id is empty");
        }
        if self.host.trim().is_empty() {
            return fail("host is empty");
        }
        if self.host.contains(['/', ' ']) {
            return fail("host must be a bare hostname or IP address");
        }
        if self.port == 0 {
            return fail("port must be non-zero");
        }
        if self.channel == 0 {
            return fail("device channel index starts at 1");
        }
        if self.username.trim().is_empty() {
            return fail("username is empty");
        }
        if self.secret.expose_secret().is_empty() {
            return fail("no password configured");
        }
        if self.rule_name.trim().is_empty() {
            return fail("rule name is empty");
        }
        if matches!(&self.count_field, CountField::Field(f) if f.trim().is_empty()) {
            return fail("count field is empty");
        }
        self.base_url().map(|_| ())
    }

    /// Device root URL, e.g. `http://10.0.0.5:8080/`.
    pub fn base_url(&self) -> Result<Url, CoreError> {
        Url::parse(&format!("http://{}:{}/", self.host, self.port))
            .map_err(|e| CoreError::config(self.id.as_str(), format!("invalid host: {e}")))
    }

    pub fn endpoint(&self) -> DeviceEndpoint {
        DeviceEndpoint {
            channel: self.channel,
            rule_name: self.rule_name.clone(),
            count_field: self.count_field.clone(),
        }
    }

    pub fn credentials(&self) -> DigestCredentials {
        DigestCredentials::new(self.username.clone(), self.secret.clone())
    }
}

/// Poll scheduling and freshness settings shared by every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingConfig {
    /// Time between two polls of the same channel.
    pub interval: Duration,
    /// Budget for one complete device query.
    pub request_timeout: Duration,
    /// An ok reading older than `interval * stale_after_polls` is stale.
    pub stale_after_polls: u32,
    /// How often the aggregator sweeps for stale readings.
    pub sweep_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(3),
            stale_after_polls: 3,
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl PollingConfig {
    pub const MIN_STALE_AFTER_POLLS: u32 = 2;

    pub fn stale_after(&self) -> Duration {
        self.interval.saturating_mul(self.stale_after_polls)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let fail = |message: String| Err(CoreError::config("polling", message));

        if self.interval.is_zero() {
            return fail("interval must be non-zero".into());
        }
        if self.request_timeout.is_zero() {
            return fail("request timeout must be non-zero".into());
        }
        if self.sweep_interval.is_zero() {
            return fail("sweep interval must be non-zero".into());
        }
        if self.stale_after_polls < Self::MIN_STALE_AFTER_POLLS {
            return fail(format!(
                "stale_after_polls must be at least {}, got {}",
                Self::MIN_STALE_AFTER_POLLS,
                self.stale_after_polls
            ));
        }
        Ok(())
    }
}

/// How an operator override interacts with live readings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OverridePolicy {
    /// The override pins the total until explicitly cleared.
    #[default]
    UntilCleared,
    /// The first ok reading acquired after the override supersedes it.
    SupersededByReading,
    /// The override re-bases the live sum: total = value + (sum - sum at set time).
    Offset,
}

/// Everything a `PresenceMonitor` needs besides its channel list.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub polling: PollingConfig,
    pub override_policy: OverridePolicy,
}
