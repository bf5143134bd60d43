// ── Channel domain types ──

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── ChannelId ───────────────────────────────────────────────────────

/// Operator-chosen identifier of a counting channel (e.g. `d4`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ── Reading status ──────────────────────────────────────────────────

/// Health of a channel's latest reading.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ReadingStatus {
    Ok,
    Error,
    /// Was ok, but not refreshed within the staleness window.
    Stale,
}

/// Why a poll produced no count.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FaultKind {
    Auth,
    Timeout,
    Connection,
    Parse,
}

impl From<presenza_api::FaultClass> for FaultKind {
    fn from(class: presenza_api::FaultClass) -> Self {
        match class {
            presenza_api::FaultClass::Auth => Self::Auth,
            presenza_api::FaultClass::Timeout => Self::Timeout,
            presenza_api::FaultClass::Connection => Self::Connection,
            presenza_api::FaultClass::Parse => Self::Parse,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingFault {
    pub kind: FaultKind,
    pub message: String,
}

impl From<&presenza_api::Error> for ReadingFault {
    fn from(err: &presenza_api::Error) -> Self {
        Self {
            kind: err.fault_class().into(),
            message: err.to_string(),
        }
    }
}

// ── ChannelReading ──────────────────────────────────────────────────

/// Outcome of one poll of one channel.
///
/// Produced once per poll cycle; a newer reading fully replaces the
/// previous one for the same channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelReading {
    pub channel: ChannelId,
    /// Present for ok readings; kept as last-known value when stale.
    pub count: Option<u32>,
    pub acquired_at: DateTime<Utc>,
    pub status: ReadingStatus,
    /// Per-channel poll cycle that produced this reading.
    pub cycle: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<ReadingFault>,
}

impl ChannelReading {
    pub fn ok(channel: ChannelId, count: u32, cycle: u64) -> Self {
        Self {
            channel,
            count: Some(count),
            acquired_at: Utc::now(),
            status: ReadingStatus::Ok,
            cycle,
            fault: None,
        }
    }

    pub fn error(channel: ChannelId, fault: ReadingFault, cycle: u64) -> Self {
        Self {
            channel,
            count: None,
            acquired_at: Utc::now(),
            status: ReadingStatus::Error,
            cycle,
            fault: Some(fault),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReadingStatus::Ok
    }

    /// The count this reading adds to the live total, if any.
    pub fn contribution(&self) -> Option<u32> {
        if self.is_ok() { self.count } else { None }
    }

    pub(crate) fn mark_stale(&mut self) {
        self.status = ReadingStatus::Stale;
    }
}
