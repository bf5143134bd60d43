// ── Presence domain types ──

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{ChannelId, ChannelReading, ReadingStatus};

/// An operator-supplied occupancy value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideState {
    pub value: u32,
    pub set_at: DateTime<Utc>,
    pub set_by: String,
    /// Live total when the override was set (used by the offset policy).
    #[serde(default)]
    pub baseline: u32,
}

impl OverrideState {
    pub fn new(value: u32, set_by: impl Into<String>, baseline: u32) -> Self {
        Self {
            value,
            set_at: Utc::now(),
            set_by: set_by.into(),
            baseline,
        }
    }
}

/// Compact per-channel entry of the presence breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraCount {
    pub count: Option<u32>,
    pub status: ReadingStatus,
}

/// The single current answer to "how many people are inside".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    /// Override value when one applies, else the live total.
    #[serde(rename = "presenti_totali")]
    pub effective_total: u32,
    /// Sum of ok readings.
    pub live_total: u32,
    /// The override currently shaping `effective_total`, if any.
    #[serde(rename = "override")]
    pub active_override: Option<OverrideState>,
    pub per_camera: BTreeMap<ChannelId, CameraCount>,
    pub channels: BTreeMap<ChannelId, ChannelReading>,
    #[serde(rename = "timestamp")]
    pub generated_at: DateTime<Utc>,
}

impl PresenceSnapshot {
    pub fn empty() -> Self {
        Self {
            effective_total: 0,
            live_total: 0,
            active_override: None,
            per_camera: BTreeMap::new(),
            channels: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    pub fn reading(&self, channel: &ChannelId) -> Option<&ChannelReading> {
        self.channels.get(channel)
    }

    pub fn status_of(&self, channel: &ChannelId) -> Option<ReadingStatus> {
        self.channels.get(channel).map(|r| r.status)
    }
}

impl Default for PresenceSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}
