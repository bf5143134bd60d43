//! Presence engine between `presenza-api` and its consumers (CLI / HTTP).
//!
//! - **[`PresenceMonitor`]**: lifecycle facade. [`start()`](PresenceMonitor::start)
//!   loads channels once, spawns one poller per channel plus the aggregator;
//!   [`poll_once()`](PresenceMonitor::poll_once) is the one-shot CLI mode.
//!
//! - **Pollers** ([`poller`]): one task and one timer per channel. A slow
//!   device never delays another channel's schedule.
//!
//! - **[`AggregatorHandle`]**: single-writer task holding the latest reading
//!   per channel and the override, publishing a [`PresenceSnapshot`] through
//!   a `watch` channel on every change.
//!
//! - **[`OverrideController`]**: sole writer of the operator override.
//!
//! - **Consumed capabilities** ([`settings`]): settings source, restart
//!   requester, admin gate, key/value store.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod model;
pub mod monitor;
pub mod overrides;
pub mod poller;
pub mod settings;
pub mod source;

// ── Primary re-exports ──────────────────────────────────────────────
pub use aggregator::{AggregatorHandle, PresenceState};
pub use config::{ChannelConfig, MonitorConfig, OverridePolicy, PollingConfig};
pub use error::CoreError;
pub use model::{
    CameraCount, ChannelId, ChannelReading, FaultKind, OverrideState, PresenceSnapshot,
    ReadingFault, ReadingStatus,
};
pub use monitor::PresenceMonitor;
pub use overrides::{OverrideController, parse_occupancy, validate_occupancy};
pub use settings::{
    AdminGate, KeyValueStore, MemoryStore, RestartRequester, SettingsRepository, StaticSettings,
    TokenGate,
};
pub use source::{CountSource, DeviceChannel};

// Re-export the device-level types consumers configure channels with.
pub use presenza_api::{CountField, DEFAULT_RULE_NAME, INSIDE_TOTAL_FIELD};
