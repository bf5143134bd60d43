// ── Presence state ──
//
// The pure half of the aggregator: latest reading per channel, the current
// override and the rule that turns both into a `PresenceSnapshot`. No I/O
// and no clocks of its own; the caller passes `now` in.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::OverridePolicy;
use crate::model::{CameraCount, ChannelId, ChannelReading, OverrideState, PresenceSnapshot};

#[derive(Debug, Clone)]
struct Tracked {
    reading: ChannelReading,
    received: Instant,
}

/// Latest readings plus override, and the effective-total rule.
#[derive(Debug, Clone)]
pub struct PresenceState {
    policy: OverridePolicy,
    stale_after: Duration,
    readings: BTreeMap<ChannelId, Tracked>,
    override_state: Option<OverrideState>,
}

impl PresenceState {
    pub fn new(policy: OverridePolicy, stale_after: Duration) -> Self {
        Self {
            policy,
            stale_after,
            readings: BTreeMap::new(),
            override_state: None,
        }
    }

    pub fn policy(&self) -> OverridePolicy {
        self.policy
    }

    /// Replace the channel's reading. Returns `false` (and changes nothing)
    /// when the reading comes from an older cycle than the one held.
    pub fn apply_reading(&mut self, reading: ChannelReading, now: Instant) -> bool {
        if let Some(current) = self.readings.get(&reading.channel) {
            if reading.cycle <= current.reading.cycle {
                debug!(
                    channel = %reading.channel,
                    cycle = reading.cycle,
                    held = current.reading.cycle,
                    "discarding out-of-order reading"
                );
                return false;
            }
        }
        self.readings.insert(
            reading.channel.clone(),
            Tracked {
                reading,
                received: now,
            },
        );
        true
    }

    pub fn apply_override(&mut self, state: Option<OverrideState>) {
        self.override_state = state;
    }

    /// Demote ok readings older than the staleness window. Returns `true`
    /// if anything changed.
    pub fn sweep(&mut self, now: Instant) -> bool {
        let mut changed = false;
        for tracked in self.readings.values_mut() {
            if tracked.reading.is_ok()
                && now.saturating_duration_since(tracked.received) > self.stale_after
            {
                info!(channel = %tracked.reading.channel, "reading went stale");
                tracked.reading.mark_stale();
                changed = true;
            }
        }
        changed
    }

    /// Sum of counts from ok readings.
    pub fn live_total(&self) -> u32 {
        self.readings
            .values()
            .filter_map(|t| t.reading.contribution())
            .fold(0u32, u32::saturating_add)
    }

    /// The override that currently shapes the total, per policy.
    pub fn active_override(&self) -> Option<&OverrideState> {
        let state = self.override_state.as_ref()?;
        if self.policy == OverridePolicy::SupersededByReading
            && self
                .readings
                .values()
                .any(|t| t.reading.is_ok() && t.reading.acquired_at > state.set_at)
        {
            return None;
        }
        Some(state)
    }

    pub fn effective_total(&self) -> u32 {
        let live = self.live_total();
        match self.active_override() {
            None => live,
            Some(o) if self.policy == OverridePolicy::Offset => {
                let shifted = i64::from(o.value) + i64::from(live) - i64::from(o.baseline);
                u32::try_from(shifted.max(0)).unwrap_or(u32::MAX)
            }
            Some(o) => o.value,
        }
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let channels: BTreeMap<_, _> = self
            .readings
            .iter()
            .map(|(id, t)| (id.clone(), t.reading.clone()))
            .collect();
        let per_camera = channels
            .iter()
            .map(|(id, r)| {
                (
                    id.clone(),
                    CameraCount {
                        count: r.count,
                        status: r.status,
                    },
                )
            })
            .collect();

        PresenceSnapshot {
            effective_total: self.effective_total(),
            live_total: self.live_total(),
            active_override: self.active_override().cloned(),
            per_camera,
            channels,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::{FaultKind, ReadingFault, ReadingStatus};

    const STALE_AFTER: Duration = Duration::from_secs(6);

    fn id(s: &str) -> ChannelId {
        ChannelId::from(s)
    }

    fn failed(channel: &str, cycle: u64) -> ChannelReading {
        ChannelReading::error(
            id(channel),
            ReadingFault {
                kind: FaultKind::Connection,
                message: "refused".into(),
            },
            cycle,
        )
    }

    fn state(policy: OverridePolicy) -> PresenceState {
        PresenceState::new(policy, STALE_AFTER)
    }

    #[test]
    fn sums_only_ok_readings() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        s.apply_reading(ChannelReading::ok(id("a"), 3, 1), now);
        s.apply_reading(ChannelReading::ok(id("b"), 2, 1), now);
        assert_eq!(s.effective_total(), 5);

        s.apply_reading(failed("b", 2), now);
        assert_eq!(s.effective_total(), 3);
        assert_eq!(s.snapshot().status_of(&id("b")), Some(ReadingStatus::Error));
    }

    #[test]
    fn older_cycle_never_overwrites_newer() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        assert!(s.apply_reading(ChannelReading::ok(id("a"), 4, 5), now));
        assert!(!s.apply_reading(ChannelReading::ok(id("a"), 9, 4), now));
        assert!(!s.apply_reading(ChannelReading::ok(id("a"), 9, 5), now));
        assert_eq!(s.live_total(), 4);
    }

    #[test]
    fn sweep_demotes_silent_channels() {
        let start = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        s.apply_reading(ChannelReading::ok(id("a"), 4, 1), start);
        s.apply_reading(ChannelReading::ok(id("b"), 2, 1), start);

        assert!(!s.sweep(start + STALE_AFTER));
        s.apply_reading(ChannelReading::ok(id("a"), 4, 2), start + STALE_AFTER);

        assert!(s.sweep(start + STALE_AFTER + Duration::from_millis(1)));
        let snap = s.snapshot();
        assert_eq!(snap.status_of(&id("b")), Some(ReadingStatus::Stale));
        assert_eq!(snap.status_of(&id("a")), Some(ReadingStatus::Ok));
        assert_eq!(snap.effective_total, 4);
        assert_eq!(snap.per_camera[&id("b")].count, Some(2));
    }

    #[test]
    fn override_pins_total_until_cleared() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        s.apply_reading(ChannelReading::ok(id("a"), 3, 1), now);
        s.apply_override(Some(OverrideState::new(10, "operator", 3)));
        s.apply_reading(ChannelReading::ok(id("a"), 7, 2), now);
        assert_eq!(s.effective_total(), 10);
        assert_eq!(s.live_total(), 7);

        s.apply_override(None);
        assert_eq!(s.effective_total(), 7);
        assert!(s.snapshot().active_override.is_none());
    }

    #[test]
    fn override_of_zero_is_still_an_override() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        s.apply_reading(ChannelReading::ok(id("a"), 3, 1), now);
        s.apply_override(Some(OverrideState::new(0, "reset", 3)));
        assert_eq!(s.effective_total(), 0);
    }

    #[test]
    fn newer_ok_reading_supersedes_override_when_configured() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::SupersededByReading);
        let mut ov = OverrideState::new(10, "operator", 0);
        ov.set_at = Utc::now() - ChronoDuration::seconds(1);
        s.apply_reading(
            {
                let mut r = ChannelReading::ok(id("a"), 3, 1);
                r.acquired_at = ov.set_at - ChronoDuration::seconds(1);
                r
            },
            now,
        );
        s.apply_override(Some(ov));
        assert_eq!(s.effective_total(), 10);

        // error readings never supersede
        s.apply_reading(failed("a", 2), now);
        assert_eq!(s.effective_total(), 10);

        s.apply_reading(ChannelReading::ok(id("a"), 4, 3), now);
        assert_eq!(s.effective_total(), 4);
        assert!(s.active_override().is_none());
    }

    #[test]
    fn offset_policy_tracks_live_changes() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::Offset);
        s.apply_reading(ChannelReading::ok(id("a"), 3, 1), now);
        s.apply_override(Some(OverrideState::new(10, "operator", 3)));
        assert_eq!(s.effective_total(), 10);

        s.apply_reading(ChannelReading::ok(id("a"), 5, 2), now);
        assert_eq!(s.effective_total(), 12);

        s.apply_override(Some(OverrideState::new(1, "operator", 5)));
        s.apply_reading(ChannelReading::ok(id("a"), 0, 3), now);
        assert_eq!(s.effective_total(), 0);
    }

    #[test]
    fn snapshot_json_shape() {
        let now = Instant::now();
        let mut s = state(OverridePolicy::UntilCleared);
        s.apply_reading(ChannelReading::ok(id("d4"), 3, 1), now);
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["presenti_totali"], 3);
        assert_eq!(json["per_camera"]["d4"]["count"], 3);
        assert_eq!(json["per_camera"]["d4"]["status"], "ok");
        assert!(json["override"].is_null());
        assert!(json["timestamp"].is_string());
    }
}
