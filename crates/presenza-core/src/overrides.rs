// ── Override controller ──
//
// Sole writer of the operator override. Every change goes through the
// aggregator's queue and is acknowledged with the resulting snapshot;
// invalid input is rejected before anything is touched.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::aggregator::AggregatorHandle;
use crate::error::CoreError;
use crate::model::{OverrideState, PresenceSnapshot};
use crate::settings::KeyValueStore;

/// Store key under which the active override is persisted.
pub const OVERRIDE_KEY: &str = "presence.override";

/// Actor recorded for overrides created by [`OverrideController::reset`].
pub const RESET_ACTOR: &str = "reset";

/// Validate an operator-supplied occupancy.
pub fn validate_occupancy(value: i64) -> Result<u32, CoreError> {
    if value < 0 {
        return Err(CoreError::invalid_input(format!(
            "occupancy must be non-negative, got {value}"
        )));
    }
    u32::try_from(value)
        .map_err(|_| CoreError::invalid_input(format!("occupancy {value} is out of range")))
}

/// Extract an occupancy from a JSON value.
///
/// Integers are accepted, and so are floats with no fractional part
/// (`5.0`). Fractions, strings, booleans and `null` are rejected.
pub fn parse_occupancy(value: &Value) -> Result<u32, CoreError> {
    let Value::Number(n) = value else {
        return Err(CoreError::invalid_input(format!(
            "occupancy must be an integer, got {value}"
        )));
    };
    if let Some(i) = n.as_i64() {
        return validate_occupancy(i);
    }
    if n.is_u64() {
        return Err(CoreError::invalid_input(format!("occupancy {n} is out of range")));
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 => {
            if f < 0.0 {
                Err(CoreError::invalid_input(format!(
                    "occupancy must be non-negative, got {n}"
                )))
            } else if f > f64::from(u32::MAX) {
                Err(CoreError::invalid_input(format!("occupancy {n} is out of range")))
            } else {
                Ok(whole_to_u32(f))
            }
        }
        _ => Err(CoreError::invalid_input(format!(
            "occupancy must be an integer, got {n}"
        ))),
    }
}

/// `f` is finite, integral and within `0..=u32::MAX`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
fn whole_to_u32(f: f64) -> u32 {
    f as u32
}

/// Owns the override state and pushes every change to the aggregator.
pub struct OverrideController {
    aggregator: AggregatorHandle,
    current: Mutex<Option<OverrideState>>,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl OverrideController {
    pub fn new(
        aggregator: AggregatorHandle,
        initial: Option<OverrideState>,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        Self {
            aggregator,
            current: Mutex::new(initial),
            store,
        }
    }

    /// Load a persisted override, if any. A corrupt entry is discarded.
    pub fn restore(store: &dyn KeyValueStore) -> Result<Option<OverrideState>, CoreError> {
        let Some(raw) = store.get(OVERRIDE_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(error = %e, "discarding unreadable persisted override");
                store.remove(OVERRIDE_KEY)?;
                Ok(None)
            }
        }
    }

    /// Set the override to `value` on behalf of `actor`.
    ///
    /// Negative or out-of-range values return [`CoreError::InvalidInput`]
    /// and leave the current snapshot untouched.
    pub async fn set_override(
        &self,
        value: i64,
        actor: &str,
    ) -> Result<(OverrideState, Arc<PresenceSnapshot>), CoreError> {
        let value = validate_occupancy(value)?;
        self.apply(value, actor).await
    }

    /// Same as [`set_override`](Self::set_override), taking the raw JSON
    /// `occupancy` value.
    pub async fn set_from_json(
        &self,
        occupancy: &Value,
        actor: &str,
    ) -> Result<(OverrideState, Arc<PresenceSnapshot>), CoreError> {
        let value = parse_occupancy(occupancy)?;
        self.apply(value, actor).await
    }

    /// Force the total to zero.
    pub async fn reset(&self) -> Result<(OverrideState, Arc<PresenceSnapshot>), CoreError> {
        self.apply(0, RESET_ACTOR).await
    }

    /// Drop the override and return to live readings. Returns the override
    /// that was active, if any.
    pub async fn clear_override(
        &self,
    ) -> Result<(Option<OverrideState>, Arc<PresenceSnapshot>), CoreError> {
        let mut current = self.current.lock().await;
        let snapshot = self.aggregator.on_override_change(None).await?;
        let previous = current.take();
        if previous.is_some() {
            info!("override cleared");
        }
        self.persist(None);
        Ok((previous, snapshot))
    }

    pub async fn current(&self) -> Option<OverrideState> {
        self.current.lock().await.clone()
    }

    async fn apply(
        &self,
        value: u32,
        actor: &str,
    ) -> Result<(OverrideState, Arc<PresenceSnapshot>), CoreError> {
        let mut current = self.current.lock().await;
        let baseline = self.aggregator.current_snapshot().live_total;
        let state = OverrideState::new(value, actor, baseline);
        let snapshot = self.aggregator.on_override_change(Some(state.clone())).await?;
        info!(value, actor, baseline, "override set");
        *current = Some(state.clone());
        self.persist(Some(&state));
        Ok((state, snapshot))
    }

    fn persist(&self, state: Option<&OverrideState>) {
        let Some(store) = &self.store else { return };
        let result = match state {
            Some(state) => serde_json::to_string(state)
                .map_err(|e| CoreError::Internal(e.to_string()))
                .and_then(|raw| store.put(OVERRIDE_KEY, &raw)),
            None => store.remove(OVERRIDE_KEY),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist override");
        }
    }
}
