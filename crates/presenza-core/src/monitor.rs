// ── Presence monitor ──
//
// Lifecycle facade: loads the channel list once, spawns one poller per
// usable channel plus the aggregator, and exposes snapshots and the
// override controller. Configuration is frozen for the monitor's lifetime;
// picking up new settings means shutting down and starting again.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{AggregatorHandle, PresenceState};
use crate::config::{ChannelConfig, MonitorConfig, PollingConfig};
use crate::error::CoreError;
use crate::model::{ChannelId, OverrideState, PresenceSnapshot};
use crate::overrides::OverrideController;
use crate::poller::run_poller;
use crate::settings::{KeyValueStore, SettingsRepository};
use crate::source::{CountSource, DeviceChannel};

/// Running presence monitor.
///
/// Cheaply cloneable via `Arc<MonitorInner>`.
#[derive(Clone)]
pub struct PresenceMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    channels: Vec<ChannelId>,
    aggregator: AggregatorHandle,
    overrides: OverrideController,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Channels that were rejected at start, and other non-fatal problems.
    warnings: Vec<String>,
}

impl PresenceMonitor {
    /// Load channels from `settings` and start polling.
    ///
    /// Invalid channels are skipped and reported through
    /// [`warnings()`](Self::warnings); only an invalid polling config or
    /// an unreadable settings source fails the whole start.
    pub fn start(
        settings: &dyn SettingsRepository,
        config: MonitorConfig,
    ) -> Result<Self, CoreError> {
        Self::start_with_store(settings, config, None)
    }

    /// Like [`start`](Self::start), persisting the override in `store`
    /// and restoring it from there.
    pub fn start_with_store(
        settings: &dyn SettingsRepository,
        config: MonitorConfig,
        store: Option<Arc<dyn KeyValueStore>>,
    ) -> Result<Self, CoreError> {
        config.polling.validate()?;
        let (sources, warnings) = prepare_channels(settings.load()?, &config.polling);
        Self::with_sources(sources, config, store, warnings)
    }

    /// Start over pre-built count sources.
    pub fn with_sources<S: CountSource>(
        sources: Vec<S>,
        config: MonitorConfig,
        store: Option<Arc<dyn KeyValueStore>>,
        mut warnings: Vec<String>,
    ) -> Result<Self, CoreError> {
        config.polling.validate()?;

        let initial = match store.as_deref().map(OverrideController::restore) {
            Some(Ok(state)) => state,
            Some(Err(e)) => {
                warn!(error = %e, "could not restore override");
                warnings.push(format!("override not restored: {e}"));
                None
            }
            None => None,
        };
        if let Some(ref o) = initial {
            info!(value = o.value, set_by = %o.set_by, "restored override");
        }
        if sources.is_empty() {
            warn!("no usable channels configured");
            warnings.push("no usable channels configured".into());
        }

        let cancel = CancellationToken::new();
        let (aggregator, aggregator_task) = AggregatorHandle::spawn(
            config.override_policy,
            &config.polling,
            initial.clone(),
            cancel.child_token(),
        );

        let mut handles = vec![aggregator_task];
        let mut channels = Vec::with_capacity(sources.len());
        for source in sources {
            channels.push(source.id().clone());
            handles.push(tokio::spawn(run_poller(
                Arc::new(source),
                config.polling.clone(),
                aggregator.clone(),
                cancel.child_token(),
            )));
        }

        info!(
            channels = channels.len(),
            interval = ?config.polling.interval,
            policy = %config.override_policy,
            "presence monitor started"
        );

        let overrides = OverrideController::new(aggregator.clone(), initial, store);
        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                channels,
                aggregator,
                overrides,
                cancel,
                task_handles: Mutex::new(handles),
                warnings,
            }),
        })
    }

    /// Query every usable channel once and aggregate, without starting
    /// any background task. `store` supplies a persisted override.
    pub async fn poll_once(
        settings: &dyn SettingsRepository,
        config: &MonitorConfig,
        store: Option<&dyn KeyValueStore>,
    ) -> Result<(PresenceSnapshot, Vec<String>), CoreError> {
        config.polling.validate()?;
        let (sources, mut warnings) = prepare_channels(settings.load()?, &config.polling);

        let readings = join_all(sources.iter().map(|s| s.query(1))).await;
        let now = Instant::now();
        let mut state = PresenceState::new(config.override_policy, config.polling.stale_after());
        for reading in readings {
            state.apply_reading(reading, now);
        }

        if let Some(store) = store {
            match OverrideController::restore(store) {
                Ok(o) => state.apply_override(o),
                Err(e) => warnings.push(format!("override not restored: {e}")),
            }
        }
        Ok((state.snapshot(), warnings))
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Ids of the channels being polled.
    pub fn channels(&self) -> &[ChannelId] {
        &self.inner.channels
    }

    pub fn warnings(&self) -> &[String] {
        &self.inner.warnings
    }

    pub fn overrides(&self) -> &OverrideController {
        &self.inner.overrides
    }

    pub fn aggregator(&self) -> &AggregatorHandle {
        &self.inner.aggregator
    }

    pub fn current_snapshot(&self) -> Arc<PresenceSnapshot> {
        self.inner.aggregator.current_snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.inner.aggregator.subscribe()
    }

    pub async fn active_override(&self) -> Option<OverrideState> {
        self.inner.overrides.current().await
    }

    // ── Lifecycle ────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// A token cancelled when the monitor shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Cancel every poller and the aggregator, then wait for them.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("presence monitor stopped");
    }
}

/// Turn loaded configs into count sources, collecting rejections.
fn prepare_channels(
    configs: Vec<ChannelConfig>,
    polling: &PollingConfig,
) -> (Vec<DeviceChannel>, Vec<String>) {
    let mut sources = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for cfg in configs {
        if !cfg.enabled {
            info!(channel = %cfg.id, "channel disabled, not polled");
            continue;
        }
        if !seen.insert(cfg.id.clone()) {
            warn!(channel = %cfg.id, "duplicate channel id, ignoring later entry");
            warnings.push(format!("duplicate channel id '{}' ignored", cfg.id));
            continue;
        }
        match cfg
            .validate()
            .and_then(|()| DeviceChannel::from_config(&cfg, polling))
        {
            Ok(source) => sources.push(source),
            Err(e) => {
                warn!(channel = %cfg.id, error = %e, "channel rejected");
                warnings.push(e.to_string());
            }
        }
    }
    (sources, warnings)
}
