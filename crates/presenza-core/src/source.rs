// ── Count sources ──
//
// A `CountSource` turns one poll into one `ChannelReading`. It never
// fails: every device error is folded into an error reading so the poller
// loop has nothing to special-case.

use std::future::Future;

use presenza_api::{ChannelClient, TransportConfig};
use tracing::{debug, error, warn};

use crate::config::{ChannelConfig, PollingConfig};
use crate::error::CoreError;
use crate::model::{ChannelId, ChannelReading, ReadingFault};

/// Something that can be asked for a channel's current count.
pub trait CountSource: Send + Sync + 'static {
    fn id(&self) -> &ChannelId;

    /// Run one query for poll cycle `cycle`.
    fn query(&self, cycle: u64) -> impl Future<Output = ChannelReading> + Send;
}

/// A real NVR channel reached over HTTP Digest.
#[derive(Debug)]
pub struct DeviceChannel {
    id: ChannelId,
    client: ChannelClient,
}

impl DeviceChannel {
    pub fn new(id: ChannelId, client: ChannelClient) -> Self {
        Self { id, client }
    }

    /// Build the channel client described by `config`.
    pub fn from_config(config: &ChannelConfig, polling: &PollingConfig) -> Result<Self, CoreError> {
        let transport = TransportConfig::default().with_timeout(polling.request_timeout);
        let client = ChannelClient::new(
            config.base_url()?,
            config.endpoint(),
            config.credentials(),
            &transport,
        )
        .map_err(|e| CoreError::config(config.id.as_str(), e.to_string()))?;
        Ok(Self::new(config.id.clone(), client))
    }

    pub fn client(&self) -> &ChannelClient {
        &self.client
    }
}

impl CountSource for DeviceChannel {
    fn id(&self) -> &ChannelId {
        &self.id
    }

    async fn query(&self, cycle: u64) -> ChannelReading {
        match self.client.fetch_count().await {
            Ok(count) => {
                debug!(channel = %self.id, cycle, count, "poll ok");
                ChannelReading::ok(self.id.clone(), count, cycle)
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(channel = %self.id, cycle, error = %e, "poll failed");
                } else {
                    error!(channel = %self.id, cycle, error = %e, "poll failed");
                }
                ChannelReading::error(self.id.clone(), ReadingFault::from(&e), cycle)
            }
        }
    }
}
