// Channel HTTP client
//
// One `ChannelClient` per configured people-counting channel. It owns its
// own reqwest client and digest negotiator, builds the device URLs and
// turns responses into either a count or a typed error.

use std::time::Duration;

use reqwest::Method;
use tracing::{debug, trace, warn};
use url::Url;

use crate::auth::DigestCredentials;
use crate::error::Error;
use crate::negotiator::AuthNegotiator;
use crate::summary::{CountField, parse_count};
use crate::transport::TransportConfig;

const SUMMARY_PATH: &str = "cgi-bin/videoStatServer.cgi";
const SYSTEM_INFO_PATH: &str = "cgi-bin/magicBox.cgi";

/// Default people-counting rule name configured on the device.
pub const DEFAULT_RULE_NAME: &str = "PC-1";

/// What to ask the device for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    /// Device-side video channel index (1-based on most NVRs).
    pub channel: u32,
    /// People-counting rule name as configured on the device.
    pub rule_name: String,
    /// Which summary value is the count.
    pub count_field: CountField,
}

impl Default for DeviceEndpoint {
    fn default() -> Self {
        Self {
            channel: 1,
            rule_name: DEFAULT_RULE_NAME.to_owned(),
            count_field: CountField::default(),
        }
    }
}

/// Raw device reply, for diagnostics.
#[derive(Debug, Clone)]
pub struct RawReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Async client for a single people-counting channel.
#[derive(Debug)]
pub struct ChannelClient {
    http: reqwest::Client,
    base_url: Url,
    endpoint: DeviceEndpoint,
    negotiator: AuthNegotiator,
    timeout: Duration,
}

impl ChannelClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the device root, e.g. `http://10.0.0.5:80`.
    pub fn new(
        base_url: Url,
        endpoint: DeviceEndpoint,
        credentials: DigestCredentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(
            http,
            base_url,
            endpoint,
            credentials,
            transport.timeout,
        ))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        endpoint: DeviceEndpoint,
        credentials: DigestCredentials,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url,
            endpoint,
            negotiator: AuthNegotiator::new(credentials),
            timeout,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Budget for one complete query.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a digest challenge is cached for this channel.
    pub fn is_authenticated(&self) -> bool {
        self.negotiator.has_session()
    }

    // ── URL construction ─────────────────────────────────────────────

    /// `{base}/cgi-bin/videoStatServer.cgi?action=getSummary&channel=N&name=RULE`
    pub fn summary_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.join(SUMMARY_PATH)?;
        url.query_pairs_mut()
            .append_pair("action", "getSummary")
            .append_pair("channel", &self.endpoint.channel.to_string())
            .append_pair("name", &self.endpoint.rule_name);
        Ok(url)
    }

    /// `{base}/cgi-bin/magicBox.cgi?action=getSystemInfo`
    pub fn system_info_url(&self) -> Result<Url, Error> {
        let mut url = self.base_url.join(SYSTEM_INFO_PATH)?;
        url.query_pairs_mut().append_pair("action", "getSystemInfo");
        Ok(url)
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Query the current people count.
    ///
    /// The whole exchange (probe, credentialed request, one retry) runs
    /// under the configured budget; exceeding it is [`Error::Timeout`].
    pub async fn fetch_count(&self) -> Result<u32, Error> {
        let body = self.bounded(self.get_text(self.summary_url()?)).await?;
        let count = parse_count(&body, &self.endpoint.count_field)?;
        trace!(base = %self.base_url, channel = self.endpoint.channel, count, "count fetched");
        Ok(count)
    }

    /// Fetch device identity via `getSystemInfo`, returning the raw reply.
    ///
    /// Non-success statuses are returned, not raised: this is a
    /// troubleshooting call.
    pub async fn system_info(&self) -> Result<RawReply, Error> {
        let url = self.system_info_url()?;
        self.bounded(async {
            let resp = self.negotiator.send(&self.http, Method::GET, &url).await?;
            let status = resp.status().as_u16();
            let headers = resp
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_owned(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = resp.text().await.map_err(Error::Transport)?;
            Ok(RawReply {
                status,
                headers,
                body,
            })
        })
        .await
    }

    // ── Internal helpers ─────────────────────────────────────────────

    async fn get_text(&self, url: Url) -> Result<String, Error> {
        debug!(%url, "GET");
        let resp = self.negotiator.send(&self.http, Method::GET, &url).await?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "device returned error status");
            return Err(Error::Device {
                status: status.as_u16(),
                message: body.lines().next().unwrap_or_default().trim().to_owned(),
            });
        }
        Ok(body)
    }

    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            })?
    }
}
