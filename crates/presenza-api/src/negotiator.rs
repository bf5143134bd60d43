// Per-channel digest negotiation
//
// Owns the last challenge a device handed out and reuses it until the
// device rejects a credentialed request. At that point it re-challenges
// once and retries the original request exactly once.

use std::sync::{Mutex, PoisonError};

use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, trace};
use url::Url;

use crate::auth::{DigestChallenge, DigestCredentials, DigestSession};
use crate::error::Error;

/// Stateful digest negotiator for a single device channel.
///
/// Not shared between channels: each channel client owns one, so a
/// credential problem on one camera never invalidates another's session.
#[derive(Debug)]
pub struct AuthNegotiator {
    credentials: DigestCredentials,
    session: Mutex<Option<DigestSession>>,
}

/// What the device said to an unauthenticated request.
enum Probe {
    /// Device does not require auth for this resource.
    Open(Response),
    Challenged(DigestChallenge),
}

impl AuthNegotiator {
    pub fn new(credentials: DigestCredentials) -> Self {
        Self {
            credentials,
            session: Mutex::new(None),
        }
    }

    /// Whether a challenge is currently cached.
    pub fn has_session(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Drop the cached challenge; the next request probes again.
    pub fn reset(&self) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Send `method url` with digest credentials attached.
    ///
    /// Flow:
    /// 1. No cached challenge: unauthenticated probe, cache the challenge.
    /// 2. Send with the computed `Authorization` header.
    /// 3. On 401: re-challenge once (from the 401 itself, else a new
    ///    probe) and retry once. A second 401 is [`Error::Authentication`].
    ///
    /// Any non-401 response is returned to the caller untouched.
    pub async fn send(
        &self,
        http: &reqwest::Client,
        method: Method,
        url: &Url,
    ) -> Result<Response, Error> {
        let uri = request_uri(url);

        if !self.has_session() {
            match self.probe(http, &method, url).await? {
                Probe::Open(resp) => return Ok(resp),
                Probe::Challenged(challenge) => self.store(challenge),
            }
        }

        let resp = self.send_authorized(http, &method, url, &uri).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!(%url, "credentialed request rejected, re-challenging");
        let challenge = match challenge_from(&resp) {
            Some(Ok(challenge)) => challenge,
            Some(Err(e)) => return Err(e),
            None => match self.probe(http, &method, url).await? {
                Probe::Open(resp) => return Ok(resp),
                Probe::Challenged(challenge) => challenge,
            },
        };
        self.store(challenge);

        let retry = self.send_authorized(http, &method, url, &uri).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            self.reset();
            return Err(Error::Authentication {
                message: format!(
                    "device rejected credentials for user '{}' after re-challenge",
                    self.credentials.username
                ),
            });
        }
        Ok(retry)
    }

    async fn probe(
        &self,
        http: &reqwest::Client,
        method: &Method,
        url: &Url,
    ) -> Result<Probe, Error> {
        trace!(%url, "probing for digest challenge");
        let resp = http
            .request(method.clone(), url.clone())
            .send()
            .await
            .map_err(Error::Transport)?;

        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(Probe::Open(resp));
        }

        match challenge_from(&resp) {
            Some(result) => result.map(Probe::Challenged),
            None => Err(Error::Challenge {
                message: "401 without WWW-Authenticate header".into(),
            }),
        }
    }

    async fn send_authorized(
        &self,
        http: &reqwest::Client,
        method: &Method,
        url: &Url,
        uri: &str,
    ) -> Result<Response, Error> {
        let header = {
            let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let session = guard.as_mut().ok_or_else(|| Error::Challenge {
                message: "no digest challenge cached".into(),
            })?;
            session.authorize(&self.credentials, method.as_str(), uri)
        };

        http.request(method.clone(), url.clone())
            .header(AUTHORIZATION, header)
            .send()
            .await
            .map_err(Error::Transport)
    }

    fn store(&self, challenge: DigestChallenge) {
        trace!(realm = %challenge.realm, stale = challenge.stale, "caching digest challenge");
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(DigestSession::new(challenge));
    }
}

/// Extract and parse the digest challenge of a 401 response, if any.
fn challenge_from(resp: &Response) -> Option<Result<DigestChallenge, Error>> {
    let header = resp.headers().get_all(WWW_AUTHENTICATE).iter().find_map(|v| {
        v.to_str()
            .ok()
            .filter(|s| s.to_ascii_lowercase().contains("digest"))
    })?;
    Some(DigestChallenge::parse(header))
}

/// The `uri` digest parameter: path plus query, exactly as sent.
fn request_uri(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{q}", url.path()),
        None => url.path().to_owned(),
    }
}
