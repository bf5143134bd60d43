// HTTP Digest authentication (RFC 7616, RFC 2617 compatible)
//
// Challenge parsing and response computation only. The stateful
// probe/cache/retry dance lives in `negotiator`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use md5::Md5;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// Username and secret used to answer a device's digest challenge.
#[derive(Clone)]
pub struct DigestCredentials {
    pub username: String,
    pub password: SecretString,
}

impl DigestCredentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

impl fmt::Debug for DigestCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestCredentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Hash algorithm named in the challenge's `algorithm` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn hash(self, data: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => format!("{:x}", Md5::digest(data.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => format!("{:x}", Sha256::digest(data.as_bytes())),
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MD5" => Ok(Self::Md5),
            "MD5-SESS" => Ok(Self::Md5Sess),
            "SHA-256" => Ok(Self::Sha256),
            "SHA-256-SESS" => Ok(Self::Sha256Sess),
            other => Err(Error::Challenge {
                message: format!("unsupported digest algorithm '{other}'"),
            }),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// `true` when the device offered `qop=auth`; `false` for the
    /// legacy RFC 2069 form without a quality of protection.
    pub qop_auth: bool,
    /// Device flagged the previous nonce as expired rather than the
    /// credentials as wrong.
    pub stale: bool,
}

impl DigestChallenge {
    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Accepts headers carrying several schemes (`Basic realm=.., Digest ..`)
    /// and picks the digest one.
    pub fn parse(header: &str) -> Result<Self, Error> {
        let start = find_digest_scheme(header).ok_or_else(|| Error::Challenge {
            message: format!("no Digest scheme in '{header}'"),
        })?;
        let params = parse_params(&header[start..]);

        let realm = params.get("realm").cloned().ok_or_else(|| Error::Challenge {
            message: "challenge is missing realm".into(),
        })?;
        let nonce = params.get("nonce").cloned().ok_or_else(|| Error::Challenge {
            message: "challenge is missing nonce".into(),
        })?;
        let algorithm = params
            .get("algorithm")
            .map(|a| a.parse::<DigestAlgorithm>())
            .transpose()?
            .unwrap_or_default();

        let qop_auth = match params.get("qop") {
            None => false,
            Some(qop) => {
                if qop.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                    true
                } else {
                    return Err(Error::Challenge {
                        message: format!("unsupported qop '{qop}'"),
                    });
                }
            }
        };

        Ok(Self {
            realm,
            nonce,
            opaque: params.get("opaque").cloned(),
            algorithm,
            qop_auth,
            stale: params
                .get("stale")
                .is_some_and(|s| s.eq_ignore_ascii_case("true")),
        })
    }
}

/// A cached challenge plus its nonce counter.
///
/// One session answers many requests; every answer bumps `nc` so the
/// device can detect replays.
#[derive(Debug, Clone)]
pub struct DigestSession {
    challenge: DigestChallenge,
    nonce_count: u32,
}

impl DigestSession {
    pub fn new(challenge: DigestChallenge) -> Self {
        Self {
            challenge,
            nonce_count: 0,
        }
    }

    pub fn challenge(&self) -> &DigestChallenge {
        &self.challenge
    }

    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    /// Produce the next `Authorization` header value with a random cnonce.
    pub fn authorize(&mut self, credentials: &DigestCredentials, method: &str, uri: &str) -> String {
        let cnonce = format!("{:016x}", rand::random::<u64>());
        self.authorize_with_cnonce(credentials, method, uri, &cnonce)
    }

    /// Same as [`authorize`](Self::authorize) with a caller-chosen cnonce.
    pub fn authorize_with_cnonce(
        &mut self,
        credentials: &DigestCredentials,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> String {
        self.nonce_count = self.nonce_count.wrapping_add(1);
        let nc = format!("{:08x}", self.nonce_count);
        let ch = &self.challenge;
        let alg = ch.algorithm;

        let response = compute_response(credentials, ch, method, uri, &nc, cnonce);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", algorithm={}, response=\"{}\"",
            credentials.username,
            ch.realm,
            ch.nonce,
            uri,
            alg.as_str(),
            response,
        );
        if ch.qop_auth || alg.is_session() {
            header.push_str(&format!(", qop=auth, nc={nc}, cnonce=\"{cnonce}\""));
        }
        if let Some(ref opaque) = ch.opaque {
            header.push_str(&format!(", opaque=\"{opaque}\""));
        }
        header
    }
}

/// Compute the `response` field for one request.
pub fn compute_response(
    credentials: &DigestCredentials,
    challenge: &DigestChallenge,
    method: &str,
    uri: &str,
    nc: &str,
    cnonce: &str,
) -> String {
    let alg = challenge.algorithm;
    let mut ha1 = alg.hash(&format!(
        "{}:{}:{}",
        credentials.username,
        challenge.realm,
        credentials.password.expose_secret()
    ));
    if alg.is_session() {
        ha1 = alg.hash(&format!("{ha1}:{}:{cnonce}", challenge.nonce));
    }
    let ha2 = alg.hash(&format!("{method}:{uri}"));

    if challenge.qop_auth || alg.is_session() {
        alg.hash(&format!("{ha1}:{}:{nc}:{cnonce}:auth:{ha2}", challenge.nonce))
    } else {
        alg.hash(&format!("{ha1}:{}:{ha2}", challenge.nonce))
    }
}

// ── Header parsing ───────────────────────────────────────────────────

/// Byte offset just past the `Digest` scheme token, if present.
fn find_digest_scheme(header: &str) -> Option<usize> {
    let lower = header.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(pos) = lower[search_from..].find("digest") {
        let abs = search_from + pos;
        let before_ok = abs == 0
            || lower[..abs]
                .chars()
                .next_back()
                .is_some_and(|c| c == ',' || c.is_whitespace());
        let after = abs + "digest".len();
        let after_ok = lower[after..].chars().next().is_some_and(char::is_whitespace);
        if before_ok && after_ok {
            return Some(after);
        }
        search_from = after;
    }
    None
}

/// Parse `key=value, key="quoted, value"` pairs. Keys are lowercased.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}

        let mut key = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',') {
            key.push(c);
        }
        let key = key.trim().to_ascii_lowercase();
        if chars.next_if_eq(&'=').is_none() {
            if key.is_empty() && chars.peek().is_none() {
                break;
            }
            continue;
        }
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
            value = value.trim().to_owned();
        }

        if !key.is_empty() {
            params.insert(key, value);
        }
        if chars.peek().is_none() {
            break;
        }
    }

    params
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mufasa(password: &str) -> DigestCredentials {
        DigestCredentials::new("Mufasa", SecretString::from(password.to_owned()))
    }

    #[test]
    fn parses_dahua_style_challenge() {
        let ch = DigestChallenge::parse(
            r#"Digest realm="Login to 4L0C2F0PAZ9D8A1",qop="auth",nonce="1394211531",opaque="9d6ba3d3c8a1a3f6cd10f1c6e4b8a7f2c16a4ac9""#,
        )
        .unwrap();

        assert_eq!(ch.realm, "Login to 4L0C2F0PAZ9D8A1");
        assert_eq!(ch.nonce, "1394211531");
        assert_eq!(
            ch.opaque.as_deref(),
            Some("9d6ba3d3c8a1a3f6cd10f1c6e4b8a7f2c16a4ac9")
        );
        assert_eq!(ch.algorithm, DigestAlgorithm::Md5);
        assert!(ch.qop_auth);
        assert!(!ch.stale);
    }

    #[test]
    fn picks_digest_out_of_multiple_schemes() {
        let ch = DigestChallenge::parse(
            r#"Basic realm="cam", Digest realm="cam", nonce="abc", algorithm=SHA-256, qop="auth-int, auth", stale=TRUE"#,
        )
        .unwrap();
        assert_eq!(ch.realm, "cam");
        assert_eq!(ch.algorithm, DigestAlgorithm::Sha256);
        assert!(ch.qop_auth);
        assert!(ch.stale);
    }

    #[test]
    fn rejects_challenges_we_cannot_answer() {
        assert!(DigestChallenge::parse(r#"Basic realm="cam""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest nonce="abc""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth-int""#).is_err());
        assert!(DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-512"#).is_err());
    }

    #[test]
    fn quoted_values_may_contain_commas_and_escapes() {
        let ch =
            DigestChallenge::parse(r#"Digest realm="a, \"quoted\" realm", nonce="n1""#).unwrap();
        assert_eq!(ch.realm, r#"a, "quoted" realm"#);
        assert_eq!(ch.nonce, "n1");
    }

    #[test]
    fn md5_response_matches_rfc2617_example() {
        let challenge = DigestChallenge {
            realm: "testrealm@host.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            opaque: Some("5ccc069c403ebaf9f0171e9517f40e41".into()),
            algorithm: DigestAlgorithm::Md5,
            qop_auth: true,
            stale: false,
        };
        let response = compute_response(
            &mufasa("Circle Of Life"),
            &challenge,
            "GET",
            "/dir/index.html",
            "00000001",
            "0a4f113b",
        );
        assert_eq!(response, "6629fae49393a05397450978507c4ef1");
    }

    #[test]
    fn sha256_response_matches_rfc7616_example() {
        let challenge = DigestChallenge {
            realm: "http-auth@example.org".into(),
            nonce: "7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v".into(),
            opaque: Some("FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS".into()),
            algorithm: DigestAlgorithm::Sha256,
            qop_auth: true,
            stale: false,
        };
        let response = compute_response(
            &mufasa("Circle of Life"),
            &challenge,
            "GET",
            "/dir/index.html",
            "00000001",
            "f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ",
        );
        assert_eq!(
            response,
            "753927fa0e85d155564e2e272a28d1802ca10daf4496794697cf8db5856cb6c1"
        );
    }

    #[test]
    fn session_bumps_nonce_count_per_request() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n", qop="auth""#).unwrap();
        let mut session = DigestSession::new(challenge);
        let creds = mufasa("pw");

        let first = session.authorize_with_cnonce(&creds, "GET", "/a?b=1", "c1");
        let second = session.authorize_with_cnonce(&creds, "GET", "/a?b=1", "c1");

        assert!(first.starts_with("Digest username=\"Mufasa\""));
        assert!(first.contains("uri=\"/a?b=1\""));
        assert!(first.contains("nc=00000001"));
        assert!(second.contains("nc=00000002"));
        assert_eq!(session.nonce_count(), 2);
    }

    #[test]
    fn legacy_challenge_omits_qop_fields() {
        let challenge = DigestChallenge::parse(r#"Digest realm="r", nonce="n""#).unwrap();
        let mut session = DigestSession::new(challenge);
        let header = session.authorize(&mufasa("pw"), "GET", "/");
        assert!(!header.contains("qop="));
        assert!(!header.contains("cnonce="));
    }

    #[test]
    fn debug_never_prints_the_password() {
        let rendered = format!("{:?}", mufasa("hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
