//! Async client for NVR people-counting channels.
//!
//! Each configured channel gets a [`ChannelClient`] that speaks HTTP Digest
//! (MD5 / SHA-256, with or without `-sess`), caches the device challenge
//! and re-challenges exactly once when the device rejects it. Responses are
//! parsed into a validated, non-negative count; anything else becomes a
//! typed [`Error`].

pub mod auth;
pub mod client;
pub mod error;
pub mod negotiator;
pub mod summary;
pub mod transport;

pub use auth::{DigestAlgorithm, DigestChallenge, DigestCredentials, DigestSession};
pub use client::{ChannelClient, DEFAULT_RULE_NAME, DeviceEndpoint, RawReply};
pub use error::{Error, FaultClass};
pub use negotiator::AuthNegotiator;
pub use summary::{CountField, INSIDE_TOTAL_FIELD, Summary, parse_count};
pub use transport::{TlsMode, TransportConfig};
