// ── Consumed capabilities ──
//
// The monitor depends on a few things it does not implement: where the
// channel list comes from, how the process gets restarted, who may do
// administrative actions, and a small key/value store for the override.
// Each is a trait so the binary (or a test) can plug its own in.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::config::ChannelConfig;
use crate::error::CoreError;

/// Source of channel configuration, read once at monitor start.
pub trait SettingsRepository: Send + Sync {
    fn load(&self) -> Result<Vec<ChannelConfig>, CoreError>;
}

/// Asks the process supervisor for a restart. Fire-and-forget.
pub trait RestartRequester: Send + Sync {
    fn request_restart(&self, reason: &str);
}

/// Decides whether a presented credential may perform admin actions.
pub trait AdminGate: Send + Sync {
    fn is_authorized(&self, credential: Option<&str>) -> bool;
}

/// Minimal durable key/value persistence.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), CoreError>;
    fn remove(&self, key: &str) -> Result<(), CoreError>;
}

// ── In-memory implementations ───────────────────────────────────────

/// A fixed channel list.
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    channels: Vec<ChannelConfig>,
}

impl StaticSettings {
    pub fn new(channels: Vec<ChannelConfig>) -> Self {
        Self { channels }
    }
}

impl SettingsRepository for StaticSettings {
    fn load(&self) -> Result<Vec<ChannelConfig>, CoreError> {
        Ok(self.channels.clone())
    }
}

/// Process-local store; contents vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Accepts one shared bearer token; denies everything when none is set.
#[derive(Debug, Clone, Default)]
pub struct TokenGate {
    token: Option<String>,
}

impl TokenGate {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }
}

impl AdminGate for TokenGate {
    fn is_authorized(&self, credential: Option<&str>) -> bool {
        match (&self.token, credential) {
            (Some(expected), Some(given)) => constant_time_eq(expected.as_bytes(), given.as_bytes()),
            _ => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
