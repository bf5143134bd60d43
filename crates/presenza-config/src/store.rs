// ── State file ──
//
// Small JSON key/value file backing the override persistence. Writes go
// to a sibling temp file and are renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use presenza_core::{CoreError, KeyValueStore};
use tracing::{debug, warn};

/// [`KeyValueStore`] persisted as a flat JSON object on disk.
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, CoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(io_error(&self.path, &e)),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "state file unreadable, starting empty");
            Ok(BTreeMap::new())
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), CoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, &e))?;
        }
        let body =
            serde_json::to_string_pretty(map).map_err(|e| CoreError::Internal(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, body).map_err(|e| io_error(&tmp, &e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_error(&self.path, &e))?;
        debug!(path = %self.path.display(), keys = map.len(), "state file written");
        Ok(())
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Internal(format!("{}: {err}", path.display()))
}

impl KeyValueStore for StateFile {
    fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
        let _guard = self.guard();
        Ok(self.read_map()?.remove(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CoreError> {
        let _guard = self.guard();
        let mut map = self.read_map()?;
        map.insert(key.to_owned(), value.to_owned());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> Result<(), CoreError> {
        let _guard = self.guard();
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }
}
