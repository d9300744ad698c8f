//! Persistence of flow state
//!
//! The whole [`FlowState`] is stored as one JSON blob. On load the saved
//! keys are laid over a fresh default state, so blobs written before a
//! field existed still load, and the legacy `useDirectMode` flag is
//! translated into `requestMode`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use directories::ProjectDirs;
use serde_json::{Map, Value};

use super::state::FlowState;
use crate::error::{PlaygroundError, Result};
use crate::transport::RequestMode;

/// Key (and file stem) under which the state blob is stored
pub const STORAGE_KEY: &str = "mcp-auth-playground-state";

const LEGACY_MODE_KEY: &str = "useDirectMode";

/// Where the state blob lives
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Read the saved blob, if any
    fn load(&self) -> Result<Option<String>>;

    /// Replace the saved blob
    fn save(&self, blob: &str) -> Result<()>;

    /// Remove the saved blob
    fn clear(&self) -> Result<()>;
}

/// State stored in a JSON file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Store at an explicit path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the platform data directory
    ///
    /// # Errors
    ///
    /// Returns [`PlaygroundError::Storage`] when no home directory can be
    /// determined.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("io", "mcp-auth-playground", "mcp-auth-playground")
            .ok_or_else(|| {
                PlaygroundError::Storage("could not determine a data directory".to_string())
            })?;
        Ok(dirs.data_dir().join(format!("{}.json", STORAGE_KEY)))
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PlaygroundError::Storage(format!(
                "failed to read {}: {}",
                self.path.display(),
                e
            ))
            .into()),
        }
    }

    fn save(&self, blob: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Write then rename so a crash never leaves a half-written blob.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// State kept in memory only
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    blob: Mutex<Option<String>>,
}

impl MemoryStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with `blob`
    pub fn with_blob(blob: impl Into<String>) -> Self {
        Self {
            blob: Mutex::new(Some(blob.into())),
        }
    }

    /// Current blob
    pub fn snapshot(&self) -> Option<String> {
        self.blob
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.snapshot())
    }

    fn save(&self, blob: &str) -> Result<()> {
        *self
            .blob
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(blob.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .blob
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}

/// Serialize state for storage
pub fn encode(state: &FlowState) -> Result<String> {
    Ok(serde_json::to_string(state)?)
}

/// Rebuild state from a saved blob, merged over `defaults`
///
/// Top-level keys in the blob replace the default's; keys the blob lacks
/// keep their default values. A saved value with the wrong shape is
/// dropped on its own and its key keeps the default.
///
/// # Errors
///
/// Returns [`PlaygroundError::Storage`] if the blob is not a JSON object.
pub fn restore(blob: &str, defaults: &FlowState) -> Result<FlowState> {
    let parsed: Value = serde_json::from_str(blob)
        .map_err(|e| PlaygroundError::Storage(format!("saved state is not JSON: {}", e)))?;
    let Value::Object(mut saved) = parsed else {
        return Err(PlaygroundError::Storage("saved state is not a JSON object".to_string()).into());
    };

    migrate_legacy(&mut saved);

    let mut merged = match serde_json::to_value(defaults)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for (key, value) in saved {
        let previous = merged.insert(key.clone(), value);
        if let Err(e) = serde_json::from_value::<FlowState>(Value::Object(merged.clone())) {
            tracing::warn!(key = %key, "Discarding saved field with an unexpected shape: {}", e);
            match previous {
                Some(default) => merged.insert(key, default),
                None => merged.remove(&key),
            };
        }
    }

    serde_json::from_value(Value::Object(merged))
        .map_err(|e| PlaygroundError::Storage(format!("saved state has an invalid field: {}", e)).into())
}

/// Translate `useDirectMode` into `requestMode` and drop it
///
/// An explicit `requestMode` in the blob wins over the legacy flag.
pub fn migrate_legacy(saved: &mut Map<String, Value>) {
    let Some(legacy) = saved.remove(LEGACY_MODE_KEY) else {
        return;
    };
    if saved.contains_key("requestMode") {
        return;
    }
    if let Some(use_direct) = legacy.as_bool() {
        let mode = RequestMode::from_legacy_flag(use_direct);
        tracing::debug!("Migrating legacy useDirectMode={} to requestMode={}", use_direct, mode);
        saved.insert("requestMode".to_string(), Value::String(mode.to_string()));
    }
}
