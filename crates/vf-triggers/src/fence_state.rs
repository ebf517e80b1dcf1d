//! Persisted geofence containment flags

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{TriggerError, TriggerResult};

/// Remembers which fences the device was last inside
pub trait GeofenceStateStore: Send + Sync {
    fn is_inside(&self, fence_id: &str) -> bool;

    fn set_inside(&self, fence_id: &str, inside: bool) -> TriggerResult<()>;
}

/// Containment kept for the life of the process
#[derive(Default)]
pub struct MemoryGeofenceState {
    inside: DashMap<String, bool>,
}

impl MemoryGeofenceState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GeofenceStateStore for MemoryGeofenceState {
    fn is_inside(&self, fence_id: &str) -> bool {
        self.inside.get(fence_id).map(|v| *v).unwrap_or(false)
    }

    fn set_inside(&self, fence_id: &str, inside: bool) -> TriggerResult<()> {
        self.inside.insert(fence_id.to_string(), inside);
        Ok(())
    }
}

/// Containment mirrored to a JSON object of `fence_id: bool`
pub struct JsonFileGeofenceState {
    path: PathBuf,
    inside: DashMap<String, bool>,
}

impl JsonFileGeofenceState {
    /// Open `path`, starting empty when the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> TriggerResult<Self> {
        let path = path.into();
        let mut inside = DashMap::new();
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => {
                let stored: BTreeMap<String, bool> = serde_json::from_str(&content)?;
                debug!(path = %path.display(), fences = stored.len(), "Loaded geofence state");
                inside.extend(stored);
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(TriggerError::StateIo { path, source }),
        }
        Ok(Self { path, inside })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> TriggerResult<()> {
        let snapshot: BTreeMap<String, bool> = self
            .inside
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let content = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| TriggerError::StateIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, content).map_err(|source| TriggerError::StateIo {
            path: self.path.clone(),
            source,
        })
    }
}

impl GeofenceStateStore for JsonFileGeofenceState {
    fn is_inside(&self, fence_id: &str) -> bool {
        self.inside.get(fence_id).map(|v| *v).unwrap_or(false)
    }

    fn set_inside(&self, fence_id: &str, inside: bool) -> TriggerResult<()> {
        let previous = self.inside.insert(fence_id.to_string(), inside);
        if previous == Some(inside) {
            return Ok(());
        }
        if let Err(e) = self.flush() {
            warn!(fence_id, error = %e, "Failed to persist geofence state");
            return Err(e);
        }
        Ok(())
    }
}
