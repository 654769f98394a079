use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Storage key of the feature switch.
pub const TOGGLE_KEY: &str = "applelookaroundchecked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    StorageUnavailable,
    Corrupt(String),
    Io(String),
}

impl std::fmt::Display for SettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettingsError::StorageUnavailable => write!(f, "settings storage unavailable"),
            SettingsError::Corrupt(msg) => write!(f, "settings storage corrupt: {msg}"),
            SettingsError::Io(msg) => write!(f, "settings storage error: {msg}"),
        }
    }
}

impl std::error::Error for SettingsError {}

/// Boolean flags persisted by key. Values are stored as `"true"` / `"false"`.
pub trait ToggleStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<bool>, SettingsError>;
    fn set(&self, key: &str, value: bool) -> Result<(), SettingsError>;
}

fn encode(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

// Anything other than "true" reads as off.
fn decode(raw: &str) -> bool {
    raw.trim() == "true"
}

#[derive(Debug, Default)]
pub struct MemoryToggleStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryToggleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ToggleStore for MemoryToggleStore {
    fn get(&self, key: &str) -> Result<Option<bool>, SettingsError> {
        Ok(self.values.lock().get(key).map(|v| decode(v)))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        self.values
            .lock()
            .insert(key.to_string(), encode(value).to_string());
        Ok(())
    }
}

/// Flags kept in a small JSON object on disk.
#[derive(Debug)]
pub struct FileToggleStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within the process.
    write_lock: Mutex<()>,
}

impl FileToggleStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(SettingsError::Io(e.to_string())),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| SettingsError::Corrupt(e.to_string()))
    }
}

impl ToggleStore for FileToggleStore {
    fn get(&self, key: &str) -> Result<Option<bool>, SettingsError> {
        Ok(self.load()?.get(key).map(|v| decode(v)))
    }

    fn set(&self, key: &str, value: bool) -> Result<(), SettingsError> {
        let _guard = self.write_lock.lock();
        let mut values = self.load()?;
        values.insert(key.to_string(), encode(value).to_string());

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let raw =
            serde_json::to_string_pretty(&values).map_err(|e| SettingsError::Io(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| SettingsError::Io(e.to_string()))
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_storage {
    use super::{SettingsError, ToggleStore, decode, encode};

    /// Flags in the browser's `localStorage`.
    #[derive(Debug, Default)]
    pub struct LocalStorageToggleStore;

    impl LocalStorageToggleStore {
        pub fn new() -> Self {
            Self
        }
    }

    impl ToggleStore for LocalStorageToggleStore {
        fn get(&self, key: &str) -> Result<Option<bool>, SettingsError> {
            let storage = window_local_storage()?;
            let raw = storage
                .get_item(key)
                .map_err(|e| SettingsError::Io(format!("get_item({key}) failed: {:?}", e)))?;
            Ok(raw.map(|v| decode(&v)))
        }

        fn set(&self, key: &str, value: bool) -> Result<(), SettingsError> {
            let storage = window_local_storage()?;
            storage
                .set_item(key, encode(value))
                .map_err(|e| SettingsError::Io(format!("set_item({key}) failed: {:?}", e)))
        }
    }

    fn window_local_storage() -> Result<web_sys::Storage, SettingsError> {
        let win = web_sys::window().ok_or(SettingsError::StorageUnavailable)?;
        win.local_storage()
            .map_err(|e| SettingsError::Io(format!("localStorage error: {:?}", e)))?
            .ok_or(SettingsError::StorageUnavailable)
    }
}

#[cfg(target_arch = "wasm32")]
pub use wasm_storage::LocalStorageToggleStore;

/// The persisted on/off switch for the panorama source.
///
/// Defaults to off: the first read of a missing key writes `false`.
/// Storage failures read as off and are logged.
#[derive(Clone)]
pub struct FeatureToggle {
    store: Arc<dyn ToggleStore>,
    key: String,
}

impl FeatureToggle {
    pub fn new(store: Arc<dyn ToggleStore>) -> Self {
        Self::with_key(store, TOGGLE_KEY)
    }

    pub fn with_key(store: Arc<dyn ToggleStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_enabled(&self) -> bool {
        match self.store.get(&self.key) {
            Ok(Some(enabled)) => enabled,
            Ok(None) => {
                if let Err(err) = self.store.set(&self.key, false) {
                    warn!("could not initialize {}: {err}", self.key);
                }
                false
            }
            Err(err) => {
                warn!("could not read {}: {err}", self.key);
                false
            }
        }
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), SettingsError> {
        self.store.set(&self.key, enabled)
    }
}

impl std::fmt::Debug for FeatureToggle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureToggle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}
