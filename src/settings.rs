use crate::attach::SubscriptionId;
use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Persisted fields the session core reads and writes but does not own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// Device-wide satellite mode flag. Other radios watch it to switch off.
    pub satellite_mode_enabled: bool,
    /// Per-subscription "carrier satellite attach allowed by the user".
    pub attach_user_enabled: BTreeMap<SubscriptionId, bool>,
}

pub trait SettingsStore: Send {
    fn load(&self) -> PersistedSettings;
    fn set_satellite_mode_enabled(&mut self, enabled: bool) -> Result<(), ServiceError>;
    fn set_attach_user_enabled(&mut self, subscription: SubscriptionId, enabled: bool) -> Result<(), ServiceError>;
}

/// In-memory store; clones share the same underlying settings.
#[derive(Debug, Clone, Default)]
pub struct InMemorySettings {
    inner: Arc<Mutex<PersistedSettings>>,
}

impl InMemorySettings {
    pub fn new(initial: PersistedSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut PersistedSettings) -> R) -> Result<R, ServiceError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| ServiceError::Settings("settings lock poisoned".into()))?;
        Ok(f(&mut guard))
    }
}

impl SettingsStore for InMemorySettings {
    fn load(&self) -> PersistedSettings {
        self.with(|s| s.clone()).unwrap_or_default()
    }

    fn set_satellite_mode_enabled(&mut self, enabled: bool) -> Result<(), ServiceError> {
        self.with(|s| s.satellite_mode_enabled = enabled)
    }

    fn set_attach_user_enabled(&mut self, subscription: SubscriptionId, enabled: bool) -> Result<(), ServiceError> {
        self.with(|s| {
            s.attach_user_enabled.insert(subscription, enabled);
        })
    }
}

/// Settings kept as a JSON document on disk, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    cached: PersistedSettings,
}

impl JsonFileSettings {
    /// Open the file, starting from defaults if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ServiceError> {
        let path = path.into();
        let cached = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PersistedSettings::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, cached })
    }

    fn flush(&self) -> Result<(), ServiceError> {
        let json = serde_json::to_string_pretty(&self.cached)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileSettings {
    fn load(&self) -> PersistedSettings {
        self.cached.clone()
    }

    fn set_satellite_mode_enabled(&mut self, enabled: bool) -> Result<(), ServiceError> {
        self.cached.satellite_mode_enabled = enabled;
        self.flush()
    }

    fn set_attach_user_enabled(&mut self, subscription: SubscriptionId, enabled: bool) -> Result<(), ServiceError> {
        self.cached.attach_user_enabled.insert(subscription, enabled);
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_settings_roundtrip_through_disk() {
        let path = std::env::temp_dir().join(format!("satsession-settings-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut store = JsonFileSettings::open(&path).unwrap();
        assert!(!store.load().satellite_mode_enabled);
        store.set_satellite_mode_enabled(true).unwrap();
        store.set_attach_user_enabled(3, false).unwrap();

        let reopened = JsonFileSettings::open(&path).unwrap();
        let settings = reopened.load();
        assert!(settings.satellite_mode_enabled);
        assert_eq!(settings.attach_user_enabled.get(&3), Some(&false));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_in_memory_clones_share_state() {
        let store = InMemorySettings::default();
        let mut writer = store.clone();
        writer.set_satellite_mode_enabled(true).unwrap();
        assert!(store.load().satellite_mode_enabled);
    }
}
