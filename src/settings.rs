use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{PoisonError, RwLock},
    time::Duration,
};

/// Tunables for the timers and the history subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Length of the normal-breathing interval before the post-check.
    pub recovery_seconds: u32,
    /// Control pause stopwatch refresh period (about 20 Hz).
    pub cp_tick_ms: u64,
    /// Breathing timer refresh period (about 5 Hz).
    pub breathing_tick_ms: u64,
    pub recovery_tick_ms: u64,
    /// How many records the control pause screen keeps in its recent list.
    pub recent_records_limit: usize,
    /// How long a shared history query outlives its last subscriber.
    pub subscription_grace_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recovery_seconds: 30,
            cp_tick_ms: 50,
            breathing_tick_ms: 200,
            recovery_tick_ms: 1_000,
            recent_records_limit: 3,
            subscription_grace_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn cp_tick(&self) -> Duration {
        Duration::from_millis(self.cp_tick_ms.max(1))
    }

    pub fn breathing_tick(&self) -> Duration {
        Duration::from_millis(self.breathing_tick_ms.max(1))
    }

    pub fn recovery_tick(&self) -> Duration {
        Duration::from_millis(self.recovery_tick_ms.max(1))
    }

    pub fn subscription_grace(&self) -> Duration {
        Duration::from_millis(self.subscription_grace_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring malformed settings at {}: {err}; using defaults",
                    path.display()
                );
                Settings::default()
            })
        } else {
            Settings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> Settings {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.get(), Settings::default());
        assert_eq!(store.get().recovery_seconds, 30);
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        let custom = Settings {
            recovery_seconds: 45,
            ..Settings::default()
        };
        store.update(custom.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.get(), custom);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "recoverySeconds": 20 }"#).unwrap();

        let settings = SettingsStore::new(path).unwrap().get();
        assert_eq!(settings.recovery_seconds, 20);
        assert_eq!(settings.recent_records_limit, 3);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();

        assert_eq!(SettingsStore::new(path).unwrap().get(), Settings::default());
    }
}
