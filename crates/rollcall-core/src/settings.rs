//! Runtime settings persisted as TOML.

use crate::persist::{write_atomic, LoadOutcome};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Detection budget in seconds for a general-purpose check.
    pub detection_time_secs: u64,
    /// Cosine similarity threshold for a positive match.
    pub threshold: f32,
    /// Detection budget for operator-triggered checks.
    pub manual_detection_time_secs: u64,
    /// Detection budget for scheduled checks.
    pub auto_detection_time_secs: u64,
    /// Wait after a scheduled check before the next cycle.
    pub auto_cooldown_secs: u64,
    /// Wait between cycles when no slot is active.
    pub auto_idle_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            detection_time_secs: 30,
            threshold: 0.6,
            manual_detection_time_secs: 5,
            auto_detection_time_secs: 10,
            auto_cooldown_secs: 60,
            auto_idle_secs: 30,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if !(-1.0..=1.0).contains(&self.threshold) {
            return Err(SettingsError::Invalid(format!(
                "threshold {} outside [-1, 1]",
                self.threshold
            )));
        }
        for (name, secs) in [
            ("detection_time_secs", self.detection_time_secs),
            ("manual_detection_time_secs", self.manual_detection_time_secs),
            ("auto_detection_time_secs", self.auto_detection_time_secs),
        ] {
            if secs == 0 {
                return Err(SettingsError::Invalid(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Overwrite only the fields present in `patch`.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.detection_time_secs {
            self.detection_time_secs = v;
        }
        if let Some(v) = patch.threshold {
            self.threshold = v;
        }
        if let Some(v) = patch.manual_detection_time_secs {
            self.manual_detection_time_secs = v;
        }
        if let Some(v) = patch.auto_detection_time_secs {
            self.auto_detection_time_secs = v;
        }
        if let Some(v) = patch.auto_cooldown_secs {
            self.auto_cooldown_secs = v;
        }
        if let Some(v) = patch.auto_idle_secs {
            self.auto_idle_secs = v;
        }
    }

    /// Budget for a check that is neither operator-triggered nor scheduled.
    pub fn detection_time(&self) -> Duration {
        Duration::from_secs(self.detection_time_secs)
    }

    pub fn manual_detection_time(&self) -> Duration {
        Duration::from_secs(self.manual_detection_time_secs)
    }

    pub fn auto_detection_time(&self) -> Duration {
        Duration::from_secs(self.auto_detection_time_secs)
    }
}

/// Partial update for [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub detection_time_secs: Option<u64>,
    pub threshold: Option<f32>,
    pub manual_detection_time_secs: Option<u64>,
    pub auto_detection_time_secs: Option<u64>,
    pub auto_cooldown_secs: Option<u64>,
    pub auto_idle_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings, falling back to defaults when missing or unreadable.
    pub fn load(&self) -> (Settings, LoadOutcome) {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return (Settings::default(), LoadOutcome::Defaulted);
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read settings");
                return (Settings::default(), LoadOutcome::Recovered { reason: e.to_string() });
            }
        };

        let parsed = toml::from_str::<Settings>(&raw)
            .map_err(|e| e.to_string())
            .and_then(|s| s.validate().map(|()| s).map_err(|e| e.to_string()));

        match parsed {
            Ok(settings) => (settings, LoadOutcome::Loaded),
            Err(reason) => {
                tracing::warn!(path = %self.path.display(), %reason, "settings unreadable; using defaults");
                (Settings::default(), LoadOutcome::Recovered { reason })
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> Result<(), SettingsError> {
        settings.validate()?;
        write_atomic(&self.path, toml::to_string_pretty(settings)?.as_bytes())?;
        tracing::info!(path = %self.path.display(), "settings saved");
        Ok(())
    }

    /// Load, apply `patch`, validate and save. Returns the new settings.
    pub fn update(&self, patch: &SettingsPatch) -> Result<Settings, SettingsError> {
        let (mut settings, _) = self.load();
        settings.apply(patch);
        self.save(&settings)?;
        Ok(settings)
    }

    /// Overwrite with defaults.
    pub fn reset(&self) -> Result<Settings, SettingsError> {
        let settings = Settings::default();
        self.save(&settings)?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        let (settings, outcome) = store.load();
        assert_eq!(outcome, LoadOutcome::Defaulted);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "threshold = 0.45\n").unwrap();

        let (settings, outcome) = SettingsStore::new(&path).load();
        assert_eq!(outcome, LoadOutcome::Loaded);
        assert!((settings.threshold - 0.45).abs() < 1e-6);
        assert_eq!(settings.detection_time_secs, 30);
    }

    #[test]
    fn test_invalid_file_recovered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "threshold = 7.0\n").unwrap();
        let (settings, outcome) = SettingsStore::new(&path).load();
        assert!(matches!(outcome, LoadOutcome::Recovered { .. }));
        assert_eq!(settings, Settings::default());

        std::fs::write(&path, "this is [not toml").unwrap();
        let (_, outcome) = SettingsStore::new(&path).load();
        assert!(matches!(outcome, LoadOutcome::Recovered { .. }));
    }

    #[test]
    fn test_update_only_touches_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        let patch = SettingsPatch {
            auto_cooldown_secs: Some(120),
            ..Default::default()
        };
        let updated = store.update(&patch).unwrap();
        assert_eq!(updated.auto_cooldown_secs, 120);
        assert_eq!(updated.auto_idle_secs, 30);

        let (reloaded, outcome) = store.load();
        assert!(outcome.is_loaded());
        assert_eq!(reloaded, updated);
    }

    #[test]
    fn test_update_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        let patch = SettingsPatch {
            manual_detection_time_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(store.update(&patch), Err(SettingsError::Invalid(_))));
        assert!(!store.path().exists());
    }

    #[test]
    fn test_durations_follow_fields() {
        let mut settings = Settings::default();
        assert_eq!(settings.detection_time(), Duration::from_secs(30));
        settings.apply(&SettingsPatch { detection_time_secs: Some(45), ..Default::default() });
        assert_eq!(settings.detection_time(), Duration::from_secs(45));
        assert_eq!(settings.manual_detection_time(), Duration::from_secs(5));
        assert_eq!(settings.auto_detection_time(), Duration::from_secs(10));
    }

    #[test]
    fn test_reset() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.toml"));
        store
            .update(&SettingsPatch { threshold: Some(0.9), ..Default::default() })
            .unwrap();
        assert_eq!(store.reset().unwrap(), Settings::default());
        assert_eq!(store.load().0, Settings::default());
    }
}
