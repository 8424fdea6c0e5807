// SettingsManager Service
// Handles application settings persistence

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::Value;

use crate::models::Settings;

/// Manages application settings storage and retrieval
pub struct SettingsManager {
    settings_path: PathBuf,
    app_data_dir: PathBuf,
    cache: RwLock<Option<Settings>>,
}

impl SettingsManager {
    /// Create a new SettingsManager with the given app data directory
    pub fn new(app_data_dir: PathBuf) -> Self {
        let settings_path = app_data_dir.join("settings.json");
        Self {
            settings_path,
            app_data_dir,
            cache: RwLock::new(None),
        }
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load(&self) -> Result<Settings, String> {
        // Check cache first
        if let Ok(cache) = self.cache.read() {
            if let Some(ref settings) = *cache {
                return Ok(settings.clone());
            }
        }

        let settings = if self.settings_path.exists() {
            let content = std::fs::read_to_string(&self.settings_path)
                .map_err(|e| format!("Failed to read settings: {e}"))?;

            let mut user_value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            let defaults_value = serde_json::to_value(Settings::default())
                .map_err(|e| format!("Failed to build default settings: {e}"))?;

            let changed = merge_missing_settings(&mut user_value, &defaults_value);

            let settings: Settings = serde_json::from_value(user_value)
                .map_err(|e| format!("Failed to parse settings: {e}"))?;

            if changed {
                self.save_internal(&settings)?;
            }

            settings
        } else {
            // Return defaults and save them
            let defaults = Settings::default();
            self.save_internal(&defaults)?;
            defaults
        };

        // Update cache
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, settings: &Settings) -> Result<(), String> {
        self.save_internal(settings)?;

        // Update cache
        if let Ok(mut cache) = self.cache.write() {
            *cache = Some(settings.clone());
        }

        Ok(())
    }

    /// Internal save without cache update
    fn save_internal(&self, settings: &Settings) -> Result<(), String> {
        // Ensure parent directory exists
        if let Some(parent) = self.settings_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {e}"))?;
        }

        let content = serde_json::to_string_pretty(settings)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(&self.settings_path, content)
            .map_err(|e| format!("Failed to write settings: {e}"))
    }

    /// Remember the last directory the user browsed to
    pub fn save_browse_path(&self, path: &str) -> Result<(), String> {
        let mut settings = self.load()?;
        settings.last_browse_path = path.to_string();
        self.save(&settings)
    }

    /// Resolve the clip output directory ("" = <data dir>/output)
    pub fn output_dir(&self) -> Result<PathBuf, String> {
        let settings = self.load()?;
        let dir = if settings.output_dir.is_empty() {
            self.app_data_dir.join("output")
        } else {
            PathBuf::from(settings.output_dir)
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create output directory: {e}"))?;
        Ok(dir)
    }

    /// Get the app data directory
    pub fn app_data_dir(&self) -> &Path {
        &self.app_data_dir
    }
}

fn merge_missing_settings(target: &mut Value, defaults: &Value) -> bool {
    match (target, defaults) {
        (Value::Object(target_map), Value::Object(defaults_map)) => {
            let mut changed = false;
            for (key, default_value) in defaults_map {
                match target_map.get_mut(key) {
                    Some(target_value) => {
                        if merge_missing_settings(target_value, default_value) {
                            changed = true;
                        }
                    }
                    None => {
                        target_map.insert(key.clone(), default_value.clone());
                        changed = true;
                    }
                }
            }
            changed
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let settings = manager.load().unwrap();
        assert_eq!(settings.backend_port, 3000);
        assert!(dir.path().join("settings.json").exists());
    }

    #[test]
    fn test_merge_fills_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"ffmpegPath": "/opt/ffmpeg/bin/ffmpeg"}"#,
        )
        .unwrap();

        let manager = SettingsManager::new(dir.path().to_path_buf());
        let settings = manager.load().unwrap();

        assert_eq!(settings.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(settings.rtmp_port, 1935);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().to_path_buf());

        let mut settings = manager.load().unwrap();
        settings.last_browse_path = "/media/videos".to_string();
        manager.save(&settings).unwrap();

        let reloaded = manager.load().unwrap();
        assert_eq!(reloaded.last_browse_path, "/media/videos");
    }
}
