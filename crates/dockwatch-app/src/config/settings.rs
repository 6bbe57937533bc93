//! Settings persistence for `<config_dir>/dockwatch/settings.toml`

use std::path::{Path, PathBuf};

use dockwatch_core::prelude::*;

use super::types::Settings;

const SETTINGS_FILENAME: &str = "settings.toml";
const APP_DIR: &str = "dockwatch";

/// Per-user configuration directory, e.g. `~/.config/dockwatch`.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

/// Path of the settings file inside `config_dir`.
pub fn settings_path(config_dir: &Path) -> PathBuf {
    config_dir.join(SETTINGS_FILENAME)
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from `config_dir/settings.toml`
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(config_dir: &Path) -> Settings {
    let path = settings_path(config_dir);

    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Save settings to `config_dir/settings.toml`
///
/// Uses atomic write (temp file + rename).
pub fn save_settings(config_dir: &Path, settings: &Settings) -> Result<()> {
    if !config_dir.exists() {
        std::fs::create_dir_all(config_dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let path = settings_path(config_dir);
    let temp_path = config_dir.join(".settings.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("{}{}", SETTINGS_HEADER, content);

    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, &path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", path);
    Ok(())
}

const SETTINGS_HEADER: &str = r#"# dockwatch settings
#
# [backend]
# preference    = "automatic" | "force_docker" | "force_colima"
# custom_socket = "/path/to/docker.sock"   (optional, probed before anything else)

"#;

#[cfg(test)]
mod tests {
    use super::*;
    use dockwatch_core::BackendPreference;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        std::fs::write(settings_path(temp.path()), "not valid toml {{{{").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_load_settings_unknown_preference_falls_back() {
        let temp = tempdir().unwrap();
        std::fs::write(
            settings_path(temp.path()),
            "[backend]\npreference = \"podman\"\n",
        )
        .unwrap();

        assert_eq!(load_settings(temp.path()), Settings::default());
    }

    #[test]
    fn test_save_and_load_settings() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.backend.preference = BackendPreference::ForceDocker;
        settings.backend.custom_socket = Some(PathBuf::from("/tmp/engine.sock"));

        save_settings(temp.path(), &settings).unwrap();
        assert_eq!(load_settings(temp.path()), settings);

        let content = std::fs::read_to_string(settings_path(temp.path())).unwrap();
        assert!(content.starts_with("# dockwatch settings"));
        assert!(!temp.path().join(".settings.toml.tmp").exists());
    }

    #[test]
    fn test_save_creates_directory() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a").join("dockwatch");

        save_settings(&nested, &Settings::default()).unwrap();
        assert!(settings_path(&nested).exists());
    }
}
