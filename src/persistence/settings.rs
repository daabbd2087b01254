use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::autosave::AutosaveConfig;
use super::persist::{AUTOSAVE_FILE_NAME, DEFAULT_FILE_NAME};

static SETTINGS_OVERRIDE: OnceCell<AppSettings> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    // Off at startup; the editor toggles it on
    pub autosave_enabled: bool,
    pub autosave_interval_secs: u64,
    // If None, use OS default autosave directory
    pub autosave_override: Option<PathBuf>,
    pub versioned_autosaves: bool,
    pub default_file_name: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            autosave_enabled: false,
            autosave_interval_secs: 30,
            autosave_override: None,
            versioned_autosaves: false,
            default_file_name: DEFAULT_FILE_NAME.to_string(),
        }
    }
}

impl AppSettings {
    fn config_dir() -> PathBuf {
        // Cross-platform user config dir
        #[cfg(target_os = "macos")]
        {
            // ~/Library/Application Support/Story-Loom
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join("Library").join("Application Support").join("Story-Loom");
        }
        #[cfg(target_os = "windows")]
        {
            // %APPDATA%\Story-Loom
            if let Ok(appdata) = std::env::var("APPDATA") {
                return PathBuf::from(appdata).join("Story-Loom");
            }
            return PathBuf::from("Story-Loom");
        }
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_CONFIG_HOME/Story-Loom or ~/.config/Story-Loom
            if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
                return PathBuf::from(xdg).join("Story-Loom");
            }
            let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("~"));
            return home.join(".config").join("Story-Loom");
        }
    }

    fn autosave_default_dir() -> PathBuf {
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            // $XDG_STATE_HOME/story-loom or ~/.local/state/story-loom
            if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
                return PathBuf::from(xdg).join("story-loom");
            }
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(".local").join("state").join("story-loom");
            }
        }
        let mut p = std::env::temp_dir();
        p.push("Story-Loom");
        p
    }

    /// Settings installed with `set_override`, else the on-disk file, else
    /// defaults.
    pub fn current() -> Self {
        if let Some(settings) = SETTINGS_OVERRIDE.get() {
            return settings.clone();
        }
        Self::load().unwrap_or_default()
    }

    /// First call wins; later calls are ignored.
    pub fn set_override(settings: AppSettings) {
        let _ = SETTINGS_OVERRIDE.set(settings);
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::settings_dir().join("settings.json"))
    }

    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let mut f = fs::File::open(path)?;
        let mut s = String::new();
        f.read_to_string(&mut s)?;
        let v: Self = serde_json::from_str(&s)?;
        Ok(v)
    }

    pub fn save(&self) -> anyhow::Result<PathBuf> {
        self.save_to(&Self::settings_dir())
    }

    pub fn save_to(&self, dir: &std::path::Path) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join("settings.json");
        let s = serde_json::to_string_pretty(self)?;
        let mut f = fs::File::create(&path)?;
        f.write_all(s.as_bytes())?;
        Ok(path)
    }

    /// Return the directory where the settings file (settings.json) is stored.
    pub fn settings_dir() -> PathBuf {
        Self::config_dir()
    }

    pub fn autosave_dir(&self) -> PathBuf {
        if let Some(p) = &self.autosave_override { return p.clone(); }
        Self::autosave_default_dir()
    }

    /// Autosave configuration, or `None` while autosave is switched off.
    pub fn autosave_plan(&self, passphrase: Option<String>) -> Option<AutosaveConfig> {
        self.autosave_enabled.then(|| self.autosave_config(passphrase))
    }

    pub fn autosave_config(&self, passphrase: Option<String>) -> AutosaveConfig {
        AutosaveConfig {
            interval: Duration::from_secs(self.autosave_interval_secs.max(1)),
            passphrase,
            versioned: self.versioned_autosaves,
            file_name: AUTOSAVE_FILE_NAME.to_string(),
        }
    }
}
