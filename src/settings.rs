use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::fixed_layout::Zoom;
use crate::layout::LayoutStyle;
use crate::search::SearchOptions;
use crate::view::ViewOptions;

pub const CURRENT_VERSION: u32 = 2;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagewright";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub size_per_location: f64,
    pub size_per_time_unit: f64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            size_per_location: 1500.0,
            size_per_time_unit: 1600.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixedLayoutSettings {
    pub zoom: Zoom,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub layout: LayoutStyle,

    #[serde(default)]
    pub progress: ProgressSettings,

    #[serde(default)]
    pub fixed_layout: FixedLayoutSettings,

    #[serde(default)]
    pub search: SearchOptions,

    #[serde(default)]
    pub history: HistorySettings,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            layout: LayoutStyle::default(),
            progress: ProgressSettings::default(),
            fixed_layout: FixedLayoutSettings::default(),
            search: SearchOptions::default(),
            history: HistorySettings::default(),
        }
    }
}

impl Settings {
    pub fn view_options(&self) -> ViewOptions {
        ViewOptions {
            style: self.layout.clone(),
            zoom: self.fixed_layout.zoom,
            size_per_location: self.progress.size_per_location,
            size_per_time_unit: self.progress.size_per_time_unit,
            history_limit: self.history.limit,
            ..ViewOptions::default()
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings, &content);
                    save_settings_to_file(&settings, path);
                }

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

/// Version 1 kept the layout keys at the top level and the zoom as
/// `fixed_layout_zoom`.
fn migrate_settings(settings: &mut Settings, content: &str) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    if settings.version < 2 {
        #[derive(Deserialize)]
        struct V1 {
            #[serde(flatten)]
            layout: Option<LayoutStyle>,
            fixed_layout_zoom: Option<String>,
        }
        match serde_yaml::from_str::<V1>(content) {
            Ok(v1) => {
                if let Some(layout) = v1.layout {
                    settings.layout = layout;
                }
                if let Some(zoom) = v1.fixed_layout_zoom {
                    settings.fixed_layout.zoom = Zoom::parse(&zoom);
                }
            }
            Err(e) => warn!("Could not read v1 settings, keeping defaults: {e}"),
        }
    }

    settings.version = CURRENT_VERSION;
}

pub fn save_settings() {
    let Some(path) = config_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent()
        && !parent.exists()
        && let Err(e) = fs::create_dir_all(parent)
    {
        error!("Failed to create config directory {parent:?}: {e}");
        return;
    }

    let body = match serde_yaml::to_string(settings) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize settings: {e}");
            return;
        }
    };

    match fs::write(path, format!("{SETTINGS_HEADER}{body}")) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

const SETTINGS_HEADER: &str = r#"# pagewright settings
#
# layout.flow: paginated | scrolled
# fixed_layout.zoom: a scale such as 1.5, or fit-width | fit-page
# history.limit: omit to keep every back/forward entry
"#;

// Public API for accessing/modifying settings

pub fn get_settings() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

/// Applies `change` to the global settings and writes them out.
pub fn update_settings(change: impl FnOnce(&mut Settings)) {
    if let Ok(mut settings) = SETTINGS.write() {
        change(&mut settings);
    }
    save_settings();
}

pub fn get_layout_style() -> LayoutStyle {
    SETTINGS.read().map(|s| s.layout.clone()).unwrap_or_default()
}

pub fn get_zoom() -> Zoom {
    SETTINGS
        .read()
        .map(|s| s.fixed_layout.zoom)
        .unwrap_or_default()
}

pub fn get_search_options() -> SearchOptions {
    SETTINGS.read().map(|s| s.search.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed_layout::Fit;
    use crate::layout::Flow;
    use serial_test::serial;
    use tempfile::TempDir;

    fn reset() {
        if let Ok(mut global) = SETTINGS.write() {
            *global = Settings::default();
        }
    }

    #[test]
    #[serial]
    fn test_partial_file_keeps_defaults() {
        reset();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 2\nlayout:\n  flow: scrolled\nfixed_layout:\n  zoom: fit-page\n",
        )
        .unwrap();
        load_settings_from_path(&path);

        let settings = get_settings();
        assert_eq!(settings.layout.flow, Flow::Scrolled);
        assert_eq!(settings.layout.font_size, LayoutStyle::default().font_size);
        assert_eq!(get_zoom(), Zoom::Fit(Fit::FitPage));
        assert_eq!(settings.progress, ProgressSettings::default());
        reset();
    }

    #[test]
    #[serial]
    fn test_v1_file_is_migrated_and_rewritten() {
        reset();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "version: 1\nfont_size: 20\nfixed_layout_zoom: \"1.5\"\n").unwrap();
        load_settings_from_path(&path);

        let settings = get_settings();
        assert_eq!(settings.version, CURRENT_VERSION);
        assert_eq!(settings.layout.font_size, 20.0);
        assert_eq!(settings.fixed_layout.zoom, Zoom::Scale(1.5));

        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(rewritten.starts_with("# pagewright settings"));
        let reparsed: Settings = serde_yaml::from_str(&rewritten).unwrap();
        assert_eq!(reparsed, settings);
        reset();
    }

    #[test]
    #[serial]
    fn test_broken_file_leaves_settings_alone() {
        reset();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "layout: [not, a, map").unwrap();
        load_settings_from_path(&path);
        assert_eq!(get_settings(), Settings::default());
    }

    #[test]
    fn test_view_options_follow_settings() {
        let mut settings = Settings::default();
        settings.history.limit = Some(50);
        settings.progress.size_per_location = 1000.0;
        let options = settings.view_options();
        assert_eq!(options.history_limit, Some(50));
        assert_eq!(options.size_per_location, 1000.0);
        assert_eq!(options.zoom, Zoom::Scale(1.0));
    }
}
