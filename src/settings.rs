// Global settings store with parsing helpers and runtime updates persisted to storage.
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

use log::{error, warn};

use crate::settings_storage::SettingsStorage;

/// Static settings metadata for defaults and help output.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub key: &'static str,
    pub default: &'static str,
}

pub const NO_SETTINGS: &[SettingSpec] = &[];

macro_rules! specs {
    ($($key:literal => $default:expr),* $(,)?) => {
        vec![$(SettingSpec { key: $key, default: $default }),*]
    };
}

/// Settings shared by the bar, dialogs, overlays and the gauge scheduler.
pub fn base_setting_specs(
    default_left: &'static str,
    default_center: &'static str,
    default_right: &'static str,
    default_theme: &'static str,
) -> Vec<SettingSpec> {
    specs![
        "halcyon.bar.left" => default_left,
        "halcyon.bar.center" => default_center,
        "halcyon.bar.right" => default_right,
        "halcyon.bar.theme" => default_theme,
        "halcyon.bar.height" => "32",
        "halcyon.bar.padding_x" => "8",
        "halcyon.bar.section_spacing" => "12",
        "halcyon.bar.border.blend" => "true",
        "halcyon.bar.border.line_width" => "1.0",
        "halcyon.bar.border.row_height" => "3.0",
        "halcyon.bar.border.mix_1" => "0.2",
        "halcyon.bar.border.mix_2" => "0.6",
        "halcyon.bar.border.mix_3" => "1.0",
        "halcyon.bar.border.alpha_1" => "0.6",
        "halcyon.bar.border.alpha_2" => "0.7",
        "halcyon.bar.border.alpha_3" => "0.9",
        "halcyon.dialog.header.font_size" => "14",
        "halcyon.dialog.title_align" => "center",
        "halcyon.dialog.header.bottom_spacing" => "4",
        "halcyon.dialog.container.padding_y" => "10",
        "halcyon.dialog.container.padding_x" => "10",
        "halcyon.gauge.ui.padding_x" => "4",
        "halcyon.gauge.ui.spacing" => "10",
        "halcyon.gauge.ui.icon_size" => "16",
        "halcyon.gauge.ui.value_size" => "13",
        "halcyon.gauge.ui.icon_value_spacing" => "4",
        "halcyon.gauge.ui.meter_width" => "36",
        "halcyon.gauge.work.max_run_ms" => "40",
        "halcyon.gauge.work.max_run_strikes" => "3",
        "halcyon.osd.timeout_ms" => "3000",
        "halcyon.osd.width" => "260",
        "halcyon.osd.height" => "56",
        "halcyon.osd.margin_bottom" => "80",
        "halcyon.notifications.max_stored" => "50",
        "halcyon.notifications.max_popups" => "3",
        "halcyon.notifications.popup_width" => "360",
        "halcyon.notifications.summary_chars" => "40",
        "halcyon.notifications.body_chars" => "120",
        "halcyon.control_center.width" => "380",
        "halcyon.control_center.gamemode_command" => "~/.config/halcyon/scripts/gamemode.sh",
        "halcyon.control_center.wallpaper_command" => "~/Scripts/wallpaper_change.sh",
        "halcyon.control_center.vendor_command" => "rog-control-center",
    ]
}

#[derive(Debug)]
pub struct Settings {
    map: RwLock<HashMap<String, String>>,
    storage: SettingsStorage,
}

impl Settings {
    pub fn new(storage: SettingsStorage) -> Self {
        let map = match storage.load() {
            Ok(map) => map,
            Err(err) => {
                error!("Failed to load settings storage: {err}");
                HashMap::new()
            }
        };
        Self {
            map: RwLock::new(map),
            storage,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map
            .read()
            .expect("settings read lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        Some(parse_or_exit::<T>(key, &value))
    }

    /// Parsed value, or `default` when the key is missing or unparsable.
    pub fn get_parsed_or<T: FromStr>(&self, key: &str, default: T) -> T {
        let Some(value) = self.get(key) else {
            return default;
        };
        value.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("Invalid setting '{key}': cannot parse '{value}'; using default");
            default
        })
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        Some(parse_or_exit::<bool>(key, &value))
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_parsed_or(key, default)
    }

    /// Set and persist a value.
    pub fn update(&self, key: &str, value: &str) {
        let mut map = self.map.write().expect("settings write lock poisoned");
        if map.get(key).is_some_and(|current| current == value) {
            return;
        }
        map.insert(key.to_string(), value.to_string());
        let snapshot = map.clone();
        drop(map);
        if let Err(err) = self.storage.save(&snapshot) {
            error!("Failed to save settings storage: {err}");
        }
    }

    pub fn ensure_defaults(&self, specs: &[SettingSpec]) {
        let mut map = self.map.write().expect("settings write lock poisoned");
        for spec in specs {
            map.entry(spec.key.to_string())
                .or_insert_with(|| spec.default.to_string());
        }
        let snapshot = map.clone();
        drop(map);
        if let Err(err) = self.storage.save(&snapshot) {
            error!("Failed to save settings storage: {err}");
        }
    }
}

static SETTINGS: OnceLock<Settings> = OnceLock::new();

pub fn init_settings(settings: Settings) -> &'static Settings {
    SETTINGS
        .set(settings)
        .expect("settings initialized more than once");
    SETTINGS.get().expect("settings just initialized")
}

pub fn settings() -> &'static Settings {
    SETTINGS.get().expect("settings not initialized")
}

/// Parse one `key=value` (or `key:value`) command line override.
pub fn parse_settings_arg(arg: &str) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return Ok(map);
    }
    let sep_index = trimmed
        .find(['=', ':'])
        .ok_or_else(|| format!("missing '=' or ':' in setting '{trimmed}'"))?;
    let (key, value) = trimmed.split_at(sep_index);
    let value = &value[1..];
    if key.is_empty() {
        return Err(format!("missing key in setting '{trimmed}'"));
    }
    if key.chars().any(|c| c.is_whitespace()) {
        return Err(format!("setting key '{key}' cannot contain whitespace"));
    }
    map.insert(key.to_string(), value.trim().to_string());

    Ok(map)
}

/// Comma-separated list value with blank entries dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or_exit<T: FromStr>(key: &str, value: &str) -> T {
    value.parse::<T>().unwrap_or_else(|_| {
        panic!(
            "Invalid setting '{key}': cannot parse '{value}' as {}",
            std::any::type_name::<T>()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    fn temp_storage(name: &str) -> SettingsStorage {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "halcyon_settings_test_{}_{}",
            name,
            std::process::id()
        ));
        path.push(format!("Settings-{}.xresources", env!("CARGO_PKG_VERSION")));
        SettingsStorage::new(path)
    }

    #[test]
    fn parse_settings_rejects_missing_separator() {
        let err = parse_settings_arg("halcyon.bar.theme").unwrap_err();
        assert!(err.contains("missing '=' or ':'"));
    }

    #[test]
    fn parse_settings_rejects_empty_key() {
        let err = parse_settings_arg("=value").unwrap_err();
        assert!(err.contains("missing key"));
    }

    #[test]
    fn parse_settings_rejects_whitespace_key() {
        let err = parse_settings_arg("halcyon.bar.theme name=Light").unwrap_err();
        assert!(err.contains("cannot contain whitespace"));
    }

    #[test]
    fn parse_settings_accepts_empty_string() {
        let map = parse_settings_arg("").expect("empty settings should parse");
        assert!(map.is_empty());
    }

    #[test]
    fn parse_settings_keeps_commas_in_value() {
        let map = parse_settings_arg("halcyon.bar.right:clock,battery")
            .expect("parse unquoted comma value");
        assert_eq!(
            map.get("halcyon.bar.right").map(String::as_str),
            Some("clock,battery")
        );
    }

    #[test]
    fn split_list_drops_blank_entries() {
        assert_eq!(split_list(" cpu, ,memory,"), vec!["cpu", "memory"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn ensure_defaults_keeps_stored_values() {
        let storage = temp_storage("defaults");
        let path = storage.path().clone();
        let settings = Settings::new(storage);
        settings.update("halcyon.bar.height", "40");

        settings.ensure_defaults(&[
            SettingSpec {
                key: "halcyon.bar.height",
                default: "32",
            },
            SettingSpec {
                key: "halcyon.bar.padding_x",
                default: "8",
            },
        ]);

        assert_eq!(settings.get_parsed::<u32>("halcyon.bar.height"), Some(40));
        assert_eq!(settings.get("halcyon.bar.padding_x").as_deref(), Some("8"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn get_parsed_panics_on_invalid_value() {
        let storage = temp_storage("parse_invalid");
        let path = storage.path().clone();
        let mut map = HashMap::new();
        map.insert("halcyon.bar.height".to_string(), "tall".to_string());
        storage.save(&map).expect("save settings storage");
        let settings = Settings::new(storage);

        let result = panic::catch_unwind(|| {
            let _ = settings.get_parsed::<u32>("halcyon.bar.height");
        });

        assert!(result.is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn get_parsed_or_falls_back_on_invalid_value() {
        let storage = temp_storage("parse_or_invalid");
        let path = storage.path().clone();
        let mut map = HashMap::new();
        map.insert("halcyon.osd.timeout_ms".to_string(), "abc".to_string());
        map.insert("halcyon.bar.border.blend".to_string(), "maybe".to_string());
        map.insert("halcyon.bar.padding_x".to_string(), " 12 ".to_string());
        storage.save(&map).expect("save settings storage");
        let settings = Settings::new(storage);

        let result = panic::catch_unwind(|| {
            (
                settings.get_parsed_or("halcyon.osd.timeout_ms", 3000u64),
                settings.get_bool_or("halcyon.bar.border.blend", true),
                settings.get_parsed_or("halcyon.bar.padding_x", 8u16),
                settings.get_parsed_or("halcyon.missing", 7u8),
            )
        });

        assert_eq!(result.ok(), Some((3000, true, 12, 7)));
        let _ = std::fs::remove_file(path);
    }
}
