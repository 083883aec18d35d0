// Theme parsing and custom palette definitions for the UI.
use std::sync::Arc;

use iced::{
    Color, Theme,
    theme::{Custom, Palette},
};
use log::warn;

use crate::settings::Settings;

pub const DEFAULT_THEME: Theme = Theme::Nord;
pub const DEFAULT_THEME_NAME: &str = "Nord";
pub const VALID_THEME_NAMES: &[&str] = &[
    "CatppuccinFrappe",
    "CatppuccinLatte",
    "CatppuccinMacchiato",
    "CatppuccinMocha",
    "Dark",
    "Dracula",
    "Ferra",
    "GruvboxDark",
    "GruvboxLight",
    "KanagawaDragon",
    "KanagawaLotus",
    "KanagawaWave",
    "Light",
    "Moonfly",
    "Nightfly",
    "Nord",
    "Oxocarbon",
    "TokyoNight",
    "TokyoNightLight",
    "TokyoNightStorm",
    "AyuMirage",
    "Custom",
];

pub const CUSTOM_THEME_NAME: &str = "Custom";
pub const CUSTOM_THEME_SETTING_KEYS: [&str; 6] = [
    "halcyon.bar.theme.background",
    "halcyon.bar.theme.text",
    "halcyon.bar.theme.primary",
    "halcyon.bar.theme.success",
    "halcyon.bar.theme.warning",
    "halcyon.bar.theme.danger",
];

pub fn is_custom_theme_name(name: &str) -> bool {
    name.trim().eq_ignore_ascii_case(CUSTOM_THEME_NAME)
}

/// Resolve `halcyon.bar.theme`, falling back to the default theme on bad input.
pub fn theme_from_settings(settings: &Settings) -> Theme {
    let name = settings.get_or("halcyon.bar.theme", DEFAULT_THEME_NAME);
    if is_custom_theme_name(&name) {
        return custom_theme_from_settings(settings).unwrap_or_else(|err| {
            warn!("{err}; using {DEFAULT_THEME_NAME}");
            DEFAULT_THEME
        });
    }
    parse_theme(&name).unwrap_or_else(|| {
        warn!(
            "Unknown theme '{name}', expected one of {}; using {DEFAULT_THEME_NAME}",
            VALID_THEME_NAMES.join(", ")
        );
        DEFAULT_THEME
    })
}

pub fn custom_theme_from_settings(settings: &Settings) -> Result<Theme, String> {
    let missing: Vec<&str> = CUSTOM_THEME_SETTING_KEYS
        .iter()
        .copied()
        .filter(|key| settings.get(key).is_none_or(|value| value.trim().is_empty()))
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "Custom theme requires settings for: {}",
            missing.join(", ")
        ));
    }

    let mut colors = [Color::BLACK; 6];
    for (slot, key) in colors.iter_mut().zip(CUSTOM_THEME_SETTING_KEYS) {
        *slot = parse_color_setting(key, &settings.get_or(key, ""))?;
    }
    let [background, text, primary, success, warning, danger] = colors;

    Ok(Theme::Custom(Arc::new(Custom::new(
        CUSTOM_THEME_NAME.to_string(),
        Palette {
            background,
            text,
            primary,
            success,
            warning,
            danger,
        },
    ))))
}

pub fn parse_theme(name: &str) -> Option<Theme> {
    match name.trim().to_ascii_lowercase().as_str() {
        "catppuccinfrappe" => Some(Theme::CatppuccinFrappe),
        "catppuccinlatte" => Some(Theme::CatppuccinLatte),
        "catppuccinmacchiato" => Some(Theme::CatppuccinMacchiato),
        "catppuccinmocha" => Some(Theme::CatppuccinMocha),
        "dark" => Some(Theme::Dark),
        "dracula" => Some(Theme::Dracula),
        "ferra" => Some(Theme::Ferra),
        "gruvboxdark" => Some(Theme::GruvboxDark),
        "gruvboxlight" => Some(Theme::GruvboxLight),
        "kanagawadragon" => Some(Theme::KanagawaDragon),
        "kanagawalotus" => Some(Theme::KanagawaLotus),
        "kanagawawave" => Some(Theme::KanagawaWave),
        "light" => Some(Theme::Light),
        "moonfly" => Some(Theme::Moonfly),
        "nightfly" => Some(Theme::Nightfly),
        "nord" => Some(Theme::Nord),
        "oxocarbon" => Some(Theme::Oxocarbon),
        "tokyonight" => Some(Theme::TokyoNight),
        "tokyonightlight" => Some(Theme::TokyoNightLight),
        "tokyonightstorm" => Some(Theme::TokyoNightStorm),
        "ayumirage" => Some(Theme::Custom(Arc::new(Custom::new(
            "AyuMirage".to_string(),
            Palette {
                background: Color::from_rgb8(0x1F, 0x24, 0x30),
                text: Color::from_rgb8(0xCB, 0xCC, 0xC6),
                primary: Color::from_rgb8(0xFF, 0xCC, 0x66),
                success: Color::from_rgb8(0xBA, 0xE6, 0x7E),
                warning: Color::from_rgb8(0xFF, 0xD1, 0x73),
                danger: Color::from_rgb8(0xF2, 0x87, 0x79),
            },
        )))),
        _ => None,
    }
}

fn parse_color_setting(key: &str, value: &str) -> Result<Color, String> {
    parse_hex_color(value).map_err(|err| format!("Invalid setting '{key}': {err}"))
}

pub fn parse_hex_color(value: &str) -> Result<Color, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("empty color value".to_string());
    }

    let hex = trimmed
        .strip_prefix('#')
        .or_else(|| trimmed.strip_prefix("0x"))
        .unwrap_or(trimmed);
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!(
            "expected hex color in RRGGBB format, got '{value}'"
        ));
    }

    let channel = |range: std::ops::Range<usize>| {
        u8::from_str_radix(&hex[range], 16).map_err(|err| format!("invalid channel: {err}"))
    };
    Ok(Color::from_rgb8(channel(0..2)?, channel(2..4)?, channel(4..6)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings_storage::SettingsStorage;
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    fn build_settings(pairs: &[(&str, &str)], name: &str) -> (Settings, PathBuf) {
        let mut dir = std::env::temp_dir();
        dir.push(format!(
            "halcyon_theme_test_{}_{}",
            name,
            std::process::id()
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        let storage = SettingsStorage::new(dir.join("Settings.xresources"));
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        storage.save(&map).expect("save settings storage");
        (Settings::new(storage), dir)
    }

    #[test]
    fn custom_theme_requires_all_settings() {
        let (settings, dir) = build_settings(&[("halcyon.bar.theme.background", "112233")], "missing");

        let err = custom_theme_from_settings(&settings).unwrap_err();
        assert!(err.contains("halcyon.bar.theme.text"));
        assert!(!err.contains("halcyon.bar.theme.background"));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn custom_theme_accepts_valid_hex_colors() {
        let (settings, dir) = build_settings(
            &[
                ("halcyon.bar.theme.background", "#112233"),
                ("halcyon.bar.theme.text", "445566"),
                ("halcyon.bar.theme.primary", "0x778899"),
                ("halcyon.bar.theme.success", "AABBCC"),
                ("halcyon.bar.theme.warning", "DDEEFF"),
                ("halcyon.bar.theme.danger", "010203"),
            ],
            "valid",
        );

        let theme = custom_theme_from_settings(&settings).expect("valid custom theme");
        assert_eq!(
            theme.palette().background,
            Color::from_rgb8(0x11, 0x22, 0x33)
        );
        assert_eq!(theme.palette().danger, Color::from_rgb8(0x01, 0x02, 0x03));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unknown_theme_falls_back_to_default() {
        let (settings, dir) = build_settings(&[("halcyon.bar.theme", "Solarized")], "fallback");

        assert_eq!(theme_from_settings(&settings), DEFAULT_THEME);

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn theme_names_are_case_insensitive() {
        assert_eq!(parse_theme(" tokyonight "), Some(Theme::TokyoNight));
        assert!(matches!(parse_theme("AYUMIRAGE"), Some(Theme::Custom(_))));
        assert!(parse_theme("nope").is_none());
    }

    #[test]
    fn hex_color_rejects_bad_lengths() {
        assert!(parse_hex_color("#12345").is_err());
        assert!(parse_hex_color("zzzzzz").is_err());
        assert!(parse_hex_color("").is_err());
    }
}
