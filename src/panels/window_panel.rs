// Active window label resolved from the window class.
// Consumes Settings: halcyon.panel.window.max_chars, halcyon.panel.window.rules.
use std::sync::OnceLock;

use crate::bar::{BarState, Message, Panel};
use crate::compositor::ActiveWindow;
use crate::icon::truncate_chars;
use crate::panels::panel_registry::PanelSpec;
use crate::settings::{SettingSpec, Settings};
use iced::widget::{Text, container, tooltip};
use iced::{Length, Theme, alignment};
use log::warn;
use regex::Regex;

const FALLBACK_GLYPH: &str = "󰣆";
const DESKTOP_LABEL: &str = "󰇄 Desktop";
const DEFAULT_MAX_CHARS: usize = 10;

const BUILTIN_RULES: &[(&str, &str, &str)] = &[
    ("^(firefox|librewolf|zen)", "󰈹", "Firefox"),
    ("chrom(e|ium)", "", "Chromium"),
    ("^brave", "󰖟", "Brave"),
    ("^(kitty|alacritty|foot|wezterm|ghostty)", "", "Terminal"),
    ("^code|vscodium", "󰨞", "VS Code"),
    ("^(nvim|neovide)$", "", "Neovim"),
    ("^(org\\.gnome\\.nautilus|thunar|nemo|pcmanfm)", "󰉋", "Files"),
    ("^discord|vesktop|webcord", "", "Discord"),
    ("^(telegram|org\\.telegram)", "", "Telegram"),
    ("^spotify", "", "Spotify"),
    ("^(mpv|vlc)$", "", "Media"),
    ("^steam", "", "Steam"),
    ("^obsidian", "󰎚", "Obsidian"),
    ("^(gimp|krita|inkscape)", "", "Graphics"),
    ("^(libreoffice|soffice)", "󰈙", "Office"),
    ("^(org\\.pulseaudio\\.pavucontrol|pavucontrol)", "󰕾", "Volume"),
    ("^thunderbird", "", "Mail"),
];

/// A class pattern with the label it renders as.
#[derive(Debug, Clone)]
pub struct WindowRule {
    pattern: Regex,
    glyph: String,
    name: String,
}

impl WindowRule {
    fn new(pattern: &str, glyph: &str, name: &str) -> Result<Self, String> {
        let pattern =
            Regex::new(pattern).map_err(|err| format!("invalid pattern '{pattern}': {err}"))?;
        Ok(Self {
            pattern,
            glyph: glyph.to_string(),
            name: name.to_string(),
        })
    }

    fn label(&self) -> String {
        if self.name.is_empty() {
            return self.glyph.clone();
        }
        format!("{} {}", self.glyph, self.name)
    }
}

fn builtin_rules() -> &'static [WindowRule] {
    static RULES: OnceLock<Vec<WindowRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        BUILTIN_RULES
            .iter()
            .filter_map(|(pattern, glyph, name)| match WindowRule::new(pattern, glyph, name) {
                Ok(rule) => Some(rule),
                Err(err) => {
                    warn!("Built-in window rule skipped: {err}");
                    None
                }
            })
            .collect()
    })
}

/// Parse `regex=glyph name` entries separated by `;`.
pub fn parse_rules(raw: &str) -> Result<Vec<WindowRule>, String> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (pattern, label) = entry
                .rsplit_once('=')
                .ok_or_else(|| format!("expected 'regex=glyph name', got '{entry}'"))?;
            let label = label.trim();
            let (glyph, name) = label
                .split_once(char::is_whitespace)
                .map(|(glyph, name)| (glyph, name.trim()))
                .unwrap_or((label, ""));
            if glyph.is_empty() {
                return Err(format!("missing glyph in '{entry}'"));
            }
            WindowRule::new(pattern.trim(), glyph, name)
        })
        .collect()
}

fn user_rules() -> &'static [WindowRule] {
    static RULES: OnceLock<Vec<WindowRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let raw = crate::settings::settings().get_or("halcyon.panel.window.rules", "");
        parse_rules(&raw).unwrap_or_else(|err| {
            warn!("Ignoring halcyon.panel.window.rules: {err}");
            Vec::new()
        })
    })
}

/// Label for the focused window. User rules are consulted before the built-in table.
pub fn window_label(
    window: Option<&ActiveWindow>,
    user: &[WindowRule],
    builtin: &[WindowRule],
    max_chars: usize,
) -> String {
    let Some(window) = window.filter(|window| !window.class.trim().is_empty()) else {
        return DESKTOP_LABEL.to_string();
    };
    let class = window.class.to_lowercase();
    user.iter()
        .chain(builtin)
        .find(|rule| rule.pattern.is_match(&class))
        .map(WindowRule::label)
        .unwrap_or_else(|| format!("{FALLBACK_GLYPH} {}", truncate_chars(&class, max_chars)))
}

pub fn view<'a>(state: &'a BarState) -> Panel<'a> {
    let max_chars = crate::settings::settings()
        .get_parsed_or("halcyon.panel.window.max_chars", DEFAULT_MAX_CHARS);
    let active = state.compositor.active_window.as_ref();
    let label = window_label(active, user_rules(), builtin_rules(), max_chars);

    let content = container(Text::new(label).size(13))
        .height(Length::Fill)
        .align_y(alignment::Vertical::Center);

    let Some(title) = active
        .map(|window| window.title.trim())
        .filter(|title| !title.is_empty())
    else {
        return Panel::new(content);
    };

    Panel::new(
        tooltip(
            content,
            container(Text::new(truncate_chars(title, max_chars * 6)).size(12))
                .padding([4, 8])
                .style(|theme: &Theme| container::Style {
                    background: Some(theme.extended_palette().background.weak.color.into()),
                    text_color: Some(theme.palette().text),
                    ..container::Style::default()
                }),
            tooltip::Position::Bottom,
        ),
    )
}

fn panel_settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.panel.window.max_chars",
            default: "10",
        },
        SettingSpec {
            key: "halcyon.panel.window.rules",
            default: "",
        },
    ];
    SETTINGS
}

fn validate(settings: &Settings) -> Result<(), String> {
    parse_rules(&settings.get_or("halcyon.panel.window.rules", ""))
        .map(|_| ())
        .map_err(|err| format!("halcyon.panel.window.rules: {err}"))
}

inventory::submit! {
    PanelSpec {
        id: "window",
        description: "Focused window class as a glyph and short name.",
        settings: panel_settings,
        view,
        subscription: Some(crate::compositor::subscription),
        validate: Some(validate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(class: &str) -> ActiveWindow {
        ActiveWindow {
            class: class.to_string(),
            title: "some title".to_string(),
        }
    }

    #[test]
    fn builtin_table_compiles_completely() {
        assert_eq!(builtin_rules().len(), BUILTIN_RULES.len());
    }

    #[test]
    fn known_class_uses_glyph_and_name() {
        let label = window_label(Some(&window("Firefox")), &[], builtin_rules(), 10);
        assert_eq!(label, "󰈹 Firefox");
    }

    #[test]
    fn unknown_class_falls_back_to_truncated_lowercase() {
        let label = window_label(
            Some(&window("Com.Example.VeryLongApplication")),
            &[],
            builtin_rules(),
            10,
        );
        assert_eq!(label, "󰣆 com.examp…");
    }

    #[test]
    fn empty_desktop_has_its_own_label() {
        assert_eq!(window_label(None, &[], builtin_rules(), 10), DESKTOP_LABEL);
        assert_eq!(
            window_label(Some(&window("  ")), &[], builtin_rules(), 10),
            DESKTOP_LABEL
        );
    }

    #[test]
    fn user_rules_win_over_builtin() {
        let user = parse_rules("^firefox= Browser; ^foo$=X").expect("valid rules");
        assert_eq!(user.len(), 2);
        assert_eq!(
            window_label(Some(&window("firefox")), &user, builtin_rules(), 10),
            " Browser"
        );
        assert_eq!(window_label(Some(&window("foo")), &user, &[], 10), "X");
    }

    #[test]
    fn malformed_rules_are_rejected() {
        assert!(parse_rules("no-separator").is_err());
        assert!(parse_rules("(unclosed=x y").is_err());
        assert!(parse_rules("^a= ").is_err());
        assert!(parse_rules("").expect("empty is fine").is_empty());
    }
}
