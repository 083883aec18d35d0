// StatusNotifierItem icons; clicks are forwarded to the owning application.
use crate::bar::{BarState, Message, Panel};
use crate::panels::gauges::gauge::GaugeInput;
use crate::panels::panel_registry::PanelSpec;
use crate::settings::{self, SettingSpec, Settings};
use crate::tray::{self, TrayItem, host::DEFAULT_ICON_SIZE};
use iced::widget::{Row, container, image, mouse_area, text, tooltip};
use iced::{Border, Element, Length, Theme, alignment, mouse};

fn scroll_input(delta: mouse::ScrollDelta) -> GaugeInput {
    let (mouse::ScrollDelta::Lines { y, .. } | mouse::ScrollDelta::Pixels { y, .. }) = delta;
    if y > 0.0 {
        GaugeInput::ScrollUp
    } else {
        GaugeInput::ScrollDown
    }
}

fn item_view(item: &TrayItem, icon_size: u32) -> Element<'_, Message> {
    let size = icon_size as f32;
    let icon: Element<'_, Message> = match &item.icon {
        Some(handle) => image(handle.clone())
            .width(Length::Fixed(size))
            .height(Length::Fixed(size))
            .into(),
        None => text(item.glyph()).size(size * 0.8).into(),
    };
    let id = item.id.clone();
    let clickable = mouse_area(
        container(icon)
            .width(Length::Fixed(size))
            .align_x(alignment::Horizontal::Center),
    )
    .on_press(Message::TrayClicked {
        id: id.clone(),
        input: GaugeInput::Button(mouse::Button::Left),
    })
    .on_right_press(Message::TrayClicked {
        id: id.clone(),
        input: GaugeInput::Button(mouse::Button::Right),
    })
    .on_middle_press(Message::TrayClicked {
        id: id.clone(),
        input: GaugeInput::Button(mouse::Button::Middle),
    })
    .on_scroll(move |delta| Message::TrayClicked {
        id: id.clone(),
        input: scroll_input(delta),
    })
    .interaction(mouse::Interaction::Pointer);

    tooltip(
        clickable,
        container(text(item.label().to_string()).size(12))
            .padding([2, 6])
            .style(|theme: &Theme| container::Style {
                background: Some(theme.extended_palette().background.strong.color.into()),
                text_color: Some(theme.palette().text),
                border: Border::default().rounded(4.0),
                ..container::Style::default()
            }),
        tooltip::Position::Bottom,
    )
    .into()
}

pub fn view<'a>(state: &'a BarState) -> Panel<'a> {
    let settings = settings::settings();
    let icon_size = settings.get_parsed_or("halcyon.panel.tray.icon_size", DEFAULT_ICON_SIZE);
    let spacing = settings.get_parsed_or("halcyon.panel.tray.spacing", 6u32);
    let show_passive = settings.get_bool_or("halcyon.panel.tray.show_passive", false);

    let row = state
        .tray
        .visible_items(show_passive)
        .fold(
            Row::new()
                .spacing(spacing)
                .align_y(alignment::Vertical::Center),
            |row, item| row.push(item_view(item, icon_size)),
        );
    Panel::new(row)
}

fn panel_settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.panel.tray.icon_size",
            default: "16",
        },
        SettingSpec {
            key: "halcyon.panel.tray.spacing",
            default: "6",
        },
        SettingSpec {
            key: "halcyon.panel.tray.show_passive",
            default: "false",
        },
    ];
    SETTINGS
}

fn validate(settings: &Settings) -> Result<(), String> {
    let raw = settings.get_or("halcyon.panel.tray.icon_size", "16");
    match raw.trim().parse::<u32>() {
        Ok(size) if (8..=128).contains(&size) => Ok(()),
        _ => Err(format!(
            "halcyon.panel.tray.icon_size must be between 8 and 128, got '{raw}'"
        )),
    }
}

inventory::submit! {
    PanelSpec {
        id: "tray",
        description: "System tray of StatusNotifierItem applications.",
        settings: panel_settings,
        view,
        subscription: Some(tray::subscription),
        validate: Some(validate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wheel_direction_maps_to_scroll_input() {
        assert_eq!(
            scroll_input(mouse::ScrollDelta::Lines { x: 0.0, y: 2.0 }),
            GaugeInput::ScrollUp
        );
        assert_eq!(
            scroll_input(mouse::ScrollDelta::Pixels { x: 0.0, y: -4.0 }),
            GaugeInput::ScrollDown
        );
    }

    #[test]
    fn tray_is_a_registered_panel_with_settings() {
        let spec = crate::panels::panel_registry::find("tray").expect("tray panel");
        assert!(spec.subscription.is_some());
        let keys: Vec<&str> = (spec.settings)().iter().map(|setting| setting.key).collect();
        assert!(keys.contains(&"halcyon.panel.tray.icon_size"));
    }
}
