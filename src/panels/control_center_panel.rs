// Bar button toggling the control center surface.
use crate::bar::{BarState, Message, Panel};
use crate::dialog::common::lerp_color;
use crate::panels::panel_registry::PanelSpec;
use crate::settings::NO_SETTINGS;
use iced::widget::{Text, button, container};
use iced::{Border, Color, Length, Theme, alignment};

const GLYPH: &str = "󰒓";

pub fn view<'a>(state: &'a BarState) -> Panel<'a> {
    let open = state.control_center.is_open();
    let toggle = button(Text::new(GLYPH).size(16))
        .padding([0, 6])
        .on_press(Message::ControlCenterToggled)
        .style(move |theme: &Theme, status| {
            let palette = theme.extended_palette();
            let hovered = matches!(status, button::Status::Hovered | button::Status::Pressed);
            let transparent = Color {
                a: 0.0,
                ..palette.primary.base.color
            };
            let background = match (open, hovered) {
                (true, _) => palette.primary.base.color,
                (false, true) => lerp_color(transparent, palette.primary.weak.color, 0.6),
                (false, false) => transparent,
            };
            button::Style {
                background: Some(background.into()),
                text_color: if open {
                    palette.primary.base.text
                } else {
                    theme.palette().text
                },
                border: Border::default().rounded(4.0),
                ..button::Style::default()
            }
        });

    Panel::new(
        container(toggle)
            .height(Length::Fill)
            .align_y(alignment::Vertical::Center),
    )
}

fn panel_settings() -> &'static [crate::settings::SettingSpec] {
    NO_SETTINGS
}

inventory::submit! {
    PanelSpec {
        id: "control_center",
        description: "Button opening the control center.",
        settings: panel_settings,
        view,
        subscription: None,
        validate: None,
    }
}
