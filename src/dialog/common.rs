// Shared chrome for popups and overlay surfaces: titles, surfaces and the layered border.
// Consumes Settings: halcyon.dialog.title_align, halcyon.bar.border.*.
use iced::alignment;
use iced::font::Weight;
use iced::widget::{Column, Row, Stack, Text, button, container, rule, text};
use iced::{Color, Element, Font, Length, Theme};

use crate::settings;

/// Default alignment when the dialog title alignment setting is missing/invalid.
const DEFAULT_TITLE_ALIGN: &str = "center";

/// Resolve the horizontal alignment for dialog titles from settings.
///
/// Falls back to the default and logs when the setting value is invalid.
pub fn title_alignment() -> alignment::Horizontal {
    let raw = settings::settings().get_or("halcyon.dialog.title_align", DEFAULT_TITLE_ALIGN);
    parse_title_alignment(&raw).unwrap_or_else(|| {
        log::warn!(
            "Invalid setting 'halcyon.dialog.title_align': '{raw}'. Expected left|center|right."
        );
        alignment::Horizontal::Center
    })
}

fn parse_title_alignment(raw: &str) -> Option<alignment::Horizontal> {
    match raw.trim().to_lowercase().as_str() {
        "left" => Some(alignment::Horizontal::Left),
        "center" => Some(alignment::Horizontal::Center),
        "right" => Some(alignment::Horizontal::Right),
        _ => None,
    }
}

pub(crate) fn lerp_color(from: Color, to: Color, t: f32) -> Color {
    let t = t.clamp(0.0, 1.0);
    Color {
        r: from.r + (to.r - from.r) * t,
        g: from.g + (to.g - from.g) * t,
        b: from.b + (to.b - from.b) * t,
        a: from.a + (to.a - from.a) * t,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BorderSettings {
    pub blend: bool,
    pub line_width: f32,
    pub band: f32,
    pub mix: [f32; 3],
    pub alpha: [f32; 3],
}

impl BorderSettings {
    pub fn load() -> Self {
        let settings = settings::settings();
        Self {
            blend: settings.get_bool_or("halcyon.bar.border.blend", true),
            line_width: settings.get_parsed_or("halcyon.bar.border.line_width", 1.0),
            band: settings.get_parsed_or("halcyon.bar.border.row_height", 3.0),
            mix: [
                settings.get_parsed_or("halcyon.bar.border.mix_1", 0.2),
                settings.get_parsed_or("halcyon.bar.border.mix_2", 0.6),
                settings.get_parsed_or("halcyon.bar.border.mix_3", 1.0),
            ],
            alpha: [
                settings.get_parsed_or("halcyon.bar.border.alpha_1", 0.6),
                settings.get_parsed_or("halcyon.bar.border.alpha_2", 0.7),
                settings.get_parsed_or("halcyon.bar.border.alpha_3", 0.9),
            ],
        }
    }

    /// Mix/alpha pairs ordered from the surface edge inward.
    fn layers(&self, outer_first: bool) -> [(f32, f32); 3] {
        let mut layers = [
            (self.mix[0], self.alpha[0]),
            (self.mix[1], self.alpha[1]),
            (self.mix[2], self.alpha[2]),
        ];
        if outer_first {
            layers.reverse();
        }
        layers
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderSides {
    pub top: bool,
    pub bottom: bool,
    pub left: bool,
    pub right: bool,
}

/// Popups hang below the bar, so their top edge stays open.
pub fn popup_border_sides() -> BorderSides {
    BorderSides {
        top: false,
        bottom: true,
        left: true,
        right: true,
    }
}

/// Full frame for free-floating layer surfaces (OSD, notification popups).
pub fn floating_border_sides() -> BorderSides {
    BorderSides {
        top: true,
        bottom: true,
        left: true,
        right: true,
    }
}

pub fn border_style(theme: &Theme, blend: bool, mix: f32, alpha: f32) -> rule::Style {
    let background = theme.palette().background;
    let blended = if blend && mix != 0.0 {
        lerp_color(background, Color::BLACK, mix)
    } else {
        background
    };
    rule::Style {
        color: Color {
            a: alpha,
            ..blended
        },
        radius: 0.0.into(),
        fill_mode: rule::FillMode::Full,
        snap: true,
    }
}

fn vertical_band<'a, Message: 'a>(settings: BorderSettings, outer_first: bool) -> Row<'a, Message> {
    settings
        .layers(outer_first)
        .into_iter()
        .fold(Row::new().spacing(0), |row, (mix, alpha)| {
            row.push(
                rule::vertical(settings.line_width)
                    .style(move |theme| border_style(theme, settings.blend, mix, alpha)),
            )
        })
        .width(Length::Fixed(settings.band))
        .height(Length::Fill)
}

pub fn horizontal_band<'a, Message: 'a>(
    settings: BorderSettings,
    outer_first: bool,
) -> Column<'a, Message> {
    settings
        .layers(outer_first)
        .into_iter()
        .fold(Column::new().spacing(0), |column, (mix, alpha)| {
            column.push(
                rule::horizontal(settings.line_width)
                    .style(move |theme| border_style(theme, settings.blend, mix, alpha)),
            )
        })
        .width(Length::Fill)
        .height(Length::Fixed(settings.band))
}

pub fn stack_with_border<'a, Message: 'a>(
    content: impl Into<Element<'a, Message>>,
    settings: BorderSettings,
    sides: BorderSides,
) -> Element<'a, Message> {
    let edge = |band: Element<'a, Message>,
                x: alignment::Horizontal,
                y: alignment::Vertical|
     -> Element<'a, Message> {
        container(band)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(x)
            .align_y(y)
            .into()
    };

    let mut stack = Stack::new()
        .width(Length::Fill)
        .height(Length::Fill)
        .push(content);
    if sides.top {
        stack = stack.push(edge(
            horizontal_band(settings, true).into(),
            alignment::Horizontal::Left,
            alignment::Vertical::Top,
        ));
    }
    if sides.bottom {
        stack = stack.push(edge(
            horizontal_band(settings, false).into(),
            alignment::Horizontal::Left,
            alignment::Vertical::Bottom,
        ));
    }
    if sides.left {
        stack = stack.push(edge(
            vertical_band(settings, true).into(),
            alignment::Horizontal::Left,
            alignment::Vertical::Top,
        ));
    }
    if sides.right {
        stack = stack.push(edge(
            vertical_band(settings, false).into(),
            alignment::Horizontal::Right,
            alignment::Vertical::Top,
        ));
    }
    stack.into()
}

pub fn dialog_title<'a, Message: 'a>(title: &'a str, font_size: u32) -> Element<'a, Message> {
    container(
        Text::new(title)
            .size(font_size)
            .width(Length::Fill)
            .align_x(title_alignment())
            .style(|theme: &Theme| text::Style {
                color: Some(theme.extended_palette().background.base.color),
            })
            .font(Font {
                weight: Weight::Bold,
                ..Font::DEFAULT
            }),
    )
    .padding([0, 6])
    .width(Length::Fill)
    .style(|theme: &Theme| container::Style {
        background: Some(theme.extended_palette().primary.base.color.into()),
        ..container::Style::default()
    })
    .into()
}

/// Flat button that only shows a background while hovered or pressed.
pub fn hover_button_style(theme: &Theme, status: button::Status) -> button::Style {
    let highlight = theme.extended_palette().primary.weak.color;
    let background = match status {
        button::Status::Hovered | button::Status::Pressed => Some(highlight.into()),
        button::Status::Active | button::Status::Disabled => None,
    };
    button::Style {
        background,
        text_color: theme.palette().text,
        ..button::Style::default()
    }
}

pub fn dialog_surface<'a, Message: 'a>(
    content: impl Into<Element<'a, Message>>,
    padding_y: u16,
    padding_x: u16,
) -> Element<'a, Message> {
    container(content)
        .padding([padding_y, padding_x])
        .width(Length::Fill)
        .height(Length::Fill)
        .style(|theme: &Theme| container::Style {
            background: Some(theme.extended_palette().background.base.color.into()),
            ..container::Style::default()
        })
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popup_border_leaves_bar_edge_open() {
        let sides = popup_border_sides();
        assert!(!sides.top);
        assert!(sides.bottom && sides.left && sides.right);
    }

    #[test]
    fn border_layers_reverse_for_outer_edges() {
        let settings = BorderSettings {
            blend: true,
            line_width: 1.0,
            band: 3.0,
            mix: [0.1, 0.2, 0.3],
            alpha: [0.4, 0.5, 0.6],
        };
        assert_eq!(settings.layers(false)[0], (0.1, 0.4));
        assert_eq!(settings.layers(true)[0], (0.3, 0.6));
    }

    #[test]
    fn lerp_color_clamps_factor() {
        let mid = lerp_color(Color::BLACK, Color::WHITE, 0.5);
        assert!((mid.r - 0.5).abs() < f32::EPSILON);
        assert_eq!(lerp_color(Color::BLACK, Color::WHITE, 3.0), Color::WHITE);
    }

    #[test]
    fn title_alignment_parses_known_values() {
        assert_eq!(
            parse_title_alignment(" Left "),
            Some(alignment::Horizontal::Left)
        );
        assert_eq!(parse_title_alignment("middle"), None);
    }
}
