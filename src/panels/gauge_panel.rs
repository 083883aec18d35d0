// Renders one gauge model as a bar item.
// Consumes Settings: halcyon.gauge.ui.*.
use crate::bar::{BarState, Message};
use crate::dialog::common::lerp_color;
use crate::icon::ERROR_GLYPH;
use crate::panels::gauges::gauge::{
    GaugeDisplay, GaugeInput, GaugeModel, GaugeValue, GaugeValueAttention,
};
use crate::settings;
use iced::alignment;
use iced::widget::{Row, Stack, container, mouse_area, progress_bar, text};
use iced::{Border, Color, Element, Length, Theme, mouse};
use iced_anim::animation_builder::AnimationBuilder;
use iced_anim::transition::Easing;

const METER_GIRTH: f32 = 4.0;

fn nominal_color(theme: &Theme) -> Color {
    theme.extended_palette().secondary.strong.color
}

fn attention_level(attention: GaugeValueAttention) -> f32 {
    match attention {
        GaugeValueAttention::Nominal => 0.0,
        GaugeValueAttention::Warning => 1.0,
        GaugeValueAttention::Danger => 2.0,
    }
}

/// Nominal → warning over `0..=1`, warning → danger over `1..=2`.
fn attention_color_at_level(level: f32, theme: &Theme) -> Color {
    let normal = nominal_color(theme);
    let warning = theme.extended_palette().warning.base.color;
    let danger = theme.extended_palette().danger.base.color;
    if level <= 1.0 {
        lerp_color(normal, warning, level.clamp(0.0, 1.0))
    } else {
        lerp_color(warning, danger, (level - 1.0).clamp(0.0, 1.0))
    }
}

/// Danger at 0, warning at 0.5, success at 1.
fn graded_color(level: f32, theme: &Theme) -> Color {
    let palette = theme.extended_palette();
    let level = level.clamp(0.0, 1.0);
    if level < 0.5 {
        lerp_color(
            palette.danger.base.color,
            palette.warning.base.color,
            level * 2.0,
        )
    } else {
        lerp_color(
            palette.warning.base.color,
            palette.success.base.color,
            (level - 0.5) * 2.0,
        )
    }
}

fn scroll_input(delta: mouse::ScrollDelta) -> Option<GaugeInput> {
    match delta {
        mouse::ScrollDelta::Lines { x: _, y } | mouse::ScrollDelta::Pixels { x: _, y } => {
            if y > 0.0 {
                Some(GaugeInput::ScrollUp)
            } else if y < 0.0 {
                Some(GaugeInput::ScrollDown)
            } else {
                None
            }
        }
    }
}

fn animated_text(value: String, attention: GaugeValueAttention, size: u32) -> Element<'static, Message> {
    AnimationBuilder::new(attention_level(attention), move |level| {
        text::Text::new(value.clone())
            .size(size)
            .style(move |theme: &Theme| text::Style {
                color: Some(attention_color_at_level(level, theme)),
            })
            .into()
    })
    .animation(Easing::EASE_IN_OUT.very_quick())
    .into()
}

fn meter(fraction: f32, attention: GaugeValueAttention, width: f32) -> Element<'static, Message> {
    progress_bar(0.0..=1.0, fraction.clamp(0.0, 1.0))
        .length(Length::Fixed(width))
        .girth(Length::Fixed(METER_GIRTH))
        .style(move |theme: &Theme| {
            let palette = theme.extended_palette();
            progress_bar::Style {
                background: palette.background.strong.color.into(),
                bar: attention_color_at_level(attention_level(attention), theme).into(),
                border: Border::default().rounded(METER_GIRTH / 2.0),
            }
        })
        .into()
}

fn value_view(display: &GaugeDisplay, value_size: u32, meter_width: f32) -> Option<Element<'static, Message>> {
    match display {
        GaugeDisplay::Empty => None,
        GaugeDisplay::Error => Some(
            text::Text::new(ERROR_GLYPH)
                .size(value_size)
                .style(|theme: &Theme| text::Style {
                    color: Some(theme.extended_palette().danger.base.color),
                })
                .into(),
        ),
        GaugeDisplay::Value {
            value: GaugeValue::Text(value),
            attention,
        } => Some(animated_text(value.clone(), *attention, value_size)),
        GaugeDisplay::Value {
            value: GaugeValue::Meter { text, fraction },
            attention,
        } => Some(
            Row::new()
                .spacing(4)
                .align_y(alignment::Vertical::Center)
                .push(animated_text(text.clone(), *attention, value_size))
                .push(meter(*fraction, *attention, meter_width))
                .into(),
        ),
        GaugeDisplay::Value {
            value: GaugeValue::Graded { text, level },
            ..
        } => {
            let level = *level;
            Some(
                text::Text::new(text.clone())
                    .size(value_size)
                    .style(move |theme: &Theme| text::Style {
                        color: Some(graded_color(level, theme)),
                    })
                    .into(),
            )
        }
    }
}

/// A gauge with its icon highlighted while one of its dialogs is open.
pub fn gauge_view<'a>(state: &'a BarState, gauge: &'a GaugeModel) -> Element<'a, Message> {
    let settings = settings::settings();
    let padding_x = settings.get_parsed_or("halcyon.gauge.ui.padding_x", 4u16);
    let icon_size = settings.get_parsed_or("halcyon.gauge.ui.icon_size", 16u32);
    let value_size = settings.get_parsed_or("halcyon.gauge.ui.value_size", 13u32);
    let icon_value_spacing = settings.get_parsed_or("halcyon.gauge.ui.icon_value_spacing", 4u32);
    let meter_width = settings.get_parsed_or("halcyon.gauge.ui.meter_width", 36.0f32);

    let dialog_open = state
        .dialog_windows
        .values()
        .any(|window| window.gauge_id == gauge.id);

    let mut row = Row::new()
        .spacing(icon_value_spacing)
        .align_y(alignment::Vertical::Center);

    if let Some(icon) = &gauge.icon {
        let icon = icon.clone();
        let icon_box: Element<'_, Message> =
            AnimationBuilder::new(if dialog_open { 1.0 } else { 0.0 }, move |t| {
                container(text::Text::new(icon.clone()).size(icon_size).style(
                    move |theme: &Theme| text::Style {
                        color: Some(lerp_color(
                            nominal_color(theme),
                            theme.palette().background,
                            t,
                        )),
                    },
                ))
                .padding([0, 2])
                .style(move |theme: &Theme| {
                    let target = theme.palette().primary;
                    let transparent = Color { a: 0.0, ..target };
                    container::Style {
                        background: Some(lerp_color(transparent, target, t).into()),
                        border: Border::default().rounded(4.0),
                        ..container::Style::default()
                    }
                })
                .into()
            })
            .animation(Easing::EASE_IN_OUT.very_quick())
            .into();
        row = row.push(icon_box);
    }
    if let Some(value) = value_view(&gauge.display, value_size, meter_width) {
        row = row.push(value);
    }

    let gauge_id = gauge.id.to_string();
    mouse_area(
        container(Stack::new().push(row))
            .padding([0, padding_x])
            .height(Length::Fill)
            .align_y(alignment::Vertical::Center),
    )
    .on_press(Message::GaugeClicked {
        id: gauge_id.clone(),
        input: GaugeInput::Button(mouse::Button::Left),
    })
    .on_right_press(Message::GaugeClicked {
        id: gauge_id.clone(),
        input: GaugeInput::Button(mouse::Button::Right),
    })
    .on_middle_press(Message::GaugeClicked {
        id: gauge_id.clone(),
        input: GaugeInput::Button(mouse::Button::Middle),
    })
    .on_scroll(move |delta| Message::GaugeClicked {
        id: gauge_id.clone(),
        input: scroll_input(delta).unwrap_or(GaugeInput::ScrollUp),
    })
    .interaction(mouse::Interaction::Pointer)
    .into()
}

/// Horizontal anchor for a dialog opened from the gauge under the cursor.
pub fn anchor_x(state: &BarState) -> Option<i32> {
    state.last_cursor.map(|p| p.x.round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_color_close(a: Color, b: Color, eps: f32) {
        assert!((a.r - b.r).abs() <= eps, "r {} != {}", a.r, b.r);
        assert!((a.g - b.g).abs() <= eps, "g {} != {}", a.g, b.g);
        assert!((a.b - b.b).abs() <= eps, "b {} != {}", a.b, b.b);
        assert!((a.a - b.a).abs() <= eps, "a {} != {}", a.a, b.a);
    }

    #[test]
    fn attention_colors_follow_segments() {
        let theme = Theme::Nord;
        let palette = theme.extended_palette();
        assert_color_close(
            attention_color_at_level(0.0, &theme),
            palette.secondary.strong.color,
            1e-5,
        );
        assert_color_close(
            attention_color_at_level(1.0, &theme),
            palette.warning.base.color,
            1e-5,
        );
        assert_color_close(
            attention_color_at_level(2.0, &theme),
            palette.danger.base.color,
            1e-5,
        );
    }

    #[test]
    fn graded_ramp_runs_danger_to_success() {
        let theme = Theme::Nord;
        let palette = theme.extended_palette();
        assert_color_close(graded_color(0.0, &theme), palette.danger.base.color, 1e-5);
        assert_color_close(graded_color(0.5, &theme), palette.warning.base.color, 1e-5);
        assert_color_close(graded_color(1.0, &theme), palette.success.base.color, 1e-5);
        assert_color_close(graded_color(7.0, &theme), palette.success.base.color, 1e-5);
    }

    #[test]
    fn scroll_direction_maps_to_input() {
        assert_eq!(
            scroll_input(mouse::ScrollDelta::Lines { x: 0.0, y: 1.0 }),
            Some(GaugeInput::ScrollUp)
        );
        assert_eq!(
            scroll_input(mouse::ScrollDelta::Pixels { x: 0.0, y: -3.0 }),
            Some(GaugeInput::ScrollDown)
        );
        assert_eq!(scroll_input(mouse::ScrollDelta::Lines { x: 2.0, y: 0.0 }), None);
    }
}
