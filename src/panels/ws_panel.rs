// Workspace buttons with focus, urgency and occupancy states.
// Consumes Settings: halcyon.panel.workspaces.*.
use std::time::{Duration, Instant};

use crate::bar::{BarState, Message, Panel};
use crate::compositor::Workspace;
use crate::dialog::common::lerp_color;
use crate::panels::panel_registry::PanelSpec;
use crate::settings::{SettingSpec, Settings};
use iced::border;
use iced::font::Weight;
use iced::gradient::Linear;
use iced::widget::text;
use iced::widget::{Row, Text, button, container};
use iced::{Border, Color, Degrees, Element, Font, Gradient, Length, Theme, alignment};
use iced_anim::animation_builder::AnimationBuilder;
use iced_anim::transition::Easing;

/// How long the previously focused workspace stays tinted after a switch.
pub const PREVIOUS_TINT: Duration = Duration::from_millis(800);
const EMPTY_TEXT_ALPHA: f32 = 0.45;

fn workspace_gradient(start: Color, end: Color) -> Gradient {
    Gradient::Linear(
        Linear::new(Degrees(180.0))
            .add_stop(0.0, start)
            .add_stop(1.0, end),
    )
}

fn workspace_gradient_colors(
    focus: f32,
    urgent: f32,
    is_previous: bool,
    palette: &iced::theme::palette::Extended,
) -> (Color, Color) {
    let (mut start, mut end) = if focus <= 0.0 && urgent <= 0.0 {
        if is_previous {
            (palette.primary.weak.color, palette.primary.strong.color)
        } else {
            (
                palette.background.weak.color,
                palette.background.strong.color,
            )
        }
    } else {
        (
            workspace_color(
                focus,
                urgent,
                palette.background.weak.color,
                palette.primary.weak.color,
                palette.danger.weak.color,
            ),
            workspace_color(
                focus,
                urgent,
                palette.background.strong.color,
                palette.primary.strong.color,
                palette.danger.strong.color,
            ),
        )
    };

    if is_previous {
        let fade = 0.6;
        start = lerp_color(start, palette.background.strong.color, fade);
        end = lerp_color(end, palette.background.strong.color, fade);
    }

    (start, end)
}

fn workspace_color(
    focus_level: f32,
    urgent_level: f32,
    normal: Color,
    focused: Color,
    urgent: Color,
) -> Color {
    let focus_blend = lerp_color(normal, focused, focus_level);
    // Urgent overlays focused.
    lerp_color(focus_blend, urgent, urgent_level)
}

fn workspace_levels(ws: &Workspace) -> (f32, f32) {
    (
        if ws.focused { 1.0 } else { 0.0 },
        if ws.urgent { 1.0 } else { 0.0 },
    )
}

/// Persistent buttons `1..=count`, with live workspaces filled in, followed by any live
/// workspace numbered past `count`. Special workspaces (id < 1) are not shown.
pub fn displayed_workspaces(count: i32, live: &[Workspace]) -> Vec<Workspace> {
    let mut shown: Vec<Workspace> = (1..=count.max(0))
        .map(|id| {
            live.iter()
                .find(|ws| ws.id == id)
                .cloned()
                .unwrap_or_else(|| Workspace {
                    id,
                    name: id.to_string(),
                    focused: false,
                    occupied: false,
                    urgent: false,
                })
        })
        .collect();
    let mut extra: Vec<Workspace> = live
        .iter()
        .filter(|ws| ws.id > count.max(0))
        .cloned()
        .collect();
    extra.sort_by_key(|ws| ws.id);
    shown.extend(extra);
    shown
}

/// Track focus moves and start the previous-workspace tint.
pub fn update_workspace_focus(state: &mut BarState, workspaces: &[Workspace], now: Instant) {
    // Drop the previous reference if it no longer exists.
    if state
        .previous_workspace
        .is_some_and(|prev| !workspaces.iter().any(|ws| ws.id == prev))
    {
        state.previous_workspace = None;
        state.previous_tint_until = None;
    }

    let focused_workspace = workspaces.iter().find(|ws| ws.focused).map(|ws| ws.id);

    match focused_workspace {
        Some(focused) if Some(focused) != state.current_workspace => {
            if let Some(current) = state.current_workspace.take()
                && workspaces.iter().any(|ws| ws.id == current)
            {
                state.previous_workspace = Some(current);
                state.previous_tint_until = Some(now + PREVIOUS_TINT);
            }
            state.current_workspace = Some(focused);
        }
        Some(_) => {}
        None => state.current_workspace = None,
    }
}

/// Clear the tint once it ran out. Returns `true` when it just expired.
pub fn expire_previous_tint(state: &mut BarState, now: Instant) -> bool {
    match state.previous_tint_until {
        Some(deadline) if now >= deadline => {
            state.previous_tint_until = None;
            state.previous_workspace = None;
            true
        }
        _ => false,
    }
}

pub fn view<'a>(state: &'a BarState) -> Panel<'a> {
    let settings = crate::settings::settings();
    let count = settings.get_parsed_or("halcyon.panel.workspaces.count", 10i32);
    let spacing = settings.get_parsed_or("halcyon.panel.workspaces.spacing", 4u32);
    let label_size = settings.get_parsed_or("halcyon.panel.workspaces.label_size", 13u32);
    let corner_radius = settings.get_parsed_or("halcyon.panel.workspaces.corner_radius", 6.0_f32);
    let button_width = settings.get_parsed_or("halcyon.panel.workspaces.button_width", 24.0_f32);
    let transitions = settings.get_bool_or("halcyon.panel.workspaces.transitions", true);

    let previous = state
        .previous_tint_until
        .and(state.previous_workspace);

    let workspaces = displayed_workspaces(count, &state.compositor.workspaces)
        .into_iter()
        .fold(
            Row::new()
                .spacing(spacing)
                .height(Length::Fill)
                .align_y(alignment::Vertical::Center),
            |row, ws| {
                let (focus_level, urgent_level) = workspace_levels(&ws);
                let is_previous = !ws.focused && previous == Some(ws.id);
                let occupied = ws.occupied || ws.focused;
                let id = ws.id;
                let label_text = ws.name.clone();

                let build_workspace = move |focus: f32, urgent: f32| -> Element<'_, Message> {
                    let mut label = Text::new(label_text.clone())
                        .size(label_size)
                        .width(Length::Fill)
                        .align_x(text::Alignment::Center);
                    if focus > 0.0 {
                        label = label.font(Font {
                            weight: Weight::Bold,
                            ..Font::DEFAULT
                        });
                    }

                    let content = container(label)
                        .padding([2, 4])
                        .width(Length::Fixed(button_width))
                        .align_y(alignment::Vertical::Center)
                        .style(move |theme: &Theme| {
                            let palette = theme.extended_palette();
                            let (gradient_start, gradient_end) =
                                workspace_gradient_colors(focus, urgent, is_previous, palette);
                            let mut text_color = if is_previous {
                                palette.background.base.color
                            } else {
                                lerp_color(
                                    theme.palette().text,
                                    palette.background.base.color,
                                    focus.max(urgent),
                                )
                            };
                            if !occupied && urgent <= 0.0 {
                                text_color.a *= EMPTY_TEXT_ALPHA;
                            }
                            container::Style {
                                background: Some(
                                    workspace_gradient(gradient_start, gradient_end).into(),
                                ),
                                border: Border::default()
                                    .rounded(border::Radius::new(corner_radius)),
                                text_color: Some(text_color),
                                ..container::Style::default()
                            }
                        });

                    button(content)
                        .style(|theme: &Theme, _status| button::Style {
                            background: None,
                            text_color: theme.palette().text,
                            ..button::Style::default()
                        })
                        .padding(0)
                        .on_press(Message::WorkspaceClicked(id))
                        .into()
                };

                let workspace: Element<'_, Message> = if transitions {
                    AnimationBuilder::new((focus_level, urgent_level), move |(focus, urgent)| {
                        build_workspace(focus, urgent)
                    })
                    .animation(Easing::EASE_IN_OUT.very_quick())
                    .into()
                } else {
                    build_workspace(focus_level, urgent_level)
                };

                row.push(workspace)
            },
        );

    Panel::new(workspaces)
}

fn panel_settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.panel.workspaces.count",
            default: "10",
        },
        SettingSpec {
            key: "halcyon.panel.workspaces.spacing",
            default: "4",
        },
        SettingSpec {
            key: "halcyon.panel.workspaces.label_size",
            default: "13",
        },
        SettingSpec {
            key: "halcyon.panel.workspaces.corner_radius",
            default: "6.0",
        },
        SettingSpec {
            key: "halcyon.panel.workspaces.button_width",
            default: "24.0",
        },
        SettingSpec {
            key: "halcyon.panel.workspaces.transitions",
            default: "true",
        },
    ];
    SETTINGS
}

fn validate(settings: &Settings) -> Result<(), String> {
    let raw = settings.get_or("halcyon.panel.workspaces.count", "10");
    match raw.trim().parse::<i32>() {
        Ok(count) if (1..=100).contains(&count) => Ok(()),
        _ => Err(format!(
            "halcyon.panel.workspaces.count must be between 1 and 100, got '{raw}'"
        )),
    }
}

inventory::submit! {
    PanelSpec {
        id: "workspaces",
        description: "Numbered workspace buttons with focus, urgency and occupancy.",
        settings: panel_settings,
        view,
        subscription: Some(crate::compositor::subscription),
        validate: Some(validate),
    }
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

    fn workspace(id: i32, focused: bool) -> Workspace {
        Workspace {
            id,
            name: id.to_string(),
            focused,
            occupied: true,
            urgent: false,
        }
    }

    #[test]
    fn persistent_buttons_fill_gaps_and_keep_extras() {
        let live = vec![workspace(2, true), workspace(12, false), workspace(-98, false)];
        let shown = displayed_workspaces(4, &live);
        let ids: Vec<i32> = shown.iter().map(|ws| ws.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 12]);
        assert!(!shown[0].occupied, "missing workspace renders empty");
        assert!(shown[1].focused && shown[1].occupied);
    }

    #[test]
    fn tracks_previous_workspace_when_focus_changes() {
        let mut state = BarState::default();
        let now = Instant::now();

        update_workspace_focus(&mut state, &[workspace(1, true)], now);
        assert_eq!(state.current_workspace, Some(1), "initial focus is recorded");
        assert!(state.previous_workspace.is_none(), "no previous on first focus");

        update_workspace_focus(&mut state, &[workspace(1, false), workspace(2, true)], now);
        assert_eq!(state.previous_workspace, Some(1));
        assert_eq!(state.current_workspace, Some(2));
        assert_eq!(state.previous_tint_until, Some(now + PREVIOUS_TINT));
    }

    #[test]
    fn previous_clears_when_workspace_disappears_or_tint_expires() {
        let mut state = BarState::default();
        let now = Instant::now();

        update_workspace_focus(&mut state, &[workspace(1, true), workspace(2, false)], now);
        update_workspace_focus(&mut state, &[workspace(1, false), workspace(2, true)], now);
        assert_eq!(state.previous_workspace, Some(1));

        update_workspace_focus(&mut state, &[workspace(2, true)], now);
        assert!(state.previous_workspace.is_none(), "gone workspace is not tinted");

        update_workspace_focus(&mut state, &[workspace(2, false), workspace(3, true)], now);
        assert_eq!(state.previous_workspace, Some(2));
        assert!(!expire_previous_tint(&mut state, now + PREVIOUS_TINT / 2));
        assert!(expire_previous_tint(&mut state, now + PREVIOUS_TINT));
        assert!(state.previous_workspace.is_none());
        assert!(state.previous_tint_until.is_none());
    }

    #[test]
    fn workspace_gradient_colors_handle_previous_fade() {
        let theme = Theme::Nord;
        let palette = theme.extended_palette();

        let (start_inactive, end_inactive) = workspace_gradient_colors(0.0, 0.0, false, palette);
        assert_color_close(start_inactive, palette.background.weak.color, 1e-5);
        assert_color_close(end_inactive, palette.background.strong.color, 1e-5);

        let fade = 0.6;
        let (prev_start, prev_end) = workspace_gradient_colors(0.0, 0.0, true, palette);
        assert_color_close(
            prev_start,
            lerp_color(palette.primary.weak.color, palette.background.strong.color, fade),
            1e-5,
        );
        assert_color_close(
            prev_end,
            lerp_color(palette.primary.strong.color, palette.background.strong.color, fade),
            1e-5,
        );

        let (urgent_start, _) = workspace_gradient_colors(1.0, 1.0, false, palette);
        assert_color_close(urgent_start, palette.danger.weak.color, 1e-5);
    }
}
