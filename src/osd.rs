// On-screen display for volume/brightness changes.
// Consumes Settings: halcyon.osd.timeout_ms, halcyon.osd.width, halcyon.osd.height,
// halcyon.osd.margin_bottom.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use iced::widget::{Row, Text, container, progress_bar};
use iced::{Element, Length, Task, Theme, alignment, window};
use iced_layershell::reexport::{
    Anchor, KeyboardInteractivity, Layer, NewLayerShellSettings, OutputOption,
};

use crate::anim::{OVERSHOOT, Tween};
use crate::bar::{BarState, Message, close_window_task};
use crate::dialog::common::{self, BorderSettings};
use crate::panels::gauges::gauge::GaugeModel;
use crate::settings;

const DEFAULT_TIMEOUT_MS: u64 = 3000;
const DEFAULT_WIDTH: u32 = 260;
const DEFAULT_HEIGHT: u32 = 56;
const DEFAULT_MARGIN_BOTTOM: i32 = 80;
const GLYPH_SIZE: u32 = 22;

#[derive(Debug)]
pub struct OsdState {
    pub window: Option<window::Id>,
    glyph: String,
    tween: Tween,
    hide_at: Option<Instant>,
    /// Last serial seen per gauge id.
    seen: HashMap<&'static str, u64>,
}

impl Default for OsdState {
    fn default() -> Self {
        Self {
            window: None,
            glyph: String::new(),
            tween: Tween::settled(0.0, Instant::now()),
            hide_at: None,
            seen: HashMap::new(),
        }
    }
}

impl OsdState {
    fn timeout() -> Duration {
        Duration::from_millis(
            settings::settings().get_parsed_or("halcyon.osd.timeout_ms", DEFAULT_TIMEOUT_MS),
        )
    }

    /// Record a model's OSD request. Returns `true` when it carries a serial not seen
    /// before for its gauge.
    pub fn observe(&mut self, model: &GaugeModel, now: Instant, timeout: Duration) -> bool {
        let Some(osd) = model.osd.as_ref() else {
            return false;
        };
        if self.seen.get(model.id) == Some(&osd.serial) {
            return false;
        }
        self.seen.insert(model.id, osd.serial);

        let level = osd.level.clamp(0.0, 1.0);
        if self.is_visible() {
            self.tween.retarget(level, now);
        } else {
            self.tween = Tween::new(0.0, level, now).with_curve(OVERSHOOT);
        }
        self.glyph = osd.glyph.clone();
        self.hide_at = Some(now + timeout);
        true
    }

    pub fn is_visible(&self) -> bool {
        self.hide_at.is_some()
    }

    pub fn level_at(&self, now: Instant) -> f32 {
        self.tween.value_at(now).clamp(0.0, 1.0)
    }

    /// Drop visibility once the hide deadline passed. Returns `true` if it just expired.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.hide_at {
            Some(deadline) if now >= deadline => {
                self.hide_at = None;
                true
            }
            _ => false,
        }
    }
}

fn layer_settings() -> NewLayerShellSettings {
    let settings = settings::settings();
    let width = settings.get_parsed_or("halcyon.osd.width", DEFAULT_WIDTH);
    let height = settings.get_parsed_or("halcyon.osd.height", DEFAULT_HEIGHT);
    let margin_bottom = settings.get_parsed_or("halcyon.osd.margin_bottom", DEFAULT_MARGIN_BOTTOM);
    NewLayerShellSettings {
        size: Some((width, height)),
        layer: Layer::Overlay,
        anchor: Anchor::Bottom,
        exclusive_zone: Some(-1),
        margin: Some((0, 0, margin_bottom, 0)),
        keyboard_interactivity: KeyboardInteractivity::None,
        output_option: OutputOption::None,
        events_transparent: true,
        namespace: Some(format!("{}-osd", BarState::namespace())),
    }
}

/// Feed a gauge batch to the OSD, opening its surface when a new level arrives.
pub fn apply_models(state: &mut BarState, models: &[GaugeModel], now: Instant) -> Task<Message> {
    if models.iter().all(|model| model.osd.is_none()) {
        return Task::none();
    }
    let timeout = OsdState::timeout();
    let mut shown = false;
    for model in models {
        shown |= state.osd.observe(model, now, timeout);
    }
    if !shown || state.osd.window.is_some() {
        return Task::none();
    }
    let id = window::Id::unique();
    state.osd.window = Some(id);
    Task::done(Message::NewLayerShell {
        settings: layer_settings(),
        id,
    })
}

/// Hide the OSD once its timer ran out.
pub fn tick(state: &mut BarState, now: Instant) -> Task<Message> {
    if !state.osd.expire(now) {
        return Task::none();
    }
    match state.osd.window.take() {
        Some(window) => {
            state.closing_dialogs.insert(window);
            close_window_task(window)
        }
        None => Task::none(),
    }
}

pub fn view(state: &OsdState, now: Instant) -> Element<'_, Message> {
    let level = state.level_at(now);
    let percent = (level * 100.0).round() as u32;

    let content = Row::new()
        .spacing(12)
        .align_y(alignment::Vertical::Center)
        .push(Text::new(state.glyph.as_str()).size(GLYPH_SIZE))
        .push(
            progress_bar(0.0..=1.0, level)
                .girth(Length::Fixed(6.0))
                .length(Length::Fill)
                .style(|theme: &Theme| {
                    let palette = theme.extended_palette();
                    progress_bar::Style {
                        background: palette.background.strong.color.into(),
                        bar: palette.primary.base.color.into(),
                        border: iced::Border::default().rounded(3.0),
                    }
                }),
        )
        .push(Text::new(format!("{percent:>3}%")).size(13));

    let surface = container(content)
        .padding([10, 16])
        .width(Length::Fill)
        .height(Length::Fill)
        .align_y(alignment::Vertical::Center)
        .style(|theme: &Theme| container::Style {
            background: Some(theme.extended_palette().background.base.color.into()),
            text_color: Some(theme.palette().text),
            ..container::Style::default()
        });

    common::stack_with_border(surface, BorderSettings::load(), common::floating_border_sides())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panels::gauges::gauge::{GaugeDisplay, GaugeOsd};

    fn model(serial: u64, level: f32) -> GaugeModel {
        let mut model = GaugeModel::new("audio", None, GaugeDisplay::Empty);
        model.osd = Some(GaugeOsd {
            glyph: "󰕾".into(),
            level,
            serial,
        });
        model
    }

    #[test]
    fn only_new_serials_show_the_osd() {
        let now = Instant::now();
        let timeout = Duration::from_millis(3000);
        let mut osd = OsdState::default();

        assert!(!osd.observe(&GaugeModel::new("audio", None, GaugeDisplay::Empty), now, timeout));
        assert!(osd.observe(&model(1, 0.4), now, timeout));
        assert!(!osd.observe(&model(1, 0.4), now, timeout), "repeat serial is ignored");
        assert!(osd.observe(&model(2, 0.5), now, timeout));
        assert!(osd.is_visible());
    }

    #[test]
    fn new_serial_restarts_the_hide_timer() {
        let start = Instant::now();
        let timeout = Duration::from_millis(3000);
        let mut osd = OsdState::default();
        osd.observe(&model(1, 0.4), start, timeout);

        let later = start + Duration::from_millis(2500);
        osd.observe(&model(2, 0.6), later, timeout);
        assert!(!osd.expire(start + Duration::from_millis(3100)));
        assert!(osd.expire(later + timeout));
        assert!(!osd.is_visible());
    }

    #[test]
    fn level_settles_on_target() {
        let start = Instant::now();
        let mut osd = OsdState::default();
        osd.observe(&model(1, 0.8), start, Duration::from_secs(3));
        let settled = osd.level_at(start + Duration::from_secs(1));
        assert!((settled - 0.8).abs() < 1e-3, "{settled}");
    }
}
