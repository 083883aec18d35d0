// Right-edge control center: quick toggles, scripts, brightness and notification history.
// Consumes Settings: halcyon.control_center.width, halcyon.control_center.gamemode_command,
// halcyon.control_center.wallpaper_command, halcyon.control_center.vendor_command.
use std::collections::HashMap;
use std::thread;
use std::time::{Duration, Instant};

use iced::futures::channel::oneshot;
use iced::widget::{Column, Row, Space, Text, button, container, scrollable, slider};
use iced::{Border, Element, Length, Task, Theme, alignment, window};
use iced_layershell::reexport::{
    Anchor, KeyboardInteractivity, Layer, NewLayerShellSettings, OutputOption,
};
use log::{debug, error, info, warn};

use crate::bar::{BarState, Message, close_window_task};
use crate::cmd;
use crate::dialog::common::{self, BorderSettings};
use crate::notifications;
use crate::panels::gauges::brightness::Backlight;
use crate::panels::gauges::power_profile::{self, PowerProfile};
use crate::panels::gauges::{bluetooth, network, pulse};
use crate::settings;

const DEFAULT_WIDTH: u32 = 380;
const SCRIPT_COOLDOWN: Duration = Duration::from_secs(1);
const TILE_HEIGHT: f32 = 56.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Toggle {
    Wifi,
    Bluetooth,
    Microphone,
    DoNotDisturb,
}

/// User scripts launched from the control center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    GameMode,
    Wallpaper,
    Vendor,
}

impl Script {
    const ALL: [Script; 3] = [Script::GameMode, Script::Wallpaper, Script::Vendor];

    fn setting_key(self) -> &'static str {
        match self {
            Script::GameMode => "halcyon.control_center.gamemode_command",
            Script::Wallpaper => "halcyon.control_center.wallpaper_command",
            Script::Vendor => "halcyon.control_center.vendor_command",
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            Script::GameMode => "󰊴",
            Script::Wallpaper => "󰸉",
            Script::Vendor => "󰢮",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Script::GameMode => "Game mode",
            Script::Wallpaper => "Wallpaper",
            Script::Vendor => "Vendor",
        }
    }
}

/// System state shown in the control center. `None` means unknown or unavailable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlCenterStatus {
    pub wifi: Option<bool>,
    pub bluetooth: Option<bool>,
    pub mic_muted: Option<bool>,
    pub power_profile: Option<PowerProfile>,
    pub brightness: Option<u8>,
}

#[derive(Debug, Clone)]
pub enum ControlCenterMessage {
    Status(ControlCenterStatus),
    Toggle(Toggle),
    RunScript(Script),
    CyclePowerProfile,
    BrightnessChanged(u8),
    BrightnessReleased,
}

/// Rate limit for script buttons, per script.
#[derive(Debug, Default)]
pub struct ScriptCooldown {
    last_run: HashMap<Script, Instant>,
}

impl ScriptCooldown {
    /// Records the run and returns `true` when `script` may run at `now`.
    pub fn try_start(&mut self, script: Script, now: Instant) -> bool {
        let cooling = self
            .last_run
            .get(&script)
            .is_some_and(|last| now.saturating_duration_since(*last) < SCRIPT_COOLDOWN);
        if cooling {
            return false;
        }
        self.last_run.insert(script, now);
        true
    }
}

#[derive(Debug, Default)]
pub struct ControlCenterState {
    pub window: Option<window::Id>,
    pub status: ControlCenterStatus,
    /// Slider value while the user drags it; applied on release.
    brightness_drag: Option<u8>,
    cooldown: ScriptCooldown,
}

impl ControlCenterState {
    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    fn brightness(&self) -> Option<u8> {
        self.brightness_drag.or(self.status.brightness)
    }
}

/// Run blocking `job` on a worker thread and resolve with its result.
async fn on_worker<T, F>(job: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        let _ = tx.send(job());
    });
    rx.await.ok()
}

/// Run `job` off the UI thread, then publish a fresh status snapshot.
fn then_refresh<F>(job: F) -> Task<Message>
where
    F: FnOnce() + Send + 'static,
{
    Task::perform(
        on_worker(move || {
            job();
            fetch_status()
        }),
        |status| Message::ControlCenter(ControlCenterMessage::Status(status.unwrap_or_default())),
    )
}

/// Query every backend. Blocking; never call on the UI thread.
pub fn fetch_status() -> ControlCenterStatus {
    let wifi = network::wifi_radio_enabled()
        .map_err(|err| debug!("control center: wifi state: {err}"))
        .ok();
    let bluetooth = bluetooth::bluetooth_powered()
        .map_err(|err| debug!("control center: bluetooth state: {err}"))
        .ok();
    let power_profile = power_profile::active_profile()
        .map_err(|err| debug!("control center: power profile: {err}"))
        .ok();
    let brightness = Backlight::discover().and_then(|backlight| {
        backlight
            .percent()
            .map_err(|err| debug!("control center: brightness: {err}"))
            .ok()
    });
    ControlCenterStatus {
        wifi,
        bluetooth,
        mic_muted: pulse::default_source_muted(),
        power_profile,
        brightness,
    }
}

fn layer_settings() -> NewLayerShellSettings {
    let width = settings::settings().get_parsed_or("halcyon.control_center.width", DEFAULT_WIDTH);
    NewLayerShellSettings {
        size: Some((width, 0)),
        layer: Layer::Top,
        anchor: Anchor::Right | Anchor::Top | Anchor::Bottom,
        exclusive_zone: Some(0),
        margin: Some((0, 0, 0, 0)),
        keyboard_interactivity: KeyboardInteractivity::OnDemand,
        output_option: OutputOption::None,
        events_transparent: false,
        namespace: Some(format!("{}-control-center", BarState::namespace())),
    }
}

/// Open the control center, or close it when already open.
pub fn toggle_window(state: &mut BarState) -> Task<Message> {
    if state.control_center.is_open() {
        return close(state);
    }
    let id = window::Id::unique();
    state.control_center.window = Some(id);
    state.last_dialog_opened_at = Some(Instant::now());
    info!("Opening control center");
    Task::batch([
        state.close_dialogs(),
        Task::done(Message::NewLayerShell {
            settings: layer_settings(),
            id,
        }),
        then_refresh(|| {}),
    ])
}

pub fn close(state: &mut BarState) -> Task<Message> {
    let Some(window) = state.control_center.window.take() else {
        return Task::none();
    };
    state.control_center.brightness_drag = None;
    state.closing_dialogs.insert(window);
    close_window_task(window)
}

pub fn update(state: &mut BarState, message: ControlCenterMessage) -> Task<Message> {
    match message {
        ControlCenterMessage::Status(status) => {
            state.control_center.status = status;
            Task::none()
        }
        ControlCenterMessage::Toggle(Toggle::Wifi) => {
            let target = !state.control_center.status.wifi.unwrap_or(false);
            state.control_center.status.wifi = Some(target);
            then_refresh(move || {
                if let Err(err) = network::set_wifi_radio(target) {
                    error!("Failed to switch wifi radio: {err}");
                }
            })
        }
        ControlCenterMessage::Toggle(Toggle::Bluetooth) => {
            let target = !state.control_center.status.bluetooth.unwrap_or(false);
            state.control_center.status.bluetooth = Some(target);
            then_refresh(move || {
                if let Err(err) = bluetooth::set_bluetooth_power(target) {
                    error!("Failed to switch bluetooth power: {err}");
                }
            })
        }
        ControlCenterMessage::Toggle(Toggle::Microphone) => then_refresh(|| {
            if pulse::toggle_default_source_mute().is_none() {
                warn!("Failed to toggle microphone mute");
            }
        }),
        ControlCenterMessage::Toggle(Toggle::DoNotDisturb) => {
            let dnd = !state.notifications.store.dnd();
            info!("Do not disturb {}", if dnd { "on" } else { "off" });
            state.notifications.set_dnd(dnd);
            notifications::sync_popup_window(state)
        }
        ControlCenterMessage::RunScript(script) => {
            if !state
                .control_center
                .cooldown
                .try_start(script, Instant::now())
            {
                debug!("{script:?} script ignored during cooldown");
                return Task::none();
            }
            let command = settings::settings().get_or(script.setting_key(), "");
            if command.trim().is_empty() {
                warn!("No command configured for {}", script.setting_key());
                return Task::none();
            }
            if let Err(err) = cmd::spawn_detached(&command) {
                error!("Failed to run {script:?} script: {err}");
            }
            Task::none()
        }
        ControlCenterMessage::CyclePowerProfile => {
            let current = state.control_center.status.power_profile;
            if let Some(profile) = current {
                state.control_center.status.power_profile = Some(profile.next());
            }
            then_refresh(move || {
                let result = match current {
                    Some(profile) => Ok(profile),
                    None => power_profile::active_profile(),
                }
                .and_then(|profile| power_profile::set_profile(profile.next()));
                if let Err(err) = result {
                    error!("Failed to change power profile: {err}");
                }
            })
        }
        ControlCenterMessage::BrightnessChanged(percent) => {
            state.control_center.brightness_drag = Some(percent);
            Task::none()
        }
        ControlCenterMessage::BrightnessReleased => {
            let Some(percent) = state.control_center.brightness_drag.take() else {
                return Task::none();
            };
            state.control_center.status.brightness = Some(percent);
            then_refresh(move || {
                let result = Backlight::discover()
                    .ok_or_else(|| "no backlight device".to_string())
                    .and_then(|backlight| backlight.set_percent(percent));
                if let Err(err) = result {
                    error!("Failed to set brightness: {err}");
                }
            })
        }
    }
}

fn toggle_glyph(toggle: Toggle, on: bool) -> &'static str {
    match (toggle, on) {
        (Toggle::Wifi, true) => "󰤨",
        (Toggle::Wifi, false) => "󰤭",
        (Toggle::Bluetooth, true) => "󰂯",
        (Toggle::Bluetooth, false) => "󰂲",
        (Toggle::Microphone, true) => "󰍬",
        (Toggle::Microphone, false) => "󰍭",
        (Toggle::DoNotDisturb, true) => "󰂛",
        (Toggle::DoNotDisturb, false) => "󰂚",
    }
}

fn toggle_label(toggle: Toggle) -> &'static str {
    match toggle {
        Toggle::Wifi => "Wi-Fi",
        Toggle::Bluetooth => "Bluetooth",
        Toggle::Microphone => "Microphone",
        Toggle::DoNotDisturb => "Do not disturb",
    }
}

/// Whether a toggle reads as "on". The microphone is on when it is not muted.
fn toggle_active(state: &BarState, toggle: Toggle) -> Option<bool> {
    let status = &state.control_center.status;
    match toggle {
        Toggle::Wifi => status.wifi,
        Toggle::Bluetooth => status.bluetooth,
        Toggle::Microphone => status.mic_muted.map(|muted| !muted),
        Toggle::DoNotDisturb => Some(state.notifications.store.dnd()),
    }
}

fn tile<'a>(
    glyph: &'a str,
    label: &'a str,
    active: bool,
    message: Message,
) -> Element<'a, Message> {
    let content = Column::new()
        .spacing(2)
        .align_x(alignment::Horizontal::Center)
        .push(Text::new(glyph).size(20))
        .push(Text::new(label).size(11));
    button(
        container(content)
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center),
    )
    .width(Length::Fill)
    .height(Length::Fixed(TILE_HEIGHT))
    .style(move |theme: &Theme, status| {
        let palette = theme.extended_palette();
        let hovered = matches!(status, button::Status::Hovered | button::Status::Pressed);
        let (background, text_color) = if active {
            (palette.primary.base.color, palette.primary.base.text)
        } else if hovered {
            (palette.background.strong.color, palette.background.strong.text)
        } else {
            (palette.background.weak.color, palette.background.weak.text)
        };
        button::Style {
            background: Some(background.into()),
            text_color,
            border: Border::default().rounded(8.0),
            ..button::Style::default()
        }
    })
    .on_press(message)
    .into()
}

fn toggles_row(state: &BarState) -> Element<'_, Message> {
    [
        Toggle::Wifi,
        Toggle::Bluetooth,
        Toggle::Microphone,
        Toggle::DoNotDisturb,
    ]
    .into_iter()
    .fold(Row::new().spacing(8), |row, toggle| {
        let active = toggle_active(state, toggle);
        row.push(tile(
            toggle_glyph(toggle, active.unwrap_or(false)),
            toggle_label(toggle),
            active.unwrap_or(false),
            Message::ControlCenter(ControlCenterMessage::Toggle(toggle)),
        ))
    })
    .into()
}

fn scripts_row(state: &BarState) -> Element<'_, Message> {
    let profile = state.control_center.status.power_profile;
    let profile_tile = tile(
        profile.map(PowerProfile::glyph).unwrap_or("󰈐"),
        profile.map(PowerProfile::label).unwrap_or("Power profile"),
        profile == Some(PowerProfile::Performance),
        Message::ControlCenter(ControlCenterMessage::CyclePowerProfile),
    );
    Script::ALL
        .into_iter()
        .fold(Row::new().spacing(8).push(profile_tile), |row, script| {
            row.push(tile(
                script.glyph(),
                script.label(),
                false,
                Message::ControlCenter(ControlCenterMessage::RunScript(script)),
            ))
        })
        .into()
}

fn brightness_row(state: &BarState) -> Element<'_, Message> {
    let Some(percent) = state.control_center.brightness() else {
        return Space::new().height(Length::Fixed(0.0)).into();
    };
    Row::new()
        .spacing(10)
        .align_y(alignment::Vertical::Center)
        .push(Text::new("󰃠").size(18))
        .push(
            slider(0..=100u8, percent, |value| {
                Message::ControlCenter(ControlCenterMessage::BrightnessChanged(value))
            })
            .on_release(Message::ControlCenter(ControlCenterMessage::BrightnessReleased))
            .width(Length::Fill),
        )
        .push(Text::new(format!("{percent:>3}%")).size(12))
        .into()
}

fn notifications_section(state: &BarState) -> Element<'_, Message> {
    let store = &state.notifications.store;
    let header = Row::new()
        .align_y(alignment::Vertical::Center)
        .push(Text::new("Notifications").size(14).width(Length::Fill))
        .push(
            button(Text::new("Clear all").size(12))
                .padding([2, 8])
                .style(common::hover_button_style)
                .on_press_maybe((!store.is_empty()).then_some(Message::NotificationsCleared)),
        );

    let list: Element<'_, Message> = if store.is_empty() {
        container(Text::new("No notifications").size(12))
            .width(Length::Fill)
            .padding(16)
            .align_x(alignment::Horizontal::Center)
            .into()
    } else {
        scrollable(
            store
                .items()
                .iter()
                .fold(Column::new().spacing(8), |column, notification| {
                    column.push(notifications::notification_card(notification))
                }),
        )
        .height(Length::Fill)
        .into()
    };

    Column::new().spacing(8).push(header).push(list).into()
}

pub fn view(state: &BarState) -> Element<'_, Message> {
    let settings = settings::settings();
    let header_font_size = settings.get_parsed_or("halcyon.dialog.header.font_size", 14u32);
    let padding_y = settings.get_parsed_or("halcyon.dialog.container.padding_y", 10u16);
    let padding_x = settings.get_parsed_or("halcyon.dialog.container.padding_x", 10u16);

    let content = Column::new()
        .spacing(14)
        .width(Length::Fill)
        .height(Length::Fill)
        .push(common::dialog_title("Control Center", header_font_size))
        .push(toggles_row(state))
        .push(scripts_row(state))
        .push(brightness_row(state))
        .push(notifications_section(state));

    common::stack_with_border(
        common::dialog_surface(content, padding_y, padding_x),
        BorderSettings::load(),
        common::popup_border_sides(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_are_rate_limited_per_script() {
        let start = Instant::now();
        let mut cooldown = ScriptCooldown::default();
        assert!(cooldown.try_start(Script::GameMode, start));
        assert!(!cooldown.try_start(Script::GameMode, start + Duration::from_millis(400)));
        assert!(cooldown.try_start(Script::Wallpaper, start + Duration::from_millis(400)));
        assert!(cooldown.try_start(Script::GameMode, start + Duration::from_millis(1000)));
    }

    #[test]
    fn microphone_reads_on_when_unmuted() {
        let mut state = BarState::default();
        assert_eq!(toggle_active(&state, Toggle::Microphone), None);
        state.control_center.status.mic_muted = Some(true);
        assert_eq!(toggle_active(&state, Toggle::Microphone), Some(false));
        assert_eq!(toggle_glyph(Toggle::Microphone, false), "󰍭");
        assert_eq!(toggle_active(&state, Toggle::DoNotDisturb), Some(false));
    }

    #[test]
    fn dnd_toggle_flips_store_without_backends() {
        let mut state = BarState::default();
        let _ = update(
            &mut state,
            ControlCenterMessage::Toggle(Toggle::DoNotDisturb),
        );
        assert!(state.notifications.store.dnd());
    }

    #[test]
    fn drag_value_wins_until_release() {
        let mut state = BarState::default();
        state.control_center.status.brightness = Some(40);
        let _ = update(&mut state, ControlCenterMessage::BrightnessChanged(70));
        assert_eq!(state.control_center.brightness(), Some(70));
        let _ = update(
            &mut state,
            ControlCenterMessage::Status(ControlCenterStatus {
                brightness: Some(41),
                ..ControlCenterStatus::default()
            }),
        );
        assert_eq!(state.control_center.brightness(), Some(70));
    }
}
