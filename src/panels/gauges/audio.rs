// Speaker volume gauge: mute toggle, scroll volume, output menu and volume OSD.
// Consumes Settings: halcyon.gauge.audio.step_percent.
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeMenu, GaugeModel,
    GaugeOsd, GaugeRegistrar, GaugeValue, GaugeValueAttention, MenuSelectAction,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::pulse::{
    self, DeviceEntry, DeviceKind, DeviceStatus, PulseCommand, PulseEventSource, PulseHandle,
};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_STEP_PERCENT: i8 = 5;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;

pub const MUTED_GLYPH: &str = "󰖁";
pub const LOW_GLYPH: &str = "󰖀";
pub const MEDIUM_GLYPH: &str = "󰕾";
pub const HIGH_GLYPH: &str = "󰓃";
pub const HEADPHONES_GLYPH: &str = "󰋋";
pub const BLUETOOTH_GLYPH: &str = "󰂯";

/// Icon for the current output state.
pub fn volume_glyph(status: Option<DeviceStatus>, device: Option<&DeviceEntry>) -> &'static str {
    let Some(status) = status else {
        return MUTED_GLYPH;
    };
    if status.muted || status.percent == 0 {
        return MUTED_GLYPH;
    }
    if let Some(device) = device {
        if device.is_headphones() {
            return HEADPHONES_GLYPH;
        }
        if device.is_bluetooth() {
            return BLUETOOTH_GLYPH;
        }
    }
    if status.percent < 30 {
        LOW_GLYPH
    } else if status.percent < 70 {
        MEDIUM_GLYPH
    } else {
        HIGH_GLYPH
    }
}

fn volume_display(status: Option<DeviceStatus>) -> GaugeDisplay {
    match status {
        Some(status) => GaugeDisplay::Value {
            value: GaugeValue::Text(format!("{}%", status.percent)),
            attention: if status.muted {
                GaugeValueAttention::Warning
            } else {
                GaugeValueAttention::Nominal
            },
        },
        None => GaugeDisplay::Error,
    }
}

/// Tracks level changes and hands out a new OSD serial for each one after the first reading.
#[derive(Debug, Default)]
struct OsdTracker {
    last: Option<DeviceStatus>,
    serial: u64,
    current: Option<GaugeOsd>,
}

impl OsdTracker {
    fn observe(&mut self, status: Option<DeviceStatus>, glyph: &str) -> Option<GaugeOsd> {
        if let Some(status) = status {
            let changed = self
                .last
                .is_some_and(|last| last.percent != status.percent || last.muted != status.muted);
            if changed {
                self.serial = self.serial.wrapping_add(1);
                let level = if status.muted {
                    0.0
                } else {
                    status.percent as f32 / 100.0
                };
                self.current = Some(GaugeOsd {
                    glyph: glyph.to_string(),
                    level,
                    serial: self.serial,
                });
            }
            self.last = Some(status);
        }
        self.current.clone()
    }
}

struct AudioGauge {
    step_percent: i8,
    handle: PulseHandle,
    event_source: Option<PulseEventSource>,
    osd: OsdTracker,
    next_deadline: Instant,
}

impl Gauge for AudioGauge {
    fn id(&self) -> &'static str {
        "audio"
    }

    fn register(&mut self, registrar: &mut dyn GaugeRegistrar) {
        if let Some(event_source) = self.event_source.take() {
            registrar.add_event_source(Box::new(event_source));
        }
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.next_deadline = now + Duration::from_secs(IDLE_RUN_INTERVAL_SECS);
        let snapshot = self.handle.latest()?;

        let glyph = volume_glyph(snapshot.status, snapshot.default_device.as_ref());
        let step_percent = self.step_percent;
        let command_tx = self.handle.command_tx.clone();
        let on_click: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            let command = match click.input {
                GaugeInput::Button(mouse::Button::Left) => PulseCommand::ToggleMute,
                GaugeInput::ScrollUp => PulseCommand::AdjustVolume(step_percent),
                GaugeInput::ScrollDown => PulseCommand::AdjustVolume(-step_percent),
                GaugeInput::Button(_) => return,
            };
            let _ = command_tx.send(command);
        });
        let menu_select: MenuSelectAction = {
            let command_tx = self.handle.command_tx.clone();
            Arc::new(move |sink: String| {
                let _ = command_tx.send(PulseCommand::SetDefault(sink));
            })
        };

        let mut model = GaugeModel::new(
            "audio",
            Some(glyph.to_string()),
            volume_display(snapshot.status),
        );
        model.on_click = Some(on_click);
        model.menu = snapshot.connected.then(|| GaugeMenu {
            title: "Output Devices".to_string(),
            items: snapshot.menu_items.clone(),
            on_select: Some(menu_select),
        });
        model.osd = self.osd.observe(snapshot.status, glyph);
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let mut step_percent = settings::settings()
        .get_parsed_or("halcyon.gauge.audio.step_percent", DEFAULT_STEP_PERCENT);
    if step_percent == 0 {
        step_percent = DEFAULT_STEP_PERCENT;
    }
    let (handle, event_source) = pulse::worker(DeviceKind::Sink, "audio");

    Box::new(AudioGauge {
        step_percent,
        handle,
        event_source: Some(event_source),
        osd: OsdTracker::default(),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.audio.step_percent",
        default: "5",
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "audio",
        description: "Speaker volume gauge with mute, scroll volume and output selection.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(percent: u8, muted: bool) -> Option<DeviceStatus> {
        Some(DeviceStatus {
            percent,
            muted,
            channels: 2,
        })
    }

    fn device(name: &str, port: Option<&str>) -> DeviceEntry {
        DeviceEntry {
            name: name.to_string(),
            description: None,
            port_name: port.map(str::to_string),
            port_description: None,
        }
    }

    #[test]
    fn muted_or_silent_uses_muted_glyph() {
        assert_eq!(volume_glyph(status(50, true), None), MUTED_GLYPH);
        assert_eq!(volume_glyph(status(0, false), None), MUTED_GLYPH);
        assert_eq!(volume_glyph(None, None), MUTED_GLYPH);
    }

    #[test]
    fn device_type_wins_over_level() {
        let headphones = device("alsa_output.pci", Some("analog-output-headphones"));
        let bluetooth = device("bluez_output.00_11", None);
        assert_eq!(volume_glyph(status(80, false), Some(&headphones)), HEADPHONES_GLYPH);
        assert_eq!(volume_glyph(status(10, false), Some(&bluetooth)), BLUETOOTH_GLYPH);
    }

    #[test]
    fn level_bands() {
        let speakers = device("alsa_output.pci", Some("analog-output-speaker"));
        assert_eq!(volume_glyph(status(29, false), Some(&speakers)), LOW_GLYPH);
        assert_eq!(volume_glyph(status(30, false), Some(&speakers)), MEDIUM_GLYPH);
        assert_eq!(volume_glyph(status(69, false), Some(&speakers)), MEDIUM_GLYPH);
        assert_eq!(volume_glyph(status(70, false), Some(&speakers)), HIGH_GLYPH);
    }

    #[test]
    fn osd_serial_only_advances_on_change() {
        let mut tracker = OsdTracker::default();
        assert!(tracker.observe(status(40, false), MEDIUM_GLYPH).is_none());
        assert!(tracker.observe(status(40, false), MEDIUM_GLYPH).is_none());

        let osd = tracker
            .observe(status(45, false), MEDIUM_GLYPH)
            .expect("volume change should raise the OSD");
        assert_eq!(osd.serial, 1);
        assert!((osd.level - 0.45).abs() < 1e-6);

        let same = tracker.observe(status(45, false), MEDIUM_GLYPH);
        assert_eq!(same.map(|osd| osd.serial), Some(1));

        let muted = tracker
            .observe(status(45, true), MUTED_GLYPH)
            .expect("mute should raise the OSD");
        assert_eq!(muted.serial, 2);
        assert_eq!(muted.level, 0.0);
    }

    #[test]
    fn missing_status_is_an_error_display() {
        assert!(matches!(volume_display(None), GaugeDisplay::Error));
    }
}
