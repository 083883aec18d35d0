// Microphone gauge: mute toggle, scroll gain and input device menu.
// Consumes Settings: halcyon.gauge.mic.step_percent.
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeMenu, GaugeModel,
    GaugeRegistrar, GaugeValue, GaugeValueAttention, MenuSelectAction,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::pulse::{
    self, DeviceKind, DeviceStatus, PulseCommand, PulseEventSource, PulseHandle,
};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_STEP_PERCENT: i8 = 5;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;
pub const MIC_ON_GLYPH: &str = "󰍬";
pub const MIC_OFF_GLYPH: &str = "󰍭";

fn mic_glyph(status: Option<DeviceStatus>) -> &'static str {
    match status {
        Some(status) if !status.muted => MIC_ON_GLYPH,
        _ => MIC_OFF_GLYPH,
    }
}

fn mic_display(status: Option<DeviceStatus>) -> GaugeDisplay {
    match status {
        Some(status) if status.muted => GaugeDisplay::Value {
            value: GaugeValue::Text("off".to_string()),
            attention: GaugeValueAttention::Warning,
        },
        Some(status) => GaugeDisplay::text(format!("{}%", status.percent)),
        None => GaugeDisplay::Error,
    }
}

struct MicGauge {
    step_percent: i8,
    handle: PulseHandle,
    event_source: Option<PulseEventSource>,
    next_deadline: Instant,
}

impl Gauge for MicGauge {
    fn id(&self) -> &'static str {
        "mic"
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
            Arc::new(move |source: String| {
                let _ = command_tx.send(PulseCommand::SetDefault(source));
            })
        };

        let mut model = GaugeModel::new(
            "mic",
            Some(mic_glyph(snapshot.status).to_string()),
            mic_display(snapshot.status),
        );
        model.on_click = Some(on_click);
        model.menu = snapshot.connected.then(|| GaugeMenu {
            title: "Input Devices".to_string(),
            items: snapshot.menu_items,
            on_select: Some(menu_select),
        });
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let mut step_percent =
        settings::settings().get_parsed_or("halcyon.gauge.mic.step_percent", DEFAULT_STEP_PERCENT);
    if step_percent == 0 {
        step_percent = DEFAULT_STEP_PERCENT;
    }
    let (handle, event_source) = pulse::worker(DeviceKind::Source, "mic");

    Box::new(MicGauge {
        step_percent,
        handle,
        event_source: Some(event_source),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.mic.step_percent",
        default: "5",
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "mic",
        description: "Microphone gauge with mute toggle and input selection.",
        default_enabled: false,
        settings,
        create: create_gauge,
        validate: None,
    }
}
