// Battery gauge driven by udev power_supply events and battery snapshots.
// Consumes Settings: halcyon.gauge.battery.warning_percent, halcyon.gauge.battery.danger_percent,
// halcyon.gauge.battery.refresh_interval_secs.
use crate::cmd;
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeEventSource, GaugeModel, GaugeReadyNotify, GaugeRegistrar,
    GaugeValue, GaugeValueAttention,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use battery::State as BatteryState;
use battery::units::power::watt;
use battery::units::ratio::percent;
use battery::units::time::second;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_WARNING_PERCENT: u8 = 30;
const DEFAULT_DANGER_PERCENT: u8 = 15;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;
const UPOWER_BATTERY_PATH: &str = "/org/freedesktop/UPower/devices/battery_BAT0";
const UDEV_POLL: Duration = Duration::from_millis(500);
const HEALTH_REFRESH: Duration = Duration::from_secs(3600);

pub const CHARGING_GLYPH: &str = "󰂄";
pub const NO_BATTERY_GLYPH: &str = "󰂑";
const LEVEL_GLYPHS: [&str; 5] = ["󰁺", "󰁼", "󰁾", "󰂀", "󰁹"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChargeState {
    Charging,
    Discharging,
    Full,
    Unknown,
}

impl ChargeState {
    fn from_battery(state: BatteryState) -> Self {
        match state {
            BatteryState::Charging => ChargeState::Charging,
            BatteryState::Discharging | BatteryState::Empty => ChargeState::Discharging,
            BatteryState::Full => ChargeState::Full,
            _ => ChargeState::Unknown,
        }
    }

    fn title(self) -> &'static str {
        match self {
            ChargeState::Charging => "Charging",
            ChargeState::Discharging => "On Battery",
            ChargeState::Full => "Fully Charged",
            ChargeState::Unknown => "Unknown",
        }
    }
}

/// One reading of the first battery.
#[derive(Debug, Clone, PartialEq)]
struct BatteryReading {
    percent: f32,
    state: ChargeState,
    time_to_full: Option<u64>,
    time_to_empty: Option<u64>,
    rate_watts: Option<f32>,
    /// Health reported by the battery crate, used when upower is unavailable.
    device_health: Option<f32>,
}

fn read_battery() -> Result<Option<BatteryReading>, String> {
    let manager = battery::Manager::new().map_err(|err| err.to_string())?;
    let mut batteries = manager.batteries().map_err(|err| err.to_string())?;
    let Some(battery) = batteries.next() else {
        return Ok(None);
    };
    let battery = battery.map_err(|err| err.to_string())?;

    let seconds = |time: Option<battery::units::Time>| {
        time.map(|t| t.get::<second>())
            .filter(|value| *value > 0.0)
            .map(|value| value.round() as u64)
    };
    let rate = battery.energy_rate().get::<watt>();
    Ok(Some(BatteryReading {
        percent: battery.state_of_charge().get::<percent>(),
        state: ChargeState::from_battery(battery.state()),
        time_to_full: seconds(battery.time_to_full()),
        time_to_empty: seconds(battery.time_to_empty()),
        rate_watts: (rate > 0.0).then_some(rate),
        device_health: Some(battery.state_of_health().get::<percent>()),
    }))
}

/// Health from `upower -i` output: energy-full / energy-full-design.
fn parse_upower_health(output: &str) -> Option<f32> {
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.trim().split_once(':')?;
            if key.trim() != name {
                return None;
            }
            value.split_whitespace().next()?.parse::<f32>().ok()
        })
    };
    let full = field("energy-full")?;
    let design = field("energy-full-design")?;
    (design > 0.0).then(|| full / design * 100.0)
}

fn battery_glyph(percent: f32, state: ChargeState) -> &'static str {
    if state == ChargeState::Charging {
        return CHARGING_GLYPH;
    }
    let index = ((percent.max(0.0) / 20.0) as usize).min(LEVEL_GLYPHS.len() - 1);
    LEVEL_GLYPHS[index]
}

fn attention_for_capacity(
    percent: f32,
    warning_percent: u8,
    danger_percent: u8,
) -> GaugeValueAttention {
    if percent <= danger_percent as f32 {
        GaugeValueAttention::Danger
    } else if percent <= warning_percent as f32 {
        GaugeValueAttention::Warning
    } else {
        GaugeValueAttention::Nominal
    }
}

fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours}h {minutes}m")
}

fn info_lines(reading: &BatteryReading, health: Option<f32>) -> Vec<String> {
    let mut lines = vec![
        reading.state.title().to_string(),
        format!("Level: {:.0}%", reading.percent),
    ];
    match reading.state {
        ChargeState::Charging => lines.push(format!(
            "Time to Full: {}",
            reading
                .time_to_full
                .map(format_duration)
                .unwrap_or_else(|| "Unknown".to_string())
        )),
        ChargeState::Discharging => {
            lines.push(format!(
                "Time Left: {}",
                reading
                    .time_to_empty
                    .map(format_duration)
                    .unwrap_or_else(|| "Unknown".to_string())
            ));
            if let Some(rate) = reading.rate_watts {
                lines.push(format!("Discharge rate: {rate:.1} W"));
            }
        }
        ChargeState::Full | ChargeState::Unknown => {}
    }
    lines.push(match health.or(reading.device_health) {
        Some(health) => format!("Health: {health:.1}%"),
        None => "Health: Unknown".to_string(),
    });
    lines
}

enum BatteryEvent {
    Health(Option<f32>),
}

/// Watches udev power_supply events and refreshes the upower health figure.
struct BatteryEventSource {
    event_tx: mpsc::Sender<BatteryEvent>,
}

impl BatteryEventSource {
    fn send_health(&self) -> bool {
        let health = cmd::output("upower", &["-i", UPOWER_BATTERY_PATH])
            .map_err(|err| log::debug!("battery gauge: upower unavailable: {err}"))
            .ok()
            .and_then(|output| parse_upower_health(&output));
        self.event_tx.send(BatteryEvent::Health(health)).is_ok()
    }
}

impl GaugeEventSource for BatteryEventSource {
    fn run(self: Box<Self>, notify: GaugeReadyNotify) {
        if !self.send_health() {
            return;
        }
        notify("battery");
        let mut health_checked = Instant::now();

        let monitor = match udev::MonitorBuilder::new()
            .and_then(|m| m.match_subsystem("power_supply"))
            .and_then(|m| m.listen())
        {
            Ok(m) => Some(m),
            Err(err) => {
                log::warn!("battery gauge: failed to start udev monitor: {err}");
                None
            }
        };

        loop {
            // Adapters and batteries both report here; any change may flip the charge state.
            let changed = monitor
                .as_ref()
                .map(|monitor| monitor.iter().count() > 0)
                .unwrap_or(false);
            if changed {
                notify("battery");
            }

            if health_checked.elapsed() >= HEALTH_REFRESH {
                if !self.send_health() {
                    return;
                }
                health_checked = Instant::now();
                notify("battery");
            }
            thread::sleep(UDEV_POLL);
        }
    }
}

struct BatteryGauge {
    warning_percent: u8,
    danger_percent: u8,
    refresh_interval: Duration,
    event_rx: mpsc::Receiver<BatteryEvent>,
    event_source: Option<BatteryEventSource>,
    health: Option<f32>,
    next_deadline: Instant,
}

impl Gauge for BatteryGauge {
    fn id(&self) -> &'static str {
        "battery"
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
        self.next_deadline = now + self.refresh_interval;
        while let Ok(BatteryEvent::Health(health)) = self.event_rx.try_recv() {
            self.health = health;
        }

        let reading = match read_battery() {
            Ok(reading) => reading,
            Err(err) => {
                log::warn!("battery gauge: failed to read battery: {err}");
                let mut model = GaugeModel::new(
                    "battery",
                    Some(NO_BATTERY_GLYPH.to_string()),
                    GaugeDisplay::Error,
                );
                model.info = Some(InfoDialog::new("Battery", vec![err]));
                return Some(model);
            }
        };

        let Some(reading) = reading else {
            let mut model = GaugeModel::new(
                "battery",
                Some(NO_BATTERY_GLYPH.to_string()),
                GaugeDisplay::Empty,
            );
            model.info = Some(InfoDialog::new(
                "Battery",
                vec!["No Battery Detected".to_string()],
            ));
            return Some(model);
        };

        let display = GaugeDisplay::Value {
            value: GaugeValue::Graded {
                text: format!("{:.0}%", reading.percent),
                level: (reading.percent / 100.0).clamp(0.0, 1.0),
            },
            attention: attention_for_capacity(
                reading.percent,
                self.warning_percent,
                self.danger_percent,
            ),
        };
        let mut model = GaugeModel::new(
            "battery",
            Some(battery_glyph(reading.percent, reading.state).to_string()),
            display,
        );
        model.info = Some(InfoDialog::new("Battery", info_lines(&reading, self.health)));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let (event_tx, event_rx) = mpsc::channel();
    let refresh_secs = settings.get_parsed_or(
        "halcyon.gauge.battery.refresh_interval_secs",
        DEFAULT_REFRESH_INTERVAL_SECS,
    );
    Box::new(BatteryGauge {
        warning_percent: settings.get_parsed_or(
            "halcyon.gauge.battery.warning_percent",
            DEFAULT_WARNING_PERCENT,
        ),
        danger_percent: settings
            .get_parsed_or("halcyon.gauge.battery.danger_percent", DEFAULT_DANGER_PERCENT),
        refresh_interval: Duration::from_secs(refresh_secs.max(1)),
        event_rx,
        event_source: Some(BatteryEventSource { event_tx }),
        health: None,
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.battery.warning_percent",
            default: "30",
        },
        SettingSpec {
            key: "halcyon.gauge.battery.danger_percent",
            default: "15",
        },
        SettingSpec {
            key: "halcyon.gauge.battery.refresh_interval_secs",
            default: "30",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "battery",
        description: "Battery gauge reporting charge level, charging state and health.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(percent: f32, state: ChargeState) -> BatteryReading {
        BatteryReading {
            percent,
            state,
            time_to_full: Some(5400),
            time_to_empty: Some(7260),
            rate_watts: Some(8.3),
            device_health: Some(91.0),
        }
    }

    #[test]
    fn glyph_bands_by_twenty_percent() {
        assert_eq!(battery_glyph(5.0, ChargeState::Discharging), LEVEL_GLYPHS[0]);
        assert_eq!(battery_glyph(20.0, ChargeState::Discharging), LEVEL_GLYPHS[1]);
        assert_eq!(battery_glyph(79.9, ChargeState::Discharging), LEVEL_GLYPHS[3]);
        assert_eq!(battery_glyph(100.0, ChargeState::Full), LEVEL_GLYPHS[4]);
        assert_eq!(battery_glyph(10.0, ChargeState::Charging), CHARGING_GLYPH);
    }

    #[test]
    fn attention_tracks_thresholds() {
        assert_eq!(
            attention_for_capacity(10.0, DEFAULT_WARNING_PERCENT, DEFAULT_DANGER_PERCENT),
            GaugeValueAttention::Danger
        );
        assert_eq!(
            attention_for_capacity(25.0, DEFAULT_WARNING_PERCENT, DEFAULT_DANGER_PERCENT),
            GaugeValueAttention::Warning
        );
        assert_eq!(
            attention_for_capacity(60.0, DEFAULT_WARNING_PERCENT, DEFAULT_DANGER_PERCENT),
            GaugeValueAttention::Nominal
        );
    }

    #[test]
    fn upower_health_ratio() {
        let output = "  native-path:          BAT0
  battery
    energy:              40.1 Wh
    energy-empty:        0 Wh
    energy-full:         45.6 Wh
    energy-full-design:  57.0 Wh
    energy-rate:         7.9 W";
        let health = parse_upower_health(output).expect("health should parse");
        assert!((health - 80.0).abs() < 0.01);
        assert_eq!(parse_upower_health("energy-full: 10 Wh"), None);
    }

    #[test]
    fn info_lines_follow_state() {
        let charging = info_lines(&reading(42.0, ChargeState::Charging), Some(80.0));
        assert_eq!(
            charging,
            vec!["Charging", "Level: 42%", "Time to Full: 1h 30m", "Health: 80.0%"]
        );

        let discharging = info_lines(&reading(42.0, ChargeState::Discharging), None);
        assert_eq!(discharging[2], "Time Left: 2h 1m");
        assert_eq!(discharging[3], "Discharge rate: 8.3 W");
        assert_eq!(discharging[4], "Health: 91.0%");
    }
}
