// Bluetooth gauge backed by `bluetoothctl`: adapter power, paired devices and their batteries.
// Consumes Settings: halcyon.gauge.bluetooth.poll_interval_secs.
use crate::cmd;
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeMenu, GaugeMenuItem,
    GaugeModel, GaugeRegistrar, MenuSelectAction,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::poll_source::{PollHandle, PollSource, poller};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;

pub const OFF_GLYPH: &str = "󰂲";
pub const ON_GLYPH: &str = "󰂯";
pub const CONNECTED_GLYPH: &str = "󰂱";

#[derive(Debug, Clone, PartialEq, Eq)]
struct BtDevice {
    mac: String,
    name: String,
    connected: bool,
    battery: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct BtSnapshot {
    available: bool,
    powered: bool,
    devices: Vec<BtDevice>,
}

impl BtSnapshot {
    fn connected(&self) -> impl Iterator<Item = &BtDevice> {
        self.devices.iter().filter(|device| device.connected)
    }
}

/// `(available, powered)` from `bluetoothctl show`.
fn parse_show(output: &str) -> (bool, bool) {
    let available = output
        .lines()
        .any(|line| line.trim_start().starts_with("Controller "));
    let powered = yes_field(output, "Powered");
    (available, powered)
}

fn yes_field(output: &str, name: &str) -> bool {
    output.lines().any(|line| {
        line.trim()
            .split_once(':')
            .is_some_and(|(key, value)| key.trim() == name && value.trim() == "yes")
    })
}

/// `(mac, name)` pairs from `bluetoothctl devices Paired`.
fn parse_device_lines(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("Device ")?;
            let (mac, name) = rest.split_once(' ').unwrap_or((rest, rest));
            Some((mac.to_string(), name.trim().to_string()))
        })
        .collect()
}

/// `(connected, battery)` from `bluetoothctl info <mac>`. Battery lines look like
/// `Battery Percentage: 0x4b (75)`.
fn parse_info(output: &str) -> (bool, Option<u8>) {
    let battery = output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("Battery Percentage:")?;
        let decimal = value.split_once('(')?.1.trim_end_matches(')');
        decimal.trim().parse().ok()
    });
    (yes_field(output, "Connected"), battery)
}

fn sample_bluetooth() -> BtSnapshot {
    let Ok(show) = cmd::output("bluetoothctl", &["show"]) else {
        return BtSnapshot::default();
    };
    let (available, powered) = parse_show(&show);
    if !available || !powered {
        return BtSnapshot {
            available,
            powered,
            devices: Vec::new(),
        };
    }

    let paired = cmd::output("bluetoothctl", &["devices", "Paired"])
        .or_else(|_| cmd::output("bluetoothctl", &["paired-devices"]))
        .unwrap_or_default();
    let devices = parse_device_lines(&paired)
        .into_iter()
        .map(|(mac, name)| {
            let (connected, battery) = cmd::output("bluetoothctl", &["info", &mac])
                .map(|info| parse_info(&info))
                .unwrap_or((false, None));
            BtDevice {
                mac,
                name,
                connected,
                battery,
            }
        })
        .collect();

    BtSnapshot {
        available,
        powered,
        devices,
    }
}

fn bluetooth_glyph(snapshot: &BtSnapshot) -> &'static str {
    if !snapshot.available || !snapshot.powered {
        OFF_GLYPH
    } else if snapshot.connected().next().is_some() {
        CONNECTED_GLYPH
    } else {
        ON_GLYPH
    }
}

fn bluetooth_display(snapshot: &BtSnapshot) -> GaugeDisplay {
    match snapshot.connected().find_map(|device| device.battery) {
        Some(battery) => GaugeDisplay::text(format!("{battery}%")),
        None => GaugeDisplay::Empty,
    }
}

fn info_lines(snapshot: &BtSnapshot) -> Vec<String> {
    if !snapshot.available {
        return vec!["Bluetooth not available".to_string()];
    }
    if !snapshot.powered {
        return vec!["Bluetooth Off".to_string()];
    }
    let mut lines = vec!["Bluetooth On".to_string()];
    let connected: Vec<String> = snapshot
        .connected()
        .map(|device| match device.battery {
            Some(battery) => format!("✓ {} ({battery}%)", device.name),
            None => format!("✓ {}", device.name),
        })
        .collect();
    if connected.is_empty() {
        lines.push("No devices connected".to_string());
    } else {
        lines.extend(connected);
    }
    lines
}

fn menu_items(snapshot: &BtSnapshot) -> Vec<GaugeMenuItem> {
    snapshot
        .devices
        .iter()
        .map(|device| GaugeMenuItem {
            id: device.mac.clone(),
            label: device.name.clone(),
            selected: device.connected,
        })
        .collect()
}

/// Adapter power state, as reported by `bluetoothctl show`.
pub fn bluetooth_powered() -> Result<bool, String> {
    cmd::output("bluetoothctl", &["show"]).map(|output| parse_show(&output).1)
}

pub fn set_bluetooth_power(on: bool) -> Result<(), String> {
    cmd::run("bluetoothctl", &["power", if on { "on" } else { "off" }])
}

struct BluetoothGauge {
    handle: PollHandle<BtSnapshot>,
    event_source: Option<PollSource<BtSnapshot>>,
    next_deadline: Instant,
}

impl Gauge for BluetoothGauge {
    fn id(&self) -> &'static str {
        "bluetooth"
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

        let powered = snapshot.powered;
        let waker = self.handle.waker();
        let on_click: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            if click.input != GaugeInput::Button(mouse::Button::Middle) {
                return;
            }
            let waker = waker.clone();
            thread::spawn(move || {
                if let Err(err) = set_bluetooth_power(!powered) {
                    log::warn!("bluetooth gauge: {err}");
                }
                let _ = waker.send(());
            });
        });

        let connected: HashSet<String> = snapshot
            .connected()
            .map(|device| device.mac.clone())
            .collect();
        let menu_select: MenuSelectAction = {
            let waker = self.handle.waker();
            Arc::new(move |mac: String| {
                let verb = if connected.contains(&mac) {
                    "disconnect"
                } else {
                    "connect"
                };
                let waker = waker.clone();
                thread::spawn(move || {
                    if let Err(err) = cmd::run("bluetoothctl", &[verb, &mac]) {
                        log::warn!("bluetooth gauge: {verb} {mac} failed: {err}");
                    }
                    let _ = waker.send(());
                });
            })
        };

        let mut model = GaugeModel::new(
            "bluetooth",
            Some(bluetooth_glyph(&snapshot).to_string()),
            bluetooth_display(&snapshot),
        );
        model.on_click = Some(on_click);
        model.info = Some(InfoDialog::new("Bluetooth", info_lines(&snapshot)));
        model.menu = (snapshot.powered && !snapshot.devices.is_empty()).then(|| GaugeMenu {
            title: "Bluetooth Devices".to_string(),
            items: menu_items(&snapshot),
            on_select: Some(menu_select),
        });
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let poll_interval_secs = settings::settings().get_parsed_or(
        "halcyon.gauge.bluetooth.poll_interval_secs",
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let (handle, event_source) = poller(
        "bluetooth",
        Duration::from_secs(poll_interval_secs.max(1)),
        sample_bluetooth,
    );
    Box::new(BluetoothGauge {
        handle,
        event_source: Some(event_source),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.bluetooth.poll_interval_secs",
        default: "5",
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "bluetooth",
        description: "Bluetooth gauge showing adapter state and connected device battery.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW: &str = "Controller 00:1A:7D:DA:71:13 (public)
\tName: laptop
\tPowered: yes
\tDiscoverable: no";

    fn device(name: &str, connected: bool, battery: Option<u8>) -> BtDevice {
        BtDevice {
            mac: format!("AA:{name}"),
            name: name.to_string(),
            connected,
            battery,
        }
    }

    #[test]
    fn show_output_reports_power() {
        assert_eq!(parse_show(SHOW), (true, true));
        assert_eq!(parse_show(&SHOW.replace("Powered: yes", "Powered: no")), (true, false));
        assert_eq!(parse_show("No default controller available"), (false, false));
    }

    #[test]
    fn device_and_info_parsing() {
        let devices = parse_device_lines("Device 11:22:33:44:55:66 WH-1000XM4\nnoise\n");
        assert_eq!(
            devices,
            vec![("11:22:33:44:55:66".to_string(), "WH-1000XM4".to_string())]
        );

        let info = "Device 11:22:33:44:55:66 (public)\n\tConnected: yes\n\tBattery Percentage: 0x4b (75)";
        assert_eq!(parse_info(info), (true, Some(75)));
        assert_eq!(parse_info("\tConnected: no"), (false, None));
    }

    #[test]
    fn glyph_and_label_follow_connections() {
        let mut snapshot = BtSnapshot {
            available: true,
            powered: true,
            devices: vec![device("mouse", false, Some(20)), device("buds", true, Some(64))],
        };
        assert_eq!(bluetooth_glyph(&snapshot), CONNECTED_GLYPH);
        assert_eq!(bluetooth_display(&snapshot), GaugeDisplay::text("64%"));
        assert_eq!(info_lines(&snapshot), vec!["Bluetooth On", "✓ buds (64%)"]);

        snapshot.devices[1].connected = false;
        assert_eq!(bluetooth_glyph(&snapshot), ON_GLYPH);
        assert!(matches!(bluetooth_display(&snapshot), GaugeDisplay::Empty));

        snapshot.powered = false;
        assert_eq!(bluetooth_glyph(&snapshot), OFF_GLYPH);
        assert_eq!(info_lines(&snapshot), vec!["Bluetooth Off"]);
    }
}
