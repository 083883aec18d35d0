// Network gauge: link type and Wi-Fi signal from NetworkManager, scans and connects via nmcli.
// Consumes Settings: halcyon.gauge.network.poll_interval_secs.
use crate::cmd;
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeMenu, GaugeMenuItem,
    GaugeModel, GaugeRegistrar, GaugeValue, GaugeValueAttention, MenuSelectAction,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::poll_source::{PollHandle, PollSource, poller};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use zbus::blocking::{Connection, Proxy};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;
const MAX_MENU_NETWORKS: usize = 15;
const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_IFACE: &str = "org.freedesktop.NetworkManager";
const NM_WIRELESS_TYPE: &str = "802-11-wireless";
const NM_ETHERNET_TYPE: &str = "802-3-ethernet";

pub const WIFI_SIGNAL_GLYPHS: [&str; 5] = ["󰤯", "󰤟", "󰤢", "󰤥", "󰤨"];
pub const ETHERNET_GLYPH: &str = "󰈀";
pub const DISCONNECTED_GLYPH: &str = "󰤮";
pub const DISABLED_GLYPH: &str = "󰤭";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkKind {
    Wifi,
    Ethernet,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct WifiNetwork {
    ssid: String,
    signal: u8,
    secured: bool,
    in_use: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DeviceLine {
    device: String,
    kind: String,
    state: String,
    connection: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NetworkSnapshot {
    radio_enabled: bool,
    link: LinkKind,
    device: Option<String>,
    connection: Option<String>,
    signal: Option<u8>,
    ip: Option<String>,
    networks: Vec<WifiNetwork>,
}

type NetworkSample = Result<NetworkSnapshot, String>;

/// Split one line of `nmcli -t` output. Literal colons inside fields are escaped as `\:`.
fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f IN-USE,SSID,SIGNAL,SECURITY device wifi list`, strongest first,
/// one entry per SSID.
fn parse_wifi_list(output: &str) -> Vec<WifiNetwork> {
    let mut networks: Vec<WifiNetwork> = Vec::new();
    for line in output.lines() {
        let fields = split_terse(line);
        let [in_use, ssid, signal, security, ..] = fields.as_slice() else {
            continue;
        };
        let ssid = ssid.trim();
        if ssid.is_empty() || ssid == "--" {
            continue;
        }
        let network = WifiNetwork {
            ssid: ssid.to_string(),
            signal: signal.trim().parse().unwrap_or(0),
            secured: !security.trim().is_empty() && security.trim() != "--",
            in_use: in_use.trim() == "*",
        };
        match networks.iter_mut().find(|known| known.ssid == network.ssid) {
            Some(known) => {
                known.in_use |= network.in_use;
                known.signal = known.signal.max(network.signal);
            }
            None => networks.push(network),
        }
    }
    networks.sort_by(|a, b| b.in_use.cmp(&a.in_use).then(b.signal.cmp(&a.signal)));
    networks
}

/// Parse `nmcli -t -f DEVICE,TYPE,STATE,CONNECTION device`.
fn parse_device_list(output: &str) -> Vec<DeviceLine> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_terse(line);
            let [device, kind, state, connection, ..] = fields.as_slice() else {
                return None;
            };
            Some(DeviceLine {
                device: device.clone(),
                kind: kind.clone(),
                state: state.clone(),
                connection: connection.clone(),
            })
        })
        .collect()
}

fn link_kind(primary_type: &str) -> LinkKind {
    match primary_type {
        NM_WIRELESS_TYPE => LinkKind::Wifi,
        NM_ETHERNET_TYPE => LinkKind::Ethernet,
        _ => LinkKind::Disconnected,
    }
}

fn network_glyph(snapshot: &NetworkSnapshot) -> &'static str {
    match snapshot.link {
        LinkKind::Ethernet => ETHERNET_GLYPH,
        LinkKind::Wifi => {
            let signal = snapshot.signal.unwrap_or(0) as usize;
            WIFI_SIGNAL_GLYPHS[(signal / 20).min(WIFI_SIGNAL_GLYPHS.len() - 1)]
        }
        LinkKind::Disconnected if !snapshot.radio_enabled => DISABLED_GLYPH,
        LinkKind::Disconnected => DISCONNECTED_GLYPH,
    }
}

fn network_display(snapshot: &NetworkSnapshot) -> GaugeDisplay {
    match snapshot.link {
        LinkKind::Wifi => match snapshot.signal {
            Some(signal) => GaugeDisplay::text(format!("{signal}%")),
            None => GaugeDisplay::Empty,
        },
        LinkKind::Ethernet => GaugeDisplay::Empty,
        LinkKind::Disconnected => GaugeDisplay::Value {
            value: GaugeValue::Text("off".to_string()),
            attention: GaugeValueAttention::Warning,
        },
    }
}

fn info_lines(snapshot: &NetworkSnapshot) -> Vec<String> {
    let mut lines = Vec::new();
    match snapshot.link {
        LinkKind::Wifi => {
            lines.push(format!(
                "SSID: {}",
                snapshot.connection.as_deref().unwrap_or("Unknown")
            ));
            if let Some(signal) = snapshot.signal {
                lines.push(format!("Strength: {signal}%"));
            }
        }
        LinkKind::Ethernet => lines.push(format!(
            "Ethernet: {}",
            snapshot.connection.as_deref().unwrap_or("Wired")
        )),
        LinkKind::Disconnected => lines.push(if snapshot.radio_enabled {
            "Not connected".to_string()
        } else {
            "Wi-Fi disabled".to_string()
        }),
    }
    if let Some(device) = &snapshot.device {
        lines.push(format!("Device: {device}"));
    }
    if let Some(ip) = &snapshot.ip {
        lines.push(format!("IP: {ip}"));
    }
    lines
}

fn menu_items(networks: &[WifiNetwork]) -> Vec<GaugeMenuItem> {
    networks
        .iter()
        .take(MAX_MENU_NETWORKS)
        .map(|network| GaugeMenuItem {
            id: network.ssid.clone(),
            label: format!(
                "{} {}{}",
                WIFI_SIGNAL_GLYPHS[(network.signal as usize / 20).min(4)],
                network.ssid,
                if network.secured { " 󰌾" } else { "" }
            ),
            selected: network.in_use,
        })
        .collect()
}

fn nm_properties() -> Result<(bool, String), String> {
    let connection = Connection::system().map_err(|err| err.to_string())?;
    let proxy =
        Proxy::new(&connection, NM_SERVICE, NM_PATH, NM_IFACE).map_err(|err| err.to_string())?;
    let radio_enabled: bool = proxy
        .get_property("WirelessEnabled")
        .map_err(|err| err.to_string())?;
    let primary_type: String = proxy.get_property("PrimaryConnectionType").unwrap_or_default();
    Ok((radio_enabled, primary_type))
}

fn sample_network() -> NetworkSample {
    let (radio_enabled, primary_type) = nm_properties()?;
    let link = link_kind(&primary_type);
    let wanted_type = match link {
        LinkKind::Wifi => Some("wifi"),
        LinkKind::Ethernet => Some("ethernet"),
        LinkKind::Disconnected => None,
    };

    let devices = parse_device_list(&cmd::output(
        "nmcli",
        &["-t", "-f", "DEVICE,TYPE,STATE,CONNECTION", "device"],
    )?);
    let active = wanted_type.and_then(|wanted| {
        devices
            .iter()
            .find(|line| line.kind == wanted && line.state == "connected")
    });

    let networks = if radio_enabled {
        cmd::output(
            "nmcli",
            &["-t", "-f", "IN-USE,SSID,SIGNAL,SECURITY", "device", "wifi", "list", "--rescan", "no"],
        )
        .map(|output| parse_wifi_list(&output))
        .unwrap_or_default()
    } else {
        Vec::new()
    };

    let ip = active.and_then(|line| {
        cmd::output("nmcli", &["-g", "IP4.ADDRESS", "device", "show", &line.device])
            .ok()
            .and_then(|output| output.lines().next().map(|ip| ip.trim().to_string()))
            .filter(|ip| !ip.is_empty())
    });
    let signal = match link {
        LinkKind::Wifi => networks.iter().find(|network| network.in_use).map(|n| n.signal),
        _ => None,
    };

    Ok(NetworkSnapshot {
        radio_enabled,
        link,
        device: active.map(|line| line.device.clone()),
        connection: active.map(|line| line.connection.clone()),
        signal,
        ip,
        networks,
    })
}

/// Whether the Wi-Fi radio is on, as reported by `nmcli radio wifi`.
pub fn wifi_radio_enabled() -> Result<bool, String> {
    cmd::output("nmcli", &["radio", "wifi"]).map(|state| state.trim() == "enabled")
}

pub fn set_wifi_radio(enabled: bool) -> Result<(), String> {
    cmd::run("nmcli", &["radio", "wifi", if enabled { "on" } else { "off" }])
}

/// Run `job` off the UI thread, then ask the poller for a fresh sample.
fn run_then_wake(waker: mpsc::Sender<()>, job: impl FnOnce() -> Result<(), String> + Send + 'static) {
    thread::spawn(move || {
        if let Err(err) = job() {
            log::warn!("network gauge: {err}");
        }
        let _ = waker.send(());
    });
}

struct NetworkGauge {
    handle: PollHandle<NetworkSample>,
    event_source: Option<PollSource<NetworkSample>>,
    next_deadline: Instant,
}

impl Gauge for NetworkGauge {
    fn id(&self) -> &'static str {
        "network"
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
        let snapshot = match self.handle.latest()? {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::warn!("network gauge: {err}");
                let mut model = GaugeModel::new(
                    "network",
                    Some(DISCONNECTED_GLYPH.to_string()),
                    GaugeDisplay::Error,
                );
                model.info = Some(InfoDialog::new("Network", vec![err]));
                return Some(model);
            }
        };

        let radio_enabled = snapshot.radio_enabled;
        let waker = self.handle.waker();
        let on_click: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            if click.input == GaugeInput::Button(mouse::Button::Middle) {
                run_then_wake(waker.clone(), move || set_wifi_radio(!radio_enabled));
            }
        });
        let menu_select: MenuSelectAction = {
            let waker = self.handle.waker();
            Arc::new(move |ssid: String| {
                run_then_wake(waker.clone(), move || {
                    cmd::run("nmcli", &["device", "wifi", "connect", &ssid])
                });
            })
        };

        let mut model = GaugeModel::new(
            "network",
            Some(network_glyph(&snapshot).to_string()),
            network_display(&snapshot),
        );
        model.on_click = Some(on_click);
        model.info = Some(InfoDialog::new("Network", info_lines(&snapshot)));
        model.menu = snapshot.radio_enabled.then(|| GaugeMenu {
            title: "Wi-Fi Networks".to_string(),
            items: menu_items(&snapshot.networks),
            on_select: Some(menu_select),
        });
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let poll_interval_secs = settings::settings().get_parsed_or(
        "halcyon.gauge.network.poll_interval_secs",
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let (handle, event_source) = poller(
        "network",
        Duration::from_secs(poll_interval_secs.max(1)),
        sample_network,
    );
    Box::new(NetworkGauge {
        handle,
        event_source: Some(event_source),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.network.poll_interval_secs",
        default: "3",
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "network",
        description: "Network gauge showing link type, Wi-Fi signal and a network picker.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(link: LinkKind, signal: Option<u8>, radio_enabled: bool) -> NetworkSnapshot {
        NetworkSnapshot {
            radio_enabled,
            link,
            device: Some("wlan0".to_string()),
            connection: Some("Home".to_string()),
            signal,
            ip: Some("192.168.1.20/24".to_string()),
            networks: Vec::new(),
        }
    }

    #[test]
    fn terse_fields_unescape_colons() {
        assert_eq!(split_terse("*:My\\:Net:72:WPA2"), vec!["*", "My:Net", "72", "WPA2"]);
        assert_eq!(split_terse("a::b"), vec!["a", "", "b"]);
    }

    #[test]
    fn wifi_list_dedups_and_sorts() {
        let output = " :Cafe:40:\n*:Home:61:WPA2\n :Cafe:55:\n :--:90:WPA2\n :Office:80:WPA1 WPA2\n";
        let networks = parse_wifi_list(output);
        let ssids: Vec<&str> = networks.iter().map(|n| n.ssid.as_str()).collect();
        assert_eq!(ssids, vec!["Home", "Office", "Cafe"]);
        assert_eq!(networks[2].signal, 55);
        assert!(!networks[2].secured);
        assert!(networks[0].in_use);
    }

    #[test]
    fn device_list_parses() {
        let devices = parse_device_list("wlan0:wifi:connected:Home\nlo:loopback:unmanaged:\n");
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].connection, "Home");
        assert_eq!(devices[1].connection, "");
    }

    #[test]
    fn glyph_by_link_and_signal() {
        assert_eq!(network_glyph(&snapshot(LinkKind::Wifi, Some(10), true)), "󰤯");
        assert_eq!(network_glyph(&snapshot(LinkKind::Wifi, Some(45), true)), "󰤢");
        assert_eq!(network_glyph(&snapshot(LinkKind::Wifi, Some(100), true)), "󰤨");
        assert_eq!(network_glyph(&snapshot(LinkKind::Ethernet, None, false)), ETHERNET_GLYPH);
        assert_eq!(
            network_glyph(&snapshot(LinkKind::Disconnected, None, true)),
            DISCONNECTED_GLYPH
        );
        assert_eq!(
            network_glyph(&snapshot(LinkKind::Disconnected, None, false)),
            DISABLED_GLYPH
        );
    }

    #[test]
    fn primary_connection_type_maps_to_link() {
        assert_eq!(link_kind("802-11-wireless"), LinkKind::Wifi);
        assert_eq!(link_kind("802-3-ethernet"), LinkKind::Ethernet);
        assert_eq!(link_kind(""), LinkKind::Disconnected);
    }

    #[test]
    fn info_lists_ssid_strength_and_ip() {
        let lines = info_lines(&snapshot(LinkKind::Wifi, Some(61), true));
        assert_eq!(
            lines,
            vec!["SSID: Home", "Strength: 61%", "Device: wlan0", "IP: 192.168.1.20/24"]
        );
    }
}
