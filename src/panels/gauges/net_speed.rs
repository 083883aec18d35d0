// Network throughput gauge for the interface carrying the default route.
// Consumes Settings: halcyon.gauge.net_speed.*.
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeModel, GaugeValue, GaugeValueAttention,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEFAULT_INTERVAL_SECS: u64 = 1;
const DEFAULT_IFACE_TTL_SECS: u64 = 5;
const RTF_UP: u16 = 0x1;
const NET_SPEED_GLYPH: &str = "󰓅";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NetCounters {
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NetRates {
    download_bytes_per_sec: f64,
    upload_bytes_per_sec: f64,
}

struct NetSample {
    iface: String,
    counters: NetCounters,
    timestamp: Instant,
}

/// Paths are configurable so tests and containers can point at fixture files.
struct NetPaths {
    proc_net_route: PathBuf,
    proc_net_dev: PathBuf,
    sys_class_net: PathBuf,
}

impl NetPaths {
    fn from_settings() -> Self {
        let settings = settings::settings();
        Self {
            proc_net_route: PathBuf::from(
                settings.get_or("halcyon.gauge.net_speed.proc_net_route_path", "/proc/net/route"),
            ),
            proc_net_dev: PathBuf::from(
                settings.get_or("halcyon.gauge.net_speed.proc_net_dev_path", "/proc/net/dev"),
            ),
            sys_class_net: PathBuf::from(
                settings.get_or("halcyon.gauge.net_speed.sys_class_net_path", "/sys/class/net"),
            ),
        }
    }
}

/// Scale bytes/sec into the largest unit that keeps the value under 1024.
fn format_rate(bytes_per_sec: f64) -> String {
    const STEP: f64 = 1024.0;
    let mut value = bytes_per_sec.max(0.0);
    if value < STEP {
        return format!("{value:.0} B/s");
    }
    let mut unit = "B/s";
    for next in ["KB/s", "MB/s", "GB/s"] {
        if value < STEP {
            break;
        }
        value /= STEP;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

fn format_total(bytes: u64) -> String {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let bytes = bytes as f64;
    if bytes >= GIB {
        format!("{:.2} GB", bytes / GIB)
    } else {
        format!("{:.1} MB", bytes / MIB)
    }
}

fn speed_label(rates: NetRates) -> String {
    format!(
        "↓ {} ↑ {}",
        format_rate(rates.download_bytes_per_sec),
        format_rate(rates.upload_bytes_per_sec)
    )
}

/// Interface with a default route (`0.0.0.0/0`, flag RTF_UP) in `/proc/net/route` contents.
fn parse_default_route(contents: &str) -> Option<String> {
    for line in contents.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }

        let destination = fields[1];
        let mask = fields[7];
        let flags = u16::from_str_radix(fields[3], 16).unwrap_or(0);

        if destination == "00000000" && mask == "00000000" && (flags & RTF_UP != 0) {
            return Some(fields[0].to_string());
        }
    }
    None
}

/// Fallback: the first non-loopback interface that is up and, if reported, has carrier.
fn first_up_interface(base: &Path) -> Option<String> {
    let mut entries: Vec<_> = fs::read_dir(base).ok()?.flatten().collect();
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name == "lo" {
            continue;
        }

        let operstate = fs::read_to_string(entry.path().join("operstate")).unwrap_or_default();
        if operstate.trim() != "up" {
            continue;
        }

        if let Ok(carrier) = fs::read_to_string(entry.path().join("carrier"))
            && carrier.trim() == "0"
        {
            continue;
        }

        return Some(name);
    }
    None
}

/// rx/tx byte counters for `iface` from `/proc/net/dev` contents.
fn parse_counters(contents: &str, iface: &str) -> Option<NetCounters> {
    for line in contents.lines().skip(2) {
        let Some((name, rest)) = line.trim().split_once(':') else {
            continue;
        };
        if name.trim() != iface {
            continue;
        }

        let fields: Vec<&str> = rest.split_whitespace().collect();
        // rx_bytes is field 0, tx_bytes is field 8.
        let rx_bytes = fields.first()?.parse().ok()?;
        let tx_bytes = fields.get(8)?.parse().ok()?;
        return Some(NetCounters { rx_bytes, tx_bytes });
    }
    None
}

/// Tracks the last counter sample to compute deltas between runs.
#[derive(Default)]
struct NetRateTracker {
    last: Option<NetSample>,
}

impl NetRateTracker {
    fn observe(&mut self, iface: &str, counters: NetCounters, now: Instant) -> NetRates {
        let rates = match &self.last {
            Some(previous) if previous.iface == iface => {
                let elapsed = now.duration_since(previous.timestamp).as_secs_f64();
                if elapsed <= 0.0 {
                    NetRates {
                        download_bytes_per_sec: 0.0,
                        upload_bytes_per_sec: 0.0,
                    }
                } else {
                    NetRates {
                        download_bytes_per_sec: counters
                            .rx_bytes
                            .saturating_sub(previous.counters.rx_bytes)
                            as f64
                            / elapsed,
                        upload_bytes_per_sec: counters
                            .tx_bytes
                            .saturating_sub(previous.counters.tx_bytes)
                            as f64
                            / elapsed,
                    }
                }
            }
            // Interface changed or first sample; seed the tracker.
            _ => NetRates {
                download_bytes_per_sec: 0.0,
                upload_bytes_per_sec: 0.0,
            },
        };

        self.last = Some(NetSample {
            iface: iface.to_string(),
            counters,
            timestamp: now,
        });
        rates
    }
}

/// Gauge that displays download and upload throughput.
struct NetSpeedGauge {
    paths: NetPaths,
    tracker: NetRateTracker,
    /// Cached interface name and when it was resolved.
    iface: Option<(String, Instant)>,
    iface_ttl: Duration,
    interval: Duration,
    next_deadline: Instant,
}

impl NetSpeedGauge {
    fn active_interface(&mut self, now: Instant) -> Option<String> {
        if let Some((name, resolved)) = &self.iface
            && now.duration_since(*resolved) < self.iface_ttl
        {
            return Some(name.clone());
        }

        let resolved = fs::read_to_string(&self.paths.proc_net_route)
            .ok()
            .and_then(|contents| parse_default_route(&contents))
            .or_else(|| first_up_interface(&self.paths.sys_class_net));
        self.iface = resolved.clone().map(|name| (name, now));
        resolved
    }
}

impl Gauge for NetSpeedGauge {
    fn id(&self) -> &'static str {
        "net_speed"
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.next_deadline = now + self.interval;

        let iface = self.active_interface(now);
        let counters = iface.as_deref().and_then(|iface| {
            fs::read_to_string(&self.paths.proc_net_dev)
                .ok()
                .and_then(|contents| parse_counters(&contents, iface))
        });

        let (display, info_lines) = match (iface, counters) {
            (Some(iface), Some(counters)) => {
                let rates = self.tracker.observe(&iface, counters, now);
                (
                    GaugeDisplay::Value {
                        value: GaugeValue::Text(speed_label(rates)),
                        attention: GaugeValueAttention::Nominal,
                    },
                    vec![
                        format!("Interface: {iface}"),
                        format!("Download: {}", format_rate(rates.download_bytes_per_sec)),
                        format!("Upload: {}", format_rate(rates.upload_bytes_per_sec)),
                        format!("Received: {}", format_total(counters.rx_bytes)),
                        format!("Sent: {}", format_total(counters.tx_bytes)),
                    ],
                )
            }
            _ => {
                self.tracker = NetRateTracker::default();
                (
                    GaugeDisplay::Value {
                        value: GaugeValue::Text("offline".to_string()),
                        attention: GaugeValueAttention::Warning,
                    },
                    vec!["No active interface".to_string()],
                )
            }
        };

        let mut model = GaugeModel::new("net_speed", Some(NET_SPEED_GLYPH.to_string()), display);
        model.info = Some(InfoDialog::new("Network Speed", info_lines));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let interval_secs =
        settings.get_parsed_or("halcyon.gauge.net_speed.interval_secs", DEFAULT_INTERVAL_SECS);
    let iface_ttl_secs =
        settings.get_parsed_or("halcyon.gauge.net_speed.iface_ttl_secs", DEFAULT_IFACE_TTL_SECS);
    Box::new(NetSpeedGauge {
        paths: NetPaths::from_settings(),
        tracker: NetRateTracker::default(),
        iface: None,
        iface_ttl: Duration::from_secs(iface_ttl_secs),
        interval: Duration::from_secs(interval_secs.max(1)),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.net_speed.interval_secs",
            default: "1",
        },
        SettingSpec {
            key: "halcyon.gauge.net_speed.iface_ttl_secs",
            default: "5",
        },
        SettingSpec {
            key: "halcyon.gauge.net_speed.sys_class_net_path",
            default: "/sys/class/net",
        },
        SettingSpec {
            key: "halcyon.gauge.net_speed.proc_net_route_path",
            default: "/proc/net/route",
        },
        SettingSpec {
            key: "halcyon.gauge.net_speed.proc_net_dev_path",
            default: "/proc/net/dev",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "net_speed",
        description: "Network throughput gauge showing download and upload rates.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}
