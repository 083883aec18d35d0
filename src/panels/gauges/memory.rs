// Memory utilization gauge with swap details and optional ZFS ARC accounting.
// Consumes Settings: halcyon.gauge.memory.*.
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeModel, GaugeValue, attention_for_percent,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use std::fs;
use std::time::{Duration, Instant};

const MEMORY_GLYPH: &str = "󰍛";
const GIB: f64 = 1_073_741_824.0;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
const DEFAULT_WARNING_PERCENT: f32 = 80.0;
const DEFAULT_DANGER_PERCENT: f32 = 92.0;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct MemorySnapshot {
    total: u64,
    available: u64,
    free: u64,
    swap_total: u64,
    swap_free: u64,
    zfs_arc_cache: u64,
    zfs_arc_min: u64,
}

impl MemorySnapshot {
    /// Parse `/proc/meminfo` (values in KiB) into bytes.
    fn parse(meminfo: &str) -> Option<Self> {
        let mut snapshot = MemorySnapshot::default();
        for line in meminfo.lines() {
            let mut parts = line.split_whitespace();
            let Some(label) = parts.next() else {
                continue;
            };
            let Some(value) = parts.next().and_then(|v| v.parse::<u64>().ok()) else {
                continue;
            };
            let value = value.saturating_mul(1024);
            match label {
                "MemTotal:" => snapshot.total = value,
                "MemAvailable:" => snapshot.available = value,
                "MemFree:" => snapshot.free = value,
                "SwapTotal:" => snapshot.swap_total = value,
                "SwapFree:" => snapshot.swap_free = value,
                _ => {}
            }
        }
        (snapshot.total > 0).then_some(snapshot)
    }

    fn apply_zfs_arcstats(&mut self, arcstats: &str) {
        for line in arcstats.lines() {
            let fields: Vec<_> = line.split_whitespace().collect();
            if fields.len() < 3 {
                continue;
            }
            let Ok(value) = fields[2].parse::<u64>() else {
                continue;
            };
            match fields[0] {
                "size" => self.zfs_arc_cache = value,
                "c_min" => self.zfs_arc_min = value,
                _ => {}
            }
        }
    }

    fn available_bytes(&self) -> u64 {
        let base_available = if self.available != 0 {
            self.available.min(self.total)
        } else {
            self.free
        };
        let shrinkable_arc = self.zfs_arc_cache.saturating_sub(self.zfs_arc_min);
        base_available.saturating_add(shrinkable_arc).min(self.total)
    }

    fn used_bytes(&self) -> u64 {
        self.total.saturating_sub(self.available_bytes())
    }

    fn utilization(&self) -> f32 {
        (self.used_bytes() as f64 / self.total as f64).clamp(0.0, 1.0) as f32
    }

    fn swap_used(&self) -> u64 {
        self.swap_total.saturating_sub(self.swap_free)
    }
}

fn gib(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / GIB)
}

fn info_lines(snapshot: &MemorySnapshot) -> Vec<String> {
    let mut lines = vec![format!(
        "RAM: {} / {}",
        gib(snapshot.used_bytes()),
        gib(snapshot.total)
    )];
    if snapshot.swap_total > 0 {
        lines.push(format!(
            "SWAP: {} / {}",
            gib(snapshot.swap_used()),
            gib(snapshot.swap_total)
        ));
    } else {
        lines.push("SWAP: none".to_string());
    }
    if snapshot.zfs_arc_cache > 0 {
        lines.push(format!("ZFS ARC: {}", gib(snapshot.zfs_arc_cache)));
    }
    lines
}

fn memory_display(snapshot: Option<&MemorySnapshot>, warning: f32, danger: f32) -> GaugeDisplay {
    match snapshot {
        Some(snapshot) => {
            let util = snapshot.utilization();
            let percent = util * 100.0;
            GaugeDisplay::Value {
                value: GaugeValue::Meter {
                    text: format!("{percent:.0}%"),
                    fraction: util,
                },
                attention: attention_for_percent(percent, warning, danger),
            }
        }
        None => GaugeDisplay::Error,
    }
}

struct MemoryGauge {
    poll_interval: Duration,
    warning_percent: f32,
    danger_percent: f32,
    next_deadline: Instant,
}

impl Gauge for MemoryGauge {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.next_deadline = now + self.poll_interval;
        let snapshot = fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|meminfo| MemorySnapshot::parse(&meminfo))
            .map(|mut snapshot| {
                if let Ok(arcstats) = fs::read_to_string("/proc/spl/kstat/zfs/arcstats") {
                    snapshot.apply_zfs_arcstats(&arcstats);
                }
                snapshot
            });

        let mut model = GaugeModel::new(
            "memory",
            Some(MEMORY_GLYPH.to_string()),
            memory_display(snapshot.as_ref(), self.warning_percent, self.danger_percent),
        );
        model.info = snapshot
            .as_ref()
            .map(|snapshot| InfoDialog::new("Memory", info_lines(snapshot)));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    Box::new(MemoryGauge {
        poll_interval: Duration::from_secs(settings.get_parsed_or(
            "halcyon.gauge.memory.poll_interval_secs",
            DEFAULT_POLL_INTERVAL_SECS,
        )),
        warning_percent: settings.get_parsed_or(
            "halcyon.gauge.memory.warning_percent",
            DEFAULT_WARNING_PERCENT,
        ),
        danger_percent: settings
            .get_parsed_or("halcyon.gauge.memory.danger_percent", DEFAULT_DANGER_PERCENT),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.memory.poll_interval_secs",
            default: "2",
        },
        SettingSpec {
            key: "halcyon.gauge.memory.warning_percent",
            default: "80",
        },
        SettingSpec {
            key: "halcyon.gauge.memory.danger_percent",
            default: "92",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "memory",
        description: "Memory gauge showing RAM use with swap details.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}
