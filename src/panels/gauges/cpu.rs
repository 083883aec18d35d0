// CPU utilization gauge with adaptive polling, per-core load and package temperature.
// Consumes Settings: halcyon.gauge.cpu.*.
use crate::dialog::info::InfoDialog;
use crate::icon::sparkline;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeModel, GaugeValue, attention_for_percent,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

const CPU_GLYPH: &str = "󰻠";
const DEFAULT_WARNING_PERCENT: f32 = 70.0;
const DEFAULT_DANGER_PERCENT: f32 = 90.0;
const DEFAULT_FAST_THRESHOLD: f32 = 0.50;
const DEFAULT_FAST_INTERVAL_SECS: u64 = 1;
const DEFAULT_SLOW_INTERVAL_SECS: u64 = 3;
const DEFAULT_CALM_TICKS: u8 = 4;
const TEMPERATURE_SENSORS: [&str; 3] = ["coretemp", "k10temp", "zenpower"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTime {
    idle: u64,
    non_idle: u64,
}

impl CpuTime {
    fn utilization_since(&self, previous: Self) -> f32 {
        let total_now = self.idle.saturating_add(self.non_idle);
        let total_prev = previous.idle.saturating_add(previous.non_idle);
        let total_delta = total_now.saturating_sub(total_prev);
        if total_delta == 0 {
            return 0.0;
        }

        let active_delta = self.non_idle.saturating_sub(previous.non_idle);
        (active_delta as f32 / total_delta as f32).clamp(0.0, 1.0)
    }
}

/// Aggregate and per-core counters from one `/proc/stat` read.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CpuSample {
    total: CpuTime,
    cores: Vec<CpuTime>,
}

fn parse_cpu_line(line: &str) -> Option<CpuTime> {
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect();
    if values.len() < 7 {
        return None;
    }

    let idle = values[3].saturating_add(values[4]);
    let non_idle = values[0]
        .saturating_add(values[1])
        .saturating_add(values[2])
        .saturating_add(values[5])
        .saturating_add(values[6]);
    Some(CpuTime { idle, non_idle })
}

fn parse_proc_stat(contents: &str) -> Option<CpuSample> {
    let mut total = None;
    let mut cores = Vec::new();
    for line in contents.lines() {
        if line.starts_with("cpu ") {
            total = parse_cpu_line(line);
        } else if line.starts_with("cpu") {
            if let Some(core) = parse_cpu_line(line) {
                cores.push(core);
            }
        } else if total.is_some() {
            break;
        }
    }
    total.map(|total| CpuSample { total, cores })
}

fn parse_cpu_model(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find_map(|line| line.strip_prefix("model name"))
        .and_then(|rest| rest.split_once(':'))
        .map(|(_, value)| value.trim().to_string())
}

/// Average of the `cpu MHz` lines.
fn parse_average_mhz(cpuinfo: &str) -> Option<f32> {
    let freqs: Vec<f32> = cpuinfo
        .lines()
        .filter_map(|line| line.strip_prefix("cpu MHz"))
        .filter_map(|rest| rest.split_once(':'))
        .filter_map(|(_, value)| value.trim().parse().ok())
        .collect();
    if freqs.is_empty() {
        return None;
    }
    Some(freqs.iter().sum::<f32>() / freqs.len() as f32)
}

fn frequency_label(mhz: f32) -> &'static str {
    if mhz <= 1000.0 {
        "idle"
    } else if mhz < 3500.0 {
        "normal"
    } else {
        "boost"
    }
}

fn temperature_label(celsius: f32) -> &'static str {
    if celsius <= 45.0 {
        "cool"
    } else if celsius <= 75.0 {
        "warm"
    } else {
        "hot"
    }
}

/// First `temp1_input` of a known CPU sensor under `hwmon_root`, in °C.
fn read_package_temperature(hwmon_root: &Path) -> Option<f32> {
    let entries = fs::read_dir(hwmon_root).ok()?;
    for entry in entries.flatten() {
        let dir = entry.path();
        let Ok(name) = fs::read_to_string(dir.join("name")) else {
            continue;
        };
        if !TEMPERATURE_SENSORS.contains(&name.trim()) {
            continue;
        }
        if let Some(milli) = fs::read_to_string(dir.join("temp1_input"))
            .ok()
            .and_then(|raw| raw.trim().parse::<f32>().ok())
        {
            return Some(milli / 1000.0);
        }
    }
    None
}

struct IntervalPolicy {
    fast_interval: bool,
    below_threshold_streak: u8,
    fast_threshold: f32,
    calm_ticks: u8,
    fast_interval_duration: Duration,
    slow_interval_duration: Duration,
}

impl IntervalPolicy {
    fn update(&mut self, utilization: f32) {
        if utilization > self.fast_threshold {
            self.fast_interval = true;
            self.below_threshold_streak = 0;
        } else if self.fast_interval {
            self.below_threshold_streak = self.below_threshold_streak.saturating_add(1);
            // Relax back to a slower interval after a handful of calm ticks.
            if self.below_threshold_streak >= self.calm_ticks {
                self.fast_interval = false;
                self.below_threshold_streak = 0;
            }
        }
    }

    fn interval(&self) -> Duration {
        if self.fast_interval {
            self.fast_interval_duration
        } else {
            self.slow_interval_duration
        }
    }
}

fn cpu_display(utilization: Option<f32>, warning: f32, danger: f32) -> GaugeDisplay {
    match utilization {
        Some(util) => {
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

fn info_lines(
    model: &str,
    utilization: Option<f32>,
    core_loads: &[f32],
    mhz: Option<f32>,
    celsius: Option<f32>,
) -> Vec<String> {
    let mut lines = vec![model.to_string()];
    lines.push(match utilization {
        Some(util) => format!("Load: {:.1}%", util * 100.0),
        None => "Load: N/A".to_string(),
    });
    if !core_loads.is_empty() {
        lines.push(format!("Cores: {}", sparkline(core_loads.iter().copied())));
    }
    if let Some(mhz) = mhz {
        lines.push(format!(
            "Frequency: {:.2} GHz ({})",
            mhz / 1000.0,
            frequency_label(mhz)
        ));
    }
    if let Some(celsius) = celsius {
        lines.push(format!(
            "Temperature: {celsius:.0}°C ({})",
            temperature_label(celsius)
        ));
    }
    lines
}

/// Gauge that reports CPU load from `/proc/stat` deltas.
struct CpuGauge {
    model: String,
    previous: Option<CpuSample>,
    policy: IntervalPolicy,
    warning_percent: f32,
    danger_percent: f32,
    next_deadline: Instant,
}

impl Gauge for CpuGauge {
    fn id(&self) -> &'static str {
        "cpu"
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        let sample = fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|contents| parse_proc_stat(&contents));

        let (utilization, core_loads) = match (&sample, &self.previous) {
            (Some(sample), Some(previous)) => {
                let util = sample.total.utilization_since(previous.total);
                let cores = sample
                    .cores
                    .iter()
                    .zip(&previous.cores)
                    .map(|(now, prev)| now.utilization_since(*prev))
                    .collect();
                (Some(util), cores)
            }
            (Some(_), None) => (Some(0.0), Vec::new()),
            (None, _) => (None, Vec::new()),
        };
        if sample.is_none() {
            log::warn!("cpu gauge: failed to read /proc/stat");
        }
        self.previous = sample;
        if let Some(util) = utilization {
            self.policy.update(util);
        }
        self.next_deadline = now + self.policy.interval();

        let mhz = fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|info| parse_average_mhz(&info));
        let celsius = read_package_temperature(Path::new("/sys/class/hwmon"));

        let mut model = GaugeModel::new(
            "cpu",
            Some(CPU_GLYPH.to_string()),
            cpu_display(utilization, self.warning_percent, self.danger_percent),
        );
        model.info = Some(InfoDialog::new(
            "CPU",
            info_lines(&self.model, utilization, &core_loads, mhz, celsius),
        ));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let model = fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|info| parse_cpu_model(&info))
        .unwrap_or_else(|| "Unknown CPU".to_string());

    Box::new(CpuGauge {
        model,
        previous: None,
        policy: IntervalPolicy {
            fast_interval: false,
            below_threshold_streak: 0,
            fast_threshold: settings
                .get_parsed_or("halcyon.gauge.cpu.fast_threshold", DEFAULT_FAST_THRESHOLD),
            calm_ticks: settings.get_parsed_or("halcyon.gauge.cpu.calm_ticks", DEFAULT_CALM_TICKS),
            fast_interval_duration: Duration::from_secs(settings.get_parsed_or(
                "halcyon.gauge.cpu.fast_interval_secs",
                DEFAULT_FAST_INTERVAL_SECS,
            )),
            slow_interval_duration: Duration::from_secs(settings.get_parsed_or(
                "halcyon.gauge.cpu.slow_interval_secs",
                DEFAULT_SLOW_INTERVAL_SECS,
            )),
        },
        warning_percent: settings
            .get_parsed_or("halcyon.gauge.cpu.warning_percent", DEFAULT_WARNING_PERCENT),
        danger_percent: settings
            .get_parsed_or("halcyon.gauge.cpu.danger_percent", DEFAULT_DANGER_PERCENT),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.cpu.warning_percent",
            default: "70",
        },
        SettingSpec {
            key: "halcyon.gauge.cpu.danger_percent",
            default: "90",
        },
        SettingSpec {
            key: "halcyon.gauge.cpu.fast_threshold",
            default: "0.50",
        },
        SettingSpec {
            key: "halcyon.gauge.cpu.calm_ticks",
            default: "4",
        },
        SettingSpec {
            key: "halcyon.gauge.cpu.fast_interval_secs",
            default: "1",
        },
        SettingSpec {
            key: "halcyon.gauge.cpu.slow_interval_secs",
            default: "3",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "cpu",
        description: "CPU utilization gauge with per-core load and temperature details.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "cpu  100 0 100 700 100 0 0 0 0 0\n\
cpu0 50 0 50 350 50 0 0 0 0 0\n\
cpu1 50 0 50 350 50 0 0 0 0 0\n\
intr 12345\n";

    #[test]
    fn parses_aggregate_and_cores() {
        let sample = parse_proc_stat(STAT).expect("stat should parse");
        assert_eq!(
            sample.total,
            CpuTime {
                idle: 800,
                non_idle: 200
            }
        );
        assert_eq!(sample.cores.len(), 2);
    }

    #[test]
    fn utilization_uses_counter_deltas() {
        let before = CpuTime {
            idle: 800,
            non_idle: 200,
        };
        let after = CpuTime {
            idle: 850,
            non_idle: 350,
        };
        assert!((after.utilization_since(before) - 0.75).abs() < 1e-6);
        assert_eq!(before.utilization_since(before), 0.0);
    }

    #[test]
    fn cpu_interval_speeds_up_and_recovers() {
        let mut policy = IntervalPolicy {
            fast_threshold: DEFAULT_FAST_THRESHOLD,
            calm_ticks: DEFAULT_CALM_TICKS,
            fast_interval_duration: Duration::from_secs(DEFAULT_FAST_INTERVAL_SECS),
            slow_interval_duration: Duration::from_secs(DEFAULT_SLOW_INTERVAL_SECS),
            fast_interval: false,
            below_threshold_streak: 0,
        };

        policy.update(0.6);
        assert_eq!(
            policy.interval(),
            Duration::from_secs(DEFAULT_FAST_INTERVAL_SECS)
        );

        for _ in 0..3 {
            policy.update(0.4);
            assert_eq!(
                policy.interval(),
                Duration::from_secs(DEFAULT_FAST_INTERVAL_SECS)
            );
        }

        policy.update(0.4);
        assert_eq!(
            policy.interval(),
            Duration::from_secs(DEFAULT_SLOW_INTERVAL_SECS)
        );
    }

    #[test]
    fn display_is_error_without_utilization() {
        assert!(matches!(
            cpu_display(None, DEFAULT_WARNING_PERCENT, DEFAULT_DANGER_PERCENT),
            GaugeDisplay::Error
        ));
    }

    #[test]
    fn display_uses_meter_with_attention() {
        let GaugeDisplay::Value { value, attention } =
            cpu_display(Some(0.95), DEFAULT_WARNING_PERCENT, DEFAULT_DANGER_PERCENT)
        else {
            panic!("expected value");
        };
        assert_eq!(value.text(), "95%");
        assert_eq!(
            attention,
            crate::panels::gauges::gauge::GaugeValueAttention::Danger
        );
    }

    #[test]
    fn cpuinfo_model_and_frequency() {
        let info = "processor\t: 0\nmodel name\t: Test CPU 9000\ncpu MHz\t\t: 1000.0\n\
processor\t: 1\nmodel name\t: Test CPU 9000\ncpu MHz\t\t: 3000.0\n";
        assert_eq!(parse_cpu_model(info).as_deref(), Some("Test CPU 9000"));
        assert_eq!(parse_average_mhz(info), Some(2000.0));
        assert_eq!(frequency_label(2000.0), "normal");
        assert_eq!(frequency_label(900.0), "idle");
    }

    #[test]
    fn temperature_bands() {
        assert_eq!(temperature_label(45.0), "cool");
        assert_eq!(temperature_label(75.0), "warm");
        assert_eq!(temperature_label(75.5), "hot");
    }

    #[test]
    fn info_lists_core_sparkline() {
        let lines = info_lines("CPU", Some(0.5), &[0.0, 1.0], None, Some(50.0));
        assert!(lines.contains(&"Cores: ▁█".to_string()));
        assert!(lines.contains(&"Temperature: 50°C (warm)".to_string()));
    }
}
