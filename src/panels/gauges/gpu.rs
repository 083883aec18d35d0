// GPU utilization gauge backed by `nvtop -s` snapshots.
// Consumes Settings: halcyon.gauge.gpu.*.
use crate::cmd;
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeModel, GaugeRegistrar, GaugeValue, attention_for_percent,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::poll_source::{PollHandle, PollSource, poller};
use crate::settings;
use crate::settings::SettingSpec;
use serde::Deserialize;
use std::time::{Duration, Instant};

const MAX_DEVICES: usize = 3;
const GPU_GLYPH: &str = "󰢮";
const IDLE_RUN_INTERVAL_SECS: u64 = 300;

/// One device entry of `nvtop -s`. Every field may be missing or null depending on the driver.
#[derive(Debug, Clone, PartialEq, Deserialize)]
struct GpuDevice {
    device_name: Option<String>,
    gpu_clock: Option<String>,
    mem_clock: Option<String>,
    power_draw: Option<String>,
    gpu_util: Option<String>,
    mem_util: Option<String>,
}

impl GpuDevice {
    fn gpu_percent(&self) -> Option<f32> {
        parse_percent(self.gpu_util.as_deref()?)
    }

    fn mem_percent(&self) -> Option<f32> {
        parse_percent(self.mem_util.as_deref()?)
    }
}

type GpuSample = Result<Vec<GpuDevice>, String>;

fn parse_percent(raw: &str) -> Option<f32> {
    raw.trim().trim_end_matches('%').trim().parse().ok()
}

fn parse_devices(json: &str) -> GpuSample {
    serde_json::from_str(json).map_err(|err| format!("invalid nvtop output: {err}"))
}

fn sample_devices() -> GpuSample {
    parse_devices(&cmd::output("nvtop", &["-s"])?)
}

fn or_na(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("N/A")
}

fn info_lines(devices: &[GpuDevice]) -> Vec<String> {
    let mut lines = Vec::new();
    for (idx, device) in devices.iter().take(MAX_DEVICES).enumerate() {
        if idx > 0 {
            lines.push(String::new());
        }
        lines.push(format!("GPU: {}", or_na(&device.device_name)));
        lines.push(format!("Clock Speed: {}", or_na(&device.gpu_clock)));
        lines.push(format!("Memory Speed: {}", or_na(&device.mem_clock)));
        lines.push(format!("Power Draw: {}", or_na(&device.power_draw)));
    }
    lines
}

fn gpu_display(sample: &GpuSample, warning: f32, danger: f32) -> GaugeDisplay {
    let Ok(devices) = sample else {
        return GaugeDisplay::Error;
    };
    let Some(device) = devices.first() else {
        return GaugeDisplay::Empty;
    };
    let Some(gpu) = device.gpu_percent() else {
        return GaugeDisplay::Error;
    };
    let text = match device.mem_percent() {
        Some(mem) => format!("{gpu:.0}% / {mem:.0}%"),
        None => format!("{gpu:.0}%"),
    };
    GaugeDisplay::Value {
        value: GaugeValue::Meter {
            text,
            fraction: (gpu / 100.0).clamp(0.0, 1.0),
        },
        attention: attention_for_percent(gpu, warning, danger),
    }
}

struct GpuGauge {
    handle: PollHandle<GpuSample>,
    event_source: Option<PollSource<GpuSample>>,
    warning_percent: f32,
    danger_percent: f32,
    next_deadline: Instant,
}

impl Gauge for GpuGauge {
    fn id(&self) -> &'static str {
        "gpu"
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
        let sample = self.handle.latest()?;

        let lines = match &sample {
            Ok(devices) if devices.is_empty() => vec!["No GPU reported".to_string()],
            Ok(devices) => info_lines(devices),
            Err(err) => {
                log::warn!("gpu gauge: {err}");
                vec![err.clone()]
            }
        };
        let mut model = GaugeModel::new(
            "gpu",
            Some(GPU_GLYPH.to_string()),
            gpu_display(&sample, self.warning_percent, self.danger_percent),
        );
        model.info = Some(InfoDialog::new("GPU Stats", lines));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let interval_ms = settings.get_parsed_or("halcyon.gauge.gpu.poll_interval_ms", 1000u64);
    let (handle, event_source) = poller(
        "gpu",
        Duration::from_millis(interval_ms.max(250)),
        sample_devices,
    );
    Box::new(GpuGauge {
        handle,
        event_source: Some(event_source),
        warning_percent: settings.get_parsed_or("halcyon.gauge.gpu.warning_percent", 80.0),
        danger_percent: settings.get_parsed_or("halcyon.gauge.gpu.danger_percent", 95.0),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.gpu.poll_interval_ms",
            default: "1000",
        },
        SettingSpec {
            key: "halcyon.gauge.gpu.warning_percent",
            default: "80",
        },
        SettingSpec {
            key: "halcyon.gauge.gpu.danger_percent",
            default: "95",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "gpu",
        description: "GPU utilization gauge reading nvtop snapshots.",
        default_enabled: false,
        settings,
        create: create_gauge,
        validate: None,
    }
}
