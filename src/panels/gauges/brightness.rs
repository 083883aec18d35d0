// Backlight brightness gauge with scroll adjustments and a brightness OSD.
// Consumes Settings: halcyon.gauge.brightness.step_percent, halcyon.gauge.brightness.refresh_interval_ms.
use crate::cmd;
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeModel, GaugeOsd,
    GaugeReadyNotify, GaugeValue, GaugeValueAttention,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

const DEFAULT_STEP_PERCENT: i8 = 5;
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 500;
const ABS_MAX_PERCENT: u8 = 100;
const SYS_BACKLIGHT: &str = "/sys/class/backlight";
pub const BRIGHTNESS_GLYPH: &str = "󰃠";

fn brightness_value(percent: Option<u8>) -> GaugeDisplay {
    match percent {
        Some(p) => GaugeDisplay::Value {
            value: GaugeValue::Text(format!("{p}%")),
            attention: GaugeValueAttention::Nominal,
        },
        None => GaugeDisplay::Error,
    }
}

fn read_u32(path: &Path) -> io::Result<u32> {
    let contents = fs::read_to_string(path)?;
    contents
        .split_whitespace()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing value"))
        .and_then(|s| {
            s.parse::<u32>()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        })
}

fn percent_from_raw(raw: u32, max: u32) -> u8 {
    if max == 0 {
        return 0;
    }

    let ratio = raw as f64 / max as f64;
    (ratio * 100.0).round().clamp(0.0, ABS_MAX_PERCENT as f64) as u8
}

fn raw_from_percent(percent: u8, max: u32) -> u32 {
    if max == 0 {
        return 0;
    }

    let clamped = percent.min(ABS_MAX_PERCENT) as u64;
    (((clamped * max as u64) + 50) / 100) as u32
}

fn adjusted_percent(current: u8, delta: i8) -> u8 {
    (current as i16 + delta as i16).clamp(0, ABS_MAX_PERCENT as i16) as u8
}

/// A sysfs backlight device.
#[derive(Debug, Clone)]
pub struct Backlight {
    root: PathBuf,
    max_brightness: u32,
    name: String,
}

impl Backlight {
    pub fn discover() -> Option<Self> {
        Self::discover_in(Path::new(SYS_BACKLIGHT))
    }

    fn discover_in(base: &Path) -> Option<Self> {
        let mut entries: Vec<_> = fs::read_dir(base).ok()?.flatten().collect();
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let root = entry.path();
            if !root.join("brightness").exists() {
                continue;
            }
            let Ok(max) = read_u32(&root.join("max_brightness")) else {
                continue;
            };
            if max == 0 {
                continue;
            }
            return Some(Self {
                name: entry.file_name().to_string_lossy().to_string(),
                root,
                max_brightness: max,
            });
        }

        None
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current level, preferring the hardware-reported `actual_brightness`.
    pub fn percent(&self) -> io::Result<u8> {
        let raw = read_u32(&self.root.join("actual_brightness"))
            .or_else(|_| read_u32(&self.root.join("brightness")))?;
        Ok(percent_from_raw(raw, self.max_brightness))
    }

    /// Write through sysfs, falling back to `brightnessctl` when the node is not writable.
    pub fn set_percent(&self, percent: u8) -> Result<(), String> {
        let raw = raw_from_percent(percent, self.max_brightness);
        match fs::write(self.root.join("brightness"), raw.to_string()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                let target = format!("{}%", percent.min(ABS_MAX_PERCENT));
                cmd::run("brightnessctl", &["--device", &self.name, "set", &target])
            }
            Err(err) => Err(format!("failed to write brightness: {err}")),
        }
    }
}

enum BrightnessCommand {
    Adjust(i8),
}

/// Gauge that reads and adjusts display backlight brightness.
struct BrightnessGauge {
    /// Cached backlight controller; re-discovered when unavailable.
    backlight: Option<Backlight>,
    /// Brightness adjustment delta applied for each scroll step.
    step_percent: i8,
    /// Poll cadence; external changes (brightness keys) show up within one interval.
    refresh_interval: Duration,
    command_tx: mpsc::Sender<BrightnessCommand>,
    command_rx: mpsc::Receiver<BrightnessCommand>,
    ready_notify: Option<GaugeReadyNotify>,
    last_percent: Option<u8>,
    osd: Option<GaugeOsd>,
    osd_serial: u64,
    next_deadline: Instant,
}

impl BrightnessGauge {
    fn apply_commands(&mut self) {
        while let Ok(BrightnessCommand::Adjust(delta)) = self.command_rx.try_recv() {
            if self.backlight.is_none() {
                self.backlight = Backlight::discover();
            }
            let Some(ref ctl) = self.backlight else {
                continue;
            };
            let result = ctl
                .percent()
                .map_err(|err| err.to_string())
                .and_then(|current| ctl.set_percent(adjusted_percent(current, delta)));
            if let Err(err) = result {
                log::error!("brightness gauge: failed to adjust brightness: {err}");
                self.backlight = None;
            }
        }
    }

    fn read_percent(&mut self) -> Option<u8> {
        if self.backlight.is_none() {
            self.backlight = Backlight::discover();
        }
        let ctl = self.backlight.as_ref()?;
        match ctl.percent() {
            Ok(percent) => Some(percent),
            Err(err) => {
                log::error!("brightness gauge: failed to read brightness: {err}");
                self.backlight = None;
                None
            }
        }
    }

    fn track_osd(&mut self, percent: Option<u8>) {
        if let Some(percent) = percent {
            if self.last_percent.is_some_and(|last| last != percent) {
                self.osd_serial = self.osd_serial.wrapping_add(1);
                self.osd = Some(GaugeOsd {
                    glyph: BRIGHTNESS_GLYPH.to_string(),
                    level: percent as f32 / ABS_MAX_PERCENT as f32,
                    serial: self.osd_serial,
                });
            }
            self.last_percent = Some(percent);
        }
    }
}

impl Gauge for BrightnessGauge {
    fn id(&self) -> &'static str {
        "brightness"
    }

    fn bind_ready_notify(&mut self, notify: GaugeReadyNotify) {
        self.ready_notify = Some(notify);
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.apply_commands();
        let percent = self.read_percent();
        self.track_osd(percent);

        let device_name = self.backlight.as_ref().map(|ctl| ctl.name.clone());
        let step_percent = self.step_percent;
        let command_tx = self.command_tx.clone();
        let ready_notify = self.ready_notify.clone();
        let on_scroll: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            let delta = match click.input {
                GaugeInput::ScrollUp => step_percent,
                GaugeInput::ScrollDown => -step_percent,
                GaugeInput::Button(_) => return,
            };
            let _ = command_tx.send(BrightnessCommand::Adjust(delta));
            if let Some(ready_notify) = &ready_notify {
                ready_notify("brightness");
            }
        });

        self.next_deadline = now + self.refresh_interval;

        let mut model = GaugeModel::new(
            "brightness",
            Some(BRIGHTNESS_GLYPH.to_string()),
            brightness_value(percent),
        );
        model.on_click = Some(on_scroll);
        model.info = Some(InfoDialog::new(
            "Brightness",
            vec![
                device_name.unwrap_or_else(|| "No backlight device".to_string()),
                match percent {
                    Some(value) => format!("Brightness: {value}%"),
                    None => "Brightness: N/A".to_string(),
                },
            ],
        ));
        model.osd = self.osd.clone();
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let mut step_percent = settings::settings().get_parsed_or(
        "halcyon.gauge.brightness.step_percent",
        DEFAULT_STEP_PERCENT,
    );
    if step_percent == 0 {
        step_percent = DEFAULT_STEP_PERCENT;
    }
    let refresh_interval_ms = settings::settings().get_parsed_or(
        "halcyon.gauge.brightness.refresh_interval_ms",
        DEFAULT_REFRESH_INTERVAL_MS,
    );
    let (command_tx, command_rx) = mpsc::channel::<BrightnessCommand>();
    Box::new(BrightnessGauge {
        backlight: None,
        step_percent,
        refresh_interval: Duration::from_millis(refresh_interval_ms.max(50)),
        command_tx,
        command_rx,
        ready_notify: None,
        last_percent: None,
        osd: None,
        osd_serial: 0,
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.brightness.step_percent",
            default: "5",
        },
        SettingSpec {
            key: "halcyon.gauge.brightness.refresh_interval_ms",
            default: "500",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "brightness",
        description: "Brightness gauge controlling the backlight level.",
        default_enabled: false,
        settings,
        create: create_gauge,
        validate: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_backlight(name: &str, max: &str, current: &str) -> PathBuf {
        let mut base = std::env::temp_dir();
        base.push(format!(
            "halcyon_backlight_test_{}_{}",
            name,
            std::process::id()
        ));
        let device = base.join("panel0");
        fs::create_dir_all(&device).expect("create backlight dir");
        fs::write(device.join("max_brightness"), max).expect("write max");
        fs::write(device.join("brightness"), current).expect("write brightness");
        base
    }

    #[test]
    fn percent_conversion_round_trips_on_edges() {
        assert_eq!(percent_from_raw(0, 255), 0);
        assert_eq!(percent_from_raw(255, 255), 100);
        assert_eq!(raw_from_percent(50, 255), 128);
        assert_eq!(raw_from_percent(150, 255), 255);
        assert_eq!(percent_from_raw(10, 0), 0);
    }

    #[test]
    fn adjust_clamps_to_range() {
        assert_eq!(adjusted_percent(98, 5), 100);
        assert_eq!(adjusted_percent(2, -5), 0);
    }

    #[test]
    fn discovers_and_writes_sysfs_backlight() {
        let base = temp_backlight("write", "1000\n", "250\n");
        let backlight = Backlight::discover_in(&base).expect("backlight should be found");
        assert_eq!(backlight.name(), "panel0");
        assert_eq!(backlight.percent().expect("read percent"), 25);

        backlight.set_percent(60).expect("write percent");
        assert_eq!(backlight.percent().expect("read percent"), 60);
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn zero_max_devices_are_skipped() {
        let base = temp_backlight("zero", "0", "0");
        assert!(Backlight::discover_in(&base).is_none());
        let _ = fs::remove_dir_all(&base);
    }

    #[test]
    fn missing_percent_is_an_error_display() {
        assert!(matches!(brightness_value(None), GaugeDisplay::Error));
    }
}
