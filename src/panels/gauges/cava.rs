// Audio visualizer gauge fed by a `cava` subprocess in raw ASCII mode.
// Consumes Settings: halcyon.gauge.cava.bars, halcyon.gauge.cava.framerate.
use crate::icon::block_for_level;
use crate::panels::gauges::gauge::{
    Gauge, GaugeDisplay, GaugeEventSource, GaugeModel, GaugeReadyNotify, GaugeRegistrar,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::SettingSpec;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const DEFAULT_BARS: usize = 12;
const DEFAULT_FRAMERATE: u32 = 20;
const ASCII_MAX_RANGE: u32 = 7;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CavaFrame {
    Bars(String),
    Unavailable(String),
}

fn cava_config(bars: usize, framerate: u32) -> String {
    format!(
        "[general]\n\
         bars = {bars}\n\
         framerate = {framerate}\n\
         [input]\n\
         method = pulse\n\
         source = auto\n\
         [output]\n\
         method = raw\n\
         raw_target = /dev/stdout\n\
         data_format = ascii\n\
         ascii_max_range = {ASCII_MAX_RANGE}\n\
         bar_delimiter = 59\n\
         frame_delimiter = 10\n"
    )
}

/// One raw frame like `0;3;7;` to block characters.
fn render_frame(line: &str) -> String {
    line.split(';')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter_map(|value| value.parse::<u32>().ok())
        .map(|value| block_for_level(value.min(ASCII_MAX_RANGE) as f32 / ASCII_MAX_RANGE as f32))
        .collect()
}

fn silent_frame(bars: usize) -> String {
    std::iter::repeat_n(block_for_level(0.0), bars).collect()
}

/// Temporary cava config, removed when dropped.
struct ConfigFile(PathBuf);

impl ConfigFile {
    fn write(path: PathBuf, contents: &str) -> Result<Self, String> {
        fs::write(&path, contents).map_err(|err| format!("failed to write cava config: {err}"))?;
        Ok(Self(path))
    }
}

impl Drop for ConfigFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

struct CavaEventSource {
    program: &'static str,
    config_path: PathBuf,
    bars: usize,
    framerate: u32,
    frame_tx: mpsc::Sender<CavaFrame>,
}

impl CavaEventSource {
    fn new(bars: usize, framerate: u32, frame_tx: mpsc::Sender<CavaFrame>) -> Self {
        Self {
            program: "cava",
            config_path: std::env::temp_dir()
                .join(format!("halcyon_cava_{}.conf", std::process::id())),
            bars,
            framerate,
            frame_tx,
        }
    }

    fn stream_frames(&self, notify: &GaugeReadyNotify) -> Result<(), String> {
        let config = ConfigFile::write(
            self.config_path.clone(),
            &cava_config(self.bars, self.framerate),
        )?;

        let mut child = Command::new(self.program)
            .arg("-p")
            .arg(&config.0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| format!("cava unavailable: {err}"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "cava stdout not captured".to_string())?;

        let mut last = String::new();
        for line in BufReader::new(stdout).lines() {
            let Ok(line) = line else {
                break;
            };
            let frame = render_frame(&line);
            if frame == last {
                continue;
            }
            last = frame.clone();
            if self.frame_tx.send(CavaFrame::Bars(frame)).is_err() {
                break;
            }
            notify("cava");
        }

        let _ = child.kill();
        let _ = child.wait();
        Err("cava exited".to_string())
    }
}

impl GaugeEventSource for CavaEventSource {
    fn run(self: Box<Self>, notify: GaugeReadyNotify) {
        if let Err(err) = self.stream_frames(&notify) {
            log::warn!("cava gauge: {err}");
            let _ = self.frame_tx.send(CavaFrame::Unavailable(err));
            notify("cava");
        }
    }
}

struct CavaGauge {
    frame_rx: mpsc::Receiver<CavaFrame>,
    event_source: Option<CavaEventSource>,
    bars: usize,
    started: bool,
    next_deadline: Instant,
}

impl Gauge for CavaGauge {
    fn id(&self) -> &'static str {
        "cava"
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
        let mut latest = None;
        while let Ok(frame) = self.frame_rx.try_recv() {
            latest = Some(frame);
        }

        let display = match latest {
            Some(CavaFrame::Bars(bars)) => GaugeDisplay::text(bars),
            Some(CavaFrame::Unavailable(_)) => GaugeDisplay::Empty,
            None if !self.started => GaugeDisplay::text(silent_frame(self.bars)),
            None => return None,
        };
        self.started = true;
        Some(GaugeModel::new("cava", None, display))
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let settings = settings::settings();
    let bars = settings
        .get_parsed_or("halcyon.gauge.cava.bars", DEFAULT_BARS)
        .clamp(1, 64);
    let framerate = settings
        .get_parsed_or("halcyon.gauge.cava.framerate", DEFAULT_FRAMERATE)
        .clamp(1, 60);
    let (frame_tx, frame_rx) = mpsc::channel();
    Box::new(CavaGauge {
        frame_rx,
        event_source: Some(CavaEventSource::new(bars, framerate, frame_tx)),
        bars,
        started: false,
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[
        SettingSpec {
            key: "halcyon.gauge.cava.bars",
            default: "12",
        },
        SettingSpec {
            key: "halcyon.gauge.cava.framerate",
            default: "20",
        },
    ];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "cava",
        description: "Audio visualizer gauge drawing cava output as block bars.",
        default_enabled: false,
        settings,
        create: create_gauge,
        validate: None,
    }
}
