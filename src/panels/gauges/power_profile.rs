// Power profile gauge backed by power-profiles-daemon over the system bus.
// Consumes Settings: halcyon.gauge.power_profile.poll_interval_secs.
use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{
    Gauge, GaugeClick, GaugeClickAction, GaugeDisplay, GaugeInput, GaugeModel, GaugeRegistrar,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::panels::gauges::poll_source::{PollHandle, PollSource, poller};
use crate::settings;
use crate::settings::SettingSpec;
use iced::mouse;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zbus::blocking::{Connection, Proxy};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const IDLE_RUN_INTERVAL_SECS: u64 = 300;

/// `(service, path, interface)` candidates; the legacy name is still the most widely shipped.
const DAEMON_NAMES: [(&str, &str, &str); 2] = [
    (
        "net.hadess.PowerProfiles",
        "/net/hadess/PowerProfiles",
        "net.hadess.PowerProfiles",
    ),
    (
        "org.freedesktop.UPower.PowerProfiles",
        "/org/freedesktop/UPower/PowerProfiles",
        "org.freedesktop.UPower.PowerProfiles",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerProfile {
    PowerSaver,
    Balanced,
    Performance,
}

impl PowerProfile {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "power-saver" => Some(PowerProfile::PowerSaver),
            "balanced" => Some(PowerProfile::Balanced),
            "performance" => Some(PowerProfile::Performance),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PowerProfile::PowerSaver => "power-saver",
            PowerProfile::Balanced => "balanced",
            PowerProfile::Performance => "performance",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PowerProfile::PowerSaver => "Power Saver",
            PowerProfile::Balanced => "Balanced",
            PowerProfile::Performance => "Performance",
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            PowerProfile::PowerSaver => "󰒲",
            PowerProfile::Balanced => "󰈐",
            PowerProfile::Performance => "󰿗",
        }
    }

    /// power-saver → balanced → performance → power-saver.
    pub fn next(self) -> Self {
        match self {
            PowerProfile::PowerSaver => PowerProfile::Balanced,
            PowerProfile::Balanced => PowerProfile::Performance,
            PowerProfile::Performance => PowerProfile::PowerSaver,
        }
    }
}

fn with_daemon<T>(op: impl Fn(&Proxy<'_>) -> zbus::Result<T>) -> Result<T, String> {
    let connection = Connection::system().map_err(|err| err.to_string())?;
    let mut last_err = "power-profiles-daemon not available".to_string();
    for (service, path, iface) in DAEMON_NAMES {
        let result = Proxy::new(&connection, service, path, iface).and_then(|proxy| op(&proxy));
        match result {
            Ok(value) => return Ok(value),
            Err(err) => last_err = err.to_string(),
        }
    }
    Err(last_err)
}

pub fn active_profile() -> Result<PowerProfile, String> {
    let raw = with_daemon(|proxy| proxy.get_property::<String>("ActiveProfile"))?;
    PowerProfile::parse(&raw).ok_or_else(|| format!("unknown power profile '{raw}'"))
}

pub fn set_profile(profile: PowerProfile) -> Result<(), String> {
    with_daemon(|proxy| {
        proxy
            .set_property("ActiveProfile", profile.as_str())
            .map_err(zbus::Error::from)
    })
}

type ProfileSample = Result<PowerProfile, String>;

struct PowerProfileGauge {
    handle: PollHandle<ProfileSample>,
    event_source: Option<PollSource<ProfileSample>>,
    next_deadline: Instant,
}

impl Gauge for PowerProfileGauge {
    fn id(&self) -> &'static str {
        "power_profile"
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
        let profile = match self.handle.latest()? {
            Ok(profile) => profile,
            Err(err) => {
                log::warn!("power profile gauge: {err}");
                let mut model = GaugeModel::new(
                    "power_profile",
                    Some(PowerProfile::Balanced.glyph().to_string()),
                    GaugeDisplay::Error,
                );
                model.info = Some(InfoDialog::new("Power Profile", vec![err]));
                return Some(model);
            }
        };

        let waker = self.handle.waker();
        let on_click: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            if click.input != GaugeInput::Button(mouse::Button::Left) {
                return;
            }
            let waker = waker.clone();
            thread::spawn(move || {
                if let Err(err) = set_profile(profile.next()) {
                    log::error!("power profile gauge: failed to switch profile: {err}");
                }
                let _ = waker.send(());
            });
        });

        let mut model = GaugeModel::new(
            "power_profile",
            Some(profile.glyph().to_string()),
            GaugeDisplay::Empty,
        );
        model.on_click = Some(on_click);
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let poll_interval_secs = settings::settings().get_parsed_or(
        "halcyon.gauge.power_profile.poll_interval_secs",
        DEFAULT_POLL_INTERVAL_SECS,
    );
    let (handle, event_source) = poller(
        "power_profile",
        Duration::from_secs(poll_interval_secs.max(1)),
        active_profile,
    );
    Box::new(PowerProfileGauge {
        handle,
        event_source: Some(event_source),
        next_deadline: now,
    })
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.power_profile.poll_interval_secs",
        default: "5",
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "power_profile",
        description: "Power profile gauge cycling power-saver, balanced and performance.",
        default_enabled: false,
        settings,
        create: create_gauge,
        validate: None,
    }
}
