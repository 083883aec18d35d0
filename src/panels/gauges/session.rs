// Session gauge: launches the logout menu and offers logind session actions.
// Consumes Settings: halcyon.gauge.session.logout_command.
use crate::cmd;
use crate::panels::gauges::gauge::{
    ActionSelectAction, Gauge, GaugeActionDialog, GaugeActionItem, GaugeClick, GaugeClickAction,
    GaugeDisplay, GaugeInput, GaugeModel,
};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings;
use crate::settings::{SettingSpec, Settings};
use iced::mouse;
use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use zbus::blocking::{Connection, Proxy};

const LOGIND_SERVICE: &str = "org.freedesktop.login1";
const LOGIND_PATH: &str = "/org/freedesktop/login1";
const LOGIND_IFACE: &str = "org.freedesktop.login1.Manager";
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_LOGOUT_COMMAND: &str = "wlogout --protocol layer-shell";
const SESSION_GLYPH: &str = "⏻";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionAction {
    Lock,
    Suspend,
    Reboot,
    PowerOff,
}

impl SessionAction {
    const ALL: [SessionAction; 4] = [
        SessionAction::Lock,
        SessionAction::Suspend,
        SessionAction::Reboot,
        SessionAction::PowerOff,
    ];

    fn id(self) -> &'static str {
        match self {
            SessionAction::Lock => "lock",
            SessionAction::Suspend => "suspend",
            SessionAction::Reboot => "reboot",
            SessionAction::PowerOff => "poweroff",
        }
    }

    fn from_item_id(item_id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.id() == item_id)
    }

    fn item(self) -> GaugeActionItem {
        let (glyph, label) = match self {
            SessionAction::Lock => ("󰌾", "Lock"),
            SessionAction::Suspend => ("󰤄", "Suspend"),
            SessionAction::Reboot => ("󰜉", "Reboot"),
            SessionAction::PowerOff => ("󰐥", "Power Off"),
        };
        GaugeActionItem {
            id: self.id().to_string(),
            glyph: glyph.to_string(),
            label: label.to_string(),
        }
    }
}

fn perform_session_action(action: SessionAction) -> Result<(), String> {
    let connection =
        Connection::system().map_err(|err| format!("failed to connect to system bus: {err}"))?;
    let proxy = Proxy::new(&connection, LOGIND_SERVICE, LOGIND_PATH, LOGIND_IFACE)
        .map_err(|err| format!("failed to create logind proxy: {err}"))?;

    let result = match action {
        SessionAction::Lock => proxy.call_method("LockSessions", &()),
        SessionAction::Suspend => proxy.call_method("Suspend", &(false,)),
        SessionAction::Reboot => proxy.call_method("Reboot", &(false,)),
        SessionAction::PowerOff => proxy.call_method("PowerOff", &(false,)),
    };
    result
        .map(|_| ())
        .map_err(|err| format!("{} failed: {err}", action.id()))
}

fn read_uptime_seconds() -> Option<u64> {
    let uptime = fs::read_to_string("/proc/uptime").ok()?;
    parse_uptime(&uptime)
}

fn parse_uptime(contents: &str) -> Option<u64> {
    let seconds = contents.split_whitespace().next()?.parse::<f64>().ok()?;
    Some(seconds.max(0.0) as u64)
}

fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3_600;
    let minutes = (seconds % 3_600) / 60;

    if days > 0 {
        format!("{days}d {hours:02}h {minutes:02}m")
    } else {
        format!("{hours:02}h {minutes:02}m")
    }
}

fn dialog_title(uptime: Option<u64>) -> String {
    match uptime {
        Some(seconds) => format!("Uptime: {}", format_uptime(seconds)),
        None => "Session".to_string(),
    }
}

struct SessionGauge {
    logout_command: String,
    next_deadline: Instant,
}

impl Gauge for SessionGauge {
    fn id(&self) -> &'static str {
        "session"
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        self.next_deadline = now + Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS);

        let logout_command = self.logout_command.clone();
        let on_click: GaugeClickAction = Arc::new(move |click: GaugeClick| {
            if click.input != GaugeInput::Button(mouse::Button::Left) {
                return;
            }
            if let Err(err) = cmd::spawn_detached(&logout_command) {
                log::error!("session gauge: failed to start logout command: {err}");
            }
        });
        let on_select: ActionSelectAction = Arc::new(|item_id: String| {
            let Some(action) = SessionAction::from_item_id(&item_id) else {
                log::warn!("session gauge: unknown action '{item_id}'");
                return;
            };
            thread::spawn(move || {
                if let Err(err) = perform_session_action(action) {
                    log::error!("session gauge: {err}");
                }
            });
        });

        let mut model = GaugeModel::new(
            "session",
            Some(SESSION_GLYPH.to_string()),
            GaugeDisplay::Empty,
        );
        model.on_click = Some(on_click);
        model.action_dialog = Some(GaugeActionDialog {
            title: dialog_title(read_uptime_seconds()),
            items: SessionAction::ALL.into_iter().map(SessionAction::item).collect(),
            on_select: Some(on_select),
        });
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let logout_command = settings::settings().get_or(
        "halcyon.gauge.session.logout_command",
        DEFAULT_LOGOUT_COMMAND,
    );
    Box::new(SessionGauge {
        logout_command,
        next_deadline: now,
    })
}

fn validate(settings: &Settings) -> Result<(), String> {
    validate_logout_command(&settings.get_or(
        "halcyon.gauge.session.logout_command",
        DEFAULT_LOGOUT_COMMAND,
    ))
}

fn validate_logout_command(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err("logout command must not be empty".to_string())
    } else {
        Ok(())
    }
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.session.logout_command",
        default: DEFAULT_LOGOUT_COMMAND,
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "session",
        description: "Session gauge launching the logout menu with lock, suspend and power actions.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: Some(validate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formats_with_and_without_days() {
        assert_eq!(parse_uptime("93784.51 12345.00\n"), Some(93_784));
        assert_eq!(format_uptime(93_784), "1d 02h 03m");
        assert_eq!(format_uptime(3_660), "01h 01m");
        assert_eq!(dialog_title(None), "Session");
    }

    #[test]
    fn action_ids_round_trip() {
        for action in SessionAction::ALL {
            assert_eq!(SessionAction::from_item_id(action.id()), Some(action));
        }
        assert_eq!(SessionAction::from_item_id("hibernate"), None);
    }

    #[test]
    fn empty_logout_command_is_rejected() {
        assert!(validate_logout_command("  ").is_err());
        assert!(validate_logout_command(DEFAULT_LOGOUT_COMMAND).is_ok());
    }
}
