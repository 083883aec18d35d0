use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::OnceLock;

use argh::FromArgs;
use halcyon::bar::{BarState, Message};
use halcyon::gauges::gauge_registry;
use halcyon::panels::panel_registry::{self, BarLayout};
use halcyon::runtime_dispatch;
use halcyon::settings::{self, SettingSpec, Settings};
use halcyon::settings_storage::SettingsStorage;
use halcyon::theme;
use iced::Task;
use iced_layershell::reexport::{Anchor, KeyboardInteractivity, Layer};
use iced_layershell::settings::{LayerShellSettings, Settings as LayerSettings, StartMode};
use log::{LevelFilter, error, info, warn};
use syslog::{BasicLogger, Facility, Formatter3164};

const DEFAULT_LEFT: &str = "workspaces,window";
const DEFAULT_CENTER: &str = "clock";
const DEFAULT_MAX_STORED_NOTIFICATIONS: usize = 50;

#[derive(FromArgs, Debug)]
/// Wayland status bar with notifications, OSD and a control center
struct Args {
    /// override a setting as key=value; repeat for several settings
    #[argh(option, long = "setting")]
    settings: Vec<String>,

    /// list all settings with their defaults and exit
    #[argh(switch)]
    list_settings: bool,

    /// list all available gauges and exit
    #[argh(switch)]
    list_gauges: bool,

    /// list all available panels and exit
    #[argh(switch)]
    list_panels: bool,

    /// log level: error, warn, info, debug or trace
    #[argh(option, default = "LevelFilter::Info")]
    log_level: LevelFilter,
}

/// Default gauges for the right section, followed by the tray and the control center button.
fn default_right() -> &'static str {
    static DEFAULT_RIGHT: OnceLock<&'static str> = OnceLock::new();
    DEFAULT_RIGHT.get_or_init(|| {
        let mut ids: Vec<&str> = gauge_registry::default_gauges()
            .split(',')
            .filter(|id| !id.is_empty() && !DEFAULT_CENTER.split(',').any(|c| c == *id))
            .collect();
        ids.extend(["tray", "control_center"]);
        Box::leak(ids.join(",").into_boxed_str())
    })
}

fn all_setting_specs() -> Vec<SettingSpec> {
    let base = settings::base_setting_specs(
        DEFAULT_LEFT,
        DEFAULT_CENTER,
        default_right(),
        theme::DEFAULT_THEME_NAME,
    );
    panel_registry::collect_settings(&gauge_registry::collect_settings(&base))
}

fn init_logging(level: LevelFilter) {
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: env!("CARGO_PKG_NAME").into(),
        pid: std::process::id(),
    };
    match syslog::unix(formatter) {
        Ok(logger) => {
            if log::set_boxed_logger(Box::new(BasicLogger::new(logger))).is_ok() {
                log::set_max_level(level);
            }
        }
        Err(err) => {
            eprintln!("syslog unavailable ({err}); logging to stderr");
            env_logger::Builder::new().filter_level(level).init();
        }
    }
}

fn apply_overrides(settings: &Settings, raw: &[String]) -> Result<(), String> {
    let mut overrides = HashMap::new();
    for arg in raw {
        overrides.extend(settings::parse_settings_arg(arg)?);
    }
    for (key, value) in overrides {
        info!("Setting override {key}={value}");
        settings.update(&key, &value);
    }
    Ok(())
}

fn validate(settings: &Settings) -> Result<(), String> {
    gauge_registry::validate_settings(settings)?;
    panel_registry::validate_settings(settings)?;
    if theme::is_custom_theme_name(&settings.get_or("halcyon.bar.theme", "")) {
        theme::custom_theme_from_settings(settings)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();

    if args.list_settings {
        for spec in all_setting_specs() {
            println!("{}:{}", spec.key, spec.default);
        }
        return ExitCode::SUCCESS;
    }
    if args.list_gauges {
        gauge_registry::list_gauges();
        return ExitCode::SUCCESS;
    }
    if args.list_panels {
        panel_registry::list_panels();
        return ExitCode::SUCCESS;
    }

    init_logging(args.log_level);

    let storage = SettingsStorage::new(SettingsStorage::default_path());
    info!("Using settings from {}", storage.path().display());
    let settings = settings::init_settings(Settings::new(storage));
    if let Err(err) = apply_overrides(settings, &args.settings) {
        error!("Invalid --setting: {err}");
        eprintln!("Invalid --setting: {err}");
        return ExitCode::FAILURE;
    }
    settings.ensure_defaults(&all_setting_specs());
    if let Err(err) = validate(settings) {
        error!("{err}");
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    let layout = BarLayout::from_settings(settings);
    if layout.items().next().is_none() {
        warn!("Bar layout is empty; check halcyon.bar.left/center/right");
    }
    let bar_theme = theme::theme_from_settings(settings);
    let max_stored = settings.get_parsed_or(
        "halcyon.notifications.max_stored",
        DEFAULT_MAX_STORED_NOTIFICATIONS,
    );
    let height = BarState::bar_height();

    let layer_settings = LayerSettings {
        layer_settings: LayerShellSettings {
            size: Some((0, height)),
            exclusive_zone: height as i32,
            anchor: Anchor::Top | Anchor::Left | Anchor::Right,
            layer: Layer::Top,
            margin: (0, 0, 0, 0),
            keyboard_interactivity: KeyboardInteractivity::OnDemand,
            start_mode: StartMode::Active,
            events_transparent: false,
            ..LayerShellSettings::default()
        },
        antialiasing: true,
        ..LayerSettings::default()
    };

    let result = iced_layershell::daemon(
        move || {
            (
                BarState::new(layout.clone(), bar_theme.clone(), max_stored),
                Task::<Message>::none(),
            )
        },
        BarState::namespace,
        runtime_dispatch::update,
        BarState::view,
    )
    .theme(|state: &BarState, _window| state.bar_theme.clone())
    .subscription(runtime_dispatch::app_subscription)
    .settings(layer_settings)
    .run();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Bar exited with error: {err}");
            eprintln!("Bar exited with error: {err}");
            ExitCode::FAILURE
        }
    }
}
