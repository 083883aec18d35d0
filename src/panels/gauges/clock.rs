// Clock gauge showing local time with a calendar info dialog.
// Consumes Settings: halcyon.gauge.clock.format.
use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::dialog::info::InfoDialog;
use crate::panels::gauges::gauge::{Gauge, GaugeDisplay, GaugeModel};
use crate::panels::gauges::gauge_registry::GaugeSpec;
use crate::settings::{self, SettingSpec, Settings};

const DEFAULT_FORMAT: &str = "%a, %b %d  %I:%M %p";
const CLOCK_GLYPH: &str = "󰥔";

/// Specifiers that change every second.
const SECOND_SPECIFIERS: [&str; 5] = ["%S", "%T", "%s", "%X", "%r"];

fn format_has_seconds(format: &str) -> bool {
    SECOND_SPECIFIERS.iter().any(|spec| format.contains(spec))
}

/// Time until the next whole second or minute boundary after `now`.
fn until_next_boundary<Tz: TimeZone>(now: &DateTime<Tz>, every_second: bool) -> Duration {
    let nanos_into_second = u64::from(now.nanosecond() % 1_000_000_000);
    let to_next_second = Duration::from_nanos(1_000_000_000 - nanos_into_second);
    if every_second {
        return to_next_second;
    }
    let whole_seconds_left = 59 - u64::from(now.second().min(59));
    to_next_second + Duration::from_secs(whole_seconds_left)
}

/// Render `now` with a user format. `None` when the format has bad specifiers.
fn render<Tz: TimeZone>(now: &DateTime<Tz>, format: &str) -> Option<String>
where
    Tz::Offset: std::fmt::Display,
{
    let mut rendered = String::new();
    write!(rendered, "{}", now.format(format)).ok()?;
    Some(rendered)
}

fn calendar_lines<Tz: TimeZone>(now: &DateTime<Tz>) -> Vec<String>
where
    Tz::Offset: std::fmt::Display,
{
    let week = now.iso_week();
    vec![
        now.format("%A, %B %-d, %Y").to_string(),
        format!("Week {} of {}", week.week(), week.year()),
        format!("Day {} of the year", now.ordinal()),
        now.format("%H:%M:%S %Z").to_string(),
    ]
}

struct ClockGauge {
    format: String,
    every_second: bool,
    next_deadline: Instant,
}

impl Gauge for ClockGauge {
    fn id(&self) -> &'static str {
        "clock"
    }

    fn next_deadline(&self) -> Instant {
        self.next_deadline
    }

    fn run_once(&mut self, now: Instant) -> Option<GaugeModel> {
        let local = Local::now();
        self.next_deadline = now + until_next_boundary(&local, self.every_second);

        let display = match render(&local, &self.format) {
            Some(text) => GaugeDisplay::text(text),
            None => GaugeDisplay::Error,
        };
        let mut model = GaugeModel::new("clock", Some(CLOCK_GLYPH.to_string()), display);
        model.info = Some(InfoDialog::new("Calendar", calendar_lines(&local)));
        Some(model)
    }
}

pub fn create_gauge(now: Instant) -> Box<dyn Gauge> {
    let format = settings::settings().get_or("halcyon.gauge.clock.format", DEFAULT_FORMAT);
    Box::new(ClockGauge {
        every_second: format_has_seconds(&format),
        format,
        next_deadline: now,
    })
}

fn validate(settings: &Settings) -> Result<(), String> {
    let format = settings.get_or("halcyon.gauge.clock.format", DEFAULT_FORMAT);
    render(&Local::now(), &format)
        .map(|_| ())
        .ok_or_else(|| format!("invalid clock format '{format}'"))
}

pub fn settings() -> &'static [SettingSpec] {
    const SETTINGS: &[SettingSpec] = &[SettingSpec {
        key: "halcyon.gauge.clock.format",
        default: DEFAULT_FORMAT,
    }];
    SETTINGS
}

inventory::submit! {
    GaugeSpec {
        id: "clock",
        description: "Clock gauge showing the local date and time.",
        default_enabled: true,
        settings,
        create: create_gauge,
        validate: Some(validate),
    }
}
