// Gauge models, menus, and interaction payloads.
use iced::mouse;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::dialog::info::InfoDialog;

/// Severity level used when rendering gauge values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GaugeValueAttention {
    #[default]
    Nominal,
    Warning,
    Danger,
}

/// Renderable content for a gauge value.
#[derive(Debug, Clone, PartialEq)]
pub enum GaugeValue {
    Text(String),
    /// Text followed by a fill bar; `fraction` is in `0.0..=1.0`.
    Meter { text: String, fraction: f32 },
    /// Text tinted along the theme's danger to success ramp; `level` is in `0.0..=1.0`.
    Graded { text: String, level: f32 },
}

impl GaugeValue {
    pub fn text(&self) -> &str {
        match self {
            GaugeValue::Text(text)
            | GaugeValue::Meter { text, .. }
            | GaugeValue::Graded { text, .. } => text,
        }
    }
}

/// What a gauge should display for its value area.
#[derive(Debug, Clone, PartialEq)]
pub enum GaugeDisplay {
    Value {
        value: GaugeValue,
        attention: GaugeValueAttention,
    },
    Empty,
    Error,
}

impl GaugeDisplay {
    pub fn text(text: impl Into<String>) -> Self {
        GaugeDisplay::Value {
            value: GaugeValue::Text(text.into()),
            attention: GaugeValueAttention::Nominal,
        }
    }
}

/// One selectable entry in a gauge menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeMenuItem {
    pub id: String,
    pub label: String,
    pub selected: bool,
}

/// Callback invoked when a gauge menu item is selected.
pub type MenuSelectAction = Arc<dyn Fn(String) + Send + Sync>;
/// Callback invoked when a gauge action item is selected.
pub type ActionSelectAction = MenuSelectAction;

/// Context menu model shown for a gauge.
#[derive(Clone)]
pub struct GaugeMenu {
    pub title: String,
    pub items: Vec<GaugeMenuItem>,
    pub on_select: Option<MenuSelectAction>,
}

/// One action entry shown in a gauge action dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeActionItem {
    pub id: String,
    pub glyph: String,
    pub label: String,
}

/// Action dialog model shown for a gauge.
#[derive(Clone)]
pub struct GaugeActionDialog {
    pub title: String,
    pub items: Vec<GaugeActionItem>,
    pub on_select: Option<ActionSelectAction>,
}

/// A level change that should pop up the on-screen display.
///
/// The bar shows the OSD again whenever `serial` differs from the last one it saw
/// for this gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeOsd {
    pub glyph: String,
    /// Level in `0.0..=1.0`.
    pub level: f32,
    pub serial: u64,
}

/// Full render/update model for a single gauge instance.
#[derive(Clone)]
pub struct GaugeModel {
    /// Stable gauge id used for routing, replacement, and click dispatch.
    pub id: &'static str,
    /// Glyph rendered before the value.
    pub icon: Option<String>,
    /// Value/error content shown in the gauge value area.
    pub display: GaugeDisplay,
    /// Optional pointer-input callback for click/scroll interactions.
    pub on_click: Option<GaugeClickAction>,
    /// Optional context menu shown on right-click.
    pub menu: Option<GaugeMenu>,
    /// Optional action dialog shown on right-click when configured.
    pub action_dialog: Option<GaugeActionDialog>,
    /// Optional info dialog content shown on left-click.
    pub info: Option<InfoDialog>,
    /// Latest OSD request, if this gauge drives the on-screen display.
    pub osd: Option<GaugeOsd>,
}

impl GaugeModel {
    /// A model with only an id, icon and display set.
    pub fn new(id: &'static str, icon: Option<String>, display: GaugeDisplay) -> Self {
        Self {
            id,
            icon,
            display,
            on_click: None,
            menu: None,
            action_dialog: None,
            info: None,
            osd: None,
        }
    }
}

impl fmt::Debug for GaugeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeModel")
            .field("id", &self.id)
            .field("icon", &self.icon)
            .field("display", &self.display)
            .field(
                "menu",
                &self
                    .menu
                    .as_ref()
                    .map(|menu| menu.title.as_str())
                    .unwrap_or("<none>"),
            )
            .field(
                "action_dialog",
                &self
                    .action_dialog
                    .as_ref()
                    .map(|dialog| dialog.title.as_str())
                    .unwrap_or("<none>"),
            )
            .field(
                "info",
                &self
                    .info
                    .as_ref()
                    .map(|dialog| dialog.title.as_str())
                    .unwrap_or("<none>"),
            )
            .field("osd", &self.osd)
            .finish_non_exhaustive()
    }
}

/// Supported user input events for a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeInput {
    Button(mouse::Button),
    ScrollUp,
    ScrollDown,
}

/// Click/scroll payload delivered to gauge click handlers.
#[derive(Debug, Clone, Copy)]
pub struct GaugeClick {
    pub input: GaugeInput,
}

/// Callback invoked when a gauge receives pointer input.
pub type GaugeClickAction = Arc<dyn Fn(GaugeClick) + Send + Sync>;

/// Callback used by gauges to request immediate scheduling by the work manager.
///
/// Gauges call this after local input/state changes (for example from click handlers)
/// when they want `run_once` invoked before the next deadline.
pub type GaugeReadyNotify = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Why the scheduler is running a gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeWake {
    Timer,
    ExternalEvent,
}

/// Result of one gauge run.
#[derive(Debug)]
pub enum RunOutcome {
    NoChange,
    ModelChanged(Box<GaugeModel>),
}

/// Long-lived producer that watches an external system and wakes its gauge.
///
/// Each event source runs on a dedicated thread owned by the work manager.
pub trait GaugeEventSource: Send + 'static {
    fn run(self: Box<Self>, notify: GaugeReadyNotify);
}

/// Collects gauge-owned event sources during startup.
pub trait GaugeRegistrar {
    fn add_event_source(&mut self, source: Box<dyn GaugeEventSource>);
}

/// Runtime contract implemented by every gauge.
///
/// A gauge is a stateful worker that decides when it wants to run next and can emit
/// a new `GaugeModel` for rendering.
pub trait Gauge: Send + 'static {
    /// Stable gauge id. Must match `GaugeSpec::id`.
    fn id(&self) -> &'static str;

    /// Inject the callback used to request immediate scheduling.
    ///
    /// Gauges with click/menu callbacks should store the callback and trigger it after
    /// queuing local commands.
    fn bind_ready_notify(&mut self, _notify: GaugeReadyNotify) {}

    /// Hand long-running watchers to the scheduler before the first run.
    fn register(&mut self, _registrar: &mut dyn GaugeRegistrar) {}

    /// Next time this gauge should be run by the scheduler.
    ///
    /// The scheduler will not run the gauge before this deadline unless it is explicitly
    /// marked ready via `GaugeReadyNotify`.
    fn next_deadline(&self) -> Instant;

    /// Execute one unit of gauge work.
    ///
    /// Return `Some(GaugeModel)` when the UI should be updated, or `None` to keep the
    /// previously rendered model.
    fn run_once(&mut self, now: Instant) -> Option<GaugeModel>;

    /// Scheduler entry point. Gauges that treat external wakes differently override this.
    fn run(&mut self, _wake: GaugeWake, now: Instant) -> RunOutcome {
        match self.run_once(now) {
            Some(model) => RunOutcome::ModelChanged(Box::new(model)),
            None => RunOutcome::NoChange,
        }
    }
}

/// Attention for a percentage against warning/danger thresholds.
pub fn attention_for_percent(percent: f32, warning: f32, danger: f32) -> GaugeValueAttention {
    if percent >= danger {
        GaugeValueAttention::Danger
    } else if percent >= warning {
        GaugeValueAttention::Warning
    } else {
        GaugeValueAttention::Nominal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        runs: u32,
    }

    impl Gauge for Counter {
        fn id(&self) -> &'static str {
            "counter"
        }

        fn next_deadline(&self) -> Instant {
            Instant::now()
        }

        fn run_once(&mut self, _now: Instant) -> Option<GaugeModel> {
            self.runs += 1;
            (self.runs % 2 == 0).then(|| {
                GaugeModel::new("counter", None, GaugeDisplay::text(self.runs.to_string()))
            })
        }
    }

    #[test]
    fn default_run_wraps_run_once() {
        let mut gauge = Counter { runs: 0 };
        let now = Instant::now();
        assert!(matches!(gauge.run(GaugeWake::Timer, now), RunOutcome::NoChange));
        match gauge.run(GaugeWake::ExternalEvent, now) {
            RunOutcome::ModelChanged(model) => assert_eq!(model.id, "counter"),
            RunOutcome::NoChange => panic!("second run should emit"),
        }
    }

    #[test]
    fn attention_thresholds_are_inclusive() {
        assert_eq!(
            attention_for_percent(69.9, 70.0, 90.0),
            GaugeValueAttention::Nominal
        );
        assert_eq!(
            attention_for_percent(70.0, 70.0, 90.0),
            GaugeValueAttention::Warning
        );
        assert_eq!(
            attention_for_percent(90.0, 70.0, 90.0),
            GaugeValueAttention::Danger
        );
    }

    #[test]
    fn value_text_covers_all_variants() {
        assert_eq!(GaugeValue::Text("a".into()).text(), "a");
        assert_eq!(
            GaugeValue::Meter {
                text: "b".into(),
                fraction: 0.5
            }
            .text(),
            "b"
        );
        assert_eq!(
            GaugeValue::Graded {
                text: "c".into(),
                level: 0.1
            }
            .text(),
            "c"
        );
    }
}
