// PulseAudio worker shared by the speaker and microphone gauges and the control center.
use crate::panels::gauges::gauge::{GaugeEventSource, GaugeMenuItem, GaugeReadyNotify};
use libpulse_binding as pulse;
use pulse::callbacks::ListResult;
use pulse::context::subscribe::{Facility, InterestMaskSet};
use pulse::context::{Context, FlagSet, State as ContextState};
use pulse::def;
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::volume::{ChannelVolumes, Volume};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc;
use std::time::Duration;

#[cfg(test)]
const IDLE_WAIT: Duration = Duration::from_millis(25);
#[cfg(not(test))]
const IDLE_WAIT: Duration = Duration::from_millis(250);
const MAX_PERCENT: u8 = 100;
const MAX_LABEL_CHARS: usize = 60;

/// Which side of the audio graph a worker controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Sink,
    Source,
}

impl DeviceKind {
    fn interest(self) -> InterestMaskSet {
        match self {
            DeviceKind::Sink => InterestMaskSet::SINK | InterestMaskSet::SERVER,
            DeviceKind::Source => InterestMaskSet::SOURCE | InterestMaskSet::SERVER,
        }
    }

    fn watches(self, facility: Option<Facility>) -> bool {
        match (self, facility) {
            (_, Some(Facility::Server)) => true,
            (DeviceKind::Sink, Some(Facility::Sink)) => true,
            (DeviceKind::Source, Some(Facility::Source)) => true,
            _ => false,
        }
    }

    fn context_name(self) -> &'static str {
        match self {
            DeviceKind::Sink => "halcyon-audio",
            DeviceKind::Source => "halcyon-mic",
        }
    }
}

/// Volume/mute state of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub percent: u8,
    pub muted: bool,
    pub channels: u8,
}

/// A device as listed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub name: String,
    pub description: Option<String>,
    pub port_name: Option<String>,
    pub port_description: Option<String>,
}

impl DeviceEntry {
    pub fn label(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| self.name.split(" - ").last().unwrap_or(&self.name).to_string())
    }

    /// Bluetooth devices are exposed by the bluez modules.
    pub fn is_bluetooth(&self) -> bool {
        self.name.starts_with("bluez_")
    }

    /// Headphones or a headset on the active port or in the description.
    pub fn is_headphones(&self) -> bool {
        [
            self.port_name.as_deref(),
            self.port_description.as_deref(),
            self.description.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|text| text.contains("headphone") || text.contains("headset"))
    }
}

#[derive(Debug, PartialEq)]
pub enum PulseCommand {
    ToggleMute,
    AdjustVolume(i8),
    SetDefault(String),
}

/// Everything a gauge needs to render one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseSnapshot {
    pub status: Option<DeviceStatus>,
    pub default_device: Option<DeviceEntry>,
    pub menu_items: Vec<GaugeMenuItem>,
    pub connected: bool,
}

impl PulseSnapshot {
    pub fn disconnected() -> Self {
        Self {
            status: None,
            default_device: None,
            menu_items: Vec::new(),
            connected: false,
        }
    }
}

pub fn percent_from_volume(volume: Volume) -> u8 {
    let percent = (volume.0 as f64 * 100.0 / Volume::NORMAL.0 as f64).round();
    percent.clamp(0.0, MAX_PERCENT as f64) as u8
}

fn volume_from_percent(percent: u8) -> Volume {
    let ratio = percent as f64 / 100.0;
    Volume((Volume::NORMAL.0 as f64 * ratio).round() as u32)
}

fn adjusted_percent(current: u8, delta: i8) -> u8 {
    current.saturating_add_signed(delta).min(MAX_PERCENT)
}

fn iterate(mainloop: &mut Mainloop) -> Option<()> {
    match mainloop.iterate(false) {
        IterateResult::Success(_) => Some(()),
        IterateResult::Quit(_) | IterateResult::Err(_) => None,
    }
}

fn context_failed(context: &Context) -> bool {
    matches!(
        context.get_state(),
        ContextState::Failed | ContextState::Terminated
    )
}

fn wait_until(mainloop: &mut Mainloop, context: &Context, done: &Cell<bool>) -> Option<()> {
    while !done.get() {
        iterate(mainloop)?;
        if context_failed(context) {
            return None;
        }
    }
    Some(())
}

fn wait_for_operation<C: ?Sized>(
    mainloop: &mut Mainloop,
    context: &Context,
    operation: &pulse::operation::Operation<C>,
) -> Option<()> {
    while operation.get_state() == pulse::operation::State::Running {
        iterate(mainloop)?;
        if context_failed(context) {
            return None;
        }
    }
    Some(())
}

fn wait_for_context_ready(mainloop: &mut Mainloop, context: &Context) -> Option<()> {
    loop {
        match context.get_state() {
            ContextState::Ready => return Some(()),
            ContextState::Failed | ContextState::Terminated => return None,
            _ => {}
        }
        iterate(mainloop)?;
    }
}

fn connect(name: &str) -> Option<(Mainloop, Context)> {
    let mut mainloop = Mainloop::new()?;
    let mut context = Context::new(&mainloop, name)?;
    context.connect(None, FlagSet::NOFLAGS, None).ok()?;
    wait_for_context_ready(&mut mainloop, &context)?;
    Some((mainloop, context))
}

fn default_device_name(
    kind: DeviceKind,
    mainloop: &mut Mainloop,
    context: &Context,
) -> Option<String> {
    let name = Rc::new(RefCell::new(None));
    let done = Rc::new(Cell::new(false));
    {
        let name = Rc::clone(&name);
        let done = Rc::clone(&done);
        context.introspect().get_server_info(move |info| {
            let default = match kind {
                DeviceKind::Sink => info.default_sink_name.as_ref(),
                DeviceKind::Source => info.default_source_name.as_ref(),
            };
            *name.borrow_mut() = default.map(|n| n.to_string());
            done.set(true);
        });
    }
    wait_until(mainloop, context, &done)?;
    name.borrow().clone()
}

type DeviceRecord = (DeviceEntry, DeviceStatus);

/// Pull one record out of sink/source info. Unavailable ports and monitor sources are skipped.
macro_rules! device_record {
    ($info:expr) => {{
        let info = $info;
        let port_unavailable = info
            .active_port
            .as_ref()
            .is_some_and(|port| matches!(port.available, def::PortAvailable::No));
        match info.name.as_ref() {
            Some(name) if !port_unavailable => Some((
                DeviceEntry {
                    name: name.to_string(),
                    description: info.description.as_ref().map(|d| d.to_string()),
                    port_name: info
                        .active_port
                        .as_ref()
                        .and_then(|port| port.name.as_ref().map(|n| n.to_string())),
                    port_description: info
                        .active_port
                        .as_ref()
                        .and_then(|port| port.description.as_ref().map(|d| d.to_string())),
                },
                DeviceStatus {
                    percent: percent_from_volume(info.volume.avg()),
                    muted: info.mute,
                    channels: info.volume.len(),
                },
            )),
            _ => None,
        }
    }};
}

fn collect_devices(
    kind: DeviceKind,
    mainloop: &mut Mainloop,
    context: &Context,
) -> Option<Vec<DeviceRecord>> {
    let records = Rc::new(RefCell::new(Vec::new()));
    let done = Rc::new(Cell::new(false));
    {
        let records = Rc::clone(&records);
        let done = Rc::clone(&done);
        match kind {
            DeviceKind::Sink => {
                context
                    .introspect()
                    .get_sink_info_list(move |result| match result {
                        ListResult::Item(info) => {
                            if let Some(record) = device_record!(info) {
                                records.borrow_mut().push(record);
                            }
                        }
                        ListResult::End | ListResult::Error => done.set(true),
                    });
            }
            DeviceKind::Source => {
                context
                    .introspect()
                    .get_source_info_list(move |result| match result {
                        ListResult::Item(info) => {
                            if info.monitor_of_sink.is_some() {
                                return;
                            }
                            if let Some(record) = device_record!(info) {
                                records.borrow_mut().push(record);
                            }
                        }
                        ListResult::End | ListResult::Error => done.set(true),
                    });
            }
        }
    }
    wait_until(mainloop, context, &done)?;
    let mut records = records.borrow().clone();
    records.sort_by(|a, b| a.0.name.cmp(&b.0.name));
    Some(records)
}

pub fn menu_items(entries: &[DeviceEntry], default_device: Option<&str>) -> Vec<GaugeMenuItem> {
    entries
        .iter()
        .map(|entry| GaugeMenuItem {
            id: entry.name.clone(),
            label: crate::icon::truncate_chars(&entry.label(), MAX_LABEL_CHARS),
            selected: default_device == Some(entry.name.as_str()),
        })
        .collect()
}

fn snapshot(kind: DeviceKind, mainloop: &mut Mainloop, context: &Context) -> PulseSnapshot {
    let default_name = default_device_name(kind, mainloop, context);
    let records = collect_devices(kind, mainloop, context).unwrap_or_default();
    let default_record = default_name
        .as_deref()
        .and_then(|name| records.iter().find(|(entry, _)| entry.name == name));
    let entries: Vec<DeviceEntry> = records.iter().map(|(entry, _)| entry.clone()).collect();

    PulseSnapshot {
        status: default_record.map(|(_, status)| *status),
        default_device: default_record.map(|(entry, _)| entry.clone()),
        menu_items: menu_items(&entries, default_name.as_deref()),
        connected: true,
    }
}

fn set_mute(
    kind: DeviceKind,
    mainloop: &mut Mainloop,
    context: &Context,
    name: &str,
    muted: bool,
) -> Option<()> {
    let mut introspect = context.introspect();
    let operation = match kind {
        DeviceKind::Sink => {
            introspect.set_sink_mute_by_name(name, muted, None::<Box<dyn FnMut(bool)>>)
        }
        DeviceKind::Source => {
            introspect.set_source_mute_by_name(name, muted, None::<Box<dyn FnMut(bool)>>)
        }
    };
    wait_for_operation(mainloop, context, &operation)
}

fn current_default(
    kind: DeviceKind,
    mainloop: &mut Mainloop,
    context: &Context,
) -> Option<(String, DeviceStatus)> {
    let name = default_device_name(kind, mainloop, context)?;
    let records = collect_devices(kind, mainloop, context)?;
    records
        .into_iter()
        .find(|(entry, _)| entry.name == name)
        .map(|(entry, status)| (entry.name, status))
}

fn apply_command(
    kind: DeviceKind,
    command: PulseCommand,
    mainloop: &mut Mainloop,
    context: &mut Context,
) -> Option<()> {
    match command {
        PulseCommand::SetDefault(name) => {
            let operation = match kind {
                DeviceKind::Sink => context.set_default_sink(&name, |_| {}),
                DeviceKind::Source => context.set_default_source(&name, |_| {}),
            };
            wait_for_operation(mainloop, context, &operation)?;
        }
        PulseCommand::ToggleMute => {
            if let Some((name, status)) = current_default(kind, mainloop, context) {
                set_mute(kind, mainloop, context, &name, !status.muted)?;
            }
        }
        PulseCommand::AdjustVolume(delta) => {
            if let Some((name, status)) = current_default(kind, mainloop, context)
                && status.channels > 0
            {
                let mut volumes = ChannelVolumes::default();
                volumes.set(
                    status.channels,
                    volume_from_percent(adjusted_percent(status.percent, delta)),
                );
                let mut introspect = context.introspect();
                let operation = match kind {
                    DeviceKind::Sink => introspect.set_sink_volume_by_name(
                        &name,
                        &volumes,
                        None::<Box<dyn FnMut(bool)>>,
                    ),
                    DeviceKind::Source => introspect.set_source_volume_by_name(
                        &name,
                        &volumes,
                        None::<Box<dyn FnMut(bool)>>,
                    ),
                };
                wait_for_operation(mainloop, context, &operation)?;
            }
        }
    }
    Some(())
}

fn recv_with_idle_wait(
    receiver: &mpsc::Receiver<PulseCommand>,
) -> Result<PulseCommand, mpsc::RecvTimeoutError> {
    receiver.recv_timeout(IDLE_WAIT)
}

/// Long-lived worker that mirrors one device kind into snapshots for its gauge.
pub struct PulseEventSource {
    kind: DeviceKind,
    gauge_id: &'static str,
    command_rx: mpsc::Receiver<PulseCommand>,
    snapshot_tx: mpsc::Sender<PulseSnapshot>,
}

/// Gauge-side ends of a pulse worker.
pub struct PulseHandle {
    pub command_tx: mpsc::Sender<PulseCommand>,
    pub snapshot_rx: mpsc::Receiver<PulseSnapshot>,
}

impl PulseHandle {
    /// Latest pending snapshot, if the worker sent any since the last call.
    pub fn latest(&self) -> Option<PulseSnapshot> {
        let mut latest = None;
        while let Ok(snapshot) = self.snapshot_rx.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }
}

pub fn worker(kind: DeviceKind, gauge_id: &'static str) -> (PulseHandle, PulseEventSource) {
    let (command_tx, command_rx) = mpsc::channel();
    let (snapshot_tx, snapshot_rx) = mpsc::channel();
    (
        PulseHandle {
            command_tx,
            snapshot_rx,
        },
        PulseEventSource {
            kind,
            gauge_id,
            command_rx,
            snapshot_tx,
        },
    )
}

impl PulseEventSource {
    fn publish(&self, snapshot: PulseSnapshot, notify: &GaugeReadyNotify) {
        let _ = self.snapshot_tx.send(snapshot);
        notify(self.gauge_id);
    }

    fn disconnect(&self, notify: &GaugeReadyNotify) {
        log::warn!("{}: lost connection to the pulse server", self.gauge_id);
        self.publish(PulseSnapshot::disconnected(), notify);
    }
}

impl GaugeEventSource for PulseEventSource {
    fn run(self: Box<Self>, notify: GaugeReadyNotify) {
        let kind = self.kind;
        let Some((mut mainloop, mut context)) = connect(kind.context_name()) else {
            self.disconnect(&notify);
            return;
        };

        let refresh_needed = Rc::new(Cell::new(true));
        context.set_subscribe_callback(Some(Box::new({
            let refresh_needed = Rc::clone(&refresh_needed);
            move |facility, _operation, _index| {
                if kind.watches(facility) {
                    refresh_needed.set(true);
                }
            }
        })));
        context.subscribe(kind.interest(), |_| {});
        let mut last_snapshot: Option<PulseSnapshot> = None;

        loop {
            while let Ok(command) = self.command_rx.try_recv() {
                if apply_command(kind, command, &mut mainloop, &mut context).is_none() {
                    self.disconnect(&notify);
                    return;
                }
                refresh_needed.set(true);
            }

            if refresh_needed.replace(false) {
                let next = snapshot(kind, &mut mainloop, &context);
                // Coalesce unchanged snapshots before waking the scheduler.
                if last_snapshot.as_ref() != Some(&next) {
                    last_snapshot = Some(next.clone());
                    self.publish(next, &notify);
                }
            }

            if context_failed(&context) || iterate(&mut mainloop).is_none() {
                self.disconnect(&notify);
                return;
            }

            match recv_with_idle_wait(&self.command_rx) {
                Ok(command) => {
                    if apply_command(kind, command, &mut mainloop, &mut context).is_none() {
                        self.disconnect(&notify);
                        return;
                    }
                    refresh_needed.set(true);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

/// Mute state of the default microphone, via a short-lived connection.
pub fn default_source_muted() -> Option<bool> {
    let (mut mainloop, context) = connect("halcyon-control-center")?;
    current_default(DeviceKind::Source, &mut mainloop, &context).map(|(_, status)| status.muted)
}

/// Flip the default microphone's mute state and return the new state.
pub fn toggle_default_source_mute() -> Option<bool> {
    let (mut mainloop, context) = connect("halcyon-control-center")?;
    let (name, status) = current_default(DeviceKind::Source, &mut mainloop, &context)?;
    set_mute(
        DeviceKind::Source,
        &mut mainloop,
        &context,
        &name,
        !status.muted,
    )?;
    Some(!status.muted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::RecvTimeoutError;

    fn entry(name: &str, description: Option<&str>, port: Option<&str>) -> DeviceEntry {
        DeviceEntry {
            name: name.to_string(),
            description: description.map(str::to_string),
            port_name: port.map(str::to_string),
            port_description: None,
        }
    }

    #[test]
    fn menu_items_prefer_description_or_suffix() {
        let entries = vec![
            entry("alsa_output.foo - Long Name", Some("Human Name"), None),
            entry("alsa_output.bar - Pretty Label", None, None),
        ];
        let items = menu_items(&entries, Some("alsa_output.bar - Pretty Label"));

        assert_eq!(items[0].label, "Human Name");
        assert_eq!(items[1].label, "Pretty Label");
        assert!(items[1].selected);
        assert!(!items[0].selected);
    }

    #[test]
    fn percent_from_volume_scales_and_clamps() {
        assert_eq!(percent_from_volume(Volume(0)), 0);
        assert_eq!(percent_from_volume(Volume::NORMAL), 100);
        assert_eq!(
            percent_from_volume(Volume(Volume::NORMAL.0.saturating_mul(2))),
            100
        );
    }

    #[test]
    fn adjusted_percent_stays_in_range() {
        assert_eq!(adjusted_percent(98, 5), 100);
        assert_eq!(adjusted_percent(3, -5), 0);
        assert_eq!(adjusted_percent(50, 5), 55);
    }

    #[test]
    fn device_hints_detect_headphones_and_bluetooth() {
        assert!(entry("alsa_output.pci", None, Some("analog-output-headphones")).is_headphones());
        assert!(entry("x", Some("USB Headset"), None).is_headphones());
        assert!(!entry("x", Some("Speakers"), None).is_headphones());
        assert!(entry("bluez_output.AA_BB.1", None, None).is_bluetooth());
    }

    #[test]
    fn idle_wait_blocks_when_no_command_is_available() {
        let (_tx, rx) = mpsc::channel::<PulseCommand>();
        let start = std::time::Instant::now();

        assert_eq!(recv_with_idle_wait(&rx), Err(RecvTimeoutError::Timeout));
        assert!(start.elapsed() >= IDLE_WAIT);
    }

    #[test]
    fn source_kind_ignores_sink_events() {
        assert!(DeviceKind::Source.watches(Some(Facility::Source)));
        assert!(DeviceKind::Source.watches(Some(Facility::Server)));
        assert!(!DeviceKind::Source.watches(Some(Facility::Sink)));
        assert!(!DeviceKind::Sink.watches(None));
    }
}
