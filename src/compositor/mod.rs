// Compositor abstraction: workspace and active-window state from Hyprland or sway.
use std::collections::HashSet;
use std::env;
use std::thread;
use std::time::Duration;

use iced::Subscription;
use iced::futures::channel::mpsc;
use log::{debug, info, warn};

use crate::bar::Message;
use crate::outbox::{self, Delivery, Outbox};

pub mod hyprland;
pub mod sway;

const RECONNECT_INITIAL_MS: u64 = 1000;
const RECONNECT_MAX_MS: u64 = 30_000;
const RECONNECT_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: i32,
    pub name: String,
    pub focused: bool,
    pub occupied: bool,
    pub urgent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveWindow {
    pub class: String,
    pub title: String,
}

/// Everything the bar renders from the compositor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompositorSnapshot {
    pub workspaces: Vec<Workspace>,
    pub active_window: Option<ActiveWindow>,
}

/// What a backend reports while watching its event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorEvent {
    Refresh,
    /// A window on this workspace asked for attention.
    Urgent(i32),
}

pub trait CompositorBackend: Send {
    fn name(&self) -> &'static str;

    /// Workspaces sorted by id.
    fn workspaces(&mut self) -> Result<Vec<Workspace>, String>;

    /// `None` when no window has focus.
    fn active_window(&mut self) -> Result<Option<ActiveWindow>, String>;

    fn focus_workspace(&mut self, id: i32) -> Result<(), String>;

    /// Blocks on the compositor event stream and reports relevant events until it ends.
    fn watch(&mut self, on_event: &mut dyn FnMut(CompositorEvent)) -> Result<(), String>;

    fn snapshot(&mut self) -> Result<CompositorSnapshot, String> {
        Ok(CompositorSnapshot {
            workspaces: self.workspaces()?,
            active_window: self.active_window()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorKind {
    Hyprland,
    Sway,
}

/// Pick a backend from the session environment.
pub fn detect() -> Option<CompositorKind> {
    detect_from(
        env::var("HYPRLAND_INSTANCE_SIGNATURE").ok().as_deref(),
        env::var("SWAYSOCK").ok().as_deref(),
    )
}

fn detect_from(hyprland_signature: Option<&str>, swaysock: Option<&str>) -> Option<CompositorKind> {
    let present = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());
    if present(hyprland_signature) {
        Some(CompositorKind::Hyprland)
    } else if present(swaysock) {
        Some(CompositorKind::Sway)
    } else {
        None
    }
}

pub fn connect(kind: CompositorKind) -> Result<Box<dyn CompositorBackend>, String> {
    match kind {
        CompositorKind::Hyprland => Ok(Box::new(hyprland::HyprlandBackend::from_env()?)),
        CompositorKind::Sway => Ok(Box::new(sway::SwayBackend::connect()?)),
    }
}

pub fn focus_workspace(id: i32) -> Result<(), String> {
    let kind = detect().ok_or_else(|| "no supported compositor detected".to_string())?;
    connect(kind)?.focus_workspace(id)
}

/// Tracks urgency for backends that only report it as an event.
#[derive(Debug, Default)]
struct UrgencyTracker {
    urgent: HashSet<i32>,
}

impl UrgencyTracker {
    fn mark(&mut self, workspace: i32) {
        self.urgent.insert(workspace);
    }

    /// Merge tracked urgency into a snapshot; a focused workspace is no longer urgent.
    fn apply(&mut self, snapshot: &mut CompositorSnapshot) {
        for workspace in &snapshot.workspaces {
            if workspace.focused {
                self.urgent.remove(&workspace.id);
            }
        }
        for workspace in &mut snapshot.workspaces {
            workspace.urgent |= self.urgent.contains(&workspace.id);
        }
    }
}

pub fn subscription() -> Subscription<Message> {
    Subscription::run(compositor_stream)
}

fn compositor_stream() -> impl iced::futures::Stream<Item = Message> {
    let (sender, receiver) = mpsc::channel(16);

    thread::spawn(move || {
        let Some(kind) = detect() else {
            info!("No supported compositor detected; workspace panels stay empty");
            return;
        };
        watch_with_backoff(kind, Outbox::new(sender));
    });

    receiver
}

fn watch_with_backoff(kind: CompositorKind, mut outbox: Outbox<Message>) {
    let mut backoff_ms = RECONNECT_INITIAL_MS;
    let mut urgency = UrgencyTracker::default();

    loop {
        let result = connect(kind).and_then(|mut query| {
            let mut events = connect(kind)?;
            backoff_ms = RECONNECT_INITIAL_MS;
            info!("Watching {} events", query.name());
            relay(query.as_mut(), events.as_mut(), &mut urgency, &mut outbox)
        });

        match result {
            Ok(false) => return,
            Ok(true) => warn!("Compositor event stream ended; reconnecting in {backoff_ms} ms"),
            Err(err) => warn!("Compositor connection failed: {err}; retrying in {backoff_ms} ms"),
        }
        if outbox.is_closed() {
            return;
        }
        thread::sleep(Duration::from_millis(backoff_ms));
        backoff_ms = ((backoff_ms as f64) * RECONNECT_MULTIPLIER).min(RECONNECT_MAX_MS as f64) as u64;
    }
}

/// Publish a snapshot now and after every event until the stream ends.
///
/// Returns `Ok(false)` once the bar stopped listening.
fn relay(
    query: &mut dyn CompositorBackend,
    events: &mut dyn CompositorBackend,
    urgency: &mut UrgencyTracker,
    outbox: &mut Outbox<Message>,
) -> Result<bool, String> {
    if !publish(query, urgency, outbox) {
        return Ok(false);
    }
    let mut open = true;
    events.watch(&mut |event| {
        if !open {
            return;
        }
        if let CompositorEvent::Urgent(workspace) = event {
            debug!("Workspace {workspace} is urgent");
            urgency.mark(workspace);
        }
        open = publish(query, urgency, outbox);
    })?;
    Ok(open)
}

// A full channel parks the snapshot and waits for the UI; only a closed one returns false.
fn publish(
    query: &mut dyn CompositorBackend,
    urgency: &mut UrgencyTracker,
    outbox: &mut Outbox<Message>,
) -> bool {
    let mut snapshot = match query.snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            warn!("Compositor query failed: {err}");
            return !outbox.is_closed();
        }
    };
    urgency.apply(&mut snapshot);
    let delivery = match outbox.push(Message::Compositor(snapshot), outbox::latest) {
        Delivery::Parked => {
            debug!("Bar is behind on compositor updates; waiting");
            outbox.settle()
        }
        delivery => delivery,
    };
    delivery != Delivery::Closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn workspace(id: i32, focused: bool) -> Workspace {
        Workspace {
            id,
            name: id.to_string(),
            focused,
            occupied: true,
            urgent: false,
        }
    }

    struct SharedState(Arc<Mutex<Vec<Workspace>>>);

    impl CompositorBackend for SharedState {
        fn name(&self) -> &'static str {
            "test"
        }

        fn workspaces(&mut self) -> Result<Vec<Workspace>, String> {
            Ok(self.0.lock().map(|list| list.clone()).unwrap_or_default())
        }

        fn active_window(&mut self) -> Result<Option<ActiveWindow>, String> {
            Ok(None)
        }

        fn focus_workspace(&mut self, _id: i32) -> Result<(), String> {
            Ok(())
        }

        fn watch(&mut self, _on_event: &mut dyn FnMut(CompositorEvent)) -> Result<(), String> {
            Ok(())
        }
    }

    /// Emits a burst of no-op refreshes, then one real focus change.
    struct BurstEvents {
        state: Arc<Mutex<Vec<Workspace>>>,
        burst: usize,
    }

    impl CompositorBackend for BurstEvents {
        fn name(&self) -> &'static str {
            "burst"
        }

        fn workspaces(&mut self) -> Result<Vec<Workspace>, String> {
            Ok(Vec::new())
        }

        fn active_window(&mut self) -> Result<Option<ActiveWindow>, String> {
            Ok(None)
        }

        fn focus_workspace(&mut self, _id: i32) -> Result<(), String> {
            Ok(())
        }

        fn watch(&mut self, on_event: &mut dyn FnMut(CompositorEvent)) -> Result<(), String> {
            for _ in 0..self.burst {
                on_event(CompositorEvent::Refresh);
            }
            if let Ok(mut list) = self.state.lock() {
                *list = vec![workspace(1, false), workspace(2, true)];
            }
            on_event(CompositorEvent::Refresh);
            Ok(())
        }
    }

    fn focused(message: &Message) -> Option<i32> {
        match message {
            Message::Compositor(snapshot) => snapshot
                .workspaces
                .iter()
                .find(|workspace| workspace.focused)
                .map(|workspace| workspace.id),
            _ => None,
        }
    }

    #[test]
    fn focus_change_after_a_burst_still_reaches_the_bar() {
        let state = Arc::new(Mutex::new(vec![workspace(1, true), workspace(2, false)]));
        let (sender, mut receiver) = mpsc::channel(16);
        let relay_state = state.clone();
        let worker = thread::spawn(move || {
            let mut query = SharedState(relay_state.clone());
            let mut events = BurstEvents {
                state: relay_state,
                burst: 40,
            };
            let mut outbox = Outbox::new(sender);
            relay(
                &mut query,
                &mut events,
                &mut UrgencyTracker::default(),
                &mut outbox,
            )
        });

        // Let the burst fill the channel before the bar starts reading.
        thread::sleep(Duration::from_millis(50));
        let mut received = Vec::new();
        loop {
            match receiver.try_next() {
                Ok(Some(message)) => received.push(message),
                Ok(None) => break,
                Err(_) => thread::sleep(Duration::from_millis(2)),
            }
        }

        assert_eq!(worker.join().expect("relay thread"), Ok(true));
        assert!(received.len() > 17, "only {} snapshots", received.len());
        assert_eq!(received.last().and_then(focused), Some(2));
    }

    #[test]
    fn relay_stops_once_the_bar_stops_listening() {
        let state = Arc::new(Mutex::new(vec![workspace(1, true)]));
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        let mut outbox = Outbox::new(sender);

        let result = relay(
            &mut SharedState(state.clone()),
            &mut BurstEvents { state, burst: 5 },
            &mut UrgencyTracker::default(),
            &mut outbox,
        );

        assert_eq!(result, Ok(false));
    }

    #[test]
    fn hyprland_wins_over_sway() {
        assert_eq!(
            detect_from(Some("abc_123"), Some("/run/sway.sock")),
            Some(CompositorKind::Hyprland)
        );
        assert_eq!(
            detect_from(None, Some("/run/sway.sock")),
            Some(CompositorKind::Sway)
        );
        assert_eq!(detect_from(Some(" "), None), None);
        assert_eq!(detect_from(None, None), None);
    }

    #[test]
    fn urgency_clears_when_workspace_gains_focus() {
        let mut tracker = UrgencyTracker::default();
        tracker.mark(2);

        let mut snapshot = CompositorSnapshot {
            workspaces: vec![workspace(1, true), workspace(2, false)],
            active_window: None,
        };
        tracker.apply(&mut snapshot);
        assert!(snapshot.workspaces[1].urgent);

        let mut focused = CompositorSnapshot {
            workspaces: vec![workspace(1, false), workspace(2, true)],
            active_window: None,
        };
        tracker.apply(&mut focused);
        assert!(!focused.workspaces[1].urgent);
        assert!(tracker.urgent.is_empty());
    }
}
