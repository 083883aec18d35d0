// org.freedesktop.Notifications server on the session bus.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;

use iced::futures::channel::mpsc::UnboundedSender;
use log::{error, info, warn};
use zbus::blocking::Connection;
use zbus::interface;
use zbus::zvariant::OwnedValue;

use super::store::{Notification, Urgency};

const BUS_NAME: &str = "org.freedesktop.Notifications";
const OBJECT_PATH: &str = "/org/freedesktop/Notifications";
const INTERFACE: &str = "org.freedesktop.Notifications";
const SPEC_VERSION: &str = "1.2";

/// Requests from the bus to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Received(Notification),
    CloseRequested(u32),
}

/// Signals the UI wants emitted back to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSignal {
    Closed { id: u32, reason: u32 },
    ActionInvoked { id: u32, key: String },
}

struct NotificationServer {
    next_id: AtomicU32,
    events: UnboundedSender<ServiceEvent>,
}

impl NotificationServer {
    fn new(events: UnboundedSender<ServiceEvent>) -> Self {
        Self {
            next_id: AtomicU32::new(1),
            events,
        }
    }

    /// A non-zero `replaces_id` keeps the caller's id.
    fn assign_id(&self, replaces_id: u32) -> u32 {
        if replaces_id != 0 {
            return replaces_id;
        }
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    fn forward(&self, event: ServiceEvent) {
        if self.events.unbounded_send(event).is_err() {
            warn!("Notification received after the UI stopped listening");
        }
    }
}

fn urgency_from_hints(hints: &HashMap<String, OwnedValue>) -> Urgency {
    hints
        .get("urgency")
        .and_then(|value| value.try_clone().ok())
        .and_then(|value| u8::try_from(value).ok())
        .map(Urgency::from_hint)
        .unwrap_or_default()
}

#[interface(name = "org.freedesktop.Notifications")]
impl NotificationServer {
    fn get_capabilities(&self) -> Vec<String> {
        vec!["body".into(), "actions".into(), "persistence".into()]
    }

    fn notify(
        &self,
        app_name: String,
        replaces_id: u32,
        _app_icon: String,
        summary: String,
        body: String,
        actions: Vec<String>,
        hints: HashMap<String, OwnedValue>,
        expire_timeout: i32,
    ) -> u32 {
        let id = self.assign_id(replaces_id);
        self.forward(ServiceEvent::Received(Notification {
            id,
            app_name,
            summary,
            body,
            actions: Notification::actions_from_flat(&actions),
            urgency: urgency_from_hints(&hints),
            expire_timeout,
        }));
        id
    }

    fn close_notification(&self, id: u32) {
        self.forward(ServiceEvent::CloseRequested(id));
    }

    fn get_server_information(&self) -> (String, String, String, String) {
        (
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_NAME").to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
            SPEC_VERSION.to_string(),
        )
    }
}

/// Claim the bus name and serve until the signal channel closes.
pub fn serve(
    events: UnboundedSender<ServiceEvent>,
    signals: mpsc::Receiver<ServiceSignal>,
) -> Result<(), String> {
    let connection = zbus::blocking::connection::Builder::session()
        .and_then(|builder| builder.name(BUS_NAME))
        .and_then(|builder| builder.serve_at(OBJECT_PATH, NotificationServer::new(events)))
        .and_then(|builder| builder.build())
        .map_err(|err| format!("failed to own {BUS_NAME}: {err}"))?;
    info!("Serving {BUS_NAME}");

    for signal in signals {
        if let Err(err) = emit(&connection, &signal) {
            error!("Failed to emit {signal:?}: {err}");
        }
    }
    Ok(())
}

fn emit(connection: &Connection, signal: &ServiceSignal) -> zbus::Result<()> {
    match signal {
        ServiceSignal::Closed { id, reason } => connection.emit_signal(
            None::<&str>,
            OBJECT_PATH,
            INTERFACE,
            "NotificationClosed",
            &(*id, *reason),
        ),
        ServiceSignal::ActionInvoked { id, key } => connection.emit_signal(
            None::<&str>,
            OBJECT_PATH,
            INTERFACE,
            "ActionInvoked",
            &(*id, key.as_str()),
        ),
    }
}
