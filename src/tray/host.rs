// StatusNotifierWatcher (when nobody else runs one) and the StatusNotifierHost loop.
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, info, warn};
use zbus::blocking::fdo::DBusProxy;
use zbus::blocking::{Connection, MessageIterator, Proxy};
use zbus::fdo::{RequestNameFlags, RequestNameReply};
use zbus::message::Header;
use zbus::names::BusName;
use zbus::zvariant::OwnedValue;
use zbus::{MatchRule, Message, SignalContext, interface};

use super::{TrayAction, TrayItem, TrayRequest, item_from_properties, item_identifier, split_identifier};
use crate::bar::Message as BarMessage;
use crate::outbox::{self, Delivery, Outbox};
use crate::settings;

const WATCHER_NAME: &str = "org.kde.StatusNotifierWatcher";
const WATCHER_PATH: &str = "/StatusNotifierWatcher";
const ITEM_INTERFACE: &str = "org.kde.StatusNotifierItem";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const DBUS_INTERFACE: &str = "org.freedesktop.DBus";
const REFRESH_SIGNALS: &[&str] = &[
    "NewIcon",
    "NewTitle",
    "NewStatus",
    "NewToolTip",
    "NewAttentionIcon",
    "NewIconThemePath",
];
const SIGNAL_QUEUE: usize = 64;
pub const DEFAULT_ICON_SIZE: u32 = 16;

/// Everything the host loop reacts to.
#[derive(Debug)]
pub enum HostEvent {
    Registered(String),
    Unregistered(String),
    /// An item signalled a property change.
    Changed { sender: String, path: String },
    /// A bus name lost its owner.
    NameVanished(String),
    Request(TrayRequest),
}

type Registry = Arc<Mutex<Vec<String>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, Vec<String>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Watcher {
    items: Registry,
    hosts: HashSet<String>,
    events: Sender<HostEvent>,
}

#[interface(name = "org.kde.StatusNotifierWatcher")]
impl Watcher {
    async fn register_status_notifier_item(
        &mut self,
        service: &str,
        #[zbus(header)] header: Header<'_>,
        #[zbus(signal_context)] ctx: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        let sender = header.sender().map(|name| name.as_str());
        let id = item_identifier(sender, service).ok_or_else(|| {
            zbus::fdo::Error::InvalidArgs(format!("cannot resolve item service '{service}'"))
        })?;
        {
            let mut items = lock(&self.items);
            if items.contains(&id) {
                return Ok(());
            }
            items.push(id.clone());
        }
        debug!("Tray item registered: {id}");
        if self.events.send(HostEvent::Registered(id.clone())).is_err() {
            debug!("Tray host stopped; {id} only tracked by the watcher");
        }
        self.registered_status_notifier_items_changed(&ctx).await?;
        Self::status_notifier_item_registered(&ctx, &id).await?;
        Ok(())
    }

    async fn register_status_notifier_host(
        &mut self,
        service: &str,
        #[zbus(signal_context)] ctx: SignalContext<'_>,
    ) -> zbus::fdo::Result<()> {
        if !self.hosts.insert(service.to_string()) {
            return Ok(());
        }
        debug!("Tray host registered: {service}");
        if self.hosts.len() == 1 {
            self.is_status_notifier_host_registered_changed(&ctx).await?;
        }
        Self::status_notifier_host_registered(&ctx).await?;
        Ok(())
    }

    #[zbus(property)]
    fn registered_status_notifier_items(&self) -> Vec<String> {
        lock(&self.items).clone()
    }

    #[zbus(property)]
    fn is_status_notifier_host_registered(&self) -> bool {
        !self.hosts.is_empty()
    }

    #[zbus(property)]
    fn protocol_version(&self) -> i32 {
        0
    }

    #[zbus(signal)]
    async fn status_notifier_item_registered(
        ctx: &SignalContext<'_>,
        service: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_notifier_item_unregistered(
        ctx: &SignalContext<'_>,
        service: &str,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_notifier_host_registered(ctx: &SignalContext<'_>) -> zbus::Result<()>;
}

/// Serve the watcher unless another process owns the name. Returns whether we own it.
fn serve_watcher(
    connection: &Connection,
    registry: &Registry,
    events: &Sender<HostEvent>,
) -> Result<bool, String> {
    let watcher = Watcher {
        items: registry.clone(),
        hosts: HashSet::new(),
        events: events.clone(),
    };
    connection
        .object_server()
        .at(WATCHER_PATH, watcher)
        .map_err(|err| format!("failed to export {WATCHER_PATH}: {err}"))?;

    match connection.request_name_with_flags(WATCHER_NAME, RequestNameFlags::DoNotQueue.into()) {
        Ok(RequestNameReply::PrimaryOwner | RequestNameReply::AlreadyOwner) => {
            info!("Serving {WATCHER_NAME}");
            Ok(true)
        }
        outcome => {
            info!("Using the running {WATCHER_NAME} ({outcome:?})");
            if let Err(err) = connection.object_server().remove::<Watcher, _>(WATCHER_PATH) {
                warn!("Failed to withdraw {WATCHER_PATH}: {err}");
            }
            Ok(false)
        }
    }
}

/// Forward signals of `interface` that `to_event` accepts until the host loop goes away.
fn relay_signals(
    connection: &Connection,
    interface: &'static str,
    events: Sender<HostEvent>,
    to_event: fn(&Message) -> Option<HostEvent>,
) -> Result<(), String> {
    let rule = MatchRule::builder()
        .msg_type(zbus::message::Type::Signal)
        .interface(interface)
        .map_err(|err| err.to_string())?
        .build();
    let messages = MessageIterator::for_match_rule(rule, connection, Some(SIGNAL_QUEUE))
        .map_err(|err| format!("failed to watch {interface}: {err}"))?;
    thread::spawn(move || {
        for message in messages.flatten() {
            if let Some(event) = to_event(&message)
                && events.send(event).is_err()
            {
                return;
            }
        }
    });
    Ok(())
}

fn item_signal(message: &Message) -> Option<HostEvent> {
    let header = message.header();
    let member = header.member()?;
    if !REFRESH_SIGNALS.contains(&member.as_str()) {
        return None;
    }
    Some(HostEvent::Changed {
        sender: header.sender()?.to_string(),
        path: header.path()?.to_string(),
    })
}

fn watcher_signal(message: &Message) -> Option<HostEvent> {
    let header = message.header();
    let member = header.member()?.to_string();
    let id: String = message.body().deserialize().ok()?;
    match member.as_str() {
        "StatusNotifierItemRegistered" => Some(HostEvent::Registered(id)),
        "StatusNotifierItemUnregistered" => Some(HostEvent::Unregistered(id)),
        _ => None,
    }
}

fn name_signal(message: &Message) -> Option<HostEvent> {
    if message.header().member()?.as_str() != "NameOwnerChanged" {
        return None;
    }
    let (name, _old_owner, new_owner): (String, String, String) =
        message.body().deserialize().ok()?;
    new_owner.is_empty().then_some(HostEvent::NameVanished(name))
}

/// One tracked item and where it lives on the bus.
#[derive(Debug, Clone)]
struct Entry {
    item: TrayItem,
    bus: String,
    path: String,
    /// Unique name behind `bus`; item signals carry this as their sender.
    owner: String,
}

/// Items in registration order.
#[derive(Debug, Default)]
struct Entries(Vec<Entry>);

impl Entries {
    /// A repeated registration refreshes the entry in place.
    fn upsert(&mut self, entry: Entry) {
        match self.0.iter_mut().find(|known| known.item.id == entry.item.id) {
            Some(known) => *known = entry,
            None => self.0.push(entry),
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|entry| entry.item.id != id);
        self.0.len() != before
    }

    /// Drop every entry served by `name`, returning their ids.
    fn remove_vanished(&mut self, name: &str) -> Vec<String> {
        let (gone, kept): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut self.0)
            .into_iter()
            .partition(|entry| entry.bus == name || entry.owner == name);
        self.0 = kept;
        gone.into_iter().map(|entry| entry.item.id).collect()
    }

    fn signalled_by(&self, sender: &str, path: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|entry| entry.owner == sender && entry.path == path)
            .map(|entry| entry.item.id.clone())
            .collect()
    }

    fn find(&self, id: &str) -> Option<&Entry> {
        self.0.iter().find(|entry| entry.item.id == id)
    }

    fn snapshot(&self) -> Vec<TrayItem> {
        self.0.iter().map(|entry| entry.item.clone()).collect()
    }
}

struct Host {
    connection: Connection,
    registry: Registry,
    own_watcher: bool,
    entries: Entries,
    icon_size: u32,
}

impl Host {
    /// Returns whether the visible item list changed.
    fn apply(&mut self, event: HostEvent) -> bool {
        match event {
            HostEvent::Registered(id) => self.load(&id),
            HostEvent::Unregistered(id) => self.entries.remove(&id),
            HostEvent::Changed { sender, path } => {
                let ids = self.entries.signalled_by(&sender, &path);
                ids.iter().fold(false, |changed, id| self.load(id) || changed)
            }
            HostEvent::NameVanished(name) => {
                let gone = self.entries.remove_vanished(&name);
                if self.own_watcher {
                    self.unregister(&gone);
                }
                !gone.is_empty()
            }
            HostEvent::Request(request) => {
                self.dispatch(request);
                false
            }
        }
    }

    fn load(&mut self, id: &str) -> bool {
        let Some((bus, path)) = split_identifier(id) else {
            warn!("Ignoring tray item with malformed id '{id}'");
            return false;
        };
        let (bus, path) = (bus.to_string(), path.to_string());
        match self.fetch(id, &bus, &path) {
            Ok(item) => {
                let owner = self.owner_of(&bus);
                self.entries.upsert(Entry {
                    item,
                    bus,
                    path,
                    owner,
                });
                true
            }
            Err(err) => {
                debug!("Tray item {id} unreadable: {err}");
                self.entries.remove(id)
            }
        }
    }

    fn fetch(&self, id: &str, bus: &str, path: &str) -> zbus::Result<TrayItem> {
        let properties = Proxy::new(&self.connection, bus, path, PROPERTIES_INTERFACE)?;
        let values: HashMap<String, OwnedValue> = properties.call("GetAll", &(ITEM_INTERFACE,))?;
        Ok(item_from_properties(id, &values, self.icon_size))
    }

    fn owner_of(&self, bus: &str) -> String {
        if bus.starts_with(':') {
            return bus.to_string();
        }
        let owner = BusName::try_from(bus)
            .map_err(zbus::Error::from)
            .and_then(|name| {
                DBusProxy::new(&self.connection)?
                    .get_name_owner(name)
                    .map_err(zbus::Error::from)
            });
        match owner {
            Ok(owner) => owner.to_string(),
            Err(err) => {
                debug!("No owner for {bus}: {err}");
                bus.to_string()
            }
        }
    }

    fn unregister(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        lock(&self.registry).retain(|id| !ids.contains(id));
        for id in ids {
            debug!("Tray item vanished: {id}");
            if let Err(err) = self.connection.emit_signal(
                None::<&str>,
                WATCHER_PATH,
                WATCHER_NAME,
                "StatusNotifierItemUnregistered",
                &(id.as_str(),),
            ) {
                warn!("Failed to announce removal of {id}: {err}");
            }
        }
    }

    /// Item calls can block on a stuck client, so each runs on its own thread.
    fn dispatch(&self, request: TrayRequest) {
        let Some(entry) = self.entries.find(&request.id) else {
            debug!("Tray request for unknown item {}", request.id);
            return;
        };
        let connection = self.connection.clone();
        let (bus, path) = (entry.bus.clone(), entry.path.clone());
        thread::spawn(move || {
            if let Err(err) = invoke(&connection, &bus, &path, &request.action) {
                warn!("Tray {:?} on {} failed: {err}", request.action, request.id);
            }
        });
    }
}

fn invoke(connection: &Connection, bus: &str, path: &str, action: &TrayAction) -> zbus::Result<()> {
    let item = Proxy::new(connection, bus, path, ITEM_INTERFACE)?;
    match *action {
        // Menu-only items often reject Activate.
        TrayAction::Activate { x, y } => item
            .call_method("Activate", &(x, y))
            .or_else(|_| item.call_method("ContextMenu", &(x, y)))
            .map(|_| ()),
        TrayAction::SecondaryActivate { x, y } => {
            item.call_method("SecondaryActivate", &(x, y)).map(|_| ())
        }
        TrayAction::ContextMenu { x, y } => item.call_method("ContextMenu", &(x, y)).map(|_| ()),
        TrayAction::Scroll { delta } => item.call_method("Scroll", &(delta, "vertical")).map(|_| ()),
    }
}

fn publish(outbox: &mut Outbox<BarMessage>, items: Vec<TrayItem>) -> bool {
    let delivery = match outbox.push(BarMessage::Tray(items), outbox::latest) {
        Delivery::Parked => outbox.settle(),
        delivery => delivery,
    };
    delivery != Delivery::Closed
}

/// Own the host name, attach to a watcher and publish item snapshots until the bar goes away.
pub fn run(
    events_tx: Sender<HostEvent>,
    events: Receiver<HostEvent>,
    mut outbox: Outbox<BarMessage>,
) -> Result<(), String> {
    let connection = Connection::session().map_err(|err| format!("session bus: {err}"))?;
    let registry: Registry = Arc::default();
    let own_watcher = serve_watcher(&connection, &registry, &events_tx)?;

    let host_name = format!("org.kde.StatusNotifierHost-{}", std::process::id());
    connection
        .request_name(host_name.as_str())
        .map_err(|err| format!("failed to own {host_name}: {err}"))?;

    relay_signals(&connection, DBUS_INTERFACE, events_tx.clone(), name_signal)?;
    relay_signals(&connection, ITEM_INTERFACE, events_tx.clone(), item_signal)?;
    if !own_watcher {
        relay_signals(&connection, WATCHER_NAME, events_tx.clone(), watcher_signal)?;
    }

    let watcher = Proxy::new(&connection, WATCHER_NAME, WATCHER_PATH, WATCHER_NAME)
        .map_err(|err| err.to_string())?;
    if let Err(err) = watcher.call_method("RegisterStatusNotifierHost", &(host_name.as_str(),)) {
        warn!("Watcher refused host registration: {err}");
    }
    let known: Vec<String> = watcher
        .get_property("RegisteredStatusNotifierItems")
        .unwrap_or_default();
    info!("Tray host {host_name} ready with {} item(s)", known.len());

    let mut host = Host {
        connection,
        registry,
        own_watcher,
        entries: Entries::default(),
        icon_size: settings::settings()
            .get_parsed_or("halcyon.panel.tray.icon_size", DEFAULT_ICON_SIZE),
    };
    for id in known {
        host.apply(HostEvent::Registered(id));
    }
    if !publish(&mut outbox, host.entries.snapshot()) {
        return Ok(());
    }

    for event in events {
        if host.apply(event) && !publish(&mut outbox, host.entries.snapshot()) {
            return Ok(());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tray::ItemStatus;

    fn entry(id: &str, owner: &str) -> Entry {
        let (bus, path) = split_identifier(id).expect("valid id");
        Entry {
            item: TrayItem {
                id: id.to_string(),
                app_id: String::new(),
                title: id.to_string(),
                tooltip: None,
                status: ItemStatus::Active,
                icon_name: None,
                icon: None,
                item_is_menu: false,
            },
            bus: bus.to_string(),
            path: path.to_string(),
            owner: owner.to_string(),
        }
    }

    fn ids(entries: &Entries) -> Vec<String> {
        entries.snapshot().into_iter().map(|item| item.id).collect()
    }

    #[test]
    fn reregistration_keeps_the_original_position() {
        let mut entries = Entries::default();
        entries.upsert(entry(":1.4/StatusNotifierItem", ":1.4"));
        entries.upsert(entry(":1.9/StatusNotifierItem", ":1.9"));

        let mut renamed = entry(":1.4/StatusNotifierItem", ":1.4");
        renamed.item.title = "Renamed".into();
        entries.upsert(renamed);

        assert_eq!(
            ids(&entries),
            vec![":1.4/StatusNotifierItem", ":1.9/StatusNotifierItem"]
        );
        assert_eq!(entries.snapshot()[0].title, "Renamed");
    }

    #[test]
    fn vanished_names_drop_items_by_bus_name_or_owner() {
        let mut entries = Entries::default();
        entries.upsert(entry("org.kde.StatusNotifierItem-7-1/StatusNotifierItem", ":1.7"));
        entries.upsert(entry(":1.8/org/ayatana/NotificationItem/a", ":1.8"));
        entries.upsert(entry(":1.8/org/ayatana/NotificationItem/b", ":1.8"));

        assert_eq!(
            entries.remove_vanished(":1.8"),
            vec![
                ":1.8/org/ayatana/NotificationItem/a".to_string(),
                ":1.8/org/ayatana/NotificationItem/b".to_string(),
            ]
        );
        assert_eq!(entries.remove_vanished(":1.7").len(), 1);
        assert!(entries.snapshot().is_empty());
        assert!(entries.remove_vanished(":1.7").is_empty());
    }

    #[test]
    fn change_signals_match_owner_and_path() {
        let mut entries = Entries::default();
        entries.upsert(entry("org.kde.StatusNotifierItem-7-1/StatusNotifierItem", ":1.7"));
        entries.upsert(entry(":1.8/org/ayatana/NotificationItem/a", ":1.8"));

        assert_eq!(
            entries.signalled_by(":1.7", "/StatusNotifierItem"),
            vec!["org.kde.StatusNotifierItem-7-1/StatusNotifierItem".to_string()]
        );
        assert!(entries.signalled_by(":1.7", "/org/ayatana/NotificationItem/a").is_empty());
        assert!(entries.remove(":1.8/org/ayatana/NotificationItem/a"));
        assert!(!entries.remove(":1.8/org/ayatana/NotificationItem/a"));
    }
}
