// StatusNotifierItem tray: item model, pixmap decoding and the host subscription.
pub mod host;

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;

use iced::Subscription;
use iced::futures::channel::mpsc as channel;
use iced::futures::{StreamExt, future, stream};
use iced::mouse;
use iced::widget::image;
use log::{debug, error};
use zbus::zvariant::{OwnedValue, Value};

use crate::bar::Message;
use crate::outbox::Outbox;
use crate::panels::gauges::gauge::GaugeInput;

pub const DEFAULT_ITEM_PATH: &str = "/StatusNotifierItem";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ItemStatus {
    Passive,
    #[default]
    Active,
    NeedsAttention,
}

impl ItemStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Passive" => Self::Passive,
            "NeedsAttention" => Self::NeedsAttention,
            _ => Self::Active,
        }
    }
}

/// Decoded icon in RGBA order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pixmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// One registered item as the bar renders it.
#[derive(Debug, Clone)]
pub struct TrayItem {
    /// Bus name followed by object path, e.g. `:1.42/StatusNotifierItem`.
    pub id: String,
    pub app_id: String,
    pub title: String,
    pub tooltip: Option<String>,
    pub status: ItemStatus,
    pub icon_name: Option<String>,
    pub icon: Option<image::Handle>,
    pub item_is_menu: bool,
}

impl TrayItem {
    /// Hover text: tooltip, then title, then the application id.
    pub fn label(&self) -> &str {
        [self.tooltip.as_deref(), Some(self.title.as_str()), Some(self.app_id.as_str())]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }

    /// Single glyph shown when the item has no usable pixmap.
    pub fn glyph(&self) -> String {
        let source = [self.icon_name.as_deref(), Some(self.app_id.as_str()), Some(self.title.as_str())]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
            .unwrap_or("?");
        source
            .trim()
            .chars()
            .next()
            .map(|first| first.to_uppercase().collect())
            .unwrap_or_else(|| "?".to_string())
    }
}

/// Methods the bar asks an item to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrayAction {
    Activate { x: i32, y: i32 },
    SecondaryActivate { x: i32, y: i32 },
    ContextMenu { x: i32, y: i32 },
    Scroll { delta: i32 },
}

impl TrayAction {
    /// Items flagged as menus only get a context menu on a primary click.
    pub fn for_input(input: GaugeInput, item_is_menu: bool, x: i32, y: i32) -> Option<Self> {
        match input {
            GaugeInput::Button(mouse::Button::Left) if item_is_menu => {
                Some(Self::ContextMenu { x, y })
            }
            GaugeInput::Button(mouse::Button::Left) => Some(Self::Activate { x, y }),
            GaugeInput::Button(mouse::Button::Middle) => Some(Self::SecondaryActivate { x, y }),
            GaugeInput::Button(mouse::Button::Right) => Some(Self::ContextMenu { x, y }),
            GaugeInput::Button(_) => None,
            GaugeInput::ScrollUp => Some(Self::Scroll { delta: -1 }),
            GaugeInput::ScrollDown => Some(Self::Scroll { delta: 1 }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayRequest {
    pub id: String,
    pub action: TrayAction,
}

/// Sending half the host thread drains for click requests.
#[derive(Debug, Clone)]
pub struct TrayLink(mpsc::Sender<host::HostEvent>);

impl TrayLink {
    pub fn send(&self, request: TrayRequest) {
        if self.0.send(host::HostEvent::Request(request)).is_err() {
            debug!("Tray host is not running; request dropped");
        }
    }
}

/// UI-side tray state.
#[derive(Debug, Default)]
pub struct TrayState {
    pub items: Vec<TrayItem>,
    pub link: Option<TrayLink>,
}

impl TrayState {
    pub fn visible_items(&self, show_passive: bool) -> impl Iterator<Item = &TrayItem> {
        self.items
            .iter()
            .filter(move |item| show_passive || item.status != ItemStatus::Passive)
    }

    pub fn click(&self, id: &str, input: GaugeInput, x: i32, y: i32) {
        let Some(item) = self.items.iter().find(|item| item.id == id) else {
            debug!("Click on vanished tray item {id}");
            return;
        };
        let Some(action) = TrayAction::for_input(input, item.item_is_menu, x, y) else {
            return;
        };
        match &self.link {
            Some(link) => link.send(TrayRequest {
                id: id.to_string(),
                action,
            }),
            None => debug!("Tray host not ready; {action:?} on {id} dropped"),
        }
    }
}

/// Canonical id for a `RegisterStatusNotifierItem(service)` call from `sender`.
pub fn item_identifier(sender: Option<&str>, service: &str) -> Option<String> {
    let service = service.trim();
    if service.starts_with('/') {
        return sender
            .filter(|sender| !sender.is_empty())
            .map(|sender| format!("{sender}{service}"));
    }
    if service.is_empty() {
        return None;
    }
    if service.contains('/') {
        return Some(service.to_string());
    }
    Some(format!("{service}{DEFAULT_ITEM_PATH}"))
}

/// Split an item id into bus name and object path.
pub fn split_identifier(id: &str) -> Option<(&str, &str)> {
    match id.find('/') {
        Some(0) => None,
        Some(index) => Some(id.split_at(index)),
        None if id.is_empty() => None,
        None => Some((id, DEFAULT_ITEM_PATH)),
    }
}

fn unwrap_variant<'a, 'v>(value: &'a Value<'v>) -> &'a Value<'v> {
    match value {
        Value::Value(inner) => unwrap_variant(inner),
        other => other,
    }
}

fn string_value(value: &Value<'_>) -> Option<String> {
    match unwrap_variant(value) {
        Value::Str(text) => Some(text.to_string()),
        Value::ObjectPath(path) => Some(path.to_string()),
        _ => None,
    }
}

fn byte_values(value: &Value<'_>) -> Option<Vec<u8>> {
    match unwrap_variant(value) {
        Value::Array(bytes) => bytes
            .iter()
            .map(|byte| match byte {
                Value::U8(byte) => Some(*byte),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

/// Raw `(width, height, ARGB32)` entries of an `a(iiay)` value, skipping malformed ones.
pub fn raw_pixmaps(value: &Value<'_>) -> Vec<(i32, i32, Vec<u8>)> {
    let Value::Array(entries) = unwrap_variant(value) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let Value::Structure(fields) = entry else {
                return None;
            };
            match fields.fields() {
                [Value::I32(width), Value::I32(height), data] => {
                    Some((*width, *height, byte_values(data)?))
                }
                _ => None,
            }
        })
        .filter(|(width, height, data)| {
            *width > 0 && *height > 0 && data.len() >= (*width as usize) * (*height as usize) * 4
        })
        .collect()
}

/// Smallest pixmap covering `size`, otherwise the largest one; converted to RGBA.
pub fn best_pixmap(pixmaps: Vec<(i32, i32, Vec<u8>)>, size: u32) -> Option<Pixmap> {
    let wanted = i64::from(size) * i64::from(size);
    let (width, height, mut data) = pixmaps.into_iter().max_by_key(|(width, height, _)| {
        let area = i64::from(*width) * i64::from(*height);
        if area >= wanted { (1, -area) } else { (0, area) }
    })?;

    data.truncate((width as usize) * (height as usize) * 4);
    // Network byte order ARGB to RGBA.
    for pixel in data.chunks_exact_mut(4) {
        pixel.rotate_left(1);
    }
    Some(Pixmap {
        width: width as u32,
        height: height as u32,
        rgba: data,
    })
}

/// Title and description of a `(sa(iiay)ss)` tooltip.
fn tooltip_text(value: &Value<'_>) -> Option<String> {
    let Value::Structure(fields) = unwrap_variant(value) else {
        return None;
    };
    let title = fields.fields().get(2).and_then(string_value).unwrap_or_default();
    let body = fields.fields().get(3).and_then(string_value).unwrap_or_default();
    match (title.trim(), body.trim()) {
        ("", "") => None,
        (title, "") => Some(title.to_string()),
        ("", body) => Some(body.to_string()),
        (title, body) => Some(format!("{title}\n{body}")),
    }
}

/// Build an item from its `org.kde.StatusNotifierItem` properties.
pub fn item_from_properties(
    id: &str,
    properties: &HashMap<String, OwnedValue>,
    icon_size: u32,
) -> TrayItem {
    let text = |key: &str| properties.get(key).and_then(|value| string_value(value));
    let pixmap = properties
        .get("IconPixmap")
        .and_then(|value| best_pixmap(raw_pixmaps(value), icon_size));
    let item_is_menu = properties
        .get("ItemIsMenu")
        .map(|value| matches!(unwrap_variant(value), Value::Bool(true)))
        .unwrap_or(false);

    TrayItem {
        id: id.to_string(),
        app_id: text("Id").unwrap_or_default(),
        title: text("Title").unwrap_or_default(),
        tooltip: properties.get("ToolTip").and_then(|value| tooltip_text(value)),
        status: ItemStatus::parse(&text("Status").unwrap_or_default()),
        icon_name: text("IconName").filter(|name| !name.is_empty()),
        icon: pixmap.map(|pixmap| image::Handle::from_rgba(pixmap.width, pixmap.height, pixmap.rgba)),
        item_is_menu,
    }
}

pub fn subscription() -> Subscription<Message> {
    Subscription::run(tray_stream)
}

fn tray_stream() -> impl iced::futures::Stream<Item = Message> {
    let (sender, receiver) = channel::channel(4);
    let (event_tx, event_rx) = mpsc::channel();
    let link = TrayLink(event_tx.clone());

    thread::spawn(move || {
        if let Err(err) = host::run(event_tx, event_rx, Outbox::new(sender)) {
            error!("Tray host unavailable: {err}");
        }
    });

    stream::once(future::ready(Message::TrayReady(link))).chain(receiver)
}
