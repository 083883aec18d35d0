// Desktop notifications: D-Bus service bridge, history store and the popup surface.
// Consumes Settings: halcyon.notifications.max_popups, halcyon.notifications.popup_width,
// halcyon.notifications.summary_chars, halcyon.notifications.body_chars.
pub mod service;
pub mod store;

use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use iced::font::Weight;
use iced::futures::channel::mpsc::unbounded;
use iced::futures::{StreamExt, future, stream};
use iced::widget::{Column, Row, Space, Text, button, container, text};
use iced::{Border, Element, Font, Length, Subscription, Task, Theme, alignment, window};
use iced_layershell::reexport::{
    Anchor, KeyboardInteractivity, Layer, NewLayerShellSettings, OutputOption,
};
use log::{debug, error};

use crate::bar::{BarState, Message, close_window_task};
use crate::dialog::common::{self, BorderSettings};
use crate::settings;
use service::{ServiceEvent, ServiceSignal};
use store::{
    DEFAULT_BODY_CHARS, DEFAULT_SUMMARY_CHARS, Notification, NotificationStore,
    REASON_CLOSED_BY_CALL, REASON_DISMISSED, Urgency,
};

const DEFAULT_MAX_POPUPS: usize = 3;
const DEFAULT_POPUP_WIDTH: u32 = 360;
const CARD_HEIGHT: u32 = 96;
const CARD_SPACING: u32 = 8;
const SURFACE_MARGIN: i32 = 8;
const CLOSE_GLYPH: &str = "󰅙";

/// Sending half of the channel the service thread drains to emit D-Bus signals.
#[derive(Debug, Clone)]
pub struct NotificationLink(mpsc::Sender<ServiceSignal>);

impl NotificationLink {
    fn send(&self, signal: ServiceSignal) {
        if self.0.send(signal).is_err() {
            debug!("Notification service is not running; signal dropped");
        }
    }
}

/// UI-side notification state.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    pub store: NotificationStore,
    pub link: Option<NotificationLink>,
    pub popup_window: Option<window::Id>,
}

impl NotificationCenter {
    pub fn new(max_stored: usize) -> Self {
        Self {
            store: NotificationStore::new(max_stored),
            ..Self::default()
        }
    }

    fn signal(&self, signal: ServiceSignal) {
        if let Some(link) = &self.link {
            link.send(signal);
        }
    }

    /// Apply a request from the bus.
    pub fn receive(&mut self, event: ServiceEvent, now: Instant) {
        match event {
            ServiceEvent::Received(notification) => {
                debug!(
                    "Notification {} from '{}': {}",
                    notification.id, notification.app_name, notification.summary
                );
                self.store.add(notification, now);
            }
            ServiceEvent::CloseRequested(id) => {
                if self.store.dismiss(id) {
                    self.signal(ServiceSignal::Closed {
                        id,
                        reason: REASON_CLOSED_BY_CALL,
                    });
                }
            }
        }
    }

    pub fn dismiss(&mut self, id: u32) {
        if self.store.dismiss(id) {
            self.signal(ServiceSignal::Closed {
                id,
                reason: REASON_DISMISSED,
            });
        }
    }

    pub fn invoke_action(&mut self, id: u32, key: String) {
        if self.store.get(id).is_none() {
            return;
        }
        self.signal(ServiceSignal::ActionInvoked { id, key });
        self.dismiss(id);
    }

    pub fn clear_all(&mut self) {
        for id in self.store.dismiss_all() {
            self.signal(ServiceSignal::Closed {
                id,
                reason: REASON_DISMISSED,
            });
        }
    }

    pub fn set_dnd(&mut self, dnd: bool) {
        self.store.set_dnd(dnd);
    }
}

/// Owns the bus name on a background thread and forwards its requests to the UI.
pub fn subscription() -> Subscription<Message> {
    Subscription::run(notification_stream)
}

fn notification_stream() -> impl iced::futures::Stream<Item = Message> {
    let (event_tx, event_rx) = unbounded();
    let (signal_tx, signal_rx) = mpsc::channel();

    thread::spawn(move || {
        if let Err(err) = service::serve(event_tx, signal_rx) {
            error!("Notification service unavailable: {err}");
        }
    });

    stream::once(future::ready(Message::NotificationsReady(NotificationLink(
        signal_tx,
    ))))
    .chain(event_rx.map(Message::Notification))
}

fn max_popups() -> usize {
    settings::settings().get_parsed_or("halcyon.notifications.max_popups", DEFAULT_MAX_POPUPS)
}

fn surface_size(count: usize) -> (u32, u32) {
    let width = settings::settings()
        .get_parsed_or("halcyon.notifications.popup_width", DEFAULT_POPUP_WIDTH);
    let count = count.max(1) as u32;
    (width, count * CARD_HEIGHT + (count - 1) * CARD_SPACING)
}

/// Open, resize or close the popup surface to match the visible popups.
pub fn sync_popup_window(state: &mut BarState) -> Task<Message> {
    let count = if state.notifications.store.has_popups() {
        state
            .notifications
            .store
            .visible_popups(max_popups())
            .len()
    } else {
        0
    };

    match (count, state.notifications.popup_window) {
        (0, None) => Task::none(),
        (0, Some(window)) => {
            state.notifications.popup_window = None;
            state.closing_dialogs.insert(window);
            close_window_task(window)
        }
        (count, Some(window)) => Task::done(Message::SizeChange {
            id: window,
            size: surface_size(count),
        }),
        (count, None) => {
            let id = window::Id::unique();
            state.notifications.popup_window = Some(id);
            Task::done(Message::NewLayerShell {
                settings: NewLayerShellSettings {
                    size: Some(surface_size(count)),
                    layer: Layer::Overlay,
                    anchor: Anchor::Top | Anchor::Right,
                    exclusive_zone: Some(0),
                    margin: Some((SURFACE_MARGIN, SURFACE_MARGIN, 0, 0)),
                    keyboard_interactivity: KeyboardInteractivity::None,
                    output_option: OutputOption::None,
                    events_transparent: false,
                    namespace: Some(format!("{}-notifications", BarState::namespace())),
                },
                id,
            })
        }
    }
}

/// Expire popups whose timeout passed.
pub fn tick(state: &mut BarState, now: Instant) -> Task<Message> {
    if state.notifications.store.expire_popups(now) {
        return sync_popup_window(state);
    }
    Task::none()
}

fn bold() -> Font {
    Font {
        weight: Weight::Bold,
        ..Font::DEFAULT
    }
}

/// One notification rendered as a card. Shared by the popups and the control center list.
pub fn notification_card(notification: &Notification) -> Element<'_, Message> {
    let settings = settings::settings();
    let summary_chars =
        settings.get_parsed_or("halcyon.notifications.summary_chars", DEFAULT_SUMMARY_CHARS);
    let body_chars = settings.get_parsed_or("halcyon.notifications.body_chars", DEFAULT_BODY_CHARS);
    let critical = notification.urgency == Urgency::Critical;
    let id = notification.id;

    let header = Row::new()
        .align_y(alignment::Vertical::Center)
        .push(
            Text::new(notification.app_name.as_str())
                .size(11)
                .width(Length::Fill)
                .style(|theme: &Theme| text::Style {
                    color: Some(theme.extended_palette().background.strong.text),
                }),
        )
        .push(
            button(Text::new(CLOSE_GLYPH).size(14))
                .padding([0, 4])
                .style(common::hover_button_style)
                .on_press(Message::NotificationDismissed(id)),
        );

    let mut content = Column::new()
        .spacing(4)
        .push(header)
        .push(
            Text::new(notification.display_summary(summary_chars))
                .size(14)
                .font(bold()),
        );
    if !notification.body.trim().is_empty() {
        content = content.push(Text::new(notification.display_body(body_chars)).size(12));
    }
    if !notification.actions.is_empty() {
        let actions = notification.actions.iter().fold(
            Row::new().spacing(6),
            |row, action| {
                row.push(
                    button(Text::new(action.label.as_str()).size(12))
                        .padding([2, 8])
                        .style(common::hover_button_style)
                        .on_press(Message::NotificationAction {
                            id,
                            key: action.key.clone(),
                        }),
                )
            },
        );
        content = content.push(Space::new().height(Length::Fill)).push(actions);
    }

    container(content)
        .padding([8, 10])
        .width(Length::Fill)
        .style(move |theme: &Theme| {
            let palette = theme.extended_palette();
            let accent = if critical {
                palette.danger.base.color
            } else {
                palette.primary.weak.color
            };
            container::Style {
                background: Some(palette.background.weak.color.into()),
                text_color: Some(theme.palette().text),
                border: Border::default().rounded(6.0).width(1.0).color(accent),
                ..container::Style::default()
            }
        })
        .into()
}

pub fn popup_view(state: &BarState) -> Element<'_, Message> {
    let popups = state.notifications.store.visible_popups(max_popups());
    let cards = popups.into_iter().fold(
        Column::new().spacing(CARD_SPACING as f32),
        |column, notification| {
            column.push(
                container(notification_card(notification))
                    .height(Length::Fixed(CARD_HEIGHT as f32)),
            )
        },
    );
    common::stack_with_border(
        container(cards).width(Length::Fill).height(Length::Fill),
        BorderSettings::load(),
        common::floating_border_sides(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: u32) -> Notification {
        Notification {
            id,
            app_name: "test".into(),
            summary: "hello".into(),
            body: String::new(),
            actions: Notification::actions_from_flat(&["default".into(), "Open".into()]),
            urgency: Urgency::Normal,
            expire_timeout: -1,
        }
    }

    fn linked_center() -> (NotificationCenter, mpsc::Receiver<ServiceSignal>) {
        let (tx, rx) = mpsc::channel();
        let mut center = NotificationCenter::new(10);
        center.link = Some(NotificationLink(tx));
        (center, rx)
    }

    #[test]
    fn close_request_emits_closed_by_call() {
        let (mut center, rx) = linked_center();
        let now = Instant::now();
        center.receive(ServiceEvent::Received(notification(4)), now);
        center.receive(ServiceEvent::CloseRequested(4), now);
        center.receive(ServiceEvent::CloseRequested(4), now);

        let signals: Vec<ServiceSignal> = rx.try_iter().collect();
        assert_eq!(
            signals,
            vec![ServiceSignal::Closed {
                id: 4,
                reason: REASON_CLOSED_BY_CALL
            }]
        );
        assert!(center.store.is_empty());
    }

    #[test]
    fn action_invocation_signals_then_dismisses() {
        let (mut center, rx) = linked_center();
        center.receive(ServiceEvent::Received(notification(7)), Instant::now());
        center.invoke_action(7, "default".into());
        center.invoke_action(7, "default".into());

        let signals: Vec<ServiceSignal> = rx.try_iter().collect();
        assert_eq!(
            signals,
            vec![
                ServiceSignal::ActionInvoked {
                    id: 7,
                    key: "default".into()
                },
                ServiceSignal::Closed {
                    id: 7,
                    reason: REASON_DISMISSED
                },
            ]
        );
    }

    #[test]
    fn clear_all_reports_every_id() {
        let (mut center, rx) = linked_center();
        let now = Instant::now();
        for id in 1..=3 {
            center.receive(ServiceEvent::Received(notification(id)), now);
        }
        center.clear_all();
        let mut closed: Vec<u32> = rx
            .try_iter()
            .filter_map(|signal| match signal {
                ServiceSignal::Closed { id, .. } => Some(id),
                ServiceSignal::ActionInvoked { .. } => None,
            })
            .collect();
        closed.sort_unstable();
        assert_eq!(closed, vec![1, 2, 3]);
    }

    #[test]
    fn works_without_a_running_service() {
        let mut center = NotificationCenter::new(10);
        center.receive(ServiceEvent::Received(notification(1)), Instant::now());
        center.dismiss(1);
        assert!(center.store.is_empty());
    }
}
