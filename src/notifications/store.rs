// Notification history and popup bookkeeping; owned by the UI thread.
use std::time::{Duration, Instant};

use crate::icon::truncate_chars;

pub const DEFAULT_MAX_STORED: usize = 50;
pub const DEFAULT_SUMMARY_CHARS: usize = 40;
pub const DEFAULT_BODY_CHARS: usize = 120;
const TIMEOUT_WITH_ACTIONS: Duration = Duration::from_millis(5000);
const TIMEOUT_PLAIN: Duration = Duration::from_millis(3000);

/// `NotificationClosed` reasons.
pub const REASON_DISMISSED: u32 = 2;
pub const REASON_CLOSED_BY_CALL: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    pub fn from_hint(value: u8) -> Self {
        match value {
            0 => Urgency::Low,
            2 => Urgency::Critical,
            _ => Urgency::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub key: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u32,
    pub app_name: String,
    pub summary: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
    pub urgency: Urgency,
    /// Milliseconds requested by the client; `<= 0` lets the server decide.
    pub expire_timeout: i32,
}

impl Notification {
    /// Pair up the flat `[key, label, key, label, ..]` list from `Notify`.
    pub fn actions_from_flat(flat: &[String]) -> Vec<NotificationAction> {
        flat.chunks_exact(2)
            .map(|pair| NotificationAction {
                key: pair[0].clone(),
                label: pair[1].clone(),
            })
            .collect()
    }

    pub fn popup_timeout(&self) -> Duration {
        if self.expire_timeout > 0 {
            Duration::from_millis(self.expire_timeout as u64)
        } else if !self.actions.is_empty() {
            TIMEOUT_WITH_ACTIONS
        } else {
            TIMEOUT_PLAIN
        }
    }

    pub fn display_summary(&self, max_chars: usize) -> String {
        truncate_chars(self.summary.trim(), max_chars)
    }

    pub fn display_body(&self, max_chars: usize) -> String {
        let flattened = self.body.split_whitespace().collect::<Vec<_>>().join(" ");
        truncate_chars(&flattened, max_chars)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Popup {
    id: u32,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct NotificationStore {
    /// Newest first.
    items: Vec<Notification>,
    popups: Vec<Popup>,
    max_stored: usize,
    dnd: bool,
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STORED)
    }
}

impl NotificationStore {
    pub fn new(max_stored: usize) -> Self {
        Self {
            items: Vec::new(),
            popups: Vec::new(),
            max_stored: max_stored.max(1),
            dnd: false,
        }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: u32) -> Option<&Notification> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dnd(&self) -> bool {
        self.dnd
    }

    pub fn set_dnd(&mut self, dnd: bool) {
        self.dnd = dnd;
        if dnd {
            let items = &self.items;
            self.popups.retain(|popup| {
                items
                    .iter()
                    .any(|item| item.id == popup.id && item.urgency == Urgency::Critical)
            });
        }
    }

    /// Insert or replace by id and move it to the front. Returns `true` when a popup was
    /// queued for it.
    pub fn add(&mut self, notification: Notification, now: Instant) -> bool {
        let id = notification.id;
        self.items.retain(|item| item.id != id);
        self.popups.retain(|popup| popup.id != id);

        let show_popup = !self.dnd || notification.urgency == Urgency::Critical;
        if show_popup {
            self.popups.insert(
                0,
                Popup {
                    id,
                    expires_at: now + notification.popup_timeout(),
                },
            );
        }
        self.items.insert(0, notification);

        if self.items.len() > self.max_stored {
            let dropped: Vec<u32> = self.items.drain(self.max_stored..).map(|item| item.id).collect();
            self.popups.retain(|popup| !dropped.contains(&popup.id));
        }
        show_popup
    }

    /// Remove a notification entirely. Returns `true` if it was stored.
    pub fn dismiss(&mut self, id: u32) -> bool {
        self.popups.retain(|popup| popup.id != id);
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        self.items.len() != before
    }

    /// Remove everything, returning the ids that were dropped.
    pub fn dismiss_all(&mut self) -> Vec<u32> {
        self.popups.clear();
        self.items.drain(..).map(|item| item.id).collect()
    }

    /// Hide expired popups; the notifications stay in the history.
    pub fn expire_popups(&mut self, now: Instant) -> bool {
        let before = self.popups.len();
        self.popups.retain(|popup| popup.expires_at > now);
        self.popups.len() != before
    }

    pub fn has_popups(&self) -> bool {
        !self.popups.is_empty()
    }

    /// Newest popups first, at most `max`.
    pub fn visible_popups(&self, max: usize) -> Vec<&Notification> {
        self.popups
            .iter()
            .filter_map(|popup| self.get(popup.id))
            .take(max)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification(id: u32, urgency: Urgency) -> Notification {
        Notification {
            id,
            app_name: "test".into(),
            summary: format!("summary {id}"),
            body: "body".into(),
            actions: Vec::new(),
            urgency,
            expire_timeout: -1,
        }
    }

    #[test]
    fn replacing_keeps_one_entry_at_the_front() {
        let now = Instant::now();
        let mut store = NotificationStore::new(10);
        store.add(notification(1, Urgency::Normal), now);
        store.add(notification(2, Urgency::Normal), now);
        let mut replacement = notification(1, Urgency::Normal);
        replacement.summary = "updated".into();
        store.add(replacement, now);

        let ids: Vec<u32> = store.items().iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(store.items()[0].summary, "updated");
        assert_eq!(store.visible_popups(3).len(), 2);
    }

    #[test]
    fn history_is_capped() {
        let now = Instant::now();
        let mut store = NotificationStore::new(2);
        for id in 1..=3 {
            store.add(notification(id, Urgency::Normal), now);
        }
        let ids: Vec<u32> = store.items().iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![3, 2]);
        assert!(store.visible_popups(5).iter().all(|item| item.id != 1));
    }

    #[test]
    fn dnd_suppresses_all_but_critical_popups() {
        let now = Instant::now();
        let mut store = NotificationStore::new(10);
        store.set_dnd(true);
        assert!(!store.add(notification(1, Urgency::Normal), now));
        assert!(store.add(notification(2, Urgency::Critical), now));
        let popups: Vec<u32> = store.visible_popups(3).iter().map(|item| item.id).collect();
        assert_eq!(popups, vec![2]);
        assert_eq!(store.items().len(), 2, "suppressed notifications are still stored");
    }

    #[test]
    fn popup_timeouts_follow_client_then_actions() {
        let mut item = notification(1, Urgency::Normal);
        assert_eq!(item.popup_timeout(), Duration::from_millis(3000));
        item.actions = Notification::actions_from_flat(&["default".into(), "Open".into()]);
        assert_eq!(item.popup_timeout(), Duration::from_millis(5000));
        item.expire_timeout = 1200;
        assert_eq!(item.popup_timeout(), Duration::from_millis(1200));
    }

    #[test]
    fn expired_popups_leave_history_intact() {
        let now = Instant::now();
        let mut store = NotificationStore::new(10);
        store.add(notification(1, Urgency::Normal), now);
        assert!(store.expire_popups(now + Duration::from_secs(4)));
        assert!(!store.has_popups());
        assert!(store.get(1).is_some());

        assert!(store.dismiss(1));
        assert!(!store.dismiss(1));
    }

    #[test]
    fn display_text_is_truncated() {
        let mut item = notification(1, Urgency::Low);
        item.summary = "a".repeat(50);
        item.body = "line one\nline   two".into();
        assert_eq!(item.display_summary(40).chars().count(), 40);
        assert!(item.display_summary(40).ends_with('…'));
        assert_eq!(item.display_body(120), "line one line two");
        assert_eq!(Urgency::from_hint(2), Urgency::Critical);
        assert_eq!(Urgency::from_hint(9), Urgency::Normal);
    }
}
