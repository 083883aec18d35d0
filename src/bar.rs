// Bar application state, dialog windows, and view composition for every surface.
// Consumes Settings: halcyon.bar.height, halcyon.bar.padding_x, halcyon.bar.section_spacing,
// halcyon.gauge.ui.spacing, halcyon.bar.border.*.
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::compositor::CompositorSnapshot;
use crate::control_center::{self, ControlCenterMessage, ControlCenterState};
use crate::dialog::action::{action_view, dialog_dimensions as action_dialog_dimensions};
use crate::dialog::common::{self, BorderSettings, BorderSides};
use crate::dialog::info::{InfoDialog, dialog_dimensions as info_dialog_dimensions, info_view};
use crate::dialog::menu::{dialog_dimensions as menu_dialog_dimensions, menu_view};
use crate::notifications::service::ServiceEvent;
use crate::notifications::{self, NotificationCenter, NotificationLink};
use crate::osd::{self, OsdState};
use crate::panels::gauge_panel;
use crate::panels::gauges::gauge::{GaugeActionDialog, GaugeInput, GaugeMenu, GaugeModel};
use crate::panels::panel_registry::{self, BarItem, BarLayout};
use crate::settings;
use crate::tray::{TrayItem, TrayLink, TrayState};
use iced::alignment;
use iced::widget::{Row, Space, Stack, container, mouse_area};
use iced::{Element, Length, Task, Theme, mouse, window};
use iced_layershell::actions::IcedNewPopupSettings;
use iced_layershell::to_layer_message;

const CLICK_FILTER_WINDOW: Duration = Duration::from_millis(250);
/// Frame interval while something on screen animates.
pub const ANIMATION_TICK: Duration = Duration::from_millis(16);
/// Poll interval while only notification popups wait to expire.
pub const POPUP_TICK: Duration = Duration::from_millis(250);
pub const DEFAULT_BAR_HEIGHT: u32 = 32;

/// Application-level messages for the bar, overlays, and dialogs.
#[to_layer_message(multi)]
#[derive(Debug, Clone)]
pub enum Message {
    Compositor(CompositorSnapshot),
    WorkspaceClicked(i32),
    BackgroundClicked,
    GaugeBatch(Vec<GaugeModel>),
    GaugeClicked {
        id: String,
        input: GaugeInput,
    },
    MenuItemSelected {
        window: iced::window::Id,
        gauge_id: String,
        item_id: String,
    },
    ActionItemSelected {
        window: iced::window::Id,
        gauge_id: String,
        item_id: String,
    },
    MenuItemHoverEnter {
        window: iced::window::Id,
        item_id: String,
    },
    MenuItemHoverExit {
        window: iced::window::Id,
        item_id: String,
    },
    WindowFocusChanged {
        focused: bool,
    },
    WindowOpened(iced::window::Id),
    WindowEvent(iced::window::Id, iced::window::Event),
    MenuDismissed(iced::window::Id),
    WindowClosed(iced::window::Id),
    Tick(Instant),
    ControlCenterToggled,
    ControlCenter(ControlCenterMessage),
    NotificationsReady(NotificationLink),
    Notification(ServiceEvent),
    NotificationDismissed(u32),
    NotificationAction {
        id: u32,
        key: String,
    },
    NotificationsCleared,
    TrayReady(TrayLink),
    Tray(Vec<TrayItem>),
    TrayClicked {
        id: String,
        input: GaugeInput,
    },
    IcedEvent(iced::Event),
}

pub(crate) fn close_window_task(window: window::Id) -> Task<Message> {
    let callback = iced_layershell::actions::ActionCallback::new(|_region| {});
    Task::batch([
        Task::done(Message::SetInputRegion {
            id: window,
            callback,
        }),
        Task::done(Message::RemoveWindow(window)),
    ])
}

/// Simple container wrapper for a panel element.
pub struct Panel<'a> {
    content: Element<'a, Message>,
}

impl<'a> Panel<'a> {
    pub fn new(content: impl Into<Element<'a, Message>>) -> Self {
        Self {
            content: content.into(),
        }
    }

    pub fn view(self) -> Element<'a, Message> {
        container(self.content)
            .height(Length::Fill)
            .align_y(alignment::Vertical::Center)
            .into()
    }
}

/// Dialog payload associated with a gauge.
#[derive(Clone)]
pub enum GaugeDialog {
    Menu(GaugeMenu),
    Action(GaugeActionDialog),
    Info(InfoDialog),
}

/// Tracking info for an open gauge dialog window.
#[derive(Clone)]
pub struct GaugeDialogWindow {
    pub gauge_id: String,
    pub dialog: GaugeDialog,
    pub hovered_item: Option<String>,
}

/// Runtime state for the bar, its overlays and dialogs.
pub struct BarState {
    pub layout: BarLayout,
    pub compositor: CompositorSnapshot,
    pub current_workspace: Option<i32>,
    pub previous_workspace: Option<i32>,
    pub previous_tint_until: Option<Instant>,
    pub gauges: Vec<GaugeModel>,
    pub bar_theme: Theme,
    pub dialog_windows: HashMap<window::Id, GaugeDialogWindow>,
    pub last_cursor: Option<iced::Point>,
    pub closing_dialogs: HashSet<window::Id>,
    pub gauge_dialog_anchor: HashMap<String, i32>,
    pub primary_window: Option<window::Id>,
    pub pending_primary_window: bool,
    pub bar_windows: HashSet<window::Id>,
    /// Logical width of the primary bar surface, used to keep popups on screen.
    pub output_width: Option<u32>,
    pub last_click_at: Option<Instant>,
    pub last_dialog_opened_at: Option<Instant>,
    pub osd: OsdState,
    pub notifications: NotificationCenter,
    pub control_center: ControlCenterState,
    pub tray: TrayState,
}

impl Default for BarState {
    fn default() -> Self {
        Self {
            layout: BarLayout::default(),
            compositor: CompositorSnapshot::default(),
            current_workspace: None,
            previous_workspace: None,
            previous_tint_until: None,
            gauges: Vec::new(),
            bar_theme: Theme::Nord,
            dialog_windows: HashMap::new(),
            last_cursor: None,
            closing_dialogs: HashSet::new(),
            gauge_dialog_anchor: HashMap::new(),
            primary_window: None,
            pending_primary_window: false,
            bar_windows: HashSet::new(),
            output_width: None,
            last_click_at: None,
            last_dialog_opened_at: None,
            osd: OsdState::default(),
            notifications: NotificationCenter::default(),
            control_center: ControlCenterState::default(),
            tray: TrayState::default(),
        }
    }
}

/// Place a popup of `width` centered on `anchor_x`, kept inside `output_width`, just below
/// the bar.
pub fn dialog_position(
    anchor_x: i32,
    width: u32,
    output_width: Option<u32>,
    bar_height: u32,
) -> (i32, i32) {
    let width = width as i32;
    let left = anchor_x.saturating_sub(width / 2);
    let x = match output_width {
        Some(output) => left.clamp(0, (output as i32 - width).max(0)),
        None => left.max(0),
    };
    (x, bar_height as i32)
}

impl BarState {
    pub fn new(layout: BarLayout, bar_theme: Theme, max_stored_notifications: usize) -> Self {
        Self {
            layout,
            bar_theme,
            notifications: NotificationCenter::new(max_stored_notifications),
            ..Self::default()
        }
    }

    pub fn namespace() -> String {
        env!("CARGO_PKG_NAME").to_string()
    }

    pub fn bar_height() -> u32 {
        settings::settings().get_parsed_or("halcyon.bar.height", DEFAULT_BAR_HEIGHT)
    }

    pub fn open_menu(
        &mut self,
        gauge_id: &str,
        menu: GaugeMenu,
        anchor_x: Option<i32>,
    ) -> Task<Message> {
        let size = menu_dialog_dimensions(&menu);
        self.open_dialog_window(gauge_id, GaugeDialog::Menu(menu), anchor_x, size)
    }

    pub fn open_action_dialog(
        &mut self,
        gauge_id: &str,
        dialog: GaugeActionDialog,
        anchor_x: Option<i32>,
    ) -> Task<Message> {
        let size = action_dialog_dimensions(&dialog);
        self.open_dialog_window(gauge_id, GaugeDialog::Action(dialog), anchor_x, size)
    }

    pub fn open_info_dialog(
        &mut self,
        gauge_id: &str,
        dialog: InfoDialog,
        anchor_x: Option<i32>,
    ) -> Task<Message> {
        let size = info_dialog_dimensions(&dialog);
        self.open_dialog_window(gauge_id, GaugeDialog::Info(dialog), anchor_x, size)
    }

    fn open_dialog_window(
        &mut self,
        gauge_id: &str,
        dialog: GaugeDialog,
        anchor_x: Option<i32>,
        size: (u32, u32),
    ) -> Task<Message> {
        let mut tasks = vec![self.close_dialogs()];

        let anchor_x = anchor_x
            .or_else(|| self.gauge_dialog_anchor.get(gauge_id).copied())
            .unwrap_or_default();
        let position = dialog_position(anchor_x, size.0, self.output_width, Self::bar_height());

        let (window, task) = Message::popup_open(IcedNewPopupSettings { size, position });
        self.gauge_dialog_anchor
            .insert(gauge_id.to_string(), anchor_x);
        self.dialog_windows.insert(
            window,
            GaugeDialogWindow {
                gauge_id: gauge_id.to_string(),
                dialog,
                hovered_item: None,
            },
        );
        self.last_dialog_opened_at = Some(Instant::now());
        tasks.push(task);

        Task::batch(tasks)
    }

    pub fn close_dialogs(&mut self) -> Task<Message> {
        let ids: Vec<window::Id> = self.dialog_windows.drain().map(|(id, _)| id).collect();
        self.closing_dialogs.extend(&ids);
        Task::batch(ids.into_iter().map(close_window_task))
    }

    pub fn has_open_overlays(&self) -> bool {
        !self.dialog_windows.is_empty() || self.control_center.is_open()
    }

    /// Dialogs and the control center; the OSD and notification popups stay.
    pub fn close_overlays(&mut self) -> Task<Message> {
        Task::batch([self.close_dialogs(), control_center::close(self)])
    }

    /// Surfaces other than the bar itself.
    pub fn is_overlay_window(&self, window: window::Id) -> bool {
        self.dialog_windows.contains_key(&window)
            || self.closing_dialogs.contains(&window)
            || self.osd.window == Some(window)
            || self.notifications.popup_window == Some(window)
            || self.control_center.window == Some(window)
    }

    /// How often the runtime should tick, if at all.
    pub fn tick_interval(&self) -> Option<Duration> {
        if self.osd.is_visible() || self.previous_tint_until.is_some() {
            Some(ANIMATION_TICK)
        } else if self.notifications.store.has_popups() {
            Some(POPUP_TICK)
        } else {
            None
        }
    }

    pub fn allow_click(&mut self) -> bool {
        self.allow_click_at(Instant::now())
    }

    pub(crate) fn allow_click_at(&mut self, now: Instant) -> bool {
        let too_soon_since_click = self
            .last_click_at
            .is_some_and(|last| now.saturating_duration_since(last) < CLICK_FILTER_WINDOW);
        let too_soon_since_dialog = self
            .last_dialog_opened_at
            .is_some_and(|last| now.saturating_duration_since(last) < CLICK_FILTER_WINDOW);

        if too_soon_since_click || too_soon_since_dialog {
            return false;
        }

        self.last_click_at = Some(now);
        true
    }

    fn item_view<'a>(&'a self, item: BarItem) -> Option<Element<'a, Message>> {
        match item {
            BarItem::Panel(id) => panel_registry::find(id).map(|spec| (spec.view)(self).view()),
            BarItem::Gauge(id) => self
                .gauges
                .iter()
                .find(|gauge| gauge.id == id)
                .map(|gauge| gauge_panel::gauge_view(self, gauge)),
        }
    }

    fn section<'a>(&'a self, items: &[BarItem], spacing: u32) -> Row<'a, Message> {
        items
            .iter()
            .filter_map(|item| self.item_view(*item))
            .fold(
                Row::new()
                    .spacing(spacing)
                    .height(Length::Fill)
                    .align_y(alignment::Vertical::Center),
                |row, element| row.push(element),
            )
    }

    fn bar_view(&self) -> Element<'_, Message> {
        let settings = settings::settings();
        let padding_x = settings.get_parsed_or("halcyon.bar.padding_x", 8u16);
        let item_spacing = settings.get_parsed_or("halcyon.gauge.ui.spacing", 10u32);

        let placed = |row: Row<'_, Message>, align: alignment::Horizontal| {
            container(row)
                .width(Length::Fill)
                .height(Length::Fill)
                .align_x(align)
                .align_y(alignment::Vertical::Center)
        };

        // Three full-width layers keep the center section centered on the output.
        let sections = Stack::new()
            .width(Length::Fill)
            .height(Length::Fill)
            .push(placed(
                self.section(&self.layout.left, item_spacing),
                alignment::Horizontal::Left,
            ))
            .push(placed(
                self.section(&self.layout.center, item_spacing),
                alignment::Horizontal::Center,
            ))
            .push(placed(
                self.section(&self.layout.right, item_spacing),
                alignment::Horizontal::Right,
            ));

        let filled = container(sections)
            .padding([0, padding_x])
            .width(Length::Fill)
            .height(Length::Fill)
            .style(|theme: &Theme| container::Style {
                background: Some(theme.palette().background.into()),
                text_color: Some(theme.palette().text),
                ..container::Style::default()
            });

        let layered = common::stack_with_border(
            filled,
            BorderSettings::load(),
            BorderSides {
                top: false,
                bottom: true,
                left: false,
                right: false,
            },
        );

        mouse_area(layered)
            .on_press(Message::BackgroundClicked)
            .on_right_press(Message::BackgroundClicked)
            .interaction(mouse::Interaction::None)
            .into()
    }

    pub fn view<'a>(&'a self, window: window::Id) -> Element<'a, Message> {
        if self.osd.window == Some(window) {
            return osd::view(&self.osd, Instant::now());
        }
        if self.notifications.popup_window == Some(window) {
            return notifications::popup_view(self);
        }
        if self.control_center.window == Some(window) {
            return control_center::view(self);
        }

        if let Some(dialog_window) = self.dialog_windows.get(&window) {
            let gauge_id = dialog_window.gauge_id.clone();
            let window_id = window;
            return match &dialog_window.dialog {
                GaugeDialog::Menu(menu) => menu_view(
                    menu,
                    dialog_window.hovered_item.as_deref(),
                    move |item_id| Message::MenuItemSelected {
                        window: window_id,
                        gauge_id: gauge_id.clone(),
                        item_id,
                    },
                    move |item_id| Message::MenuItemHoverEnter {
                        window: window_id,
                        item_id,
                    },
                    move |item_id| Message::MenuItemHoverExit {
                        window: window_id,
                        item_id,
                    },
                ),
                GaugeDialog::Action(dialog) => {
                    action_view(dialog, move |item_id| Message::ActionItemSelected {
                        window: window_id,
                        gauge_id: gauge_id.clone(),
                        item_id,
                    })
                }
                GaugeDialog::Info(dialog) => info_view(dialog),
            };
        }
        if self.closing_dialogs.contains(&window) {
            return container(Space::new()).into();
        }

        self.bar_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_is_centered_on_anchor_and_kept_on_screen() {
        assert_eq!(dialog_position(500, 200, Some(1920), 32), (400, 32));
        assert_eq!(dialog_position(30, 200, Some(1920), 32), (0, 32));
        assert_eq!(dialog_position(1910, 200, Some(1920), 32), (1720, 32));
        assert_eq!(dialog_position(100, 400, Some(300), 28), (0, 28));
        assert_eq!(dialog_position(5000, 200, None, 32), (4900, 32));
    }

    #[test]
    fn click_filter_drops_rapid_repeats_and_clicks_after_dialog_open() {
        let mut state = BarState::default();
        let start = Instant::now();

        assert!(state.allow_click_at(start));
        assert!(!state.allow_click_at(start + Duration::from_millis(100)));
        assert!(state.allow_click_at(start + Duration::from_millis(300)));

        state.last_dialog_opened_at = Some(start + Duration::from_millis(600));
        assert!(!state.allow_click_at(start + Duration::from_millis(700)));
        assert!(state.allow_click_at(start + Duration::from_millis(900)));
    }

    #[test]
    fn overlay_windows_are_not_bar_windows() {
        let mut state = BarState::default();
        let osd = window::Id::unique();
        let popups = window::Id::unique();
        let center = window::Id::unique();
        state.osd.window = Some(osd);
        state.notifications.popup_window = Some(popups);
        state.control_center.window = Some(center);

        assert!(state.is_overlay_window(osd));
        assert!(state.is_overlay_window(popups));
        assert!(state.is_overlay_window(center));
        assert!(!state.is_overlay_window(window::Id::unique()));
    }

    #[test]
    fn ticks_only_run_while_something_changes_on_screen() {
        let mut state = BarState::default();
        assert_eq!(state.tick_interval(), None);

        state.previous_tint_until = Some(Instant::now());
        assert_eq!(state.tick_interval(), Some(ANIMATION_TICK));
    }
}
