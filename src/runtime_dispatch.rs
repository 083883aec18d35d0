// Main application loop update/subscription logic.
use crate::bar::{BarState, GaugeDialog, GaugeDialogWindow, Message, close_window_task};
use crate::compositor;
use crate::control_center;
use crate::notifications;
use crate::osd;
use crate::panels;
use crate::panels::gauges::gauge::{GaugeClick, GaugeInput, GaugeModel};
use crate::panels::gauges::gauge_work_manager;
use crate::panels::panel_registry;
use iced::futures::channel::mpsc;
use iced::{Subscription, Task, event, mouse, window};
use iced_layershell::reexport::{
    Anchor, KeyboardInteractivity, Layer, NewLayerShellSettings, OutputOption,
};
use log::{debug, error, info};
use std::thread;
use std::time::{Duration, Instant};

const DIALOG_UNFOCUS_SUPPRESSION_WINDOW: Duration = Duration::from_millis(250);

fn set_input_region_task(window: window::Id, size: iced::Size) -> Task<Message> {
    if size.width <= 0.0 || size.height <= 0.0 {
        return Task::none();
    }
    let width = size.width.round().clamp(1.0, i32::MAX as f32) as i32;
    let height = size.height.round().clamp(1.0, i32::MAX as f32) as i32;
    let callback = iced_layershell::actions::ActionCallback::new(move |region| {
        region.add(0, 0, width, height);
    });
    Task::done(Message::SetInputRegion {
        id: window,
        callback,
    })
}

pub fn app_subscription(state: &BarState) -> Subscription<Message> {
    let mut subs = vec![
        event::listen().map(Message::IcedEvent),
        window::open_events().map(Message::WindowOpened),
        window::events().map(|(id, event)| Message::WindowEvent(id, event)),
        window::close_events().map(Message::WindowClosed),
        notifications::subscription(),
        gauge_work_manager::subscription(&state.layout.gauge_ids()),
    ];
    subs.extend(panel_registry::subscriptions_for_layout(&state.layout));
    if let Some(interval) = state.tick_interval() {
        subs.push(Subscription::run_with(interval, tick_stream));
    }
    Subscription::batch(subs)
}

fn tick_stream(interval: &Duration) -> mpsc::Receiver<Message> {
    let (mut sender, receiver) = mpsc::channel(1);
    let interval = *interval;
    thread::spawn(move || {
        loop {
            thread::sleep(interval);
            if let Err(err) = sender.try_send(Message::Tick(Instant::now()))
                && err.is_disconnected()
            {
                return;
            }
        }
    });
    receiver
}

pub fn update(state: &mut BarState, message: Message) -> Task<Message> {
    let is_click_message = matches!(
        message,
        Message::WorkspaceClicked(_)
            | Message::BackgroundClicked
            | Message::GaugeClicked {
                input: GaugeInput::Button(_),
                ..
            }
            | Message::MenuItemSelected { .. }
            | Message::ActionItemSelected { .. }
            | Message::ControlCenterToggled
            | Message::TrayClicked {
                input: GaugeInput::Button(_),
                ..
            }
    );
    if is_click_message && !state.allow_click() {
        return Task::none();
    }

    match message {
        Message::Compositor(snapshot) => {
            panels::ws_panel::update_workspace_focus(state, &snapshot.workspaces, Instant::now());
            state.compositor = snapshot;
        }
        Message::WorkspaceClicked(id) => {
            if !state.dialog_windows.is_empty() {
                return state.close_dialogs();
            }
            if let Err(err) = compositor::focus_workspace(id) {
                error!("Failed to focus workspace {id}: {err}");
            }
        }
        Message::IcedEvent(iced::Event::Mouse(mouse::Event::CursorMoved { position })) => {
            state.last_cursor = Some(position);
        }
        Message::BackgroundClicked => {
            if state.has_open_overlays() {
                return state.close_overlays();
            }
        }
        Message::IcedEvent(iced::Event::Keyboard(iced::keyboard::Event::KeyPressed {
            key: iced::keyboard::Key::Named(iced::keyboard::key::Named::Escape),
            ..
        })) => {
            if state.has_open_overlays() {
                return state.close_overlays();
            }
        }
        Message::GaugeBatch(batch) => {
            let osd_task = osd::apply_models(state, &batch, Instant::now());
            apply_gauge_batch(&mut state.gauges, &mut state.dialog_windows, batch);
            return osd_task;
        }
        Message::GaugeClicked { id, input } => {
            return route_gauge_click(state, id, input);
        }
        Message::MenuItemSelected {
            window,
            gauge_id,
            item_id,
        } => {
            // close menus first so clicking in parent bar after selection behaves consistently
            state.dialog_windows.remove(&window);
            state.closing_dialogs.remove(&window);
            let _ = state.close_dialogs();
            if let Some(menu) = state
                .gauges
                .iter()
                .find(|g| g.id == gauge_id)
                .and_then(|g| g.menu.as_ref())
                .and_then(|menu| menu.on_select.clone())
            {
                menu(item_id);
            }
            return close_window_task(window);
        }
        Message::ActionItemSelected {
            window,
            gauge_id,
            item_id,
        } => {
            state.dialog_windows.remove(&window);
            state.closing_dialogs.remove(&window);
            let _ = state.close_dialogs();
            if let Some(action) = state
                .gauges
                .iter()
                .find(|g| g.id == gauge_id)
                .and_then(|g| g.action_dialog.as_ref())
                .and_then(|dialog| dialog.on_select.clone())
            {
                action(item_id);
            }
            return close_window_task(window);
        }
        Message::MenuItemHoverEnter { window, item_id } => {
            if let Some(dialog_window) = state.dialog_windows.get_mut(&window) {
                dialog_window.hovered_item = Some(item_id);
            }
        }
        Message::MenuItemHoverExit { window, item_id } => {
            if let Some(dialog_window) = state.dialog_windows.get_mut(&window)
                && dialog_window
                    .hovered_item
                    .as_ref()
                    .is_some_and(|hovered| hovered == &item_id)
            {
                dialog_window.hovered_item = None;
            }
        }
        Message::WindowFocusChanged { focused } => {
            return handle_window_focus_change(state, focused);
        }
        Message::WindowOpened(window) => {
            if let Some(task) = track_bar_window(state, window) {
                return task;
            }
        }
        Message::WindowEvent(window, event) => {
            match event {
                iced::window::Event::Opened { size, .. } => {
                    record_output_width(state, window, size);
                    let mut tasks = Vec::new();
                    // The OSD stays input-transparent.
                    if state.osd.window != Some(window) {
                        tasks.push(set_input_region_task(window, size));
                    }
                    if let Some(task) = track_bar_window(state, window) {
                        tasks.push(task);
                    }
                    return Task::batch(tasks);
                }
                iced::window::Event::Resized(size) => record_output_width(state, window, size),
                _ => {}
            }
            if event != iced::window::Event::Closed
                && let Some(task) = track_bar_window(state, window)
            {
                return task;
            }
        }
        Message::MenuDismissed(window) => {
            state.dialog_windows.remove(&window);
            state.closing_dialogs.remove(&window);
            return close_window_task(window);
        }
        Message::WindowClosed(window) => {
            return handle_window_closed(state, window);
        }
        Message::Tick(now) => {
            let expired_tint = panels::ws_panel::expire_previous_tint(state, now);
            if expired_tint {
                debug!("Previous workspace tint expired");
            }
            return Task::batch([osd::tick(state, now), notifications::tick(state, now)]);
        }
        Message::ControlCenterToggled => {
            return control_center::toggle_window(state);
        }
        Message::ControlCenter(message) => {
            return control_center::update(state, message);
        }
        Message::NotificationsReady(link) => {
            info!("Notification service bridge ready");
            state.notifications.link = Some(link);
        }
        Message::Notification(event) => {
            state.notifications.receive(event, Instant::now());
            return notifications::sync_popup_window(state);
        }
        Message::NotificationDismissed(id) => {
            state.notifications.dismiss(id);
            return notifications::sync_popup_window(state);
        }
        Message::NotificationAction { id, key } => {
            state.notifications.invoke_action(id, key);
            return notifications::sync_popup_window(state);
        }
        Message::NotificationsCleared => {
            state.notifications.clear_all();
            return notifications::sync_popup_window(state);
        }
        Message::TrayReady(link) => {
            info!("Tray host bridge ready");
            state.tray.link = Some(link);
        }
        Message::Tray(items) => {
            debug!("Tray now holds {} item(s)", items.len());
            state.tray.items = items;
        }
        Message::TrayClicked { id, input } => {
            if matches!(input, GaugeInput::Button(_)) && state.has_open_overlays() {
                return state.close_overlays();
            }
            let x = panels::gauge_panel::anchor_x(state).unwrap_or_default();
            state.tray.click(&id, input, x, BarState::bar_height() as i32);
        }
        Message::IcedEvent(iced::Event::Window(iced::window::Event::Unfocused)) => {
            return Task::done(Message::WindowFocusChanged { focused: false });
        }
        Message::IcedEvent(_) => {}
        Message::NewLayerShell { id, .. } => {
            if let Some(task) = track_bar_window(state, id) {
                return task;
            }
        }
        Message::NewBaseWindow { id, .. } => {
            if let Some(task) = track_bar_window(state, id) {
                return task;
            }
        }
        Message::AnchorChange { .. }
        | Message::SetInputRegion { .. }
        | Message::AnchorSizeChange { .. }
        | Message::LayerChange { .. }
        | Message::MarginChange { .. }
        | Message::SizeChange { .. }
        | Message::ExclusiveZoneChange { .. }
        | Message::VirtualKeyboardPressed { .. }
        | Message::NewPopUp { .. }
        | Message::NewMenu { .. }
        | Message::NewInputPanel { .. }
        | Message::RemoveWindow(_)
        | Message::ForgetLastOutput => {}
    }

    Task::none()
}

/// Any button press closes open dialogs. Otherwise a right press opens the action dialog,
/// then the menu; a left press opens the info dialog. Remaining input goes to the gauge.
fn route_gauge_click(state: &mut BarState, id: String, input: GaugeInput) -> Task<Message> {
    let is_button = matches!(input, GaugeInput::Button(_));
    if is_button && !state.dialog_windows.is_empty() {
        return state.close_dialogs();
    }

    let (gauge_menu, gauge_action, gauge_info, gauge_callback) =
        match state.gauges.iter().find(|g| g.id == id) {
            Some(gauge) => (
                gauge.menu.clone(),
                gauge.action_dialog.clone(),
                gauge.info.clone(),
                gauge.on_click.clone(),
            ),
            None => (None, None, None, None),
        };
    let anchor_x = panels::gauge_panel::anchor_x(state);

    if matches!(input, GaugeInput::Button(mouse::Button::Right)) {
        if let Some(dialog) = gauge_action {
            return state.open_action_dialog(&id, dialog, anchor_x);
        }
        if let Some(menu) = gauge_menu {
            return state.open_menu(&id, menu, anchor_x);
        }
    }

    if matches!(input, GaugeInput::Button(mouse::Button::Left))
        && let Some(dialog) = gauge_info
    {
        return state.open_info_dialog(&id, dialog, anchor_x);
    }

    if let Some(callback) = gauge_callback {
        callback(GaugeClick { input });
    } else {
        debug!("Gauge '{id}' ignored input {:?}", input);
    }
    Task::none()
}

fn record_output_width(state: &mut BarState, window: window::Id, size: iced::Size) {
    if state.is_overlay_window(window) || size.width <= 0.0 {
        return;
    }
    state.output_width = Some(size.width.round() as u32);
}

fn track_bar_window(state: &mut BarState, window: window::Id) -> Option<Task<Message>> {
    if state.is_overlay_window(window) {
        return None;
    }

    state.bar_windows.insert(window);
    if state.primary_window.is_none() {
        state.primary_window = Some(window);
        state.pending_primary_window = false;
    }

    None
}

/// Settings for the bar surface: full width along the top edge, reserving its height.
pub fn bar_layer_settings() -> NewLayerShellSettings {
    let height = BarState::bar_height();
    NewLayerShellSettings {
        size: Some((0, height)),
        layer: Layer::Top,
        anchor: Anchor::Top | Anchor::Left | Anchor::Right,
        exclusive_zone: Some(height as i32),
        margin: Some((0, 0, 0, 0)),
        keyboard_interactivity: KeyboardInteractivity::OnDemand,
        output_option: OutputOption::None,
        events_transparent: false,
        namespace: Some(BarState::namespace()),
    }
}

fn handle_window_closed(state: &mut BarState, window: window::Id) -> Task<Message> {
    let is_primary = state
        .primary_window
        .is_some_and(|primary| primary == window);
    state.dialog_windows.remove(&window);
    state.closing_dialogs.remove(&window);
    state.bar_windows.remove(&window);
    if state.osd.window == Some(window) {
        state.osd.window = None;
    }
    if state.notifications.popup_window == Some(window) {
        state.notifications.popup_window = None;
    }
    if state.control_center.window == Some(window) {
        state.control_center.window = None;
    }

    if !is_primary {
        return Task::none();
    }
    if let Some(next_primary) = state.bar_windows.iter().copied().next() {
        state.primary_window = Some(next_primary);
        state.pending_primary_window = false;
        return Task::none();
    }
    info!("Bar surface closed; reopening");
    state.primary_window = None;
    state.pending_primary_window = true;
    Task::batch([
        state.close_overlays(),
        Task::done(Message::ForgetLastOutput),
        Task::done(Message::NewLayerShell {
            settings: bar_layer_settings(),
            id: window::Id::unique(),
        }),
    ])
}

fn handle_window_focus_change(state: &mut BarState, focused: bool) -> Task<Message> {
    // Keep dialogs open when the bar regains focus.
    if focused {
        return Task::none();
    }

    // Ignore transient unfocus events immediately after opening a dialog.
    let recently_opened_dialog = state
        .last_dialog_opened_at
        .and_then(|last| Instant::now().checked_duration_since(last))
        .is_some_and(|elapsed| elapsed < DIALOG_UNFOCUS_SUPPRESSION_WINDOW);
    if recently_opened_dialog {
        return Task::none();
    }

    // Close the first tracked dialog on a real unfocus transition.
    if let Some(window) = state.dialog_windows.keys().copied().next() {
        state.dialog_windows.remove(&window);
        state.closing_dialogs.insert(window);
        return close_window_task(window);
    }

    Task::none()
}

fn update_gauge(gauges: &mut Vec<GaugeModel>, new: GaugeModel) {
    if let Some(existing) = gauges.iter_mut().find(|g| g.id == new.id) {
        *existing = new;
    } else {
        gauges.push(new);
    }
}

fn apply_gauge_batch(
    gauges: &mut Vec<GaugeModel>,
    dialog_windows: &mut std::collections::HashMap<window::Id, GaugeDialogWindow>,
    batch: Vec<GaugeModel>,
) {
    for gauge in batch {
        refresh_info_dialogs(dialog_windows, &gauge);
        update_gauge(gauges, gauge);
    }
}

fn refresh_info_dialogs(
    dialog_windows: &mut std::collections::HashMap<window::Id, GaugeDialogWindow>,
    gauge: &GaugeModel,
) {
    let Some(info) = gauge.info.as_ref() else {
        return;
    };

    for dialog_window in dialog_windows.values_mut() {
        if dialog_window.gauge_id == gauge.id
            && let GaugeDialog::Info(dialog) = &mut dialog_window.dialog
        {
            *dialog = info.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bar::{GaugeDialog, GaugeDialogWindow};
    use crate::dialog::info::InfoDialog;
    use crate::panels::gauges::gauge::{GaugeDisplay, GaugeMenu, GaugeValue};
    use crate::panels::gauges::gauge_registry;
    use crate::settings;
    use crate::settings_storage::SettingsStorage;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn temp_storage_path(name: &str) -> (SettingsStorage, std::path::PathBuf) {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "halcyon_runtime_settings_test_{}_{}",
            std::process::id(),
            name
        ));
        path.push(format!("Settings-{}.xresources", env!("CARGO_PKG_VERSION")));
        (SettingsStorage::new(path.clone()), path)
    }

    fn text_model(id: &'static str, value: &str) -> GaugeModel {
        GaugeModel::new(id, None, GaugeDisplay::text(value))
    }

    fn menu_window(gauge_id: &str, title: &str) -> GaugeDialogWindow {
        GaugeDialogWindow {
            gauge_id: gauge_id.to_string(),
            dialog: GaugeDialog::Menu(GaugeMenu {
                title: title.into(),
                items: Vec::new(),
                on_select: None,
            }),
            hovered_item: None,
        }
    }

    fn assert_text_value(model: &GaugeModel, expected: &str) {
        match &model.display {
            GaugeDisplay::Value {
                value: GaugeValue::Text(text),
                ..
            } => assert_eq!(text, expected),
            other => panic!("expected text gauge value, got {other:?}"),
        }
    }

    #[test]
    fn command_line_overrides_apply_before_settings_persist() {
        let (storage, path) = temp_storage_path("overrides_before_save");
        let settings_store = settings::Settings::new(storage.clone());

        settings_store.update("halcyon.bar.theme", "Light");

        let mut all_setting_specs = Vec::new();
        let base_setting_specs =
            settings::base_setting_specs("workspaces,window", "clock", "cpu", "Nord");
        all_setting_specs.extend_from_slice(&base_setting_specs);
        let clock_spec = gauge_registry::find("clock").expect("clock gauge spec registered");
        all_setting_specs.extend_from_slice((clock_spec.settings)());
        settings_store.ensure_defaults(&all_setting_specs);

        let contents = std::fs::read_to_string(&path).expect("read settings storage");
        assert!(
            contents.contains("halcyon.bar.theme: Light"),
            "expected override to persist before defaults"
        );
        assert!(contents.contains("halcyon.bar.center: clock"));

        let _ = std::fs::remove_file(&path);
        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir(dir);
        }
    }

    #[test]
    fn update_gauge_replaces_by_id() {
        let mut gauges = Vec::new();

        update_gauge(&mut gauges, text_model("clock", "12:00"));
        assert_eq!(gauges.len(), 1);
        assert_text_value(&gauges[0], "12:00");

        update_gauge(&mut gauges, text_model("clock", "12:01"));
        assert_eq!(gauges.len(), 1, "should replace existing entry");
        assert_text_value(&gauges[0], "12:01");

        update_gauge(&mut gauges, text_model("cpu", "3%"));
        assert_eq!(gauges.len(), 2, "different id should append");
    }

    #[test]
    fn gauge_batch_refreshes_open_info_dialog() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state.dialog_windows.insert(
            window,
            GaugeDialogWindow {
                gauge_id: "cpu".to_string(),
                dialog: GaugeDialog::Info(InfoDialog::new("CPU", vec!["old".into()])),
                hovered_item: None,
            },
        );
        let mut model = text_model("cpu", "9%");
        model.info = Some(InfoDialog::new("CPU", vec!["new".into()]));

        let _ = update(&mut state, Message::GaugeBatch(vec![model]));

        match &state.dialog_windows[&window].dialog {
            GaugeDialog::Info(dialog) => assert_eq!(dialog.lines, vec!["new".to_string()]),
            _ => panic!("info dialog should stay an info dialog"),
        }
        assert_eq!(state.gauges.len(), 1);
    }

    #[test]
    fn left_click_closes_open_dialog_without_invoking_callback() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));

        let clicked = Arc::new(AtomicBool::new(false));
        let mut model = GaugeModel::new("audio", None, GaugeDisplay::Empty);
        model.on_click = Some(Arc::new({
            let clicked = clicked.clone();
            move |_click| clicked.store(true, Ordering::SeqCst)
        }));
        state.gauges.push(model);

        let task = update(
            &mut state,
            Message::GaugeClicked {
                id: "audio".to_string(),
                input: GaugeInput::Button(mouse::Button::Left),
            },
        );

        assert!(
            !clicked.load(Ordering::SeqCst),
            "callback should not be invoked while closing dialog"
        );
        assert!(state.dialog_windows.is_empty(), "menu windows should be cleared");
        assert!(
            state.closing_dialogs.contains(&window),
            "window should be marked for closing"
        );
        assert!(task.units() > 0, "closing menus should return a non-empty task");
    }

    #[test]
    fn right_click_closes_menu() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));
        state
            .gauges
            .push(GaugeModel::new("audio", None, GaugeDisplay::Empty));

        let task = update(
            &mut state,
            Message::GaugeClicked {
                id: "audio".to_string(),
                input: GaugeInput::Button(mouse::Button::Right),
            },
        );

        assert!(
            !state.dialog_windows.contains_key(&window),
            "any click should close existing menu"
        );
        assert!(state.closing_dialogs.contains(&window));
        assert!(task.units() > 0);
    }

    #[test]
    fn scroll_reaches_gauge_even_with_dialog_open() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));

        let scrolled = Arc::new(AtomicBool::new(false));
        let mut model = GaugeModel::new("audio", None, GaugeDisplay::Empty);
        model.on_click = Some(Arc::new({
            let scrolled = scrolled.clone();
            move |click: GaugeClick| {
                if click.input == GaugeInput::ScrollUp {
                    scrolled.store(true, Ordering::SeqCst);
                }
            }
        }));
        state.gauges.push(model);
        state.last_click_at = Some(Instant::now());

        let _ = update(
            &mut state,
            Message::GaugeClicked {
                id: "audio".to_string(),
                input: GaugeInput::ScrollUp,
            },
        );

        assert!(scrolled.load(Ordering::SeqCst), "scroll bypasses the click filter");
        assert!(state.dialog_windows.contains_key(&window));
    }

    #[test]
    fn menu_item_selected_invokes_callback_and_closes_other_menus() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        let other_window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));
        state
            .dialog_windows
            .insert(other_window, menu_window("audio", "Other"));

        let selected = Arc::new(Mutex::new(None::<String>));
        let on_select = {
            let selected = Arc::clone(&selected);
            Arc::new(move |item: String| {
                *selected.lock().unwrap() = Some(item);
            })
        };
        let mut model = GaugeModel::new("audio", None, GaugeDisplay::Empty);
        model.menu = Some(GaugeMenu {
            title: "Test".into(),
            items: Vec::new(),
            on_select: Some(on_select),
        });
        state.gauges.push(model);

        let task = update(
            &mut state,
            Message::MenuItemSelected {
                window,
                gauge_id: "audio".to_string(),
                item_id: "sink-1".to_string(),
            },
        );

        assert_eq!(selected.lock().unwrap().as_deref(), Some("sink-1"));
        assert!(state.dialog_windows.is_empty(), "menus should be cleared");
        assert!(state.closing_dialogs.contains(&other_window));
        assert!(
            !state.closing_dialogs.contains(&window),
            "selected window is closed directly"
        );
        assert!(task.units() > 0, "menu selection returns a close task");
    }

    #[test]
    fn menu_dismissed_clears_tracking() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));
        state.closing_dialogs.insert(window);

        let _ = update(&mut state, Message::MenuDismissed(window));

        assert!(!state.dialog_windows.contains_key(&window));
        assert!(!state.closing_dialogs.contains(&window));
    }

    #[test]
    fn unfocus_right_after_opening_is_ignored() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));
        state.last_dialog_opened_at = Some(Instant::now());

        let task = update(&mut state, Message::WindowFocusChanged { focused: false });

        assert!(
            state.dialog_windows.contains_key(&window),
            "recently opened dialog should remain visible"
        );
        assert_eq!(task.units(), 0, "suppressed unfocus should do nothing");
    }

    #[test]
    fn late_unfocus_closes_the_dialog() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("audio", "Test"));
        state.last_dialog_opened_at = Instant::now().checked_sub(Duration::from_secs(1));

        let task = update(&mut state, Message::WindowFocusChanged { focused: false });

        assert!(state.dialog_windows.is_empty());
        assert!(state.closing_dialogs.contains(&window));
        assert!(task.units() > 0);
    }

    #[test]
    fn gauge_click_closes_existing_dialog_without_reopening() {
        let mut state = BarState::default();
        let window = window::Id::unique();
        state
            .dialog_windows
            .insert(window, menu_window("test", "Test"));

        let task = update(
            &mut state,
            Message::GaugeClicked {
                id: "test".to_string(),
                input: GaugeInput::Button(mouse::Button::Middle),
            },
        );

        assert!(state.dialog_windows.is_empty());
        assert!(state.closing_dialogs.contains(&window));
        assert!(task.units() > 0, "closing task should be returned");
    }

    #[test]
    fn track_bar_window_keeps_existing_primary_and_preserves_windows() {
        let mut state = BarState::default();
        let old_primary = window::Id::unique();
        let new_primary = window::Id::unique();
        state.primary_window = Some(old_primary);
        state.bar_windows.insert(old_primary);

        let task = track_bar_window(&mut state, new_primary);

        assert!(task.is_none(), "tracking bars should not queue closes");
        assert_eq!(state.primary_window, Some(old_primary));
        assert!(state.closing_dialogs.is_empty());
        assert_eq!(state.bar_windows.len(), 2);
    }

    #[test]
    fn overlay_surfaces_are_not_tracked_as_bars() {
        let mut state = BarState::default();
        let osd = window::Id::unique();
        state.osd.window = Some(osd);

        assert!(track_bar_window(&mut state, osd).is_none());
        assert!(state.bar_windows.is_empty());
        assert!(state.primary_window.is_none());
    }

    #[test]
    fn window_closed_promotes_remaining_bar_to_primary_without_reopen() {
        let mut state = BarState::default();
        let old_primary = window::Id::unique();
        let other = window::Id::unique();
        state.primary_window = Some(old_primary);
        state.bar_windows.insert(old_primary);
        state.bar_windows.insert(other);

        let task = update(&mut state, Message::WindowClosed(old_primary));

        assert_eq!(task.units(), 0, "closing one bar should not reopen when another remains");
        assert_eq!(state.primary_window, Some(other));
        assert!(!state.pending_primary_window);
        assert_eq!(state.bar_windows.len(), 1);
    }

    #[test]
    fn closed_overlay_forgets_its_window() {
        let mut state = BarState::default();
        let center = window::Id::unique();
        state.control_center.window = Some(center);
        state.closing_dialogs.insert(center);

        let task = update(&mut state, Message::WindowClosed(center));

        assert_eq!(task.units(), 0);
        assert!(!state.control_center.is_open());
        assert!(state.closing_dialogs.is_empty());
    }

    #[test]
    fn compositor_snapshot_updates_workspace_tracking() {
        let mut state = BarState::default();
        let workspace = |id: i32, focused: bool| compositor::Workspace {
            id,
            name: id.to_string(),
            focused,
            occupied: true,
            urgent: false,
        };

        let _ = update(
            &mut state,
            Message::Compositor(compositor::CompositorSnapshot {
                workspaces: vec![workspace(1, true), workspace(2, false)],
                active_window: None,
            }),
        );
        let _ = update(
            &mut state,
            Message::Compositor(compositor::CompositorSnapshot {
                workspaces: vec![workspace(1, false), workspace(2, true)],
                active_window: None,
            }),
        );

        assert_eq!(state.current_workspace, Some(2));
        assert_eq!(state.previous_workspace, Some(1));
        assert_eq!(state.compositor.workspaces.len(), 2);
        assert!(state.tick_interval().is_some(), "tint animates via ticks");
    }
}
