pub mod control_center_panel;
pub mod gauge_panel;
pub mod gauges;
pub mod panel_registry;
pub mod tray_panel;
pub mod window_panel;
pub mod ws_panel;
