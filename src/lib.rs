pub mod bar;
pub mod compositor;
pub mod control_center;
pub mod notifications;
pub mod osd;
pub mod panels;
pub mod runtime_dispatch;
pub mod settings;
pub mod settings_storage;
pub mod theme;
pub mod tray;

mod anim;
mod cmd;
mod dialog;
mod icon;
mod outbox;

pub mod gauges {
    pub use crate::panels::gauges::gauge;
    pub use crate::panels::gauges::gauge_registry;
    pub use crate::panels::gauges::gauge_work_manager;
}
