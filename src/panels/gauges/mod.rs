pub mod gauge;
pub mod gauge_registry;
pub mod gauge_work_manager;
pub mod poll_source;
pub mod pulse;

pub mod audio;
pub mod battery;
pub mod bluetooth;
pub mod brightness;
pub mod cava;
pub mod clock;
pub mod cpu;
pub mod gpu;
pub mod memory;
pub mod mic;
pub mod mpris;
pub mod net_speed;
pub mod network;
pub mod power_profile;
pub mod session;
