pub mod action;
pub mod common;
pub mod info;
pub mod menu;
