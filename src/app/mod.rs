pub mod adb;
pub mod binaries;
pub mod config;
pub mod devtools;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod platform;
pub mod process;
pub mod state;
