pub mod actions;
pub mod commands;
pub mod config;
pub mod telemetry;

pub mod dispatch;

mod start;
pub use self::start::start;
