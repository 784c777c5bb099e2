pub mod config;
pub mod errors;
pub mod monitor;
pub mod observer;
pub mod progress;
pub mod telemetry;
