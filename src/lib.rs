pub mod api;
pub mod config;
pub mod device;
pub mod mqtt;
pub mod persistence;
pub mod service;
pub mod setup;
pub mod telemetry;
