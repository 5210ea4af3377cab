//! # MQTT Integration Module
//!
//! Broker connectivity for both binaries.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - broker endpoint, transport and topic names
//! ├── message_manager.rs  - inbound message representation
//! ├── mqtt_handler.rs     - link lifecycle machine, event loop, publish handle
//! └── dispatcher.rs       - bridge-side routing of inbound messages into state
//! ```
//!
//! The event loop is owned by a single task; everything else talks to the
//! broker through a cloneable [`BrokerHandle`].

pub mod config;
pub mod dispatcher;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::MqttConfig;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use message_manager::InboundMessage;
pub use mqtt_handler::{BrokerHandle, BrokerLink, InboundHandler, LinkError};
