//! # ThrustLink Server
//!
//! Process wiring for the test-stand bridge: environment configuration and
//! the WebSocket front end that turns browser connections into hub
//! subscribers.

pub mod config;
pub mod ws;

pub use config::{ConfigError, ServerConfig};
pub use ws::{ServerHandle, WebSocketServer};
