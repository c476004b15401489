//! Process configuration from the environment

use std::net::{IpAddr, SocketAddr};
use thiserror::Error;
use thrustlink_core::protocol::DEFAULT_BAUD_RATE;
use thrustlink_core::transport::{DriverConfig, DEFAULT_PORT_PATH};

/// Default WebSocket listening port
pub const DEFAULT_WS_PORT: u16 = 81;

/// Configuration errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a number, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} is not a valid IP address: '{value}'")]
    InvalidAddress { var: &'static str, value: String },
}

/// Server settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Preferred serial device path
    pub serial_port: String,
    /// Serial baud rate
    pub serial_baud: u32,
    /// Address to bind the WebSocket listener to
    pub bind_host: IpAddr,
    /// WebSocket listening port
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_PORT_PATH.to_string(),
            serial_baud: DEFAULT_BAUD_RATE,
            bind_host: IpAddr::from([0, 0, 0, 0]),
            ws_port: DEFAULT_WS_PORT,
        }
    }
}

impl ServerConfig {
    /// Read `SERIAL_PORT`, `SERIAL_BAUD`, `BIND_HOST` and `WS_PORT`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset or blank keeps the default
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            serial_port: get("SERIAL_PORT").unwrap_or(defaults.serial_port),
            serial_baud: match get("SERIAL_BAUD") {
                Some(v) => parse_number("SERIAL_BAUD", &v)?,
                None => defaults.serial_baud,
            },
            bind_host: match get("BIND_HOST") {
                Some(v) => v.trim().parse().map_err(|_| ConfigError::InvalidAddress {
                    var: "BIND_HOST",
                    value: v.clone(),
                })?,
                None => defaults.bind_host,
            },
            ws_port: match get("WS_PORT") {
                Some(v) => parse_number("WS_PORT", &v)?,
                None => defaults.ws_port,
            },
        })
    }

    /// Socket address for the WebSocket listener
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.ws_port)
    }

    /// Serial driver settings derived from this config
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            port_path: Some(self.serial_port.clone()),
            baud_rate: self.serial_baud,
            ..DriverConfig::default()
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}
