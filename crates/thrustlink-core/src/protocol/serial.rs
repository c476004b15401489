//! Serial port handling
//!
//! Port listing, best-effort device discovery and port setup for the
//! test-stand microcontroller.

use serialport::{SerialPort, SerialPortInfo};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use super::ProtocolError;

/// An available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,
}

impl PortInfo {
    /// Wrap a port name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Whether the name looks like a USB-serial bridge (CP210x, CH340, CDC-ACM)
    pub fn looks_removable(&self) -> bool {
        let upper = self.name.to_uppercase();
        upper.contains("USB") || upper.contains("ACM")
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        Self::new(info.port_name)
    }
}

/// Sort key so that ttyUSB* ports come first (the usual ESP32 bridge),
/// then ttyACM*, then everything else, each numerically by suffix
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // udev may not have tagged a freshly plugged device yet
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::new(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Locate the test stand: the configured path if it exists, otherwise the
/// first port whose name looks like a removable USB-serial device
pub fn find_device(configured: Option<&str>) -> Option<String> {
    let exists = configured.map(|p| Path::new(p).exists()).unwrap_or(false);
    select_device(configured, exists, &list_ports())
}

fn select_device(
    configured: Option<&str>,
    configured_exists: bool,
    ports: &[PortInfo],
) -> Option<String> {
    if let (Some(path), true) = (configured, configured_exists) {
        return Some(path.to_string());
    }
    ports
        .iter()
        .find(|p| p.looks_removable())
        .map(|p| p.name.clone())
}

/// Open and configure a serial port for the test stand
pub fn open_port(
    name: &str,
    baud_rate: u32,
    timeout: Duration,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let mut port = serialport::new(name, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    configure_port(port.as_mut())?;
    Ok(port)
}

/// Standard 8N1, no flow control
fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

    // Holding DTR/RTS asserted keeps the ESP32 auto-reset circuit idle
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!(error = %e, "failed to set DTR high (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        debug!(error = %e, "failed to set RTS high (continuing)");
    }

    Ok(())
}
