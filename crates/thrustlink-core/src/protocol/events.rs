//! Decoded device events
//!
//! These are what subscribers see. Field names on the wire follow the
//! existing dashboard frontend, so several are serialized under their
//! Portuguese names.

use serde::Serialize;

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedEvent {
    /// A force sample
    Data(DataReading),
    /// The device's current parameter set
    Config(ConfigSnapshot),
    /// A status or acknowledgement message
    Status(StatusReport),
}

impl DecodedEvent {
    /// Short name of the event kind
    pub fn kind(&self) -> &'static str {
        match self {
            DecodedEvent::Data(_) => "data",
            DecodedEvent::Config(_) => "config",
            DecodedEvent::Status(_) => "status",
        }
    }
}

/// A single load-cell reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataReading {
    /// Device uptime in seconds
    #[serde(rename = "tempo")]
    pub time_s: f64,
    /// Measured force in newtons; `None` if the device sent NaN/Infinity
    #[serde(rename = "forca")]
    pub force_n: Option<f32>,
    /// Raw device status byte
    pub status: u8,
}

/// Device parameter snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Raw counts to grams
    pub conversion_factor: Option<f32>,
    /// Local gravity, m/s²
    pub gravity: Option<f32>,
    /// Consecutive stable readings required
    #[serde(rename = "leiturasEstaveis")]
    pub stable_read_count: u16,
    /// Stability band
    #[serde(rename = "toleranciaEstabilidade")]
    pub stability_tolerance: Option<f32>,
    /// Samples in the moving average
    #[serde(rename = "numAmostrasMedia")]
    pub avg_sample_count: u16,
    /// Samples taken during calibration
    #[serde(rename = "numAmostrasCalibracao")]
    pub calib_sample_count: u16,
    /// Moving average enabled
    #[serde(rename = "usarMediaMovel")]
    pub use_moving_avg: u8,
    /// Exponential moving average enabled
    #[serde(rename = "usarEMA")]
    pub use_ema: u8,
    /// Calibration timeout
    #[serde(rename = "timeoutCalibracao")]
    pub calib_timeout: u16,
    /// Stored tare offset, raw counts
    pub tare_offset: i32,
    /// Load cell rating
    #[serde(rename = "capacidadeMaximaGramas")]
    pub max_capacity_grams: Option<f32>,
    /// Rated accuracy
    #[serde(rename = "percentualAcuracia")]
    pub accuracy_percent: Option<f32>,
    /// Firmware operating mode
    pub mode: u8,
}

/// Severity of a device status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    /// Informational
    Info,
    /// An operation completed
    Success,
    /// Something needs attention
    Warning,
    /// An operation failed
    Error,
}

impl StatusKind {
    /// Map the wire byte; unknown values fall back to `Info`
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => StatusKind::Success,
            2 => StatusKind::Warning,
            3 => StatusKind::Error,
            _ => StatusKind::Info,
        }
    }
}

/// A status message from the device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Severity
    pub status: StatusKind,
    /// Human-readable text for `code`
    pub message: String,
    /// Firmware status code
    pub code: u8,
    /// Code-specific argument
    pub value: u16,
    /// Device uptime in seconds
    pub timestamp: f64,
}

/// Human-readable text for a status code
pub fn status_message(code: u8) -> String {
    match code {
        0x10 => "Tara concluída".to_string(),
        0x11 => "Calibração concluída".to_string(),
        0x12 => "Calibração falhou".to_string(),
        other => format!("Status code: {:02X}", other),
    }
}

/// Replace NaN and infinities with an explicit absent value
pub fn finite(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}
