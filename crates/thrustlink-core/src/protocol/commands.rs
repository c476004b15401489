//! Protocol commands
//!
//! Defines the commands the host can send to the test stand, and the parsing
//! of subscriber JSON messages (`{"cmd": ..., ...}`) into them.

use serde::Deserialize;
use serde_json::Value;

use super::{PacketType, ProtocolError};

/// Commands the host can send to the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Zero the load cell
    Tare,
    /// Calibrate against a reference mass in grams
    Calibrate {
        /// Reference mass placed on the cell
        mass_g: f32,
    },
    /// Ask the device to send its config snapshot
    GetConfig,
    /// Change one device parameter
    SetParam {
        /// Parameter being changed
        param: DeviceParam,
        /// New value, already coerced to the parameter's kind
        value: ParamValue,
    },
}

impl Command {
    /// Frame type used to carry this command
    pub fn packet_type(&self) -> PacketType {
        match self {
            Command::Tare => PacketType::Tare,
            Command::Calibrate { .. } => PacketType::Calibrate,
            Command::GetConfig => PacketType::GetConfig,
            Command::SetParam { .. } => PacketType::SetParam,
        }
    }
}

/// How a parameter's value is carried in a SET_PARAM frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// IEEE-754 single in the float slot
    Float,
    /// Unsigned 32-bit in the integer slot
    Unsigned,
    /// Signed 32-bit in the integer slot
    Signed,
}

/// A parameter value coerced to its wire kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    /// Float slot value
    Float(f32),
    /// Unsigned integer slot value
    Unsigned(u32),
    /// Signed integer slot value
    Signed(i32),
}

/// Device parameters settable through SET_PARAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceParam {
    /// `gravity`, id 0x01
    Gravity,
    /// `conversionFactor`, id 0x02
    ConversionFactor,
    /// `leiturasEstaveis`, id 0x03
    StableReadCount,
    /// `toleranciaEstabilidade`, id 0x04
    StabilityTolerance,
    /// `mode`, id 0x05
    Mode,
    /// `usarEMA`, id 0x06
    UseEma,
    /// `numAmostrasMedia`, id 0x07
    AvgSampleCount,
    /// `tareOffset`, id 0x08
    TareOffset,
    /// `timeoutCalibracao`, id 0x09
    CalibTimeout,
    /// `capacidadeMaximaGramas`, id 0x0A
    MaxCapacityGrams,
    /// `percentualAcuracia`, id 0x0B
    AccuracyPercent,
}

impl DeviceParam {
    /// All settable parameters, in id order
    pub const ALL: [DeviceParam; 11] = [
        DeviceParam::Gravity,
        DeviceParam::ConversionFactor,
        DeviceParam::StableReadCount,
        DeviceParam::StabilityTolerance,
        DeviceParam::Mode,
        DeviceParam::UseEma,
        DeviceParam::AvgSampleCount,
        DeviceParam::TareOffset,
        DeviceParam::CalibTimeout,
        DeviceParam::MaxCapacityGrams,
        DeviceParam::AccuracyPercent,
    ];

    /// Parameter id on the wire
    pub fn id(self) -> u8 {
        match self {
            DeviceParam::Gravity => 0x01,
            DeviceParam::ConversionFactor => 0x02,
            DeviceParam::StableReadCount => 0x03,
            DeviceParam::StabilityTolerance => 0x04,
            DeviceParam::Mode => 0x05,
            DeviceParam::UseEma => 0x06,
            DeviceParam::AvgSampleCount => 0x07,
            DeviceParam::TareOffset => 0x08,
            DeviceParam::CalibTimeout => 0x09,
            DeviceParam::MaxCapacityGrams => 0x0A,
            DeviceParam::AccuracyPercent => 0x0B,
        }
    }

    /// Value kind the firmware expects
    pub fn kind(self) -> ParamKind {
        match self {
            DeviceParam::Gravity
            | DeviceParam::ConversionFactor
            | DeviceParam::StabilityTolerance
            | DeviceParam::MaxCapacityGrams
            | DeviceParam::AccuracyPercent => ParamKind::Float,
            DeviceParam::StableReadCount
            | DeviceParam::Mode
            | DeviceParam::UseEma
            | DeviceParam::AvgSampleCount
            | DeviceParam::CalibTimeout => ParamKind::Unsigned,
            DeviceParam::TareOffset => ParamKind::Signed,
        }
    }

    /// Name used by the frontend (matches the config snapshot field)
    pub fn wire_name(self) -> &'static str {
        match self {
            DeviceParam::Gravity => "gravity",
            DeviceParam::ConversionFactor => "conversionFactor",
            DeviceParam::StableReadCount => "leiturasEstaveis",
            DeviceParam::StabilityTolerance => "toleranciaEstabilidade",
            DeviceParam::Mode => "mode",
            DeviceParam::UseEma => "usarEMA",
            DeviceParam::AvgSampleCount => "numAmostrasMedia",
            DeviceParam::TareOffset => "tareOffset",
            DeviceParam::CalibTimeout => "timeoutCalibracao",
            DeviceParam::MaxCapacityGrams => "capacidadeMaximaGramas",
            DeviceParam::AccuracyPercent => "percentualAcuracia",
        }
    }

    /// Look up a parameter by its frontend name (case-sensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.wire_name() == name)
    }

    /// Coerce a JSON value to this parameter's kind
    pub fn coerce(self, value: &Value) -> Result<ParamValue, ProtocolError> {
        let number = json_number(value).filter(|n| n.is_finite()).ok_or_else(|| {
            ProtocolError::CommandRejected(format!(
                "value for '{}' is not a number",
                self.wire_name()
            ))
        })?;
        let out_of_range = || {
            ProtocolError::CommandRejected(format!(
                "value {} out of range for '{}'",
                number,
                self.wire_name()
            ))
        };

        match self.kind() {
            ParamKind::Float => {
                let f = number as f32;
                if !f.is_finite() {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Float(f))
            }
            ParamKind::Unsigned => {
                let n = number.trunc();
                if !(0.0..=u32::MAX as f64).contains(&n) {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Unsigned(n as u32))
            }
            ParamKind::Signed => {
                let n = number.trunc();
                if !(i32::MIN as f64..=i32::MAX as f64).contains(&n) {
                    return Err(out_of_range());
                }
                Ok(ParamValue::Signed(n as i32))
            }
        }
    }
}

/// Something a subscriber asked for
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// A command to be encoded and written to the device
    Device(Command),
    /// Persist a recorded session through the storage collaborator
    SaveSession(Value),
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    cmd: String,
    #[serde(default)]
    massa_g: Option<Value>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

impl ClientRequest {
    /// Parse a subscriber text message.
    ///
    /// Returns `MalformedMessage` for anything that is not a recognizable
    /// command and `CommandRejected` for a recognized command with invalid
    /// arguments.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawRequest = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;

        match raw.cmd.to_lowercase().as_str() {
            "t" | "tara" => Ok(ClientRequest::Device(Command::Tare)),
            "c" | "calibrate" => {
                let mass = raw.massa_g.as_ref().and_then(json_number).unwrap_or(0.0) as f32;
                if !(mass.is_finite() && mass > 0.0) {
                    return Err(ProtocolError::CommandRejected(format!(
                        "calibration mass must be positive, got {}",
                        mass
                    )));
                }
                Ok(ClientRequest::Device(Command::Calibrate { mass_g: mass }))
            }
            "get_config" => Ok(ClientRequest::Device(Command::GetConfig)),
            "set" | "set_param" => {
                let name = raw.param.unwrap_or_default();
                let param = DeviceParam::from_name(&name).ok_or_else(|| {
                    ProtocolError::CommandRejected(format!("unknown parameter '{}'", name))
                })?;
                let value = param.coerce(&raw.value.unwrap_or(Value::from(0)))?;
                Ok(ClientRequest::Device(Command::SetParam { param, value }))
            }
            "save_session_to_mysql" => match raw.payload {
                Some(payload) if !payload.is_null() => Ok(ClientRequest::SaveSession(payload)),
                _ => Err(ProtocolError::MalformedMessage(
                    "save_session_to_mysql without payload".to_string(),
                )),
            },
            other => Err(ProtocolError::MalformedMessage(format!(
                "unknown command '{}'",
                other
            ))),
        }
    }
}

/// Accept JSON numbers and numeric strings
fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
