//! Packet codec
//!
//! Decodes fixed-size inbound frames into [`DecodedEvent`]s and encodes
//! [`Command`]s into outbound frames.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, info};

use super::events::{finite, status_message};
use super::packet::validate_frame;
use super::{
    Command, ConfigSnapshot, DataReading, DecodedEvent, FrameBuilder, PacketType, ParamValue,
    ProtocolError, StatusKind, StatusReport, HEADER_LEN,
};

/// Decode one complete inbound frame.
///
/// `data` must be exactly the declared length for its type byte. Every
/// failure is reported as an error and never panics; callers treat any
/// error the same way as line noise.
pub fn decode_frame(data: &[u8]) -> Result<DecodedEvent, ProtocolError> {
    let code = *data.get(3).ok_or(ProtocolError::LengthMismatch {
        kind: "frame",
        expected: HEADER_LEN,
        actual: data.len(),
    })?;
    let kind = PacketType::inbound(code).ok_or(ProtocolError::UnknownFrameType(code))?;
    let payload = validate_frame(data, kind)?;

    let event = match kind {
        PacketType::Data => DecodedEvent::Data(decode_data(payload)),
        PacketType::Config => DecodedEvent::Config(decode_config(payload)),
        PacketType::Status => DecodedEvent::Status(decode_status(payload)),
        _ => return Err(ProtocolError::UnknownFrameType(code)),
    };
    Ok(event)
}

// Payload offsets below are relative to the end of the 4-byte header.

fn decode_data(p: &[u8]) -> DataReading {
    DataReading {
        time_s: LittleEndian::read_u32(&p[0..4]) as f64 / 1000.0,
        force_n: finite(LittleEndian::read_f32(&p[4..8])),
        status: p[8],
    }
}

fn decode_config(p: &[u8]) -> ConfigSnapshot {
    let config = ConfigSnapshot {
        conversion_factor: finite(LittleEndian::read_f32(&p[0..4])),
        gravity: finite(LittleEndian::read_f32(&p[4..8])),
        stable_read_count: LittleEndian::read_u16(&p[8..10]),
        stability_tolerance: finite(LittleEndian::read_f32(&p[10..14])),
        avg_sample_count: LittleEndian::read_u16(&p[14..16]),
        calib_sample_count: LittleEndian::read_u16(&p[16..18]),
        use_moving_avg: p[18],
        use_ema: p[19],
        calib_timeout: LittleEndian::read_u16(&p[20..22]),
        tare_offset: LittleEndian::read_i32(&p[22..26]),
        max_capacity_grams: finite(LittleEndian::read_f32(&p[26..30])),
        accuracy_percent: finite(LittleEndian::read_f32(&p[30..34])),
        mode: p[34],
    };
    info!(
        max_capacity_grams = ?config.max_capacity_grams,
        accuracy_percent = ?config.accuracy_percent,
        "received device config"
    );
    config
}

fn decode_status(p: &[u8]) -> StatusReport {
    let code = p[1];
    StatusReport {
        status: StatusKind::from_byte(p[0]),
        message: status_message(code),
        code,
        value: LittleEndian::read_u16(&p[2..4]),
        timestamp: LittleEndian::read_u32(&p[4..8]) as f64 / 1000.0,
    }
}

/// Encode a command into its outbound frame.
///
/// A calibration with a non-positive or non-finite mass is rejected here as
/// well as at parse time, since `Command` can be built directly.
pub fn encode_command(command: &Command) -> Result<Vec<u8>, ProtocolError> {
    let builder = FrameBuilder::new(command.packet_type());
    let frame = match *command {
        Command::Tare | Command::GetConfig => builder.u16_le(0).build(),
        Command::Calibrate { mass_g } => {
            if !(mass_g.is_finite() && mass_g > 0.0) {
                return Err(ProtocolError::CommandRejected(format!(
                    "calibration mass must be positive, got {}",
                    mass_g
                )));
            }
            builder.f32_le(mass_g).build()
        }
        Command::SetParam { param, value } => {
            let (float_slot, int_slot) = match value {
                ParamValue::Float(f) => (f, 0u32),
                ParamValue::Unsigned(u) => (0.0, u),
                ParamValue::Signed(i) => (0.0, i as u32),
            };
            builder
                .byte(param.id())
                .pad(3)
                .f32_le(float_slot)
                .u32_le(int_slot)
                .build()
        }
    };
    debug!(command = command.packet_type().name(), frame = ?frame, "encoded command");
    Ok(frame)
}
