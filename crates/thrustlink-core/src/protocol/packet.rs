//! Frame layout and construction
//!
//! Frame format:
//! - 2 bytes: Magic 0xA1B2 (little-endian)
//! - 1 byte: Protocol version
//! - 1 byte: Frame type
//! - N bytes: Type-specific payload
//! - 2 bytes: CRC16 of everything before it (little-endian)

use byteorder::{ByteOrder, LittleEndian};

use super::{crc16, ProtocolError, CRC_LEN, HEADER_LEN, MAGIC, PROTOCOL_VERSION};

/// Every frame type the protocol defines, inbound and outbound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Force sample (device → host)
    Data,
    /// Parameter snapshot (device → host)
    Config,
    /// Status / acknowledgement (device → host)
    Status,
    /// Zero the load cell (host → device)
    Tare,
    /// Calibrate against a reference mass (host → device)
    Calibrate,
    /// Request a config snapshot (host → device)
    GetConfig,
    /// Set one device parameter (host → device)
    SetParam,
}

impl PacketType {
    /// Type byte on the wire
    pub fn code(self) -> u8 {
        match self {
            PacketType::Data => 0x01,
            PacketType::Config => 0x02,
            PacketType::Status => 0x03,
            PacketType::Tare => 0x10,
            PacketType::Calibrate => 0x11,
            PacketType::GetConfig => 0x12,
            PacketType::SetParam => 0x13,
        }
    }

    /// Resolve any known type byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(PacketType::Data),
            0x02 => Some(PacketType::Config),
            0x03 => Some(PacketType::Status),
            0x10 => Some(PacketType::Tare),
            0x11 => Some(PacketType::Calibrate),
            0x12 => Some(PacketType::GetConfig),
            0x13 => Some(PacketType::SetParam),
            _ => None,
        }
    }

    /// Resolve only types the device sends to us
    pub fn inbound(code: u8) -> Option<Self> {
        Self::from_code(code).filter(|t| t.is_inbound())
    }

    /// Whether the device emits this type
    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            PacketType::Data | PacketType::Config | PacketType::Status
        )
    }

    /// Total frame length in bytes, header and CRC included
    pub fn frame_len(self) -> usize {
        match self {
            PacketType::Data => 16,
            PacketType::Config => 64,
            PacketType::Status => 14,
            PacketType::Tare => 8,
            PacketType::Calibrate => 10,
            PacketType::GetConfig => 8,
            PacketType::SetParam => 18,
        }
    }

    /// Short name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            PacketType::Data => "data",
            PacketType::Config => "config",
            PacketType::Status => "status",
            PacketType::Tare => "tare",
            PacketType::Calibrate => "calibrate",
            PacketType::GetConfig => "get_config",
            PacketType::SetParam => "set_param",
        }
    }
}

/// Check length, magic, version, type and CRC of a complete frame.
///
/// On success returns the payload slice (between header and CRC).
pub fn validate_frame(data: &[u8], expected: PacketType) -> Result<&[u8], ProtocolError> {
    let len = expected.frame_len();
    if data.len() != len {
        return Err(ProtocolError::LengthMismatch {
            kind: expected.name(),
            expected: len,
            actual: data.len(),
        });
    }

    let magic = LittleEndian::read_u16(&data[0..2]);
    if magic != MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    if data[2] != PROTOCOL_VERSION {
        return Err(ProtocolError::BadVersion(data[2]));
    }
    if data[3] != expected.code() {
        return Err(ProtocolError::UnknownFrameType(data[3]));
    }

    let received = LittleEndian::read_u16(&data[len - CRC_LEN..]);
    let computed = crc16(&data[..len - CRC_LEN]);
    if received != computed {
        return Err(ProtocolError::CrcMismatch {
            expected: computed,
            actual: received,
        });
    }

    Ok(&data[HEADER_LEN..len - CRC_LEN])
}

/// Builder for constructing frames
pub struct FrameBuilder {
    kind: PacketType,
    bytes: Vec<u8>,
}

impl FrameBuilder {
    /// Start a frame of the given type with the standard header
    pub fn new(kind: PacketType) -> Self {
        let mut bytes = Vec::with_capacity(kind.frame_len());
        let mut magic = [0u8; 2];
        LittleEndian::write_u16(&mut magic, MAGIC);
        bytes.extend_from_slice(&magic);
        bytes.push(PROTOCOL_VERSION);
        bytes.push(kind.code());
        Self { kind, bytes }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.bytes.push(b);
        self
    }

    /// Add `count` zero bytes of padding
    pub fn pad(mut self, count: usize) -> Self {
        self.bytes.resize(self.bytes.len() + count, 0);
        self
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Add a 32-bit value (little-endian)
    pub fn u32_le(mut self, value: u32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Add a signed 32-bit value (little-endian)
    pub fn i32_le(mut self, value: i32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Add an IEEE-754 single (little-endian)
    pub fn f32_le(mut self, value: f32) -> Self {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, value);
        self.bytes.extend_from_slice(&buf);
        self
    }

    /// Zero-fill up to the declared length and append the CRC.
    ///
    /// A payload that already overruns the declared length is a programming
    /// error in the caller; it is truncated so the frame stays well-formed.
    pub fn build(mut self) -> Vec<u8> {
        let body_len = self.kind.frame_len() - CRC_LEN;
        self.bytes.resize(body_len, 0);
        let crc = crc16(&self.bytes);
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, crc);
        self.bytes.extend_from_slice(&buf);
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_header_and_length() {
        let frame = FrameBuilder::new(PacketType::Tare).u16_le(0).build();
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[..4], &[0xB2, 0xA1, 0x01, 0x10]);
    }

    #[test]
    fn test_validate_accepts_built_frame() {
        let frame = FrameBuilder::new(PacketType::Status)
            .byte(1)
            .byte(0x10)
            .u16_le(7)
            .u32_le(1234)
            .build();
        let payload = validate_frame(&frame, PacketType::Status).expect("valid frame");
        assert_eq!(payload.len(), 8);
    }

    #[test]
    fn test_crc_verification() {
        let mut frame = FrameBuilder::new(PacketType::Calibrate).f32_le(500.0).build();
        frame[5] ^= 0xFF;
        assert!(matches!(
            validate_frame(&frame, PacketType::Calibrate),
            Err(ProtocolError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let frame = FrameBuilder::new(PacketType::Data).build();
        assert!(matches!(
            validate_frame(&frame[..15], PacketType::Data),
            Err(ProtocolError::LengthMismatch { expected: 16, actual: 15, .. })
        ));
    }

    #[test]
    fn test_inbound_lookup_excludes_commands() {
        assert_eq!(PacketType::inbound(0x02), Some(PacketType::Config));
        assert_eq!(PacketType::inbound(0x10), None);
        assert_eq!(PacketType::inbound(0x7F), None);
    }
}
