//! Protocol errors

use thiserror::Error;

/// Errors that can occur while framing, decoding, encoding or talking to the device
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The port could not be opened or configured
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No port is open
    #[error("Not connected to device")]
    NotConnected,

    /// No candidate device path exists
    #[error("USB device not found. Check the ESP32/NodeMCU connection.")]
    DeviceAbsent,

    /// Frame shorter or longer than its type declares
    #[error("Frame length mismatch for {kind}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Frame type name
        kind: &'static str,
        /// Declared length
        expected: usize,
        /// Bytes received
        actual: usize,
    },

    /// Frame does not start with the magic marker
    #[error("Bad magic: {0:#06x}")]
    BadMagic(u16),

    /// Unsupported version byte
    #[error("Unsupported protocol version: {0:#04x}")]
    BadVersion(u8),

    /// Type byte is not an inbound frame type
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Frame checksum does not match
    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch {
        /// CRC computed over the frame
        expected: u16,
        /// CRC carried in the frame
        actual: u16,
    },

    /// Recognized command with invalid arguments
    #[error("Command rejected: {0}")]
    CommandRejected(String),

    /// Subscriber message is not a recognizable command
    #[error("Malformed client message: {0}")]
    MalformedMessage(String),

    /// Read or write on the open port failed
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error describes a bad frame rather than a transport failure
    pub fn is_malformed_frame(&self) -> bool {
        matches!(
            self,
            ProtocolError::LengthMismatch { .. }
                | ProtocolError::BadMagic(_)
                | ProtocolError::BadVersion(_)
                | ProtocolError::UnknownFrameType(_)
                | ProtocolError::CrcMismatch { .. }
        )
    }
}
