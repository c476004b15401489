//! Load-Cell Binary Protocol
//!
//! Implements the framed binary protocol spoken by the test-stand firmware.
//!
//! Every frame is `magic(2) + version(1) + type(1) + payload + crc16(2)`,
//! little-endian, with a fixed length per frame type.

pub mod codec;
pub mod commands;
mod crc;
mod error;
pub mod events;
mod packet;
pub mod serial;
pub mod stream;
mod sync;

pub use codec::{decode_frame, encode_command};
pub use commands::{ClientRequest, Command, DeviceParam, ParamKind, ParamValue};
pub use crc::crc16;
pub use error::ProtocolError;
pub use events::{ConfigSnapshot, DataReading, DecodedEvent, StatusKind, StatusReport};
pub use packet::{FrameBuilder, PacketType};
pub use serial::{find_device, list_ports, open_port, PortInfo};
pub use stream::{CommunicationChannel, SerialChannel};
pub use sync::{FrameSynchronizer, SyncStats};

/// Frame start marker (sent little-endian, so `B2 A1` on the wire)
pub const MAGIC: u16 = 0xA1B2;

/// Protocol version carried in every frame
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header length: magic + version + type
pub const HEADER_LEN: usize = 4;

/// Trailing CRC16 length
pub const CRC_LEN: usize = 2;

/// Smallest frame the synchronizer will attempt to parse
pub const MIN_FRAME_LEN: usize = 8;

/// Default baud rate for the test-stand firmware
pub const DEFAULT_BAUD_RATE: u32 = 921_600;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 50;
