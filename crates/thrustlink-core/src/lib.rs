//! # ThrustLink Core Library
//!
//! Core functionality for the ThrustLink test-stand bridge.
//!
//! This library provides:
//! - The load-cell binary wire protocol (CRC16 framing, decode, command encode)
//! - A frame synchronizer that recovers from noise and partial reads
//! - A serial transport driver running on a dedicated thread
//! - A broadcast hub fanning telemetry out to WebSocket subscribers
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use thrustlink_core::{bridge, hub::Hub, storage::NullStore, transport::{DriverConfig, TransportDriver}};
//!
//! let (events, receiver) = bridge::event_channel();
//! let driver = TransportDriver::spawn(DriverConfig::default(), events)?;
//! let hub = Arc::new(Hub::new(Arc::new(driver.writer()), driver.status(), Arc::new(NullStore)));
//! tokio::spawn(hub.clone().run(receiver));
//! ```

#![warn(missing_docs)]

pub mod bridge;
pub mod hub;
pub mod protocol;
pub mod status;
pub mod storage;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{event_channel, EventReceiver, EventSender, HubEvent};
    pub use crate::hub::{BroadcastReport, Delivery, Hub, SubscriberId};
    pub use crate::protocol::{
        crc16, decode_frame, encode_command, ClientRequest, Command, DecodedEvent, DeviceParam,
        FrameSynchronizer, ProtocolError,
    };
    pub use crate::status::{SerialStatus, SerialStatusReader};
    pub use crate::storage::{NullStore, SessionRecord, SessionStore};
    pub use crate::transport::{DriverConfig, DriverHandle, DriverState, TransportDriver};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
