//! Serial transport driver
//!
//! Owns the device connection lifecycle on a dedicated thread:
//!
//! ```text
//! Disconnected ──locate──▶ Connecting ──open──▶ Connected
//!      ▲  │ (absent: 5s)                           │ I/O error
//!      │  ▼                                        ▼
//!      └──────────────── Reconnecting (3s) ◀───────┘
//! ```
//!
//! Decoded frames and link transitions leave the thread only through the
//! [`EventSender`]. Outbound writes go through a [`DeviceWriter`], which
//! takes the same lock the reader holds around the handle, so a write never
//! races a reconnect.

use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::bridge::{EventSender, HubEvent, SerialStatusEvent};
use crate::protocol::stream::is_idle_read;
use crate::protocol::{
    find_device, open_port, CommunicationChannel, FrameSynchronizer, ProtocolError, SerialChannel,
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS,
};
use crate::status::{SerialStatus, SerialStatusReader};

/// Default device path tried before scanning
pub const DEFAULT_PORT_PATH: &str = "/dev/ttyUSB0";

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Path tried first; when missing, removable-looking ports are scanned
    pub port_path: Option<String>,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout; an empty read is not an error
    pub read_timeout: Duration,
    /// Wait between attempts while no device is present
    pub absent_backoff: Duration,
    /// Wait after an I/O failure before reconnecting
    pub failure_backoff: Duration,
    /// Device-absent occurrences that are broadcast before going quiet
    pub absent_broadcast_limit: u32,
    /// Size of each read from the port
    pub read_chunk: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_path: Some(DEFAULT_PORT_PATH.to_string()),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            absent_backoff: Duration::from_secs(5),
            failure_backoff: Duration::from_secs(3),
            absent_broadcast_limit: 5,
            read_chunk: 256,
        }
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No handle; looking for a device
    Disconnected,
    /// Device found, opening it
    Connecting,
    /// Port open and being read
    Connected,
    /// Backing off after an I/O failure
    Reconnecting,
}

/// How the driver finds and opens the device
pub trait PortOpener: Send + 'static {
    /// Path of the device to open, if one is present
    fn locate(&mut self) -> Option<String>;

    /// Open the device at `path`
    fn open(&mut self, path: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError>;
}

/// Opens real serial ports
#[derive(Debug, Clone)]
pub struct SerialOpener {
    configured: Option<String>,
    baud_rate: u32,
    timeout: Duration,
}

impl SerialOpener {
    /// Build an opener from the driver config
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            configured: config.port_path.clone(),
            baud_rate: config.baud_rate,
            timeout: config.read_timeout,
        }
    }
}

impl PortOpener for SerialOpener {
    fn locate(&mut self) -> Option<String> {
        find_device(self.configured.as_deref())
    }

    fn open(&mut self, path: &str) -> Result<Box<dyn CommunicationChannel>, ProtocolError> {
        let port = open_port(path, self.baud_rate, self.timeout)?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

type SharedChannel = Arc<Mutex<Option<Box<dyn CommunicationChannel>>>>;

/// Destination for encoded command frames
pub trait FrameSink: Send + Sync + 'static {
    /// Write one complete frame to the device
    fn send_frame(&self, frame: &[u8]) -> Result<(), ProtocolError>;
}

/// Writes frames to whatever handle the driver currently holds
#[derive(Clone)]
pub struct DeviceWriter {
    channel: SharedChannel,
}

impl DeviceWriter {
    /// Write and flush `frame`; fails immediately if no port is open
    pub fn write_frame(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        let mut guard = self.channel.lock();
        let channel = guard.as_mut().ok_or(ProtocolError::NotConnected)?;
        channel.write_all(frame)?;
        channel.flush()?;
        Ok(())
    }
}

impl FrameSink for DeviceWriter {
    fn send_frame(&self, frame: &[u8]) -> Result<(), ProtocolError> {
        self.write_frame(frame)
    }
}

/// Handle to a running driver thread
pub struct DriverHandle {
    writer: DeviceWriter,
    status: SerialStatusReader,
    state: Arc<Mutex<DriverState>>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DriverHandle {
    /// Writer sharing the driver's handle lock
    pub fn writer(&self) -> DeviceWriter {
        self.writer.clone()
    }

    /// Read-only view of the serial connectivity flag
    pub fn status(&self) -> SerialStatusReader {
        self.status.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    /// Ask the thread to stop and wait for it
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("serial driver thread panicked");
            }
        }
    }
}

impl Drop for DriverHandle {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

/// The driver itself; lives on its own thread once spawned
pub struct TransportDriver<O: PortOpener> {
    config: DriverConfig,
    opener: O,
    channel: SharedChannel,
    status: SerialStatus,
    state: Arc<Mutex<DriverState>>,
    events: EventSender,
    shutdown: Arc<AtomicBool>,
    absent_count: u32,
    sync: FrameSynchronizer,
}

impl TransportDriver<SerialOpener> {
    /// Spawn a driver for real serial hardware
    pub fn spawn(config: DriverConfig, events: EventSender) -> Result<DriverHandle, ProtocolError> {
        let opener = SerialOpener::new(&config);
        TransportDriver::spawn_with(config, opener, events)
    }
}

impl<O: PortOpener> TransportDriver<O> {
    /// Spawn a driver with a custom opener
    pub fn spawn_with(
        config: DriverConfig,
        opener: O,
        events: EventSender,
    ) -> Result<DriverHandle, ProtocolError> {
        let channel: SharedChannel = Arc::new(Mutex::new(None));
        let status = SerialStatus::new();
        let state = Arc::new(Mutex::new(DriverState::Disconnected));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle_parts = (
            DeviceWriter {
                channel: Arc::clone(&channel),
            },
            status.reader(),
            Arc::clone(&state),
            Arc::clone(&shutdown),
        );

        let driver = TransportDriver {
            config,
            opener,
            channel,
            status,
            state,
            events,
            shutdown,
            absent_count: 0,
            sync: FrameSynchronizer::new(),
        };

        let thread = thread::Builder::new()
            .name("thrustlink-serial".to_string())
            .spawn(move || driver.run())?;

        let (writer, status, state, shutdown) = handle_parts;
        Ok(DriverHandle {
            writer,
            status,
            state,
            shutdown,
            thread: Some(thread),
        })
    }

    fn run(mut self) {
        info!("serial driver started");
        while !self.stopping() {
            self.set_state(DriverState::Disconnected);

            let Some(path) = self.opener.locate() else {
                self.on_absent();
                continue;
            };

            self.set_state(DriverState::Connecting);
            info!(port = %path, baud = self.config.baud_rate, "opening serial port");
            let result = self
                .opener
                .open(&path)
                .and_then(|channel| self.session(&path, channel));

            if let Err(e) = result {
                self.on_failure(e);
            }
        }
        self.set_state(DriverState::Disconnected);
        info!("serial driver stopped");
    }

    /// Read until an I/O error or shutdown; the handle is dropped on return
    fn session(
        &mut self,
        path: &str,
        mut channel: Box<dyn CommunicationChannel>,
    ) -> Result<(), ProtocolError> {
        if let Err(e) = channel.clear_input_buffer() {
            debug!(error = %e, "could not clear input buffer");
        }
        info!(port = %path, device = %channel.describe(), "serial port connected");
        *self.channel.lock() = Some(channel);

        self.absent_count = 0;
        self.sync.reset();
        self.status.set_connected();
        self.set_state(DriverState::Connected);
        self.publish(SerialStatusEvent::connected(path, self.config.baud_rate));

        let result = self.read_loop();
        *self.channel.lock() = None;
        result
    }

    fn read_loop(&mut self) -> Result<(), ProtocolError> {
        let mut buf = vec![0u8; self.config.read_chunk.max(1)];
        while !self.stopping() {
            let read = {
                let mut guard = self.channel.lock();
                match guard.as_mut() {
                    Some(channel) => channel.read(&mut buf),
                    None => return Err(ProtocolError::NotConnected),
                }
            };

            match read {
                Ok(0) => continue,
                Ok(n) => {
                    for event in self.sync.push(&buf[..n]) {
                        self.publish(event);
                    }
                }
                Err(e) if is_idle_read(&e) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn on_absent(&mut self) {
        self.absent_count += 1;
        let limit = self.config.absent_broadcast_limit;
        let message = ProtocolError::DeviceAbsent.to_string();
        self.status.set_disconnected(message.clone());
        if self.absent_count <= limit {
            warn!(attempt = self.absent_count, "serial device not found, waiting for USB device");
            self.publish(SerialStatusEvent::disconnected(message));
        } else if self.absent_count == limit + 1 {
            warn!("serial device still not found, retrying silently in background");
        }
        self.backoff(self.config.absent_backoff);
    }

    fn on_failure(&mut self, err: ProtocolError) {
        let message = format!("Serial communication error: {}", err);
        error!(error = %err, "serial link failed");
        self.status.set_disconnected(message.clone());
        self.set_state(DriverState::Reconnecting);
        self.publish(SerialStatusEvent::disconnected(message));
        self.backoff(self.config.failure_backoff);
    }

    fn publish(&mut self, event: impl Into<HubEvent>) {
        if !self.events.publish(event) {
            debug!("hub receiver closed, stopping serial driver");
            self.shutdown.store(true, Ordering::SeqCst);
        }
    }

    fn set_state(&self, state: DriverState) {
        *self.state.lock() = state;
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Sleep in short slices so shutdown is noticed promptly
    fn backoff(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}
