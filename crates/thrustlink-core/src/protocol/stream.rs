//! Byte channel abstraction
//!
//! The transport driver talks to a [`CommunicationChannel`] rather than to a
//! serial port directly, so tests can script a device in memory.

use serialport::SerialPort;
use std::io::{self, Read, Write};

/// A duplex byte channel to the device
pub trait CommunicationChannel: Read + Write + Send {
    /// Discard anything already received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Human-readable identifier for logs
    fn describe(&self) -> String;
}

/// Whether a read error only means "nothing arrived before the timeout"
pub fn is_idle_read(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Serial port wrapper implementing CommunicationChannel
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl CommunicationChannel for SerialChannel {
    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn describe(&self) -> String {
        self.port.name().unwrap_or_else(|| "serial".to_string())
    }
}
