//! Connectivity flags
//!
//! Each flag has exactly one writer. [`SerialStatus`] is owned by the
//! transport driver and is deliberately not `Clone`; everyone else holds a
//! [`SerialStatusReader`].

use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct SerialState {
    connected: bool,
    last_error: Option<String>,
}

/// Write side of the serial connectivity flag
#[derive(Debug, Default)]
pub struct SerialStatus {
    inner: Arc<RwLock<SerialState>>,
}

impl SerialStatus {
    /// Start out disconnected with no error
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only view that can be handed to other components
    pub fn reader(&self) -> SerialStatusReader {
        SerialStatusReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Mark the link up and clear any previous error
    pub fn set_connected(&self) {
        let mut state = self.write();
        state.connected = true;
        state.last_error = None;
    }

    /// Mark the link down with the reason
    pub fn set_disconnected(&self, error: impl Into<String>) {
        let mut state = self.write();
        state.connected = false;
        state.last_error = Some(error.into());
    }

    fn write(&self) -> RwLockWriteGuard<'_, SerialState> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Read side of the serial connectivity flag
#[derive(Debug, Clone)]
pub struct SerialStatusReader {
    inner: Arc<RwLock<SerialState>>,
}

impl SerialStatusReader {
    /// Whether the serial link is currently up
    pub fn connected(&self) -> bool {
        self.read().connected
    }

    /// The most recent failure description, if the link is down
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, SerialState> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// The flags attached to every payload sent to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connectivity {
    /// Session store reachable
    pub mysql_connected: bool,
    /// Serial link up
    pub serial_connected: bool,
    /// Last serial error, if any
    pub serial_error: Option<String>,
}

impl Connectivity {
    /// Sample both flags at once
    pub fn sample(serial: &SerialStatusReader, mysql_connected: bool) -> Self {
        let state = serial.read();
        Self {
            mysql_connected,
            serial_connected: state.connected,
            serial_error: state.last_error.clone(),
        }
    }
}
