//! Reader-thread → scheduler bridge
//!
//! The transport driver lives on a plain OS thread because serial reads
//! block. Everything it produces crosses to the async side through this
//! channel and nothing else: the sending half is synchronous and never
//! blocks, the receiving half is awaited on the hub's own task.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::DecodedEvent;

/// Something the hub should broadcast
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HubEvent {
    /// A frame decoded from the device
    Device(DecodedEvent),
    /// The serial link went up or down
    SerialStatus(SerialStatusEvent),
}

impl From<DecodedEvent> for HubEvent {
    fn from(event: DecodedEvent) -> Self {
        HubEvent::Device(event)
    }
}

impl From<SerialStatusEvent> for HubEvent {
    fn from(event: SerialStatusEvent) -> Self {
        HubEvent::SerialStatus(event)
    }
}

/// Serial link transition, sent as `{"type":"serial_status", ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename = "serial_status")]
pub struct SerialStatusEvent {
    /// Link is up
    pub connected: bool,
    /// Device path, on connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Line speed, on connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baudrate: Option<u32>,
    /// Reason, on disconnect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SerialStatusEvent {
    /// The port opened successfully
    pub fn connected(port: impl Into<String>, baudrate: u32) -> Self {
        Self {
            connected: true,
            port: Some(port.into()),
            baudrate: Some(baudrate),
            error: None,
        }
    }

    /// The link is down
    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            port: None,
            baudrate: None,
            error: Some(error.into()),
        }
    }
}

/// Create a connected sender/receiver pair
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

/// Thread-side handle; safe to use from any thread, never blocks
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<HubEvent>,
}

impl EventSender {
    /// Hand an event to the scheduler. Returns `false` once the receiving
    /// side is gone.
    pub fn publish(&self, event: impl Into<HubEvent>) -> bool {
        self.tx.send(event.into()).is_ok()
    }

    /// Whether the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Scheduler-side handle, consumed by the hub loop
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<HubEvent>,
}

impl EventReceiver {
    /// Wait for the next event; `None` when every sender is gone
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }
}
