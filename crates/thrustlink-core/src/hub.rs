//! Broadcast hub
//!
//! Fans events out to every connected subscriber and routes what
//! subscribers send back: device commands go to the serial writer, session
//! saves go to the storage collaborator.
//!
//! Each subscriber gets its own bounded outbox. A payload is serialized
//! once and the same `Arc<str>` is queued for everyone. A subscriber whose
//! outbox is gone, or full because it stopped reading, is removed on the
//! spot without affecting the others.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::bridge::{EventReceiver, HubEvent};
use crate::protocol::{encode_command, ClientRequest, Command, PacketType, ProtocolError};
use crate::status::{Connectivity, SerialStatusReader};
use crate::storage::{SessionRecord, SessionStore};
use crate::transport::FrameSink;

/// Identifies one subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Messages a subscriber may have queued before it is dropped as stalled
pub const OUTBOX_CAPACITY: usize = 1024;

/// Receiving end of a subscriber's queue; each item is one JSON text message
pub type Outbox = mpsc::Receiver<Arc<str>>;

type Inbox = mpsc::Sender<Arc<str>>;

/// Result of one delivery attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the subscriber
    Delivered,
    /// The subscriber's connection is gone
    Closed,
    /// The subscriber's outbox is full; it is not keeping up
    Lagged,
}

/// Aggregate outcome of a broadcast
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the payload was queued for
    pub delivered: usize,
    /// Subscribers removed because delivery failed
    pub removed: Vec<SubscriberId>,
}

/// What happened to an inbound subscriber message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Encoded and written to the device
    Forwarded(PacketType),
    /// Encoded, but the device write failed
    WriteFailed(String),
    /// Session handed to storage; `true` if it was saved
    SessionSaved(bool),
    /// Recognized command with invalid arguments; the sender was told
    Rejected(String),
    /// Not a recognizable command; logged and dropped
    Ignored(String),
}

/// Fan-out point between the serial driver and subscriber connections
pub struct Hub {
    subscribers: Mutex<HashMap<SubscriberId, Inbox>>,
    next_id: AtomicU64,
    capacity: usize,
    sink: Arc<dyn FrameSink>,
    serial: SerialStatusReader,
    store: Arc<dyn SessionStore>,
}

impl Hub {
    /// Create a hub writing commands to `sink` and saving sessions to `store`
    pub fn new(
        sink: Arc<dyn FrameSink>,
        serial: SerialStatusReader,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self::with_capacity(sink, serial, store, OUTBOX_CAPACITY)
    }

    /// Like [`Hub::new`] with a custom per-subscriber queue limit
    pub fn with_capacity(
        sink: Arc<dyn FrameSink>,
        serial: SerialStatusReader,
        store: Arc<dyn SessionStore>,
        capacity: usize,
    ) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            sink,
            serial,
            store,
        }
    }

    /// Current connectivity flags
    pub fn connectivity(&self) -> Connectivity {
        Connectivity::sample(&self.serial, self.store.is_connected())
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Register a subscriber; its outbox already holds a connectivity snapshot
    pub fn subscribe(&self) -> (SubscriberId, Outbox) {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.capacity);

        match serde_json::to_string(&self.connectivity()) {
            Ok(snapshot) => {
                let _ = tx.try_send(Arc::from(snapshot));
            }
            Err(e) => error!(error = %e, "failed to serialize connectivity snapshot"),
        }

        self.subscribers.lock().insert(id, tx);
        info!(subscriber = %id, "subscriber connected");
        (id, rx)
    }

    /// Remove a subscriber; removing an unknown id is a no-op
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            info!(subscriber = %id, "subscriber disconnected");
        }
        removed
    }

    /// Serialize `event` once with connectivity flags and queue it for everyone
    pub fn broadcast(&self, event: &HubEvent) -> BroadcastReport {
        let Some(payload) = self.render(event) else {
            return BroadcastReport::default();
        };

        let targets: Vec<(SubscriberId, Inbox)> = self
            .subscribers
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (id, tx) in targets {
            match deliver(&tx, &payload) {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Closed => report.removed.push(id),
                Delivery::Lagged => {
                    warn!(
                        subscriber = %id,
                        capacity = self.capacity,
                        "subscriber outbox full, dropping subscriber"
                    );
                    report.removed.push(id);
                }
            }
        }

        if !report.removed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in &report.removed {
                subscribers.remove(id);
                debug!(subscriber = %id, "removed subscriber after failed delivery");
            }
        }
        report
    }

    /// Consume the bridge until the driver side is gone
    pub async fn run(self: Arc<Self>, mut events: EventReceiver) {
        while let Some(event) = events.recv().await {
            self.broadcast(&event);
        }
        info!("event bridge closed, hub loop exiting");
    }

    /// Handle one text message from subscriber `id`
    pub async fn handle_inbound(&self, id: SubscriberId, message: &str) -> InboundOutcome {
        match ClientRequest::parse(message) {
            Ok(ClientRequest::Device(command)) => self.forward(id, message, command).await,
            Ok(ClientRequest::SaveSession(payload)) => self.save_session(id, payload).await,
            Err(ProtocolError::CommandRejected(reason)) => self.reject(id, message, reason),
            Err(e) => {
                warn!(subscriber = %id, error = %e, "ignoring subscriber message");
                InboundOutcome::Ignored(e.to_string())
            }
        }
    }

    async fn forward(&self, id: SubscriberId, message: &str, command: Command) -> InboundOutcome {
        let frame = match encode_command(&command) {
            Ok(frame) => frame,
            Err(ProtocolError::CommandRejected(reason)) => return self.reject(id, message, reason),
            Err(e) => return InboundOutcome::Ignored(e.to_string()),
        };

        let kind = command.packet_type();
        let sink = Arc::clone(&self.sink);
        let written = tokio::task::spawn_blocking(move || sink.send_frame(&frame)).await;
        match written {
            Ok(Ok(())) => {
                debug!(subscriber = %id, command = kind.name(), "command sent to device");
                InboundOutcome::Forwarded(kind)
            }
            Ok(Err(e)) => {
                error!(subscriber = %id, command = kind.name(), error = %e, "failed to send command");
                InboundOutcome::WriteFailed(e.to_string())
            }
            Err(e) => {
                error!(subscriber = %id, command = kind.name(), error = %e, "command writer task failed");
                InboundOutcome::WriteFailed(e.to_string())
            }
        }
    }

    async fn save_session(&self, id: SubscriberId, payload: Value) -> InboundOutcome {
        let name = payload.get("nome").cloned().unwrap_or(Value::Null);
        let session_id = payload.get("id").cloned().unwrap_or(Value::Null);

        let saved = match SessionRecord::from_payload(payload) {
            Ok(record) => {
                info!(subscriber = %id, session = %record.name, "saving session");
                self.store.save(record).await
            }
            Err(e) => {
                error!(subscriber = %id, error = %e, "session not saved");
                false
            }
        };

        let kind = if saved {
            "mysql_save_success"
        } else {
            "mysql_save_error"
        };
        self.reply(
            id,
            &json!({"type": kind, "message": name, "sessionId": session_id}),
        );
        InboundOutcome::SessionSaved(saved)
    }

    fn reject(&self, id: SubscriberId, message: &str, reason: String) -> InboundOutcome {
        warn!(subscriber = %id, reason = %reason, "command rejected");
        let cmd = serde_json::from_str::<Value>(message)
            .ok()
            .and_then(|v| v.get("cmd").cloned())
            .unwrap_or(Value::Null);
        self.reply(
            id,
            &json!({"type": "command_rejected", "cmd": cmd, "reason": reason}),
        );
        InboundOutcome::Rejected(reason)
    }

    /// Send a message to one subscriber only
    fn reply(&self, id: SubscriberId, value: &Value) -> Delivery {
        let Some(tx) = self.subscribers.lock().get(&id).cloned() else {
            return Delivery::Closed;
        };
        let delivery = deliver(&tx, &Arc::from(value.to_string()));
        if delivery != Delivery::Delivered {
            self.unsubscribe(id);
        }
        delivery
    }

    fn render(&self, event: &HubEvent) -> Option<Arc<str>> {
        let mut value = match serde_json::to_value(event) {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "failed to serialize event");
                return None;
            }
        };
        let flags = self.connectivity();
        if let Value::Object(map) = &mut value {
            map.insert("mysql_connected".into(), flags.mysql_connected.into());
            map.insert("serial_connected".into(), flags.serial_connected.into());
            map.insert("serial_error".into(), flags.serial_error.into());
        }
        Some(Arc::from(value.to_string()))
    }
}

fn deliver(tx: &Inbox, payload: &Arc<str>) -> Delivery {
    match tx.try_send(Arc::clone(payload)) {
        Ok(()) => Delivery::Delivered,
        Err(TrySendError::Full(_)) => Delivery::Lagged,
        Err(TrySendError::Closed(_)) => Delivery::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DataReading, DecodedEvent};
    use crate::status::SerialStatus;
    use crate::storage::NullStore;

    struct NoDevice;

    impl FrameSink for NoDevice {
        fn send_frame(&self, _frame: &[u8]) -> Result<(), ProtocolError> {
            Err(ProtocolError::NotConnected)
        }
    }

    fn hub() -> (Hub, SerialStatus) {
        let status = SerialStatus::new();
        let hub = Hub::new(Arc::new(NoDevice), status.reader(), Arc::new(NullStore));
        (hub, status)
    }

    fn sample() -> HubEvent {
        HubEvent::Device(DecodedEvent::Data(DataReading {
            time_s: 1.0,
            force_n: Some(12.5),
            status: 0,
        }))
    }

    #[test]
    fn test_subscribe_sends_snapshot() {
        let (hub, status) = hub();
        status.set_disconnected("no device");
        let (_id, mut outbox) = hub.subscribe();
        let snapshot: Value = serde_json::from_str(&outbox.try_recv().unwrap()).unwrap();
        assert_eq!(
            snapshot,
            json!({"mysql_connected": false, "serial_connected": false, "serial_error": "no device"})
        );
    }

    #[test]
    fn test_broadcast_attaches_flags() {
        let (hub, status) = hub();
        status.set_connected();
        let (_id, mut outbox) = hub.subscribe();
        outbox.try_recv().unwrap();

        let report = hub.broadcast(&sample());
        assert_eq!(report.delivered, 1);
        let payload: Value = serde_json::from_str(&outbox.try_recv().unwrap()).unwrap();
        assert_eq!(
            payload,
            json!({
                "type": "data", "tempo": 1.0, "forca": 12.5, "status": 0,
                "mysql_connected": false, "serial_connected": true, "serial_error": null
            })
        );
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let (hub, _status) = hub();
        let (id, _outbox) = hub.subscribe();
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_not_fatal() {
        let (hub, _status) = hub();
        let (id, _outbox) = hub.subscribe();
        let outcome = hub.handle_inbound(id, r#"{"cmd":"tara"}"#).await;
        assert!(matches!(outcome, InboundOutcome::WriteFailed(_)));
        assert_eq!(hub.subscriber_count(), 1);
    }
}
