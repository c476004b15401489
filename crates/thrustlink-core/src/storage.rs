//! Session persistence collaborator
//!
//! ThrustLink never talks to a database itself. A subscriber's
//! `save_session_to_mysql` request is validated into a [`SessionRecord`] and
//! handed to whatever [`SessionStore`] the process was wired with.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::protocol::ProtocolError;

/// A recorded test session as sent by the browser
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Browser-assigned identifier (number or string)
    pub id: Value,
    /// Session name
    #[serde(rename = "nome")]
    pub name: String,
    /// ISO-8601 start time
    pub timestamp: String,
    /// Readings table, metadata and anything else the browser sent
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    /// Validate a raw payload; `id`, `nome` and `timestamp` are required
    pub fn from_payload(payload: Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(payload)
            .map_err(|e| ProtocolError::MalformedMessage(format!("invalid session: {}", e)))
    }
}

/// External storage for recorded sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a session; `true` on success
    async fn save(&self, record: SessionRecord) -> bool;

    /// Whether the backing store is currently reachable
    fn is_connected(&self) -> bool;
}

/// Store used when no database is configured; every save fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

#[async_trait]
impl SessionStore for NullStore {
    async fn save(&self, record: SessionRecord) -> bool {
        warn!(session = %record.name, "no session store configured, session not saved");
        false
    }

    fn is_connected(&self) -> bool {
        false
    }
}
