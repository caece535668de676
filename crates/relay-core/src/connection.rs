//! Transport-independent connection identity.
//!
//! A [`Connection`] is what command handlers see of a client: its routing
//! attributes (channel, nick, trip, level) and an outbox the router delivers
//! into. The transport owns the receiving half of the outbox.

use crate::access::Level;
use relay_protocol::Payload;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// Atomic counter for ensuring unique IDs even within the same nanosecond.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique identifier.
#[must_use]
pub fn generate_id() -> u64 {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    timestamp.wrapping_add(counter)
}

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{:x}", generate_id()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport dropped the receiving half of the outbox.
    #[error("Connection closed: {0}")]
    Closed(ConnectionId),
}

/// Outbound queue item.
pub type Outbound = Arc<Payload>;

/// Mutable per-connection attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    /// Joined channel, if any.
    pub channel: Option<String>,
    /// Nickname, set on join.
    pub nick: Option<String>,
    /// Tripcode supplied by the identity collaborator.
    pub trip: Option<String>,
    /// Access level.
    pub level: Level,
    /// Shadow-muted by a moderator.
    pub muzzled: bool,
}

/// A client connection.
pub struct Connection {
    id: ConnectionId,
    /// Rate-limiting identity (network address).
    address: String,
    /// Opaque token standing in for the address in moderator-facing output.
    hash: String,
    state: RwLock<ConnectionState>,
    outbox: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    /// Create a connection and the receiver its deliveries arrive on.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        address: impl Into<String>,
        hash: impl Into<String>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id,
            address: address.into(),
            hash: hash.into(),
            state: RwLock::new(ConnectionState::default()),
            outbox,
        });
        (conn, rx)
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Snapshot of the mutable attributes.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Mutate the attributes. The closure must not block.
    pub fn update<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    #[must_use]
    pub fn channel(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).channel.clone()
    }

    #[must_use]
    pub fn nick(&self) -> Option<String> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).nick.clone()
    }

    #[must_use]
    pub fn level(&self) -> Level {
        self.state.read().unwrap_or_else(PoisonError::into_inner).level
    }

    /// Whether the connection has joined a channel.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .channel
            .is_some()
    }

    /// Whether the transport is still draining the outbox.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbox.is_closed()
    }

    /// Queue a payload for the transport. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport has gone away.
    pub fn deliver(&self, payload: Outbound) -> Result<(), DeliveryError> {
        self.outbox
            .send(payload)
            .map_err(|_| DeliveryError::Closed(self.id.clone()))
    }

    /// Read a routing attribute by name. Unset attributes read as `null`.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Value {
        self.attribute_of(&self.state(), name)
    }

    pub(crate) fn attribute_of(&self, state: &ConnectionState, name: &str) -> Value {
        match name {
            "id" => Value::from(self.id.as_str()),
            "address" => Value::from(self.address.as_str()),
            "hash" => Value::from(self.hash.as_str()),
            "channel" => state.channel.clone().map_or(Value::Null, Value::from),
            "nick" => state.nick.clone().map_or(Value::Null, Value::from),
            "trip" => state.trip.clone().map_or(Value::Null, Value::from),
            "level" => Value::from(state.level),
            "muzzled" => Value::from(state.muzzled),
            _ => Value::Null,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_attributes() {
        let (conn, _rx) = Connection::new("c1".into(), "10.0.0.1", "h1");
        assert_eq!(conn.attribute("channel"), Value::Null);

        conn.update(|s| {
            s.channel = Some("lobby".into());
            s.nick = Some("bob".into());
        });
        assert_eq!(conn.attribute("channel"), Value::from("lobby"));
        assert_eq!(conn.attribute("nick"), Value::from("bob"));
        assert_eq!(conn.attribute("level"), Value::from(Level::USER));
        assert_eq!(conn.attribute("address"), Value::from("10.0.0.1"));
        assert_eq!(conn.attribute("unknown"), Value::Null);
        assert!(conn.is_joined());
    }

    #[test]
    fn test_deliver_after_close() {
        let (conn, rx) = Connection::new("c1".into(), "10.0.0.1", "h1");
        assert!(conn.deliver(Arc::new(Payload::new("info"))).is_ok());
        drop(rx);
        assert!(!conn.is_open());
        assert!(matches!(
            conn.deliver(Arc::new(Payload::new("info"))),
            Err(DeliveryError::Closed(_))
        ));
    }
}
