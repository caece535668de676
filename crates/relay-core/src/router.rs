//! Connection routing.
//!
//! The router owns the live connection set and resolves declarative
//! [`TargetSpec`]s against it. Delivery is fire-and-forget: a closed
//! connection is logged and skipped, never allowed to abort a broadcast.

use crate::connection::{Connection, ConnectionId, DeliveryError};
use dashmap::DashMap;
use relay_protocol::Payload;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Predicate over a single connection attribute.
pub type AttributePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// How one attribute is matched.
#[derive(Clone)]
pub enum Matcher {
    /// Attribute equals this value.
    Eq(Value),
    /// Attribute satisfies this predicate.
    Predicate(AttributePredicate),
}

impl Matcher {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Matcher::Eq(expected) => expected == value,
            Matcher::Predicate(predicate) => predicate(value),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Eq(value) => f.debug_tuple("Eq").field(value).finish(),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// A conjunctive attribute filter selecting connections.
///
/// An empty spec matches every connection.
#[derive(Debug, Clone, Default)]
pub struct TargetSpec {
    constraints: Vec<(String, Matcher)>,
}

impl TargetSpec {
    /// Create a spec matching every connection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for everyone in `channel`.
    #[must_use]
    pub fn channel(channel: impl Into<String>) -> Self {
        Self::new().equals("channel", channel.into())
    }

    /// Require `attribute` to equal `value`.
    #[must_use]
    pub fn equals(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.constraints
            .push((attribute.into(), Matcher::Eq(value.into())));
        self
    }

    /// Require `attribute` to satisfy `predicate`.
    #[must_use]
    pub fn matching<F>(mut self, attribute: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.constraints
            .push((attribute.into(), Matcher::Predicate(Arc::new(predicate))));
        self
    }

    /// Check a connection against every constraint.
    #[must_use]
    pub fn matches(&self, conn: &Connection) -> bool {
        if self.constraints.is_empty() {
            return true;
        }
        let state = conn.state();
        self.constraints
            .iter()
            .all(|(attribute, matcher)| matcher.matches(&conn.attribute_of(&state, attribute)))
    }
}

/// The live connection set.
pub struct ConnectionRouter {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl ConnectionRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Track a connection.
    pub fn insert(&self, conn: Arc<Connection>) {
        debug!(connection = %conn.id(), address = %conn.address(), "Connection registered");
        self.connections.insert(conn.id().clone(), conn);
    }

    /// Stop tracking a connection.
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            debug!(connection = %id, "Connection unregistered");
        }
        removed
    }

    /// Look up a connection by ID.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Copy the current connection set.
    ///
    /// Map guards are released before this returns, so callers may deliver
    /// (and trigger re-entrant inserts or removals) while iterating.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Deliver to exactly one connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's transport has gone away.
    pub fn reply(&self, payload: Payload, conn: &Connection) -> Result<(), DeliveryError> {
        trace!(connection = %conn.id(), kind = ?payload.cmd(), "Reply");
        conn.deliver(Arc::new(payload)).map_err(|e| {
            warn!(connection = %conn.id(), error = %e, "Reply dropped");
            e
        })
    }

    /// Single-target delivery; same as [`reply`](Self::reply).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's transport has gone away.
    pub fn send(&self, payload: Payload, conn: &Connection) -> Result<(), DeliveryError> {
        self.reply(payload, conn)
    }

    /// Deliver to every connection matching `spec`.
    ///
    /// Returns `true` if at least one connection matched, whether or not
    /// delivery to it succeeded.
    pub fn broadcast(&self, payload: Payload, spec: &TargetSpec) -> bool {
        let targets = self.find(spec);
        if targets.is_empty() {
            trace!(kind = ?payload.cmd(), "Broadcast matched no connections");
            return false;
        }

        let payload = Arc::new(payload);
        let mut delivered = 0usize;
        for conn in &targets {
            match conn.deliver(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection = %conn.id(), error = %e, "Broadcast delivery failed"),
            }
        }

        trace!(
            kind = ?payload.cmd(),
            matched = targets.len(),
            delivered,
            "Broadcast"
        );
        true
    }

    /// Return every connection matching `spec` without delivering.
    #[must_use]
    pub fn find(&self, spec: &TargetSpec) -> Vec<Arc<Connection>> {
        self.snapshot()
            .into_iter()
            .filter(|conn| spec.matches(conn))
            .collect()
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let mut channels = HashSet::new();
        let mut joined_count = 0;
        for conn in self.snapshot() {
            if let Some(channel) = conn.channel() {
                channels.insert(channel);
                joined_count += 1;
            }
        }
        RouterStats {
            connection_count: self.connections.len(),
            joined_count,
            channel_count: channels.len(),
        }
    }
}

impl Default for ConnectionRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Router statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    /// Number of tracked connections.
    pub connection_count: usize,
    /// Number of connections that have joined a channel.
    pub joined_count: usize,
    /// Number of distinct occupied channels.
    pub channel_count: usize,
}
