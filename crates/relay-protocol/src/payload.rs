//! The structured message exchanged between clients and the relay.
//!
//! A payload is a JSON object with a `cmd` field naming the command (inbound)
//! or the message kind (outbound). Every other field is command specific.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the field that identifies a payload's command or kind.
pub const CMD_FIELD: &str = "cmd";

/// A structured message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Create a payload with only its `cmd` field set.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(CMD_FIELD.to_string(), Value::String(cmd.into()));
        Self(map)
    }

    /// Wrap an existing JSON object.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get the `cmd` field, if present and a string.
    #[must_use]
    pub fn cmd(&self) -> Option<&str> {
        self.get_str(CMD_FIELD)
    }

    /// Replace the `cmd` field.
    pub fn set_cmd(&mut self, cmd: impl Into<String>) {
        self.0
            .insert(CMD_FIELD.to_string(), Value::String(cmd.into()));
    }

    /// Get a field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Check whether a field is present. A JSON `null` counts as present.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Return the fields from `required` that this payload lacks, in order.
    #[must_use]
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|field| !self.has(field))
            .map(String::as_str)
            .collect()
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into the underlying JSON object.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Payload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
