//! Outbound message kinds and their constructors.
//!
//! Every outbound payload carries a `cmd` naming the kind the client should
//! interpret it as.

use crate::payload::Payload;
use serde_json::Value;

/// Outbound message kinds.
pub mod kind {
    pub const WARN: &str = "warn";
    pub const INFO: &str = "info";
    pub const CHAT: &str = "chat";
    pub const EMOTE: &str = "emote";
    pub const ONLINE_SET: &str = "onlineSet";
    pub const ONLINE_ADD: &str = "onlineAdd";
    pub const ONLINE_REMOVE: &str = "onlineRemove";

    /// All kinds the server emits.
    pub const ALL: &[&str] = &[WARN, INFO, CHAT, EMOTE, ONLINE_SET, ONLINE_ADD, ONLINE_REMOVE];
}

/// Create a warning addressed to a single client.
#[must_use]
pub fn warn(text: impl Into<String>) -> Payload {
    Payload::new(kind::WARN).with("text", text.into())
}

/// Create an informational notice.
#[must_use]
pub fn info(text: impl Into<String>) -> Payload {
    Payload::new(kind::INFO).with("text", text.into())
}

/// Create a chat message.
#[must_use]
pub fn chat(nick: &str, text: &str, trip: Option<&str>, level: u32) -> Payload {
    with_trip(
        Payload::new(kind::CHAT)
            .with("nick", nick)
            .with("text", text)
            .with("level", level),
        trip,
    )
}

/// Create an emote (`/me`) message.
#[must_use]
pub fn emote(nick: &str, text: &str, trip: Option<&str>) -> Payload {
    with_trip(
        Payload::new(kind::EMOTE)
            .with("nick", nick)
            .with("text", format!("@{} {}", nick, text)),
        trip,
    )
}

/// Create a whisper notice. Delivered as an `info` with `type: whisper`.
#[must_use]
pub fn whisper(from: &str, to: &str, text: &str, trip: Option<&str>) -> Payload {
    with_trip(
        info(format!("{} whispered: {}", from, text))
            .with("type", "whisper")
            .with("from", from)
            .with("to", to),
        trip,
    )
}

/// Create an invite notice.
#[must_use]
pub fn invite(from: &str, to: &str, channel: &str) -> Payload {
    info(format!("{} invited you to ?{}", from, channel))
        .with("type", "invite")
        .with("from", from)
        .with("to", to)
        .with("inviteChannel", channel)
}

/// Create the full user list sent to a client that just joined.
#[must_use]
pub fn online_set(channel: &str, nicks: Vec<String>) -> Payload {
    Payload::new(kind::ONLINE_SET)
        .with("channel", channel)
        .with("nicks", Value::from(nicks))
}

/// Announce a user joining a channel.
#[must_use]
pub fn online_add(nick: &str, trip: Option<&str>) -> Payload {
    with_trip(Payload::new(kind::ONLINE_ADD).with("nick", nick), trip)
}

/// Announce a user leaving a channel.
#[must_use]
pub fn online_remove(nick: &str) -> Payload {
    Payload::new(kind::ONLINE_REMOVE).with("nick", nick)
}

fn with_trip(payload: Payload, trip: Option<&str>) -> Payload {
    match trip {
        Some(trip) => payload.with("trip", trip),
        None => payload,
    }
}
