//! Built-in command modules.
//!
//! Each module is a [`Command`] loaded into the shared [`Context`] at
//! startup. Modules never hold references to each other; cross-module
//! behavior goes through hooks and re-entrant dispatch.

mod chat;
mod emote;
mod help;
mod invite;
mod join;
mod moderation;
mod stats;
mod timestamp;
mod whisper;

use rand::Rng;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::access::at_least;
use tenvis_relay_core::{
    Command, CommandError, Connection, Context, Level, RegistryError, TargetSpec,
};
use tracing::{debug, info};

/// Score for a privileged command attempted without the level for it.
const UNAUTHORIZED_PENALTY: f64 = 10.0;

/// Register every built-in module.
///
/// # Errors
///
/// Returns an error if two modules claim the same name or alias, or a
/// module fails to initialize.
pub async fn load_all(ctx: &Context) -> Result<(), RegistryError> {
    let modules: Vec<Arc<dyn Command>> = vec![
        Arc::new(join::Join),
        Arc::new(chat::Chat),
        Arc::new(emote::Emote),
        Arc::new(whisper::Whisper),
        Arc::new(invite::Invite),
        Arc::new(help::Help),
        Arc::new(stats::Stats),
        Arc::new(moderation::Kick),
        Arc::new(moderation::Ban),
        Arc::new(moderation::Unban),
        Arc::new(moderation::UnbanAll),
        Arc::new(moderation::Dumb),
        Arc::new(moderation::Speak),
    ];
    for module in modules {
        ctx.load(module).await?;
    }
    timestamp::install(ctx);

    info!(commands = ctx.registry().len(), "Commands loaded");
    Ok(())
}

/// Channel and nick of a joined connection.
pub(crate) fn joined(conn: &Connection) -> Option<(String, String)> {
    let state = conn.state();
    Some((state.channel?, state.nick?))
}

/// Trimmed, non-empty string field.
pub(crate) fn text_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload
        .get_str(key)
        .map(str::trim)
        .filter(|text| !text.is_empty())
}

/// Score added for sending `text`.
pub(crate) fn text_penalty(text: &str) -> f64 {
    text.len() as f64 / 83.0 / 4.0
}

/// Whether `conn` holds `min`. Penalizes the caller's address if not.
pub(crate) fn authorize(ctx: &Context, conn: &Connection, min: Level) -> bool {
    if conn.level() >= min {
        return true;
    }
    debug!(connection = %conn.id(), required = %min, "Unauthorized command");
    ctx.police().frisk(conn.address(), UNAUTHORIZED_PENALTY);
    false
}

/// Everyone in `channel` using `nick`.
pub(crate) fn nick_in_channel(channel: &str, nick: &str) -> TargetSpec {
    TargetSpec::channel(channel).equals("nick", nick)
}

/// Moderators anywhere on the server.
pub(crate) fn moderators() -> TargetSpec {
    TargetSpec::new().matching("level", at_least(Level::MODERATOR))
}

/// A fresh, unlisted channel name.
pub(crate) fn random_channel() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Warn the sender.
pub(crate) fn warn(
    ctx: &Context,
    conn: &Arc<Connection>,
    text: impl Into<String>,
) -> Result<(), CommandError> {
    ctx.router().reply(messages::warn(text), conn)?;
    Ok(())
}

/// Inform the sender.
pub(crate) fn notify(
    ctx: &Context,
    conn: &Arc<Connection>,
    text: impl Into<String>,
) -> Result<(), CommandError> {
    ctx.router().reply(messages::info(text), conn)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers for driving commands through a real context.

    use super::*;
    use crate::config::{AccessConfig, Credential};
    use crate::identity::AccessList;
    use tenvis_relay_core::{ConnectionId, Outbound};
    use tokio::sync::mpsc::UnboundedReceiver;

    pub const MOD_KEY: &str = "mod-key";
    pub const ADMIN_KEY: &str = "admin-key";

    pub struct Client {
        pub conn: Arc<Connection>,
        pub rx: UnboundedReceiver<Outbound>,
    }

    impl Client {
        /// Everything delivered since the last call.
        pub fn drain(&mut self) -> Vec<Payload> {
            let mut out = Vec::new();
            while let Ok(payload) = self.rx.try_recv() {
                out.push((*payload).clone());
            }
            out
        }

        /// Delivered payloads of kind `cmd`.
        pub fn drain_kind(&mut self, cmd: &str) -> Vec<Payload> {
            self.drain()
                .into_iter()
                .filter(|p| p.cmd() == Some(cmd))
                .collect()
        }
    }

    pub async fn context() -> Context {
        let ctx = Context::new();
        ctx.state().insert(AccessList::new(&AccessConfig {
            admin: Some(Credential {
                trip: "Admin".into(),
                key: ADMIN_KEY.into(),
            }),
            moderators: vec![Credential {
                trip: "Mod".into(),
                key: MOD_KEY.into(),
            }],
            salt: None,
        }));
        load_all(&ctx).await.unwrap();
        ctx
    }

    /// A connected, not yet joined client.
    pub fn connect(ctx: &Context, id: &str, address: &str) -> Client {
        let (conn, rx) = Connection::new(ConnectionId::new(id), address, format!("hash-{id}"));
        ctx.router().insert(Arc::clone(&conn));
        Client { conn, rx }
    }

    /// A client that has joined `channel` as `nick`, with its inbox drained.
    pub async fn join(
        ctx: &Context,
        id: &str,
        channel: &str,
        nick: &str,
        key: Option<&str>,
    ) -> Client {
        let mut client = connect(ctx, id, &format!("addr-{id}"));
        let mut payload = Payload::new("join")
            .with("channel", channel)
            .with("nick", nick);
        if let Some(key) = key {
            payload.insert("key", key);
        }
        ctx.dispatch(&client.conn, payload).await;
        assert!(client.conn.is_joined(), "{nick} failed to join");
        client.drain();
        client
    }
}
