//! `join`: enter a channel under a nickname.

use super::{notify, warn};
use crate::identity::AccessList;
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::names::{validate_channel_name, validate_nick};
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context, TargetSpec};
use tracing::info;

const JOIN_PENALTY: f64 = 3.0;

pub struct Join;

#[async_trait]
impl Command for Join {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("join", "Join a channel under a nickname")
            .with_usage("join <channel> <nick> [key]")
    }

    fn required_fields(&self) -> &[&str] {
        &["channel", "nick"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        if conn.is_joined() {
            return Ok(());
        }

        if ctx.police().frisk(conn.address(), JOIN_PENALTY).is_denied() {
            return warn(
                ctx,
                conn,
                "You are joining channels too fast. Wait a moment and try again.",
            );
        }

        let channel = payload.get_str("channel").unwrap_or_default().trim();
        let nick = payload.get_str("nick").unwrap_or_default().trim();
        if let Err(reason) = validate_channel_name(channel) {
            return warn(ctx, conn, reason);
        }
        if let Err(reason) = validate_nick(nick) {
            return warn(ctx, conn, reason);
        }

        let wanted = nick.to_ascii_lowercase();
        let taken = TargetSpec::channel(channel).matching("nick", move |value| {
            value
                .as_str()
                .map_or(false, |existing| existing.to_ascii_lowercase() == wanted)
        });
        if !ctx.router().find(&taken).is_empty() {
            return warn(ctx, conn, "Nickname taken");
        }

        let access = ctx.state().get::<AccessList>().unwrap_or_default();
        let (level, trip) = access.resolve(payload.get_str("key"));

        ctx.router().broadcast(
            messages::online_add(nick, trip.as_deref()),
            &TargetSpec::channel(channel),
        );

        conn.update(|state| {
            state.channel = Some(channel.to_string());
            state.nick = Some(nick.to_string());
            state.trip = trip.clone();
            state.level = level;
        });

        let nicks = ctx
            .router()
            .find(&TargetSpec::channel(channel))
            .iter()
            .filter_map(|member| member.nick())
            .collect();
        ctx.router()
            .reply(messages::online_set(channel, nicks), conn)?;

        if level.is_moderator() {
            notify(ctx, conn, format!("Signed in as {} ({})", nick, level))?;
        }

        info!(connection = %conn.id(), channel = %channel, nick = %nick, "Joined");
        Ok(())
    }
}
