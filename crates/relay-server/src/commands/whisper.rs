//! `whisper` (`w`): private message to someone in the same channel.

use super::{joined, nick_in_channel, text_field, text_penalty, warn};
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context};

pub struct Whisper;

#[async_trait]
impl Command for Whisper {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("whisper", "Send a private message")
            .with_aliases(&["w"])
            .with_usage("whisper <nick> <text>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick", "text"]
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        let Some((channel, nick)) = joined(conn) else {
            return Ok(());
        };
        let (Some(target), Some(text)) = (text_field(&payload, "nick"), text_field(&payload, "text"))
        else {
            return Ok(());
        };

        if ctx
            .police()
            .frisk(conn.address(), text_penalty(text))
            .is_denied()
        {
            return warn(
                ctx,
                conn,
                "You are sending too much text. Wait a moment and try again.",
            );
        }

        let trip = conn.state().trip;
        let delivered = ctx.router().broadcast(
            messages::whisper(&nick, target, text, trip.as_deref()),
            &nick_in_channel(&channel, target),
        );
        if !delivered {
            return warn(ctx, conn, "Could not find user in channel");
        }

        ctx.router().reply(
            messages::info(format!("You whispered to @{}: {}", target, text))
                .with("type", "whisper")
                .with("to", target),
            conn,
        )?;
        Ok(())
    }
}
