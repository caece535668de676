//! `invite`: send someone a link to a fresh unlisted channel.

use super::{joined, nick_in_channel, notify, random_channel, text_field, warn};
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context};

const INVITE_PENALTY: f64 = 2.0;

pub struct Invite;

#[async_trait]
impl Command for Invite {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("invite", "Invite a user to a new private channel")
            .with_usage("invite <nick>")
    }

    fn required_fields(&self) -> &[&str] {
        &["nick"]
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
        let Some(target) = text_field(&payload, "nick") else {
            return Ok(());
        };

        if ctx
            .police()
            .frisk(conn.address(), INVITE_PENALTY)
            .is_denied()
        {
            return warn(
                ctx,
                conn,
                "You are sending invites too fast. Wait a moment before trying again.",
            );
        }

        let invite_channel = random_channel();
        let delivered = ctx.router().broadcast(
            messages::invite(&nick, target, &invite_channel),
            &nick_in_channel(&channel, target),
        );
        if !delivered {
            return warn(ctx, conn, "Could not find user in channel");
        }

        notify(
            ctx,
            conn,
            format!("You invited {} to ?{}", target, invite_channel),
        )
    }
}
