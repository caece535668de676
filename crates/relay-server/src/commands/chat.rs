//! `chat`: say something in the current channel.
//!
//! Also owns the slash shortcuts typed into the chat box. They are in-hooks
//! that re-dispatch the matching command and drop the original chat.

use super::{joined, text_field, text_penalty, warn};
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{
    Command, CommandError, CommandInfo, Connection, Context, Direction, Hook, HookError,
    HookOutcome, HookSpec, TargetSpec,
};

/// Runs after moderation hooks so muzzled users stay muted.
const SHORTCUT_PRIORITY: i32 = 20;

pub struct Chat;

#[async_trait]
impl Command for Chat {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("chat", "Send a message to the current channel").with_usage("chat <text>")
    }

    fn required_fields(&self) -> &[&str] {
        &["text"]
    }

    fn hooks(&self) -> Vec<HookSpec> {
        vec![HookSpec::new(
            Direction::In,
            "chat",
            SHORTCUT_PRIORITY,
            SlashShortcuts,
        )]
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
        let Some(text) = text_field(&payload, "text") else {
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
                "You are sending too much text. Wait a moment and try again.\n\
                 Press the up arrow key to restore your last message.",
            );
        }

        let state = conn.state();
        ctx.router().broadcast(
            messages::chat(&nick, text, state.trip.as_deref(), state.level.value()),
            &TargetSpec::channel(channel),
        );
        Ok(())
    }
}

/// `/me <text>`, `/whisper <nick> <text>`, and `/w <nick> <text>`.
struct SlashShortcuts;

impl SlashShortcuts {
    fn rewrite(text: &str) -> Option<Payload> {
        if let Some(rest) = text.strip_prefix("/me ") {
            return Some(Payload::new("emote").with("text", rest.trim()));
        }
        let rest = text
            .strip_prefix("/whisper ")
            .or_else(|| text.strip_prefix("/w "))?;
        let (nick, message) = rest.trim_start().split_once(' ')?;
        Some(
            Payload::new("whisper")
                .with("nick", nick.trim_start_matches('@'))
                .with("text", message.trim()),
        )
    }
}

#[async_trait]
impl Hook for SlashShortcuts {
    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: &Payload,
    ) -> Result<HookOutcome, HookError> {
        let Some(rewritten) = payload.get_str("text").and_then(Self::rewrite) else {
            return Ok(HookOutcome::Continue);
        };
        ctx.dispatch(conn, rewritten).await;
        Ok(HookOutcome::Drop)
    }
}
