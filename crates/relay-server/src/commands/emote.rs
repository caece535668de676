//! `emote` (`me`): third-person action in the current channel.

use super::{joined, text_field, text_penalty, warn};
use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context, TargetSpec};

pub struct Emote;

#[async_trait]
impl Command for Emote {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("emote", "Describe an action")
            .with_aliases(&["me"])
            .with_usage("me <text>")
    }

    fn required_fields(&self) -> &[&str] {
        &["text"]
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
                "You are sending too much text. Wait a moment and try again.",
            );
        }

        let trip = conn.state().trip;
        ctx.router().broadcast(
            messages::emote(&nick, text, trip.as_deref()),
            &TargetSpec::channel(channel),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::*;
    use relay_protocol::Payload;

    #[tokio::test]
    async fn test_emote_by_alias() {
        let ctx = context().await;
        let mut alice = join(&ctx, "a", "lobby", "alice", Some("secret")).await;

        ctx.dispatch(&alice.conn, Payload::new("me").with("text", "shrugs"))
            .await;

        let emotes = alice.drain_kind("emote");
        assert_eq!(emotes.len(), 1);
        assert_eq!(emotes[0].get_str("text"), Some("@alice shrugs"));
        assert!(emotes[0].has("trip"));
    }
}
