//! `help` (`h`): list commands or show one command's usage.

use super::{notify, text_field, warn};
use async_trait::async_trait;
use relay_protocol::Payload;
use std::sync::Arc;
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context};

pub struct Help;

#[async_trait]
impl Command for Help {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("help", "List commands, or describe one")
            .with_aliases(&["h"])
            .with_usage("help [command]")
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        payload: Payload,
    ) -> Result<(), CommandError> {
        let Some(name) = text_field(&payload, "command") else {
            let names = ctx.registry().names().join(", ");
            return notify(
                ctx,
                conn,
                format!("Commands: {}\n\nRun help <command> for details.", names),
            );
        };

        let Some(descriptor) = ctx.registry().resolve(name.trim_start_matches('/')) else {
            return warn(ctx, conn, format!("Unknown command: {}", name));
        };

        let mut text = format!("{}: {}", descriptor.name, descriptor.description);
        if !descriptor.aliases.is_empty() {
            text.push_str(&format!("\nAliases: {}", descriptor.aliases.join(", ")));
        }
        if !descriptor.usage.is_empty() {
            text.push_str(&format!("\nUsage: {}", descriptor.usage));
        }
        notify(ctx, conn, text)
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::*;
    use relay_protocol::Payload;

    #[tokio::test]
    async fn test_help_lists_and_describes() {
        let ctx = context().await;
        let mut client = connect(&ctx, "a", "addr-a");

        ctx.dispatch(&client.conn, Payload::new("h")).await;
        let listing = client.drain_kind("info");
        let text = listing[0].get_str("text").unwrap();
        assert!(text.starts_with("Commands: ban, chat, dumb, emote, help"));

        ctx.dispatch(&client.conn, Payload::new("help").with("command", "w"))
            .await;
        let detail = client.drain_kind("info");
        let text = detail[0].get_str("text").unwrap();
        assert!(text.starts_with("whisper: "));
        assert!(text.contains("Usage: whisper <nick> <text>"));

        ctx.dispatch(&client.conn, Payload::new("help").with("command", "nope"))
            .await;
        assert_eq!(client.drain_kind("warn").len(), 1);
    }
}
