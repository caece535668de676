//! `stats`: server-wide counters.

use async_trait::async_trait;
use relay_protocol::{messages, Payload};
use std::sync::Arc;
use tenvis_relay_core::{Command, CommandError, CommandInfo, Connection, Context};

pub struct Stats;

#[async_trait]
impl Command for Stats {
    fn info(&self) -> CommandInfo {
        CommandInfo::new("stats", "Show server statistics")
    }

    async fn run(
        &self,
        ctx: &Context,
        conn: &Arc<Connection>,
        _payload: Payload,
    ) -> Result<(), CommandError> {
        let router = ctx.router().stats();
        let banned = ctx.police().arrested_count();

        let text = format!(
            "{} unique IPs\n{} users online\n{} active channels\n{} banned",
            unique_addresses(ctx),
            router.joined_count,
            router.channel_count,
            banned
        );
        ctx.router().reply(
            messages::info(text)
                .with("users", router.joined_count)
                .with("chans", router.channel_count)
                .with("banned", banned),
            conn,
        )?;
        Ok(())
    }
}

fn unique_addresses(ctx: &Context) -> usize {
    let mut addresses: Vec<String> = ctx
        .router()
        .snapshot()
        .iter()
        .map(|conn| conn.address().to_string())
        .collect();
    addresses.sort_unstable();
    addresses.dedup();
    addresses.len()
}
